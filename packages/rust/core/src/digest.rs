//! Digest building and committing.
//!
//! [`DigestBuilder::build`] selects, renders and composes a digest without
//! touching the store. [`DigestBuilder::commit`] is the only step that marks
//! entries as consumed, so a failed conversion or delivery can simply be
//! retried with another build.

use std::collections::BTreeSet;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use sha2::{Digest as _, Sha256};
use tracing::{debug, info, instrument, warn};

use feeddigest_rewrite::AssetRewriter;
use feeddigest_shared::{
    CURRENT_SCHEMA_VERSION, Chapter, DigestConfig, DigestError, DigestId, DigestManifest,
    IndexEntry, Result, Watermark,
};
use feeddigest_storage::{CommitSummary, EntryStore};

use crate::assembler::{ChapterAssembler, escape_html, mark_read_href};
use crate::select::{self, Selection};
use crate::toc;

/// File name of the manifest written next to the document.
pub const MANIFEST_FILE: &str = "manifest.json";

/// A composed but uncommitted digest.
#[derive(Debug, Clone)]
pub struct Digest {
    pub id: DigestId,
    pub title: String,
    pub created_at: DateTime<Utc>,
    /// Upper `date_added` bound of the selection; the watermark after commit.
    pub cutoff: DateTime<Utc>,
    pub previous_watermark: Option<Watermark>,
    pub chapters: Vec<Chapter>,
    pub index: Vec<IndexEntry>,
    /// The complete HTML document.
    pub html: String,
    pub included_keys: BTreeSet<String>,
}

impl Digest {
    /// Document file name, e.g. `digest-2024-05-01.html`.
    pub fn file_name(&self) -> String {
        format!("digest-{}.html", self.created_at.format("%Y-%m-%d"))
    }
}

/// Result of [`DigestBuilder::build`].
#[derive(Debug, Clone)]
pub enum BuildOutcome {
    /// No pending entries.
    Empty { watermark: Option<Watermark> },
    Ready(Digest),
}

/// Paths written by [`DigestBuilder::write_document`].
#[derive(Debug, Clone)]
pub struct WrittenDigest {
    pub document_path: PathBuf,
    pub manifest_path: PathBuf,
    pub manifest: DigestManifest,
}

/// Builds digests from an entry store.
pub struct DigestBuilder {
    config: DigestConfig,
    assembler: ChapterAssembler,
}

impl DigestBuilder {
    pub fn new(config: DigestConfig) -> Result<Self> {
        let rewriter = AssetRewriter::new(config.rewrite.clone())?;
        let assembler = ChapterAssembler::new(rewriter, config.mark_read_endpoint.clone());
        Ok(Self { config, assembler })
    }

    pub fn config(&self) -> &DigestConfig {
        &self.config
    }

    /// Build a digest of everything pending right now. The cutoff is read
    /// together with the store snapshot. Never writes to the store.
    pub async fn build(&self, store: &EntryStore) -> Result<BuildOutcome> {
        self.compose(select::select_current(store)?).await
    }

    /// Build a digest of everything pending as of `now`. Never writes to the
    /// store.
    pub async fn build_at(&self, store: &EntryStore, now: DateTime<Utc>) -> Result<BuildOutcome> {
        self.compose(select::select(store, now)?).await
    }

    #[instrument(skip_all, fields(cutoff = %selection.cutoff))]
    async fn compose(&self, selection: Selection) -> Result<BuildOutcome> {
        if selection.entries.is_empty() {
            info!("nothing to digest");
            return Ok(BuildOutcome::Empty {
                watermark: selection.watermark,
            });
        }

        info!(entries = selection.entries.len(), "building digest");

        let chapters = self.assembler.assemble(&selection.entries).await;
        ensure_usable(&chapters)?;

        let index = toc::build_index(&chapters, &selection.entries);
        let included_keys: BTreeSet<String> =
            chapters.iter().map(|c| c.entry_key.clone()).collect();

        let mut digest = Digest {
            id: DigestId::new(),
            title: self.config.title.clone(),
            created_at: selection.cutoff,
            cutoff: selection.cutoff,
            previous_watermark: selection.watermark,
            chapters,
            index,
            html: String::new(),
            included_keys,
        };
        digest.html = render_document(&digest, self.config.mark_read_endpoint.as_ref());

        info!(
            id = %digest.id,
            chapters = digest.chapters.len(),
            size = digest.html.len(),
            "digest built"
        );
        Ok(BuildOutcome::Ready(digest))
    }

    /// Write the document and its manifest into the output directory.
    #[instrument(skip_all, fields(id = %digest.id))]
    pub fn write_document(&self, digest: &Digest) -> Result<WrittenDigest> {
        let dir = &self.config.output_dir;
        std::fs::create_dir_all(dir).map_err(|e| DigestError::io(dir, e))?;

        let file_name = digest.file_name();
        let document_path = dir.join(&file_name);
        write_atomic(&document_path, digest.html.as_bytes())?;

        let manifest = DigestManifest {
            schema_version: CURRENT_SCHEMA_VERSION,
            id: digest.id.clone(),
            title: digest.title.clone(),
            created_at: digest.created_at,
            cutoff: digest.cutoff,
            previous_watermark: digest.previous_watermark.map(|w| w.last_digest),
            entries: digest.index.clone(),
            document: file_name,
            sha256: sha256_hex(digest.html.as_bytes()),
            size_bytes: digest.html.len(),
        };

        let manifest_path = dir.join(MANIFEST_FILE);
        let json = serde_json::to_string_pretty(&manifest).map_err(|e| {
            DigestError::validation(format!("JSON serialization failed: {e}"))
        })?;
        write_atomic(&manifest_path, json.as_bytes())?;

        info!(document = %document_path.display(), "digest written");
        Ok(WrittenDigest {
            document_path,
            manifest_path,
            manifest,
        })
    }

    /// Mark every entry of `digest` as digested and advance the watermark
    /// to its cutoff.
    pub fn commit(&self, store: &EntryStore, digest: &Digest) -> Result<CommitSummary> {
        commit_keys(store, &digest.included_keys, digest.cutoff)
    }
}

/// Commit an explicit key set. Repeating a commit is harmless.
#[instrument(skip_all, fields(keys = keys.len(), %cutoff))]
pub fn commit_keys(
    store: &EntryStore,
    keys: &BTreeSet<String>,
    cutoff: DateTime<Utc>,
) -> Result<CommitSummary> {
    store.commit_digest(keys, cutoff)
}

/// Commit the digest described by a previously written manifest.
pub fn commit_manifest(store: &EntryStore, manifest_path: &Path) -> Result<CommitSummary> {
    let manifest = read_manifest(manifest_path)?;
    commit_keys(store, &manifest.included_keys(), manifest.cutoff)
}

/// Load and validate a `manifest.json`.
pub fn read_manifest(path: &Path) -> Result<DigestManifest> {
    let content = std::fs::read_to_string(path).map_err(|e| DigestError::io(path, e))?;
    let manifest: DigestManifest = serde_json::from_str(&content)
        .map_err(|e| DigestError::validation(format!("invalid manifest.json: {e}")))?;

    if manifest.schema_version != CURRENT_SCHEMA_VERSION {
        return Err(DigestError::validation(format!(
            "unsupported schema_version: {} (expected {})",
            manifest.schema_version, CURRENT_SCHEMA_VERSION
        )));
    }
    Ok(manifest)
}

/// A digest made only of placeholders is not worth delivering.
fn ensure_usable(chapters: &[Chapter]) -> Result<()> {
    if !chapters.is_empty() && chapters.iter().all(|c| c.degraded) {
        return Err(DigestError::Rewrite(format!(
            "all {} chapters failed to render",
            chapters.len()
        )));
    }
    let degraded = chapters.iter().filter(|c| c.degraded).count();
    if degraded > 0 {
        warn!(degraded, "some chapters were replaced by placeholders");
    }
    Ok(())
}

/// Compose cover, table of contents and chapters into one HTML document.
fn render_document(digest: &Digest, mark_read_endpoint: Option<&url::Url>) -> String {
    let title = escape_html(&digest.title);
    let all_keys = digest
        .index
        .iter()
        .map(|row| row.entry_key.as_str())
        .collect::<Vec<_>>();

    let mark_all = mark_read_endpoint
        .map(|endpoint| {
            format!(
                "<p class=\"mark-read\"><a href=\"{}\">Mark all as read</a></p>\n",
                escape_html(&mark_read_href(endpoint, all_keys.iter().copied()))
            )
        })
        .unwrap_or_default();

    let count = digest.chapters.len();
    let noun = if count == 1 { "article" } else { "articles" };

    let mut html = format!(
        "<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n\
         <meta charset=\"utf-8\">\n\
         <meta name=\"digest-id\" content=\"{id}\">\n\
         <title>{title}</title>\n\
         </head>\n<body>\n\
         <section id=\"cover\" class=\"cover\" data-entry-keys=\"{keys}\">\n\
         <h1>{title}</h1>\n\
         <p class=\"date\">{date}</p>\n\
         <p class=\"count\">{count} {noun}</p>\n\
         {mark_all}\
         </section>\n",
        id = digest.id,
        keys = escape_html(&all_keys.join(",")),
        date = digest.created_at.format("%A, %B %-d, %Y"),
    );

    html.push_str(&toc::render_toc(&digest.index, &digest.chapters));
    for chapter in &digest.chapters {
        html.push_str(&chapter.rendered_content);
    }
    html.push_str("</body>\n</html>\n");
    html
}

/// Write to a sibling temp file, sync, then rename over `path`.
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let temp = path.with_file_name(format!(".{name}.{}.tmp", uuid::Uuid::now_v7()));

    let result = (|| {
        let mut file = std::fs::File::create(&temp).map_err(|e| DigestError::io(&temp, e))?;
        file.write_all(bytes).map_err(|e| DigestError::io(&temp, e))?;
        file.sync_all().map_err(|e| DigestError::io(&temp, e))?;
        std::fs::rename(&temp, path).map_err(|e| DigestError::io(path, e))
    })();

    if result.is_err() {
        let _ = std::fs::remove_file(&temp);
    }
    result?;

    debug!(path = %path.display(), size = bytes.len(), "wrote file");
    Ok(())
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}
