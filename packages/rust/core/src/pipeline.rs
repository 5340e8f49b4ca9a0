//! End-to-end digest run: build → write → convert → deliver → commit.
//!
//! Commit runs last, so any earlier failure leaves the store untouched and
//! the run can be repeated.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use tracing::{info, instrument};

use feeddigest_shared::{DigestId, Result};
use feeddigest_storage::{CommitSummary, EntryStore};

use crate::delivery::{Converter, Transport};
use crate::digest::{BuildOutcome, DigestBuilder};

/// Options for [`run_digest`].
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Send the converted document. When false the digest is still committed
    /// after conversion.
    pub deliver: bool,
    pub recipients: Vec<String>,
}

/// Result of a completed run.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub digest_id: DigestId,
    pub document_path: PathBuf,
    pub manifest_path: PathBuf,
    pub converted_path: PathBuf,
    pub chapter_count: usize,
    pub degraded_count: usize,
    pub delivered: bool,
    pub commit: CommitSummary,
    pub elapsed: Duration,
}

/// Outcome of [`run_digest`].
#[derive(Debug, Clone)]
pub enum RunOutcome {
    NothingToDigest,
    Completed(RunReport),
}

/// Progress callback for reporting pipeline status.
pub trait ProgressReporter: Send + Sync {
    /// Called when entering a new phase.
    fn phase(&self, name: &str);
    /// Called when the run completes.
    fn done(&self, report: &RunReport);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn phase(&self, _name: &str) {}
    fn done(&self, _report: &RunReport) {}
}

/// Run the full digest pipeline.
///
/// 1. Build the digest (read-only on the store)
/// 2. Write the document and manifest
/// 3. Convert
/// 4. Deliver (optional)
/// 5. Commit
#[instrument(skip_all, fields(deliver = options.deliver))]
pub async fn run_digest<C: Converter, T: Transport>(
    builder: &DigestBuilder,
    store: &EntryStore,
    converter: &C,
    transport: &T,
    options: &RunOptions,
    progress: &dyn ProgressReporter,
) -> Result<RunOutcome> {
    let start = Instant::now();

    progress.phase("Selecting unread entries");
    let digest = match builder.build(store).await? {
        BuildOutcome::Empty { .. } => {
            info!("no unread entries, nothing to deliver");
            return Ok(RunOutcome::NothingToDigest);
        }
        BuildOutcome::Ready(digest) => digest,
    };

    progress.phase("Writing digest");
    let written = builder.write_document(&digest)?;

    progress.phase("Converting");
    let converted_path = converter.convert(&written.document_path).await?;

    if options.deliver {
        progress.phase("Delivering");
        transport.send(&options.recipients, &converted_path).await?;
    }

    progress.phase("Marking entries as digested");
    let commit = builder.commit(store, &digest)?;

    let report = RunReport {
        digest_id: digest.id.clone(),
        document_path: written.document_path,
        manifest_path: written.manifest_path,
        converted_path,
        chapter_count: digest.chapters.len(),
        degraded_count: digest.chapters.iter().filter(|c| c.degraded).count(),
        delivered: options.deliver,
        commit,
        elapsed: start.elapsed(),
    };

    progress.done(&report);

    info!(
        id = %report.digest_id,
        chapters = report.chapter_count,
        delivered = report.delivered,
        elapsed_ms = report.elapsed.as_millis(),
        "digest run complete"
    );

    Ok(RunOutcome::Completed(report))
}
