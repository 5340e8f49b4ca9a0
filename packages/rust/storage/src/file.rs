//! On-disk format of the entry store.
//!
//! The whole store is one JSON document. Writes go to a sibling temp file
//! that is synced and then renamed over the original, so readers always see
//! either the previous or the next complete snapshot. The directory is synced
//! after the rename so the new entry survives a crash.

use std::collections::HashSet;
use std::io::Write;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use feeddigest_shared::{CURRENT_SCHEMA_VERSION, DigestError, Entry, Result};

/// Root structure of the store file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct StoreFile {
    pub schema_version: u32,
    /// Watermark; `None` until the first digest is committed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_digest: Option<DateTime<Utc>>,
    /// Entries in first-insertion order.
    #[serde(default)]
    pub entries: Vec<Entry>,
}

impl Default for StoreFile {
    fn default() -> Self {
        Self {
            schema_version: CURRENT_SCHEMA_VERSION,
            last_digest: None,
            entries: Vec::new(),
        }
    }
}

impl StoreFile {
    pub fn position(&self, key: &str) -> Option<usize> {
        self.entries.iter().position(|e| e.key == key)
    }
}

/// Read the store. A missing or zero-length file is an empty store; anything
/// else that does not parse is reported as corruption.
pub(crate) fn read(path: &Path) -> Result<StoreFile> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "store file not found, starting empty");
            return Ok(StoreFile::default());
        }
        Err(e) => return Err(DigestError::io(path, e)),
    };

    if bytes.iter().all(|b| b.is_ascii_whitespace()) {
        debug!(path = %path.display(), "store file is empty");
        return Ok(StoreFile::default());
    }

    let file: StoreFile =
        serde_json::from_slice(&bytes).map_err(|e| DigestError::corrupt(path, e.to_string()))?;

    if file.schema_version != CURRENT_SCHEMA_VERSION {
        return Err(DigestError::corrupt(
            path,
            format!(
                "unsupported schema_version: {} (expected {})",
                file.schema_version, CURRENT_SCHEMA_VERSION
            ),
        ));
    }

    let mut seen = HashSet::with_capacity(file.entries.len());
    for entry in &file.entries {
        if !seen.insert(entry.key.as_str()) {
            return Err(DigestError::corrupt(
                path,
                format!("duplicate entry key '{}'", entry.key),
            ));
        }
    }

    Ok(file)
}

/// Atomically replace the store with `file`.
pub(crate) fn write(path: &Path, file: &StoreFile) -> Result<()> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(parent).map_err(|e| DigestError::io(parent, e))?;

    let json = serde_json::to_vec_pretty(file)
        .map_err(|e| DigestError::Storage(format!("JSON serialization failed: {e}")))?;

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "entries.json".into());
    let temp = parent.join(format!(".{file_name}.{}.tmp", Uuid::now_v7()));

    let result = (|| {
        let mut handle = std::fs::File::create(&temp).map_err(|e| DigestError::io(&temp, e))?;
        handle.write_all(&json).map_err(|e| DigestError::io(&temp, e))?;
        handle.sync_all().map_err(|e| DigestError::io(&temp, e))?;
        std::fs::rename(&temp, path).map_err(|e| DigestError::io(path, e))?;
        sync_dir(parent)
    })();

    if result.is_err() {
        let _ = std::fs::remove_file(&temp);
    }
    result?;

    debug!(path = %path.display(), entries = file.entries.len(), "store written");
    Ok(())
}

/// Flush directory metadata (the rename) to disk.
#[cfg(unix)]
fn sync_dir(dir: &Path) -> Result<()> {
    std::fs::File::open(dir)
        .and_then(|d| d.sync_all())
        .map_err(|e| DigestError::io(dir, e))
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> Result<()> {
    Ok(())
}
