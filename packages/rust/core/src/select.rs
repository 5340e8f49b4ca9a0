//! Unread selection.
//!
//! An entry is pending when it was added after the last committed digest,
//! no later than the current build's cutoff, and does not carry the digest
//! tag. The tag check holds even if the watermark says otherwise.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, instrument};

use feeddigest_shared::{Entry, Result, Watermark};
use feeddigest_storage::{EntryStore, StoreSnapshot};

/// Entries chosen for one build.
#[derive(Debug, Clone)]
pub struct Selection {
    /// Pending entries in store order.
    pub entries: Vec<Entry>,
    /// Watermark read together with the entries.
    pub watermark: Option<Watermark>,
    /// Upper `date_added` bound used for this selection.
    pub cutoff: DateTime<Utc>,
}

/// Counts reported by `feeddigest status`.
#[derive(Debug, Clone, Serialize)]
pub struct StoreStatus {
    pub store_path: PathBuf,
    pub total: usize,
    pub digested: usize,
    pub pending: usize,
    pub last_digest: Option<DateTime<Utc>>,
}

/// Whether `entry` belongs in the next digest.
pub fn is_pending(entry: &Entry, watermark: Option<&Watermark>, cutoff: DateTime<Utc>) -> bool {
    if entry.is_digested() || entry.date_added > cutoff {
        return false;
    }
    match watermark {
        Some(w) => entry.date_added > w.last_digest,
        None => true,
    }
}

/// Pure selection over already-loaded entries. Never mutates anything.
pub fn select_unread(
    entries: &[Entry],
    watermark: Option<&Watermark>,
    cutoff: DateTime<Utc>,
) -> Vec<Entry> {
    entries
        .iter()
        .filter(|e| is_pending(e, watermark, cutoff))
        .cloned()
        .collect()
}

/// Select the pending entries as of the moment the store is read.
///
/// The cutoff is taken under the store lock together with the snapshot, so
/// any entry stored later lands after the cutoff and waits for the next build.
pub fn select_current(store: &EntryStore) -> Result<Selection> {
    let (snapshot, cutoff) = store.snapshot_now()?;
    Ok(select_from(snapshot, cutoff))
}

/// Read the store once and select the pending entries as of `cutoff`.
pub fn select(store: &EntryStore, cutoff: DateTime<Utc>) -> Result<Selection> {
    Ok(select_from(store.snapshot()?, cutoff))
}

#[instrument(skip_all, fields(%cutoff))]
fn select_from(snapshot: StoreSnapshot, cutoff: DateTime<Utc>) -> Selection {
    let StoreSnapshot { entries, watermark } = snapshot;
    let selected = select_unread(&entries, watermark.as_ref(), cutoff);

    debug!(
        total = entries.len(),
        selected = selected.len(),
        watermark = ?watermark.map(|w| w.last_digest),
        "selection computed"
    );

    Selection {
        entries: selected,
        watermark,
        cutoff,
    }
}

/// Summarize the store as of `now`.
pub fn status(store: &EntryStore, now: DateTime<Utc>) -> Result<StoreStatus> {
    let StoreSnapshot { entries, watermark } = store.snapshot()?;
    let pending = entries
        .iter()
        .filter(|e| is_pending(e, watermark.as_ref(), now))
        .count();

    Ok(StoreStatus {
        store_path: store.path().to_path_buf(),
        total: entries.len(),
        digested: entries.iter().filter(|e| e.is_digested()).count(),
        pending,
        last_digest: watermark.map(|w| w.last_digest),
    })
}
