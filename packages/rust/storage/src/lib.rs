//! File-backed entry store.
//!
//! The [`EntryStore`] keeps every ingested [`Entry`] plus the digest
//! watermark in a single JSON file (see [`file`] for the format).
//!
//! **Access rules:**
//! - Every mutation is a read-modify-write of the whole file under an
//!   exclusive lock on a sibling `<store>.lock` file, replaced atomically on
//!   disk. The lock is an OS file lock, so it serializes writers across
//!   handles and processes.
//! - Reads take the same lock shared and see the last committed write.
//! - New entries get their `date_added` stamp while the exclusive lock is held.
//! - [`EntryStore::open_readonly`] handles reject all mutations.

mod file;

use std::collections::BTreeSet;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use fd_lock::RwLock;
use tracing::{debug, info, instrument, warn};

use feeddigest_shared::{DIGEST_TAG, DigestError, Entry, Result, Watermark};

/// Entries and watermark read from one snapshot of the store.
#[derive(Debug, Clone, Default)]
pub struct StoreSnapshot {
    /// Entries in first-insertion order.
    pub entries: Vec<Entry>,
    pub watermark: Option<Watermark>,
}

/// What a digest commit changed.
#[derive(Debug, Clone)]
pub struct CommitSummary {
    /// Entries that gained the digest tag in this commit.
    pub newly_tagged: usize,
    /// Requested keys that are not in the store.
    pub missing: Vec<String>,
    /// Untagged entries added before the cutoff that the digest did not
    /// include. The watermark stays below them so the next build selects them.
    pub deferred: Vec<String>,
    /// Watermark after the commit.
    pub watermark: Watermark,
}

/// Primary storage handle wrapping the JSON store file.
pub struct EntryStore {
    path: PathBuf,
    readonly: bool,
}

impl EntryStore {
    /// Open the store at `path` in read-write mode. The file is created on
    /// first write.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            readonly: false,
        }
    }

    /// Open the store at `path` in read-only mode.
    pub fn open_readonly(path: impl Into<PathBuf>) -> Self {
        Self {
            readonly: true,
            ..Self::open(path)
        }
    }

    /// Location of the store file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Ensure we're in read-write mode before writing.
    fn check_writable(&self) -> Result<()> {
        if self.readonly {
            return Err(DigestError::Storage(
                "entry store is opened in read-only mode".into(),
            ));
        }
        Ok(())
    }

    fn lock_path(&self) -> PathBuf {
        let name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "entries.json".into());
        self.path.with_file_name(format!("{name}.lock"))
    }

    /// Run `f` while holding the exclusive store lock.
    fn exclusive<T>(&self, f: impl FnOnce() -> Result<T>) -> Result<T> {
        let lock_path = self.lock_path();
        if let Some(parent) = lock_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| DigestError::io(parent, e))?;
        }

        let handle = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)
            .map_err(|e| DigestError::io(&lock_path, e))?;
        let mut lock = RwLock::new(handle);
        let _guard = lock.write().map_err(|e| DigestError::io(&lock_path, e))?;
        f()
    }

    /// Run `f` while holding the shared store lock. A lock file that cannot
    /// be opened (no store directory yet, read-only media) means there is no
    /// writer to wait for, and `f` runs unlocked.
    fn shared<T>(&self, f: impl FnOnce() -> Result<T>) -> Result<T> {
        let lock_path = self.lock_path();
        let handle = match OpenOptions::new()
            .read(true)
            .write(!self.readonly)
            .create(!self.readonly)
            .truncate(false)
            .open(&lock_path)
        {
            Ok(handle) => handle,
            Err(e) => {
                debug!(path = %lock_path.display(), error = %e, "reading store without lock");
                return f();
            }
        };
        let lock = RwLock::new(handle);
        let _guard = lock.read().map_err(|e| DigestError::io(&lock_path, e))?;
        f()
    }

    fn read(&self) -> Result<file::StoreFile> {
        self.shared(|| file::read(&self.path))
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    /// All entries, in first-insertion order.
    pub fn scan_all(&self) -> Result<Vec<Entry>> {
        Ok(self.read()?.entries)
    }

    /// Entries and watermark from a single read.
    pub fn snapshot(&self) -> Result<StoreSnapshot> {
        Ok(snapshot_of(self.read()?))
    }

    /// A snapshot plus the instant it was taken, read under the store lock.
    ///
    /// Writers stamp `date_added` under the exclusive lock, so an entry
    /// missing from the snapshot is stamped no earlier than the returned time.
    pub fn snapshot_now(&self) -> Result<(StoreSnapshot, DateTime<Utc>)> {
        self.shared(|| {
            let file = file::read(&self.path)?;
            Ok((snapshot_of(file), Utc::now()))
        })
    }

    /// Look up a single entry.
    pub fn get(&self, key: &str) -> Result<Option<Entry>> {
        Ok(self.read()?.entries.into_iter().find(|e| e.key == key))
    }

    /// The watermark, or `None` if no digest was ever committed.
    pub fn watermark(&self) -> Result<Option<Watermark>> {
        Ok(self
            .read()?
            .last_digest
            .map(|last_digest| Watermark { last_digest }))
    }

    // -----------------------------------------------------------------------
    // Writes
    // -----------------------------------------------------------------------

    /// Insert or replace an entry. New keys get `date_added` from the clock
    /// read while the store lock is held.
    pub fn upsert(&self, entry: Entry) -> Result<Entry> {
        self.upsert_with(entry, Utc::now)
    }

    /// Insert or replace an entry as of `now`.
    ///
    /// Content fields are last-write-wins. `date_added` is set once, on first
    /// insert, and existing tags are kept.
    pub fn upsert_at(&self, entry: Entry, now: DateTime<Utc>) -> Result<Entry> {
        self.upsert_with(entry, || now)
    }

    fn upsert_with(
        &self,
        mut entry: Entry,
        clock: impl FnOnce() -> DateTime<Utc>,
    ) -> Result<Entry> {
        self.check_writable()?;
        if entry.key.trim().is_empty() {
            return Err(DigestError::validation("entry key must not be empty"));
        }

        self.exclusive(|| {
            let mut file = file::read(&self.path)?;

            match file.position(&entry.key) {
                Some(i) => {
                    let existing = &file.entries[i];
                    entry.date_added = existing.date_added;
                    entry.tags.extend(existing.tags.iter().cloned());
                    debug!(key = %entry.key, "updating existing entry");
                    file.entries[i] = entry.clone();
                }
                None => {
                    entry.date_added = clock();
                    debug!(key = %entry.key, "inserting new entry");
                    file.entries.push(entry.clone());
                }
            }

            file::write(&self.path, &file)?;
            Ok(entry)
        })
    }

    /// Replace the tag set of one entry.
    pub fn set_tags(&self, key: &str, tags: BTreeSet<String>) -> Result<()> {
        self.check_writable()?;
        self.exclusive(|| {
            let mut file = file::read(&self.path)?;

            let i = file
                .position(key)
                .ok_or_else(|| DigestError::validation(format!("unknown entry key '{key}'")))?;
            file.entries[i].tags = tags;

            file::write(&self.path, &file)
        })
    }

    /// Add `tag` to every listed entry. Returns how many entries gained it;
    /// unknown keys are skipped with a warning.
    pub fn add_tag<'a>(
        &self,
        keys: impl IntoIterator<Item = &'a String>,
        tag: &str,
    ) -> Result<usize> {
        self.check_writable()?;
        self.exclusive(|| {
            let mut file = file::read(&self.path)?;

            let (added, missing) = tag_entries(&mut file, keys, tag);
            for key in &missing {
                warn!(%key, tag, "cannot tag unknown entry");
            }

            if added > 0 {
                file::write(&self.path, &file)?;
            }
            Ok(added)
        })
    }

    /// Tag every included entry as digested and advance the watermark to
    /// `cutoff`, in one atomic write.
    ///
    /// The watermark never moves backwards, and never past an untagged entry
    /// added before `cutoff` that the digest missed; that entry stays
    /// selectable for the next build.
    #[instrument(skip_all, fields(keys = keys.len(), %cutoff))]
    pub fn commit_digest(
        &self,
        keys: &BTreeSet<String>,
        cutoff: DateTime<Utc>,
    ) -> Result<CommitSummary> {
        self.check_writable()?;
        self.exclusive(|| {
            let mut file = file::read(&self.path)?;
            let previous = file.last_digest;

            let (newly_tagged, missing) = tag_entries(&mut file, keys, DIGEST_TAG);
            for key in &missing {
                warn!(%key, "committed key is not in the store");
            }

            let deferred: Vec<&Entry> = file
                .entries
                .iter()
                .filter(|e| {
                    !e.is_digested()
                        && e.date_added <= cutoff
                        && previous.is_none_or(|p| e.date_added > p)
                })
                .collect();

            let mut last_digest = cutoff;
            if let Some(earliest) = deferred.iter().map(|e| e.date_added).min() {
                warn!(
                    deferred = deferred.len(),
                    %earliest,
                    "entries stored before the cutoff were not in the digest, holding watermark"
                );
                last_digest = earliest - Duration::nanoseconds(1);
            }
            let deferred: Vec<String> = deferred.into_iter().map(|e| e.key.clone()).collect();

            if let Some(previous) = previous.filter(|p| *p > last_digest) {
                warn!(%previous, %cutoff, "keeping newer watermark");
                last_digest = previous;
            }
            file.last_digest = Some(last_digest);

            file::write(&self.path, &file)?;

            info!(
                newly_tagged,
                missing = missing.len(),
                deferred = deferred.len(),
                %last_digest,
                "digest committed"
            );

            Ok(CommitSummary {
                newly_tagged,
                missing,
                deferred,
                watermark: Watermark { last_digest },
            })
        })
    }
}

fn snapshot_of(file: file::StoreFile) -> StoreSnapshot {
    StoreSnapshot {
        entries: file.entries,
        watermark: file.last_digest.map(|last_digest| Watermark { last_digest }),
    }
}

/// Add `tag` to the listed entries in memory. Returns (newly tagged, unknown keys).
fn tag_entries<'a>(
    file: &mut file::StoreFile,
    keys: impl IntoIterator<Item = &'a String>,
    tag: &str,
) -> (usize, Vec<String>) {
    let mut added = 0;
    let mut missing = Vec::new();

    for key in keys {
        match file.position(key) {
            Some(i) => {
                if file.entries[i].tags.insert(tag.to_string()) {
                    added += 1;
                }
            }
            None => missing.push(key.clone()),
        }
    }

    (added, missing)
}
