//! Feed item ingestion.
//!
//! Turns items handed over by the feed poller into normalized [`Entry`]
//! records and upserts them into the [`EntryStore`].

use chrono::{DateTime, FixedOffset, NaiveDateTime, Utc};
use tracing::{debug, info, instrument, warn};

use feeddigest_shared::{DigestError, Entry, FeedItem, IngestError, Result, SourceTime};
use feeddigest_storage::EntryStore;

/// Naive layouts accepted for textual publish times; taken as UTC.
const NAIVE_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"];

/// A feed item that was rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestFailure {
    /// Position of the item in the batch.
    pub index: usize,
    pub error: IngestError,
}

/// Outcome of [`IngestionRecorder::record_batch`].
#[derive(Debug, Clone, Default)]
pub struct IngestReport {
    pub recorded: Vec<Entry>,
    pub failures: Vec<IngestFailure>,
}

/// Records feed items into an entry store.
pub struct IngestionRecorder<'a> {
    store: &'a EntryStore,
}

impl<'a> IngestionRecorder<'a> {
    pub fn new(store: &'a EntryStore) -> Self {
        Self { store }
    }

    /// Record one item as of the current time. The store stamps
    /// `date_added` while it holds its write lock.
    #[instrument(skip_all)]
    pub fn record(&self, item: &FeedItem) -> Result<Entry> {
        let entry = normalize(item, Utc::now())?;
        let stored = self.store.upsert(entry)?;
        debug!(key = %stored.key, title = %stored.title, "entry recorded");
        Ok(stored)
    }

    /// Record one item as of `now`.
    #[instrument(skip_all)]
    pub fn record_at(&self, item: &FeedItem, now: DateTime<Utc>) -> Result<Entry> {
        let entry = normalize(item, now)?;
        let stored = self.store.upsert_at(entry, now)?;
        debug!(key = %stored.key, title = %stored.title, "entry recorded");
        Ok(stored)
    }

    /// Record every item. Items with missing fields are reported and skipped;
    /// storage failures abort the batch.
    #[instrument(skip_all, fields(items = items.len()))]
    pub fn record_batch(&self, items: &[FeedItem]) -> Result<IngestReport> {
        let mut report = IngestReport::default();

        for (index, item) in items.iter().enumerate() {
            match self.record(item) {
                Ok(entry) => report.recorded.push(entry),
                Err(DigestError::Ingest(error)) => {
                    warn!(index, guid = ?item.guid, link = ?item.link, %error, "skipping feed item");
                    report.failures.push(IngestFailure { index, error });
                }
                Err(e) => return Err(e),
            }
        }

        info!(
            recorded = report.recorded.len(),
            failed = report.failures.len(),
            "ingestion batch complete"
        );
        Ok(report)
    }
}

/// Build an entry from a feed item. `date_added` is provisional; the store
/// decides the final value.
pub fn normalize(item: &FeedItem, now: DateTime<Utc>) -> std::result::Result<Entry, IngestError> {
    let key = derive_key(item)?;

    let title = required(&item.title, "title")?;
    let url = required(&item.link, "link")?;
    let content = non_blank(&item.summary)
        .or_else(|| non_blank(&item.content))
        .ok_or(IngestError::MissingField { field: "summary" })?;

    Ok(Entry {
        key,
        title: title.to_string(),
        url: url.to_string(),
        author: non_blank(&item.author).unwrap_or_default().to_string(),
        blog_title: non_blank(&item.feed_title).unwrap_or_default().to_string(),
        content: content.to_string(),
        date_published: normalize_published(item.published.as_ref(), now),
        date_added: now,
        tags: Default::default(),
    })
}

/// Stable key: the first non-blank of guid, link and title.
pub fn derive_key(item: &FeedItem) -> std::result::Result<String, IngestError> {
    [&item.guid, &item.link, &item.title]
        .into_iter()
        .find_map(non_blank)
        .map(str::to_string)
        .ok_or(IngestError::MissingKey)
}

/// Normalize a source publish time. Absent or unparseable times fall back to
/// `now`.
pub fn normalize_published(
    published: Option<&SourceTime>,
    now: DateTime<Utc>,
) -> DateTime<FixedOffset> {
    let parsed = match published {
        None => {
            debug!("no publish time, using ingestion time");
            None
        }
        Some(SourceTime::Structured(dt)) => Some(*dt),
        Some(SourceTime::Timestamp(secs)) => {
            DateTime::from_timestamp(*secs, 0).map(|dt| dt.fixed_offset())
        }
        Some(SourceTime::Text(raw)) => parse_text_time(raw),
    };

    parsed.unwrap_or_else(|| {
        if let Some(raw) = published {
            warn!(?raw, "unparseable publish time, using ingestion time");
        }
        now.fixed_offset()
    })
}

fn parse_text_time(raw: &str) -> Option<DateTime<FixedOffset>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt);
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(raw) {
        return Some(dt);
    }
    NAIVE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|naive| naive.and_utc().fixed_offset())
}

fn non_blank(field: &Option<String>) -> Option<&str> {
    field.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

fn required<'f>(
    field: &'f Option<String>,
    name: &'static str,
) -> std::result::Result<&'f str, IngestError> {
    non_blank(field).ok_or(IngestError::MissingField { field: name })
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use chrono::{Duration, TimeZone};

    use super::*;

    fn test_store() -> (EntryStore, PathBuf) {
        let dir = std::env::temp_dir().join(format!("feeddigest-ingest-{}", uuid::Uuid::now_v7()));
        let store = EntryStore::open(dir.join("entries.json"));
        (store, dir)
    }

    fn item(guid: &str, title: &str) -> FeedItem {
        FeedItem {
            guid: Some(guid.into()),
            title: Some(title.into()),
            link: Some(format!("https://blog.example.com/{guid}")),
            summary: Some(format!("<p>{title}</p>")),
            feed_title: Some("Example Blog".into()),
            ..FeedItem::default()
        }
    }

    #[test]
    fn key_fallback_chain() {
        let mut it = item("g1", "Title");
        assert_eq!(derive_key(&it).unwrap(), "g1");

        it.guid = Some("  ".into());
        assert_eq!(derive_key(&it).unwrap(), "https://blog.example.com/g1");

        it.link = None;
        assert_eq!(derive_key(&it).unwrap(), "Title");

        it.title = None;
        assert_eq!(derive_key(&it), Err(IngestError::MissingKey));
    }

    #[test]
    fn missing_required_fields_reported() {
        let now = Utc::now();

        let mut it = item("g1", "Title");
        it.link = None;
        assert_eq!(
            normalize(&it, now).unwrap_err(),
            IngestError::MissingField { field: "link" }
        );

        let mut it = item("g1", "Title");
        it.summary = Some("   ".into());
        assert_eq!(
            normalize(&it, now).unwrap_err(),
            IngestError::MissingField { field: "summary" }
        );
    }

    #[test]
    fn content_used_when_summary_empty() {
        let mut it = item("g1", "Title");
        it.summary = None;
        it.content = Some("<p>full body</p>".into());
        let entry = normalize(&it, Utc::now()).unwrap();
        assert_eq!(entry.content, "<p>full body</p>");
    }

    #[test]
    fn optional_fields_default_to_empty() {
        let mut it = item("g1", "Title");
        it.author = None;
        it.feed_title = None;
        let entry = normalize(&it, Utc::now()).unwrap();
        assert_eq!(entry.author, "");
        assert_eq!(entry.blog_title, "");
    }

    #[test]
    fn publish_time_formats() {
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        let expected = Utc.with_ymd_and_hms(2024, 3, 10, 8, 30, 0).unwrap();

        let inputs = [
            SourceTime::Text("2024-03-10T09:30:00+01:00".into()),
            SourceTime::Text("Sun, 10 Mar 2024 08:30:00 +0000".into()),
            SourceTime::Text("2024-03-10 08:30:00".into()),
            SourceTime::Timestamp(expected.timestamp()),
        ];
        for input in inputs {
            assert_eq!(normalize_published(Some(&input), now), expected, "{input:?}");
        }
    }

    #[test]
    fn offset_preserved() {
        let now = Utc::now();
        let published = normalize_published(
            Some(&SourceTime::Text("2024-03-10T09:30:00+01:00".into())),
            now,
        );
        assert_eq!(published.to_rfc3339(), "2024-03-10T09:30:00+01:00");
    }

    #[test]
    fn unparseable_or_missing_time_falls_back() {
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        assert_eq!(
            normalize_published(Some(&SourceTime::Text("last tuesday".into())), now),
            now
        );
        assert_eq!(normalize_published(None, now), now);
    }

    #[test]
    fn structured_time_deserializes() {
        let json = r#"{"title":"T","link":"https://x","summary":"s","published":"2024-03-10T09:30:00+01:00"}"#;
        let it: FeedItem = serde_json::from_str(json).unwrap();
        assert!(matches!(it.published, Some(SourceTime::Structured(_))));
    }

    #[test]
    fn reingest_preserves_date_added() {
        let (store, dir) = test_store();
        let recorder = IngestionRecorder::new(&store);
        let t1 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let t2 = t1 + Duration::hours(5);

        recorder.record_at(&item("g1", "First"), t1).unwrap();
        let updated = recorder.record_at(&item("g1", "Second"), t2).unwrap();

        assert_eq!(updated.date_added, t1);
        assert_eq!(updated.title, "Second");
        let stored = store.get("g1").unwrap().unwrap();
        assert_eq!(stored.date_added, t1);
        assert_eq!(stored.title, "Second");
        assert_eq!(stored.content, "<p>Second</p>");

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn batch_continues_past_bad_items() {
        let (store, dir) = test_store();
        let recorder = IngestionRecorder::new(&store);

        let mut bad = item("g2", "Broken");
        bad.summary = None;
        let items = vec![item("g1", "One"), bad, item("g3", "Three")];

        let report = recorder.record_batch(&items).unwrap();
        assert_eq!(report.recorded.len(), 2);
        assert_eq!(
            report.failures,
            vec![IngestFailure {
                index: 1,
                error: IngestError::MissingField { field: "summary" }
            }]
        );
        assert_eq!(store.scan_all().unwrap().len(), 2);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn batch_aborts_on_corrupt_store() {
        let (store, dir) = test_store();
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(store.path(), "{ not json").unwrap();

        let recorder = IngestionRecorder::new(&store);
        let err = recorder.record_batch(&[item("g1", "One")]).unwrap_err();
        assert!(matches!(err, DigestError::StoreCorrupt { .. }));

        let _ = std::fs::remove_dir_all(&dir);
    }
}
