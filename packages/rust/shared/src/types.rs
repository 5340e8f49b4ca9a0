//! Core domain types for feeddigest.

use std::collections::BTreeSet;

use chrono::{DateTime, FixedOffset, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Current schema version for the store file and the digest manifest.
pub const CURRENT_SCHEMA_VERSION: u32 = 1;

/// Tag added to an entry once a digest containing it has been committed.
pub const DIGEST_TAG: &str = "digest";

// ---------------------------------------------------------------------------
// DigestId
// ---------------------------------------------------------------------------

/// A UUID v7 wrapper for digest identifiers (time-sortable).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DigestId(pub Uuid);

impl DigestId {
    /// Generate a new time-sortable digest identifier.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for DigestId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for DigestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for DigestId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

// ---------------------------------------------------------------------------
// Entry
// ---------------------------------------------------------------------------

/// One ingested article as persisted in the entry store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    /// Stable unique key (guid, else link, else title).
    pub key: String,
    pub title: String,
    pub url: String,
    /// Empty when the feed did not name an author.
    #[serde(default)]
    pub author: String,
    /// Title of the feed the entry came from; may be empty.
    #[serde(default)]
    pub blog_title: String,
    /// Raw article HTML.
    pub content: String,
    /// Source-reported publish time, normalized to RFC 3339 with offset.
    pub date_published: DateTime<FixedOffset>,
    /// First time the store saw this key. Never changes after that.
    pub date_added: DateTime<Utc>,
    #[serde(default)]
    pub tags: BTreeSet<String>,
}

impl Entry {
    /// Whether a committed digest already included this entry.
    pub fn is_digested(&self) -> bool {
        self.tags.contains(DIGEST_TAG)
    }
}

/// Boundary between already-digested and pending entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Watermark {
    pub last_digest: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// FeedItem
// ---------------------------------------------------------------------------

/// Publish time as handed over by the feed poller.
///
/// Structured times arrive as RFC 3339 strings, Unix timestamps as integers;
/// anything else is kept verbatim and parsed at the ingestion boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SourceTime {
    Structured(DateTime<FixedOffset>),
    Timestamp(i64),
    Text(String),
}

/// An item produced by the upstream feed poller.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeedItem {
    /// Item-level unique identifier, if the feed provides one.
    #[serde(default)]
    pub guid: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub link: Option<String>,
    /// Article HTML.
    #[serde(default)]
    pub summary: Option<String>,
    /// Full-content body, used when `summary` is empty.
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub published: Option<SourceTime>,
    /// Title of the feed as a whole.
    #[serde(default)]
    pub feed_title: Option<String>,
}

// ---------------------------------------------------------------------------
// Chapter
// ---------------------------------------------------------------------------

/// One entry rendered for inclusion in a digest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chapter {
    pub title: String,
    /// File/anchor identifier, unique within one digest.
    pub slug: String,
    /// Rendered HTML with assets localized and links absolutized.
    pub rendered_content: String,
    pub entry_key: String,
    /// Set when the article body could not be cleaned and a placeholder
    /// was rendered instead.
    #[serde(default)]
    pub degraded: bool,
}

// ---------------------------------------------------------------------------
// DigestManifest
// ---------------------------------------------------------------------------

/// One row of the digest's cross-reference index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub entry_key: String,
    pub title: String,
    pub slug: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub blog_title: String,
}

/// The `manifest.json` written next to a digest document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DigestManifest {
    /// Schema version for forward compatibility.
    pub schema_version: u32,
    pub id: DigestId,
    pub title: String,
    pub created_at: DateTime<Utc>,
    /// Upper `date_added` bound used for selection; becomes the watermark
    /// on commit.
    pub cutoff: DateTime<Utc>,
    /// Watermark in effect when the digest was built.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_watermark: Option<DateTime<Utc>>,
    /// Chapters in document order.
    pub entries: Vec<IndexEntry>,
    /// File name of the composite document inside the output directory.
    pub document: String,
    pub sha256: String,
    pub size_bytes: usize,
}

impl DigestManifest {
    /// Keys of every entry included in the digest.
    pub fn included_keys(&self) -> BTreeSet<String> {
        self.entries.iter().map(|e| e.entry_key.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_id_roundtrip() {
        let id = DigestId::new();
        let s = id.to_string();
        let parsed: DigestId = s.parse().expect("parse DigestId");
        assert_eq!(id, parsed);
    }

    #[test]
    fn entry_defaults_optional_fields() {
        let json = r#"{
            "key": "guid-1",
            "title": "Hello",
            "url": "https://blog.example.com/hello",
            "content": "<p>hi</p>",
            "date_published": "2024-03-01T10:00:00+02:00",
            "date_added": "2024-03-01T09:00:00Z"
        }"#;
        let entry: Entry = serde_json::from_str(json).expect("deserialize");
        assert_eq!(entry.author, "");
        assert!(entry.tags.is_empty());
        assert!(!entry.is_digested());
    }

    #[test]
    fn source_time_variants() {
        let items: Vec<FeedItem> = serde_json::from_str(
            r#"[
                {"published": "2024-03-01T10:00:00+02:00"},
                {"published": 1709280000},
                {"published": "Fri, 01 Mar 2024 10:00:00 GMT"}
            ]"#,
        )
        .expect("deserialize");

        assert!(matches!(items[0].published, Some(SourceTime::Structured(_))));
        assert_eq!(items[1].published, Some(SourceTime::Timestamp(1709280000)));
        assert!(matches!(items[2].published, Some(SourceTime::Text(_))));
    }

    #[test]
    fn manifest_included_keys() {
        let manifest = DigestManifest {
            schema_version: CURRENT_SCHEMA_VERSION,
            id: DigestId::new(),
            title: "Daily feed digest".into(),
            created_at: Utc::now(),
            cutoff: Utc::now(),
            previous_watermark: None,
            entries: vec![
                IndexEntry {
                    entry_key: "b".into(),
                    title: "B".into(),
                    slug: "b".into(),
                    url: "https://example.com/b".into(),
                    blog_title: String::new(),
                },
                IndexEntry {
                    entry_key: "a".into(),
                    title: "A".into(),
                    slug: "a".into(),
                    url: "https://example.com/a".into(),
                    blog_title: "Blog".into(),
                },
            ],
            document: "digest-2024-03-01.html".into(),
            sha256: String::new(),
            size_bytes: 0,
        };

        let json = serde_json::to_string_pretty(&manifest).expect("serialize");
        let parsed: DigestManifest = serde_json::from_str(&json).expect("deserialize");
        let keys: Vec<_> = parsed.included_keys().into_iter().collect();
        assert_eq!(keys, vec!["a".to_string(), "b".to_string()]);
    }
}
