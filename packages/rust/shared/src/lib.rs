//! Shared types, error model, and configuration for feeddigest.
//!
//! This crate is the foundation depended on by all other feeddigest crates.
//! It provides:
//! - [`DigestError`]: the unified error type
//! - Domain types ([`Entry`], [`Watermark`], [`FeedItem`], [`Chapter`], [`DigestManifest`])
//! - Configuration ([`AppConfig`], [`DigestConfig`], config loading)
//! - Slugging ([`slugify`], [`SlugAllocator`])

pub mod config;
pub mod error;
pub mod slug;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, ConvertConfig, DeliveryConfig, DigestConfig, RewriteConfig, config_dir,
    config_file_path, expand_home, init_config, load_config, load_config_from,
    validate_delivery,
};
pub use error::{DigestError, IngestError, Result};
pub use slug::{SlugAllocator, slugify};
pub use types::{
    CURRENT_SCHEMA_VERSION, Chapter, DIGEST_TAG, DigestId, DigestManifest, Entry, FeedItem,
    IndexEntry, SourceTime, Watermark,
};
