//! Core digest pipeline for feeddigest.
//!
//! This crate ties ingestion, unread selection, chapter assembly and the
//! external converter/transport into end-to-end workflows (e.g.,
//! `run_digest`).

pub mod assembler;
pub mod delivery;
pub mod digest;
pub mod ingest;
pub mod pipeline;
pub mod select;
pub mod toc;
