//! Durable session transcripts.
//!
//! Transcripts are stored as JSONL files (one message per line) under a
//! base directory, with file locking so concurrent appends from unrelated
//! delivery calls never interleave partial lines.

pub mod error;
pub mod store;

pub use store::TranscriptStore;
