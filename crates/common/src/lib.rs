//! Shared payload types and error utilities used across all herald crates.

pub mod error;
pub mod types;

pub use {
    error::{Error, FromMessage, Result},
    types::{ApprovalDecision, NormalizedPayload, RawPayload},
};
