//! Payload normalization.
//!
//! Canonicalizes heterogeneous author payloads into the internal shape
//! before gating or sending. Same length, same order; derived per call
//! and discarded after use.

use herald_common::types::{NormalizedPayload, RawPayload};

/// Normalize a batch. Every output has defined `text` and `media_urls`.
#[must_use]
pub fn normalize_all(payloads: Vec<RawPayload>) -> Vec<NormalizedPayload> {
    payloads.into_iter().map(RawPayload::normalize).collect()
}
