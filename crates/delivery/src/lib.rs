//! Outbound message delivery.
//!
//! This crate is the single path every outgoing message takes: payloads
//! are normalized, gated through human-in-the-loop approval, chunked to
//! channel limits, sent sequentially through the resolved adapter, and
//! mirrored into the session transcript.

pub mod approval;
pub mod chunk;
pub mod deliver;
pub mod error;
pub mod gate;
pub mod mirror;
pub mod normalize;
pub mod signal;

pub use {
    approval::{ApprovalApi, ApprovalManager, ApprovalRequest, HttpApprovalApi},
    deliver::{DeliverParams, Delivery},
    error::{Error, Result},
    gate::{ApprovalGate, GateRequest},
    mirror::{MirrorContext, SessionTranscript, TranscriptSink},
};
