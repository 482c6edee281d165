//! Transcript mirroring.
//!
//! After a successful delivery, what actually went out is appended as an
//! assistant turn to the session's durable transcript. Mirroring is
//! awaited before the call returns but never changes its outcome.

use std::time::{SystemTime, UNIX_EPOCH};

use {async_trait::async_trait, serde_json::json};

use {herald_common::types::NormalizedPayload, herald_sessions::TranscriptStore};

/// Where to mirror a delivery, supplied by the caller.
#[derive(Debug, Clone)]
pub struct MirrorContext {
    pub session_key: String,
    pub agent_id: Option<String>,
}

/// Session transcript append API.
#[async_trait]
pub trait TranscriptSink: Send + Sync {
    async fn append_assistant(
        &self,
        session_key: &str,
        agent_id: Option<&str>,
        text: &str,
    ) -> anyhow::Result<()>;
}

/// One textual summary of a delivered batch; `None` when there is nothing
/// worth mirroring. Media-only batches get a synthesized description.
#[must_use]
pub fn summarize(payloads: &[NormalizedPayload]) -> Option<String> {
    let text = payloads
        .iter()
        .map(|p| p.text.as_str())
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n");
    if !text.is_empty() {
        return Some(text);
    }

    let media_count: usize = payloads.iter().map(|p| p.media_urls.len()).sum();
    if media_count > 0 {
        return Some(format!("[sent {media_count} media attachment(s)]"));
    }
    if payloads.iter().any(|p| p.channel_data.is_some()) {
        return Some("[sent structured channel payload]".into());
    }
    None
}

/// Durable JSONL-backed sink.
pub struct SessionTranscript {
    store: TranscriptStore,
}

impl SessionTranscript {
    #[must_use]
    pub fn new(store: TranscriptStore) -> Self {
        Self { store }
    }
}

#[async_trait]
impl TranscriptSink for SessionTranscript {
    async fn append_assistant(
        &self,
        session_key: &str,
        agent_id: Option<&str>,
        text: &str,
    ) -> anyhow::Result<()> {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or_default();
        let mut message = json!({
            "role": "assistant",
            "content": text,
            "timestamp": timestamp,
        });
        if let (Some(obj), Some(agent)) = (message.as_object_mut(), agent_id) {
            obj.insert("agentId".into(), json!(agent));
        }
        self.store
            .append(session_key, &message)
            .await
            .map_err(anyhow::Error::from)
    }
}
