//! The uniform send contract every channel implements.
//!
//! Adapters never see raw author payloads; the delivery core normalizes,
//! gates, and chunks first, then drives the narrow methods here.

use {anyhow::Result, async_trait::async_trait, serde::Serialize};

use {crate::channel::Channel, herald_common::types::NormalizedPayload};

/// What a single successful send produced.
///
/// `message_id` is the platform's id for the sent message; the remaining
/// optional fields carry the platform-specific addressing the caller may
/// need to thread replies. `meta` is a free-form bag so channels can dock
/// extra data without core schema churn.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryResult {
    pub channel: Channel,
    pub message_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chat_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub room_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to_jid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub poll_id: Option<String>,
    #[serde(skip_serializing_if = "serde_json::Map::is_empty")]
    pub meta: serde_json::Map<String, serde_json::Value>,
}

impl DeliveryResult {
    #[must_use]
    pub fn new(channel: Channel, message_id: impl Into<String>) -> Self {
        Self {
            channel,
            message_id: message_id.into(),
            chat_id: None,
            room_id: None,
            conversation_id: None,
            to_jid: None,
            poll_id: None,
            meta: serde_json::Map::new(),
        }
    }
}

/// Addressing for one send call. Borrowed from the delivery request; every
/// send of a batch sees the same context.
#[derive(Debug, Clone, Copy)]
pub struct SendContext<'a> {
    pub account_id: &'a str,
    pub to: &'a str,
    pub reply_to_id: Option<&'a str>,
    pub thread_id: Option<&'a str>,
    pub gif_playback: bool,
    /// Config-resolved media size cap in bytes, when the channel has one.
    pub media_max_bytes: Option<u64>,
}

/// How the generic chunking engine should treat an adapter's text.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkMode {
    /// Plain text; paragraph boundaries only.
    #[default]
    Text,
    /// Markdown; fenced code blocks are atomic.
    Markdown,
}

/// Channel-supplied splitter for text that exceeds the channel limit.
pub trait TextChunker: Send + Sync {
    fn chunk(&self, text: &str, limit: usize) -> Vec<String>;
}

/// Core channel adapter trait. Each messaging platform implements this.
pub trait ChannelAdapter: Send + Sync {
    /// Channel this adapter serves.
    fn id(&self) -> Channel;

    /// Human-readable platform name.
    fn name(&self) -> &str;

    /// The outbound send contract. `None` means the channel cannot send
    /// (inbound-only integration) and resolution fails fatally.
    fn outbound(&self) -> Option<&dyn OutboundSender>;
}

/// Send messages to a channel. Text and media sends are mandatory;
/// everything else is an opt-in capability.
#[async_trait]
pub trait OutboundSender: Send + Sync {
    async fn send_text(&self, ctx: &SendContext<'_>, text: &str) -> Result<DeliveryResult>;

    /// Send one media attachment. `caption` may be empty.
    async fn send_media(
        &self,
        ctx: &SendContext<'_>,
        caption: &str,
        url: &str,
    ) -> Result<DeliveryResult>;

    /// Full-fidelity path for payloads carrying channel-specific structured
    /// data. Adapters without one fall back to text/media sends.
    fn payload_sender(&self) -> Option<&dyn PayloadSender> {
        None
    }

    /// Style-aware path for channels that take styled-range text instead of
    /// markup (Signal). When present, the delivery core bypasses the
    /// generic chunker entirely.
    fn styled_sender(&self) -> Option<&dyn StyledSender> {
        None
    }

    /// Channel-specific splitter used by the chunking engine. `None` means
    /// the generic length splitter.
    fn chunker(&self) -> Option<&dyn TextChunker> {
        None
    }

    fn chunk_mode(&self) -> ChunkMode {
        ChunkMode::default()
    }

    /// Message length cap, in characters. `None` means unlimited: the whole
    /// text goes out as a single message.
    fn text_chunk_limit(&self) -> Option<usize> {
        None
    }
}

/// Full-fidelity structured send (polls, locations, channel-native cards).
#[async_trait]
pub trait PayloadSender: Send + Sync {
    async fn send_payload(
        &self,
        ctx: &SendContext<'_>,
        payload: &NormalizedPayload,
    ) -> Result<DeliveryResult>;
}

// ── Styled text (Signal) ────────────────────────────────────────────────────

/// Inline style applied to a character range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TextStyle {
    Bold,
    Italic,
    Strikethrough,
    Monospace,
}

/// A style applied to `length` characters starting at char offset `start`.
///
/// Offsets are Unicode scalar counts, not bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StyleRange {
    pub start: usize,
    pub length: usize,
    pub style: TextStyle,
}

/// Plain text plus the style ranges extracted from its markup.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StyledText {
    pub text: String,
    pub styles: Vec<StyleRange>,
}

/// Send styled-range text and media with styled captions.
#[async_trait]
pub trait StyledSender: Send + Sync {
    async fn send_styled(&self, ctx: &SendContext<'_>, text: &StyledText)
    -> Result<DeliveryResult>;

    async fn send_media_styled(
        &self,
        ctx: &SendContext<'_>,
        caption: &StyledText,
        url: &str,
    ) -> Result<DeliveryResult>;
}
