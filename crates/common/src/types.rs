//! Payload shapes shared between the delivery core and channel adapters.

use serde::{Deserialize, Serialize};

/// An author-supplied outbound payload, exactly as callers provide it.
///
/// All fields are optional; [`RawPayload::normalize`] canonicalizes the
/// shape before any downstream component looks at it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RawPayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Single media attachment. Ignored when `media_urls` is present.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media_urls: Option<Vec<String>>,
    /// Channel-specific structured payload (polls, location pins, etc.),
    /// passed through verbatim to adapters that support full-fidelity sends.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel_data: Option<serde_json::Value>,
}

impl RawPayload {
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Self::default()
        }
    }

    /// Canonicalize into the shape the delivery pipeline works with.
    ///
    /// `media_urls` wins over `media_url`; a lone `media_url` becomes a
    /// one-element list. No deduplication is performed.
    #[must_use]
    pub fn normalize(self) -> NormalizedPayload {
        let media_urls = match (self.media_urls, self.media_url) {
            (Some(urls), _) => urls,
            (None, Some(url)) => vec![url],
            (None, None) => Vec::new(),
        };
        NormalizedPayload {
            text: self.text.unwrap_or_default(),
            media_urls,
            channel_data: self.channel_data,
        }
    }
}

/// The canonical payload shape used internally.
///
/// `text` and `media_urls` are always present (possibly empty); both empty
/// at once is legal and downstream components must tolerate it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedPayload {
    pub text: String,
    pub media_urls: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel_data: Option<serde_json::Value>,
}

impl NormalizedPayload {
    #[must_use]
    pub fn has_media(&self) -> bool {
        !self.media_urls.is_empty()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.text.is_empty() && self.media_urls.is_empty() && self.channel_data.is_none()
    }
}

/// A human decision on a gated outbound batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ApprovalDecision {
    /// Proceed with this batch only; nothing is persisted.
    AllowOnce,
    /// Proceed and allowlist the target for future identical sends.
    AllowAlways,
    /// Abort the batch with zero sends.
    Deny,
}

impl ApprovalDecision {
    /// Wire labels, in the order presented to the approver.
    pub const OPTIONS: [&'static str; 3] = ["allow-once", "allow-always", "deny"];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AllowOnce => "allow-once",
            Self::AllowAlways => "allow-always",
            Self::Deny => "deny",
        }
    }

    #[must_use]
    pub fn allows(self) -> bool {
        !matches!(self, Self::Deny)
    }
}

impl std::str::FromStr for ApprovalDecision {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "allow-once" => Ok(Self::AllowOnce),
            "allow-always" => Ok(Self::AllowAlways),
            "deny" => Ok(Self::Deny),
            other => Err(crate::Error::message(format!(
                "unknown approval decision: {other}"
            ))),
        }
    }
}

impl std::fmt::Display for ApprovalDecision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
