//! Config schema for the outbound delivery core.

use std::{collections::HashMap, path::PathBuf, time::Duration};

use {
    herald_common::types::ApprovalDecision,
    secrecy::{ExposeSecret, Secret},
    serde::{Deserialize, Serialize, Serializer},
};

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HeraldConfig {
    pub hitl: HitlConfig,
    pub channels: ChannelsConfig,
    pub sessions: SessionsConfig,
}

// ── HITL approval gating ────────────────────────────────────────────────────

/// When outbound sends require human sign-off.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum OutboundGateMode {
    /// Never gate.
    Off,
    /// Gate targets not covered by the allowlist.
    #[default]
    OnMiss,
    /// Gate every non-allowlisted send, even repeat targets.
    Always,
}

/// Human-in-the-loop approval settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HitlConfig {
    /// Master switch; when off, no outbound call is ever gated.
    pub enabled: bool,

    /// Outbound gating mode.
    pub outbound: OutboundGateMode,

    /// Configured allowlist patterns, merged with the persisted file.
    pub allowlist: Vec<String>,

    /// Path of the persisted allowlist file. Defaults to the platform data
    /// directory when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allowlist_path: Option<PathBuf>,

    /// How long to wait for a human decision, in seconds. Clamped to
    /// [60, 86400] at use.
    pub timeout_seconds: u64,

    /// Decision applied when the timeout fires with no explicit answer.
    pub default_decision: ApprovalDecision,

    /// Approval-request creation endpoint.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,

    /// API key for the approval service.
    #[serde(
        serialize_with = "serialize_secret",
        skip_serializing_if = "Option::is_none"
    )]
    pub api_key: Option<Secret<String>>,

    /// Loop id the approval service routes requests through.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub loop_id: Option<String>,

    /// URL the approval service calls back with decisions.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub callback_url: Option<String>,
}

impl Default for HitlConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            outbound: OutboundGateMode::default(),
            allowlist: Vec::new(),
            allowlist_path: None,
            timeout_seconds: DEFAULT_TIMEOUT_SECONDS,
            default_decision: ApprovalDecision::Deny,
            api_url: None,
            api_key: None,
            loop_id: None,
            callback_url: None,
        }
    }
}

const DEFAULT_TIMEOUT_SECONDS: u64 = 120;
const MIN_TIMEOUT_SECONDS: u64 = 60;
const MAX_TIMEOUT_SECONDS: u64 = 86_400;

impl HitlConfig {
    /// Whether outbound gating applies at all.
    #[must_use]
    pub fn gating_enabled(&self) -> bool {
        self.enabled && self.outbound != OutboundGateMode::Off
    }

    /// Decision-wait timeout, clamped to the supported window.
    #[must_use]
    pub fn clamped_timeout(&self) -> Duration {
        Duration::from_secs(
            self.timeout_seconds
                .clamp(MIN_TIMEOUT_SECONDS, MAX_TIMEOUT_SECONDS),
        )
    }

    /// Allowlist file location: configured path, else the platform data
    /// directory, else a dotdir relative to the working directory.
    #[must_use]
    pub fn resolve_allowlist_path(&self) -> PathBuf {
        if let Some(path) = &self.allowlist_path {
            return path.clone();
        }
        match directories::ProjectDirs::from("", "", "herald") {
            Some(dirs) => dirs.data_dir().join("outbound-allowlist.txt"),
            None => PathBuf::from(".herald/outbound-allowlist.txt"),
        }
    }
}

fn serialize_secret<S: Serializer>(
    secret: &Option<Secret<String>>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match secret {
        Some(s) => serializer.serialize_some(s.expose_secret()),
        None => serializer.serialize_none(),
    }
}

// ── Per-channel tuning ──────────────────────────────────────────────────────

/// How text is split into channel-sized messages.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChunkStrategy {
    /// Split at the character limit.
    #[default]
    Length,
    /// Split into paragraph/markdown blocks first, then at the limit.
    Newline,
}

/// How markdown tables are rendered for styled-text channels.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum MarkdownTableMode {
    /// Keep the table verbatim inside a monospace block.
    #[default]
    CodeBlock,
    /// Flatten rows into plain lines.
    Plain,
}

/// Tuning for one channel, with per-account overrides.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelTuning {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chunk_strategy: Option<ChunkStrategy>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub markdown_table_mode: Option<MarkdownTableMode>,
    /// Media size cap in bytes (Signal enforces bytes, not characters).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media_max_bytes: Option<u64>,
    /// Per-account overrides keyed by account id.
    pub accounts: HashMap<String, AccountTuning>,
}

/// Per-account overrides of the channel tuning.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AccountTuning {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chunk_strategy: Option<ChunkStrategy>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub markdown_table_mode: Option<MarkdownTableMode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media_max_bytes: Option<u64>,
}

/// Channel section: tuning keyed by channel id ("telegram", "signal", …).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelsConfig {
    pub tuning: HashMap<String, ChannelTuning>,
}

impl ChannelsConfig {
    fn lookup<T: Copy>(
        &self,
        channel: &str,
        account_id: &str,
        pick_account: impl Fn(&AccountTuning) -> Option<T>,
        pick_channel: impl Fn(&ChannelTuning) -> Option<T>,
    ) -> Option<T> {
        let tuning = self.tuning.get(channel)?;
        tuning
            .accounts
            .get(account_id)
            .and_then(pick_account)
            .or_else(|| pick_channel(tuning))
    }

    /// Chunk strategy for a channel/account, account override first.
    #[must_use]
    pub fn chunk_strategy(&self, channel: &str, account_id: &str) -> ChunkStrategy {
        self.lookup(
            channel,
            account_id,
            |a| a.chunk_strategy,
            |c| c.chunk_strategy,
        )
        .unwrap_or_default()
    }

    /// Markdown-table rendering mode for a channel/account.
    #[must_use]
    pub fn markdown_table_mode(&self, channel: &str, account_id: &str) -> MarkdownTableMode {
        self.lookup(
            channel,
            account_id,
            |a| a.markdown_table_mode,
            |c| c.markdown_table_mode,
        )
        .unwrap_or_default()
    }

    /// Media byte cap for a channel/account, if any.
    #[must_use]
    pub fn media_max_bytes(&self, channel: &str, account_id: &str) -> Option<u64> {
        self.lookup(
            channel,
            account_id,
            |a| a.media_max_bytes,
            |c| c.media_max_bytes,
        )
    }
}

// ── Sessions ────────────────────────────────────────────────────────────────

/// Transcript storage settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionsConfig {
    /// Base directory for JSONL transcripts. Defaults to the platform data
    /// directory when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dir: Option<PathBuf>,
}

impl SessionsConfig {
    #[must_use]
    pub fn resolve_dir(&self) -> PathBuf {
        if let Some(dir) = &self.dir {
            return dir.clone();
        }
        match directories::ProjectDirs::from("", "", "herald") {
            Some(dirs) => dirs.data_dir().join("sessions"),
            None => PathBuf::from(".herald/sessions"),
        }
    }
}
