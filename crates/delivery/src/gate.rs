//! The HITL approval gate.
//!
//! Per call: `disabled (bypass)` → `checking-allowlist` → `allowed` or
//! `requires-approval → pending → decided | timed-out`. The gate wraps the
//! whole batch of one delivery call, never individual payloads.
//!
//! Allowlist patterns are matched case-insensitively; `*` matches any
//! character sequence including `:` segment separators, so the trailing
//! `**` written by allow-always is the conventional form of `*`. An empty
//! allowlist allows nothing.

use std::{
    fs::{OpenOptions, create_dir_all, read_to_string},
    io::Write as _,
    path::PathBuf,
    sync::Arc,
};

use {
    anyhow::Context as _,
    fd_lock::RwLock,
    tracing::{debug, info, warn},
};

use {
    herald_channels::Channel,
    herald_common::types::{ApprovalDecision, NormalizedPayload},
    herald_config::HitlConfig,
};

use crate::{
    approval::{ApprovalApi, ApprovalManager, ApprovalRecord, ApprovalRequest, ApprovalSummary},
    error::{Error, Result},
};

const PREVIEW_TEXT_CHARS: usize = 240;
const PREVIEW_TOTAL_CHARS: usize = 1900;

/// The target of one gated delivery call.
pub struct GateRequest<'a> {
    pub channel: Channel,
    pub to: &'a str,
    pub account_id: &'a str,
    pub thread_id: Option<&'a str>,
    pub payloads: &'a [NormalizedPayload],
}

/// Allow-key for a target. Patterns are matched against this.
#[must_use]
pub fn allow_key(channel: Channel, to: &str, account_id: &str, thread_id: Option<&str>) -> String {
    format!(
        "outbound:{channel}:to={to}:account={account_id}:thread={}",
        thread_id.unwrap_or("-")
    )
}

/// Pattern persisted by an allow-always decision: scoped to the
/// channel/to/account tuple, trailing wildcard covers any thread.
#[must_use]
pub fn allow_always_pattern(channel: Channel, to: &str, account_id: &str) -> String {
    format!("outbound:{channel}:to={to}:account={account_id}:**")
}

/// Check a key against allowlist patterns. Empty list allows nothing.
#[must_use]
pub fn is_allowed(key: &str, patterns: &[String]) -> bool {
    let key = key.to_lowercase();
    patterns.iter().any(|pattern| {
        let pat = pattern.trim().to_lowercase();
        if pat.is_empty() {
            false
        } else if pat.contains('*') {
            glob_match(&pat, &key)
        } else {
            pat == key
        }
    })
}

/// Glob matching with `*` as a wildcard for any character sequence.
///
/// The first segment is anchored at the start and the last at the end;
/// interior segments are scanned left to right in between. Since `*`
/// matches anything, the leftmost interior match never rules out a text
/// a different placement would accept.
fn glob_match(pattern: &str, text: &str) -> bool {
    let parts: Vec<&str> = pattern.split('*').collect();
    if parts.len() == 1 {
        return pattern == text;
    }

    let Some(rest) = text.strip_prefix(parts[0]) else {
        return false;
    };
    let last = parts[parts.len() - 1];
    let rest = if last.is_empty() {
        rest
    } else {
        match rest.strip_suffix(last) {
            Some(rest) => rest,
            None => return false,
        }
    };

    let mut pos = 0;
    for part in &parts[1..parts.len() - 1] {
        if part.is_empty() {
            continue;
        }
        match rest[pos..].find(part) {
            Some(idx) => pos += idx + part.len(),
            None => return false,
        }
    }
    true
}

// ── Persisted allowlist ─────────────────────────────────────────────────────

/// Append-only allowlist pattern file, one pattern per line.
///
/// Read fresh at the start of every gated call; re-adds are idempotent, so
/// racing allow-always writes from unrelated calls need no coordination
/// beyond the file lock.
pub struct AllowlistFile {
    path: PathBuf,
}

impl AllowlistFile {
    #[must_use]
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Load persisted patterns. A missing file is an empty list.
    pub async fn load(&self) -> anyhow::Result<Vec<String>> {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || {
            if !path.exists() {
                return Ok(Vec::new());
            }
            let raw = read_to_string(&path)
                .with_context(|| format!("read allowlist {}", path.display()))?;
            Ok(raw
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty() && !l.starts_with('#'))
                .map(String::from)
                .collect())
        })
        .await
        .context("allowlist load task")?
    }

    /// Append `pattern` unless an identical line already exists.
    /// Returns true when a new line was written.
    pub async fn append_if_missing(&self, pattern: &str) -> anyhow::Result<bool> {
        let path = self.path.clone();
        let pattern = pattern.to_string();
        tokio::task::spawn_blocking(move || {
            if let Some(parent) = path.parent() {
                create_dir_all(parent)?;
            }
            let file = OpenOptions::new()
                .create(true)
                .read(true)
                .append(true)
                .open(&path)?;
            let mut lock = RwLock::new(file);
            let mut guard = lock.write().context("allowlist write lock")?;

            // Re-check under the lock so concurrent writers stay idempotent.
            let existing = read_to_string(&path)?;
            if existing.lines().any(|l| l.trim() == pattern) {
                return Ok(false);
            }
            writeln!(*guard, "{pattern}")?;
            Ok(true)
        })
        .await
        .context("allowlist append task")?
    }
}

// ── The gate ────────────────────────────────────────────────────────────────

/// Decides whether a batch may go out, waiting on a human when required.
pub struct ApprovalGate {
    hitl: HitlConfig,
    allowlist: AllowlistFile,
    manager: Arc<ApprovalManager>,
    api: Option<Arc<dyn ApprovalApi>>,
}

impl ApprovalGate {
    #[must_use]
    pub fn new(
        hitl: HitlConfig,
        manager: Arc<ApprovalManager>,
        api: Option<Arc<dyn ApprovalApi>>,
    ) -> Self {
        let allowlist = AllowlistFile::new(hitl.resolve_allowlist_path());
        Self {
            hitl,
            allowlist,
            manager,
            api,
        }
    }

    /// Authorize one batch. `Ok(())` means proceed; any error aborts the
    /// call before a single send.
    pub async fn authorize(&self, request: &GateRequest<'_>) -> Result<()> {
        if !self.hitl.gating_enabled() {
            return Ok(());
        }

        let key = allow_key(
            request.channel,
            request.to,
            request.account_id,
            request.thread_id,
        );

        let mut patterns = self.hitl.allowlist.clone();
        match self.allowlist.load().await {
            Ok(persisted) => patterns.extend(persisted),
            // Unreadable file is a miss, not an authorization.
            Err(e) => warn!(error = %e, "failed to load persisted allowlist"),
        }

        if is_allowed(&key, &patterns) {
            debug!(key, "outbound target allowlisted, skipping approval");
            return Ok(());
        }

        let decision = self.request_decision(request).await?;
        info!(key, decision = %decision, "outbound approval decision");

        match decision {
            ApprovalDecision::Deny => Err(Error::ApprovalDenied),
            ApprovalDecision::AllowOnce => Ok(()),
            ApprovalDecision::AllowAlways => {
                let pattern =
                    allow_always_pattern(request.channel, request.to, request.account_id);
                if let Err(e) = self.allowlist.append_if_missing(&pattern).await {
                    warn!(error = %e, pattern, "failed to persist allowlist pattern");
                }
                Ok(())
            },
        }
    }

    async fn request_decision(&self, request: &GateRequest<'_>) -> Result<ApprovalDecision> {
        let api = self
            .api
            .as_ref()
            .ok_or_else(|| Error::approval_unavailable("no approval api configured"))?;

        let record = ApprovalRecord::outbound(
            self.hitl.clamped_timeout(),
            self.hitl.default_decision,
            ApprovalSummary {
                channel: request.channel,
                to: request.to.to_string(),
                account_id: request.account_id.to_string(),
                thread_id: request.thread_id.map(String::from),
            },
        );
        let rx = self.manager.begin(&record);

        let api_request = ApprovalRequest::outbound(
            build_preview(request),
            record.timeout.as_secs(),
            self.hitl.callback_url.clone(),
        );
        match api.create(&api_request).await {
            Ok(created) => {
                if let Some(external_id) = created.request_id {
                    self.manager.correlate(&record.id, external_id);
                }
            },
            Err(e) => {
                self.manager.abandon(&record.id);
                return Err(Error::approval_unavailable(e));
            },
        }

        Ok(self.manager.wait(&record, rx).await)
    }
}

/// Human-readable preview: target line, first 240 chars of the first
/// non-empty payload text, media count; capped at 1900 chars total.
fn build_preview(request: &GateRequest<'_>) -> String {
    let mut out = format!(
        "Outbound message to {} on {} (account {})",
        request.to, request.channel, request.account_id
    );

    if let Some(text) = request
        .payloads
        .iter()
        .map(|p| p.text.as_str())
        .find(|t| !t.is_empty())
    {
        out.push('\n');
        out.extend(text.chars().take(PREVIEW_TEXT_CHARS));
        if text.chars().count() > PREVIEW_TEXT_CHARS {
            out.push('…');
        }
    }

    let media_count: usize = request.payloads.iter().map(|p| p.media_urls.len()).sum();
    if media_count > 0 {
        out.push_str(&format!("\n[{media_count} media attachment(s)]"));
    }

    if out.chars().count() > PREVIEW_TOTAL_CHARS {
        out = out.chars().take(PREVIEW_TOTAL_CHARS).collect();
    }
    out
}
