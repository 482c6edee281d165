//! Approval records and the decision-wait machinery.
//!
//! Each gated delivery call creates one local [`ApprovalRecord`] and races
//! an external human decision against a local timer. The record is
//! resolved exactly once: by an explicit decision, or by the default when
//! the timer fires. Records live for one delivery call and are never
//! shared; two concurrent calls to the same target create two independent
//! requests.

use std::{
    collections::HashMap,
    sync::Mutex,
    time::Duration,
};

use {
    anyhow::{Context as _, bail},
    async_trait::async_trait,
    secrecy::{ExposeSecret, Secret},
    serde::{Deserialize, Serialize},
    tokio::sync::oneshot,
    tracing::{debug, info},
};

use {
    herald_channels::Channel,
    herald_common::types::ApprovalDecision,
    herald_config::HitlConfig,
};

/// What the approval is about, shown to the human.
#[derive(Debug, Clone)]
pub struct ApprovalSummary {
    pub channel: Channel,
    pub to: String,
    pub account_id: String,
    pub thread_id: Option<String>,
}

/// A pending outbound approval. Transitions monotonically
/// `pending → decided | timed-out`; the decision is applied exactly once.
#[derive(Debug)]
pub struct ApprovalRecord {
    pub id: String,
    pub kind: &'static str,
    pub timeout: Duration,
    pub default_decision: ApprovalDecision,
    pub summary: ApprovalSummary,
}

impl ApprovalRecord {
    #[must_use]
    pub fn outbound(
        timeout: Duration,
        default_decision: ApprovalDecision,
        summary: ApprovalSummary,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            kind: "outbound",
            timeout,
            default_decision,
            summary,
        }
    }
}

struct PendingWait {
    tx: oneshot::Sender<ApprovalDecision>,
    external_request_id: Option<String>,
}

/// Holds the in-flight decision waits.
///
/// Passed explicitly into the delivery pipeline (constructor injection) so
/// tests get isolated managers; never module-level global state.
#[derive(Default)]
pub struct ApprovalManager {
    pending: Mutex<HashMap<String, PendingWait>>,
}

impl ApprovalManager {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, PendingWait>> {
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Register a wait for `record` and hand back the receiving half.
    pub fn begin(&self, record: &ApprovalRecord) -> oneshot::Receiver<ApprovalDecision> {
        let (tx, rx) = oneshot::channel();
        self.lock().insert(record.id.clone(), PendingWait {
            tx,
            external_request_id: None,
        });
        rx
    }

    /// Attach the external request id so a later callback can resolve the
    /// wait by the id the approval service knows.
    pub fn correlate(&self, id: &str, external_request_id: impl Into<String>) {
        if let Some(wait) = self.lock().get_mut(id) {
            wait.external_request_id = Some(external_request_id.into());
        }
    }

    /// Resolve a wait by local record id. Returns false when the record is
    /// unknown or already resolved.
    pub fn resolve(&self, id: &str, decision: ApprovalDecision) -> bool {
        match self.lock().remove(id) {
            Some(wait) => wait.tx.send(decision).is_ok(),
            None => false,
        }
    }

    /// Resolve a wait by the approval service's request id.
    pub fn resolve_external(&self, external_request_id: &str, decision: ApprovalDecision) -> bool {
        let id = {
            let guard = self.lock();
            guard
                .iter()
                .find(|(_, w)| w.external_request_id.as_deref() == Some(external_request_id))
                .map(|(id, _)| id.clone())
        };
        match id {
            Some(id) => self.resolve(&id, decision),
            None => false,
        }
    }

    /// Drop a wait without resolving it (timeout or failed request creation).
    pub fn abandon(&self, id: &str) {
        self.lock().remove(id);
    }

    /// Await the decision for `record`, applying the default when the
    /// timer wins the race.
    pub async fn wait(
        &self,
        record: &ApprovalRecord,
        rx: oneshot::Receiver<ApprovalDecision>,
    ) -> ApprovalDecision {
        match tokio::time::timeout(record.timeout, rx).await {
            Ok(Ok(decision)) => {
                debug!(id = record.id, decision = %decision, "approval decided");
                decision
            },
            Ok(Err(_)) => {
                // Sender dropped without a decision; fall back to default.
                record.default_decision
            },
            Err(_) => {
                self.abandon(&record.id);
                info!(
                    id = record.id,
                    default = %record.default_decision,
                    "approval wait timed out, applying default decision"
                );
                record.default_decision
            },
        }
    }
}

// ── Approval-request creation API ───────────────────────────────────────────

/// Outgoing approval request, as the approval service expects it.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalRequest {
    pub text: String,
    pub timeout_seconds: u64,
    pub options: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub callback_url: Option<String>,
}

impl ApprovalRequest {
    /// The three fixed response options every outbound request carries.
    #[must_use]
    pub fn outbound(text: String, timeout_seconds: u64, callback_url: Option<String>) -> Self {
        Self {
            text,
            timeout_seconds,
            options: ApprovalDecision::OPTIONS.iter().map(|s| s.to_string()).collect(),
            callback_url,
        }
    }
}

/// Result of creating an external approval request.
#[derive(Debug, Clone)]
pub struct CreatedRequest {
    pub request_id: Option<String>,
}

/// The external approval-request creation API.
#[async_trait]
pub trait ApprovalApi: Send + Sync {
    async fn create(&self, request: &ApprovalRequest) -> anyhow::Result<CreatedRequest>;
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateResponse {
    ok: bool,
    request_id: Option<String>,
    error: Option<String>,
}

/// HTTP implementation posting to the configured approval service.
pub struct HttpApprovalApi {
    client: reqwest::Client,
    api_url: String,
    api_key: Option<Secret<String>>,
    loop_id: Option<String>,
}

impl HttpApprovalApi {
    /// Build from config; `None` when no endpoint is configured.
    #[must_use]
    pub fn from_config(hitl: &HitlConfig) -> Option<Self> {
        let api_url = hitl.api_url.clone()?;
        Some(Self {
            client: reqwest::Client::new(),
            api_url,
            api_key: hitl.api_key.clone(),
            loop_id: hitl.loop_id.clone(),
        })
    }
}

#[async_trait]
impl ApprovalApi for HttpApprovalApi {
    async fn create(&self, request: &ApprovalRequest) -> anyhow::Result<CreatedRequest> {
        let mut req = self.client.post(&self.api_url).json(&serde_json::json!({
            "loopId": self.loop_id,
            "request": request,
        }));
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key.expose_secret());
        }
        let response = req.send().await.context("approval request send")?;
        let status = response.status();
        if !status.is_success() {
            bail!("approval service returned {status}");
        }
        let body: CreateResponse = response.json().await.context("approval response body")?;
        if !body.ok {
            bail!(
                "approval service rejected request: {}",
                body.error.unwrap_or_else(|| "unknown error".into())
            );
        }
        Ok(CreatedRequest {
            request_id: body.request_id,
        })
    }
}
