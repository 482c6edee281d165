//! The delivery pipeline: normalize → gate → resolve → send loop → mirror.
//!
//! Sends are strictly sequential in input order; the only real suspension
//! besides the network sends themselves is the approval decision wait.
//! Once a message reaches a platform it is never retracted: an abort or
//! failure mid-batch leaves earlier sends in place.

use std::sync::Arc;

use {tokio_util::sync::CancellationToken, tracing::warn};

use {
    herald_channels::{
        AdapterRegistry, Channel, DeliveryResult, OutboundSender, SendContext,
    },
    herald_common::types::{NormalizedPayload, RawPayload},
    herald_config::{ChunkStrategy, HeraldConfig, MarkdownTableMode},
};

use crate::{
    approval::{ApprovalApi, ApprovalManager},
    chunk,
    error::{Error, Result},
    gate::{ApprovalGate, GateRequest},
    mirror::{MirrorContext, TranscriptSink, summarize},
    normalize::normalize_all,
    signal,
};

/// Side-effect observer invoked before each payload is sent.
/// Must never block or fail.
pub type PayloadObserver = Arc<dyn Fn(&NormalizedPayload) + Send + Sync>;

/// Observer for per-payload transport failures in best-effort mode.
pub type ErrorObserver = Arc<dyn Fn(&NormalizedPayload, &Error) + Send + Sync>;

/// One outbound delivery call.
pub struct DeliverParams {
    pub channel: Channel,
    pub to: String,
    pub account_id: Option<String>,
    pub payloads: Vec<RawPayload>,
    pub reply_to_id: Option<String>,
    pub thread_id: Option<String>,
    pub gif_playback: bool,
    /// Polled at call entry and before every send; firing it aborts with
    /// no attempt to retract earlier successful sends.
    pub abort: Option<CancellationToken>,
    /// When true, a transport failure on one payload is reported through
    /// `on_error` and the loop continues. Gate failures always abort.
    pub best_effort: bool,
    pub on_payload: Option<PayloadObserver>,
    pub on_error: Option<ErrorObserver>,
    /// Lets internal system notifications (e.g. approval-result messages)
    /// avoid recursive gating.
    pub bypass_hitl: bool,
    pub mirror: Option<MirrorContext>,
}

impl DeliverParams {
    #[must_use]
    pub fn new(channel: Channel, to: impl Into<String>, payloads: Vec<RawPayload>) -> Self {
        Self {
            channel,
            to: to.into(),
            account_id: None,
            payloads,
            reply_to_id: None,
            thread_id: None,
            gif_playback: false,
            abort: None,
            best_effort: false,
            on_payload: None,
            on_error: None,
            bypass_hitl: false,
            mirror: None,
        }
    }
}

/// The outbound delivery core. Every outgoing message passes through
/// [`Delivery::deliver`].
pub struct Delivery {
    registry: Arc<AdapterRegistry>,
    config: Arc<HeraldConfig>,
    gate: ApprovalGate,
    transcript: Option<Arc<dyn TranscriptSink>>,
}

impl Delivery {
    #[must_use]
    pub fn new(
        registry: Arc<AdapterRegistry>,
        config: Arc<HeraldConfig>,
        manager: Arc<ApprovalManager>,
        api: Option<Arc<dyn ApprovalApi>>,
        transcript: Option<Arc<dyn TranscriptSink>>,
    ) -> Self {
        let gate = ApprovalGate::new(config.hitl.clone(), manager, api);
        Self {
            registry,
            config,
            gate,
            transcript,
        }
    }

    /// Deliver a batch of payloads to one target, in order.
    ///
    /// Returns one [`DeliveryResult`] per successful send, in send order.
    /// With `best_effort` unset, the first failure aborts the call;
    /// already-sent messages stay sent but their results are lost with the
    /// returned error.
    pub async fn deliver(&self, params: DeliverParams) -> Result<Vec<DeliveryResult>> {
        let payloads = normalize_all(params.payloads.clone());
        let abort = params.abort.clone().unwrap_or_default();
        ensure_live(&abort)?;

        let account_id = params.account_id.as_deref().unwrap_or("default");

        if params.bypass_hitl {
            tracing::debug!(channel = %params.channel, "HITL gate bypassed by caller");
        } else {
            self.gate
                .authorize(&GateRequest {
                    channel: params.channel,
                    to: &params.to,
                    account_id,
                    thread_id: params.thread_id.as_deref(),
                    payloads: &payloads,
                })
                .await?;
        }

        let outbound = self.registry.resolve_outbound(params.channel)?;
        let channel_id = params.channel.as_str();
        let sender = BatchSender {
            channel: params.channel,
            outbound,
            ctx: SendContext {
                account_id,
                to: &params.to,
                reply_to_id: params.reply_to_id.as_deref(),
                thread_id: params.thread_id.as_deref(),
                gif_playback: params.gif_playback,
                media_max_bytes: self.config.channels.media_max_bytes(channel_id, account_id),
            },
            strategy: self.config.channels.chunk_strategy(channel_id, account_id),
            table_mode: self
                .config
                .channels
                .markdown_table_mode(channel_id, account_id),
            abort: &abort,
        };

        let mut results = Vec::new();
        for payload in &payloads {
            ensure_live(&abort)?;
            if let Some(observe) = &params.on_payload {
                observe(payload);
            }
            match sender.send_payload(payload, &mut results).await {
                Ok(()) => {},
                Err(Error::Aborted) => return Err(Error::Aborted),
                Err(e) if params.best_effort && e.is_transport() => {
                    warn!(channel = %params.channel, error = %e, "best-effort send failed, continuing");
                    if let Some(observe) = &params.on_error {
                        observe(payload, &e);
                    }
                },
                Err(e) => return Err(e),
            }
        }

        self.mirror(&params.mirror, &payloads, &results).await;
        Ok(results)
    }

    async fn mirror(
        &self,
        context: &Option<MirrorContext>,
        payloads: &[NormalizedPayload],
        results: &[DeliveryResult],
    ) {
        if results.is_empty() {
            return;
        }
        let (Some(context), Some(sink)) = (context, &self.transcript) else {
            return;
        };
        let Some(summary) = summarize(payloads) else {
            return;
        };
        if let Err(e) = sink
            .append_assistant(&context.session_key, context.agent_id.as_deref(), &summary)
            .await
        {
            // Mirroring never changes the call's outcome.
            warn!(session = context.session_key, error = %e, "transcript mirror failed");
        }
    }
}

fn ensure_live(abort: &CancellationToken) -> Result<()> {
    if abort.is_cancelled() {
        Err(Error::Aborted)
    } else {
        Ok(())
    }
}

/// Per-call send state: one adapter, one target, one strategy.
struct BatchSender<'a> {
    channel: Channel,
    outbound: &'a dyn OutboundSender,
    ctx: SendContext<'a>,
    strategy: ChunkStrategy,
    table_mode: MarkdownTableMode,
    abort: &'a CancellationToken,
}

impl BatchSender<'_> {
    fn transport(&self, source: anyhow::Error) -> Error {
        Error::transport(self.channel, source)
    }

    /// Send one normalized payload: full-fidelity when the adapter and
    /// payload support it, else chunked text, else one send per media URL
    /// with the caption on the first.
    async fn send_payload(
        &self,
        payload: &NormalizedPayload,
        results: &mut Vec<DeliveryResult>,
    ) -> Result<()> {
        if payload.channel_data.is_some() {
            if let Some(full) = self.outbound.payload_sender() {
                ensure_live(self.abort)?;
                let result = full
                    .send_payload(&self.ctx, payload)
                    .await
                    .map_err(|e| self.transport(e))?;
                results.push(result);
                return Ok(());
            }
        }

        if !payload.has_media() {
            return self.send_text_chunks(&payload.text, results).await;
        }

        for (index, url) in payload.media_urls.iter().enumerate() {
            ensure_live(self.abort)?;
            // Only the first media item carries the payload's caption.
            let caption = if index == 0 { payload.text.as_str() } else { "" };
            let result = match self.outbound.styled_sender() {
                Some(styled) => {
                    let caption = signal::chunk_styled(
                        caption,
                        self.outbound.text_chunk_limit(),
                        self.table_mode,
                    )
                    .into_iter()
                    .next()
                    .unwrap_or_default();
                    styled.send_media_styled(&self.ctx, &caption, url).await
                },
                None => self.outbound.send_media(&self.ctx, caption, url).await,
            }
            .map_err(|e| self.transport(e))?;
            results.push(result);
        }
        Ok(())
    }

    async fn send_text_chunks(&self, text: &str, results: &mut Vec<DeliveryResult>) -> Result<()> {
        match self.outbound.styled_sender() {
            Some(styled) => {
                let chunks =
                    signal::chunk_styled(text, self.outbound.text_chunk_limit(), self.table_mode);
                for chunk in &chunks {
                    ensure_live(self.abort)?;
                    let result = styled
                        .send_styled(&self.ctx, chunk)
                        .await
                        .map_err(|e| self.transport(e))?;
                    results.push(result);
                }
            },
            None => {
                for chunk in chunk::chunk_text(text, self.strategy, self.outbound) {
                    ensure_live(self.abort)?;
                    let result = self
                        .outbound
                        .send_text(&self.ctx, &chunk)
                        .await
                        .map_err(|e| self.transport(e))?;
                    results.push(result);
                }
            },
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::sync::{
        Mutex,
        atomic::{AtomicUsize, Ordering},
    };

    use async_trait::async_trait;

    use {
        herald_channels::{
            ChannelAdapter, PayloadSender, StyleRange, StyledSender, StyledText, TextStyle,
        },
        herald_common::types::ApprovalDecision,
        herald_config::HitlConfig,
        herald_sessions::TranscriptStore,
    };

    use {
        super::*,
        crate::{
            approval::{ApprovalRequest, CreatedRequest},
            mirror::SessionTranscript,
        },
    };

    #[derive(Debug, Clone, PartialEq)]
    enum Sent {
        Text(String),
        Media { caption: String, url: String },
        Styled(StyledText),
        StyledMedia { caption: StyledText, url: String },
        Payload(serde_json::Value),
    }

    struct TestOutbound {
        channel: Channel,
        limit: Option<usize>,
        styled: bool,
        full_fidelity: bool,
        fail_marker: Option<String>,
        sent: Arc<Mutex<Vec<Sent>>>,
        counter: AtomicUsize,
    }

    impl TestOutbound {
        fn new(channel: Channel, sent: &Arc<Mutex<Vec<Sent>>>) -> Self {
            Self {
                channel,
                limit: None,
                styled: false,
                full_fidelity: false,
                fail_marker: None,
                sent: sent.clone(),
                counter: AtomicUsize::new(0),
            }
        }

        fn record(&self, entry: Sent) -> anyhow::Result<DeliveryResult> {
            let n = self.counter.fetch_add(1, Ordering::SeqCst);
            self.sent.lock().unwrap().push(entry);
            Ok(DeliveryResult::new(self.channel, format!("m{n}")))
        }

        fn check(&self, text: &str) -> anyhow::Result<()> {
            if let Some(marker) = &self.fail_marker {
                if text.contains(marker.as_str()) {
                    anyhow::bail!("injected transport failure");
                }
            }
            Ok(())
        }
    }

    #[async_trait]
    impl OutboundSender for TestOutbound {
        async fn send_text(
            &self,
            _ctx: &SendContext<'_>,
            text: &str,
        ) -> anyhow::Result<DeliveryResult> {
            self.check(text)?;
            self.record(Sent::Text(text.to_string()))
        }

        async fn send_media(
            &self,
            _ctx: &SendContext<'_>,
            caption: &str,
            url: &str,
        ) -> anyhow::Result<DeliveryResult> {
            self.check(caption)?;
            self.record(Sent::Media {
                caption: caption.to_string(),
                url: url.to_string(),
            })
        }

        fn payload_sender(&self) -> Option<&dyn PayloadSender> {
            if self.full_fidelity { Some(self) } else { None }
        }

        fn styled_sender(&self) -> Option<&dyn StyledSender> {
            if self.styled { Some(self) } else { None }
        }

        fn text_chunk_limit(&self) -> Option<usize> {
            self.limit
        }
    }

    #[async_trait]
    impl PayloadSender for TestOutbound {
        async fn send_payload(
            &self,
            _ctx: &SendContext<'_>,
            payload: &NormalizedPayload,
        ) -> anyhow::Result<DeliveryResult> {
            self.record(Sent::Payload(
                payload.channel_data.clone().unwrap_or(serde_json::Value::Null),
            ))
        }
    }

    #[async_trait]
    impl StyledSender for TestOutbound {
        async fn send_styled(
            &self,
            _ctx: &SendContext<'_>,
            text: &StyledText,
        ) -> anyhow::Result<DeliveryResult> {
            self.check(&text.text)?;
            self.record(Sent::Styled(text.clone()))
        }

        async fn send_media_styled(
            &self,
            _ctx: &SendContext<'_>,
            caption: &StyledText,
            url: &str,
        ) -> anyhow::Result<DeliveryResult> {
            self.record(Sent::StyledMedia {
                caption: caption.clone(),
                url: url.to_string(),
            })
        }
    }

    struct TestAdapter {
        outbound: TestOutbound,
    }

    impl ChannelAdapter for TestAdapter {
        fn id(&self) -> Channel {
            self.outbound.channel
        }

        fn name(&self) -> &str {
            "test"
        }

        fn outbound(&self) -> Option<&dyn OutboundSender> {
            Some(&self.outbound)
        }
    }

    struct FakeApi {
        auto: Option<(Arc<ApprovalManager>, ApprovalDecision)>,
        fail: bool,
        created: AtomicUsize,
    }

    impl FakeApi {
        fn deciding(manager: &Arc<ApprovalManager>, decision: ApprovalDecision) -> Arc<Self> {
            Arc::new(Self {
                auto: Some((Arc::clone(manager), decision)),
                fail: false,
                created: AtomicUsize::new(0),
            })
        }

        fn silent() -> Arc<Self> {
            Arc::new(Self {
                auto: None,
                fail: false,
                created: AtomicUsize::new(0),
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                auto: None,
                fail: true,
                created: AtomicUsize::new(0),
            })
        }

        fn created(&self) -> usize {
            self.created.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ApprovalApi for FakeApi {
        async fn create(&self, _request: &ApprovalRequest) -> anyhow::Result<CreatedRequest> {
            self.created.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                anyhow::bail!("approval service unreachable");
            }
            if let Some((manager, decision)) = &self.auto {
                let manager = Arc::clone(manager);
                let decision = *decision;
                tokio::spawn(async move {
                    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
                    manager.resolve_external("ext-1", decision);
                });
            }
            Ok(CreatedRequest {
                request_id: Some("ext-1".into()),
            })
        }
    }

    fn build(
        outbound: TestOutbound,
        hitl: HitlConfig,
        manager: Arc<ApprovalManager>,
        api: Option<Arc<dyn ApprovalApi>>,
        transcript: Option<Arc<dyn TranscriptSink>>,
    ) -> Delivery {
        let mut registry = AdapterRegistry::new();
        registry.register(Box::new(TestAdapter { outbound }));
        let config = Arc::new(HeraldConfig {
            hitl,
            ..HeraldConfig::default()
        });
        Delivery::new(Arc::new(registry), config, manager, api, transcript)
    }

    fn ungated(outbound: TestOutbound) -> Delivery {
        build(
            outbound,
            HitlConfig::default(),
            Arc::new(ApprovalManager::new()),
            None,
            None,
        )
    }

    fn gated_hitl(dir: &std::path::Path) -> HitlConfig {
        HitlConfig {
            enabled: true,
            allowlist_path: Some(dir.join("allow.txt")),
            ..HitlConfig::default()
        }
    }

    fn texts(payloads: &[&str]) -> Vec<RawPayload> {
        payloads.iter().map(|t| RawPayload::text(*t)).collect()
    }

    fn sent_log() -> Arc<Mutex<Vec<Sent>>> {
        Arc::new(Mutex::new(Vec::new()))
    }

    // ── Send loop ───────────────────────────────────────────────────────────

    #[tokio::test]
    async fn sends_payloads_in_order() {
        let sent = sent_log();
        let delivery = ungated(TestOutbound::new(Channel::Telegram, &sent));

        let results = delivery
            .deliver(DeliverParams::new(
                Channel::Telegram,
                "12345",
                texts(&["one", "two", "three"]),
            ))
            .await
            .unwrap();

        assert_eq!(
            results.iter().map(|r| r.message_id.as_str()).collect::<Vec<_>>(),
            vec!["m0", "m1", "m2"]
        );
        assert_eq!(*sent.lock().unwrap(), vec![
            Sent::Text("one".into()),
            Sent::Text("two".into()),
            Sent::Text("three".into()),
        ]);
    }

    #[tokio::test]
    async fn long_text_splits_at_channel_limit() {
        let sent = sent_log();
        let mut outbound = TestOutbound::new(Channel::Whatsapp, &sent);
        outbound.limit = Some(4096);
        let delivery = ungated(outbound);

        let source = "a".repeat(5000);
        let results = delivery
            .deliver(DeliverParams::new(
                Channel::Whatsapp,
                "+15551234567",
                vec![RawPayload::text(&source)],
            ))
            .await
            .unwrap();

        assert_eq!(results.len(), 2);
        let reassembled: String = sent
            .lock()
            .unwrap()
            .iter()
            .map(|s| match s {
                Sent::Text(t) => t.clone(),
                other => panic!("unexpected send: {other:?}"),
            })
            .collect();
        assert_eq!(reassembled, source);
    }

    #[tokio::test]
    async fn empty_payload_reaches_adapter() {
        let sent = sent_log();
        let delivery = ungated(TestOutbound::new(Channel::Sms, &sent));

        let results = delivery
            .deliver(DeliverParams::new(Channel::Sms, "+1", vec![
                RawPayload::default(),
            ]))
            .await
            .unwrap();

        assert_eq!(results.len(), 1);
        assert_eq!(*sent.lock().unwrap(), vec![Sent::Text(String::new())]);
    }

    #[tokio::test]
    async fn caption_rides_only_the_first_media_item() {
        let sent = sent_log();
        let delivery = ungated(TestOutbound::new(Channel::Discord, &sent));

        let payload = RawPayload {
            text: Some("caption".into()),
            media_urls: Some(vec![
                "https://a/1.png".into(),
                "https://a/2.png".into(),
                "https://a/3.png".into(),
            ]),
            ..RawPayload::default()
        };
        let results = delivery
            .deliver(DeliverParams::new(Channel::Discord, "chan-1", vec![payload]))
            .await
            .unwrap();

        assert_eq!(results.len(), 3);
        let captions: Vec<String> = sent
            .lock()
            .unwrap()
            .iter()
            .map(|s| match s {
                Sent::Media { caption, .. } => caption.clone(),
                other => panic!("unexpected send: {other:?}"),
            })
            .collect();
        assert_eq!(captions, vec!["caption", "", ""]);
    }

    #[tokio::test]
    async fn channel_data_takes_the_full_fidelity_path() {
        let sent = sent_log();
        let mut outbound = TestOutbound::new(Channel::Telegram, &sent);
        outbound.full_fidelity = true;
        let delivery = ungated(outbound);

        let payload = RawPayload {
            text: Some("ignored by the adapter".into()),
            media_url: Some("https://a/1.png".into()),
            channel_data: Some(serde_json::json!({"poll": {"question": "?"}})),
            ..RawPayload::default()
        };
        let results = delivery
            .deliver(DeliverParams::new(Channel::Telegram, "12345", vec![payload]))
            .await
            .unwrap();

        assert_eq!(results.len(), 1);
        assert_eq!(*sent.lock().unwrap(), vec![Sent::Payload(serde_json::json!({
            "poll": {"question": "?"}
        }))]);
    }

    #[tokio::test]
    async fn channel_data_falls_back_when_adapter_has_no_payload_sender() {
        let sent = sent_log();
        let delivery = ungated(TestOutbound::new(Channel::Sms, &sent));

        let payload = RawPayload {
            text: Some("plain rendering".into()),
            channel_data: Some(serde_json::json!({"poll": {}})),
            ..RawPayload::default()
        };
        delivery
            .deliver(DeliverParams::new(Channel::Sms, "+1", vec![payload]))
            .await
            .unwrap();

        assert_eq!(*sent.lock().unwrap(), vec![Sent::Text(
            "plain rendering".into()
        )]);
    }

    #[tokio::test]
    async fn unregistered_channel_is_a_configuration_error() {
        let sent = sent_log();
        let delivery = ungated(TestOutbound::new(Channel::Whatsapp, &sent));

        let err = delivery
            .deliver(DeliverParams::new(Channel::Matrix, "!room", texts(&["hi"])))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Configuration(_)));
        assert!(sent.lock().unwrap().is_empty());
    }

    // ── Styled-text channels ────────────────────────────────────────────────

    #[tokio::test]
    async fn styled_channel_gets_ranges_instead_of_markup() {
        let sent = sent_log();
        let mut outbound = TestOutbound::new(Channel::Signal, &sent);
        outbound.styled = true;
        let delivery = ungated(outbound);

        delivery
            .deliver(DeliverParams::new(Channel::Signal, "+1", texts(&[
                "**bold** plain",
            ])))
            .await
            .unwrap();

        assert_eq!(*sent.lock().unwrap(), vec![Sent::Styled(StyledText {
            text: "bold plain".into(),
            styles: vec![StyleRange {
                start: 0,
                length: 4,
                style: TextStyle::Bold,
            }],
        })]);
    }

    #[tokio::test]
    async fn styled_media_caption_is_converted_not_duplicated() {
        let sent = sent_log();
        let mut outbound = TestOutbound::new(Channel::Signal, &sent);
        outbound.styled = true;
        let delivery = ungated(outbound);

        let payload = RawPayload {
            text: Some("**bold** plain".into()),
            media_url: Some("https://a/pic.png".into()),
            ..RawPayload::default()
        };
        let results = delivery
            .deliver(DeliverParams::new(Channel::Signal, "+1", vec![payload]))
            .await
            .unwrap();

        assert_eq!(results.len(), 1);
        assert_eq!(*sent.lock().unwrap(), vec![Sent::StyledMedia {
            caption: StyledText {
                text: "bold plain".into(),
                styles: vec![StyleRange {
                    start: 0,
                    length: 4,
                    style: TextStyle::Bold,
                }],
            },
            url: "https://a/pic.png".into(),
        }]);
    }

    // ── Abort ───────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn pre_cancelled_abort_sends_nothing() {
        let sent = sent_log();
        let dir = tempfile::tempdir().unwrap();
        let manager = Arc::new(ApprovalManager::new());
        let api = FakeApi::silent();
        let delivery = build(
            TestOutbound::new(Channel::Telegram, &sent),
            gated_hitl(dir.path()),
            manager,
            Some(api.clone() as Arc<dyn ApprovalApi>),
            None,
        );

        let token = CancellationToken::new();
        token.cancel();
        let mut params = DeliverParams::new(Channel::Telegram, "12345", texts(&["hi"]));
        params.abort = Some(token);

        let err = delivery.deliver(params).await.unwrap_err();
        assert!(matches!(err, Error::Aborted));
        assert!(sent.lock().unwrap().is_empty());
        // Aborted before the gate could even ask.
        assert_eq!(api.created(), 0);
    }

    #[tokio::test]
    async fn abort_between_payloads_stops_the_batch() {
        let sent = sent_log();
        let delivery = ungated(TestOutbound::new(Channel::Telegram, &sent));

        let token = CancellationToken::new();
        let trip = token.clone();
        let mut params = DeliverParams::new(Channel::Telegram, "12345", texts(&["one", "two"]));
        params.abort = Some(token);
        params.on_payload = Some(Arc::new(move |payload: &NormalizedPayload| {
            if payload.text == "two" {
                trip.cancel();
            }
        }));

        let err = delivery.deliver(params).await.unwrap_err();
        assert!(matches!(err, Error::Aborted));
        assert_eq!(*sent.lock().unwrap(), vec![Sent::Text("one".into())]);
    }

    // ── Best effort ─────────────────────────────────────────────────────────

    #[tokio::test]
    async fn best_effort_skips_failing_payloads() {
        let sent = sent_log();
        let mut outbound = TestOutbound::new(Channel::Telegram, &sent);
        outbound.fail_marker = Some("BOOM".into());
        let delivery = ungated(outbound);

        let failures = Arc::new(Mutex::new(Vec::new()));
        let sink = failures.clone();
        let mut params =
            DeliverParams::new(Channel::Telegram, "12345", texts(&["one", "BOOM", "three"]));
        params.best_effort = true;
        params.on_error = Some(Arc::new(move |payload: &NormalizedPayload, err: &Error| {
            assert!(err.is_transport());
            sink.lock().unwrap().push(payload.text.clone());
        }));

        let results = delivery.deliver(params).await.unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(*sent.lock().unwrap(), vec![
            Sent::Text("one".into()),
            Sent::Text("three".into()),
        ]);
        assert_eq!(*failures.lock().unwrap(), vec!["BOOM".to_string()]);
    }

    #[tokio::test]
    async fn transport_failure_stops_the_batch_by_default() {
        let sent = sent_log();
        let mut outbound = TestOutbound::new(Channel::Telegram, &sent);
        outbound.fail_marker = Some("BOOM".into());
        let delivery = ungated(outbound);

        let err = delivery
            .deliver(DeliverParams::new(
                Channel::Telegram,
                "12345",
                texts(&["one", "BOOM", "three"]),
            ))
            .await
            .unwrap_err();

        assert!(err.is_transport());
        assert_eq!(*sent.lock().unwrap(), vec![Sent::Text("one".into())]);
    }

    // ── Gating ──────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn denied_batch_sends_nothing() {
        let sent = sent_log();
        let dir = tempfile::tempdir().unwrap();
        let manager = Arc::new(ApprovalManager::new());
        let api = FakeApi::deciding(&manager, ApprovalDecision::Deny);
        let delivery = build(
            TestOutbound::new(Channel::Whatsapp, &sent),
            gated_hitl(dir.path()),
            manager,
            Some(api.clone() as Arc<dyn ApprovalApi>),
            None,
        );

        let err = delivery
            .deliver(DeliverParams::new(
                Channel::Whatsapp,
                "+15551234567",
                texts(&["one", "two"]),
            ))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::ApprovalDenied));
        assert!(sent.lock().unwrap().is_empty());
        assert_eq!(api.created(), 1);
    }

    #[tokio::test]
    async fn allow_once_does_not_persist() {
        let sent = sent_log();
        let dir = tempfile::tempdir().unwrap();
        let manager = Arc::new(ApprovalManager::new());
        let api = FakeApi::deciding(&manager, ApprovalDecision::AllowOnce);
        let delivery = build(
            TestOutbound::new(Channel::Whatsapp, &sent),
            gated_hitl(dir.path()),
            manager,
            Some(api.clone() as Arc<dyn ApprovalApi>),
            None,
        );

        for _ in 0..2 {
            delivery
                .deliver(DeliverParams::new(
                    Channel::Whatsapp,
                    "+15551234567",
                    texts(&["hi"]),
                ))
                .await
                .unwrap();
        }

        // The same target needs a fresh approval every time.
        assert_eq!(api.created(), 2);
        assert!(!dir.path().join("allow.txt").exists());
    }

    #[tokio::test]
    async fn allow_always_persists_and_skips_future_approvals() {
        let sent = sent_log();
        let dir = tempfile::tempdir().unwrap();
        let manager = Arc::new(ApprovalManager::new());
        let api = FakeApi::deciding(&manager, ApprovalDecision::AllowAlways);
        let delivery = build(
            TestOutbound::new(Channel::Whatsapp, &sent),
            gated_hitl(dir.path()),
            manager,
            Some(api.clone() as Arc<dyn ApprovalApi>),
            None,
        );

        for _ in 0..2 {
            delivery
                .deliver(DeliverParams::new(
                    Channel::Whatsapp,
                    "+15551234567",
                    texts(&["hi"]),
                ))
                .await
                .unwrap();
        }

        assert_eq!(api.created(), 1);
        let persisted = std::fs::read_to_string(dir.path().join("allow.txt")).unwrap();
        assert_eq!(
            persisted.trim(),
            "outbound:whatsapp:to=+15551234567:account=default:**"
        );
        assert_eq!(sent.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn configured_allowlist_skips_approval() {
        let sent = sent_log();
        let dir = tempfile::tempdir().unwrap();
        let mut hitl = gated_hitl(dir.path());
        hitl.allowlist = vec!["outbound:telegram:to=12345:account=default:**".into()];
        let delivery = build(
            TestOutbound::new(Channel::Telegram, &sent),
            hitl,
            Arc::new(ApprovalManager::new()),
            None,
            None,
        );

        delivery
            .deliver(DeliverParams::new(Channel::Telegram, "12345", texts(&["hi"])))
            .await
            .unwrap();

        assert_eq!(sent.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn missing_approval_api_fails_closed() {
        let sent = sent_log();
        let dir = tempfile::tempdir().unwrap();
        let delivery = build(
            TestOutbound::new(Channel::Telegram, &sent),
            gated_hitl(dir.path()),
            Arc::new(ApprovalManager::new()),
            None,
            None,
        );

        let err = delivery
            .deliver(DeliverParams::new(Channel::Telegram, "12345", texts(&["hi"])))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::ApprovalUnavailable { .. }));
        assert!(sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn approval_creation_failure_fails_closed() {
        let sent = sent_log();
        let dir = tempfile::tempdir().unwrap();
        let manager = Arc::new(ApprovalManager::new());
        let delivery = build(
            TestOutbound::new(Channel::Telegram, &sent),
            gated_hitl(dir.path()),
            manager,
            Some(FakeApi::failing() as Arc<dyn ApprovalApi>),
            None,
        );

        let err = delivery
            .deliver(DeliverParams::new(Channel::Telegram, "12345", texts(&["hi"])))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::ApprovalUnavailable { .. }));
        assert!(sent.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn unanswered_approval_applies_default_decision() {
        let sent = sent_log();
        let dir = tempfile::tempdir().unwrap();
        let manager = Arc::new(ApprovalManager::new());
        let delivery = build(
            TestOutbound::new(Channel::Telegram, &sent),
            gated_hitl(dir.path()),
            manager,
            Some(FakeApi::silent() as Arc<dyn ApprovalApi>),
            None,
        );

        let err = delivery
            .deliver(DeliverParams::new(Channel::Telegram, "12345", texts(&["hi"])))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::ApprovalDenied));
        assert!(sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn bypass_hitl_skips_the_gate() {
        let sent = sent_log();
        let dir = tempfile::tempdir().unwrap();
        let api = FakeApi::failing();
        let delivery = build(
            TestOutbound::new(Channel::Telegram, &sent),
            gated_hitl(dir.path()),
            Arc::new(ApprovalManager::new()),
            Some(api.clone() as Arc<dyn ApprovalApi>),
            None,
        );

        let mut params = DeliverParams::new(Channel::Telegram, "12345", texts(&["hi"]));
        params.bypass_hitl = true;
        delivery.deliver(params).await.unwrap();

        assert_eq!(sent.lock().unwrap().len(), 1);
        assert_eq!(api.created(), 0);
    }

    // ── Mirroring ───────────────────────────────────────────────────────────

    #[tokio::test]
    async fn successful_delivery_is_mirrored() {
        let sent = sent_log();
        let dir = tempfile::tempdir().unwrap();
        let transcript: Arc<dyn TranscriptSink> = Arc::new(SessionTranscript::new(
            TranscriptStore::new(dir.path().to_path_buf()),
        ));
        let delivery = build(
            TestOutbound::new(Channel::Telegram, &sent),
            HitlConfig::default(),
            Arc::new(ApprovalManager::new()),
            None,
            Some(transcript),
        );

        let mut params = DeliverParams::new(Channel::Telegram, "12345", texts(&["one", "two"]));
        params.mirror = Some(MirrorContext {
            session_key: "agent:main:telegram".into(),
            agent_id: Some("main".into()),
        });
        delivery.deliver(params).await.unwrap();

        let store = TranscriptStore::new(dir.path().to_path_buf());
        let messages = store.read("agent:main:telegram").await.unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0]["role"], "assistant");
        assert_eq!(messages[0]["content"], "one\n\ntwo");
        assert_eq!(messages[0]["agentId"], "main");
    }

    #[tokio::test]
    async fn media_only_delivery_mirrors_a_synthesized_line() {
        let sent = sent_log();
        let dir = tempfile::tempdir().unwrap();
        let transcript: Arc<dyn TranscriptSink> = Arc::new(SessionTranscript::new(
            TranscriptStore::new(dir.path().to_path_buf()),
        ));
        let delivery = build(
            TestOutbound::new(Channel::Discord, &sent),
            HitlConfig::default(),
            Arc::new(ApprovalManager::new()),
            None,
            Some(transcript),
        );

        let payload = RawPayload {
            media_url: Some("https://a/1.png".into()),
            ..RawPayload::default()
        };
        let mut params = DeliverParams::new(Channel::Discord, "chan-1", vec![payload]);
        params.mirror = Some(MirrorContext {
            session_key: "agent:main:discord".into(),
            agent_id: None,
        });
        delivery.deliver(params).await.unwrap();

        let store = TranscriptStore::new(dir.path().to_path_buf());
        let messages = store.read("agent:main:discord").await.unwrap();
        assert_eq!(messages[0]["content"], "[sent 1 media attachment(s)]");
    }

    #[tokio::test]
    async fn observer_sees_every_payload_before_send() {
        let sent = sent_log();
        let delivery = ungated(TestOutbound::new(Channel::Telegram, &sent));

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let mut params = DeliverParams::new(Channel::Telegram, "12345", texts(&["one", "two"]));
        params.on_payload = Some(Arc::new(move |payload: &NormalizedPayload| {
            sink.lock().unwrap().push(payload.text.clone());
        }));
        delivery.deliver(params).await.unwrap();

        assert_eq!(*seen.lock().unwrap(), vec!["one", "two"]);
    }
}
