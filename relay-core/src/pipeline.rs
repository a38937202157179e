use std::sync::Arc;

use chrono::Utc;
use secp256k1::{Secp256k1, VerifyOnly};

use relay_shared::middleware::{record_admission_outcome, record_fee_debited};
use relay_shared::RelayResult;

use crate::command_result::ConnectionContext;
use crate::event::{Event, EventValidationError};
use crate::kind_dispatch::KindHandlerFactory;
use crate::policy;
use crate::ratelimit::RateLimiter;
use crate::repository::UserRepo;
use crate::settings::{FeeSchedule, Settings, SettingsStore};
use crate::webhook::EventWebhook;

/// The five collaborating components of admission, wired into the one
/// entry point: `handle`. A `handle` call emits exactly one acknowledgement
/// for every outcome except a successful strategy resolution (stage 10),
/// which delegates emission to the resolved [`crate::kind_dispatch::KindHandler`].
pub struct AdmissionPipeline {
    secp: Arc<Secp256k1<VerifyOnly>>,
    settings: Arc<SettingsStore>,
    rate_limiter: Arc<dyn RateLimiter>,
    user_repo: Arc<dyn UserRepo>,
    webhook: Arc<dyn EventWebhook>,
    kind_factory: Arc<dyn KindHandlerFactory>,
}

impl AdmissionPipeline {
    pub fn new(
        settings: Arc<SettingsStore>,
        rate_limiter: Arc<dyn RateLimiter>,
        user_repo: Arc<dyn UserRepo>,
        webhook: Arc<dyn EventWebhook>,
        kind_factory: Arc<dyn KindHandlerFactory>,
    ) -> Self {
        Self {
            secp: Arc::new(Secp256k1::verification_only()),
            settings,
            rate_limiter,
            user_repo,
            webhook,
            kind_factory,
        }
    }

    /// Runs one event through the full admission pipeline and writes exactly
    /// one acknowledgement frame through `ctx`, except on successful
    /// strategy resolution (stage 10), where the resolved handler owns the
    /// acknowledgement. Returns `Err` only for the two classes of failure
    /// that must propagate instead of being acknowledged: an event-check
    /// webhook transport failure (stage 7) and a datastore/cache transport
    /// failure anywhere in the admission.
    pub async fn handle(&self, event: Event, ctx: &ConnectionContext) -> RelayResult<()> {
        // Each admission snapshots settings once at entry and threads that
        // snapshot through every stage below.
        let settings = self.settings.current();
        let now = Utc::now();
        let now_unix = now.timestamp();
        let now_ms = now.timestamp_millis();

        // Stage 1: structural/cryptographic validity. Schnorr verification is
        // CPU-bound, so it runs on the blocking-task pool rather than the
        // async worker driving this connection.
        if let Err(err) = self.validate_event(&event).await {
            let reason = match err {
                EventValidationError::IdMismatch => "invalid: event id does not match",
                EventValidationError::BadSignature => "invalid: event signature verification failed",
            };
            return self.reject(&event, ctx, reason).await;
        }

        // Stage 2: expiration.
        if event.is_expired(now_unix) {
            return self.reject(&event, ctx, "event is expired").await;
        }

        // Stage 3: expiration metadata attach (pipeline-local only; the
        // built-in kind handlers don't consume it, a real persistence
        // strategy would).
        let _expires_at = event.expiration();

        // Stage 4: rate limiting.
        if let Some(reason) = self.check_rate_limits(&event, ctx, &settings, now_ms).await? {
            return self.reject(&event, ctx, &reason).await;
        }

        // Stage 5: policy evaluation.
        if let Some(reason) = policy::evaluate(&event, &settings, now_unix) {
            return self.reject(&event, ctx, &reason).await;
        }

        // Stage 6: user admission & balance gating.
        if let Some(reason) = self.check_admission(&event, &settings).await? {
            return self.reject(&event, ctx, &reason).await;
        }

        // Stage 7: event-check webhook. Transport failure propagates via `?`.
        if let Some(response) = self.webhook.check_event(&event, &settings.webhooks).await? {
            if !response.success {
                let reason = response
                    .reason
                    .unwrap_or_else(|| "blocked: event rejected by webhook".to_string());
                return self.reject(&event, ctx, &reason).await;
            }
        }

        // Stage 8: strategy resolution.
        let Some(handler) = self.kind_factory.resolve(event.kind) else {
            return self.reject(&event, ctx, "error: event not supported").await;
        };

        // Stage 9: publication fee, debited before execution and never
        // rolled back on strategy failure.
        if settings.payments.enabled {
            if let Some(schedule) = first_fee_schedule(&settings.payments.fee_schedules.publication) {
                if schedule.enabled {
                    self.user_repo.decrement_user_balance(&event.pubkey, schedule.amount)?;
                    record_fee_debited("publication", schedule.amount);
                }
            }
        }

        // Stage 10: strategy execution. Any failure is caught; no `OK,true`
        // is emitted, and the already-debited publication fee stands.
        if let Err(err) = handler.execute(&event, ctx).await {
            tracing::warn!(event_id = %event.id, error = %err, "kind handler failed");
            return self.reject(&event, ctx, "error: unable to process event").await;
        }
        record_admission_outcome("accepted");

        // Stage 11: event-callback webhook, fire-and-forget.
        let webhook = self.webhook.clone();
        let webhooks_snapshot = settings.webhooks.clone();
        let callback_event = event.clone();
        tokio::spawn(async move {
            if let Err(err) = webhook.notify_event(&callback_event, &webhooks_snapshot).await {
                tracing::warn!(event_id = %callback_event.id, error = %err, "event callback webhook failed");
            }
        });

        Ok(())
    }

    async fn validate_event(&self, event: &Event) -> Result<(), EventValidationError> {
        let secp = self.secp.clone();
        let event = event.clone();
        tokio::task::spawn_blocking(move || event.validate(&secp))
            .await
            .expect("event validation task panicked")
    }

    async fn reject(&self, event: &Event, ctx: &ConnectionContext, reason: &str) -> RelayResult<()> {
        record_admission_outcome(reason_class(reason));
        ctx.emit_ok(&event.id, false, reason).await;
        Ok(())
    }

    /// Stage 4: hits every applicable rate-limit rule regardless of earlier
    /// outcomes, short-circuiting only for whitelisted pubkeys/IPs.
    async fn check_rate_limits(
        &self,
        event: &Event,
        ctx: &ConnectionContext,
        settings: &Settings,
        now_ms: i64,
    ) -> RelayResult<Option<String>> {
        let whitelists = &settings.limits.event.whitelists;
        let pubkey_whitelisted = whitelists
            .pubkeys
            .iter()
            .any(|prefix| event.pubkey.starts_with(prefix.as_str()));
        let ip_whitelisted = whitelists
            .ip_addresses
            .iter()
            .any(|ip| ip == &ctx.remote_addr.to_string());

        if pubkey_whitelisted || ip_whitelisted {
            return Ok(None);
        }

        let mut limited = false;
        for rule in &settings.limits.event.rate_limits {
            if !rule.applies_to(event.kind) {
                continue;
            }
            let key = format!("{}:events:{}{}", event.pubkey, rule.period, rule.key_suffix());
            let hit_limited = self
                .rate_limiter
                .hit(&key, now_ms, rule.period, rule.rate)
                .await?;
            limited = limited || hit_limited;
        }

        Ok(limited.then(|| "rate-limited: slow down".to_string()))
    }

    /// Stage 6: user admission and balance gating. Returns `Ok(None)` when
    /// admission is skipped (payments disabled, or no applicable admission
    /// fee schedule).
    async fn check_admission(&self, event: &Event, settings: &Settings) -> RelayResult<Option<String>> {
        if !settings.payments.enabled {
            return Ok(None);
        }

        let applicable_admission: Vec<&FeeSchedule> = settings
            .payments
            .fee_schedules
            .admission
            .iter()
            .filter(|schedule| {
                schedule.enabled
                    && !schedule
                        .whitelists
                        .pubkeys
                        .iter()
                        .any(|prefix| event.pubkey.starts_with(prefix.as_str()))
            })
            .collect();

        if applicable_admission.is_empty() {
            return Ok(None);
        }

        warn_if_extra_schedules("admission", &settings.payments.fee_schedules.admission);
        warn_if_extra_schedules("publication", &settings.payments.fee_schedules.publication);
        warn_if_extra_schedules("topUp", &settings.payments.fee_schedules.top_up);

        let top_up_schedule = first_fee_schedule(&settings.payments.fee_schedules.top_up);
        let fallback_topup_amount = top_up_schedule.map(|s| s.amount).unwrap_or(0);

        let user = self
            .user_repo
            .find_by_pubkey(&event.pubkey, &settings.webhooks, fallback_topup_amount)
            .await?;

        let Some(user) = user.filter(|u| u.is_admitted) else {
            return Ok(Some("blocked: pubkey not admitted".to_string()));
        };

        let mut balance = user.balance;

        if let Some(publication) = first_fee_schedule(&settings.payments.fee_schedules.publication) {
            if publication.enabled && balance < publication.amount {
                let topped_up = match top_up_schedule {
                    Some(top_up) if top_up.enabled => {
                        self.user_repo
                            .top_up_pubkey(&event.pubkey, &settings.webhooks, top_up.amount)
                            .await?
                    }
                    _ => false,
                };

                if topped_up {
                    balance += top_up_schedule.map(|s| s.amount).unwrap_or(0);
                } else {
                    return Ok(Some("blocked: insufficient balance".to_string()));
                }
            }
        }

        let min_balance = settings.limits.event.pubkey.min_balance;
        if min_balance > 0 && balance < min_balance {
            return Ok(Some("blocked: insufficient balance".to_string()));
        }

        Ok(None)
    }
}

fn first_fee_schedule(schedules: &[FeeSchedule]) -> Option<&FeeSchedule> {
    schedules.first()
}

fn warn_if_extra_schedules(name: &str, schedules: &[FeeSchedule]) {
    if schedules.len() > 1 {
        tracing::warn!(
            schedule = name,
            count = schedules.len(),
            "only the first fee schedule entry is consulted; extras are unused"
        );
    }
}

fn reason_class(reason: &str) -> &str {
    reason.split(':').next().unwrap_or(reason)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::IpAddr;

    use secp256k1::{rand, Keypair, Message};

    use crate::command_result::tests_support::RecordingChannel;
    use crate::kind_dispatch::DefaultKindHandlerFactory;
    use crate::ratelimit::InMemoryRateLimiter;
    use crate::repository::UserRepo;
    use crate::settings::{ContentLimit, CreatedAtLimit, FeeScheduleWhitelists, FeeSchedules, Payments, RateLimitRule};
    use crate::testing::{InMemoryEventWebhook, InMemoryUserRepo};
    use crate::webhook::EventCheckResponse;

    fn signed_event(kind: u16, content: &str, created_at: i64, tags: Vec<Vec<String>>) -> (Event, String) {
        let secp = Secp256k1::new();
        let keypair = Keypair::new(&secp, &mut rand::thread_rng());
        let (xonly, _parity) = keypair.x_only_public_key();
        let pubkey = hex::encode(xonly.serialize());

        let mut event = Event {
            id: String::new(),
            pubkey: pubkey.clone(),
            created_at,
            kind,
            tags,
            content: content.to_string(),
            signature: String::new(),
        };
        event.id = event_id_for(&event);
        let id_bytes: [u8; 32] = hex::decode(&event.id).unwrap().try_into().unwrap();
        let message = Message::from_digest_slice(&id_bytes).unwrap();
        let sig = secp.sign_schnorr(&message, &keypair);
        event.signature = hex::encode(sig.as_ref());

        (event, pubkey)
    }

    fn event_id_for(event: &Event) -> String {
        use sha2::{Digest, Sha256};
        let value = serde_json::json!([0, event.pubkey, event.created_at, event.kind, event.tags, event.content]);
        let bytes = serde_json::to_vec(&value).unwrap();
        hex::encode(Sha256::digest(bytes))
    }

    struct Harness {
        pipeline: AdmissionPipeline,
        channel: Arc<RecordingChannel>,
        user_repo: Arc<InMemoryUserRepo>,
        webhook: Arc<InMemoryEventWebhook>,
        settings_store: Arc<SettingsStore>,
    }

    fn harness(settings: Settings) -> Harness {
        let settings_store = Arc::new(SettingsStore::from_settings(settings));
        let user_repo = Arc::new(InMemoryUserRepo::new());
        let webhook = Arc::new(InMemoryEventWebhook::new());
        let rate_limiter = Arc::new(InMemoryRateLimiter::default());
        let kind_factory = Arc::new(DefaultKindHandlerFactory::default());

        let pipeline = AdmissionPipeline::new(
            settings_store.clone(),
            rate_limiter,
            user_repo.clone(),
            webhook.clone(),
            kind_factory,
        );

        Harness {
            pipeline,
            channel: Arc::new(RecordingChannel::default()),
            user_repo,
            webhook,
            settings_store,
        }
    }

    async fn last_frame(channel: &RecordingChannel) -> serde_json::Value {
        let frames = channel.frames.lock().await;
        serde_json::from_str(frames.last().expect("at least one frame emitted")).unwrap()
    }

    fn ctx(channel: Arc<RecordingChannel>) -> ConnectionContext {
        ConnectionContext::new("127.0.0.1".parse::<IpAddr>().unwrap(), channel)
    }

    #[tokio::test]
    async fn expired_event_is_rejected() {
        let h = harness(Settings::default());
        let (event, _pk) = signed_event(1, "hi", 1_700_000_000, vec![vec!["expiration".into(), "1699999999".into()]]);
        let id = event.id.clone();

        h.pipeline.handle(event, &ctx(h.channel.clone())).await.unwrap();

        assert_eq!(
            last_frame(&h.channel).await,
            serde_json::json!(["OK", id, false, "event is expired"])
        );
    }

    #[tokio::test]
    async fn future_skew_rejected_with_exact_reason() {
        let mut settings = Settings::default();
        settings.limits.event.created_at = CreatedAtLimit {
            max_positive_delta: Some(600),
            max_negative_delta: None,
        };
        let h = harness(settings);
        let (event, _pk) = signed_event(1, "hi", 1_700_000_900, vec![]);
        let id = event.id.clone();

        h.pipeline.handle(event, &ctx(h.channel.clone())).await.unwrap();

        let frame = last_frame(&h.channel).await;
        assert_eq!(
            frame,
            serde_json::json!([
                "OK",
                id,
                false,
                "rejected: created_at is more than 600 seconds in the future"
            ])
        );
    }

    #[tokio::test]
    async fn content_too_long_kind_scoped_accepts_other_kinds() {
        let mut settings = Settings::default();
        settings.limits.event.content = vec![ContentLimit {
            max_length: 200,
            kinds: Some(vec![crate::settings::KindMatcher::Exact(1)]),
        }];
        let h = harness(settings);

        let (rejected_event, _) = signed_event(1, &"x".repeat(300), 1_700_000_000, vec![]);
        let rejected_id = rejected_event.id.clone();
        h.pipeline.handle(rejected_event, &ctx(h.channel.clone())).await.unwrap();
        assert_eq!(
            last_frame(&h.channel).await,
            serde_json::json!(["OK", rejected_id, false, "rejected: content is longer than 200 bytes"])
        );

        let channel2 = Arc::new(RecordingChannel::default());
        let (accepted_event, _) = signed_event(2, &"x".repeat(300), 1_700_000_000, vec![]);
        let accepted_id = accepted_event.id.clone();
        h.pipeline.handle(accepted_event, &ctx(channel2.clone())).await.unwrap();
        assert_eq!(
            last_frame(&channel2).await,
            serde_json::json!(["OK", accepted_id, true, ""])
        );
    }

    #[tokio::test]
    async fn sixth_rate_limited_event_rejected_and_hour_counter_still_increments() {
        let mut settings = Settings::default();
        settings.limits.event.rate_limits = vec![
            RateLimitRule {
                period: 60_000,
                rate: 5,
                kinds: None,
            },
            RateLimitRule {
                period: 3_600_000,
                rate: 50,
                kinds: Some(vec![crate::settings::KindMatcher::Exact(1)]),
            },
        ];
        let h = harness(settings);
        let secp = Secp256k1::new();
        let keypair = Keypair::new(&secp, &mut rand::thread_rng());
        let (xonly, _) = keypair.x_only_public_key();
        let pubkey = hex::encode(xonly.serialize());

        let sign = |created_at: i64| {
            let mut event = Event {
                id: String::new(),
                pubkey: pubkey.clone(),
                created_at,
                kind: 1,
                tags: vec![],
                content: "x".into(),
                signature: String::new(),
            };
            event.id = event_id_for(&event);
            let id_bytes: [u8; 32] = hex::decode(&event.id).unwrap().try_into().unwrap();
            let message = Message::from_digest_slice(&id_bytes).unwrap();
            let sig = secp.sign_schnorr(&message, &keypair);
            event.signature = hex::encode(sig.as_ref());
            event
        };

        let mut last_reason = String::new();
        for i in 0..6 {
            let channel = Arc::new(RecordingChannel::default());
            let event = sign(1_700_000_000 + i);
            h.pipeline.handle(event, &ctx(channel.clone())).await.unwrap();
            let frame = last_frame(&channel).await;
            last_reason = frame[3].as_str().unwrap().to_string();
        }
        assert_eq!(last_reason, "rate-limited: slow down");
    }

    #[tokio::test]
    async fn paid_admission_blocks_unadmitted_pubkey() {
        let mut settings = Settings::default();
        settings.payments = Payments {
            enabled: true,
            fee_schedules: FeeSchedules {
                admission: vec![crate::settings::FeeSchedule {
                    enabled: true,
                    amount: 0,
                    whitelists: FeeScheduleWhitelists::default(),
                }],
                publication: vec![],
                top_up: vec![],
            },
        };
        let h = harness(settings);
        let (event, _pk) = signed_event(1, "hi", 1_700_000_000, vec![]);
        let id = event.id.clone();

        h.pipeline.handle(event, &ctx(h.channel.clone())).await.unwrap();

        assert_eq!(
            last_frame(&h.channel).await,
            serde_json::json!(["OK", id, false, "blocked: pubkey not admitted"])
        );
    }

    #[tokio::test]
    async fn publication_fee_with_successful_top_up_reaches_expected_balance() {
        let mut settings = Settings::default();
        settings.payments = Payments {
            enabled: true,
            fee_schedules: FeeSchedules {
                admission: vec![crate::settings::FeeSchedule {
                    enabled: true,
                    amount: 0,
                    whitelists: FeeScheduleWhitelists::default(),
                }],
                publication: vec![crate::settings::FeeSchedule {
                    enabled: true,
                    amount: 100,
                    whitelists: FeeScheduleWhitelists::default(),
                }],
                top_up: vec![crate::settings::FeeSchedule {
                    enabled: true,
                    amount: 500,
                    whitelists: FeeScheduleWhitelists::default(),
                }],
            },
        };
        let h = harness(settings);
        let (event, pubkey) = signed_event(1, "hi", 1_700_000_000, vec![]);
        h.user_repo.seed(&pubkey, true, 50);
        h.user_repo.set_next_top_up(Some(500));

        h.pipeline.handle(event, &ctx(h.channel.clone())).await.unwrap();

        let frame = last_frame(&h.channel).await;
        assert_eq!(frame[2], serde_json::json!(true));
        assert_eq!(h.user_repo.get_balance_by_pubkey(&pubkey).unwrap(), 450);
    }

    #[tokio::test]
    async fn event_check_webhook_veto_uses_server_reason() {
        let h = harness(Settings::default());
        h.webhook.set_next_check(Some(EventCheckResponse {
            success: false,
            reason: Some("blocked: denylisted content".to_string()),
        }));
        let (event, _pk) = signed_event(1, "hi", 1_700_000_000, vec![]);
        let id = event.id.clone();

        h.pipeline.handle(event, &ctx(h.channel.clone())).await.unwrap();

        assert_eq!(
            last_frame(&h.channel).await,
            serde_json::json!(["OK", id, false, "blocked: denylisted content"])
        );
    }

    #[tokio::test]
    async fn unsupported_kind_is_rejected() {
        let h = harness(Settings::default());
        let (event, _pk) = signed_event(60_000, "hi", 1_700_000_000, vec![]);
        let id = event.id.clone();

        h.pipeline.handle(event, &ctx(h.channel.clone())).await.unwrap();

        assert_eq!(
            last_frame(&h.channel).await,
            serde_json::json!(["OK", id, false, "error: event not supported"])
        );
    }

    #[tokio::test]
    async fn valid_event_is_accepted_with_empty_reason() {
        let h = harness(Settings::default());
        let (event, _pk) = signed_event(1, "hello", 1_700_000_000, vec![]);
        let id = event.id.clone();

        h.pipeline.handle(event, &ctx(h.channel.clone())).await.unwrap();

        assert_eq!(last_frame(&h.channel).await, serde_json::json!(["OK", id, true, ""]));
    }

    #[tokio::test]
    async fn tampered_content_fails_id_check() {
        let h = harness(Settings::default());
        let (mut event, _pk) = signed_event(1, "hello", 1_700_000_000, vec![]);
        event.content = "tampered".to_string();

        h.pipeline.handle(event, &ctx(h.channel.clone())).await.unwrap();

        let frame = last_frame(&h.channel).await;
        assert_eq!(frame[3], serde_json::json!("invalid: event id does not match"));
    }
}
