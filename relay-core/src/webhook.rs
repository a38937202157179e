use async_trait::async_trait;
use serde::Deserialize;

use relay_shared::clients::WebhookClient;
use relay_shared::RelayResult;

use crate::event::Event;
use crate::settings::Webhooks;

#[derive(Debug, Deserialize)]
pub struct EventCheckResponse {
    pub success: bool,
    #[serde(default)]
    pub reason: Option<String>,
}

/// The event-check and event-callback webhook call sites, abstracted
/// behind a trait so the admission pipeline can be exercised in tests
/// without a live HTTP endpoint.
#[async_trait]
pub trait EventWebhook: Send + Sync {
    /// Inline, blocking check (pipeline stage 7). Returns `None` when the
    /// check is not configured for this settings snapshot. A transport
    /// failure must propagate as `Err` rather than being folded into a
    /// rejection reason.
    async fn check_event(&self, event: &Event, webhooks: &Webhooks) -> RelayResult<Option<EventCheckResponse>>;

    /// Post-acceptance, best-effort notification (pipeline stage 11). The
    /// caller is responsible for logging and swallowing any `Err`.
    async fn notify_event(&self, event: &Event, webhooks: &Webhooks) -> RelayResult<()>;
}

/// Real HTTP-backed implementation, built on `relay_shared`'s generic
/// webhook POST client.
pub struct HttpEventWebhook {
    client: WebhookClient,
}

impl HttpEventWebhook {
    pub fn new(client: WebhookClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl EventWebhook for HttpEventWebhook {
    async fn check_event(&self, event: &Event, webhooks: &Webhooks) -> RelayResult<Option<EventCheckResponse>> {
        if !webhooks.event_checks {
            return Ok(None);
        }
        let Some(endpoint) = webhooks.endpoints.as_ref() else {
            return Ok(None);
        };
        let Some(path) = endpoint.event_check.as_deref() else {
            return Ok(None);
        };

        let response: EventCheckResponse = self
            .client
            .post_json(&endpoint.base_url, path, event)
            .await?;
        Ok(Some(response))
    }

    async fn notify_event(&self, event: &Event, webhooks: &Webhooks) -> RelayResult<()> {
        if !webhooks.event_callbacks {
            return Ok(());
        }
        let Some(endpoint) = webhooks.endpoints.as_ref() else {
            return Ok(());
        };
        let Some(path) = endpoint.event_callback.as_deref() else {
            return Ok(());
        };

        // The response body is ignored; only transport success matters.
        let _: serde_json::Value = self
            .client
            .post_json(&endpoint.base_url, path, event)
            .await?;
        Ok(())
    }
}
