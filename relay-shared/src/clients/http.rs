use std::time::Duration;

use reqwest::redirect::Policy;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Thin `reqwest` wrapper for the relay's outbound webhook calls
/// (event-check, event-callback, pubkey-check, top-up).
///
/// All four call sites share the same shape: POST a JSON body, follow at
/// most one redirect, bound the call with a short timeout, and authenticate
/// with an API token passed as a `?token=` query parameter.
#[derive(Clone)]
pub struct WebhookClient {
    http: reqwest::Client,
    api_token: String,
}

impl WebhookClient {
    pub fn new(api_token: impl Into<String>, timeout: Duration) -> Self {
        let http = reqwest::Client::builder()
            .redirect(Policy::limited(1))
            .timeout(timeout)
            .build()
            .expect("failed to build webhook http client");

        Self {
            http,
            api_token: api_token.into(),
        }
    }

    pub async fn post_json<B: Serialize, R: DeserializeOwned>(
        &self,
        base_url: &str,
        path: &str,
        body: &B,
    ) -> Result<R, reqwest::Error> {
        let url = format!("{}{}", base_url.trim_end_matches('/'), path);
        let response = self
            .http
            .post(url)
            .query(&[("token", self.api_token.as_str())])
            .json(body)
            .send()
            .await?
            .error_for_status()?;

        response.json::<R>().await
    }
}
