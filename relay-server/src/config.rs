use std::time::Duration;

use serde::Deserialize;

/// Process-level configuration: where to listen, how to reach Postgres and
/// Redis, and where the admission policy file lives. Distinct from
/// [`relay_core::Settings`], which governs admission policy and is
/// hot-reloadable; this struct is read once at startup.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_database_url")]
    pub database_url: String,
    #[serde(default = "default_redis_url")]
    pub redis_url: String,
    #[serde(default = "default_settings_path")]
    pub settings_path: String,
    #[serde(default = "default_api_token")]
    pub webhook_api_token: String,
    #[serde(default = "default_webhook_timeout_secs")]
    pub webhook_timeout_secs: u64,
    /// Gates `GET /user`. `None` when `RELAY_API_KEY` is unset, in which
    /// case the admin endpoint rejects every request with 403 regardless
    /// of the `token` query parameter supplied.
    #[serde(default)]
    pub admin_api_key: Option<String>,
}

fn default_port() -> u16 {
    7000
}
fn default_host() -> String {
    "0.0.0.0".into()
}
fn default_database_url() -> String {
    "postgres://localhost/relay".into()
}
fn default_redis_url() -> String {
    "redis://localhost:6379".into()
}
fn default_settings_path() -> String {
    "config/settings.toml".into()
}
fn default_api_token() -> String {
    "development-token-change-in-production".into()
}
fn default_webhook_timeout_secs() -> u64 {
    5
}

impl AppConfig {
    pub fn load() -> anyhow::Result<Self> {
        let config = config::Config::builder()
            .add_source(config::Environment::with_prefix("RELAY_SERVER").separator("__"))
            .build()?;
        let mut config: Self = config.try_deserialize().unwrap_or_else(|_| Self {
            port: default_port(),
            host: default_host(),
            database_url: default_database_url(),
            redis_url: default_redis_url(),
            settings_path: default_settings_path(),
            webhook_api_token: default_api_token(),
            webhook_timeout_secs: default_webhook_timeout_secs(),
            admin_api_key: None,
        });

        // These two exact, unprefixed variables are the client-observable
        // environment contract; they take precedence over the
        // `RELAY_SERVER__*`-prefixed source above.
        if let Ok(admin_api_key) = std::env::var("RELAY_API_KEY") {
            config.admin_api_key = Some(admin_api_key);
        }
        if let Ok(webhook_api_token) = std::env::var("VIDA_API_KEY") {
            config.webhook_api_token = webhook_api_token;
        }

        Ok(config)
    }

    pub fn webhook_timeout(&self) -> Duration {
        Duration::from_secs(self.webhook_timeout_secs)
    }
}
