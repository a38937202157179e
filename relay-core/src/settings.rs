use std::path::{Path, PathBuf};
use std::sync::Arc;

use arc_swap::ArcSwap;
use serde::Deserialize;

/// A kind matcher as written in config: either a bare integer or an
/// inclusive `[lo, hi]` range.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum KindMatcher {
    Exact(u16),
    Range([u16; 2]),
}

impl KindMatcher {
    pub fn matches(&self, kind: u16) -> bool {
        match self {
            KindMatcher::Exact(k) => *k == kind,
            KindMatcher::Range([lo, hi]) => kind >= *lo && kind <= *hi,
        }
    }
}

fn matches_any(matchers: &[KindMatcher], kind: u16) -> bool {
    matchers.iter().any(|m| m.matches(kind))
}

#[derive(Debug, Clone, Deserialize)]
pub struct ContentLimit {
    pub max_length: usize,
    #[serde(default)]
    pub kinds: Option<Vec<KindMatcher>>,
}

impl ContentLimit {
    pub fn applies_to(&self, kind: u16) -> bool {
        match &self.kinds {
            None => true,
            Some(kinds) => matches_any(kinds, kind),
        }
    }
}

/// `limits.event.content` accepts either a single record or a sequence; both
/// forms are normalized to a `Vec` at deserialize time so the policy
/// evaluator only ever deals with one shape.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum ContentLimitConfig {
    One(ContentLimit),
    Many(Vec<ContentLimit>),
}

impl From<ContentLimitConfig> for Vec<ContentLimit> {
    fn from(cfg: ContentLimitConfig) -> Self {
        match cfg {
            ContentLimitConfig::One(limit) => vec![limit],
            ContentLimitConfig::Many(limits) => limits,
        }
    }
}

fn deserialize_content_limits<'de, D>(deserializer: D) -> Result<Vec<ContentLimit>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    ContentLimitConfig::deserialize(deserializer).map(Into::into)
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct CreatedAtLimit {
    #[serde(default)]
    pub max_positive_delta: Option<i64>,
    #[serde(default)]
    pub max_negative_delta: Option<i64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct EventIdLimit {
    #[serde(default)]
    pub min_leading_zero_bits: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct PubkeyLimit {
    #[serde(default)]
    pub min_leading_zero_bits: Option<u32>,
    #[serde(default)]
    pub whitelist: Vec<String>,
    #[serde(default)]
    pub blacklist: Vec<String>,
    /// Millisatoshi-scale balance floor. Zero or absent disables the check.
    #[serde(default)]
    pub min_balance: i64,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct KindLimit {
    #[serde(default)]
    pub whitelist: Vec<KindMatcher>,
    #[serde(default)]
    pub blacklist: Vec<KindMatcher>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitRule {
    /// Window length, in milliseconds.
    pub period: i64,
    pub rate: u64,
    #[serde(default)]
    pub kinds: Option<Vec<KindMatcher>>,
}

impl RateLimitRule {
    pub fn applies_to(&self, kind: u16) -> bool {
        match &self.kinds {
            None => true,
            Some(kinds) => matches_any(kinds, kind),
        }
    }

    /// Stable stringification of `kinds` for the rate-limiter key suffix:
    /// `"<pubkey>:events:<period>"` with no kinds, or
    /// `"<pubkey>:events:<period>:[<kinds…>]"` when narrowed.
    pub fn key_suffix(&self) -> String {
        match &self.kinds {
            None => String::new(),
            Some(kinds) => {
                let rendered: Vec<String> = kinds
                    .iter()
                    .map(|k| match k {
                        KindMatcher::Exact(v) => v.to_string(),
                        KindMatcher::Range([lo, hi]) => format!("{lo}-{hi}"),
                    })
                    .collect();
                format!(":[{}]", rendered.join(","))
            }
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct EventWhitelists {
    #[serde(default)]
    pub pubkeys: Vec<String>,
    #[serde(default)]
    pub ip_addresses: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct EventLimits {
    #[serde(default, deserialize_with = "deserialize_content_limits")]
    pub content: Vec<ContentLimit>,
    #[serde(default)]
    pub created_at: CreatedAtLimit,
    #[serde(default)]
    pub event_id: EventIdLimit,
    #[serde(default)]
    pub pubkey: PubkeyLimit,
    #[serde(default)]
    pub kind: KindLimit,
    #[serde(default)]
    pub rate_limits: Vec<RateLimitRule>,
    #[serde(default)]
    pub whitelists: EventWhitelists,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Limits {
    #[serde(default)]
    pub event: EventLimits,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            event: EventLimits::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct FeeScheduleWhitelists {
    #[serde(default)]
    pub pubkeys: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FeeSchedule {
    pub enabled: bool,
    /// Millisatoshi-scale amount.
    pub amount: i64,
    #[serde(default)]
    pub whitelists: FeeScheduleWhitelists,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct FeeSchedules {
    #[serde(default)]
    pub admission: Vec<FeeSchedule>,
    #[serde(default)]
    pub publication: Vec<FeeSchedule>,
    #[serde(default)]
    pub top_up: Vec<FeeSchedule>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct Payments {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub fee_schedules: FeeSchedules,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct WebhookEndpoint {
    pub base_url: String,
    #[serde(default)]
    pub pubkey_check: Option<String>,
    #[serde(default)]
    pub event_check: Option<String>,
    #[serde(default)]
    pub event_callback: Option<String>,
    #[serde(default)]
    pub top_ups: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct Webhooks {
    #[serde(default)]
    pub pubkey_checks: bool,
    #[serde(default)]
    pub event_checks: bool,
    #[serde(default)]
    pub event_callbacks: bool,
    #[serde(default)]
    pub top_ups: bool,
    #[serde(default)]
    pub endpoints: Option<WebhookEndpoint>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Network {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_host")]
    pub host: String,
}

fn default_port() -> u16 {
    7000
}

fn default_host() -> String {
    "0.0.0.0".into()
}

impl Default for Network {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
        }
    }
}

/// Root of the process-wide settings snapshot.
///
/// A `Settings` value is immutable once built. Hot-reload is implemented by
/// swapping the `Arc<Settings>` a [`SettingsStore`] holds, never by mutating
/// an existing `Settings` in place — this is what lets one admission read
/// its snapshot once at entry and use it consistently for the rest of the
/// pipeline.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Settings {
    #[serde(default)]
    pub network: Network,
    #[serde(default)]
    pub limits: Limits,
    #[serde(default)]
    pub payments: Payments,
    #[serde(default)]
    pub webhooks: Webhooks,
}

impl Settings {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, config::ConfigError> {
        let built = config::Config::builder()
            .add_source(config::File::from(path.as_ref()))
            .add_source(config::Environment::with_prefix("RELAY").separator("__"))
            .build()?;
        built.try_deserialize()
    }
}

/// Hot-reloadable settings holder. `current()` returns the snapshot a
/// single admission should read once at pipeline entry.
pub struct SettingsStore {
    path: PathBuf,
    inner: ArcSwap<Settings>,
}

impl SettingsStore {
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, config::ConfigError> {
        let path = path.into();
        let settings = Settings::load(&path)?;
        Ok(Self {
            path,
            inner: ArcSwap::from_pointee(settings),
        })
    }

    /// Builds a store around an already-constructed `Settings`, with no
    /// backing file to `reload()` from. Used in tests that parametrize
    /// scenarios programmatically instead of via a config file on disk.
    pub fn from_settings(settings: Settings) -> Self {
        Self {
            path: PathBuf::new(),
            inner: ArcSwap::from_pointee(settings),
        }
    }

    pub fn current(&self) -> Arc<Settings> {
        self.inner.load_full()
    }

    /// Re-read the settings file and swap it in. Called from the reload
    /// task on `SIGHUP` or detected file mtime change. Leaves the previous
    /// snapshot in place if the new file fails to parse, so a bad edit
    /// never takes an already-running relay down.
    pub fn reload(&self) -> Result<(), config::ConfigError> {
        let settings = Settings::load(&self.path)?;
        self.inner.store(Arc::new(settings));
        tracing::info!("settings reloaded");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_matcher_exact() {
        let m = KindMatcher::Exact(1);
        assert!(m.matches(1));
        assert!(!m.matches(2));
    }

    #[test]
    fn kind_matcher_range_is_inclusive() {
        let m = KindMatcher::Range([10, 20]);
        assert!(m.matches(10));
        assert!(m.matches(20));
        assert!(m.matches(15));
        assert!(!m.matches(9));
        assert!(!m.matches(21));
    }

    #[test]
    fn content_limit_universal_without_kinds() {
        let limit = ContentLimit {
            max_length: 100,
            kinds: None,
        };
        assert!(limit.applies_to(1));
        assert!(limit.applies_to(9999));
    }

    #[test]
    fn rate_limit_key_suffix_empty_without_kinds() {
        let rule = RateLimitRule {
            period: 60_000,
            rate: 5,
            kinds: None,
        };
        assert_eq!(rule.key_suffix(), "");
    }

    #[test]
    fn rate_limit_key_suffix_renders_kinds() {
        let rule = RateLimitRule {
            period: 60_000,
            rate: 5,
            kinds: Some(vec![KindMatcher::Exact(1), KindMatcher::Range([10, 20])]),
        };
        assert_eq!(rule.key_suffix(), ":[1,10-20]");
    }

    #[test]
    fn single_content_record_normalizes_to_vec() {
        let toml = r#"
            max_length = 256
        "#;
        let parsed: ContentLimitConfig = toml::from_str(toml).expect("parses");
        let limits: Vec<ContentLimit> = parsed.into();
        assert_eq!(limits.len(), 1);
        assert_eq!(limits[0].max_length, 256);
    }
}
