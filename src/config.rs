use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use crate::resolve::LookupService;

/// Transport connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Bot token; falls back to `TELEGRAM_BOT_TOKEN` when absent.
    #[serde(default)]
    pub bot_token: Option<String>,
    #[serde(default = "default_poll_timeout_secs")]
    pub poll_timeout_secs: u64,
    /// Backoff before the single send retry.
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

fn default_poll_timeout_secs() -> u64 {
    30
}

fn default_retry_backoff_ms() -> u64 {
    500
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            bot_token: None,
            poll_timeout_secs: default_poll_timeout_secs(),
            retry_backoff_ms: default_retry_backoff_ms(),
        }
    }
}

impl TransportConfig {
    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

/// Admission gate settings: dedup window, rate limiting, staleness cutoffs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdmissionConfig {
    #[serde(default = "default_min_message_interval_ms")]
    pub min_message_interval_ms: u64,
    /// Hard bound on per-message processing, including the reply delay.
    #[serde(default = "default_message_timeout_ms")]
    pub message_timeout_ms: u64,
    /// Capacity of the dedup ledger; oldest fingerprints are evicted first.
    #[serde(default = "default_max_tracked_messages")]
    pub max_tracked_messages: usize,
    /// In-flight entries older than this are swept as abandoned.
    #[serde(default = "default_queue_timeout_ms")]
    pub queue_timeout_ms: u64,
    #[serde(default = "default_max_message_age_secs")]
    pub max_message_age_secs: i64,
}

fn default_min_message_interval_ms() -> u64 {
    1000
}

fn default_message_timeout_ms() -> u64 {
    15_000
}

fn default_max_tracked_messages() -> usize {
    100
}

fn default_queue_timeout_ms() -> u64 {
    10_000
}

fn default_max_message_age_secs() -> i64 {
    30
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            min_message_interval_ms: default_min_message_interval_ms(),
            message_timeout_ms: default_message_timeout_ms(),
            max_tracked_messages: default_max_tracked_messages(),
            queue_timeout_ms: default_queue_timeout_ms(),
            max_message_age_secs: default_max_message_age_secs(),
        }
    }
}

impl AdmissionConfig {
    pub fn min_message_interval(&self) -> Duration {
        Duration::from_millis(self.min_message_interval_ms)
    }

    pub fn message_timeout(&self) -> Duration {
        Duration::from_millis(self.message_timeout_ms)
    }

    pub fn queue_timeout(&self) -> Duration {
        Duration::from_millis(self.queue_timeout_ms)
    }
}

/// Privileged-command settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CommandConfig {
    /// Sender ids allowed to issue privileged commands.
    #[serde(default)]
    pub owners: Vec<String>,
}

/// Detection pipeline settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DetectionConfig {
    /// Route extracted tokens through the heuristic classifier instead of
    /// trusting every delimited word.
    #[serde(default)]
    pub strict_classifier: bool,
}

/// Resolution cache and remote lookup settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolverConfig {
    /// Remote services in priority order; ties on confidence go to the
    /// earlier entry.
    #[serde(default = "default_services")]
    pub services: Vec<LookupService>,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Cooldown applied on a rate-limit response without a retry hint.
    #[serde(default = "default_cooldown_secs")]
    pub default_cooldown_secs: u64,
    /// Persisted mapping snapshot, relative paths resolve against the
    /// executable directory.
    #[serde(default = "default_state_path")]
    pub state_path: String,
}

fn default_services() -> Vec<LookupService> {
    vec![
        LookupService::AniList,
        LookupService::Jikan,
        LookupService::Kitsu,
    ]
}

fn default_request_timeout_ms() -> u64 {
    3000
}

fn default_cooldown_secs() -> u64 {
    30
}

fn default_state_path() -> String {
    "name-mappings.json".to_string()
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            services: default_services(),
            request_timeout_ms: default_request_timeout_ms(),
            default_cooldown_secs: default_cooldown_secs(),
            state_path: default_state_path(),
        }
    }
}

impl ResolverConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn default_cooldown(&self) -> Duration {
        Duration::from_secs(self.default_cooldown_secs)
    }
}

/// Behavior simulation settings. The probabilities are deliberately
/// configuration: observed values in the wild ranged 10-30% and none of
/// them is more correct than another.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BehaviorConfig {
    #[serde(default = "default_mistake_probability")]
    pub mistake_probability: f64,
    /// Within mistake mode: probability of a keyboard typo as opposed to a
    /// structural mistake.
    #[serde(default = "default_typo_probability")]
    pub typo_probability: f64,
    /// Share of tokens kept by a partial-output mistake.
    #[serde(default = "default_partial_keep_ratio")]
    pub partial_keep_ratio: f64,
    /// Delay multiplier for the delayed-mistake variant.
    #[serde(default = "default_delayed_multiplier")]
    pub delayed_multiplier: f64,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_per_token_delay_ms")]
    pub per_token_delay_ms: u64,
    #[serde(default = "default_jitter_ms")]
    pub jitter_ms: u64,
}

fn default_mistake_probability() -> f64 {
    0.1
}

fn default_typo_probability() -> f64 {
    0.3
}

fn default_partial_keep_ratio() -> f64 {
    0.7
}

fn default_delayed_multiplier() -> f64 {
    2.0
}

fn default_base_delay_ms() -> u64 {
    50
}

fn default_per_token_delay_ms() -> u64 {
    25
}

fn default_jitter_ms() -> u64 {
    100
}

impl Default for BehaviorConfig {
    fn default() -> Self {
        Self {
            mistake_probability: default_mistake_probability(),
            typo_probability: default_typo_probability(),
            partial_keep_ratio: default_partial_keep_ratio(),
            delayed_multiplier: default_delayed_multiplier(),
            base_delay_ms: default_base_delay_ms(),
            per_token_delay_ms: default_per_token_delay_ms(),
            jitter_ms: default_jitter_ms(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BotConfig {
    #[serde(default)]
    pub transport: TransportConfig,
    #[serde(default)]
    pub admission: AdmissionConfig,
    #[serde(default)]
    pub commands: CommandConfig,
    #[serde(default)]
    pub detection: DetectionConfig,
    #[serde(default)]
    pub resolver: ResolverConfig,
    #[serde(default)]
    pub behavior: BehaviorConfig,
}

impl BotConfig {
    /// Directory containing the executable; config and state live next to it.
    pub fn base_dir() -> PathBuf {
        match env::current_exe() {
            Ok(exe_path) => exe_path
                .parent()
                .map(|p| p.to_path_buf())
                .unwrap_or_else(|| PathBuf::from(".")),
            Err(_) => PathBuf::from("."),
        }
    }

    pub fn config_path() -> PathBuf {
        Self::base_dir().join("rasid.toml")
    }

    /// Load config from rasid.toml next to the executable, falling back to
    /// defaults plus environment overrides.
    pub fn load() -> Self {
        let path = Self::config_path();

        if let Ok(contents) = fs::read_to_string(&path) {
            match toml::from_str::<BotConfig>(&contents) {
                Ok(config) => {
                    tracing::info!("Loaded config from {:?}", path);
                    return config.with_env_overrides();
                }
                Err(e) => {
                    tracing::error!("Failed to parse {:?}: {}", path, e);
                }
            }
        }

        tracing::warn!("No config file found, using defaults + env vars");
        Self::default().with_env_overrides()
    }

    fn with_env_overrides(mut self) -> Self {
        if let Ok(token) = env::var("TELEGRAM_BOT_TOKEN") {
            if !token.trim().is_empty() {
                self.transport.bot_token = Some(token.trim().to_string());
            }
        }

        if let Ok(owners) = env::var("RASID_OWNERS") {
            let parsed: Vec<String> = owners
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
            if !parsed.is_empty() {
                self.commands.owners = parsed;
            }
        }

        if let Ok(path) = env::var("RASID_STATE_PATH") {
            if !path.trim().is_empty() {
                self.resolver.state_path = path;
            }
        }

        if let Ok(strict) = env::var("RASID_STRICT_CLASSIFIER") {
            self.detection.strict_classifier = strict.eq_ignore_ascii_case("1")
                || strict.eq_ignore_ascii_case("true")
                || strict.eq_ignore_ascii_case("yes");
        }

        self
    }

    /// Reject configurations the pipeline cannot run with. Called once at
    /// startup, before the event loop (the only place errors are allowed to
    /// propagate to the process level).
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.behavior.mistake_probability) {
            bail!(
                "behavior.mistake_probability must be within [0, 1], got {}",
                self.behavior.mistake_probability
            );
        }
        if !(0.0..=1.0).contains(&self.behavior.typo_probability) {
            bail!(
                "behavior.typo_probability must be within [0, 1], got {}",
                self.behavior.typo_probability
            );
        }
        if !(0.0..=1.0).contains(&self.behavior.partial_keep_ratio) {
            bail!(
                "behavior.partial_keep_ratio must be within [0, 1], got {}",
                self.behavior.partial_keep_ratio
            );
        }
        if self.behavior.delayed_multiplier < 1.0 {
            bail!("behavior.delayed_multiplier must be at least 1.0");
        }
        if self.admission.max_tracked_messages == 0 {
            bail!("admission.max_tracked_messages must be positive");
        }
        if self.resolver.request_timeout_ms == 0 {
            bail!("resolver.request_timeout_ms must be positive");
        }
        if self.commands.owners.is_empty() {
            tracing::warn!("No owners configured; privileged commands will be refused");
        }
        Ok(())
    }

    /// Resolve the state path against the executable directory.
    pub fn state_path(&self) -> PathBuf {
        let configured = PathBuf::from(&self.resolver.state_path);
        if configured.is_absolute() {
            configured
        } else {
            Self::base_dir().join(configured)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_shipped_values() {
        let config = BotConfig::default();
        assert_eq!(config.admission.min_message_interval_ms, 1000);
        assert_eq!(config.admission.max_tracked_messages, 100);
        assert_eq!(config.behavior.mistake_probability, 0.1);
        assert_eq!(config.resolver.services.len(), 3);
        assert!(!config.detection.strict_classifier);
    }

    #[test]
    fn partial_toml_fills_remaining_defaults() {
        let config: BotConfig = toml::from_str(
            r#"
            [commands]
            owners = ["1001", "1002"]

            [behavior]
            mistake_probability = 0.25
            "#,
        )
        .unwrap();
        assert_eq!(config.commands.owners.len(), 2);
        assert_eq!(config.behavior.mistake_probability, 0.25);
        assert_eq!(config.behavior.typo_probability, 0.3);
        assert_eq!(config.admission.queue_timeout_ms, 10_000);
    }

    #[test]
    fn validate_rejects_out_of_range_probability() {
        let mut config = BotConfig::default();
        config.behavior.mistake_probability = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_accepts_defaults() {
        assert!(BotConfig::default().validate().is_ok());
    }
}
