//! Configuration management for Switchboard
//!
//! Parses TOML configuration files and provides typed access to settings.
//! The parsed `Config` is immutable and is handed to the coordinator and
//! resolver at construction time; nothing reads configuration at call time.

use crate::providers::{BreakerSettings, ProviderId};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Upper bound for every timeout setting, in seconds
pub const MAX_TIMEOUT_SECONDS: u64 = 300;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub server: ServerConfig,
    #[serde(default)]
    pub chat: ChatConfig,
    #[serde(default)]
    pub providers: ProvidersConfig,
    #[serde(default)]
    pub classifier: ClassifierConfig,
    #[serde(default)]
    pub breaker: BreakerConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Default bound for every provider call, unless the provider overrides it
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,
}

fn default_request_timeout() -> u64 {
    30
}

/// Inbound message limits
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ChatConfig {
    #[serde(default = "default_max_message_chars")]
    pub max_message_chars: usize,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            max_message_chars: default_max_message_chars(),
        }
    }
}

fn default_max_message_chars() -> usize {
    8000
}

/// Provider slots, tried in the fixed order primary → secondary → local
///
/// Any slot may be omitted. The local slot never gets a circuit breaker.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ProvidersConfig {
    pub primary: Option<ProviderEndpoint>,
    pub secondary: Option<ProviderEndpoint>,
    pub local: Option<ProviderEndpoint>,
}

impl ProvidersConfig {
    /// Configuration for a provider slot, if that slot is configured
    pub fn get(&self, id: ProviderId) -> Option<&ProviderEndpoint> {
        match id {
            ProviderId::Primary => self.primary.as_ref(),
            ProviderId::Secondary => self.secondary.as_ref(),
            ProviderId::Local => self.local.as_ref(),
        }
    }

    /// Number of configured slots
    pub fn configured_count(&self) -> usize {
        ProviderId::PRIORITY
            .iter()
            .filter(|id| self.get(**id).is_some())
            .count()
    }
}

/// One OpenAI-compatible provider endpoint
///
/// All fields are private to enforce invariants. Configuration is loaded via
/// deserialization and validated via Config::validate().
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProviderEndpoint {
    /// Model identifier sent in the request body
    name: String,
    base_url: String,
    /// Environment variable holding the bearer token (none for local servers)
    #[serde(default)]
    api_key_env: Option<String>,
    #[serde(default = "default_max_tokens")]
    max_tokens: u32,
    #[serde(default = "default_temperature")]
    temperature: f32,
    /// Per-provider override of `server.request_timeout_seconds`
    #[serde(default)]
    timeout_seconds: Option<u64>,
}

impl ProviderEndpoint {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn api_key_env(&self) -> Option<&str> {
        self.api_key_env.as_deref()
    }

    pub fn max_tokens(&self) -> u32 {
        self.max_tokens
    }

    pub fn temperature(&self) -> f32 {
        self.temperature
    }

    pub fn timeout_seconds(&self) -> Option<u64> {
        self.timeout_seconds
    }
}

fn default_max_tokens() -> u32 {
    2048
}

fn default_temperature() -> f32 {
    0.7
}

/// Classifier settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ClassifierConfig {
    /// Which provider slot answers classification prompts
    #[serde(default = "default_classifier_provider")]
    pub provider: ProviderId,
    /// Low temperature keeps classification close to deterministic
    #[serde(default = "default_classifier_temperature")]
    pub temperature: f32,
    #[serde(default = "default_classifier_timeout")]
    pub timeout_seconds: u64,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            provider: default_classifier_provider(),
            temperature: default_classifier_temperature(),
            timeout_seconds: default_classifier_timeout(),
        }
    }
}

fn default_classifier_provider() -> ProviderId {
    ProviderId::Primary
}

fn default_classifier_temperature() -> f32 {
    0.1
}

fn default_classifier_timeout() -> u64 {
    10
}

/// Circuit breaker thresholds, applied to each cloud provider
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BreakerConfig {
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    #[serde(default = "default_open_duration")]
    pub open_duration_seconds: u64,
    #[serde(default = "default_half_open_successes")]
    pub half_open_successes_required: u32,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            open_duration_seconds: default_open_duration(),
            half_open_successes_required: default_half_open_successes(),
        }
    }
}

impl BreakerConfig {
    pub fn settings(&self) -> BreakerSettings {
        BreakerSettings {
            failure_threshold: self.failure_threshold,
            open_duration: Duration::from_secs(self.open_duration_seconds),
            half_open_successes_required: self.half_open_successes_required,
        }
    }
}

fn default_failure_threshold() -> u32 {
    crate::providers::breaker::DEFAULT_FAILURE_THRESHOLD
}

fn default_open_duration() -> u64 {
    crate::providers::breaker::DEFAULT_OPEN_DURATION.as_secs()
}

fn default_half_open_successes() -> u32 {
    crate::providers::breaker::DEFAULT_HALF_OPEN_SUCCESSES
}

/// Per-call retry settings for rate-limit class errors
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetryConfig {
    /// Total attempts per provider call, including the first
    #[serde(default = "default_max_attempts")]
    pub max_attempts: usize,
    /// Delay before the second attempt; doubles for each further attempt
    #[serde(default = "default_base_backoff_ms")]
    pub base_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_backoff_ms: default_base_backoff_ms(),
        }
    }
}

fn default_max_attempts() -> usize {
    crate::specialists::retry::DEFAULT_MAX_ATTEMPTS
}

fn default_base_backoff_ms() -> u64 {
    crate::specialists::retry::DEFAULT_BASE_BACKOFF_MS
}

/// Observability configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> crate::error::AppResult<Self> {
        let path_display = path.as_ref().display().to_string();

        // Phase 1: Read file (preserves io::Error context)
        let content = std::fs::read_to_string(path.as_ref()).map_err(|source| {
            crate::error::AppError::ConfigFileRead {
                path: path_display.clone(),
                source,
            }
        })?;

        // Phase 2: Parse TOML (preserves toml::de::Error context)
        let config: Self = toml::from_str(&content).map_err(|source| {
            crate::error::AppError::ConfigParseFailed {
                path: path_display.clone(),
                source,
            }
        })?;

        // Phase 3: Validate parsed config (provides contextual reason)
        config
            .validate()
            .map_err(|e| crate::error::AppError::ConfigValidationFailed {
                path: path_display,
                reason: e.to_string(),
            })?;

        Ok(config)
    }

    /// Call timeout for a provider slot
    ///
    /// Returns the per-provider override if configured, otherwise the global
    /// `server.request_timeout_seconds`.
    pub fn timeout_for(&self, id: ProviderId) -> Duration {
        let seconds = self
            .providers
            .get(id)
            .and_then(|endpoint| endpoint.timeout_seconds())
            .unwrap_or(self.server.request_timeout_seconds);
        Duration::from_secs(seconds)
    }

    /// Validate configuration after parsing
    ///
    /// This is called automatically by `from_file()` and `from_str()`, but can
    /// also be called explicitly when constructing Config via other means.
    pub fn validate(&self) -> crate::error::AppResult<()> {
        use crate::error::AppError;

        // Phase 1: provider endpoint fields
        for id in ProviderId::PRIORITY {
            let Some(endpoint) = self.providers.get(id) else {
                continue;
            };

            if endpoint.name.trim().is_empty() {
                return Err(AppError::Config(format!(
                    "providers.{}.name must not be empty",
                    id
                )));
            }

            if !endpoint.base_url.starts_with("http://")
                && !endpoint.base_url.starts_with("https://")
            {
                return Err(AppError::Config(format!(
                    "providers.{} has invalid base_url '{}'. \
                    base_url must start with 'http://' or 'https://'.",
                    id, endpoint.base_url
                )));
            }

            // The local model probe appends "/models" to reach "/v1/models"
            if !endpoint.base_url.trim_end_matches('/').ends_with("/v1") {
                return Err(AppError::Config(format!(
                    "providers.{} has invalid base_url '{}'. \
                    base_url must end with '/v1' (e.g., 'http://host:port/v1').",
                    id, endpoint.base_url
                )));
            }

            if endpoint.max_tokens == 0 {
                return Err(AppError::Config(format!(
                    "providers.{}.max_tokens must be greater than 0",
                    id
                )));
            }

            if !endpoint.temperature.is_finite()
                || endpoint.temperature < 0.0
                || endpoint.temperature > 2.0
            {
                return Err(AppError::Config(format!(
                    "providers.{} has invalid temperature {}. \
                    temperature must be a finite number between 0.0 and 2.0.",
                    id, endpoint.temperature
                )));
            }

            if let Some(timeout) = endpoint.timeout_seconds {
                validate_timeout(&format!("providers.{}.timeout_seconds", id), timeout)?;
            }

            if let Some(var) = &endpoint.api_key_env
                && var.trim().is_empty()
            {
                return Err(AppError::Config(format!(
                    "providers.{}.api_key_env must not be empty when set",
                    id
                )));
            }
        }

        // Phase 2: at least one provider, and the classifier's provider exists
        if self.providers.configured_count() == 0 {
            return Err(AppError::Config(
                "No providers configured. Add at least one of \
                [providers.primary], [providers.secondary] or [providers.local].\n\n\
                Example fix - add to config.toml:\n\
                [providers.local]\n\
                name = \"llama-3.1-8b-instruct\"\n\
                base_url = \"http://localhost:11434/v1\""
                    .to_string(),
            ));
        }

        if self.providers.get(self.classifier.provider).is_none() {
            return Err(AppError::Config(format!(
                "classifier.provider = \"{}\" but [providers.{}] is not configured",
                self.classifier.provider, self.classifier.provider
            )));
        }

        // Phase 3: scalar settings
        validate_timeout(
            "server.request_timeout_seconds",
            self.server.request_timeout_seconds,
        )?;
        validate_timeout("classifier.timeout_seconds", self.classifier.timeout_seconds)?;

        if !self.classifier.temperature.is_finite()
            || self.classifier.temperature < 0.0
            || self.classifier.temperature > 2.0
        {
            return Err(AppError::Config(format!(
                "classifier.temperature must be between 0.0 and 2.0, got {}",
                self.classifier.temperature
            )));
        }

        if self.chat.max_message_chars == 0 {
            return Err(AppError::Config(
                "chat.max_message_chars must be greater than 0".to_string(),
            ));
        }

        if self.breaker.failure_threshold == 0 {
            return Err(AppError::Config(
                "breaker.failure_threshold must be at least 1".to_string(),
            ));
        }
        if self.breaker.open_duration_seconds == 0 {
            return Err(AppError::Config(
                "breaker.open_duration_seconds must be at least 1".to_string(),
            ));
        }
        if self.breaker.half_open_successes_required == 0 {
            return Err(AppError::Config(
                "breaker.half_open_successes_required must be at least 1".to_string(),
            ));
        }

        if self.retry.max_attempts == 0 {
            return Err(AppError::Config(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }

        Ok(())
    }
}

fn validate_timeout(field: &str, seconds: u64) -> crate::error::AppResult<()> {
    if seconds == 0 {
        return Err(crate::error::AppError::Config(format!(
            "{} must be greater than 0",
            field
        )));
    }
    if seconds > MAX_TIMEOUT_SECONDS {
        return Err(crate::error::AppError::Config(format!(
            "{} cannot exceed {} seconds (5 minutes), got {}",
            field, MAX_TIMEOUT_SECONDS, seconds
        )));
    }
    Ok(())
}

impl FromStr for Config {
    type Err = crate::error::AppError;

    fn from_str(toml_str: &str) -> Result<Self, Self::Err> {
        let config: Config = toml::from_str(toml_str).map_err(|source| {
            crate::error::AppError::ConfigParseFailed {
                path: "<string>".to_string(),
                source,
            }
        })?;

        config.validate()?;
        Ok(config)
    }
}
