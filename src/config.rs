use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use crate::error::{AssistantError, Result};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub assistant: AssistantConfig,
    #[serde(default)]
    pub drafting: DraftingConfig,
    #[serde(default)]
    pub processing: ProcessingConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub resilience: ResilienceConfig,
}

/// Identity of the assistant and the defaults used to seed its preference store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssistantConfig {
    #[serde(default = "default_assistant_id")]
    pub assistant_id: String,
    #[serde(default = "default_name")]
    pub name: String,
    #[serde(default = "default_full_name")]
    pub full_name: String,
    #[serde(default = "default_background")]
    pub background: String,
    #[serde(default = "default_triage_no")]
    pub triage_no: String,
    #[serde(default = "default_triage_email")]
    pub triage_email: String,
    #[serde(default = "default_triage_notify")]
    pub triage_notify: String,
    #[serde(default)]
    pub vip_contacts: Vec<String>,
    #[serde(default = "default_schedule_preferences")]
    pub schedule_preferences: String,
    #[serde(default = "default_background_preferences")]
    pub background_preferences: String,
    #[serde(default = "default_response_preferences")]
    pub response_preferences: String,
}

impl Default for AssistantConfig {
    fn default() -> Self {
        Self {
            assistant_id: default_assistant_id(),
            name: default_name(),
            full_name: default_full_name(),
            background: default_background(),
            triage_no: default_triage_no(),
            triage_email: default_triage_email(),
            triage_notify: default_triage_notify(),
            vip_contacts: Vec::new(),
            schedule_preferences: default_schedule_preferences(),
            background_preferences: default_background_preferences(),
            response_preferences: default_response_preferences(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DraftingConfig {
    #[serde(default = "default_draft_attempts")]
    pub max_attempts: u32,
}

impl Default for DraftingConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_draft_attempts(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingConfig {
    /// Deadline for one remote call including all of its retries
    #[serde(default)]
    pub call_timeout_secs: Option<u64>,
    #[serde(default = "default_max_concurrent_emails")]
    pub max_concurrent_emails: usize,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            call_timeout_secs: None,
            max_concurrent_emails: default_max_concurrent_emails(),
        }
    }
}

impl ProcessingConfig {
    pub fn call_timeout(&self) -> Option<Duration> {
        self.call_timeout_secs.map(Duration::from_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_window_size")]
    pub window_size: usize,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            window_size: default_window_size(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResilienceConfig {
    /// Profile used for dependencies without an explicit entry
    #[serde(default)]
    pub default: ServiceConfig,
    #[serde(default = "default_services")]
    pub services: BTreeMap<String, ServiceConfig>,
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            default: ServiceConfig::default(),
            services: default_services(),
        }
    }
}

impl ResilienceConfig {
    /// Resolve the profile for a named dependency
    pub fn service(&self, name: &str) -> &ServiceConfig {
        self.services.get(name).unwrap_or(&self.default)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ServiceConfig {
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,
    #[serde(default)]
    pub rate_limit_per_minute: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_retry_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_secs")]
    pub base_delay_secs: f64,
    #[serde(default = "default_max_delay_secs")]
    pub max_delay_secs: f64,
    #[serde(default = "default_exponential_base")]
    pub exponential_base: f64,
    #[serde(default = "default_jitter")]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_retry_attempts(),
            base_delay_secs: default_base_delay_secs(),
            max_delay_secs: default_max_delay_secs(),
            exponential_base: default_exponential_base(),
            jitter: default_jitter(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    #[serde(default = "default_circuit_breaker_enabled")]
    pub enabled: bool,
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    #[serde(default = "default_recovery_timeout_secs")]
    pub recovery_timeout_secs: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            enabled: default_circuit_breaker_enabled(),
            failure_threshold: default_failure_threshold(),
            recovery_timeout_secs: default_recovery_timeout_secs(),
        }
    }
}

fn default_assistant_id() -> String {
    "default".to_string()
}

fn default_name() -> String {
    "Alex".to_string()
}

fn default_full_name() -> String {
    "Alex Morgan".to_string()
}

fn default_background() -> String {
    "Alex is a busy executive who relies on their assistant to keep the inbox under control."
        .to_string()
}

fn default_triage_no() -> String {
    "- Automated alerts, newsletters and marketing\n- Cold outreach from vendors\n- Emails where Alex is only CC'd for visibility".to_string()
}

fn default_triage_email() -> String {
    "- Direct questions addressed to Alex\n- Meeting requests from known contacts\n- Follow-ups on threads Alex started".to_string()
}

fn default_triage_notify() -> String {
    "- Documents shared with Alex\n- Important account or billing notices\n- Updates on projects Alex owns".to_string()
}

fn default_schedule_preferences() -> String {
    "By default, unless specified otherwise, meetings should be 30 minutes long.".to_string()
}

fn default_background_preferences() -> String {
    String::new()
}

fn default_response_preferences() -> String {
    "Keep replies short and friendly. Sign off with the principal's first name.".to_string()
}

fn default_draft_attempts() -> u32 {
    5
}

fn default_max_concurrent_emails() -> usize {
    10
}

fn default_window_size() -> usize {
    1000
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_base_delay_secs() -> f64 {
    1.0
}

fn default_max_delay_secs() -> f64 {
    60.0
}

fn default_exponential_base() -> f64 {
    2.0
}

fn default_jitter() -> bool {
    true
}

fn default_circuit_breaker_enabled() -> bool {
    true
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_recovery_timeout_secs() -> u64 {
    60
}

fn service_profile(max_attempts: u32, base_delay_secs: f64) -> ServiceConfig {
    ServiceConfig {
        retry: RetryConfig {
            max_attempts,
            base_delay_secs,
            ..RetryConfig::default()
        },
        ..ServiceConfig::default()
    }
}

fn default_services() -> BTreeMap<String, ServiceConfig> {
    let mut services = BTreeMap::new();
    services.insert("llm".to_string(), service_profile(2, 1.0));
    services.insert("gmail".to_string(), service_profile(3, 2.0));
    services.insert("calendar".to_string(), service_profile(3, 1.5));
    services
}

impl Config {
    pub async fn load(path: &Path) -> Result<Self> {
        // If file doesn't exist, return default config with warning
        if !path.exists() {
            tracing::warn!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            AssistantError::ConfigError(format!("Failed to read config file: {}", e))
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| {
            AssistantError::ConfigError(format!("Failed to parse config file: {}", e))
        })?;

        config.validate()?;

        tracing::info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    pub async fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                AssistantError::ConfigError(format!("Failed to create config directory: {}", e))
            })?;
        }

        let content = toml::to_string_pretty(self).map_err(|e| {
            AssistantError::ConfigError(format!("Failed to serialize config: {}", e))
        })?;

        tokio::fs::write(path, content).await.map_err(|e| {
            AssistantError::ConfigError(format!("Failed to write config file: {}", e))
        })?;

        tracing::info!("Saved configuration to {:?}", path);
        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.assistant.assistant_id.trim().is_empty() {
            return Err(AssistantError::ConfigError(
                "assistant.assistant_id cannot be empty".to_string(),
            ));
        }

        for vip in &self.assistant.vip_contacts {
            if !vip.contains('@') {
                return Err(AssistantError::ConfigError(format!(
                    "assistant.vip_contacts entry '{}' is not an email address",
                    vip
                )));
            }
        }

        if self.drafting.max_attempts == 0 {
            return Err(AssistantError::ConfigError(
                "drafting.max_attempts must be greater than 0".to_string(),
            ));
        }

        if self.processing.max_concurrent_emails == 0 {
            return Err(AssistantError::ConfigError(
                "processing.max_concurrent_emails must be at least 1".to_string(),
            ));
        }

        if self.processing.call_timeout_secs == Some(0) {
            return Err(AssistantError::ConfigError(
                "processing.call_timeout_secs must be greater than 0 when set".to_string(),
            ));
        }

        if self.metrics.window_size == 0 {
            return Err(AssistantError::ConfigError(
                "metrics.window_size must be greater than 0".to_string(),
            ));
        }

        self.resilience.default.validate("resilience.default")?;
        for (name, service) in &self.resilience.services {
            service.validate(&format!("resilience.services.{}", name))?;
        }

        tracing::debug!("Configuration validation passed");
        Ok(())
    }

    /// Create an example configuration file
    pub async fn create_example(path: &Path) -> Result<()> {
        let config = Self::default();
        config.save(path).await
    }
}

impl ServiceConfig {
    fn validate(&self, section: &str) -> Result<()> {
        let retry = &self.retry;
        if retry.max_attempts == 0 {
            return Err(AssistantError::ConfigError(format!(
                "{}.retry.max_attempts must be greater than 0",
                section
            )));
        }
        if retry.base_delay_secs < 0.0 || !retry.base_delay_secs.is_finite() {
            return Err(AssistantError::ConfigError(format!(
                "{}.retry.base_delay_secs must be a non-negative number",
                section
            )));
        }
        if retry.max_delay_secs < retry.base_delay_secs || !retry.max_delay_secs.is_finite() {
            return Err(AssistantError::ConfigError(format!(
                "{}.retry.max_delay_secs cannot be lower than base_delay_secs",
                section
            )));
        }
        if retry.exponential_base <= 0.0 || !retry.exponential_base.is_finite() {
            return Err(AssistantError::ConfigError(format!(
                "{}.retry.exponential_base must be positive",
                section
            )));
        }
        if self.circuit_breaker.failure_threshold == 0 {
            return Err(AssistantError::ConfigError(format!(
                "{}.circuit_breaker.failure_threshold must be greater than 0",
                section
            )));
        }
        if self.circuit_breaker.recovery_timeout_secs == 0 {
            return Err(AssistantError::ConfigError(format!(
                "{}.circuit_breaker.recovery_timeout_secs must be greater than 0",
                section
            )));
        }
        if self.rate_limit_per_minute == Some(0) {
            return Err(AssistantError::ConfigError(format!(
                "{}.rate_limit_per_minute must be greater than 0 when set",
                section
            )));
        }
        Ok(())
    }
}
