use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub general: GeneralConfig,

    pub server: ServerConfig,

    pub provider: ProviderConfig,

    pub persistence: PersistenceConfig,

    pub billing: BillingConfig,

    pub cache: CacheSettings,

    pub quota: QuotaSettings,

    pub scheduler: SchedulerConfig,

    #[serde(default)]
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    pub log_level: String,

    #[serde(default)]
    pub suppress_connection_errors: bool,

    /// Number of tokio worker threads (default: 2)
    /// Set to 0 to use the number of CPU cores
    pub worker_threads: usize,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            suppress_connection_errors: false,
            worker_threads: 2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub enabled: bool,

    pub port: u16,

    pub cors_allowed_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: 6710,
            cors_allowed_origins: vec![
                "http://localhost:6710".to_string(),
                "http://127.0.0.1:6710".to_string(),
            ],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// Custom-search endpoint base URL.
    pub base_url: String,

    /// Static API key. Runtime-issued credentials take precedence; the
    /// GUARDARR_PROVIDER_API_KEY environment variable is the last fallback.
    pub api_key: String,

    /// Search engine id paired with the API key.
    pub engine_id: String,

    /// Optional backend endpoint that issues short-lived credentials.
    pub credential_endpoint: Option<String>,

    /// Request timeout in seconds (default: 30)
    pub request_timeout_seconds: u32,

    /// Rough per-call cost used for the cache's running cost estimate.
    pub cost_per_call: f64,

    pub defaults: SearchDefaults,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: "https://www.googleapis.com/customsearch/v1".to_string(),
            api_key: String::new(),
            engine_id: String::new(),
            credential_endpoint: None,
            request_timeout_seconds: 30,
            cost_per_call: 0.005,
            defaults: SearchDefaults::default(),
        }
    }
}

/// Fixed defaults that user-supplied search options are shallow-merged over.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchDefaults {
    pub similarity_threshold: f64,

    pub max_results: i64,

    pub search_mode: String,

    pub language: String,

    pub country: String,

    pub content_filter: String,
}

impl Default for SearchDefaults {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.5,
            max_results: 20,
            search_mode: "balanced".to_string(),
            language: "en".to_string(),
            country: "us".to_string(),
            content_filter: "medium".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceConfig {
    /// When disabled the process runs on the in-memory store (tests, demos).
    pub enabled: bool,

    /// PostgREST-style base URL of the persistence provider.
    pub base_url: String,

    /// Service key sent as the `apikey` header.
    pub service_key: String,

    /// Request timeout in seconds (default: 15)
    pub request_timeout_seconds: u32,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            base_url: "http://localhost:54321".to_string(),
            service_key: String::new(),
            request_timeout_seconds: 15,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BillingConfig {
    pub enabled: bool,

    /// Checkout verification edge-function URL.
    pub verify_endpoint: String,
}

impl Default for BillingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            verify_endpoint: "http://localhost:54321/functions/v1/verify-checkout".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    pub max_size: usize,

    /// TTL for entries not sourced from the provider (default: 30 minutes).
    pub ttl_default_minutes: u64,

    /// TTL for provider-sourced entries. Provider calls are the expensive
    /// resource being protected, so these live longer (default: 2 hours).
    pub ttl_provider_minutes: u64,

    pub sweep_interval_minutes: u64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            max_size: 500,
            ttl_default_minutes: 30,
            ttl_provider_minutes: 120,
            sweep_interval_minutes: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QuotaSettings {
    /// Minute-window length in seconds.
    pub window_seconds: u64,

    /// Requests in the current window at which a user counts as blocked
    /// in the monitoring stats.
    pub blocked_threshold: u32,

    pub anonymous: TierLimitsConfig,

    pub basic: TierLimitsConfig,

    pub premium: TierLimitsConfig,

    /// Accounts always granted the admin tier, in addition to users whose
    /// persisted record carries `role = "admin"`.
    pub admin_emails: Vec<String>,
}

impl Default for QuotaSettings {
    fn default() -> Self {
        Self {
            window_seconds: 60,
            blocked_threshold: 30,
            anonymous: TierLimitsConfig {
                per_minute: 5,
                per_week: None,
                per_month: None,
            },
            basic: TierLimitsConfig {
                per_minute: 10,
                per_week: Some(50),
                per_month: Some(200),
            },
            premium: TierLimitsConfig {
                per_minute: 30,
                per_week: Some(500),
                per_month: Some(2000),
            },
            admin_emails: vec!["admin@influenceguard.com".to_string()],
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TierLimitsConfig {
    pub per_minute: u32,

    /// Omitted means the window does not apply to this tier.
    pub per_week: Option<u32>,

    pub per_month: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub enabled: bool,

    pub check_interval_minutes: u32,

    pub cron_expression: Option<String>,

    /// Pause between consecutive scheduled searches to stay polite to the
    /// provider (seconds).
    pub check_delay_seconds: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            check_interval_minutes: 15,
            cron_expression: None,
            check_delay_seconds: 2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    pub metrics_enabled: bool,

    pub loki_enabled: bool,

    pub loki_url: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            metrics_enabled: true,
            loki_enabled: false,
            loki_url: "http://localhost:3100".to_string(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            general: GeneralConfig::default(),
            server: ServerConfig::default(),
            provider: ProviderConfig::default(),
            persistence: PersistenceConfig::default(),
            billing: BillingConfig::default(),
            cache: CacheSettings::default(),
            quota: QuotaSettings::default(),
            scheduler: SchedulerConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let paths = Self::config_paths();

        for path in &paths {
            if path.exists() {
                info!("Loading config from: {}", path.display());
                return Self::load_from_path(path);
            }
        }

        info!("No config file found, using defaults");
        Ok(Self::default())
    }

    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    pub fn save_to_path(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        info!("Config saved to: {}", path.display());
        Ok(())
    }

    fn config_paths() -> Vec<PathBuf> {
        let mut paths = vec![];

        paths.push(PathBuf::from("config.toml"));

        if let Some(config_dir) = dirs::config_dir() {
            paths.push(config_dir.join("guardarr").join("config.toml"));
        }

        if let Some(home) = dirs::home_dir() {
            paths.push(home.join(".guardarr").join("config.toml"));
        }

        paths
    }

    pub fn create_default_if_missing() -> Result<bool> {
        let path = PathBuf::from("config.toml");
        if path.exists() {
            Ok(false)
        } else {
            let config = Self::default();
            config.save_to_path(&path)?;
            info!("Created default config file: {}", path.display());
            Ok(true)
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.persistence.enabled && self.persistence.base_url.is_empty() {
            anyhow::bail!("Persistence base URL cannot be empty when enabled");
        }

        if self.scheduler.enabled
            && self.scheduler.check_interval_minutes == 0
            && self.scheduler.cron_expression.is_none()
        {
            anyhow::bail!("Scheduler interval must be > 0 or cron expression must be set");
        }

        if self.cache.max_size == 0 {
            anyhow::bail!("Cache max_size must be > 0");
        }

        if self.quota.window_seconds == 0 {
            anyhow::bail!("Quota window must be > 0 seconds");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.cache.max_size, 500);
        assert_eq!(config.cache.ttl_provider_minutes, 120);
        assert_eq!(config.quota.anonymous.per_minute, 5);
        assert!(config.quota.anonymous.per_week.is_none());
        assert_eq!(config.quota.blocked_threshold, 30);
        assert_eq!(config.scheduler.check_interval_minutes, 15);
    }

    #[test]
    fn test_config_serialization() {
        let config = Config::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        assert!(toml_str.contains("[general]"));
        assert!(toml_str.contains("[provider]"));
        assert!(toml_str.contains("[quota]"));
    }

    #[test]
    fn test_config_deserialization() {
        let toml_str = r#"
            [general]
            log_level = "debug"

            [cache]
            max_size = 50

            [quota.basic]
            per_minute = 3
            per_week = 10
        "#;

        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.general.log_level, "debug");
        assert_eq!(config.cache.max_size, 50);
        assert_eq!(config.quota.basic.per_minute, 3);
        assert_eq!(config.quota.basic.per_week, Some(10));
        assert_eq!(config.quota.basic.per_month, None);

        assert_eq!(config.provider.request_timeout_seconds, 30);
    }

    #[test]
    fn test_validate_rejects_zero_cache() {
        let mut config = Config::default();
        config.cache.max_size = 0;
        assert!(config.validate().is_err());
    }
}
