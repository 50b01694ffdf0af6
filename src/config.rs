use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub runtime: RuntimeConfig,
    #[serde(default)]
    pub journal: JournalConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub simulator: SimulatorConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Entity runtime tuning
#[derive(Debug, Clone, Deserialize)]
pub struct RuntimeConfig {
    /// How long an order waits for fills before reporting a timeout
    #[serde(default = "default_fill_timeout_ms")]
    pub fill_timeout_ms: u64,
    /// Snapshot an entity every N persisted events (0 disables snapshots)
    #[serde(default = "default_snapshot_every")]
    pub snapshot_every: u64,
    /// Upper bound for request/response round trips between entities
    #[serde(default = "default_ask_timeout_ms")]
    pub ask_timeout_ms: u64,
}

fn default_fill_timeout_ms() -> u64 {
    3_000
}

fn default_snapshot_every() -> u64 {
    50
}

fn default_ask_timeout_ms() -> u64 {
    10_000
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            fill_timeout_ms: default_fill_timeout_ms(),
            snapshot_every: default_snapshot_every(),
            ask_timeout_ms: default_ask_timeout_ms(),
        }
    }
}

impl RuntimeConfig {
    pub fn fill_timeout(&self) -> Duration {
        Duration::from_millis(self.fill_timeout_ms)
    }

    pub fn ask_timeout(&self) -> Duration {
        Duration::from_millis(self.ask_timeout_ms)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum JournalBackend {
    #[default]
    Memory,
    Postgres,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JournalConfig {
    #[serde(default)]
    pub backend: JournalBackend,
    /// PostgreSQL connection URL (required for the postgres backend)
    #[serde(default)]
    pub url: Option<String>,
    /// Maximum connections in pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Run embedded migrations on startup
    #[serde(default = "default_true")]
    pub run_migrations: bool,
}

fn default_max_connections() -> u32 {
    5
}

fn default_true() -> bool {
    true
}

impl Default for JournalConfig {
    fn default() -> Self {
        Self {
            backend: JournalBackend::Memory,
            url: None,
            max_connections: default_max_connections(),
            run_migrations: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// How long POST /v1/order waits for the first workflow result
    #[serde(default = "default_result_timeout_ms")]
    pub result_timeout_ms: u64,
}

fn default_bind() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_result_timeout_ms() -> u64 {
    10_000
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
            result_timeout_ms: default_result_timeout_ms(),
        }
    }
}

/// How the simulated exchange reports fills after accepting an order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FillMode {
    /// One fill for the full quantity
    #[default]
    Full,
    /// Two fills splitting the quantity
    Split,
    /// Never fill; the order times out
    None,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SimulatorConfig {
    /// Artificial latency added to wallet replies
    #[serde(default)]
    pub wallet_latency_ms: u64,
    /// Artificial latency added to gateway acknowledgements and fills
    #[serde(default = "default_gateway_latency_ms")]
    pub gateway_latency_ms: u64,
    #[serde(default)]
    pub fill_mode: FillMode,
    /// Users whose source-wallet debits fail
    #[serde(default)]
    pub failing_source_users: Vec<String>,
    /// Users whose exchange-side destination credits fail
    #[serde(default)]
    pub failing_exchange_users: Vec<String>,
    /// Symbols the simulated exchange rejects
    #[serde(default)]
    pub rejected_symbols: Vec<String>,
}

fn default_gateway_latency_ms() -> u64 {
    50
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            wallet_latency_ms: 0,
            gateway_latency_ms: default_gateway_latency_ms(),
            fill_mode: FillMode::Full,
            failing_source_users: Vec::new(),
            failing_exchange_users: Vec::new(),
            rejected_symbols: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Enable JSON formatted logs
    #[serde(default)]
    pub json: bool,
    /// Directory for daily rolling log files
    #[serde(default)]
    pub directory: Option<String>,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
            directory: None,
        }
    }
}

impl AppConfig {
    /// Load configuration from files and environment
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from("config")
    }

    /// Load configuration from a specific directory
    pub fn load_from<P: AsRef<Path>>(config_dir: P) -> Result<Self, ConfigError> {
        let config_dir = config_dir.as_ref();

        let builder = Config::builder()
            .set_default("logging.level", "info")?
            .set_default("logging.json", false)?
            .set_default("runtime.fill_timeout_ms", default_fill_timeout_ms())?
            .set_default("journal.max_connections", default_max_connections())?
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            // Environment-specific overrides (e.g., config/production.toml)
            .add_source(
                File::from(config_dir.join(
                    std::env::var("ORDERFLOW_ENV").unwrap_or_else(|_| "development".to_string()),
                ))
                .required(false),
            )
            // ORDERFLOW__RUNTIME__FILL_TIMEOUT_MS, ORDERFLOW__JOURNAL__URL, ...
            .add_source(
                Environment::with_prefix("ORDERFLOW")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("simulator.failing_source_users")
                    .with_list_parse_key("simulator.failing_exchange_users")
                    .with_list_parse_key("simulator.rejected_symbols"),
            );

        builder.build()?.try_deserialize()
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.runtime.fill_timeout_ms == 0 {
            errors.push("runtime.fill_timeout_ms must be positive".to_string());
        }

        if self.runtime.ask_timeout_ms == 0 {
            errors.push("runtime.ask_timeout_ms must be positive".to_string());
        }

        if self.journal.backend == JournalBackend::Postgres {
            match self.journal.url.as_deref() {
                Some(url) if !url.trim().is_empty() => {}
                _ => errors.push("journal.url is required for the postgres backend".to_string()),
            }
        }

        if self.journal.max_connections == 0 {
            errors.push("journal.max_connections must be positive".to_string());
        }

        if self.api.port == 0 {
            errors.push("api.port must be non-zero".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = AppConfig::default();
        assert_eq!(config.runtime.fill_timeout(), Duration::from_secs(3));
        assert_eq!(config.journal.backend, JournalBackend::Memory);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_postgres_requires_url() {
        let mut config = AppConfig::default();
        config.journal.backend = JournalBackend::Postgres;

        let errors = config.validate().unwrap_err();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("journal.url"));

        config.journal.url = Some("postgres://localhost/orderflow".to_string());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_from_missing_dir_uses_defaults() {
        let config = AppConfig::load_from("does-not-exist").unwrap();
        assert_eq!(config.runtime.fill_timeout_ms, 3_000);
        assert_eq!(config.api.port, 8080);
    }
}
