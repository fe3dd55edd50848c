use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info};
use validator::{Validate, ValidationError};

/// Default values for configuration
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const DEFAULT_PORT: u16 = 8080;
const CONFIG_DIR: &str = "config";
const DEFAULT_CURRENCY: &str = "VND";
const DEFAULT_TRENDING_TOP_N: u64 = 10;
const DEFAULT_PAYMENT_TIMEOUT_SECS: u64 = 30;

/// Application configuration structure with validation
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    /// Database connection URL
    pub database_url: String,

    /// Server host address
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Application environment
    pub environment: String,

    /// Logging level
    #[serde(default = "default_log_level")]
    #[validate(custom = "validate_log_level")]
    pub log_level: String,

    /// Log in JSON format (structured logging)
    #[serde(default)]
    pub log_json: bool,

    /// Whether to run database migrations on startup
    #[serde(default)]
    pub auto_migrate: bool,

    /// DB pool: max connections
    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,

    /// DB pool: min connections
    #[serde(default = "default_db_min_connections")]
    pub db_min_connections: u32,

    /// DB timeouts (seconds)
    #[serde(default = "default_db_connect_timeout_secs")]
    pub db_connect_timeout_secs: u64,
    #[serde(default = "default_db_acquire_timeout_secs")]
    pub db_acquire_timeout_secs: u64,

    /// Shared secret of the identity provider's HS256 tokens
    #[validate(length(min = 32))]
    pub jwt_secret: String,

    /// Expected `iss` claim
    #[serde(default = "default_auth_issuer")]
    pub auth_issuer: String,

    /// Expected `aud` claim
    #[serde(default = "default_auth_audience")]
    pub auth_audience: String,

    /// ISO 4217 currency of every amount handled by the engine
    #[serde(default = "default_currency")]
    #[validate(length(equal = 3))]
    pub currency: String,

    /// Flat shipping fee in minor units
    #[serde(default)]
    #[validate(custom = "validate_non_negative_amount")]
    pub shipping_fee: i64,

    /// Subtotal at or above which shipping is free
    #[serde(default)]
    #[validate(custom = "validate_non_negative_amount")]
    pub free_shipping_threshold: Option<i64>,

    /// Size of the trending product set
    #[serde(default = "default_trending_top_n")]
    #[validate(custom = "validate_trending_top_n")]
    pub trending_top_n: u64,

    /// Base URL of the payment provider's API
    #[serde(default = "default_payment_gateway_url")]
    pub payment_gateway_url: String,

    /// Secret API key for the payment provider
    #[serde(default)]
    pub payment_api_key: Option<String>,

    /// Upper bound on a single charge round-trip
    #[serde(default = "default_payment_timeout_secs")]
    #[validate(custom = "validate_payment_timeout")]
    pub payment_timeout_secs: u64,

    /// Consecutive gateway failures before the circuit opens
    #[serde(default = "default_circuit_breaker_failures")]
    pub circuit_breaker_failure_threshold: u32,

    /// Seconds the circuit stays open before probing again
    #[serde(default = "default_circuit_breaker_timeout")]
    pub circuit_breaker_timeout_secs: u64,

    /// Event channel capacity for async event processing
    #[serde(default = "default_event_channel_capacity")]
    #[validate(custom = "validate_event_channel_capacity")]
    pub event_channel_capacity: usize,
}

impl AppConfig {
    /// Creates a configuration with defaults for everything but the essentials.
    pub fn new(database_url: String, jwt_secret: String, environment: String) -> Self {
        Self {
            database_url,
            host: "0.0.0.0".to_string(),
            port: default_port(),
            environment,
            log_level: default_log_level(),
            log_json: false,
            auto_migrate: false,
            db_max_connections: default_db_max_connections(),
            db_min_connections: default_db_min_connections(),
            db_connect_timeout_secs: default_db_connect_timeout_secs(),
            db_acquire_timeout_secs: default_db_acquire_timeout_secs(),
            jwt_secret,
            auth_issuer: default_auth_issuer(),
            auth_audience: default_auth_audience(),
            currency: default_currency(),
            shipping_fee: 0,
            free_shipping_threshold: None,
            trending_top_n: default_trending_top_n(),
            payment_gateway_url: default_payment_gateway_url(),
            payment_api_key: None,
            payment_timeout_secs: default_payment_timeout_secs(),
            circuit_breaker_failure_threshold: default_circuit_breaker_failures(),
            circuit_breaker_timeout_secs: default_circuit_breaker_timeout(),
            event_channel_capacity: default_event_channel_capacity(),
        }
    }

    pub fn log_level(&self) -> &str {
        &self.log_level
    }

    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }

    pub fn payment_timeout(&self) -> Duration {
        Duration::from_secs(self.payment_timeout_secs)
    }

    fn validate_additional_constraints(&self) -> Result<(), ValidationError> {
        if self.is_production() && self.payment_api_key.is_none() {
            return Err(ValidationError::new("payment_api_key_required"));
        }

        if self.db_min_connections > self.db_max_connections {
            return Err(ValidationError::new("db_min_connections_exceeds_max"));
        }

        Ok(())
    }
}

/// Payment provider settings injected into the gateway at construction.
#[derive(Clone, Debug)]
pub struct PaymentConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub timeout: Duration,
    pub failure_threshold: u32,
    pub reset_timeout: Duration,
}

impl From<&AppConfig> for PaymentConfig {
    fn from(cfg: &AppConfig) -> Self {
        Self {
            base_url: cfg.payment_gateway_url.trim_end_matches('/').to_string(),
            api_key: cfg.payment_api_key.clone(),
            timeout: cfg.payment_timeout(),
            failure_threshold: cfg.circuit_breaker_failure_threshold,
            reset_timeout: Duration::from_secs(cfg.circuit_breaker_timeout_secs),
        }
    }
}

/// Configuration-related errors
#[derive(Debug, Error)]
pub enum AppConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] ConfigError),
    #[error("Invalid configuration: {0}")]
    Validation(#[from] validator::ValidationErrors),
    #[error("Invalid configuration: {0}")]
    Constraint(ValidationError),
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_db_max_connections() -> u32 {
    10
}
fn default_db_min_connections() -> u32 {
    1
}
fn default_db_connect_timeout_secs() -> u64 {
    30
}
fn default_db_acquire_timeout_secs() -> u64 {
    8
}

fn default_auth_issuer() -> String {
    "storefront-auth".to_string()
}

fn default_auth_audience() -> String {
    "storefront-checkout".to_string()
}

fn default_currency() -> String {
    DEFAULT_CURRENCY.to_string()
}

fn default_trending_top_n() -> u64 {
    DEFAULT_TRENDING_TOP_N
}

fn default_payment_gateway_url() -> String {
    "http://localhost:12111/v1".to_string()
}

fn default_payment_timeout_secs() -> u64 {
    DEFAULT_PAYMENT_TIMEOUT_SECS
}

fn default_circuit_breaker_failures() -> u32 {
    5
}

fn default_circuit_breaker_timeout() -> u64 {
    60
}

fn default_event_channel_capacity() -> usize {
    1024
}

fn validate_non_negative_amount(amount: i64) -> Result<(), ValidationError> {
    if amount < 0 {
        let mut err = ValidationError::new("non_negative_amount");
        err.message = Some("amounts are minor units and must not be negative".into());
        return Err(err);
    }
    Ok(())
}

fn validate_trending_top_n(n: u64) -> Result<(), ValidationError> {
    if !(1..=100).contains(&n) {
        let mut err = ValidationError::new("trending_top_n");
        err.message = Some("trending_top_n must be between 1 and 100".into());
        return Err(err);
    }
    Ok(())
}

fn validate_payment_timeout(secs: u64) -> Result<(), ValidationError> {
    if !(1..=120).contains(&secs) {
        let mut err = ValidationError::new("payment_timeout_secs");
        err.message = Some("payment_timeout_secs must be between 1 and 120".into());
        return Err(err);
    }
    Ok(())
}

fn validate_event_channel_capacity(capacity: usize) -> Result<(), ValidationError> {
    if capacity == 0 {
        let mut err = ValidationError::new("event_channel_capacity");
        err.message = Some("event_channel_capacity must be greater than 0".into());
        return Err(err);
    }
    Ok(())
}

fn validate_log_level(level: &str) -> Result<(), ValidationError> {
    match level.to_lowercase().as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ValidationError::new("invalid_log_level")),
    }
}

/// Initializes tracing using the provided log level as the default filter
pub fn init_tracing(level: &str, json: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default_directive = format!("storefront_checkout={},tower_http=debug", level);
    let filter_directive = env::var("RUST_LOG")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(default_directive);

    if json {
        let _ = fmt().with_env_filter(EnvFilter::new(filter_directive)).json().try_init();
    } else {
        let _ = fmt().with_env_filter(EnvFilter::new(filter_directive)).try_init();
    }
}

/// Loads application configuration
///
/// Layers configuration sources in this order:
/// 1. Built-in defaults
/// 2. Default config (config/default.toml)
/// 3. Environment-specific config (config/{env}.toml)
/// 4. Environment variables (APP__*)
pub fn load_config() -> Result<AppConfig, AppConfigError> {
    load_config_from(Path::new(CONFIG_DIR))
}

pub fn load_config_from(config_dir: &Path) -> Result<AppConfig, AppConfigError> {
    let run_env = env::var("RUN_ENV")
        .or_else(|_| env::var("APP_ENV"))
        .unwrap_or_else(|_| DEFAULT_ENV.to_string());
    info!("Loading configuration for environment: {}", run_env);

    if !config_dir.exists() {
        info!(
            "Config directory '{}' not found; relying on built-in defaults and environment variables",
            config_dir.display()
        );
    }

    let config = Config::builder()
        .set_default("database_url", "sqlite://storefront.db?mode=rwc")?
        .set_default("host", "0.0.0.0")?
        .set_default("port", DEFAULT_PORT)?
        .set_default("environment", run_env.as_str())?
        .set_default("log_level", DEFAULT_LOG_LEVEL)?
        .set_default("log_json", false)?
        .add_source(File::with_name(&config_dir.join("default").to_string_lossy()).required(false))
        .add_source(File::with_name(&config_dir.join(&run_env).to_string_lossy()).required(false))
        .add_source(Environment::with_prefix("APP").separator("__"))
        .build()?;

    if config.get_string("jwt_secret").is_err() {
        error!("JWT secret is not configured. Set APP__JWT_SECRET to the identity provider's signing secret.");
        return Err(AppConfigError::Load(ConfigError::NotFound(
            "jwt_secret is required but not configured".into(),
        )));
    }

    let app_config: AppConfig = config.try_deserialize()?;

    app_config.validate().map_err(|e| {
        error!("Configuration validation failed: {:?}", e);
        AppConfigError::Validation(e)
    })?;

    app_config
        .validate_additional_constraints()
        .map_err(AppConfigError::Constraint)?;

    info!("Configuration loaded successfully");
    Ok(app_config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    const SECRET: &str = "0123456789abcdef0123456789abcdef";

    fn base_config() -> AppConfig {
        AppConfig::new(
            "sqlite::memory:".into(),
            SECRET.into(),
            "development".into(),
        )
    }

    #[test]
    fn defaults_pass_validation() {
        let cfg = base_config();
        assert!(cfg.validate().is_ok());
        assert!(cfg.validate_additional_constraints().is_ok());
        assert_eq!(cfg.currency, "VND");
        assert_eq!(cfg.trending_top_n, 10);
    }

    #[test]
    fn short_jwt_secret_is_rejected() {
        let mut cfg = base_config();
        cfg.jwt_secret = "short".into();
        let errors = cfg.validate().unwrap_err();
        assert!(errors.field_errors().contains_key("jwt_secret"));
    }

    #[test]
    fn trending_size_must_be_positive() {
        let mut cfg = base_config();
        cfg.trending_top_n = 0;
        let errors = cfg.validate().unwrap_err();
        assert!(errors.field_errors().contains_key("trending_top_n"));
    }

    #[test]
    fn amounts_and_limits_are_range_checked() {
        let mut cfg = base_config();
        cfg.shipping_fee = -1;
        cfg.free_shipping_threshold = Some(-5);
        cfg.payment_timeout_secs = 0;
        cfg.event_channel_capacity = 0;

        let errors = cfg.validate().unwrap_err();
        let fields = errors.field_errors();
        assert!(fields.contains_key("shipping_fee"));
        assert!(fields.contains_key("free_shipping_threshold"));
        assert!(fields.contains_key("payment_timeout_secs"));
        assert!(fields.contains_key("event_channel_capacity"));

        let mut cfg = base_config();
        cfg.free_shipping_threshold = Some(0);
        cfg.payment_timeout_secs = 120;
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn production_requires_payment_key() {
        let mut cfg = base_config();
        cfg.environment = "production".into();
        assert!(cfg.validate_additional_constraints().is_err());

        cfg.payment_api_key = Some("sk_live_123".into());
        assert!(cfg.validate_additional_constraints().is_ok());
    }

    #[test]
    fn payment_config_strips_trailing_slash() {
        let mut cfg = base_config();
        cfg.payment_gateway_url = "https://pay.example.com/v1/".into();
        let payment = PaymentConfig::from(&cfg);
        assert_eq!(payment.base_url, "https://pay.example.com/v1");
        assert_eq!(payment.timeout, Duration::from_secs(30));
    }

    #[test]
    fn loads_layered_file_config() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("default.toml"),
            format!(
                r#"
                jwt_secret = "{SECRET}"
                shipping_fee = 30000
                free_shipping_threshold = 500000
                trending_top_n = 5
                "#
            ),
        )
        .unwrap();

        let cfg = load_config_from(dir.path()).unwrap();
        assert_eq!(cfg.shipping_fee, 30_000);
        assert_eq!(cfg.free_shipping_threshold, Some(500_000));
        assert_eq!(cfg.trending_top_n, 5);
    }

    #[test]
    fn missing_secret_fails_to_load() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("default.toml"), "shipping_fee = 1\n").unwrap();

        if env::var("APP__JWT_SECRET").is_ok() {
            return;
        }
        assert!(matches!(
            load_config_from(dir.path()),
            Err(AppConfigError::Load(_))
        ));
    }
}
