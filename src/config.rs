use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info};
use validator::{Validate, ValidationError, ValidationErrors};

/// Default values for configuration
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const DEFAULT_PORT: u16 = 8080;
const CONFIG_DIR: &str = "config";
const DEFAULT_CACHE_TYPE: &str = "in-memory";
const DEFAULT_ORDER_ID_PREFIX: &str = "storefront";
const CART_COUNT_TTL_SECS: u64 = 14 * 24 * 60 * 60;
const PRODUCT_RATES_TTL_SECS: u64 = 24 * 60 * 60;
const DEV_DEFAULT_JWT_SECRET: &str =
    "this_is_a_development_secret_key_that_is_at_least_64_characters_long_for_testing";

/// Cache configuration
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct CacheConfig {
    /// Type of cache to use: "in-memory" or "redis"
    #[serde(default = "default_cache_type")]
    #[validate(custom = "validate_cache_type")]
    pub cache_type: String,

    /// TTL of the cached cart line count per customer
    #[serde(default = "default_cart_count_ttl_secs")]
    pub cart_count_ttl_secs: u64,

    /// TTL of cached per-product freight rates
    #[serde(default = "default_product_rates_ttl_secs")]
    pub product_rates_ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            cache_type: default_cache_type(),
            cart_count_ttl_secs: default_cart_count_ttl_secs(),
            product_rates_ttl_secs: default_product_rates_ttl_secs(),
        }
    }
}

/// Courier-rate service settings
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct FreightConfig {
    /// Base URL of the courier-rate service
    #[validate(length(min = 1))]
    pub base_url: String,

    /// Value sent verbatim in the Authorization header
    #[serde(default)]
    pub authorization: String,

    #[serde(default = "default_upstream_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for FreightConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8081".to_string(),
            authorization: String::new(),
            timeout_secs: default_upstream_timeout_secs(),
        }
    }
}

impl FreightConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Hosted payment gateway settings
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct PaymentGatewayConfig {
    /// Server key; also the shared secret of notification signatures
    pub server_key: String,

    /// Base URL of the hosted payment page API
    #[validate(length(min = 1))]
    pub snap_base_url: String,

    /// Base URL of the core API used for cancellation
    #[validate(length(min = 1))]
    pub core_api_base_url: String,

    /// Prefix of the external order reference, `<prefix>-<order id>`
    #[serde(default = "default_order_id_prefix")]
    #[validate(length(min = 1), custom = "validate_order_id_prefix")]
    pub order_id_prefix: String,

    /// Payment expiry window length
    #[serde(default = "default_expiry_duration")]
    #[validate(range(min = 1))]
    pub expiry_duration: u32,

    /// Payment expiry unit: "day", "hour" or "minute"
    #[serde(default = "default_expiry_unit")]
    #[validate(custom = "validate_expiry_unit")]
    pub expiry_unit: String,

    #[serde(default = "default_upstream_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for PaymentGatewayConfig {
    fn default() -> Self {
        Self {
            server_key: String::new(),
            snap_base_url: "https://app.sandbox.midtrans.com".to_string(),
            core_api_base_url: "https://api.sandbox.midtrans.com".to_string(),
            order_id_prefix: default_order_id_prefix(),
            expiry_duration: default_expiry_duration(),
            expiry_unit: default_expiry_unit(),
            timeout_secs: default_upstream_timeout_secs(),
        }
    }
}

impl PaymentGatewayConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Application configuration structure with validation
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    /// Database connection URL
    pub database_url: String,

    /// Redis connection URL
    pub redis_url: String,

    /// JWT secret key used to verify customer bearer tokens
    #[validate(length(min = 32))]
    pub jwt_secret: String,

    /// JWT issuer name
    #[serde(default = "default_auth_issuer")]
    pub auth_issuer: String,

    /// JWT audience
    #[serde(default = "default_auth_audience")]
    pub auth_audience: String,

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

    #[serde(default)]
    #[validate]
    pub cache: CacheConfig,

    #[serde(default)]
    #[validate]
    pub freight: FreightConfig,

    #[serde(default)]
    #[validate]
    pub payment: PaymentGatewayConfig,

    /// Whether to run database migrations on startup
    #[serde(default)]
    pub auto_migrate: bool,

    /// CORS: comma-separated list of allowed origins (production)
    #[serde(default)]
    pub cors_allowed_origins: Option<String>,

    /// Allow permissive CORS fallback
    #[serde(default)]
    pub cors_allow_any_origin: bool,

    /// DB pool: max connections
    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,

    /// DB pool: min connections
    #[serde(default = "default_db_min_connections")]
    pub db_min_connections: u32,

    /// DB timeouts (seconds)
    #[serde(default = "default_db_connect_timeout_secs")]
    pub db_connect_timeout_secs: u64,
    #[serde(default = "default_db_idle_timeout_secs")]
    pub db_idle_timeout_secs: u64,
    #[serde(default = "default_db_acquire_timeout_secs")]
    pub db_acquire_timeout_secs: u64,
}

impl AppConfig {
    /// Creates a new configuration
    pub fn new(
        database_url: String,
        redis_url: String,
        jwt_secret: String,
        host: String,
        port: u16,
        environment: String,
    ) -> Self {
        Self {
            database_url,
            redis_url,
            jwt_secret,
            auth_issuer: default_auth_issuer(),
            auth_audience: default_auth_audience(),
            host,
            port,
            environment,
            log_level: default_log_level(),
            log_json: false,
            cache: CacheConfig::default(),
            freight: FreightConfig::default(),
            payment: PaymentGatewayConfig::default(),
            auto_migrate: false,
            cors_allowed_origins: None,
            cors_allow_any_origin: false,
            db_max_connections: default_db_max_connections(),
            db_min_connections: default_db_min_connections(),
            db_connect_timeout_secs: default_db_connect_timeout_secs(),
            db_idle_timeout_secs: default_db_idle_timeout_secs(),
            db_acquire_timeout_secs: default_db_acquire_timeout_secs(),
        }
    }

    pub fn log_level(&self) -> &str {
        &self.log_level
    }

    /// Checks if running in development environment
    pub fn is_development(&self) -> bool {
        self.environment.eq_ignore_ascii_case("development")
    }

    /// Returns true if explicit CORS origins are configured
    pub fn has_cors_allowed_origins(&self) -> bool {
        self.cors_allowed_origins
            .as_ref()
            .map(|raw| raw.split(',').any(|origin| !origin.trim().is_empty()))
            .unwrap_or(false)
    }

    /// Whether we should fall back to permissive CORS
    pub fn should_allow_permissive_cors(&self) -> bool {
        self.is_development() || self.cors_allow_any_origin
    }

    pub fn cart_count_ttl(&self) -> Duration {
        Duration::from_secs(self.cache.cart_count_ttl_secs)
    }

    pub fn product_rates_ttl(&self) -> Duration {
        Duration::from_secs(self.cache.product_rates_ttl_secs)
    }

    fn validate_additional_constraints(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();

        if !self.should_allow_permissive_cors() && !self.has_cors_allowed_origins() {
            let mut err = ValidationError::new("cors_allowed_origins_required");
            err.message = Some(
                "Set APP__CORS_ALLOWED_ORIGINS for non-development environments or explicitly opt-in via APP__CORS_ALLOW_ANY_ORIGIN=true".into(),
            );
            errors.add("cors_allowed_origins", err);
        }

        if !self.is_development() && self.jwt_secret.trim() == DEV_DEFAULT_JWT_SECRET {
            let mut err = ValidationError::new("jwt_secret_default_dev");
            err.message = Some(
                "The bundled development JWT secret must not be used outside development. Set APP__JWT_SECRET to a unique, secure value."
                    .into(),
            );
            errors.add("jwt_secret", err);
        }

        if !self.is_development() && self.payment.server_key.trim().is_empty() {
            let mut err = ValidationError::new("payment_server_key_required");
            err.message = Some(
                "Set APP__PAYMENT__SERVER_KEY; notification signatures cannot be verified without it"
                    .into(),
            );
            errors.add("payment", err);
        }

        if errors.errors().is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum AppConfigError {
    #[error("Configuration loading failed: {0}")]
    Load(#[from] ConfigError),

    #[error("Configuration validation failed: {0}")]
    Validation(#[from] validator::ValidationErrors),
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_cache_type() -> String {
    DEFAULT_CACHE_TYPE.to_string()
}

fn default_cart_count_ttl_secs() -> u64 {
    CART_COUNT_TTL_SECS
}

fn default_product_rates_ttl_secs() -> u64 {
    PRODUCT_RATES_TTL_SECS
}

fn default_upstream_timeout_secs() -> u64 {
    15
}

fn default_order_id_prefix() -> String {
    DEFAULT_ORDER_ID_PREFIX.to_string()
}

fn default_expiry_duration() -> u32 {
    1
}

fn default_expiry_unit() -> String {
    "day".to_string()
}

fn default_db_max_connections() -> u32 {
    16
}
fn default_db_min_connections() -> u32 {
    2
}
fn default_db_connect_timeout_secs() -> u64 {
    30
}
fn default_db_idle_timeout_secs() -> u64 {
    600
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

fn validate_cache_type(value: &str) -> Result<(), ValidationError> {
    match value.to_ascii_lowercase().as_str() {
        "in-memory" | "redis" => Ok(()),
        _ => {
            let mut err = ValidationError::new("cache_type");
            err.message = Some("Must be one of: in-memory, redis".into());
            Err(err)
        }
    }
}

/// Validates log level values
fn validate_log_level(level: &str) -> Result<(), ValidationError> {
    let valid_levels = ["trace", "debug", "info", "warn", "error"];
    if valid_levels.contains(&level.to_lowercase().as_str()) {
        Ok(())
    } else {
        let mut err = ValidationError::new("log_level");
        err.message = Some("Must be one of: trace, debug, info, warn, error".into());
        Err(err)
    }
}

fn validate_expiry_unit(unit: &str) -> Result<(), ValidationError> {
    match unit {
        "day" | "hour" | "minute" => Ok(()),
        _ => {
            let mut err = ValidationError::new("expiry_unit");
            err.message = Some("Must be one of: day, hour, minute".into());
            Err(err)
        }
    }
}

// The prefix is stripped from inbound references by length, so it must not
// itself end in the separator.
fn validate_order_id_prefix(prefix: &str) -> Result<(), ValidationError> {
    if prefix.ends_with('-') || prefix.chars().any(char::is_whitespace) {
        let mut err = ValidationError::new("order_id_prefix");
        err.message = Some("order_id_prefix must not contain whitespace or end with '-'".into());
        return Err(err);
    }
    Ok(())
}

/// Initializes tracing using the provided log level as the default filter
pub fn init_tracing(level: &str, json: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default_directive = format!("storefront_checkout={},tower_http=debug", level);
    let filter_directive = env::var("RUST_LOG")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(default_directive);

    let filter = EnvFilter::new(filter_directive);
    if json {
        let _ = fmt().with_env_filter(filter).json().try_init();
    } else {
        let _ = fmt().with_env_filter(filter).try_init();
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
    let run_env = env::var("RUN_ENV")
        .or_else(|_| env::var("APP_ENV"))
        .unwrap_or_else(|_| DEFAULT_ENV.to_string());
    info!("Loading configuration for environment: {}", run_env);

    if !Path::new(CONFIG_DIR).exists() {
        info!(
            "Config directory '{}' not found; relying on built-in defaults and environment variables",
            CONFIG_DIR
        );
    }

    // jwt_secret has no default; it must come from a file or APP__JWT_SECRET.
    let config = Config::builder()
        .set_default("database_url", "sqlite://storefront.db?mode=rwc")?
        .set_default("redis_url", "redis://localhost:6379")?
        .set_default("host", "0.0.0.0")?
        .set_default("port", i64::from(DEFAULT_PORT))?
        .set_default("environment", DEFAULT_ENV)?
        .set_default("log_level", DEFAULT_LOG_LEVEL)?
        .set_default("log_json", false)?
        .add_source(File::with_name(&format!("{}/default", CONFIG_DIR)).required(false))
        .add_source(File::with_name(&format!("{}/{}", CONFIG_DIR, run_env)).required(false))
        .add_source(Environment::with_prefix("APP").separator("__"))
        .build()?;

    if config.get_string("jwt_secret").is_err() {
        error!("JWT secret is not configured. Set APP__JWT_SECRET.");
        return Err(AppConfigError::Load(ConfigError::NotFound(
            "jwt_secret is required but not configured. Set APP__JWT_SECRET environment variable."
                .into(),
        )));
    }

    let app_config: AppConfig = config.try_deserialize()?;

    app_config.validate().map_err(|e| {
        error!("Configuration validation failed: {:?}", e);
        AppConfigError::Validation(e)
    })?;

    app_config.validate_additional_constraints().map_err(|e| {
        error!("Configuration security validation failed: {:?}", e);
        AppConfigError::Validation(e)
    })?;

    info!("Configuration loaded successfully");
    Ok(app_config)
}
