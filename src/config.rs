use config::{Config, ConfigError, Environment, File};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
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
const DEFAULT_SITE_URL: &str = "http://localhost:8000";
const DEFAULT_SHIPPING_CACHE_TTL_SECS: u64 = 3600;
const DEFAULT_GATEWAY_TIMEOUT_SECS: u64 = 30;
const DEFAULT_BKASH_BASE_URL: &str = "https://tokenized.sandbox.bka.sh/v1.2.0-beta";

/// Shipping fee resolution settings
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct ShippingConfig {
    /// Fee used when neither the city nor a default row matches
    #[serde(default = "default_fallback_fee")]
    #[validate(custom = "validate_non_negative")]
    pub fallback_fee: Decimal,

    /// How long a resolved fee stays cached
    #[serde(default = "default_shipping_cache_ttl_secs")]
    #[validate(range(min = 1, max = 86400))]
    pub cache_ttl_secs: u64,
}

impl Default for ShippingConfig {
    fn default() -> Self {
        Self {
            fallback_fee: default_fallback_fee(),
            cache_ttl_secs: default_shipping_cache_ttl_secs(),
        }
    }
}

impl ShippingConfig {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }
}

/// bKash tokenized checkout credentials
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BkashConfig {
    #[serde(default = "default_bkash_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub app_key: String,
    #[serde(default)]
    pub app_secret: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

impl BkashConfig {
    pub fn is_configured(&self) -> bool {
        !self.app_key.is_empty() && !self.app_secret.is_empty()
    }
}

/// SSLCommerz store credentials
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SslCommerzConfig {
    #[serde(default)]
    pub store_id: String,
    #[serde(default)]
    pub store_password: String,
    #[serde(default = "default_true_bool")]
    pub sandbox: bool,
    /// Overrides the sandbox/live host, mostly for tests
    #[serde(default)]
    pub base_url: Option<String>,
}

impl Default for SslCommerzConfig {
    fn default() -> Self {
        Self {
            store_id: String::new(),
            store_password: String::new(),
            sandbox: true,
            base_url: None,
        }
    }
}

impl SslCommerzConfig {
    pub fn base_url(&self) -> String {
        match &self.base_url {
            Some(url) if !url.trim().is_empty() => url.trim_end_matches('/').to_string(),
            _ if self.sandbox => "https://sandbox.sslcommerz.com".to_string(),
            _ => "https://securepay.sslcommerz.com".to_string(),
        }
    }
}

/// Outbound payment gateway settings
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct PaymentGatewaysConfig {
    /// Upper bound for every gateway HTTP call
    #[serde(default = "default_gateway_timeout_secs")]
    #[validate(range(min = 1, max = 120))]
    pub timeout_secs: u64,

    /// Require a valid SSLCommerz signature on browser redirects even when a val_id is present
    #[serde(default)]
    pub require_signed_redirects: bool,

    #[serde(default)]
    pub bkash: BkashConfig,

    #[serde(default)]
    pub sslcommerz: SslCommerzConfig,
}

impl Default for PaymentGatewaysConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_gateway_timeout_secs(),
            require_signed_redirects: false,
            bkash: BkashConfig {
                base_url: default_bkash_base_url(),
                ..Default::default()
            },
            sslcommerz: SslCommerzConfig::default(),
        }
    }
}

impl PaymentGatewaysConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Rental policy, injected into the rental service at construction time
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct RentalSettings {
    #[serde(default = "default_security_deposit_percentage")]
    #[validate(custom = "validate_percentage")]
    pub security_deposit_percentage: Decimal,

    #[serde(default = "default_daily_late_fee")]
    #[validate(custom = "validate_non_negative")]
    pub daily_late_fee: Decimal,

    #[serde(default = "default_max_active_rentals")]
    #[validate(range(min = 1))]
    pub max_active_rentals_per_user: u32,

    #[serde(default = "default_max_renewals")]
    pub max_renewals: u32,

    /// Rentals due within this many days count as due soon
    #[serde(default = "default_due_soon_days")]
    pub due_soon_days: u32,

    #[serde(default = "default_min_stock_for_rental")]
    #[validate(range(min = 1))]
    pub min_stock_for_rental: i32,

    #[serde(default = "default_true_bool")]
    pub enable_notifications: bool,

    /// How often the server marks lapsed rentals overdue
    #[serde(default = "default_overdue_sweep_interval_secs")]
    #[validate(range(min = 1))]
    pub overdue_sweep_interval_secs: u64,
}

impl RentalSettings {
    pub fn overdue_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.overdue_sweep_interval_secs)
    }
}

impl Default for RentalSettings {
    fn default() -> Self {
        Self {
            security_deposit_percentage: default_security_deposit_percentage(),
            daily_late_fee: default_daily_late_fee(),
            max_active_rentals_per_user: default_max_active_rentals(),
            max_renewals: default_max_renewals(),
            due_soon_days: default_due_soon_days(),
            min_stock_for_rental: default_min_stock_for_rental(),
            enable_notifications: true,
            overdue_sweep_interval_secs: default_overdue_sweep_interval_secs(),
        }
    }
}

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

    /// Public base URL used to build gateway callback URLs
    #[serde(default = "default_site_url")]
    #[validate(url)]
    pub site_url: String,

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

    /// Shared secret staff tools send as `x-staff-key`; staff routes are closed while unset
    #[serde(default)]
    #[validate(length(min = 16))]
    pub staff_api_key: Option<String>,

    /// Event channel capacity for async event processing
    #[serde(default = "default_event_channel_capacity")]
    #[validate(custom = "validate_event_channel_capacity")]
    pub event_channel_capacity: usize,

    #[serde(default)]
    #[validate]
    pub shipping: ShippingConfig,

    #[serde(default)]
    #[validate]
    pub payments: PaymentGatewaysConfig,

    #[serde(default)]
    #[validate]
    pub rentals: RentalSettings,
}

impl AppConfig {
    /// Creates a configuration with defaults for everything but the essentials
    pub fn new(database_url: String, host: String, port: u16, environment: String) -> Self {
        Self {
            database_url,
            host,
            port,
            environment,
            site_url: default_site_url(),
            log_level: default_log_level(),
            log_json: false,
            auto_migrate: false,
            cors_allowed_origins: None,
            cors_allow_any_origin: false,
            db_max_connections: default_db_max_connections(),
            db_min_connections: default_db_min_connections(),
            db_connect_timeout_secs: default_db_connect_timeout_secs(),
            db_idle_timeout_secs: default_db_idle_timeout_secs(),
            db_acquire_timeout_secs: default_db_acquire_timeout_secs(),
            staff_api_key: None,
            event_channel_capacity: default_event_channel_capacity(),
            shipping: ShippingConfig::default(),
            payments: PaymentGatewaysConfig::default(),
            rentals: RentalSettings::default(),
        }
    }

    /// Gets database URL reference
    pub fn database_url(&self) -> &str {
        &self.database_url
    }

    /// Checks if running in production environment
    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
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

    /// Joins a path onto `site_url`, e.g. a gateway callback route
    pub fn site_link(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.site_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
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

        if self.is_production() && self.payments.sslcommerz.sandbox {
            let mut err = ValidationError::new("sslcommerz_sandbox_in_production");
            err.message =
                Some("Set APP__PAYMENTS__SSLCOMMERZ__SANDBOX=false in production".into());
            errors.add("payments", err);
        }

        if errors.errors().is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Gets log level reference
    pub fn log_level(&self) -> &str {
        &self.log_level
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum AppConfigError {
    #[error("Configuration loading failed: {0}")]
    Load(#[from] ConfigError),

    #[error("Configuration validation failed: {0}")]
    Validation(#[from] validator::ValidationErrors),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_site_url() -> String {
    DEFAULT_SITE_URL.to_string()
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

fn default_true_bool() -> bool {
    true
}

fn default_event_channel_capacity() -> usize {
    1024
}

fn default_fallback_fee() -> Decimal {
    dec!(120)
}

fn default_shipping_cache_ttl_secs() -> u64 {
    DEFAULT_SHIPPING_CACHE_TTL_SECS
}

fn default_gateway_timeout_secs() -> u64 {
    DEFAULT_GATEWAY_TIMEOUT_SECS
}

fn default_bkash_base_url() -> String {
    DEFAULT_BKASH_BASE_URL.to_string()
}

fn default_security_deposit_percentage() -> Decimal {
    dec!(20)
}

fn default_daily_late_fee() -> Decimal {
    dec!(10)
}

fn default_max_active_rentals() -> u32 {
    3
}

fn default_max_renewals() -> u32 {
    3
}

fn default_due_soon_days() -> u32 {
    3
}

fn default_min_stock_for_rental() -> i32 {
    1
}

fn default_overdue_sweep_interval_secs() -> u64 {
    3600
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

fn validate_event_channel_capacity(capacity: usize) -> Result<(), ValidationError> {
    if capacity == 0 {
        let mut err = ValidationError::new("event_channel_capacity");
        err.message = Some("event_channel_capacity must be greater than 0".into());
        return Err(err);
    }
    Ok(())
}

fn validate_non_negative(value: &Decimal) -> Result<(), ValidationError> {
    if value.is_sign_negative() && !value.is_zero() {
        let mut err = ValidationError::new("non_negative");
        err.message = Some("must not be negative".into());
        return Err(err);
    }
    Ok(())
}

fn validate_percentage(value: &Decimal) -> Result<(), ValidationError> {
    if *value < Decimal::ZERO || *value > dec!(100) {
        let mut err = ValidationError::new("percentage");
        err.message = Some("must be between 0 and 100".into());
        return Err(err);
    }
    Ok(())
}

/// Initializes tracing using the provided log level as the default filter
pub fn init_tracing(level: &str, json: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default_directive = format!("bookstore_api={},tower_http=debug", level);
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
    // Support both RUN_ENV and APP_ENV for selecting config profile
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

    let config = Config::builder()
        .set_default("database_url", "sqlite://bookstore.db?mode=rwc")?
        .set_default("host", "0.0.0.0")?
        .set_default("port", DEFAULT_PORT as i64)?
        .set_default("environment", DEFAULT_ENV)?
        .set_default("log_level", DEFAULT_LOG_LEVEL)?
        .set_default("log_json", false)?
        .add_source(File::with_name(&format!("{}/default", CONFIG_DIR)).required(false))
        .add_source(File::with_name(&format!("{}/{}", CONFIG_DIR, run_env)).required(false))
        .add_source(Environment::with_prefix("APP").separator("__"))
        .build()?;

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
