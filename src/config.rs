//! Environment-driven configuration, one struct per collaborator.
//!
//! Every sub-config reads its own variables in `from_env()` and checks them in
//! `validate()`; `AppConfig` only composes them.

use std::env;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    pub order_store: OrderStoreConfig,
    pub provisioning: ProvisioningConfig,
    pub identity: IdentityConfig,
    pub reconcile: ReconcileConfig,
    pub webhook: WebhookConfig,
    pub cache: CacheConfig,
}

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

/// Log format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Plain,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "INFO".to_string(),
            format: LogFormat::Plain,
        }
    }
}

/// Which order store adapter backs the service
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderStoreBackend {
    Http,
    Memory,
    Postgres,
}

impl FromStr for OrderStoreBackend {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "http" | "api" => Ok(OrderStoreBackend::Http),
            "memory" => Ok(OrderStoreBackend::Memory),
            "postgres" | "postgresql" => Ok(OrderStoreBackend::Postgres),
            _ => Err(ConfigError::InvalidValue("ORDER_STORE_BACKEND".to_string())),
        }
    }
}

/// Order store configuration
#[derive(Debug, Clone)]
pub struct OrderStoreConfig {
    pub backend: OrderStoreBackend,
    pub base_url: String,
    pub api_key: Option<String>,
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub database_url: Option<String>,
    pub max_connections: u32,
}

/// eSIM provisioning API configuration
#[derive(Debug, Clone)]
pub struct ProvisioningConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub timeout_secs: u64,
    /// Retries for idempotent reads only; order creation is never retried.
    pub max_retries: u32,
}

/// Identity provider configuration
#[derive(Debug, Clone)]
pub struct IdentityConfig {
    pub base_url: String,
    pub timeout_secs: u64,
    pub login_url: String,
}

/// Live or sandbox payments, forwarded to the provisioning API
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentMode {
    Test,
    Live,
}

impl PaymentMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMode::Test => "test",
            PaymentMode::Live => "live",
        }
    }
}

impl FromStr for PaymentMode {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "test" | "sandbox" => Ok(PaymentMode::Test),
            "live" | "production" => Ok(PaymentMode::Live),
            _ => Err(ConfigError::InvalidValue("PAYMENT_MODE".to_string())),
        }
    }
}

/// Reconciliation behaviour
#[derive(Debug, Clone)]
pub struct ReconcileConfig {
    pub payment_mode: PaymentMode,
    /// Age after which a `processing` lease may be reclaimed.
    pub stale_lease: Duration,
    pub success_path: String,
    pub dashboard_path: String,
    pub audit_buffer: usize,
    pub qr_backfill_interval: Duration,
    pub qr_backfill_max_attempts: u32,
    pub qr_backfill_queue: usize,
    pub plan_catalog_path: String,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            payment_mode: PaymentMode::Test,
            stale_lease: Duration::from_secs(900),
            success_path: "/payment/success".to_string(),
            dashboard_path: "/dashboard".to_string(),
            audit_buffer: 1024,
            qr_backfill_interval: Duration::from_secs(30),
            qr_backfill_max_attempts: 20,
            qr_backfill_queue: 256,
            plan_catalog_path: "config/plans".to_string(),
        }
    }
}

/// Payment webhook configuration
#[derive(Debug, Clone)]
pub struct WebhookConfig {
    pub secret: Option<String>,
    pub tolerance_secs: u64,
}

/// Redis configuration for the attempt guard
#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub redis_url: Option<String>,
    pub max_connections: u32,
    pub guard_ttl_secs: u64,
}

fn parse_env<T: FromStr>(key: &str, default: &str) -> Result<T, ConfigError> {
    env::var(key)
        .unwrap_or_else(|_| default.to_string())
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidValue(key.to_string()))
}

fn optional_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn validate_url(key: &str, url: &str) -> Result<(), ConfigError> {
    if !url.starts_with("http://") && !url.starts_with("https://") {
        return Err(ConfigError::InvalidValue(format!(
            "{} must be a valid URL",
            key
        )));
    }
    Ok(())
}

impl AppConfig {
    /// Read `.env` (when present) and then the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenv::dotenv();

        Ok(AppConfig {
            server: ServerConfig::from_env()?,
            logging: LoggingConfig::from_env()?,
            order_store: OrderStoreConfig::from_env()?,
            provisioning: ProvisioningConfig::from_env()?,
            identity: IdentityConfig::from_env()?,
            reconcile: ReconcileConfig::from_env()?,
            webhook: WebhookConfig::from_env()?,
            cache: CacheConfig::from_env()?,
        })
    }

    /// Validate the entire configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.server.validate()?;
        self.logging.validate()?;
        self.order_store.validate()?;
        self.provisioning.validate()?;
        self.identity.validate()?;
        self.reconcile.validate()?;
        self.cache.validate()?;

        Ok(())
    }
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(ServerConfig {
            host: env::var("SERVER_HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            port: parse_env("SERVER_PORT", "8000")?,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.port == 0 {
            return Err(ConfigError::InvalidValue(
                "SERVER_PORT cannot be 0".to_string(),
            ));
        }

        if self.host.is_empty() {
            return Err(ConfigError::InvalidValue(
                "SERVER_HOST cannot be empty".to_string(),
            ));
        }

        Ok(())
    }
}

impl LoggingConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(LoggingConfig {
            level: env::var("LOG_LEVEL").unwrap_or_else(|_| "INFO".to_string()),
            format: match env::var("LOG_FORMAT")
                .unwrap_or_else(|_| "plain".to_string())
                .as_str()
            {
                "json" => LogFormat::Json,
                _ => LogFormat::Plain,
            },
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let valid_levels = ["TRACE", "DEBUG", "INFO", "WARN", "ERROR"];
        if !valid_levels.contains(&self.level.to_uppercase().as_str()) {
            return Err(ConfigError::InvalidValue("LOG_LEVEL".to_string()));
        }

        Ok(())
    }
}

impl OrderStoreConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(OrderStoreConfig {
            backend: parse_env("ORDER_STORE_BACKEND", "http")?,
            base_url: env::var("ORDER_STORE_URL")
                .unwrap_or_else(|_| "https://api.roamjet.net".to_string()),
            api_key: optional_env("ORDER_STORE_API_KEY"),
            timeout_secs: parse_env("ORDER_STORE_TIMEOUT_SECS", "10")?,
            max_retries: parse_env("ORDER_STORE_MAX_RETRIES", "2")?,
            database_url: optional_env("DATABASE_URL"),
            max_connections: parse_env("DB_MAX_CONNECTIONS", "10")?,
        })
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        match self.backend {
            OrderStoreBackend::Http => validate_url("ORDER_STORE_URL", &self.base_url)?,
            OrderStoreBackend::Postgres => {
                if self.database_url.is_none() {
                    return Err(ConfigError::MissingVariable("DATABASE_URL".to_string()));
                }
            }
            OrderStoreBackend::Memory => {}
        }

        if self.timeout_secs == 0 {
            return Err(ConfigError::InvalidValue(
                "ORDER_STORE_TIMEOUT_SECS".to_string(),
            ));
        }

        Ok(())
    }
}

impl ProvisioningConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(ProvisioningConfig {
            base_url: env::var("PROVISIONING_API_URL")
                .unwrap_or_else(|_| "https://api.roamjet.net/esim".to_string()),
            api_key: optional_env("PROVISIONING_API_KEY"),
            timeout_secs: parse_env("PROVISIONING_TIMEOUT_SECS", "30")?,
            max_retries: parse_env("PROVISIONING_MAX_RETRIES", "2")?,
        })
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_url("PROVISIONING_API_URL", &self.base_url)?;
        if self.timeout_secs == 0 {
            return Err(ConfigError::InvalidValue(
                "PROVISIONING_TIMEOUT_SECS".to_string(),
            ));
        }
        Ok(())
    }
}

impl IdentityConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(IdentityConfig {
            base_url: env::var("IDENTITY_API_URL")
                .unwrap_or_else(|_| "https://api.roamjet.net".to_string()),
            timeout_secs: parse_env("IDENTITY_TIMEOUT_SECS", "10")?,
            login_url: env::var("LOGIN_URL").unwrap_or_else(|_| "/login".to_string()),
        })
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_url("IDENTITY_API_URL", &self.base_url)?;
        if self.login_url.is_empty() {
            return Err(ConfigError::InvalidValue("LOGIN_URL".to_string()));
        }
        Ok(())
    }
}

impl ReconcileConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = ReconcileConfig::default();
        Ok(ReconcileConfig {
            payment_mode: parse_env("PAYMENT_MODE", "test")?,
            stale_lease: Duration::from_secs(parse_env("RECONCILE_STALE_LEASE_SECS", "900")?),
            success_path: env::var("PAYMENT_SUCCESS_PATH").unwrap_or(defaults.success_path),
            dashboard_path: env::var("DASHBOARD_PATH").unwrap_or(defaults.dashboard_path),
            audit_buffer: parse_env("AUDIT_BUFFER_SIZE", "1024")?,
            qr_backfill_interval: Duration::from_secs(parse_env(
                "QR_BACKFILL_INTERVAL_SECS",
                "30",
            )?),
            qr_backfill_max_attempts: parse_env("QR_BACKFILL_MAX_ATTEMPTS", "20")?,
            qr_backfill_queue: parse_env("QR_BACKFILL_QUEUE_SIZE", "256")?,
            plan_catalog_path: env::var("PLAN_CATALOG_PATH")
                .unwrap_or(defaults.plan_catalog_path),
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.stale_lease.is_zero() {
            return Err(ConfigError::InvalidValue(
                "RECONCILE_STALE_LEASE_SECS".to_string(),
            ));
        }
        if self.audit_buffer == 0 || self.qr_backfill_queue == 0 {
            return Err(ConfigError::ValidationFailed(
                "queue sizes must be greater than zero".to_string(),
            ));
        }
        if !self.success_path.starts_with('/') {
            return Err(ConfigError::InvalidValue("PAYMENT_SUCCESS_PATH".to_string()));
        }
        Ok(())
    }
}

impl WebhookConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(WebhookConfig {
            secret: optional_env("PAYMENT_WEBHOOK_SECRET"),
            tolerance_secs: parse_env("PAYMENT_WEBHOOK_TOLERANCE_SECS", "300")?,
        })
    }
}

impl CacheConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(CacheConfig {
            redis_url: optional_env("REDIS_URL"),
            max_connections: parse_env("CACHE_MAX_CONNECTIONS", "10")?,
            guard_ttl_secs: parse_env("ATTEMPT_GUARD_TTL_SECS", "120")?,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(url) = &self.redis_url {
            // Basic validation of Redis URL format
            if !url.starts_with("redis://") && !url.starts_with("rediss://") {
                return Err(ConfigError::InvalidValue(
                    "REDIS_URL must start with redis:// or rediss://".to_string(),
                ));
            }
        }
        Ok(())
    }
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVariable(String),

    #[error("Invalid value for configuration: {0}")]
    InvalidValue(String),

    #[error("Validation failed: {0}")]
    ValidationFailed(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_config_validation() {
        let config = ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 8000,
        };

        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_port_validation() {
        let config = ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
        };

        assert!(config.validate().is_err());
    }

    #[test]
    fn payment_mode_parsing() {
        assert_eq!("sandbox".parse::<PaymentMode>().unwrap(), PaymentMode::Test);
        assert_eq!("LIVE".parse::<PaymentMode>().unwrap(), PaymentMode::Live);
        assert!("maybe".parse::<PaymentMode>().is_err());
    }

    #[test]
    fn postgres_backend_requires_database_url() {
        let config = OrderStoreConfig {
            backend: OrderStoreBackend::Postgres,
            base_url: String::new(),
            api_key: None,
            timeout_secs: 10,
            max_retries: 0,
            database_url: None,
            max_connections: 5,
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingVariable(_))
        ));
    }

    #[test]
    fn reconcile_defaults_are_valid() {
        let config = ReconcileConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.stale_lease, Duration::from_secs(15 * 60));
    }

    #[test]
    fn redis_url_scheme_is_checked() {
        let config = CacheConfig {
            redis_url: Some("http://localhost".to_string()),
            max_connections: 1,
            guard_ttl_secs: 60,
        };
        assert!(config.validate().is_err());
    }
}
