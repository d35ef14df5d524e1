//! Application configuration loaded from environment variables.

use std::time::Duration;

use checkout::{CheckoutConfig, HttpGatewayConfig, RetryPolicy};
use secrecy::SecretString;

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Payment gateway settings.
#[derive(Debug, Clone)]
pub struct PaymentSettings {
    pub gateway_url: String,
    /// Without a partner key the in-memory gateway is used.
    pub partner_key: Option<SecretString>,
    pub merchant_id: String,
    pub timeout: Duration,
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl Default for PaymentSettings {
    fn default() -> Self {
        Self {
            gateway_url: "https://sandbox.tappaysdk.com".to_string(),
            partner_key: None,
            merchant_id: String::new(),
            timeout: Duration::from_secs(10),
            max_attempts: 3,
            backoff: Duration::from_millis(200),
        }
    }
}

/// Server configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST`, `PORT`: bind address (default `0.0.0.0:3000`)
/// - `RUST_LOG`: tracing filter directive (default `info`)
/// - `LOG_FORMAT`: `text` or `json`
/// - `DATABASE_URL`, `DATABASE_MAX_CONNECTIONS`: PostgreSQL; in-memory when unset
/// - `PAYMENT_GATEWAY_URL`, `PAYMENT_PARTNER_KEY`, `PAYMENT_MERCHANT_ID`
/// - `PAYMENT_TIMEOUT_MS`, `PAYMENT_MAX_ATTEMPTS`, `PAYMENT_BACKOFF_MS`
/// - `STORAGE_TIMEOUT_MS`: order transaction budget
/// - `CHECKOUT_LEGACY_RESPONSES`: `true` for plain-string error bodies
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub log_format: LogFormat,
    pub database_url: Option<String>,
    pub database_max_connections: u32,
    pub payment: PaymentSettings,
    pub storage_timeout: Duration,
    pub legacy_responses: bool,
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads configuration through `lookup`, falling back to defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let parse_ms = |key: &str, fallback: Duration| {
            lookup(key)
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_millis)
                .unwrap_or(fallback)
        };

        let payment = PaymentSettings {
            gateway_url: lookup("PAYMENT_GATEWAY_URL").unwrap_or(defaults.payment.gateway_url),
            partner_key: lookup("PAYMENT_PARTNER_KEY")
                .filter(|key| !key.is_empty())
                .map(SecretString::from),
            merchant_id: lookup("PAYMENT_MERCHANT_ID").unwrap_or(defaults.payment.merchant_id),
            timeout: parse_ms("PAYMENT_TIMEOUT_MS", defaults.payment.timeout),
            max_attempts: lookup("PAYMENT_MAX_ATTEMPTS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.payment.max_attempts),
            backoff: parse_ms("PAYMENT_BACKOFF_MS", defaults.payment.backoff),
        };

        Self {
            host: lookup("HOST").unwrap_or(defaults.host),
            port: lookup("PORT")
                .and_then(|p| p.parse().ok())
                .unwrap_or(defaults.port),
            log_level: lookup("RUST_LOG").unwrap_or(defaults.log_level),
            log_format: match lookup("LOG_FORMAT").as_deref() {
                Some("json") => LogFormat::Json,
                _ => LogFormat::Text,
            },
            database_url: lookup("DATABASE_URL").filter(|url| !url.is_empty()),
            database_max_connections: lookup("DATABASE_MAX_CONNECTIONS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.database_max_connections),
            payment,
            storage_timeout: parse_ms("STORAGE_TIMEOUT_MS", defaults.storage_timeout),
            legacy_responses: lookup("CHECKOUT_LEGACY_RESPONSES")
                .map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
                .unwrap_or(false),
        }
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Orchestrator settings derived from this configuration.
    pub fn checkout_config(&self) -> CheckoutConfig {
        CheckoutConfig {
            retry: RetryPolicy::with_attempts(self.payment.max_attempts, self.payment.backoff),
            storage_timeout: Some(self.storage_timeout),
        }
    }

    /// HTTP gateway settings, if a partner key is configured.
    pub fn gateway_config(&self) -> Option<HttpGatewayConfig> {
        self.payment
            .partner_key
            .clone()
            .map(|partner_key| HttpGatewayConfig {
                base_url: self.payment.gateway_url.clone(),
                partner_key,
                merchant_id: self.payment.merchant_id.clone(),
                timeout: self.payment.timeout,
            })
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            log_format: LogFormat::Text,
            database_url: None,
            database_max_connections: 10,
            payment: PaymentSettings::default(),
            storage_timeout: Duration::from_secs(5),
            legacy_responses: false,
        }
    }
}
