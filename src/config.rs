//! Service configuration loaded from `HEARTH_*` environment variables

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;
use tracing::Level;

use crate::moderation::DEFAULT_REPORT_THRESHOLD;
use crate::notify::PushGatewayConfig;
use crate::store::RetryPolicy;
use crate::trust::TrustPolicy;

/// Configuration for the hearth functions service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub security: SecurityConfig,
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    pub moderation: ModerationConfig,
    /// Score bounds and delta magnitudes
    pub trust: TrustPolicy,
    /// Retry policy for conflicting transactions
    pub transactions: RetryPolicy,
    pub push: PushConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Server host to bind to
    pub host: String,
    /// Server port to bind to
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    /// Enable API key authentication
    pub enable_auth: bool,
    /// Accepted API keys
    pub api_keys: Vec<String>,
    /// Maximum request body size in bytes
    pub max_request_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub postgres_url: String,
    /// Enable PostgreSQL (if false, uses the in-memory store)
    pub postgres_enabled: bool,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (error, warn, info, debug, trace)
    pub level: String,
    /// Log HTTP requests (may contain user identifiers)
    pub log_requests: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModerationConfig {
    /// Reports needed before content is hidden automatically
    pub report_threshold: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushConfig {
    /// Push gateway endpoint; notifications are only logged when unset
    pub gateway_url: Option<String>,
    pub gateway_api_key: Option<String>,
    pub timeout_secs: u64,
}

impl PushConfig {
    pub fn gateway(&self) -> Option<PushGatewayConfig> {
        self.gateway_url.as_ref().map(|url| PushGatewayConfig {
            url: url.clone(),
            api_key: self.gateway_api_key.clone(),
            timeout_secs: self.timeout_secs,
        })
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8080,
            },
            security: SecurityConfig {
                enable_auth: true,
                api_keys: Vec::new(), // MUST be configured when auth is enabled
                max_request_size: 256 * 1024,
            },
            database: DatabaseConfig {
                postgres_url: "postgresql://localhost:5432/hearth".to_string(),
                postgres_enabled: false,
                max_connections: 10,
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                log_requests: false,
            },
            moderation: ModerationConfig {
                report_threshold: DEFAULT_REPORT_THRESHOLD,
            },
            trust: TrustPolicy::default(),
            transactions: RetryPolicy::default(),
            push: PushConfig {
                gateway_url: None,
                gateway_api_key: None,
                timeout_secs: 10,
            },
        }
    }
}

fn parse_var<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Result<Option<T>>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(name) {
        Some(raw) => {
            let value = raw
                .trim()
                .parse::<T>()
                .with_context(|| format!("Invalid {} value", name))?;
            Ok(Some(value))
        }
        None => Ok(None),
    }
}

impl AppConfig {
    /// Load configuration from `HEARTH_*` environment variables and validate it
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Same as [`AppConfig::from_env`] with an explicit variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(host) = lookup("HEARTH_HOST") {
            config.server.host = host;
        }
        if let Some(port) = parse_var(&lookup, "HEARTH_PORT")? {
            config.server.port = port;
        }

        if let Some(enable_auth) = parse_var(&lookup, "HEARTH_ENABLE_AUTH")? {
            config.security.enable_auth = enable_auth;
        }
        if let Some(keys) = lookup("HEARTH_API_KEYS") {
            config.security.api_keys = keys
                .split(',')
                .map(|k| k.trim().to_string())
                .filter(|k| !k.is_empty())
                .collect();
        }
        if let Some(size) = parse_var(&lookup, "HEARTH_MAX_REQUEST_SIZE")? {
            config.security.max_request_size = size;
        }

        if let Some(url) = lookup("HEARTH_POSTGRES_URL") {
            config.database.postgres_url = url;
        }
        if let Some(enabled) = parse_var(&lookup, "HEARTH_POSTGRES_ENABLED")? {
            config.database.postgres_enabled = enabled;
        }
        if let Some(max) = parse_var(&lookup, "HEARTH_POSTGRES_MAX_CONNECTIONS")? {
            config.database.max_connections = max;
        }

        if let Some(level) = lookup("HEARTH_LOG_LEVEL") {
            config.logging.level = level;
        }
        if let Some(log_requests) = parse_var(&lookup, "HEARTH_LOG_REQUESTS")? {
            config.logging.log_requests = log_requests;
        }

        if let Some(threshold) = parse_var(&lookup, "HEARTH_REPORT_THRESHOLD")? {
            config.moderation.report_threshold = threshold;
        }
        if let Some(initial) = parse_var(&lookup, "HEARTH_TRUST_INITIAL_SCORE")? {
            config.trust.initial_score = initial;
        }
        if let Some(max) = parse_var(&lookup, "HEARTH_TRUST_ADMIN_MAX_ADJUSTMENT")? {
            config.trust.admin_max_adjustment = max;
        }

        if let Some(attempts) = parse_var(&lookup, "HEARTH_TXN_MAX_ATTEMPTS")? {
            config.transactions.max_attempts = attempts;
        }
        if let Some(backoff) = parse_var(&lookup, "HEARTH_TXN_BACKOFF_MS")? {
            config.transactions.backoff_ms = backoff;
        }

        config.push.gateway_url = lookup("HEARTH_PUSH_GATEWAY_URL").filter(|u| !u.trim().is_empty());
        config.push.gateway_api_key = lookup("HEARTH_PUSH_GATEWAY_API_KEY").filter(|k| !k.is_empty());
        if let Some(timeout) = parse_var(&lookup, "HEARTH_PUSH_TIMEOUT_SECS")? {
            config.push.timeout_secs = timeout;
        }

        config.validate()?;
        Ok(config)
    }

    /// Operator-facing notices about the loaded configuration, logged once
    /// logging is up
    pub fn startup_notices(&self) -> Vec<(Level, &'static str)> {
        let mut notices = Vec::new();
        if !self.security.enable_auth {
            notices.push((
                Level::WARN,
                "API authentication disabled - only use behind a trusted gateway",
            ));
        }
        if self.push.gateway_url.is_none() {
            notices.push((
                Level::INFO,
                "HEARTH_PUSH_GATEWAY_URL not set, push notifications will only be logged",
            ));
        }
        notices
    }

    /// Validate configuration for security and consistency
    pub fn validate(&self) -> Result<()> {
        if self.server.host.is_empty() {
            return Err(anyhow::anyhow!("Server host cannot be empty"));
        }

        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port must be non-zero"));
        }

        if self.security.enable_auth {
            if self.security.api_keys.is_empty() {
                return Err(anyhow::anyhow!(
                    "HEARTH_API_KEYS is required when authentication is enabled"
                ));
            }
            if self.security.api_keys.iter().any(|k| k.len() < 16) {
                return Err(anyhow::anyhow!(
                    "API keys are too short (minimum 16 characters)"
                ));
            }
        }

        if self.security.max_request_size == 0 {
            return Err(anyhow::anyhow!("Maximum request size must be non-zero"));
        }

        if self.database.postgres_enabled && self.database.postgres_url.is_empty() {
            return Err(anyhow::anyhow!(
                "PostgreSQL is enabled but no connection URL is configured"
            ));
        }

        if self.database.max_connections == 0 {
            return Err(anyhow::anyhow!("PostgreSQL max connections must be non-zero"));
        }

        if self.moderation.report_threshold == 0 {
            return Err(anyhow::anyhow!("Report threshold must be at least 1"));
        }

        self.trust
            .validate()
            .map_err(|e| anyhow::anyhow!("Invalid trust policy: {}", e))?;

        if self.transactions.max_attempts == 0 {
            return Err(anyhow::anyhow!("Transaction max attempts must be at least 1"));
        }

        if self.push.gateway_url.is_some() && self.push.timeout_secs == 0 {
            return Err(anyhow::anyhow!("Push gateway timeout must be non-zero"));
        }

        Ok(())
    }
}

/// Mask a secret for logging, keeping only its first and last characters
pub fn sanitize_for_logging(secret: &str) -> String {
    let chars: Vec<char> = secret.chars().collect();
    let keep = if chars.len() > 20 { 4 } else { 2 };
    if chars.len() <= keep * 2 {
        return "***".to_string();
    }

    let head: String = chars[..keep].iter().collect();
    let tail: String = chars[chars.len() - keep..].iter().collect();
    format!("{}***{}", head, tail)
}
