//! Shared configuration and id types used across the workspace.

use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum GlobalConfigError {
    #[error("missing required global config field: {0}")]
    MissingField(&'static str),
}

/// Sliding-window / quota knobs, merged CLI > ENV > DB.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    pub global_rpm: u32,
    pub global_tpm: u32,
    pub per_key_rpm: u32,
    pub per_key_tpm: u32,
    pub per_address_rpm: u32,
    pub window_seconds: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            global_rpm: 6000,
            global_tpm: 2_000_000,
            per_key_rpm: 600,
            per_key_tpm: 200_000,
            per_address_rpm: 300,
            window_seconds: 60,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub recovery_timeout_seconds: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout_seconds: 60,
        }
    }
}

/// Final, merged global configuration used by the running process.
///
/// Merge order (after DB connection): CLI > ENV > DB, then persist back to DB.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalConfig {
    pub host: String,
    pub port: u16,
    pub dsn: String,
    /// Base64 32-byte key, or a passphrase to derive one from.
    pub encryption_secret: String,
    pub max_fallback_attempts: u32,
    pub default_upstream_timeout_seconds: u64,
    pub rate_limit: RateLimitConfig,
    pub circuit_breaker: CircuitBreakerConfig,
}

/// Optional layer used for merging global config.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GlobalConfigPatch {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub dsn: Option<String>,
    pub encryption_secret: Option<String>,
    pub max_fallback_attempts: Option<u32>,
    pub default_upstream_timeout_seconds: Option<u64>,
    pub rate_limit: Option<RateLimitConfig>,
    pub circuit_breaker: Option<CircuitBreakerConfig>,
}

impl GlobalConfigPatch {
    pub fn overlay(&mut self, other: GlobalConfigPatch) {
        if other.host.is_some() {
            self.host = other.host;
        }
        if other.port.is_some() {
            self.port = other.port;
        }
        if other.dsn.is_some() {
            self.dsn = other.dsn;
        }
        if other.encryption_secret.is_some() {
            self.encryption_secret = other.encryption_secret;
        }
        if other.max_fallback_attempts.is_some() {
            self.max_fallback_attempts = other.max_fallback_attempts;
        }
        if other.default_upstream_timeout_seconds.is_some() {
            self.default_upstream_timeout_seconds = other.default_upstream_timeout_seconds;
        }
        if other.rate_limit.is_some() {
            self.rate_limit = other.rate_limit;
        }
        if other.circuit_breaker.is_some() {
            self.circuit_breaker = other.circuit_breaker;
        }
    }

    pub fn into_config(self) -> Result<GlobalConfig, GlobalConfigError> {
        Ok(GlobalConfig {
            host: self.host.unwrap_or_else(|| "0.0.0.0".to_string()),
            port: self.port.unwrap_or(8080),
            dsn: self.dsn.ok_or(GlobalConfigError::MissingField("dsn"))?,
            encryption_secret: self
                .encryption_secret
                .ok_or(GlobalConfigError::MissingField("encryption_secret"))?,
            max_fallback_attempts: self.max_fallback_attempts.unwrap_or(3),
            default_upstream_timeout_seconds: self
                .default_upstream_timeout_seconds
                .unwrap_or(30),
            rate_limit: self.rate_limit.unwrap_or_default(),
            circuit_breaker: self.circuit_breaker.unwrap_or_default(),
        })
    }
}

impl From<GlobalConfig> for GlobalConfigPatch {
    fn from(value: GlobalConfig) -> Self {
        Self {
            host: Some(value.host),
            port: Some(value.port),
            dsn: Some(value.dsn),
            encryption_secret: Some(value.encryption_secret),
            max_fallback_attempts: Some(value.max_fallback_attempts),
            default_upstream_timeout_seconds: Some(value.default_upstream_timeout_seconds),
            rate_limit: Some(value.rate_limit),
            circuit_breaker: Some(value.circuit_breaker),
        }
    }
}

pub type ProviderId = i64;
pub type CredentialId = i64;
pub type MappingId = i64;
pub type UserId = i64;
