use serde_json::Value;
use std::collections::HashMap;
use time::OffsetDateTime;

use crate::entities::{credentials, mappings, providers};

#[derive(Debug, Clone)]
pub struct ProviderRow {
    pub id: i64,
    pub name: String,
    pub kind: String,
    pub base_url: String,
    pub config: Value,
    pub status: String,
    pub request_timeout_seconds: i32,
    pub max_in_flight_retries: i32,
}

impl ProviderRow {
    pub fn is_active(&self) -> bool {
        self.status == "active"
    }
}

impl From<providers::Model> for ProviderRow {
    fn from(m: providers::Model) -> Self {
        Self {
            id: m.id,
            name: m.name,
            kind: m.kind,
            base_url: m.base_url,
            config: m.config_json,
            status: m.status,
            request_timeout_seconds: m.request_timeout_seconds,
            max_in_flight_retries: m.max_in_flight_retries,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CredentialRow {
    pub id: i64,
    pub provider_id: i64,
    pub key_id: String,
    pub key_ciphertext: Vec<u8>,
    pub priority: i32,
    pub status: String,
    pub requests_per_minute: Option<i32>,
    pub tokens_per_minute: Option<i32>,
    pub daily_quota: Option<i64>,
    pub monthly_quota: Option<i64>,
    pub current_daily_usage: i64,
    pub current_monthly_usage: i64,
    pub consecutive_failures: i32,
    pub last_used_at: Option<OffsetDateTime>,
    pub last_failed_at: Option<OffsetDateTime>,
}

impl CredentialRow {
    pub fn is_active(&self) -> bool {
        self.status == "active"
    }
}

impl From<credentials::Model> for CredentialRow {
    fn from(m: credentials::Model) -> Self {
        Self {
            id: m.id,
            provider_id: m.provider_id,
            key_id: m.key_id,
            key_ciphertext: m.key_ciphertext,
            priority: m.priority,
            status: m.status,
            requests_per_minute: m.requests_per_minute,
            tokens_per_minute: m.tokens_per_minute,
            daily_quota: m.daily_quota,
            monthly_quota: m.monthly_quota,
            current_daily_usage: m.current_daily_usage,
            current_monthly_usage: m.current_monthly_usage,
            consecutive_failures: m.consecutive_failures,
            last_used_at: m.last_used_at,
            last_failed_at: m.last_failed_at,
        }
    }
}

#[derive(Debug, Clone)]
pub struct MappingRow {
    pub id: i64,
    pub alias_name: String,
    pub provider_id: i64,
    pub upstream_model: String,
    pub order_index: i32,
    pub is_default: bool,
    pub config_overlay: Value,
}

impl From<mappings::Model> for MappingRow {
    fn from(m: mappings::Model) -> Self {
        Self {
            id: m.id,
            alias_name: m.alias_name,
            provider_id: m.provider_id,
            upstream_model: m.upstream_model,
            order_index: m.order_index,
            is_default: m.is_default,
            config_overlay: m.config_overlay_json,
        }
    }
}

/// An immutable read of the provider/credential/mapping tables, handed to
/// the core for the duration of a single request.
#[derive(Debug, Clone, Default)]
pub struct StorageSnapshot {
    pub providers: HashMap<i64, ProviderRow>,
    pub credentials_by_provider: HashMap<i64, Vec<CredentialRow>>,
    pub mappings_by_alias: HashMap<String, Vec<MappingRow>>,
}
