use std::sync::Arc;

use modelgate_storage::{AuditRecordInput, Storage};
use serde::Serialize;
use tracing::warn;

use crate::fallback::AttemptRecord;

/// Everything the ingress layer knows about a finished request that the
/// Audit Recorder needs.
#[derive(Debug, Clone)]
pub struct AuditContext {
    pub request_id: String,
    pub client_addr: Option<String>,
    pub user_agent: Option<String>,
    pub endpoint: String,
    pub method: String,
    pub model_alias: String,
    pub status: u16,
    pub latency_ms: u64,
    pub prompt_tokens: Option<u32>,
    pub completion_tokens: Option<u32>,
    pub error_class: Option<String>,
}

#[derive(Debug, Serialize)]
struct AttemptJson {
    provider_id: Option<i64>,
    provider_name: Option<String>,
    key_id: Option<String>,
    error_class: Option<String>,
    status_code: Option<u16>,
    latency_ms: u64,
    success: bool,
}

impl From<&AttemptRecord> for AttemptJson {
    fn from(a: &AttemptRecord) -> Self {
        Self {
            provider_id: a.provider_id,
            provider_name: a.provider_name.clone(),
            key_id: a.key_id.clone(),
            error_class: a.error_class.map(|c| c.as_str().to_string()),
            status_code: a.status_code,
            latency_ms: a.latency_ms,
            success: a.success,
        }
    }
}

/// Writes exactly one record per completed request. Emission failures are
/// logged, never propagated: an audit outage must not turn into a
/// client-facing 5xx.
pub struct AuditRecorder {
    storage: Arc<dyn Storage>,
}

impl AuditRecorder {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    pub async fn record(&self, ctx: AuditContext, attempts: &[AttemptRecord]) {
        let attempts_json = attempts.iter().map(AttemptJson::from).collect::<Vec<_>>();
        let input = AuditRecordInput {
            request_id: ctx.request_id.clone(),
            client_addr: ctx.client_addr,
            user_agent: ctx.user_agent,
            endpoint: ctx.endpoint,
            method: ctx.method,
            model_alias: ctx.model_alias,
            status: ctx.status as i32,
            latency_ms: ctx.latency_ms as i64,
            prompt_tokens: ctx.prompt_tokens.map(|v| v as i32),
            completion_tokens: ctx.completion_tokens.map(|v| v as i32),
            error_class: ctx.error_class,
            attempts: serde_json::to_value(attempts_json).unwrap_or(serde_json::Value::Null),
        };

        if let Err(err) = self.storage.insert_audit_record(input).await {
            warn!(request_id = %ctx.request_id, error = %err, "failed to persist audit record");
        }
    }
}
