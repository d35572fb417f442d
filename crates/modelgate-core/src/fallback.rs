use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use modelgate_common::{CredentialId, ProviderId};
use modelgate_provider_core::{
    ChunkStream, ErrorClass, NormalizedRequest, ProviderOutcome, ProviderRegistry, StreamChunk,
};

use crate::circuit_breaker::CircuitBreaker;
use crate::credential_store::{CredentialStore, SelectionStrategy};
use crate::resolver::ModelResolver;

const MAX_KEY_ATTEMPTS: u32 = 3;

/// One recorded hop across providers/credentials.
#[derive(Debug, Clone)]
pub struct AttemptRecord {
    pub provider_id: Option<ProviderId>,
    pub provider_name: Option<String>,
    pub key_id: Option<String>,
    pub error_class: Option<ErrorClass>,
    pub error_message: Option<String>,
    pub status_code: Option<u16>,
    pub latency_ms: u64,
    pub success: bool,
}

/// Wraps a provider's chunk sequence so usage/circuit-breaker crediting
/// happens at stream close rather than when the stream handle is first
/// returned: a mid-stream upstream failure must not get recorded as a
/// circuit-breaker success. Credits exactly once, on the first
/// `Done`/error/exhaustion.
struct CreditingChunkStream {
    inner: Box<dyn ChunkStream>,
    credentials: Arc<CredentialStore>,
    circuit_breaker: Arc<CircuitBreaker>,
    provider_id: ProviderId,
    credential_id: CredentialId,
    credited: bool,
}

#[async_trait]
impl ChunkStream for CreditingChunkStream {
    async fn next_chunk(
        &mut self,
    ) -> Option<Result<StreamChunk, modelgate_provider_core::ProviderError>> {
        let next = self.inner.next_chunk().await;
        if self.credited {
            return next;
        }
        match &next {
            Some(Ok(StreamChunk::Done { usage, .. })) => {
                let tokens = usage.map(|u| u.total_tokens as i64).unwrap_or(0);
                let _ = self.credentials.record(self.credential_id, tokens, true).await;
                self.circuit_breaker.record_success(self.provider_id).await;
                self.credited = true;
            }
            Some(Err(_)) => {
                let _ = self.credentials.record(self.credential_id, 0, false).await;
                self.circuit_breaker.record_failure(self.provider_id).await;
                self.credited = true;
            }
            None => {
                let _ = self.credentials.record(self.credential_id, 0, true).await;
                self.circuit_breaker.record_success(self.provider_id).await;
                self.credited = true;
            }
            Some(Ok(StreamChunk::Delta { .. })) => {}
        }
        next
    }
}

pub struct FallbackResult {
    pub success: bool,
    pub response: Option<ProviderOutcome>,
    pub attempts: Vec<AttemptRecord>,
    pub total_latency_ms: u64,
    pub final_provider_id: Option<ProviderId>,
    pub final_key_id: Option<String>,
}

/// Drives a model alias across its resolved provider chain, applying
/// credential selection, circuit-breaker checks, and the error-class retry
/// policy.
pub struct FallbackExecutor {
    resolver: Arc<ModelResolver>,
    credentials: Arc<CredentialStore>,
    circuit_breaker: Arc<CircuitBreaker>,
    registry: Arc<ProviderRegistry>,
    max_fallback_attempts: u32,
    upstream_timeout: Duration,
}

impl FallbackExecutor {
    pub fn new(
        resolver: Arc<ModelResolver>,
        credentials: Arc<CredentialStore>,
        circuit_breaker: Arc<CircuitBreaker>,
        registry: Arc<ProviderRegistry>,
        max_fallback_attempts: u32,
        upstream_timeout: Duration,
    ) -> Self {
        Self {
            resolver,
            credentials,
            circuit_breaker,
            registry,
            max_fallback_attempts,
            upstream_timeout,
        }
    }

    pub async fn execute(&self, alias: &str, request: &NormalizedRequest) -> FallbackResult {
        let start = Instant::now();
        let mut attempts = Vec::new();

        let Ok(targets) = self.resolver.resolve(alias) else {
            return FallbackResult {
                success: false,
                response: None,
                attempts,
                total_latency_ms: 0,
                final_provider_id: None,
                final_key_id: None,
            };
        };

        let mut budget = self.max_fallback_attempts;

        'providers: for target in targets {
            if budget == 0 {
                break;
            }

            if !self.circuit_breaker.admit(target.provider_id).await {
                attempts.push(AttemptRecord {
                    provider_id: Some(target.provider_id),
                    provider_name: Some(target.provider_name.clone()),
                    key_id: None,
                    error_class: Some(ErrorClass::CircuitBreakerOpen),
                    error_message: Some("circuit breaker is open".to_string()),
                    status_code: None,
                    latency_ms: 0,
                    success: false,
                });
                budget -= 1;
                continue;
            }

            let Some(provider) =
                self.registry
                    .build(&target.provider_kind, &target.base_url, &target.config_overlay)
            else {
                attempts.push(AttemptRecord {
                    provider_id: Some(target.provider_id),
                    provider_name: Some(target.provider_name.clone()),
                    key_id: None,
                    error_class: Some(ErrorClass::UnknownError),
                    error_message: Some(format!("unknown provider kind {}", target.provider_kind)),
                    status_code: None,
                    latency_ms: 0,
                    success: false,
                });
                budget -= 1;
                continue;
            };

            let overlay: std::collections::HashMap<String, serde_json::Value> =
                target
                    .config_overlay
                    .as_object()
                    .map(|m| m.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
                    .unwrap_or_default();
            let effective_request = request.with_overlay(&target.upstream_model, &overlay);

            let mut key_attempts = 0u32;
            let mut tried_credentials = Vec::new();
            while key_attempts < MAX_KEY_ATTEMPTS && budget > 0 {
                let credential = match self
                    .credentials
                    .select(target.provider_id, SelectionStrategy::Priority, &tried_credentials)
                    .await
                {
                    Ok(row) => row,
                    Err(_) => {
                        // Record only the first exhaustion for this provider.
                        if tried_credentials.is_empty() {
                            attempts.push(AttemptRecord {
                                provider_id: Some(target.provider_id),
                                provider_name: Some(target.provider_name.clone()),
                                key_id: None,
                                error_class: Some(ErrorClass::NoAvailableKeys),
                                error_message: Some("no available API keys".to_string()),
                                status_code: None,
                                latency_ms: 0,
                                success: false,
                            });
                            budget -= 1;
                        }
                        break;
                    }
                };

                let decrypted = match self.credentials.decrypt(&credential) {
                    Ok(d) => d,
                    Err(e) => {
                        attempts.push(AttemptRecord {
                            provider_id: Some(target.provider_id),
                            provider_name: Some(target.provider_name.clone()),
                            key_id: Some(credential.key_id.clone()),
                            error_class: Some(ErrorClass::UnknownError),
                            error_message: Some(e.to_string()),
                            status_code: None,
                            latency_ms: 0,
                            success: false,
                        });
                        break 'providers;
                    }
                };

                let attempt_start = Instant::now();
                let outcome = if effective_request.is_chat() {
                    provider.chat(&effective_request, &decrypted, self.upstream_timeout).await
                } else {
                    provider.completion(&effective_request, &decrypted, self.upstream_timeout).await
                };
                let latency_ms = attempt_start.elapsed().as_millis() as u64;

                match outcome {
                    Ok(response) => {
                        let response = match response {
                            ProviderOutcome::Response(normalized) => {
                                let tokens = normalized.usage.total_tokens as i64;
                                let _ = self.credentials.record(credential.id, tokens, true).await;
                                self.circuit_breaker.record_success(target.provider_id).await;
                                ProviderOutcome::Response(normalized)
                            }
                            ProviderOutcome::Stream(chunk_stream) => {
                                // Crediting happens when the stream actually closes, not here.
                                ProviderOutcome::Stream(Box::new(CreditingChunkStream {
                                    inner: chunk_stream,
                                    credentials: self.credentials.clone(),
                                    circuit_breaker: self.circuit_breaker.clone(),
                                    provider_id: target.provider_id,
                                    credential_id: credential.id,
                                    credited: false,
                                }))
                            }
                        };
                        attempts.push(AttemptRecord {
                            provider_id: Some(target.provider_id),
                            provider_name: Some(target.provider_name.clone()),
                            key_id: Some(credential.key_id.clone()),
                            error_class: None,
                            error_message: None,
                            status_code: Some(200),
                            latency_ms,
                            success: true,
                        });
                        return FallbackResult {
                            success: true,
                            response: Some(response),
                            attempts,
                            total_latency_ms: start.elapsed().as_millis() as u64,
                            final_provider_id: Some(target.provider_id),
                            final_key_id: Some(credential.key_id),
                        };
                    }
                    Err(err) => {
                        let _ = self.credentials.record(credential.id, 0, false).await;
                        self.circuit_breaker.record_failure(target.provider_id).await;
                        attempts.push(AttemptRecord {
                            provider_id: Some(target.provider_id),
                            provider_name: Some(target.provider_name.clone()),
                            key_id: Some(credential.key_id.clone()),
                            error_class: Some(err.class),
                            error_message: Some(err.message.clone()),
                            status_code: err.status,
                            latency_ms,
                            success: false,
                        });
                        budget -= 1;
                        key_attempts += 1;
                        tried_credentials.push(credential.id);

                        match err.class {
                            ErrorClass::RateLimit | ErrorClass::ServerError | ErrorClass::Timeout => continue,
                            ErrorClass::Authentication
                            | ErrorClass::QuotaExceeded
                            | ErrorClass::ModelNotFound => break,
                            _ => break 'providers,
                        }
                    }
                }
            }
        }

        FallbackResult {
            success: false,
            response: None,
            attempts,
            total_latency_ms: start.elapsed().as_millis() as u64,
            final_provider_id: None,
            final_key_id: None,
        }
    }
}
