//! End-to-end exercises for the fallback/retry scenarios, driven against a
//! scripted test double standing in for a real provider adapter.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use modelgate_common::{CircuitBreakerConfig, RateLimitConfig};
use modelgate_core::{
    CircuitBreaker, CompositeRateLimiter, CredentialStore, Encryptor, FallbackExecutor,
    InMemorySharedStore, ModelResolver, SelectionStrategy,
};
use modelgate_provider_core::{
    ChatMessage, ChatRole, DecryptedCredential, EmbeddingRequest, EmbeddingResponse, ErrorClass,
    FinishReason, ModelInfo, NormalizedRequest, NormalizedResponse, Provider, ProviderConfig,
    ProviderError, ProviderOutcome, ProviderRegistry, ProviderResult, RequestBody, SamplingParams,
    TokenUsage,
};
use modelgate_storage::{
    entities::users, AuditRecordInput, CredentialRow, MappingRow, NewCredential, NewMapping,
    NewProvider, ProviderRow, Storage, StorageResult, StorageSnapshot,
};

/// Never actually persists anything; the fallback/credential store paths
/// under test only read from the in-memory `StorageSnapshot` they were
/// constructed with and write through a fire-and-forget usage record.
struct NullStorage;

#[async_trait]
impl Storage for NullStorage {
    async fn sync(&self) -> StorageResult<()> {
        Ok(())
    }

    async fn load_snapshot(&self) -> StorageResult<StorageSnapshot> {
        Ok(StorageSnapshot::default())
    }

    async fn upsert_provider(&self, _provider: NewProvider) -> StorageResult<i64> {
        Ok(0)
    }

    async fn upsert_credential(&self, _credential: NewCredential) -> StorageResult<i64> {
        Ok(0)
    }

    async fn upsert_mapping(&self, _mapping: NewMapping) -> StorageResult<i64> {
        Ok(0)
    }

    async fn record_credential_usage(
        &self,
        _credential_id: i64,
        _tokens: i64,
        _success: bool,
    ) -> StorageResult<()> {
        Ok(())
    }

    async fn insert_audit_record(&self, _record: AuditRecordInput) -> StorageResult<()> {
        Ok(())
    }

    async fn find_admin_user_by_token_hash(
        &self,
        _token_hash: &str,
    ) -> StorageResult<Option<users::Model>> {
        Ok(None)
    }

    async fn load_global_config(&self) -> StorageResult<Option<Value>> {
        Ok(None)
    }

    async fn upsert_global_config(&self, _config: &Value) -> StorageResult<()> {
        Ok(())
    }
}

/// A provider whose behavior per credential is fixed at construction time
/// from its `ProviderConfig`, keyed by the credential's plaintext API key.
/// A deterministic stand-in, scripted rather than randomized so every
/// scenario here is reproducible.
struct ScriptedProvider {
    script: HashMap<String, u16>,
}

impl ScriptedProvider {
    fn new(_base_url: &str, config: &ProviderConfig) -> Self {
        let mut script = HashMap::new();
        if let Some(obj) = config.as_object() {
            for (key, outcome) in obj {
                if let Some(status) = outcome.as_u64() {
                    script.insert(key.clone(), status as u16);
                }
            }
        }
        Self { script }
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn kind(&self) -> &'static str {
        "scripted"
    }

    async fn chat(
        &self,
        request: &NormalizedRequest,
        credential: &DecryptedCredential,
        _timeout: Duration,
    ) -> ProviderResult<ProviderOutcome> {
        match self.script.get(&credential.api_key) {
            Some(&status) => Err(ProviderError::from_http_status(status, "scripted failure")),
            None => Ok(ProviderOutcome::Response(NormalizedResponse {
                content: "scripted ok".to_string(),
                model: request.model.clone(),
                usage: TokenUsage {
                    prompt_tokens: 1,
                    completion_tokens: 1,
                    total_tokens: 2,
                },
                finish_reason: FinishReason::Stop,
                upstream_id: "scripted-1".to_string(),
            })),
        }
    }

    async fn completion(
        &self,
        request: &NormalizedRequest,
        credential: &DecryptedCredential,
        timeout: Duration,
    ) -> ProviderResult<ProviderOutcome> {
        self.chat(request, credential, timeout).await
    }

    async fn embedding(
        &self,
        _request: &EmbeddingRequest,
        _credential: &DecryptedCredential,
        _timeout: Duration,
    ) -> ProviderResult<EmbeddingResponse> {
        unimplemented!("not exercised by the fallback scenarios")
    }

    async fn list_models(&self, _credential: &DecryptedCredential) -> ProviderResult<Vec<ModelInfo>> {
        Ok(Vec::new())
    }

    async fn health_check(&self, _credential: &DecryptedCredential) -> ProviderResult<()> {
        Ok(())
    }
}

fn registry() -> ProviderRegistry {
    let mut registry = ProviderRegistry::new();
    registry.register(
        "scripted",
        Arc::new(|base_url: &str, config: &ProviderConfig| {
            Arc::new(ScriptedProvider::new(base_url, config)) as Arc<dyn Provider>
        }),
    );
    registry
}

fn provider_row(id: i64, name: &str, script: Value) -> ProviderRow {
    ProviderRow {
        id,
        name: name.to_string(),
        kind: "scripted".to_string(),
        base_url: "https://example.invalid".to_string(),
        config: script,
        status: "active".to_string(),
        request_timeout_seconds: 30,
        max_in_flight_retries: 0,
    }
}

fn credential_row(id: i64, provider_id: i64, plaintext: &str, priority: i32, enc: &Encryptor) -> CredentialRow {
    CredentialRow {
        id,
        provider_id,
        key_id: plaintext.to_string(),
        key_ciphertext: enc.encrypt(plaintext).unwrap(),
        priority,
        status: "active".to_string(),
        requests_per_minute: None,
        tokens_per_minute: None,
        daily_quota: None,
        monthly_quota: None,
        current_daily_usage: 0,
        current_monthly_usage: 0,
        consecutive_failures: 0,
        last_used_at: None,
        last_failed_at: None,
    }
}

fn mapping_row(id: i64, alias: &str, provider_id: i64, order_index: i32, is_default: bool) -> MappingRow {
    MappingRow {
        id,
        alias_name: alias.to_string(),
        provider_id,
        upstream_model: alias.to_string(),
        order_index,
        is_default,
        config_overlay: serde_json::json!({}),
    }
}

fn chat_request(alias: &str) -> NormalizedRequest {
    NormalizedRequest {
        model: alias.to_string(),
        body: RequestBody::Chat(vec![ChatMessage {
            role: ChatRole::User,
            content: "hello".to_string(),
            name: None,
        }]),
        sampling: SamplingParams::default(),
        stream: false,
        user: None,
        extras: HashMap::new(),
    }
}

struct Harness {
    executor: FallbackExecutor,
    breaker: Arc<CircuitBreaker>,
}

fn build_harness(snapshot: StorageSnapshot, max_fallback_attempts: u32, enc: Arc<Encryptor>) -> Harness {
    let shared = InMemorySharedStore::new();
    let storage: Arc<dyn Storage> = Arc::new(NullStorage);
    let resolver = Arc::new(ModelResolver::new(snapshot.clone()));
    let credentials = Arc::new(CredentialStore::new(snapshot, storage, shared, enc));
    let breaker = Arc::new(CircuitBreaker::new(CircuitBreakerConfig {
        failure_threshold: 5,
        recovery_timeout_seconds: 60,
    }));
    let executor = FallbackExecutor::new(
        resolver,
        credentials,
        breaker.clone(),
        Arc::new(registry()),
        max_fallback_attempts,
        Duration::from_secs(5),
    );
    Harness { executor, breaker }
}

fn two_provider_snapshot(enc: &Encryptor, provider1_script: Value) -> StorageSnapshot {
    let mut providers = HashMap::new();
    providers.insert(1, provider_row(1, "openai-primary", provider1_script));
    providers.insert(2, provider_row(2, "mock-provider", serde_json::json!({})));

    let mut credentials_by_provider = HashMap::new();
    credentials_by_provider.insert(1, vec![credential_row(1, 1, "primary-key", 0, enc)]);
    credentials_by_provider.insert(2, vec![credential_row(2, 2, "mock-key", 0, enc)]);

    let mut mappings_by_alias = HashMap::new();
    mappings_by_alias.insert(
        "gpt-3.5-turbo".to_string(),
        vec![
            mapping_row(1, "gpt-3.5-turbo", 1, 0, true),
            mapping_row(2, "gpt-3.5-turbo", 2, 1, false),
        ],
    );

    StorageSnapshot {
        providers,
        credentials_by_provider,
        mappings_by_alias,
    }
}

#[tokio::test]
async fn happy_path_returns_single_successful_attempt() {
    let enc = Arc::new(Encryptor::new("scratch").unwrap());
    let snapshot = two_provider_snapshot(&enc, serde_json::json!({}));
    let harness = build_harness(snapshot, 3, enc.clone());

    let result = harness.executor.execute("gpt-3.5-turbo", &chat_request("gpt-3.5-turbo")).await;

    assert!(result.success);
    assert_eq!(result.attempts.len(), 1);
    assert_eq!(result.final_provider_id, Some(1));
}

#[tokio::test]
async fn key_level_retry_tries_the_next_credential_on_rate_limit() {
    let enc = Arc::new(Encryptor::new("scratch").unwrap());
    let mut providers = HashMap::new();
    providers.insert(1, provider_row(1, "openai-primary", serde_json::json!({ "key-a": 429 })));

    let mut credentials_by_provider = HashMap::new();
    credentials_by_provider.insert(
        1,
        vec![
            credential_row(1, 1, "key-a", 0, &enc),
            credential_row(2, 1, "key-b", 1, &enc),
        ],
    );

    let mut mappings_by_alias = HashMap::new();
    mappings_by_alias.insert("gpt-3.5-turbo".to_string(), vec![mapping_row(1, "gpt-3.5-turbo", 1, 0, true)]);

    let snapshot = StorageSnapshot {
        providers,
        credentials_by_provider,
        mappings_by_alias,
    };
    let harness = build_harness(snapshot, 3, enc.clone());

    let result = harness.executor.execute("gpt-3.5-turbo", &chat_request("gpt-3.5-turbo")).await;

    assert!(result.success);
    assert_eq!(result.attempts.len(), 2);
    assert_eq!(result.attempts[0].error_class, Some(ErrorClass::RateLimit));
    assert_eq!(result.attempts[0].key_id.as_deref(), Some("key-a"));
    assert!(result.attempts[1].success);
    assert_eq!(result.attempts[1].key_id.as_deref(), Some("key-b"));
    assert_eq!(result.final_provider_id, Some(1));
}

#[tokio::test]
async fn provider_fallback_moves_on_after_authentication_failure() {
    let enc = Arc::new(Encryptor::new("scratch").unwrap());
    let snapshot = two_provider_snapshot(&enc, serde_json::json!({ "primary-key": 401 }));
    let harness = build_harness(snapshot, 3, enc.clone());

    let result = harness.executor.execute("gpt-3.5-turbo", &chat_request("gpt-3.5-turbo")).await;

    assert!(result.success);
    assert_eq!(result.attempts.len(), 2);
    assert_eq!(result.attempts[0].error_class, Some(ErrorClass::Authentication));
    assert!(result.attempts[1].success);
    assert_eq!(result.final_provider_id, Some(2));
}

#[tokio::test]
async fn open_circuit_breaker_skips_straight_to_the_next_provider() {
    let enc = Arc::new(Encryptor::new("scratch").unwrap());
    let snapshot = two_provider_snapshot(&enc, serde_json::json!({}));
    let harness = build_harness(snapshot, 3, enc.clone());

    for _ in 0..5 {
        harness.breaker.record_failure(1).await;
    }

    let result = harness.executor.execute("gpt-3.5-turbo", &chat_request("gpt-3.5-turbo")).await;

    assert!(result.success);
    assert_eq!(result.attempts.len(), 2);
    assert_eq!(result.attempts[0].error_class, Some(ErrorClass::CircuitBreakerOpen));
    assert_eq!(result.attempts[0].latency_ms, 0);
    assert_eq!(result.final_provider_id, Some(2));
}

#[tokio::test]
async fn total_failure_reports_one_attempt_per_provider() {
    let enc = Arc::new(Encryptor::new("scratch").unwrap());
    let mut providers = HashMap::new();
    let mut credentials_by_provider = HashMap::new();
    let mut mapping_rows = Vec::new();
    for id in 1i64..=3 {
        providers.insert(id, provider_row(id, &format!("provider-{id}"), serde_json::json!({ "key": 500 })));
        credentials_by_provider.insert(id, vec![credential_row(id, id, "key", 0, &enc)]);
        mapping_rows.push(mapping_row(id, "gpt-3.5-turbo", id, (id - 1) as i32, id == 1));
    }
    let mut mappings_by_alias = HashMap::new();
    mappings_by_alias.insert("gpt-3.5-turbo".to_string(), mapping_rows);

    let snapshot = StorageSnapshot {
        providers,
        credentials_by_provider,
        mappings_by_alias,
    };
    let harness = build_harness(snapshot, 3, enc.clone());

    let result = harness.executor.execute("gpt-3.5-turbo", &chat_request("gpt-3.5-turbo")).await;

    assert!(!result.success);
    assert_eq!(result.attempts.len(), 3);
    assert!(result.attempts.iter().all(|a| a.error_class == Some(ErrorClass::ServerError)));
}

#[tokio::test]
async fn rate_limit_rejection_blocks_the_second_request_in_window() {
    let shared = InMemorySharedStore::new();
    let limiter = CompositeRateLimiter::new(
        shared,
        RateLimitConfig {
            global_rpm: 1000,
            global_tpm: 1000,
            per_key_rpm: 1,
            per_key_tpm: 1000,
            per_address_rpm: 1000,
            window_seconds: 60,
        },
    );

    let first = limiter.check_request(Some("tok-a"), None, 0).await;
    assert!(first.allowed());

    let second = limiter.check_request(Some("tok-a"), None, 0).await;
    assert!(!second.allowed());
    let (dimension, result) = second.failing.unwrap();
    assert_eq!(dimension.as_str(), "key_rpm");
    assert!(result.retry_after.is_some());
}

/// `SelectionStrategy` is exercised indirectly above via `Priority`; this
/// guards the enum stays importable for callers that pick a different one.
#[allow(dead_code)]
fn _uses_selection_strategy() -> SelectionStrategy {
    SelectionStrategy::Priority
}
