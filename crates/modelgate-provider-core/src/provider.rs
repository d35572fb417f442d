use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;

use crate::credential::DecryptedCredential;
use crate::errors::ProviderResult;
use crate::request::NormalizedRequest;
use crate::response::ProviderOutcome;

#[derive(Debug, Clone)]
pub struct EmbeddingRequest {
    pub model: String,
    pub input: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct EmbeddingResponse {
    pub model: String,
    pub vectors: Vec<Vec<f32>>,
    pub usage: crate::response::TokenUsage,
}

#[derive(Debug, Clone)]
pub struct ModelInfo {
    pub id: String,
}

/// Translates the normalized request/response shape to one upstream's wire
/// format and back. Implementations must not block the executor thread;
/// every method is a suspension point.
#[async_trait]
pub trait Provider: Send + Sync {
    fn kind(&self) -> &'static str;

    async fn chat(
        &self,
        request: &NormalizedRequest,
        credential: &DecryptedCredential,
        timeout: Duration,
    ) -> ProviderResult<ProviderOutcome>;

    async fn completion(
        &self,
        request: &NormalizedRequest,
        credential: &DecryptedCredential,
        timeout: Duration,
    ) -> ProviderResult<ProviderOutcome>;

    async fn embedding(
        &self,
        request: &EmbeddingRequest,
        credential: &DecryptedCredential,
        timeout: Duration,
    ) -> ProviderResult<EmbeddingResponse>;

    async fn list_models(&self, credential: &DecryptedCredential) -> ProviderResult<Vec<ModelInfo>>;

    async fn health_check(&self, credential: &DecryptedCredential) -> ProviderResult<()>;
}

/// Per-provider opaque config mapping. Kept as `serde_json::Value` so new
/// provider kinds do not need a core schema change.
pub type ProviderConfig = Value;

/// Provider kind → constructor. Unknown kinds fail at admin-write time via
/// `ProviderRegistry`, never inside the hot dispatch path.
pub type ProviderConstructor =
    std::sync::Arc<dyn Fn(&str, &ProviderConfig) -> std::sync::Arc<dyn Provider> + Send + Sync>;
