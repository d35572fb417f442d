use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;

use modelgate_provider_core::{
    ChatMessage, ChunkStream, DecryptedCredential, EmbeddingRequest, EmbeddingResponse, ErrorClass,
    FinishReason, ModelInfo, NormalizedRequest, NormalizedResponse, Provider, ProviderConfig,
    ProviderError, ProviderOutcome, ProviderResult, RequestBody, StreamChunk, TokenUsage,
};

/// Deterministic-shaped provider for development and fallback-path testing:
/// no network calls, configurable latency and failure injection.
pub struct MockProvider {
    simulate_delay: Duration,
    failure_rate: f64,
}

impl MockProvider {
    pub fn new(_base_url: &str, config: &ProviderConfig) -> Self {
        let simulate_delay = config
            .get("simulate_delay")
            .and_then(|v| v.as_f64())
            .unwrap_or(0.1);
        let failure_rate = config
            .get("failure_rate")
            .and_then(|v| v.as_f64())
            .unwrap_or(0.0)
            .clamp(0.0, 1.0);
        Self {
            simulate_delay: Duration::from_secs_f64(simulate_delay.max(0.0)),
            failure_rate,
        }
    }

    fn maybe_fail(&self) -> ProviderResult<()> {
        if self.failure_rate > 0.0 && rand::rng().random::<f64>() < self.failure_rate {
            return Err(ProviderError::new(
                ErrorClass::ServerError,
                "simulated provider failure",
            ));
        }
        Ok(())
    }

    fn echo_text(request: &NormalizedRequest) -> String {
        match &request.body {
            RequestBody::Chat(messages) => {
                let last = messages.last().map(|m| m.content.as_str()).unwrap_or("no message");
                format!("This is a mock response to: {last}")
            }
            RequestBody::Prompt(prompt) => {
                let prompt = if prompt.is_empty() { "no prompt" } else { prompt };
                format!("Mock completion for: {prompt}")
            }
        }
    }
}

struct MockChunkStream {
    words: std::vec::IntoIter<String>,
    done_sent: bool,
    prompt_tokens: u32,
    completion_tokens: u32,
}

#[async_trait]
impl ChunkStream for MockChunkStream {
    async fn next_chunk(&mut self) -> Option<Result<StreamChunk, ProviderError>> {
        tokio::time::sleep(Duration::from_millis(50)).await;
        match self.words.next() {
            Some(word) => Some(Ok(StreamChunk::Delta { content: word })),
            None if !self.done_sent => {
                self.done_sent = true;
                Some(Ok(StreamChunk::Done {
                    finish_reason: FinishReason::Stop,
                    usage: Some(TokenUsage {
                        prompt_tokens: self.prompt_tokens,
                        completion_tokens: self.completion_tokens,
                        total_tokens: self.prompt_tokens + self.completion_tokens,
                    }),
                }))
            }
            None => None,
        }
    }
}

fn word_chunks(text: &str) -> Vec<String> {
    let words: Vec<&str> = text.split_whitespace().collect();
    let last = words.len().saturating_sub(1);
    words
        .iter()
        .enumerate()
        .map(|(i, word)| {
            if i < last {
                format!("{word} ")
            } else {
                word.to_string()
            }
        })
        .collect()
}

#[async_trait]
impl Provider for MockProvider {
    fn kind(&self) -> &'static str {
        "mock"
    }

    async fn chat(
        &self,
        request: &NormalizedRequest,
        _credential: &DecryptedCredential,
        _timeout: Duration,
    ) -> ProviderResult<ProviderOutcome> {
        tokio::time::sleep(self.simulate_delay).await;
        self.maybe_fail()?;

        let content = Self::echo_text(request);
        if request.stream {
            let words = word_chunks(&content);
            let completion_tokens = words.len() as u32;
            return Ok(ProviderOutcome::Stream(Box::new(MockChunkStream {
                words: words.into_iter(),
                done_sent: false,
                prompt_tokens: 10,
                completion_tokens,
            })));
        }

        let completion_tokens = content.split_whitespace().count() as u32;
        Ok(ProviderOutcome::Response(NormalizedResponse {
            content,
            model: request.model.clone(),
            usage: TokenUsage {
                prompt_tokens: 10,
                completion_tokens,
                total_tokens: 10 + completion_tokens,
            },
            finish_reason: FinishReason::Stop,
            upstream_id: uuid::Uuid::new_v4().to_string(),
        }))
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
        request: &EmbeddingRequest,
        _credential: &DecryptedCredential,
        _timeout: Duration,
    ) -> ProviderResult<EmbeddingResponse> {
        tokio::time::sleep(self.simulate_delay).await;
        self.maybe_fail()?;

        let vectors: Vec<Vec<f32>> = request
            .input
            .iter()
            .map(|text| hash_embedding(text))
            .collect();
        let prompt_tokens: u32 = request
            .input
            .iter()
            .map(|text| text.split_whitespace().count() as u32)
            .sum();

        Ok(EmbeddingResponse {
            model: request.model.clone(),
            vectors,
            usage: TokenUsage {
                prompt_tokens,
                completion_tokens: 0,
                total_tokens: prompt_tokens,
            },
        })
    }

    async fn list_models(&self, _credential: &DecryptedCredential) -> ProviderResult<Vec<ModelInfo>> {
        tokio::time::sleep(self.simulate_delay).await;
        Ok(vec![
            ModelInfo { id: "mock-gpt-3.5-turbo".to_string() },
            ModelInfo { id: "mock-gpt-4".to_string() },
            ModelInfo { id: "mock-text-embedding-ada-002".to_string() },
        ])
    }

    async fn health_check(&self, _credential: &DecryptedCredential) -> ProviderResult<()> {
        Ok(())
    }
}

/// Deterministic 512-dim hash-based vector, matching the fixture's shape
/// without pulling in a real embedding model.
fn hash_embedding(text: &str) -> Vec<f32> {
    use std::hash::{Hash, Hasher};
    (0..512)
        .map(|i| {
            let mut hasher = std::collections::hash_map::DefaultHasher::new();
            text.hash(&mut hasher);
            i.hash(&mut hasher);
            ((hasher.finish() % 1000) as f32) / 1000.0
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use modelgate_provider_core::{ChatRole, SamplingParams};
    use std::collections::HashMap;

    fn chat_request(stream: bool) -> NormalizedRequest {
        NormalizedRequest {
            model: "mock-gpt-4".to_string(),
            body: RequestBody::Chat(vec![ChatMessage {
                role: ChatRole::User,
                content: "hello".to_string(),
                name: None,
            }]),
            sampling: SamplingParams::default(),
            stream,
            user: None,
            extras: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn non_streaming_chat_echoes_last_message() {
        let provider = MockProvider::new("", &serde_json::json!({"simulate_delay": 0.0}));
        let credential = DecryptedCredential { api_key: "mock-key".to_string() };
        let outcome = provider
            .chat(&chat_request(false), &credential, Duration::from_secs(1))
            .await
            .unwrap();
        match outcome {
            ProviderOutcome::Response(response) => {
                assert!(response.content.contains("hello"));
                assert_eq!(response.finish_reason, FinishReason::Stop);
            }
            ProviderOutcome::Stream(_) => panic!("expected a materialized response"),
        }
    }

    #[tokio::test]
    async fn streaming_chat_ends_with_done_chunk() {
        let provider = MockProvider::new("", &serde_json::json!({"simulate_delay": 0.0}));
        let credential = DecryptedCredential { api_key: "mock-key".to_string() };
        let outcome = provider
            .chat(&chat_request(true), &credential, Duration::from_secs(1))
            .await
            .unwrap();
        let mut stream = match outcome {
            ProviderOutcome::Stream(stream) => stream,
            ProviderOutcome::Response(_) => panic!("expected a stream"),
        };

        let mut saw_done = false;
        while let Some(chunk) = stream.next_chunk().await {
            if matches!(chunk.unwrap(), StreamChunk::Done { .. }) {
                saw_done = true;
            }
        }
        assert!(saw_done);
    }

    #[tokio::test]
    async fn failure_rate_one_always_fails() {
        let provider = MockProvider::new(
            "",
            &serde_json::json!({"simulate_delay": 0.0, "failure_rate": 1.0}),
        );
        let credential = DecryptedCredential { api_key: "mock-key".to_string() };
        let result = provider
            .chat(&chat_request(false), &credential, Duration::from_secs(1))
            .await;
        assert!(result.is_err());
    }
}
