use std::time::Duration;

use async_trait::async_trait;
use futures_util::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::Mutex;

use modelgate_provider_core::{
    ChatMessage, ChatRole, ChunkStream, DecryptedCredential, EmbeddingRequest, EmbeddingResponse,
    ErrorClass, FinishReason, ModelInfo, NormalizedResponse, Provider, ProviderConfig, ProviderError,
    ProviderOutcome, ProviderResult, RequestBody, StreamChunk, TokenUsage,
};

use crate::sse::{SseEvent, SseLineBuffer};

const DEFAULT_BASE_URL: &str = "https://api.openai.com";

/// The `openai`-shaped adapter: talks the OpenAI chat completions wire
/// format over HTTP. Any upstream that speaks the same
/// contract (self-hosted gateways, Azure-compatible shims) can reuse it by
/// setting `base_url` on the provider row.
pub struct OpenAiProvider {
    client: wreq::Client,
    base_url: String,
}

impl OpenAiProvider {
    pub fn new(base_url: &str, _config: &ProviderConfig) -> Self {
        let base_url = if base_url.is_empty() {
            DEFAULT_BASE_URL.to_string()
        } else {
            base_url.trim_end_matches('/').to_string()
        };
        Self {
            client: wreq::Client::new(),
            base_url,
        }
    }
}

#[derive(Serialize)]
struct ChatCompletionRequestBody<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    frequency_penalty: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    presence_penalty: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop: Option<&'a [String]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    user: Option<&'a str>,
    stream: bool,
}

#[derive(Serialize)]
struct WireMessage<'a> {
    role: &'a str,
    content: &'a str,
}

fn role_str(role: &ChatRole) -> &'static str {
    match role {
        ChatRole::System => "system",
        ChatRole::User => "user",
        ChatRole::Assistant => "assistant",
        ChatRole::Tool => "tool",
    }
}

#[derive(Deserialize)]
struct ChatCompletionChoice {
    message: ChatCompletionMessage,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct ChatCompletionMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct ChatCompletionUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}

#[derive(Deserialize)]
struct ChatCompletionResponseBody {
    id: String,
    model: String,
    choices: Vec<ChatCompletionChoice>,
    usage: Option<ChatCompletionUsage>,
}

fn parse_finish_reason(reason: Option<&str>) -> FinishReason {
    match reason {
        Some("length") => FinishReason::Length,
        Some("content_filter") => FinishReason::ContentFilter,
        Some("tool_calls") => FinishReason::ToolCalls,
        _ => FinishReason::Stop,
    }
}

async fn classify_error_response(response: wreq::Response) -> ProviderError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    let message = extract_error_message(&body).unwrap_or(body);
    ProviderError::from_http_status(status, message)
}

fn extract_error_message(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;
    value
        .get("error")
        .and_then(|e| e.get("message"))
        .and_then(|m| m.as_str())
        .map(str::to_string)
}

struct OpenAiChunkStream {
    bytes: Mutex<std::pin::Pin<Box<dyn Stream<Item = Result<bytes::Bytes, wreq::Error>> + Send>>>,
    buffer: SseLineBuffer,
    done: bool,
}

#[async_trait]
impl ChunkStream for OpenAiChunkStream {
    async fn next_chunk(&mut self) -> Option<Result<StreamChunk, ProviderError>> {
        if self.done {
            return None;
        }
        loop {
            if let Some(event) = self.buffer.pop_event() {
                match event {
                    SseEvent::Chunk(chunk) => return Some(Ok(chunk)),
                    SseEvent::Done => {
                        self.done = true;
                        return None;
                    }
                    SseEvent::Skip => continue,
                }
            }

            let mut stream = self.bytes.lock().await;
            match stream.next().await {
                Some(Ok(bytes)) => {
                    drop(stream);
                    self.buffer.push(&bytes);
                }
                None => {
                    self.done = true;
                    return None;
                }
                Some(Err(err)) => {
                    self.done = true;
                    return Some(Err(ProviderError::new(
                        ErrorClass::ServerError,
                        err.to_string(),
                    )));
                }
            }
        }
    }
}

impl OpenAiProvider {
    fn build_body(&self, request: &modelgate_provider_core::NormalizedRequest) -> ProviderResult<Vec<u8>> {
        let messages: Vec<WireMessage<'_>> = match &request.body {
            RequestBody::Chat(messages) => messages
                .iter()
                .map(|m: &ChatMessage| WireMessage {
                    role: role_str(&m.role),
                    content: &m.content,
                })
                .collect(),
            RequestBody::Prompt(prompt) => vec![WireMessage {
                role: "user",
                content: prompt,
            }],
        };

        let body = ChatCompletionRequestBody {
            model: &request.model,
            messages,
            temperature: request.sampling.temperature,
            max_tokens: request.sampling.max_tokens,
            top_p: request.sampling.top_p,
            frequency_penalty: request.sampling.frequency_penalty,
            presence_penalty: request.sampling.presence_penalty,
            stop: request.sampling.stop.as_deref(),
            user: request.user.as_deref(),
            stream: request.stream,
        };

        serde_json::to_vec(&body).map_err(|e| ProviderError::new(ErrorClass::UnknownError, e.to_string()))
    }

    async fn dispatch_chat(
        &self,
        request: &modelgate_provider_core::NormalizedRequest,
        credential: &DecryptedCredential,
        timeout: Duration,
    ) -> ProviderResult<ProviderOutcome> {
        let body = self.build_body(request)?;
        let response = self
            .client
            .post(format!("{}/v1/chat/completions", self.base_url))
            .bearer_auth(&credential.api_key)
            .header("content-type", "application/json")
            .timeout(timeout)
            .body(body)
            .send()
            .await
            .map_err(|e| ProviderError::new(ErrorClass::Timeout, e.to_string()))?;

        if !response.status().is_success() {
            return Err(classify_error_response(response).await);
        }

        if request.stream {
            return Ok(ProviderOutcome::Stream(Box::new(OpenAiChunkStream {
                bytes: Mutex::new(Box::pin(response.bytes_stream())),
                buffer: SseLineBuffer::default(),
                done: false,
            })));
        }

        let parsed: ChatCompletionResponseBody = response
            .json()
            .await
            .map_err(|e| ProviderError::new(ErrorClass::UnknownError, e.to_string()))?;

        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::new(ErrorClass::UnknownError, "empty choices array"))?;

        Ok(ProviderOutcome::Response(NormalizedResponse {
            content: choice.message.content.unwrap_or_default(),
            model: parsed.model,
            usage: parsed
                .usage
                .map(|u| TokenUsage {
                    prompt_tokens: u.prompt_tokens,
                    completion_tokens: u.completion_tokens,
                    total_tokens: u.total_tokens,
                })
                .unwrap_or_default(),
            finish_reason: parse_finish_reason(choice.finish_reason.as_deref()),
            upstream_id: parsed.id,
        }))
    }
}

#[async_trait]
impl Provider for OpenAiProvider {
    fn kind(&self) -> &'static str {
        "openai"
    }

    async fn chat(
        &self,
        request: &modelgate_provider_core::NormalizedRequest,
        credential: &DecryptedCredential,
        timeout: Duration,
    ) -> ProviderResult<ProviderOutcome> {
        self.dispatch_chat(request, credential, timeout).await
    }

    async fn completion(
        &self,
        request: &modelgate_provider_core::NormalizedRequest,
        credential: &DecryptedCredential,
        timeout: Duration,
    ) -> ProviderResult<ProviderOutcome> {
        self.dispatch_chat(request, credential, timeout).await
    }

    async fn embedding(
        &self,
        request: &EmbeddingRequest,
        credential: &DecryptedCredential,
        timeout: Duration,
    ) -> ProviderResult<EmbeddingResponse> {
        let response = self
            .client
            .post(format!("{}/v1/embeddings", self.base_url))
            .bearer_auth(&credential.api_key)
            .header("content-type", "application/json")
            .timeout(timeout)
            .json(&json!({ "model": request.model, "input": request.input }))
            .send()
            .await
            .map_err(|e| ProviderError::new(ErrorClass::Timeout, e.to_string()))?;

        if !response.status().is_success() {
            return Err(classify_error_response(response).await);
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| ProviderError::new(ErrorClass::UnknownError, e.to_string()))?;

        let vectors = body["data"]
            .as_array()
            .map(|rows| {
                rows.iter()
                    .filter_map(|row| row["embedding"].as_array())
                    .map(|vec| vec.iter().filter_map(|v| v.as_f64()).map(|v| v as f32).collect())
                    .collect()
            })
            .unwrap_or_default();

        let usage = TokenUsage {
            prompt_tokens: body["usage"]["prompt_tokens"].as_u64().unwrap_or(0) as u32,
            completion_tokens: 0,
            total_tokens: body["usage"]["total_tokens"].as_u64().unwrap_or(0) as u32,
        };

        Ok(EmbeddingResponse {
            model: request.model.clone(),
            vectors,
            usage,
        })
    }

    async fn list_models(&self, credential: &DecryptedCredential) -> ProviderResult<Vec<ModelInfo>> {
        let response = self
            .client
            .get(format!("{}/v1/models", self.base_url))
            .bearer_auth(&credential.api_key)
            .send()
            .await
            .map_err(|e| ProviderError::new(ErrorClass::Timeout, e.to_string()))?;

        if !response.status().is_success() {
            return Err(classify_error_response(response).await);
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| ProviderError::new(ErrorClass::UnknownError, e.to_string()))?;

        Ok(body["data"]
            .as_array()
            .map(|rows| {
                rows.iter()
                    .filter_map(|row| row["id"].as_str())
                    .map(|id| ModelInfo { id: id.to_string() })
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn health_check(&self, credential: &DecryptedCredential) -> ProviderResult<()> {
        self.list_models(credential).await.map(|_| ())
    }
}
