use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use axum::body::Body;
use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use bytes::Bytes;
use futures_util::stream;
use serde::Deserialize;
use serde_json::Value;
use uuid::Uuid;

use modelgate_core::{AppState, AuditContext};
use modelgate_provider_core::{
    ChatMessage, ChatRole, EmbeddingRequest, FinishReason, NormalizedRequest, ProviderOutcome,
    RequestBody, SamplingParams, StreamChunk,
};

#[derive(Clone)]
pub struct ProxyState {
    pub app: Arc<AppState>,
}

pub fn proxy_router(app: Arc<AppState>) -> Router {
    let state = ProxyState { app };

    Router::new()
        .route("/v1/chat/completions", post(chat_completions))
        .route("/v1/completions", post(completions))
        .route("/v1/embeddings", post(embeddings))
        .route("/v1/models", get(list_models))
        .route("/health", get(health))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
struct WireChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionsBody {
    model: String,
    messages: Vec<WireChatMessage>,
    #[serde(default)]
    stream: bool,
    #[serde(default)]
    temperature: Option<f32>,
    #[serde(default)]
    max_tokens: Option<u32>,
    #[serde(default)]
    top_p: Option<f32>,
    #[serde(default)]
    frequency_penalty: Option<f32>,
    #[serde(default)]
    presence_penalty: Option<f32>,
    #[serde(default)]
    stop: Option<Vec<String>>,
    #[serde(default)]
    user: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CompletionsBody {
    model: String,
    prompt: String,
    #[serde(default)]
    stream: bool,
    #[serde(default)]
    temperature: Option<f32>,
    #[serde(default)]
    max_tokens: Option<u32>,
    #[serde(default)]
    top_p: Option<f32>,
    #[serde(default)]
    user: Option<String>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingsBody {
    model: String,
    input: Vec<String>,
}

fn parse_role(role: &str) -> ChatRole {
    match role {
        "system" => ChatRole::System,
        "assistant" => ChatRole::Assistant,
        "tool" => ChatRole::Tool,
        _ => ChatRole::User,
    }
}

/// Estimated token pre-charge used for rate-limit admission before the real
/// count is known, a fixed constant matching the original implementation's
/// behavior.
const ESTIMATED_TOKENS_PER_REQUEST: u32 = 100;

fn error_envelope(status: StatusCode, message: impl Into<String>, error_type: &str, request_id: &str) -> Response {
    let body = Json(serde_json::json!({
        "error": {
            "message": message.into(),
            "type": error_type,
            "request_id": request_id,
        }
    }));
    let mut response = (status, body).into_response();
    response
        .headers_mut()
        .insert("x-proxy-request-id", request_id.parse().unwrap());
    response
}

fn client_addr(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.split(',').next().unwrap_or(s).trim().to_string())
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    value.strip_prefix("Bearer ").map(|s| s.trim().to_string())
}

async fn health() -> impl IntoResponse {
    (StatusCode::OK, Json(serde_json::json!({ "status": "ok" })))
}

async fn readyz(State(state): State<ProxyState>) -> impl IntoResponse {
    match state.app.storage.load_snapshot().await {
        Ok(_) => (StatusCode::OK, Json(serde_json::json!({ "ready": true }))).into_response(),
        Err(err) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({ "ready": false, "error": err.to_string() })),
        )
            .into_response(),
    }
}

async fn metrics(State(state): State<ProxyState>) -> impl IntoResponse {
    let provider_count = state
        .app
        .storage
        .load_snapshot()
        .await
        .map(|s| s.providers.len())
        .unwrap_or(0);
    let body = format!(
        "# HELP modelgate_providers_configured Number of providers configured.\n\
         # TYPE modelgate_providers_configured gauge\n\
         modelgate_providers_configured {provider_count}\n"
    );
    ([(header::CONTENT_TYPE, "text/plain; version=0.0.4")], body)
}

async fn list_models(State(state): State<ProxyState>) -> impl IntoResponse {
    let aliases: Vec<String> = state
        .app
        .storage
        .load_snapshot()
        .await
        .map(|s| s.mappings_by_alias.keys().cloned().collect())
        .unwrap_or_default();
    let data: Vec<Value> = aliases
        .into_iter()
        .map(|id| serde_json::json!({ "id": id, "object": "model", "owned_by": "modelgate" }))
        .collect();
    Json(serde_json::json!({ "object": "list", "data": data }))
}

async fn chat_completions(
    State(state): State<ProxyState>,
    headers: HeaderMap,
    Json(body): Json<ChatCompletionsBody>,
) -> Response {
    let request_id = Uuid::new_v4().to_string();
    let messages = body
        .messages
        .into_iter()
        .map(|m| ChatMessage {
            role: parse_role(&m.role),
            content: m.content,
            name: None,
        })
        .collect();

    let request = NormalizedRequest {
        model: body.model.clone(),
        body: RequestBody::Chat(messages),
        sampling: SamplingParams {
            temperature: body.temperature,
            max_tokens: body.max_tokens,
            top_p: body.top_p,
            frequency_penalty: body.frequency_penalty,
            presence_penalty: body.presence_penalty,
            stop: body.stop,
        },
        stream: body.stream,
        user: body.user,
        extras: HashMap::new(),
    };

    dispatch(state, headers, request_id, "/v1/chat/completions", request).await
}

async fn completions(
    State(state): State<ProxyState>,
    headers: HeaderMap,
    Json(body): Json<CompletionsBody>,
) -> Response {
    let request_id = Uuid::new_v4().to_string();
    let request = NormalizedRequest {
        model: body.model.clone(),
        body: RequestBody::Prompt(body.prompt),
        sampling: SamplingParams {
            temperature: body.temperature,
            max_tokens: body.max_tokens,
            top_p: body.top_p,
            frequency_penalty: None,
            presence_penalty: None,
            stop: None,
        },
        stream: body.stream,
        user: body.user,
        extras: HashMap::new(),
    };

    dispatch(state, headers, request_id, "/v1/completions", request).await
}

async fn dispatch(
    state: ProxyState,
    headers: HeaderMap,
    request_id: String,
    endpoint: &'static str,
    request: NormalizedRequest,
) -> Response {
    let start = Instant::now();
    let addr = client_addr(&headers);
    let token = bearer_token(&headers);

    let check = state
        .app
        .rate_limiter
        .check_request(token.as_deref(), addr.as_deref(), ESTIMATED_TOKENS_PER_REQUEST)
        .await;

    if !check.allowed() {
        let (_, result) = check.failing.expect("checked not allowed");
        let mut response = error_envelope(
            StatusCode::TOO_MANY_REQUESTS,
            "rate limit exceeded",
            "rate_limit_exceeded",
            &request_id,
        );
        if let Some(retry_after) = result.retry_after {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, retry_after.to_string().parse().unwrap());
        }
        return response;
    }

    let model_alias = request.model.clone();
    let result = state.app.fallback.execute(&model_alias, &request).await;

    let error_class = result
        .attempts
        .last()
        .and_then(|a| a.error_class)
        .map(|c| c.as_str().to_string());

    let last_non_synthetic_status = result
        .attempts
        .iter()
        .rev()
        .find(|a| !a.error_class.map(|c| c.is_synthetic()).unwrap_or(false))
        .and_then(|a| a.status_code);

    let response = if result.success {
        let outcome = result.response.expect("success implies a response");
        let response = match outcome {
            ProviderOutcome::Response(normalized) => {
                let payload = serde_json::json!({
                    "id": normalized.upstream_id,
                    "object": "chat.completion",
                    "model": normalized.model,
                    "choices": [{
                        "index": 0,
                        "message": { "role": "assistant", "content": normalized.content },
                        "finish_reason": finish_reason_str(&normalized.finish_reason),
                    }],
                    "usage": {
                        "prompt_tokens": normalized.usage.prompt_tokens,
                        "completion_tokens": normalized.usage.completion_tokens,
                        "total_tokens": normalized.usage.total_tokens,
                    },
                });
                (StatusCode::OK, Json(payload)).into_response()
            }
            ProviderOutcome::Stream(chunk_stream) => stream_response(chunk_stream),
        };
        response
    } else if result.attempts.iter().all(|a| a.error_class.map(|c| c.is_synthetic()).unwrap_or(false)) {
        error_envelope(
            StatusCode::SERVICE_UNAVAILABLE,
            "no provider was available to serve this request",
            "service_unavailable",
            &request_id,
        )
    } else {
        let status = last_non_synthetic_status
            .and_then(|s| StatusCode::from_u16(s).ok())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let message = result
            .attempts
            .last()
            .and_then(|a| a.error_message.clone())
            .unwrap_or_else(|| "upstream request failed".to_string());
        error_envelope(status, message, "upstream_error", &request_id)
    };

    let mut response = response;
    response
        .headers_mut()
        .insert("x-proxy-request-id", request_id.parse().unwrap());

    state
        .app
        .audit
        .record(
            AuditContext {
                request_id: request_id.clone(),
                client_addr: addr,
                user_agent: headers
                    .get(header::USER_AGENT)
                    .and_then(|v| v.to_str().ok())
                    .map(String::from),
                endpoint: endpoint.to_string(),
                method: "POST".to_string(),
                model_alias,
                status: response.status().as_u16(),
                latency_ms: start.elapsed().as_millis() as u64,
                prompt_tokens: None,
                completion_tokens: None,
                error_class,
            },
            &result.attempts,
        )
        .await;

    response
}

fn finish_reason_str(reason: &FinishReason) -> &'static str {
    match reason {
        FinishReason::Stop => "stop",
        FinishReason::Length => "length",
        FinishReason::ContentFilter => "content_filter",
        FinishReason::ToolCalls => "tool_calls",
    }
}

fn stream_response(chunk_stream: Box<dyn modelgate_provider_core::ChunkStream>) -> Response {
    let body_stream = stream::unfold(chunk_stream, |mut chunk_stream| async move {
        match chunk_stream.next_chunk().await {
            Some(Ok(chunk)) => Some((Ok::<_, std::io::Error>(sse_frame(&chunk)), chunk_stream)),
            Some(Err(err)) => Some((Ok(sse_error_frame(&err)), chunk_stream)),
            None => None,
        }
    });

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/event-stream")
        .header(header::CACHE_CONTROL, "no-cache")
        .body(Body::from_stream(body_stream))
        .expect("static headers are valid")
}

fn sse_frame(chunk: &StreamChunk) -> Bytes {
    let json = match chunk {
        StreamChunk::Delta { content } => serde_json::json!({
            "choices": [{ "index": 0, "delta": { "content": content }, "finish_reason": Value::Null }]
        }),
        StreamChunk::Done { finish_reason, usage } => serde_json::json!({
            "choices": [{ "index": 0, "delta": {}, "finish_reason": finish_reason_str(finish_reason) }],
            "usage": usage.map(|u| serde_json::json!({
                "prompt_tokens": u.prompt_tokens,
                "completion_tokens": u.completion_tokens,
                "total_tokens": u.total_tokens,
            })),
        }),
    };
    Bytes::from(format!("data: {}\n\n", json))
}

fn sse_error_frame(err: &modelgate_provider_core::ProviderError) -> Bytes {
    let json = serde_json::json!({ "error": { "message": err.message, "type": err.class.as_str() } });
    Bytes::from(format!("data: {}\n\n", json))
}

async fn embeddings(
    State(state): State<ProxyState>,
    Json(body): Json<EmbeddingsBody>,
) -> Response {
    let request_id = Uuid::new_v4().to_string();
    let Ok(target) = state.app.resolver.resolve_default(&body.model) else {
        return error_envelope(
            StatusCode::NOT_FOUND,
            format!("no mapping configured for model alias {}", body.model),
            "model_not_found",
            &request_id,
        );
    };

    let Some(provider) = state
        .app
        .registry
        .build(&target.provider_kind, &target.base_url, &target.config_overlay)
    else {
        return error_envelope(
            StatusCode::BAD_GATEWAY,
            format!("unknown provider kind {}", target.provider_kind),
            "unknown_error",
            &request_id,
        );
    };

    let credential = match state
        .app
        .credentials
        .select(target.provider_id, modelgate_core::SelectionStrategy::Priority, &[])
        .await
    {
        Ok(row) => row,
        Err(err) => {
            return error_envelope(StatusCode::SERVICE_UNAVAILABLE, err.to_string(), "no_available_keys", &request_id)
        }
    };
    let decrypted = match state.app.credentials.decrypt(&credential) {
        Ok(d) => d,
        Err(err) => return error_envelope(StatusCode::INTERNAL_SERVER_ERROR, err.to_string(), "internal_error", &request_id),
    };

    let req = EmbeddingRequest { model: target.upstream_model, input: body.input };
    match provider
        .embedding(&req, &decrypted, std::time::Duration::from_secs(30))
        .await
    {
        Ok(resp) => {
            let data: Vec<Value> = resp
                .vectors
                .iter()
                .enumerate()
                .map(|(i, vector)| serde_json::json!({ "object": "embedding", "embedding": vector, "index": i }))
                .collect();
            (
                StatusCode::OK,
                Json(serde_json::json!({
                    "object": "list",
                    "data": data,
                    "model": resp.model,
                    "usage": { "prompt_tokens": resp.usage.prompt_tokens, "total_tokens": resp.usage.total_tokens },
                })),
            )
                .into_response()
        }
        Err(err) => error_envelope(
            StatusCode::from_u16(err.status.unwrap_or(502)).unwrap_or(StatusCode::BAD_GATEWAY),
            err.message,
            err.class.as_str(),
            &request_id,
        ),
    }
}
