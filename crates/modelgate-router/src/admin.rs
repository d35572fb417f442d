use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, put};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

use modelgate_core::AppState;
use modelgate_storage::{NewCredential, NewMapping, NewProvider, Storage};

/// Thin CRUD surface over providers/credentials/mappings. Behavior beyond
/// persisting valid rows and refreshing the in-process snapshot is not
/// specified.
#[derive(Clone)]
pub struct AdminState {
    pub app: Arc<AppState>,
}

pub fn admin_router(app: Arc<AppState>) -> Router {
    let state = AdminState { app };

    Router::new()
        .route("/providers", get(list_providers).post(upsert_provider))
        .route("/providers/{name}/disable", put(disable_provider))
        .route(
            "/providers/{provider_id}/credentials",
            get(list_credentials).post(insert_credential),
        )
        .route("/credentials/{id}/disable", put(disable_credential))
        .route("/mappings", get(list_mappings).post(upsert_mapping))
        .route("/mappings/{id}/disable", put(disable_mapping))
        .layer(middleware::from_fn_with_state(state.clone(), admin_auth))
        .with_state(state)
}

fn hex_sha256(input: &str) -> String {
    let digest = Sha256::digest(input.as_bytes());
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

async fn admin_auth(
    State(state): State<AdminState>,
    headers: HeaderMap,
    req: axum::http::Request<axum::body::Body>,
    next: Next,
) -> Result<Response, StatusCode> {
    let token = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or(StatusCode::UNAUTHORIZED)?;

    let token_hash = hex_sha256(token);
    let user = state
        .app
        .storage
        .find_admin_user_by_token_hash(&token_hash)
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .ok_or(StatusCode::UNAUTHORIZED)?;

    if !user.is_admin || !user.enabled {
        return Err(StatusCode::FORBIDDEN);
    }

    Ok(next.run(req).await)
}

/// Pushes a fresh read of persistent storage into the live `ArcSwap`
/// snapshots after an admin write.
async fn refresh_snapshots(app: &AppState) -> Result<(), modelgate_storage::StorageError> {
    let snapshot = app.storage.load_snapshot().await?;
    app.resolver.replace_snapshot(snapshot.clone());
    app.credentials.replace_snapshot(snapshot);
    Ok(())
}

fn storage_error(err: modelgate_storage::StorageError) -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(serde_json::json!({ "error": "storage_error", "detail": err.to_string() })),
    )
        .into_response()
}

async fn list_providers(State(state): State<AdminState>) -> Response {
    match state.app.storage.load_snapshot().await {
        Ok(snapshot) => {
            let providers: Vec<Value> = snapshot
                .providers
                .values()
                .map(|p| {
                    serde_json::json!({
                        "id": p.id,
                        "name": p.name,
                        "kind": p.kind,
                        "base_url": p.base_url,
                        "status": p.status,
                        "request_timeout_seconds": p.request_timeout_seconds,
                    })
                })
                .collect();
            Json(serde_json::json!({ "providers": providers })).into_response()
        }
        Err(err) => storage_error(err),
    }
}

#[derive(Debug, Deserialize)]
struct PutProviderBody {
    name: String,
    kind: String,
    base_url: String,
    #[serde(default)]
    config: Value,
    #[serde(default = "default_active_status")]
    status: String,
    #[serde(default = "default_timeout_seconds")]
    request_timeout_seconds: i32,
    #[serde(default)]
    max_in_flight_retries: i32,
}

fn default_active_status() -> String {
    "active".to_string()
}

fn default_timeout_seconds() -> i32 {
    30
}

async fn upsert_provider(State(state): State<AdminState>, Json(body): Json<PutProviderBody>) -> Response {
    let result = state
        .app
        .storage
        .upsert_provider(NewProvider {
            name: body.name,
            kind: body.kind,
            base_url: body.base_url,
            config: body.config,
            status: body.status,
            request_timeout_seconds: body.request_timeout_seconds,
            max_in_flight_retries: body.max_in_flight_retries,
        })
        .await;

    match result {
        Ok(id) => {
            if let Err(err) = refresh_snapshots(&state.app).await {
                return storage_error(err);
            }
            (StatusCode::OK, Json(serde_json::json!({ "id": id }))).into_response()
        }
        Err(err) => storage_error(err),
    }
}

async fn disable_provider(State(state): State<AdminState>, Path(name): Path<String>) -> Response {
    let snapshot = match state.app.storage.load_snapshot().await {
        Ok(snapshot) => snapshot,
        Err(err) => return storage_error(err),
    };
    let Some(provider) = snapshot.providers.values().find(|p| p.name == name) else {
        return (StatusCode::NOT_FOUND, Json(serde_json::json!({ "error": "provider_not_found" })))
            .into_response();
    };

    let result = state
        .app
        .storage
        .upsert_provider(NewProvider {
            name: provider.name.clone(),
            kind: provider.kind.clone(),
            base_url: provider.base_url.clone(),
            config: provider.config.clone(),
            status: "disabled".to_string(),
            request_timeout_seconds: provider.request_timeout_seconds,
            max_in_flight_retries: provider.max_in_flight_retries,
        })
        .await;

    match result {
        Ok(_) => match refresh_snapshots(&state.app).await {
            Ok(()) => (StatusCode::OK, Json(serde_json::json!({ "ok": true }))).into_response(),
            Err(err) => storage_error(err),
        },
        Err(err) => storage_error(err),
    }
}

async fn list_credentials(State(state): State<AdminState>, Path(provider_id): Path<i64>) -> Response {
    match state.app.storage.load_snapshot().await {
        Ok(snapshot) => {
            let rows = snapshot
                .credentials_by_provider
                .get(&provider_id)
                .cloned()
                .unwrap_or_default();
            let credentials: Vec<Value> = rows
                .iter()
                .map(|c| {
                    serde_json::json!({
                        "id": c.id,
                        "key_id": c.key_id,
                        "priority": c.priority,
                        "status": c.status,
                        "consecutive_failures": c.consecutive_failures,
                        "current_daily_usage": c.current_daily_usage,
                        "current_monthly_usage": c.current_monthly_usage,
                    })
                })
                .collect();
            Json(serde_json::json!({ "credentials": credentials })).into_response()
        }
        Err(err) => storage_error(err),
    }
}

#[derive(Debug, Deserialize)]
struct PostCredentialBody {
    key_id: String,
    /// Plaintext API key; encrypted server-side before persistence.
    api_key: String,
    #[serde(default)]
    priority: i32,
    #[serde(default, rename = "requests_per_minute")]
    requests_per_minute: Option<i32>,
    #[serde(default, rename = "tokens_per_minute")]
    tokens_per_minute: Option<i32>,
    #[serde(default)]
    daily_quota: Option<i64>,
    #[serde(default)]
    monthly_quota: Option<i64>,
}

async fn insert_credential(
    State(state): State<AdminState>,
    Path(provider_id): Path<i64>,
    Json(body): Json<PostCredentialBody>,
) -> Response {
    let ciphertext = match state.app.credentials.encrypt(&body.api_key) {
        Ok(bytes) => bytes,
        Err(err) => {
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({ "error": "encrypt_failed", "detail": err.to_string() })),
            )
                .into_response()
        }
    };

    let result = state
        .app
        .storage
        .upsert_credential(NewCredential {
            provider_id,
            key_id: body.key_id,
            key_ciphertext: ciphertext,
            priority: body.priority,
            status: "active".to_string(),
            requests_per_minute: body.requests_per_minute,
            tokens_per_minute: body.tokens_per_minute,
            daily_quota: body.daily_quota,
            monthly_quota: body.monthly_quota,
        })
        .await;

    match result {
        Ok(id) => match refresh_snapshots(&state.app).await {
            Ok(()) => (StatusCode::OK, Json(serde_json::json!({ "id": id }))).into_response(),
            Err(err) => storage_error(err),
        },
        Err(err) => storage_error(err),
    }
}

async fn disable_credential(State(state): State<AdminState>, Path(id): Path<i64>) -> Response {
    let snapshot = match state.app.storage.load_snapshot().await {
        Ok(snapshot) => snapshot,
        Err(err) => return storage_error(err),
    };
    let Some(credential) = snapshot
        .credentials_by_provider
        .values()
        .flatten()
        .find(|c| c.id == id)
    else {
        return (StatusCode::NOT_FOUND, Json(serde_json::json!({ "error": "credential_not_found" })))
            .into_response();
    };

    let result = state
        .app
        .storage
        .upsert_credential(NewCredential {
            provider_id: credential.provider_id,
            key_id: credential.key_id.clone(),
            key_ciphertext: credential.key_ciphertext.clone(),
            priority: credential.priority,
            status: "disabled".to_string(),
            requests_per_minute: credential.requests_per_minute,
            tokens_per_minute: credential.tokens_per_minute,
            daily_quota: credential.daily_quota,
            monthly_quota: credential.monthly_quota,
        })
        .await;

    match result {
        Ok(_) => match refresh_snapshots(&state.app).await {
            Ok(()) => (StatusCode::OK, Json(serde_json::json!({ "ok": true }))).into_response(),
            Err(err) => storage_error(err),
        },
        Err(err) => storage_error(err),
    }
}

async fn list_mappings(State(state): State<AdminState>) -> Response {
    match state.app.storage.load_snapshot().await {
        Ok(snapshot) => {
            let mappings: Vec<Value> = snapshot
                .mappings_by_alias
                .values()
                .flatten()
                .map(|m| {
                    serde_json::json!({
                        "id": m.id,
                        "alias_name": m.alias_name,
                        "provider_id": m.provider_id,
                        "upstream_model": m.upstream_model,
                        "order_index": m.order_index,
                        "is_default": m.is_default,
                    })
                })
                .collect();
            Json(serde_json::json!({ "mappings": mappings })).into_response()
        }
        Err(err) => storage_error(err),
    }
}

#[derive(Debug, Deserialize)]
struct PutMappingBody {
    alias_name: String,
    provider_id: i64,
    upstream_model: String,
    #[serde(default)]
    order_index: i32,
    #[serde(default)]
    is_default: bool,
    #[serde(default)]
    config_overlay: Value,
}

async fn upsert_mapping(State(state): State<AdminState>, Json(body): Json<PutMappingBody>) -> Response {
    let result = state
        .app
        .storage
        .upsert_mapping(NewMapping {
            alias_name: body.alias_name,
            provider_id: body.provider_id,
            upstream_model: body.upstream_model,
            order_index: body.order_index,
            is_default: body.is_default,
            config_overlay: body.config_overlay,
        })
        .await;

    match result {
        Ok(id) => match refresh_snapshots(&state.app).await {
            Ok(()) => (StatusCode::OK, Json(serde_json::json!({ "id": id }))).into_response(),
            Err(err) => storage_error(err),
        },
        Err(err) => storage_error(err),
    }
}

async fn disable_mapping(State(state): State<AdminState>, Path(id): Path<i64>) -> Response {
    let snapshot = match state.app.storage.load_snapshot().await {
        Ok(snapshot) => snapshot,
        Err(err) => return storage_error(err),
    };
    let Some(mapping) = snapshot.mappings_by_alias.values().flatten().find(|m| m.id == id) else {
        return (StatusCode::NOT_FOUND, Json(serde_json::json!({ "error": "mapping_not_found" })))
            .into_response();
    };

    // Mappings have no status column, and pointing one at no provider isn't
    // representable. Pushing it to the back of the order and clearing
    // `is_default` is the closest thin-CRUD analog; operators who want it
    // gone should delete the row at the storage layer.
    let result = state
        .app
        .storage
        .upsert_mapping(NewMapping {
            alias_name: mapping.alias_name.clone(),
            provider_id: mapping.provider_id,
            upstream_model: mapping.upstream_model.clone(),
            order_index: i32::MAX,
            is_default: false,
            config_overlay: mapping.config_overlay.clone(),
        })
        .await;

    match result {
        Ok(_) => match refresh_snapshots(&state.app).await {
            Ok(()) => (StatusCode::OK, Json(serde_json::json!({ "ok": true }))).into_response(),
            Err(err) => storage_error(err),
        },
        Err(err) => storage_error(err),
    }
}
