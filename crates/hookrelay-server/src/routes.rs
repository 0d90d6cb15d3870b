//! HTTP surface: webhook ingress and the admin API.

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post, put},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use hookrelay_core::{ConnectionId, DropCause, RouterError, RouterOutcome, TenantRecord};

use crate::admissions::AdmissionSurface;
use crate::state::AppState;
use crate::ws;

/// Build the full application router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api", get(service_info))
        .route("/health", get(health))
        .route("/api/webhook", post(webhook))
        .route("/ws/:secret", get(ws::handler))
        .route("/api/tenants", get(list_tenants).post(create_tenant))
        .route("/api/tenants/stats", get(tenant_stats))
        .route("/api/tenants/:id", put(update_tenant).delete(delete_tenant))
        .route("/api/tenants/:id/enable", post(enable_tenant))
        .route("/api/tenants/:id/disable", post(disable_tenant))
        .route("/api/connections", get(list_connections))
        .route("/api/connections/:id/kick", post(kick_connection))
        .route("/api/admissions", get(list_admissions))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(json!({ "error": message.into() }))).into_response()
}

async fn service_info() -> Json<Value> {
    Json(json!({
        "service": "hookrelay",
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": {
            "webhook": "POST /api/webhook?secret=<secret>",
            "websocket": "GET /ws/<secret>",
            "tenants": "GET /api/tenants",
            "connections": "GET /api/connections",
            "health": "GET /health",
        },
    }))
}

async fn health(State(state): State<AppState>) -> Json<Value> {
    let uptime = (Utc::now() - state.started_at).num_seconds();
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_seconds": uptime,
        "connections": state.manager.stats(),
        "tenants": state.registry.stats(),
    }))
}

#[derive(Debug, Deserialize)]
struct WebhookQuery {
    secret: String,
}

/// Webhook ingress. The body is either a verification handshake, answered
/// inline, or a payload fanned out to the tenant's subscribers.
async fn webhook(
    State(state): State<AppState>,
    Query(query): Query<WebhookQuery>,
    Json(body): Json<Value>,
) -> Response {
    match state.router.handle(&query.secret, &body) {
        Ok(RouterOutcome::Handshake(response)) => {
            state
                .admissions
                .record(&query.secret, AdmissionSurface::Webhook, true, None);
            Json(response).into_response()
        }
        Ok(RouterOutcome::Dispatched(result)) => {
            state
                .admissions
                .record(&query.secret, AdmissionSurface::Webhook, true, None);
            Json(result).into_response()
        }
        Err(error @ RouterError::AdmissionDenied) => {
            state.admissions.record(
                &query.secret,
                AdmissionSurface::Webhook,
                false,
                Some(error.to_string()),
            );
            error_response(StatusCode::FORBIDDEN, error.to_string())
        }
        Err(error) => {
            tracing::error!(%error, "webhook handling failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, error.to_string())
        }
    }
}

/// Tenant record plus its live-connection count.
#[derive(Debug, Serialize)]
struct TenantView {
    id: String,
    enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_connections: Option<u32>,
    created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    last_used: Option<DateTime<Utc>>,
    active_connections: usize,
}

impl TenantView {
    fn from_record(state: &AppState, id: String, record: TenantRecord) -> Self {
        let active_connections = state.manager.count(&id);
        Self {
            id,
            enabled: record.enabled,
            description: record.description,
            max_connections: record.max_connections,
            created_at: record.created_at,
            last_used: record.last_used,
            active_connections,
        }
    }
}

async fn list_tenants(State(state): State<AppState>) -> Json<Vec<TenantView>> {
    let tenants = state
        .registry
        .list()
        .into_iter()
        .map(|(id, record)| TenantView::from_record(&state, id, record))
        .collect();
    Json(tenants)
}

#[derive(Debug, Deserialize)]
struct CreateTenant {
    id: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    max_connections: Option<u32>,
    #[serde(default = "default_true")]
    enabled: bool,
}

const fn default_true() -> bool {
    true
}

async fn create_tenant(
    State(state): State<AppState>,
    Json(request): Json<CreateTenant>,
) -> Response {
    if request.id.is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "Tenant id must not be empty");
    }
    if state.registry.contains(&request.id) {
        return error_response(StatusCode::CONFLICT, "Tenant already exists");
    }

    let mut record = TenantRecord::new().with_enabled(request.enabled);
    record.description = request.description;
    record.max_connections = request.max_connections;
    state.registry.upsert(&request.id, record.clone());
    tracing::info!(tenant = %request.id, "tenant created");

    (
        StatusCode::CREATED,
        Json(TenantView::from_record(&state, request.id, record)),
    )
        .into_response()
}

/// Present-but-null and absent deserialize differently: absent means
/// "leave unchanged", an explicit `null` clears the field.
fn present<'de, T, D>(deserializer: D) -> Result<Option<T>, D::Error>
where
    T: serde::Deserialize<'de>,
    D: serde::Deserializer<'de>,
{
    serde::Deserialize::deserialize(deserializer).map(Some)
}

#[derive(Debug, Deserialize)]
struct UpdateTenant {
    #[serde(default, deserialize_with = "present")]
    description: Option<Option<String>>,
    #[serde(default, deserialize_with = "present")]
    max_connections: Option<Option<u32>>,
    #[serde(default)]
    enabled: Option<bool>,
}

async fn update_tenant(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<UpdateTenant>,
) -> Response {
    let Some(mut record) = state.registry.get(&id) else {
        return error_response(StatusCode::NOT_FOUND, "Unknown tenant");
    };

    if let Some(description) = request.description {
        record.description = description;
    }
    if let Some(max) = request.max_connections {
        record.max_connections = max;
    }
    if let Some(enabled) = request.enabled {
        record.enabled = enabled;
    }
    state.registry.upsert(&id, record.clone());

    if request.enabled == Some(false) {
        state.manager.evict_tenant(&id, DropCause::TenantRevoked);
    }
    Json(TenantView::from_record(&state, id, record)).into_response()
}

async fn delete_tenant(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    if !state.registry.remove(&id) {
        return error_response(StatusCode::NOT_FOUND, "Unknown tenant");
    }
    let evicted = state.manager.evict_tenant(&id, DropCause::TenantRevoked);
    tracing::info!(tenant = %id, evicted, "tenant deleted");
    Json(json!({ "deleted": id, "evicted_connections": evicted })).into_response()
}

async fn enable_tenant(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    if !state.registry.set_enabled(&id, true) {
        return error_response(StatusCode::NOT_FOUND, "Unknown tenant");
    }
    Json(json!({ "id": id, "enabled": true })).into_response()
}

async fn disable_tenant(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    if !state.registry.set_enabled(&id, false) {
        return error_response(StatusCode::NOT_FOUND, "Unknown tenant");
    }
    let evicted = state.manager.evict_tenant(&id, DropCause::TenantRevoked);
    Json(json!({ "id": id, "enabled": false, "evicted_connections": evicted })).into_response()
}

async fn tenant_stats(State(state): State<AppState>) -> Json<Value> {
    Json(json!(state.registry.stats()))
}

async fn list_connections(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "stats": state.manager.stats(),
        "tenants": state.manager.snapshot(),
    }))
}

async fn kick_connection(State(state): State<AppState>, Path(id): Path<u64>) -> Response {
    if !state.manager.remove(ConnectionId(id), DropCause::AdminKick) {
        return error_response(StatusCode::NOT_FOUND, "Unknown connection");
    }
    Json(json!({ "kicked": id })).into_response()
}

#[derive(Debug, Deserialize)]
struct AdmissionsQuery {
    #[serde(default)]
    allowed: Option<bool>,
}

async fn list_admissions(
    State(state): State<AppState>,
    Query(query): Query<AdmissionsQuery>,
) -> Json<Value> {
    let entries: Vec<_> = state
        .admissions
        .snapshot()
        .into_iter()
        .filter(|entry| query.allowed.map_or(true, |allowed| entry.allowed == allowed))
        .collect();
    Json(json!(entries))
}
