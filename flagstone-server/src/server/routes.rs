//! The management surface: definition reads, validated mutations and
//! cross-environment sync.

use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use flagstone::{FlagDefinition, TenantKey};

use super::auth::{authorize, TokenAudience};
use super::error::ApiError;
use super::metrics::metrics;
use super::state::AppState;
use super::tenant::tenant_from_headers;

// ── Helpers ─────────────────────────────────────────────────

fn body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    payload
        .map(|Json(inner)| inner)
        .map_err(|e| ApiError::InvalidInput(e.to_string()))
}

fn record_mutation(op: &str, ok: bool) {
    metrics()
        .mutation_total
        .with_label_values(&[op, if ok { "ok" } else { "error" }])
        .inc();
}

async fn refresh_flags_gauge(state: &AppState, tenant: &TenantKey) {
    if let Ok(document) = state.store.get_data(tenant).await {
        metrics()
            .flags_total
            .with_label_values(&[&tenant.to_string()])
            .set(document.flags.len() as i64);
    }
}

/// Rules that do not parse are legal to store (they evaluate to false) but
/// worth flagging to the operator at write time.
fn expression_warnings(state: &AppState, expressions: &[&str]) -> Vec<String> {
    expressions
        .iter()
        .filter_map(|text| {
            state
                .engine
                .check_expression(text)
                .err()
                .map(|e| format!("'{text}': {e}"))
        })
        .collect()
}

// ── GET /health ─────────────────────────────────────────────

pub async fn handle_health() -> Json<Value> {
    Json(json!({"status": "ok"}))
}

// ── GET /api/definitions ────────────────────────────────────

pub async fn handle_get_definitions(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    authorize(&state.config.auth, &headers, TokenAudience::Management)?;
    let tenant = tenant_from_headers(&headers);
    let document = state.store.get_data(&tenant).await?;
    let meta = state.store.get_meta(&tenant).await?;
    Ok(Json(json!({
        "flags": document.flags,
        "segments": document.segments,
        "meta": meta,
    })))
}

// ── PUT /api/flags ──────────────────────────────────────────

pub async fn handle_put_flag(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    payload: Result<Json<FlagDefinition>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    authorize(&state.config.auth, &headers, TokenAudience::Management)?;
    let tenant = tenant_from_headers(&headers);
    let flag = body(payload)?;

    let rules: Vec<&str> = flag.rules.iter().map(String::as_str).collect();
    let warnings = expression_warnings(&state, &rules);

    let result = state.store.put_flag(&tenant, flag).await;
    record_mutation("put_flag", result.is_ok());
    result?;
    refresh_flags_gauge(&state, &tenant).await;

    Ok(Json(json!({"status": "ok", "warnings": warnings})))
}

// ── PATCH /api/flags/{id} ───────────────────────────────────

pub async fn handle_update_flag(
    State(state): State<Arc<AppState>>,
    Path(flag_id): Path<String>,
    headers: HeaderMap,
    payload: Result<Json<Value>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    authorize(&state.config.auth, &headers, TokenAudience::Management)?;
    let tenant = tenant_from_headers(&headers);
    let patch = body(payload)?;

    // An empty patch is almost certainly a client bug; reject it here
    // rather than writing the document back unchanged.
    if patch.as_object().map_or(true, |fields| fields.is_empty()) {
        record_mutation("update_flag", false);
        return Err(ApiError::InvalidInput("patch must be a non-empty object".into()));
    }

    let result = state.store.update_flag(&tenant, &flag_id, &patch).await;
    record_mutation("update_flag", result.is_ok());
    let updated = result?;

    Ok(Json(json!({"status": "ok", "flag": updated})))
}

// ── DELETE /api/flags/{id} ──────────────────────────────────

pub async fn handle_delete_flag(
    State(state): State<Arc<AppState>>,
    Path(flag_id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    authorize(&state.config.auth, &headers, TokenAudience::Management)?;
    let tenant = tenant_from_headers(&headers);

    let result = state.store.delete_flag(&tenant, &flag_id).await;
    record_mutation("delete_flag", result.is_ok());
    result?;
    refresh_flags_gauge(&state, &tenant).await;

    Ok(Json(json!({"status": "ok"})))
}

// ── PUT /api/segments/{id} ──────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct PutSegmentBody {
    pub rule: String,
}

pub async fn handle_put_segment(
    State(state): State<Arc<AppState>>,
    Path(segment_id): Path<String>,
    headers: HeaderMap,
    payload: Result<Json<PutSegmentBody>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    authorize(&state.config.auth, &headers, TokenAudience::Management)?;
    let tenant = tenant_from_headers(&headers);
    let segment = body(payload)?;

    let warnings = expression_warnings(&state, &[segment.rule.as_str()]);

    let result = state
        .store
        .put_segment(&tenant, &segment_id, segment.rule)
        .await;
    record_mutation("put_segment", result.is_ok());
    result?;

    Ok(Json(json!({"status": "ok", "warnings": warnings})))
}

// ── DELETE /api/segments/{id} ───────────────────────────────

pub async fn handle_delete_segment(
    State(state): State<Arc<AppState>>,
    Path(segment_id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    authorize(&state.config.auth, &headers, TokenAudience::Management)?;
    let tenant = tenant_from_headers(&headers);

    let result = state.store.delete_segment(&tenant, &segment_id).await;
    record_mutation("delete_segment", result.is_ok());
    result?;

    Ok(Json(json!({"status": "ok"})))
}

// ── POST /api/sync and /api/sync/{flag_id} ──────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncRequest {
    /// Defaults to the caller's tenant environment.
    pub source_env: Option<String>,
    pub target_env: String,
    #[serde(default)]
    pub overwrite: bool,
}

pub async fn handle_sync_env(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    payload: Result<Json<SyncRequest>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    authorize(&state.config.auth, &headers, TokenAudience::Management)?;
    let tenant = tenant_from_headers(&headers);
    let request = body(payload)?;

    let source_env = request.source_env.as_deref().unwrap_or(&tenant.env);
    let result = state
        .store
        .sync_env(&tenant, source_env, &request.target_env, request.overwrite)
        .await;
    record_mutation("sync_env", result.is_ok());
    let outcome = result?;

    Ok(Json(json!({"status": "ok", "synced": outcome})))
}

pub async fn handle_sync_flag(
    State(state): State<Arc<AppState>>,
    Path(flag_id): Path<String>,
    headers: HeaderMap,
    payload: Result<Json<SyncRequest>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    authorize(&state.config.auth, &headers, TokenAudience::Management)?;
    let tenant = tenant_from_headers(&headers);
    let request = body(payload)?;

    let source_env = request.source_env.as_deref().unwrap_or(&tenant.env);
    let result = state
        .store
        .sync_flag(
            &tenant,
            &flag_id,
            source_env,
            &request.target_env,
            request.overwrite,
        )
        .await;
    record_mutation("sync_flag", result.is_ok());
    let outcome = result?;

    Ok(Json(json!({"status": "ok", "synced": outcome})))
}
