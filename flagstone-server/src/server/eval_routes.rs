//! The high-traffic evaluation surface.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::Json;
use serde_json::{Map, Value};

use flagstone::{EvalInput, FlagResult, RequestInfo};

use super::auth::{authorize, TokenAudience};
use super::error::ApiError;
use super::metrics::metrics;
use super::state::AppState;
use super::tenant::tenant_from_headers;

/// Countries in the EU, for the best-effort `geo.isEUCountry` field.
const EU_COUNTRIES: &[&str] = &[
    "AT", "BE", "BG", "HR", "CY", "CZ", "DK", "EE", "FI", "FR", "DE", "GR", "HU", "IE", "IT",
    "LV", "LT", "LU", "MT", "NL", "PL", "PT", "RO", "SK", "SI", "ES", "SE",
];

/// Headers never forwarded into the expression context.
const REDACTED_HEADERS: &[&str] = &["authorization", "cookie"];

// ── POST /evaluate ──────────────────────────────────────────

pub async fn handle_evaluate_all(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    payload: Result<Json<EvalInput>, JsonRejection>,
) -> Result<Json<BTreeMap<String, FlagResult>>, ApiError> {
    let start = Instant::now();
    authorize(&state.config.auth, &headers, TokenAudience::Evaluation)?;
    let tenant = tenant_from_headers(&headers);

    let Json(mut input) = payload.map_err(|e| ApiError::InvalidInput(e.to_string()))?;
    augment_input(&mut input, &headers);

    let document = state.store.get_data(&tenant).await.map_err(|e| {
        metrics()
            .eval_errors
            .with_label_values(&[&tenant.to_string()])
            .inc();
        ApiError::from(e)
    })?;

    let results = state.engine.evaluate_all(&document, &input, None);

    let m = metrics();
    let tenant_label = tenant.to_string();
    m.eval_total.with_label_values(&[&tenant_label]).inc();
    m.eval_duration
        .with_label_values(&[&tenant_label])
        .observe(start.elapsed().as_secs_f64());

    Ok(Json(results))
}

// ── POST /evaluate/{flag_id} ────────────────────────────────

pub async fn handle_evaluate_one(
    State(state): State<Arc<AppState>>,
    Path(flag_id): Path<String>,
    headers: HeaderMap,
    payload: Result<Json<EvalInput>, JsonRejection>,
) -> Result<Json<FlagResult>, ApiError> {
    let start = Instant::now();
    authorize(&state.config.auth, &headers, TokenAudience::Evaluation)?;
    let tenant = tenant_from_headers(&headers);

    let Json(mut input) = payload.map_err(|e| ApiError::InvalidInput(e.to_string()))?;
    augment_input(&mut input, &headers);

    let document = state.store.get_data(&tenant).await?;
    let Some(flag) = document.flags.get(&flag_id) else {
        return Err(ApiError::NotFound(format!("flag not found: {flag_id}")));
    };

    let result = state
        .engine
        .evaluate(flag, &document.segments, &input, None);

    let m = metrics();
    let tenant_label = tenant.to_string();
    m.eval_total.with_label_values(&[&tenant_label]).inc();
    m.eval_duration
        .with_label_values(&[&tenant_label])
        .observe(start.elapsed().as_secs_f64());

    Ok(Json(result))
}

// ── Context augmentation ────────────────────────────────────

/// Attach the transport-derived sections of the context: best-effort geo
/// and the request headers. Callers cannot spoof either through the body.
pub fn augment_input(input: &mut EvalInput, headers: &HeaderMap) {
    input.geo = geo_from_headers(headers);
    input.request = Some(RequestInfo {
        headers: forwardable_headers(headers),
    });
}

/// Geo details from CDN-style headers; every field is optional and an
/// empty record collapses to `null`.
fn geo_from_headers(headers: &HeaderMap) -> Option<Value> {
    let text = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    };

    let mut geo = Map::new();
    if let Some(country) = text("cf-ipcountry").or_else(|| text("x-geo-country")) {
        let country = country.to_uppercase();
        geo.insert(
            "isEUCountry".to_string(),
            Value::Bool(EU_COUNTRIES.contains(&country.as_str())),
        );
        geo.insert("country".to_string(), Value::String(country));
    }
    if let Some(continent) = text("x-geo-continent") {
        geo.insert("continent".to_string(), Value::String(continent));
    }
    if let Some(region) = text("x-geo-region") {
        geo.insert("region".to_string(), Value::String(region));
    }
    if let Some(city) = text("x-geo-city") {
        geo.insert("city".to_string(), Value::String(city));
    }
    for (header, field) in [("x-geo-latitude", "latitude"), ("x-geo-longitude", "longitude")] {
        if let Some(raw) = text(header) {
            if let Ok(parsed) = raw.parse::<f64>() {
                if let Some(number) = serde_json::Number::from_f64(parsed) {
                    geo.insert(field.to_string(), Value::Number(number));
                }
            }
        }
    }

    if geo.is_empty() {
        None
    } else {
        Some(Value::Object(geo))
    }
}

fn forwardable_headers(headers: &HeaderMap) -> BTreeMap<String, String> {
    headers
        .iter()
        .filter(|(name, _)| !REDACTED_HEADERS.contains(&name.as_str()))
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_string(), v.to_string()))
        })
        .collect()
}
