//! HTTP server setup.
//!
//! Mock traffic goes through a fallback handler into [`MockApi::handle`];
//! scenario management, resource export, metrics and health live under the
//! configured admin prefix.

use crate::api::{ApiRequest, ApiResponse, MockApi, ResourceExport};
use crate::error::Error;
use crate::metrics::{MetricsSnapshot, RequestMetrics};
use crate::scenario::{Scenario, ScenarioDefinition};
use axum::{
    body::{Body, Bytes},
    extract::{Path, State},
    http::{header::HeaderName, HeaderMap, HeaderValue, Method, StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use uuid::Uuid;

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub api: Arc<MockApi>,
    pub metrics: Arc<RequestMetrics>,
}

/// Build the router: admin API under the configured prefix, mock traffic
/// everywhere else.
pub fn build_router(state: AppState) -> Router {
    let prefix = state.api.settings().admin_prefix.clone();

    let admin = Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics_snapshot))
        .route("/resources", get(export_resources))
        .route("/scenarios", get(list_scenarios).post(create_scenario))
        .route(
            "/scenarios/{uuid}",
            get(get_scenario).put(update_scenario).delete(delete_scenario),
        );

    Router::new()
        .nest(&prefix, admin)
        .fallback(mock_handler)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Serve `router` on `listener` until Ctrl-C.
pub async fn serve(listener: TcpListener, router: Router) -> std::io::Result<()> {
    let addr = listener.local_addr()?;
    info!(address = %addr, "HTTP server starting");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("HTTP server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

/// Flatten multi-value headers, keeping the first value of each name.
fn flatten_headers(headers: &HeaderMap) -> HashMap<String, String> {
    let mut flat = HashMap::new();
    for (name, value) in headers {
        if let Ok(value) = value.to_str() {
            flat.entry(name.as_str().to_string())
                .or_insert_with(|| value.to_string());
        }
    }
    flat
}

fn into_http(api_response: ApiResponse) -> Response {
    let status =
        StatusCode::from_u16(api_response.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let mut response = Response::new(Body::from(api_response.body));
    *response.status_mut() = status;

    let headers = response.headers_mut();
    for (name, value) in &api_response.headers {
        match (
            HeaderName::try_from(name.as_str()),
            HeaderValue::try_from(value.as_str()),
        ) {
            (Ok(name), Ok(value)) => {
                headers.append(name, value);
            }
            _ => warn!(header = %name, "Dropping invalid response header"),
        }
    }
    response
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        into_http(ApiResponse::from_error(&self))
    }
}

async fn mock_handler(
    State(state): State<AppState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let request = ApiRequest {
        method: method.as_str().to_string(),
        path: uri.path().to_string(),
        headers: flatten_headers(&headers),
        body: body.to_vec(),
    };
    into_http(state.api.handle(&request))
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

async fn metrics_snapshot(State(state): State<AppState>) -> Json<MetricsSnapshot> {
    Json(state.metrics.snapshot())
}

async fn export_resources(State(state): State<AppState>) -> Result<Json<ResourceExport>, Error> {
    Ok(Json(state.api.export_resources()?))
}

async fn list_scenarios(State(state): State<AppState>) -> Result<Json<Vec<Scenario>>, Error> {
    Ok(Json(state.api.scenarios().list()?))
}

async fn create_scenario(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<(StatusCode, Json<Scenario>), Error> {
    let definition: ScenarioDefinition = serde_json::from_slice(&body)?;
    let scenario = state.api.scenarios().create(definition)?;
    info!(uuid = %scenario.uuid, request_path = %scenario.request_path, "Scenario registered");
    Ok((StatusCode::CREATED, Json(scenario)))
}

async fn get_scenario(
    State(state): State<AppState>,
    Path(uuid): Path<String>,
) -> Result<Json<Scenario>, Error> {
    let uuid = parse_uuid(&uuid)?;
    Ok(Json(state.api.scenarios().get(&uuid)?))
}

async fn update_scenario(
    State(state): State<AppState>,
    Path(uuid): Path<String>,
    body: Bytes,
) -> Result<Json<Scenario>, Error> {
    let uuid = parse_uuid(&uuid)?;
    let definition: ScenarioDefinition = serde_json::from_slice(&body)?;
    Ok(Json(state.api.scenarios().update(&uuid, definition)?))
}

async fn delete_scenario(
    State(state): State<AppState>,
    Path(uuid): Path<String>,
) -> Result<StatusCode, Error> {
    let uuid = parse_uuid(&uuid)?;
    state.api.scenarios().delete(&uuid)?;
    Ok(StatusCode::NO_CONTENT)
}

fn parse_uuid(raw: &str) -> Result<Uuid, Error> {
    Uuid::parse_str(raw).map_err(|e| Error::invalid(format!("invalid scenario uuid: {}", e)))
}
