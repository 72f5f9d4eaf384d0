//! AgroSense HTTP API
//!
//! Thin axum layer over `ConversationGateway`. Every error leaves as JSON
//! `{"detail", "type"}` with a fixed user-safe message.

pub mod config;

use std::net::SocketAddr;
use std::sync::Arc;

use agrosense_core::gateway::ChatRequest;
use agrosense_core::{AgroError, ConversationGateway};
use axum::{
    extract::{rejection::JsonRejection, ConnectInfo, Path, Query, State},
    http::{HeaderMap, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

pub use config::{AppConfig, ServerConfig};

#[derive(thiserror::Error, Debug)]
pub enum ApiError {
    #[error(transparent)]
    Core(#[from] AgroError),
    #[error("malformed request body: {0}")]
    Body(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let err = match self {
            ApiError::Body(reason) => {
                warn!(target: "bridge", reason = %reason, "Rejected request body");
                return (
                    StatusCode::UNPROCESSABLE_ENTITY,
                    Json(json!({
                        "detail": "Request body must be JSON with a non-empty \"message\" field.",
                        "type": "validation_error",
                    })),
                )
                    .into_response();
            }
            ApiError::Core(err) => err,
        };

        let status = match &err {
            AgroError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AgroError::SessionNotFound(_) => StatusCode::NOT_FOUND,
            AgroError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            error!(target: "bridge", error = %err, "Request failed");
        } else {
            warn!(target: "bridge", error = %err, status = status.as_u16(), "Request rejected");
        }

        let mut body = json!({
            "detail": err.user_message(),
            "type": err.kind(),
        });
        if let AgroError::RateLimited { limit, window_secs } = &err {
            body["limit"] = json!(limit);
            body["window_secs"] = json!(window_secs);
        }
        (status, Json(body)).into_response()
    }
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;

#[derive(Clone)]
pub struct AppState {
    pub gateway: Arc<ConversationGateway>,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    pub fn new(gateway: Arc<ConversationGateway>) -> Self {
        Self {
            gateway,
            started_at: Utc::now(),
        }
    }
}

/// Router with CORS and request tracing. An empty origin list allows any.
pub fn build_router(state: AppState, allowed_origins: &[String]) -> Router {
    Router::new()
        .route("/", get(root_handler))
        .route("/health", get(health_handler))
        .route("/api/v1/chat", post(chat_handler))
        .route("/api/v1/status/:session_id", get(status_handler))
        .route("/api/v1/session/:session_id", delete(end_session_handler))
        .route("/api/v1/weather", get(weather_handler))
        .layer(cors_layer(allowed_origins))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|o| match HeaderValue::from_str(o) {
            Ok(v) => Some(v),
            Err(_) => {
                warn!(target: "bridge", origin = %o, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    let allow_origin = if origins.is_empty() {
        AllowOrigin::from(Any)
    } else {
        AllowOrigin::list(origins)
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_headers(Any)
}

/// First `X-Forwarded-For` entry, else the peer address
pub fn client_ip(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|ip| !ip.is_empty())
        .map(str::to_string)
        .or_else(|| peer.map(|p| p.ip().to_string()))
        .unwrap_or_else(|| "unknown".to_string())
}

async fn root_handler() -> impl IntoResponse {
    Json(json!({
        "service": "AgroSense",
        "description": "Conversational agricultural advisory API",
        "version": env!("CARGO_PKG_VERSION"),
        "status": "running",
    }))
}

async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let context_records = match state.gateway.context_records().await {
        Ok(n) => json!(n),
        Err(e) => {
            warn!(target: "bridge", error = %e, "Could not count context records");
            json!(null)
        }
    };
    let now = Utc::now();
    Json(json!({
        "status": "healthy",
        "timestamp": now.to_rfc3339(),
        "uptime_secs": (now - state.started_at).num_seconds(),
        "components": {
            "session_store": state.gateway.session_backend(),
            "model": state.gateway.model_name(),
            "context_records": context_records,
        }
    }))
}

async fn chat_handler(
    State(state): State<AppState>,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    body: std::result::Result<Json<ChatRequest>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let Json(request) = body.map_err(|e| ApiError::Body(e.body_text()))?;
    let ip = client_ip(&headers, peer.map(|ConnectInfo(addr)| addr));
    let response = state.gateway.handle_turn(request, &ip).await?;
    if response.requires_action {
        info!(target: "bridge", session = %response.session_id, "Diagnosis started");
    }
    Ok(Json(response))
}

async fn status_handler(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let status = state.gateway.status(&session_id).await?;
    let code = if status.is_known() {
        StatusCode::OK
    } else {
        StatusCode::NOT_FOUND
    };
    Ok((code, Json(status)))
}

async fn end_session_handler(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    state.gateway.end_session(&session_id).await?;
    Ok(Json(json!({
        "session_id": session_id,
        "status": "ended",
        "message": "Session ended",
    })))
}

#[derive(Debug, Deserialize)]
struct WeatherQuery {
    region: Option<String>,
}

async fn weather_handler(
    State(state): State<AppState>,
    Query(query): Query<WeatherQuery>,
) -> ApiResult<impl IntoResponse> {
    let region = query
        .region
        .map(|r| r.trim().to_string())
        .filter(|r| !r.is_empty())
        .ok_or_else(|| AgroError::Validation("region query parameter is required".into()))?;

    let snapshot = state.gateway.regional_snapshot(&region).await;
    Ok(Json(json!({
        "region": region,
        "temperature": snapshot.temperature,
        "humidity": snapshot.humidity,
        "condition": snapshot.condition,
        "market_price": snapshot.market_price,
    })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_ip_prefers_forwarded_header() {
        let peer: SocketAddr = "10.1.2.3:5555".parse().unwrap();
        let mut headers = HeaderMap::new();
        assert_eq!(client_ip(&headers, Some(peer)), "10.1.2.3");

        headers.insert("x-forwarded-for", HeaderValue::from_static("203.0.113.4, 10.0.0.1"));
        assert_eq!(client_ip(&headers, Some(peer)), "203.0.113.4");

        assert_eq!(client_ip(&HeaderMap::new(), None), "unknown");
    }

    #[test]
    fn test_rate_limited_body() {
        let resp = ApiError::from(AgroError::RateLimited {
            limit: 30,
            window_secs: 60,
        })
        .into_response();
        assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);
    }
}
