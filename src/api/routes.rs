//! Service registration, listing, and subscriber attachment.

use axum::{
    Json,
    extract::{Path, Query, State, WebSocketUpgrade},
    response::Response,
};
use chrono::{Duration, Utc};
use serde::Deserialize;
use serde_json::json;

use super::error::{ApiError, ApiResult};
use super::state::ApiState;
use crate::hub::connection::serve_subscriber;
use crate::{HealthCheck, NewService, Service, ServiceId};

const DEFAULT_PAGE: i64 = 1;
const DEFAULT_LIMIT: i64 = 10;

#[derive(Debug, Deserialize)]
pub struct RegisterServiceRequest {
    pub name: String,
    pub url: String,
    pub check_interval: i32,
}

#[derive(Debug, Deserialize)]
pub struct HealthCheckQuery {
    page: Option<i64>,
    limit: Option<i64>,
}

/// GET /api/v1/health
pub async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

/// POST /api/v1/services
///
/// Register a service; its first probe becomes due one interval from now.
pub async fn register_service(
    State(state): State<ApiState>,
    Json(body): Json<RegisterServiceRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    validate_registration(&body)?;

    state
        .repo
        .create_service(NewService {
            name: body.name,
            url: body.url,
            check_interval: body.check_interval,
            next_run_at: Utc::now() + Duration::seconds(body.check_interval as i64),
        })
        .await?;

    Ok(Json(json!({ "message": "service registered" })))
}

/// GET /api/v1/services
pub async fn list_services(State(state): State<ApiState>) -> ApiResult<Json<Vec<Service>>> {
    Ok(Json(state.repo.list_services().await?))
}

/// GET /api/v1/services/:id/health-checks
pub async fn get_health_checks(
    State(state): State<ApiState>,
    Path(service_id): Path<ServiceId>,
    Query(query): Query<HealthCheckQuery>,
) -> ApiResult<Json<Vec<HealthCheck>>> {
    let page = query.page.unwrap_or(DEFAULT_PAGE);
    let limit = query.limit.unwrap_or(DEFAULT_LIMIT);
    if page < 1 || limit < 1 {
        return Err(ApiError::InvalidRequest(
            "page and limit must be positive".to_string(),
        ));
    }

    let checks = state
        .repo
        .health_checks_for_service(service_id, page, limit)
        .await?;
    Ok(Json(checks))
}

/// WS /api/v1/services/ws
///
/// Upgrade and hand the connection to the hub as a new subscriber. Bearer
/// verification already happened in the middleware layer.
pub async fn websocket_handler(ws: WebSocketUpgrade, State(state): State<ApiState>) -> Response {
    ws.on_upgrade(move |socket| serve_subscriber(socket, state.hub.clone()))
}

fn validate_registration(body: &RegisterServiceRequest) -> ApiResult<()> {
    if body.name.trim().is_empty() {
        return Err(ApiError::InvalidRequest("name must not be empty".to_string()));
    }
    if body.check_interval < 1 {
        return Err(ApiError::InvalidRequest(
            "check_interval must be at least 1 second".to_string(),
        ));
    }

    let parsed = url::Url::parse(&body.url)
        .map_err(|e| ApiError::InvalidRequest(format!("invalid url: {e}")))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(ApiError::InvalidRequest(
            "url must be absolute http or https".to_string(),
        ));
    }

    Ok(())
}
