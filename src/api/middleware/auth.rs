//! Bearer token verification.
//!
//! The API trusts a single static token shared with operators. Requests
//! missing or mismatching it never reach a handler; this also guards the
//! WebSocket attach, which upgrades only after the middleware has passed.

use axum::{
    Json,
    body::Body,
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde_json::json;

pub async fn auth_middleware(
    State(expected_token): State<String>,
    request: Request<Body>,
    next: Next,
) -> Result<Response, AuthError> {
    let header = request
        .headers()
        .get("Authorization")
        .and_then(|v| v.to_str().ok())
        .ok_or(AuthError::MissingToken)?;

    let token = header
        .strip_prefix("Bearer ")
        .ok_or(AuthError::NotBearer)?;

    if token != expected_token {
        return Err(AuthError::WrongToken);
    }

    Ok(next.run(request).await)
}

#[derive(Debug)]
pub enum AuthError {
    MissingToken,
    NotBearer,
    WrongToken,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AuthError::MissingToken => (StatusCode::UNAUTHORIZED, "missing Authorization header"),
            AuthError::NotBearer => (
                StatusCode::UNAUTHORIZED,
                "expected Authorization: Bearer <token>",
            ),
            AuthError::WrongToken => (StatusCode::FORBIDDEN, "invalid token"),
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}
