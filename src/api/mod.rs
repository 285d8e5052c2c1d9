//! REST API and WebSocket ingress.
//!
//! ## Endpoints
//!
//! - `POST /api/v1/services` - register a service for monitoring
//! - `GET /api/v1/services` - list registered services
//! - `GET /api/v1/services/:id/health-checks` - paginated probe outcomes
//! - `WS /api/v1/services/ws` - real-time status-change stream
//! - `GET /api/v1/health` - liveness check
//!
//! All `/services` routes sit behind the bearer middleware when an auth
//! token is configured.

pub mod error;
pub mod middleware;
pub mod routes;
pub mod state;

pub use error::{ApiError, ApiResult};
pub use state::ApiState;

use std::net::SocketAddr;

use axum::{Router, routing::get, routing::post};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

/// API server configuration
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Bind address (e.g., "0.0.0.0:8080")
    pub bind_addr: SocketAddr,

    /// Optional authentication token
    pub auth_token: Option<String>,

    /// Enable CORS for browser clients
    pub enable_cors: bool,
}

/// Build the application router.
pub fn router(config: &ApiConfig, state: ApiState) -> Router {
    let mut services = Router::new()
        .route("/", post(routes::register_service).get(routes::list_services))
        .route("/:id/health-checks", get(routes::get_health_checks))
        .route("/ws", get(routes::websocket_handler));

    if let Some(token) = config.auth_token.clone() {
        services = services.layer(axum::middleware::from_fn_with_state(
            token,
            middleware::auth::auth_middleware,
        ));
    }

    let mut app = Router::new()
        .route("/api/v1/health", get(routes::health))
        .nest("/api/v1/services", services)
        .with_state(state)
        .layer(TraceLayer::new_for_http());

    if config.enable_cors {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);
        app = app.layer(cors);
    }

    app
}

/// Spawn the API server in a background task; returns the bound address.
pub async fn spawn_api_server(config: ApiConfig, state: ApiState) -> anyhow::Result<SocketAddr> {
    info!("starting API server on {}", config.bind_addr);

    let app = router(&config, state);

    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    let addr = listener.local_addr()?;
    info!("API server listening on {}", addr);

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!("API server error: {}", e);
        }
    });

    Ok(addr)
}
