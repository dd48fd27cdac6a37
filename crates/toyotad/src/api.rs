use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use axum::extract::Path;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::response::Response;
use axum::routing::get;
use axum::routing::post;
use axum::Json;
use axum::Router;
use serde::Deserialize;
use serde::Serialize;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use crate::engine::Engine;
use crate::engine::RouteError;

/// Response for the /v1/ping endpoint
#[derive(Serialize)]
struct PingResponse {
    status: String,
}

/// Response for the /v1/info endpoint
#[derive(Serialize)]
struct InfoResponse {
    version: String,
    hostname: String,
}

/// Body for POST /v1/services/:service
#[derive(Debug, Deserialize)]
struct ServiceRequest {
    /// VIN of the target vehicle
    vehicle: String,
}

#[derive(Serialize)]
struct AcceptedResponse {
    status: String,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

enum ApiError {
    Route(RouteError),
    BadAction(String),
}

impl From<RouteError> for ApiError {
    fn from(e: RouteError) -> Self {
        ApiError::Route(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error) = match self {
            ApiError::Route(e @ (RouteError::UnknownEntity(_) | RouteError::UnknownService(_))) => {
                (StatusCode::NOT_FOUND, e.to_string())
            }
            ApiError::Route(e @ RouteError::IntegrationStopped(_)) => {
                (StatusCode::SERVICE_UNAVAILABLE, e.to_string())
            }
            ApiError::BadAction(action) => (
                StatusCode::BAD_REQUEST,
                format!("Unknown lock action '{}', expected lock or unlock", action),
            ),
        };
        (status, Json(ErrorResponse { error })).into_response()
    }
}

fn accepted() -> impl IntoResponse {
    (
        StatusCode::ACCEPTED,
        Json(AcceptedResponse {
            status: "accepted".to_string(),
        }),
    )
}

/// Shared application state
#[derive(Clone)]
struct AppState {
    version: &'static str,
    engine: Arc<Engine>,
}

/// Handler for GET /v1/ping
#[tracing::instrument]
async fn ping() -> impl IntoResponse {
    tracing::debug!("Handling /v1/ping request");
    (
        StatusCode::OK,
        Json(PingResponse {
            status: "ok".to_string(),
        }),
    )
}

/// Handler for GET /v1/info
#[tracing::instrument(skip(state))]
async fn info(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    tracing::debug!("Handling /v1/info request");

    let hostname = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown".to_string());

    (
        StatusCode::OK,
        Json(InfoResponse {
            version: state.version.to_string(),
            hostname,
        }),
    )
}

/// Handler for GET /v1/state
#[tracing::instrument(skip(state))]
async fn entity_state(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let snapshot = state.engine.state_snapshot();
    (StatusCode::OK, Json(crate::engine::State::clone(&snapshot)))
}

/// Handler for POST /v1/services/:service
#[tracing::instrument(skip(state))]
async fn call_service(
    State(state): State<Arc<AppState>>,
    Path(service): Path<String>,
    Json(request): Json<ServiceRequest>,
) -> Result<impl IntoResponse, ApiError> {
    state.engine.call_service(service, request.vehicle)?;
    Ok(accepted())
}

/// Handler for POST /v1/locks/:entity_id/:action
#[tracing::instrument(skip(state))]
async fn lock_action(
    State(state): State<Arc<AppState>>,
    Path((entity_id, action)): Path<(String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    let lock = match action.as_str() {
        "lock" => true,
        "unlock" => false,
        _ => return Err(ApiError::BadAction(action)),
    };
    state.engine.send_lock_command(entity_id, lock)?;
    Ok(accepted())
}

/// Create the API router with all endpoints
fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/ping", get(ping))
        .route("/v1/info", get(info))
        .route("/v1/state", get(entity_state))
        .route("/v1/services/:service", post(call_service))
        .route("/v1/locks/:entity_id/:action", post(lock_action))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the HTTP API server
///
/// Binds to `listen:port` and serves until `shutdown_rx` fires. Commands are
/// accepted once routed; their outcome shows up in `/v1/state`.
pub async fn serve(
    listen: String,
    port: u16,
    engine: Arc<Engine>,
    shutdown_rx: tokio::sync::oneshot::Receiver<()>,
) -> anyhow::Result<()> {
    let version = env!("CARGO_PKG_VERSION");

    let state = Arc::new(AppState { version, engine });
    let app = create_router(state);

    let addr: SocketAddr = format!("{}:{}", listen, port)
        .parse()
        .with_context(|| format!("Invalid API listen address {}:{}", listen, port))?;
    tracing::info!("Starting HTTP API server on {}", addr);

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            shutdown_rx.await.ok();
            tracing::info!("HTTP API server shutting down gracefully");
        })
        .await?;

    Ok(())
}
