//! HTTP routes for the control surface.
//!
//! Handlers are thin: they work out the caller, call the
//! [`ControlFacade`], and map the result onto a status code. Callers
//! identify themselves with the `x-user-id` header; requests without one
//! share the anonymous bucket.

mod panel;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    extract::{DefaultBodyLimit, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::camera::{CameraState, CommandResult};
use crate::config::Config;
use crate::error::{Error, ErrorKind, Result};
use crate::facade::{AnalysisOutcome, Command, ControlFacade, Gated};
use crate::governor::{spawn_sweeper, CallerId};

pub use panel::PANEL_HTML;

/// Header carrying the caller identity.
pub const USER_ID_HEADER: &str = "x-user-id";

/// Header reporting the camera state alongside a frame.
pub const CAMERA_STATE_HEADER: &str = "x-camera-state";

/// Build the router.
///
/// `max_body_bytes` bounds request bodies, which in practice means the
/// source text sent to `/analyze`.
pub fn router(facade: ControlFacade, max_body_bytes: usize) -> Router {
    Router::new()
        .route("/", get(serve_panel))
        .route("/health", get(health))
        .route("/camera/start", post(camera_start))
        .route("/camera/pause", post(camera_pause))
        .route("/camera/resume", post(camera_resume))
        .route("/camera/stop", post(camera_stop))
        .route("/camera/frame", get(camera_frame))
        .route("/camera/status", get(camera_status))
        .route("/analyze", post(analyze))
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .layer(TraceLayer::new_for_http())
        .with_state(facade)
}

/// Serve the control surface until SIGINT or SIGTERM.
///
/// The bucket sweeper runs alongside the server; on shutdown it is
/// cancelled and the camera is stopped.
///
/// # Errors
///
/// Returns an error if the control surface cannot be built, the listener
/// cannot be bound, or the server fails.
pub async fn serve(config: &Config) -> Result<()> {
    let facade = ControlFacade::from_config(config)?;

    let cancel = CancellationToken::new();
    let sweeper = spawn_sweeper(
        Arc::clone(facade.governor()),
        config.sweep_interval(),
        config.idle_eviction(),
        cancel.clone(),
    );

    let addr = config.server.bind;
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|source| Error::Bind { addr, source })?;
    let local: SocketAddr = listener.local_addr()?;
    info!(addr = %local, analyzer = facade.analyzer_name(), "camdeck listening");

    let app = router(facade.clone(), config.analysis.max_source_bytes);
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| Error::server(e.to_string()));

    cancel.cancel();
    if let Err(e) = sweeper.await {
        warn!(error = %e, "Bucket sweeper ended abnormally");
    }
    facade.shutdown().await;
    info!("Shutdown complete");
    served
}

async fn shutdown_signal() {
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received SIGINT, shutting down");
        }
        () = terminate() => {
            info!("Received SIGTERM, shutting down");
        }
    }
}

#[cfg(unix)]
async fn terminate() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            sigterm.recv().await;
        }
        Err(e) => {
            warn!(error = %e, "Cannot listen for SIGTERM");
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn terminate() {
    std::future::pending::<()>().await;
}

fn caller(headers: &HeaderMap) -> CallerId {
    CallerId::from_header(headers.get(USER_ID_HEADER).and_then(|v| v.to_str().ok()))
}

/// Status code for a result error. Accepted commands are always 200.
fn status_for(error: Option<ErrorKind>) -> StatusCode {
    match error {
        None | Some(ErrorKind::AlreadyActive | ErrorKind::AnalyzerUnavailable) => StatusCode::OK,
        Some(ErrorKind::RateLimited) => StatusCode::TOO_MANY_REQUESTS,
        Some(ErrorKind::InvalidTransition) => StatusCode::CONFLICT,
        Some(ErrorKind::DeviceUnavailable) => StatusCode::SERVICE_UNAVAILABLE,
    }
}

/// Whole seconds, rounded up, never zero.
fn retry_after_value(retry_after: Duration) -> HeaderValue {
    let secs = retry_after.as_secs() + u64::from(retry_after.subsec_nanos() > 0);
    HeaderValue::from(secs.max(1))
}

fn with_retry_after(mut response: Response, retry_after_secs: Option<f64>) -> Response {
    if let Some(wait) = retry_after_secs.and_then(|s| Duration::try_from_secs_f64(s).ok()) {
        response
            .headers_mut()
            .insert(header::RETRY_AFTER, retry_after_value(wait));
    }
    response
}

fn command_response(result: &CommandResult) -> Response {
    let status = if result.accepted {
        StatusCode::OK
    } else {
        status_for(result.error)
    };
    with_retry_after((status, Json(result)).into_response(), result.retry_after_secs)
}

#[derive(Debug, Serialize)]
struct RateLimitedBody {
    error: ErrorKind,
    retry_after_secs: f64,
}

fn rate_limited(retry_after: Duration) -> Response {
    let body = RateLimitedBody {
        error: ErrorKind::RateLimited,
        retry_after_secs: retry_after.as_secs_f64(),
    };
    with_retry_after(
        (StatusCode::TOO_MANY_REQUESTS, Json(body)).into_response(),
        Some(retry_after.as_secs_f64()),
    )
}

async fn serve_panel() -> Html<&'static str> {
    Html(PANEL_HTML)
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn run_command(facade: &ControlFacade, headers: &HeaderMap, command: Command) -> Response {
    command_response(&facade.command(&caller(headers), command).await)
}

async fn camera_start(State(facade): State<ControlFacade>, headers: HeaderMap) -> Response {
    run_command(&facade, &headers, Command::Start).await
}

async fn camera_pause(State(facade): State<ControlFacade>, headers: HeaderMap) -> Response {
    run_command(&facade, &headers, Command::Pause).await
}

async fn camera_resume(State(facade): State<ControlFacade>, headers: HeaderMap) -> Response {
    run_command(&facade, &headers, Command::Resume).await
}

async fn camera_stop(State(facade): State<ControlFacade>, headers: HeaderMap) -> Response {
    run_command(&facade, &headers, Command::Stop).await
}

/// Body of a frame request that has nothing to show.
#[derive(Debug, Serialize)]
struct NoFrame {
    state: CameraState,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<ErrorKind>,
    detail: String,
}

async fn camera_frame(State(facade): State<ControlFacade>, headers: HeaderMap) -> Response {
    let snapshot = match facade.snapshot(&caller(&headers)) {
        Gated::Admitted(snapshot) => snapshot,
        Gated::RateLimited { retry_after } => return rate_limited(retry_after),
    };

    let Some(frame) = snapshot.frame.as_deref() else {
        let error = snapshot.error_kind();
        let detail = snapshot
            .error
            .map_or_else(|| "no frame available".to_string(), |fault| fault.message);
        let body = NoFrame {
            state: snapshot.state,
            error,
            detail,
        };
        return (StatusCode::NOT_FOUND, Json(body)).into_response();
    };

    let etag = frame.etag();
    let not_modified = headers
        .get(header::IF_NONE_MATCH)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v == etag);

    let builder = Response::builder()
        .header(header::ETAG, etag.as_str())
        .header(header::CACHE_CONTROL, "no-cache")
        .header(CAMERA_STATE_HEADER, snapshot.state.to_string());

    let response = if not_modified {
        builder.status(StatusCode::NOT_MODIFIED).body(Body::empty())
    } else {
        builder
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, frame.content_type)
            .body(Body::from(frame.data.clone()))
    };
    response.unwrap_or_else(|e| {
        warn!(error = %e, "Failed to build frame response");
        StatusCode::INTERNAL_SERVER_ERROR.into_response()
    })
}

async fn camera_status(State(facade): State<ControlFacade>, headers: HeaderMap) -> Response {
    match facade.status(&caller(&headers)) {
        Gated::Admitted(status) => Json(status).into_response(),
        Gated::RateLimited { retry_after } => rate_limited(retry_after),
    }
}

/// Body of `POST /analyze`.
#[derive(Debug, Deserialize)]
pub struct AnalyzeRequest {
    /// Source text to analyze.
    pub code: String,
    /// Caller identity, used when the header is absent.
    #[serde(default)]
    pub user_id: Option<String>,
}

async fn analyze(
    State(facade): State<ControlFacade>,
    headers: HeaderMap,
    Json(request): Json<AnalyzeRequest>,
) -> Response {
    let caller = match caller(&headers) {
        CallerId::Anonymous => CallerId::from_header(request.user_id.as_deref()),
        named => named,
    };
    let outcome: AnalysisOutcome = facade.analyze_code(&caller, &request.code).await;
    let status = status_for(outcome.error);
    let retry_after_secs = outcome.retry_after_secs;
    with_retry_after((status, Json(outcome)).into_response(), retry_after_secs)
}
