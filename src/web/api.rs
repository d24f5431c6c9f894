//! Defines the Axum API routes and handlers.

use axum::{
    body::Bytes,
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::de::DeserializeOwned;

use crate::geometry::Pattern;
use crate::job::JobOptions;
use crate::plotter::{Plotter, PlotterError};
use crate::web::models::{
    ConnectRequest, CountResponse, GotoRequest, HealthResponse, JogRequest, PenRequest, PositionResponse,
    ShapesRequest,
};

pub type AppState = Plotter;

/// Helper to create a JSON error response with a message and status code
fn json_error(message: &str, status: StatusCode) -> axum::response::Response {
    (status, Json(serde_json::json!({ "error": message }))).into_response()
}

fn status_code(err: &PlotterError) -> StatusCode {
    match err {
        PlotterError::Validation(_) => StatusCode::BAD_REQUEST,
        PlotterError::JobConflict(_) => StatusCode::CONFLICT,
        PlotterError::DeviceBusy(_) => StatusCode::LOCKED,
        PlotterError::Protocol(_) => StatusCode::BAD_GATEWAY,
        PlotterError::Connection(_) => StatusCode::SERVICE_UNAVAILABLE,
    }
}

/// Error body: `{error, kind, aborted}`; `aborted` is only set when the
/// failure interrupted a running job.
fn error_response(err: PlotterError, job_active: bool) -> axum::response::Response {
    tracing::warn!("Request failed: {}", err);
    let body = serde_json::json!({
        "error": err.to_string(),
        "kind": err.kind(),
        "aborted": err.aborted_job(job_active),
    });
    (status_code(&err), Json(body)).into_response()
}

fn plotter_error(plotter: &Plotter, err: PlotterError) -> axum::response::Response {
    error_response(err, plotter.jobs().is_active())
}

fn bad_json(rejection: JsonRejection) -> axum::response::Response {
    error_response(PlotterError::Validation(rejection.body_text()), false)
}

/// Parse an optional JSON body; empty bodies give the default value.
fn optional_body<T: DeserializeOwned + Default>(body: &Bytes) -> Result<T, PlotterError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body).map_err(|e| PlotterError::Validation(format!("Malformed request body: {}", e)))
}

fn ok() -> axum::response::Response {
    (StatusCode::OK, Json(serde_json::json!({ "result": "ok" }))).into_response()
}

/// Creates the Axum router with all the API endpoints.
pub fn create_router(plotter: Plotter) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/status", get(get_status))
        .route("/api/pattern", get(get_pattern).post(set_pattern).delete(clear_pattern))
        .route("/api/pattern/shapes", post(add_shapes))
        .route("/api/job/start", post(start_job))
        .route("/api/job/stop", post(stop_job))
        .route("/api/job/pause", post(pause_job))
        .route("/api/job/resume", post(resume_job))
        .route("/api/device/goto", post(goto))
        .route("/api/device/jog", post(jog))
        .route("/api/device/pen", post(set_pen))
        .route("/api/device/origin", post(set_origin))
        .route("/api/device/connect", post(connect))
        .route("/api/device/disconnect", post(disconnect))
        .route("/api/device/reset", post(reset))
        .fallback(not_found)
        .with_state(plotter)
}

async fn not_found() -> axum::response::Response {
    json_error("Not found", StatusCode::NOT_FOUND)
}

async fn health() -> axum::response::Response {
    let body = HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    };
    (StatusCode::OK, Json(body)).into_response()
}

/// Handler to get the combined pattern/job/device snapshot.
async fn get_status(State(plotter): State<AppState>) -> axum::response::Response {
    (StatusCode::OK, Json(plotter.status().await)).into_response()
}

async fn get_pattern(State(plotter): State<AppState>) -> axum::response::Response {
    (StatusCode::OK, Json(plotter.pattern().await)).into_response()
}

async fn set_pattern(
    State(plotter): State<AppState>,
    payload: Result<Json<Pattern>, JsonRejection>,
) -> axum::response::Response {
    let Json(pattern) = match payload {
        Ok(p) => p,
        Err(rejection) => return bad_json(rejection),
    };
    match plotter.set_pattern(pattern).await {
        Ok(count) => (StatusCode::OK, Json(CountResponse { count })).into_response(),
        Err(e) => plotter_error(&plotter, e),
    }
}

async fn clear_pattern(State(plotter): State<AppState>) -> axum::response::Response {
    match plotter.clear_pattern().await {
        Ok(()) => (StatusCode::OK, Json(Pattern::new())).into_response(),
        Err(e) => plotter_error(&plotter, e),
    }
}

async fn add_shapes(
    State(plotter): State<AppState>,
    payload: Result<Json<ShapesRequest>, JsonRejection>,
) -> axum::response::Response {
    let Json(request) = match payload {
        Ok(p) => p,
        Err(rejection) => return bad_json(rejection),
    };
    match plotter.add_shapes(&request.shapes, request.pen).await {
        Ok(count) => (StatusCode::OK, Json(CountResponse { count })).into_response(),
        Err(e) => plotter_error(&plotter, e),
    }
}

/// Handler to start plotting the stored pattern.
async fn start_job(State(plotter): State<AppState>, body: Bytes) -> axum::response::Response {
    let options: JobOptions = match optional_body(&body) {
        Ok(options) => options,
        Err(e) => return plotter_error(&plotter, e),
    };
    match plotter.start_job(options).await {
        Ok(job) => (StatusCode::OK, Json(serde_json::json!({ "result": "ok", "job": job }))).into_response(),
        Err(e) => plotter_error(&plotter, e),
    }
}

/// Handler to stop the current job; returns once the pen is up.
async fn stop_job(State(plotter): State<AppState>) -> axum::response::Response {
    match plotter.stop_job().await {
        Ok(job) => (StatusCode::OK, Json(serde_json::json!({ "result": "ok", "job": job }))).into_response(),
        Err(e) => plotter_error(&plotter, e),
    }
}

async fn pause_job(State(plotter): State<AppState>) -> axum::response::Response {
    match plotter.pause_job() {
        Ok(job) => (StatusCode::OK, Json(serde_json::json!({ "result": "ok", "job": job }))).into_response(),
        Err(e) => plotter_error(&plotter, e),
    }
}

async fn resume_job(State(plotter): State<AppState>) -> axum::response::Response {
    match plotter.resume_job() {
        Ok(job) => (StatusCode::OK, Json(serde_json::json!({ "result": "ok", "job": job }))).into_response(),
        Err(e) => plotter_error(&plotter, e),
    }
}

async fn goto(
    State(plotter): State<AppState>,
    payload: Result<Json<GotoRequest>, JsonRejection>,
) -> axum::response::Response {
    let Json(request) = match payload {
        Ok(p) => p,
        Err(rejection) => return bad_json(rejection),
    };
    match plotter.goto(request.x, request.y).await {
        Ok(position) => (StatusCode::OK, Json(PositionResponse { result: "ok", position })).into_response(),
        Err(e) => plotter_error(&plotter, e),
    }
}

async fn jog(
    State(plotter): State<AppState>,
    payload: Result<Json<JogRequest>, JsonRejection>,
) -> axum::response::Response {
    let Json(request) = match payload {
        Ok(p) => p,
        Err(rejection) => return bad_json(rejection),
    };
    match plotter.jog(request.dx, request.dy).await {
        Ok(position) => (StatusCode::OK, Json(PositionResponse { result: "ok", position })).into_response(),
        Err(e) => plotter_error(&plotter, e),
    }
}

async fn set_pen(
    State(plotter): State<AppState>,
    payload: Result<Json<PenRequest>, JsonRejection>,
) -> axum::response::Response {
    let Json(request) = match payload {
        Ok(p) => p,
        Err(rejection) => return bad_json(rejection),
    };
    match plotter.set_pen(request.pos).await {
        Ok(()) => ok(),
        Err(e) => plotter_error(&plotter, e),
    }
}

async fn set_origin(State(plotter): State<AppState>) -> axum::response::Response {
    match plotter.set_origin().await {
        Ok(()) => ok(),
        Err(e) => plotter_error(&plotter, e),
    }
}

async fn connect(State(plotter): State<AppState>, body: Bytes) -> axum::response::Response {
    let request: ConnectRequest = match optional_body(&body) {
        Ok(request) => request,
        Err(e) => return plotter_error(&plotter, e),
    };
    match plotter.connect(request.port, request.baud).await {
        Ok(device) => (StatusCode::OK, Json(serde_json::json!({ "result": "ok", "device": device }))).into_response(),
        Err(e) => plotter_error(&plotter, e),
    }
}

async fn disconnect(State(plotter): State<AppState>) -> axum::response::Response {
    match plotter.disconnect().await {
        Ok(device) => (StatusCode::OK, Json(serde_json::json!({ "result": "ok", "device": device }))).into_response(),
        Err(e) => plotter_error(&plotter, e),
    }
}

async fn reset(State(plotter): State<AppState>) -> axum::response::Response {
    match plotter.reset().await {
        Ok(device) => (StatusCode::OK, Json(serde_json::json!({ "result": "ok", "device": device }))).into_response(),
        Err(e) => plotter_error(&plotter, e),
    }
}
