//! HTTP front end for the gantry supervisor.
//!
//! A thin JSON shim: each route maps onto one [`GantrySupervisor`] operation,
//! run on the blocking pool so serial waits never stall the async runtime.
//! Errors come back as `{"error": "..."}` with a status code chosen by
//! error kind.
//!
//! | Route | Method | Operation |
//! |---|---|---|
//! | `/api/start_gantry` | POST | connect |
//! | `/api/stop_gantry` | POST | disconnect |
//! | `/api/send_gcode` | POST | send raw command |
//! | `/api/jog` | POST | jog one axis / home |
//! | `/api/status` | GET | machine and capture status |
//! | `/api/camera_feed` | GET | latest JPEG frame |
//! | `/api/run_alignment` | POST | one alignment step |

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use hardware::gantry::{ConnectError, JogDirection, LinkError};
use serde::Deserialize;
use serde_json::json;
use tower_http::services::{ServeDir, ServeFile};
use tracing::{error, info};

use crate::alignment::AlignmentError;
use crate::supervisor::{ConnectOutcome, GantryError, GantrySupervisor};

/// Serial settings used when a connect request omits them.
#[derive(Debug, Clone)]
pub struct SerialDefaults {
    pub port: String,
    pub baud_rate: u32,
}

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub supervisor: Arc<GantrySupervisor>,
    pub defaults: SerialDefaults,
}

/// Error response with a JSON body.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

/// HTTP status for a supervisor error.
pub fn status_for(err: &GantryError) -> StatusCode {
    match err {
        GantryError::Connect(ConnectError::PortUnavailable { .. })
        | GantryError::CameraUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        GantryError::AcquisitionStart(_) => StatusCode::INTERNAL_SERVER_ERROR,
        GantryError::Link(LinkError::NotConnected) => StatusCode::CONFLICT,
        GantryError::Link(LinkError::Timeout { .. }) => StatusCode::GATEWAY_TIMEOUT,
        GantryError::Link(LinkError::IoFailure(_)) => StatusCode::BAD_GATEWAY,
        GantryError::Protocol(_) => StatusCode::BAD_REQUEST,
        GantryError::Alignment(AlignmentError::NoFrameAvailable) => StatusCode::NOT_FOUND,
        GantryError::Alignment(AlignmentError::NoTargetFound) => StatusCode::UNPROCESSABLE_ENTITY,
        GantryError::Alignment(AlignmentError::CaptureStopped { .. }) => {
            StatusCode::SERVICE_UNAVAILABLE
        }
    }
}

impl From<GantryError> for ApiError {
    fn from(err: GantryError) -> Self {
        Self::new(status_for(&err), err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            error!("Request failed ({}): {}", self.status, self.message);
        }
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

/// Baud rate as sent by the operator panel, either a number or a string.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum BaudRateField {
    Number(u32),
    Text(String),
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct StartRequest {
    port: Option<String>,
    baud_rate: Option<BaudRateField>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct GcodeRequest {
    command: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JogRequest {
    direction: JogDirection,
    #[serde(default = "default_jog_step")]
    step: f64,
    feed_rate: Option<u32>,
}

fn default_jog_step() -> f64 {
    1.0
}

/// Run a supervisor operation on the blocking pool.
async fn blocking<T, F>(state: &AppState, op: F) -> Result<T, ApiError>
where
    F: FnOnce(&GantrySupervisor) -> Result<T, GantryError> + Send + 'static,
    T: Send + 'static,
{
    let supervisor = state.supervisor.clone();
    tokio::task::spawn_blocking(move || op(&supervisor))
        .await
        .map_err(|e| ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, format!("Task failed: {e}")))?
        .map_err(ApiError::from)
}

async fn start_gantry(
    State(state): State<AppState>,
    Json(request): Json<StartRequest>,
) -> Result<Response, ApiError> {
    let port = request.port.unwrap_or_else(|| state.defaults.port.clone());
    let baud_rate = match request.baud_rate {
        None => state.defaults.baud_rate,
        Some(BaudRateField::Number(baud)) => baud,
        Some(BaudRateField::Text(text)) => text.trim().parse().map_err(|_| {
            ApiError::new(StatusCode::BAD_REQUEST, format!("Invalid baud rate: {text:?}"))
        })?,
    };

    let outcome = blocking(&state, move |supervisor| supervisor.connect(&port, baud_rate)).await?;
    let message = match outcome {
        ConnectOutcome::Connected => "Gantry connected successfully",
        ConnectOutcome::AlreadyConnected => "Gantry process already running",
    };
    Ok(Json(json!({ "message": message, "connected": true })).into_response())
}

async fn stop_gantry(State(state): State<AppState>) -> Result<Response, ApiError> {
    blocking(&state, |supervisor| {
        supervisor.disconnect();
        Ok(())
    })
    .await?;
    Ok(Json(json!({ "message": "Gantry stopped successfully" })).into_response())
}

async fn send_gcode(
    State(state): State<AppState>,
    Json(request): Json<GcodeRequest>,
) -> Result<Response, ApiError> {
    let reply = blocking(&state, move |supervisor| supervisor.send_command(&request.command)).await?;
    Ok(Json(json!({
        "message": "Command sent",
        "command": reply.command,
        "response": reply.response.text(),
    }))
    .into_response())
}

async fn jog(
    State(state): State<AppState>,
    Json(request): Json<JogRequest>,
) -> Result<Response, ApiError> {
    let feed_rate = request
        .feed_rate
        .unwrap_or(state.supervisor.calibration().feed_rate);
    let reply = blocking(&state, move |supervisor| {
        supervisor.jog(request.direction, request.step, feed_rate)
    })
    .await?;
    Ok(Json(json!({
        "message": "Command sent",
        "command": reply.command,
        "response": reply.response.text(),
    }))
    .into_response())
}

async fn status(State(state): State<AppState>) -> Result<Response, ApiError> {
    let status = blocking(&state, |supervisor| supervisor.status()).await?;
    Ok(Json(status).into_response())
}

async fn camera_feed(State(state): State<AppState>) -> Result<Response, ApiError> {
    let frame = state.supervisor.latest_frame()?;

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "image/jpeg"),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        frame.jpeg_data.clone(),
    )
        .into_response())
}

async fn run_alignment(State(state): State<AppState>) -> Result<Response, ApiError> {
    let outcome = blocking(&state, |supervisor| supervisor.run_alignment_step()).await?;
    Ok(Json(json!({
        "message": outcome.message(),
        "decision": outcome.alignment.decision,
        "circle": outcome.alignment.circle,
        "response": outcome.sent.as_ref().map(|reply| reply.response.text()),
    }))
    .into_response())
}

/// Build the router. `static_dir`, when given, is served at `/` with
/// `index.html` as the fallback for unknown paths.
pub fn router(state: AppState, static_dir: Option<PathBuf>) -> Router {
    let api = Router::new()
        .route("/api/start_gantry", post(start_gantry))
        .route("/api/stop_gantry", post(stop_gantry))
        .route("/api/send_gcode", post(send_gcode))
        .route("/api/jog", post(jog))
        .route("/api/status", get(status))
        .route("/api/camera_feed", get(camera_feed))
        .route("/api/run_alignment", post(run_alignment))
        .with_state(state);

    match static_dir {
        Some(dir) => {
            let index = ServeFile::new(dir.join("index.html"));
            api.fallback_service(ServeDir::new(dir).fallback(index))
        }
        None => api,
    }
}

/// Serve `app` on `addr` until the process is stopped.
pub async fn run_server(addr: SocketAddr, app: Router) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Gantry server listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await
}
