mod page;
mod stream;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::{header, HeaderName, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Form, Json, Router};
use edge_vision_common::config::Config;
use edge_vision_common::results::{ResultRecord, UNCERTAIN_LABEL};
use edge_vision_common::state::{EngineSettings, PipelineState};
use edge_vision_inference::{run_inference_loop, InferenceEngine, LoopOptions};
use edge_vision_producer::dataset::{DatasetError, DatasetWriter};
use edge_vision_producer::{run_producer_loop, Camera, FrameSource, ProducerOptions};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

// ---------------------------------------------------------------------------
// App state
// ---------------------------------------------------------------------------

struct AppState {
    pipeline: Arc<PipelineState>,
    dataset: DatasetWriter,
    overlay: bool,
    jpeg_quality: u8,
    stream_interval: Duration,
    token: CancellationToken,
}

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, PartialEq)]
struct ClassificationReply {
    label: String,
    probability: f32,
}

impl ClassificationReply {
    fn new(label: impl Into<String>, probability: f32) -> Self {
        Self {
            label: label.into(),
            probability,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ConfidenceForm {
    confidence: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CaptureForm {
    label: Option<String>,
}

#[derive(Debug, Serialize)]
struct CaptureReply {
    label: String,
    count: u32,
    path: String,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// GET /
async fn index() -> Html<&'static str> {
    Html(page::INDEX_HTML)
}

/// Set on `/latest_image` responses; `true` once the camera has stopped
/// delivering and the frame is the last one captured.
const FRAME_STALE: &str = "x-frame-stale";

/// GET /latest_image — the current frame as a JPEG
async fn latest_image(State(state): State<Arc<AppState>>) -> Response {
    let Some(frame) = state.pipeline.latest_frame() else {
        return (StatusCode::NOT_FOUND, "No image captured yet").into_response();
    };
    let stale = if state.pipeline.frames().is_stale() { "true" } else { "false" };
    let headers = [
        (header::CONTENT_TYPE, "image/jpeg"),
        (HeaderName::from_static(FRAME_STALE), stale),
    ];
    (headers, frame.bytes()).into_response()
}

/// POST /start
async fn start(State(state): State<Arc<AppState>>) -> StatusCode {
    state.pipeline.set_enabled(true);
    info!("inference enabled");
    StatusCode::NO_CONTENT
}

/// POST /stop — pause inference; the last results stay readable
async fn stop(State(state): State<Arc<AppState>>) -> StatusCode {
    state.pipeline.set_enabled(false);
    info!("inference disabled");
    StatusCode::NO_CONTENT
}

/// POST /update_confidence — form field `confidence` in [0, 1]
async fn update_confidence(
    State(state): State<Arc<AppState>>,
    Form(form): Form<ConfidenceForm>,
) -> Response {
    let Some(raw) = form.confidence else {
        return (StatusCode::BAD_REQUEST, "missing confidence").into_response();
    };
    let value = match raw.trim().parse::<f32>() {
        Ok(v) => v,
        Err(_) => {
            return (StatusCode::BAD_REQUEST, format!("invalid confidence {raw:?}")).into_response();
        }
    };
    match state.pipeline.set_confidence_threshold(value) {
        Ok(()) => {
            info!(threshold = value, "confidence threshold updated");
            StatusCode::NO_CONTENT.into_response()
        }
        Err(e) => (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
    }
}

/// GET /get_classification — `{label, probability}` for the latest pass
async fn get_classification(State(state): State<Arc<AppState>>) -> Json<ClassificationReply> {
    if !state.pipeline.is_enabled() {
        return Json(ClassificationReply::new("Not classifying", 0.0));
    }
    let reply = match state.pipeline.latest_results() {
        None => ClassificationReply::new("Processing", 0.0),
        Some(snapshot) => match snapshot.records.first() {
            Some(top) => ClassificationReply::new(top.label.clone(), top.confidence),
            None => ClassificationReply::new(UNCERTAIN_LABEL, snapshot.top_score.unwrap_or(0.0)),
        },
    };
    Json(reply)
}

/// GET /get_detections — records of the latest pass, `[]` when disabled
async fn get_detections(State(state): State<Arc<AppState>>) -> Json<Vec<ResultRecord>> {
    if !state.pipeline.is_enabled() {
        return Json(Vec::new());
    }
    let records = state
        .pipeline
        .latest_results()
        .map(|snapshot| snapshot.records.clone())
        .unwrap_or_default();
    Json(records)
}

/// POST /capture_image — save the current frame under form field `label`
async fn capture_image(
    State(state): State<Arc<AppState>>,
    Form(form): Form<CaptureForm>,
) -> Response {
    let Some(label) = form.label else {
        return (StatusCode::BAD_REQUEST, "missing label").into_response();
    };
    let Some(frame) = state.pipeline.latest_frame() else {
        return (StatusCode::SERVICE_UNAVAILABLE, "No image captured yet").into_response();
    };

    match state.dataset.save(&label, &frame).await {
        Ok(saved) => Json(CaptureReply {
            label: saved.label,
            count: saved.count,
            path: saved.path.display().to_string(),
        })
        .into_response(),
        Err(e @ DatasetError::InvalidLabel(_)) => {
            (StatusCode::BAD_REQUEST, e.to_string()).into_response()
        }
        Err(e) => {
            error!(error = %e, "failed to save dataset image");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

/// GET /capture_counts — images saved per label since startup
async fn capture_counts(State(state): State<Arc<AppState>>) -> Json<BTreeMap<String, u32>> {
    Json(state.dataset.counts())
}

/// POST /close — stop the loops and shut the server down
async fn close(State(state): State<Arc<AppState>>) -> &'static str {
    info!("shutdown requested over HTTP");
    state.token.cancel();
    "Shutting down"
}

fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/video_feed", get(stream::video_feed))
        .route("/latest_image", get(latest_image))
        .route("/start", post(start))
        .route("/stop", post(stop))
        .route("/update_confidence", post(update_confidence))
        .route("/get_classification", get(get_classification))
        .route("/get_detections", get(get_detections))
        .route("/capture_image", post(capture_image))
        .route("/capture_counts", get(capture_counts))
        .route("/close", post(close))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() {
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    let config = match Config::load(&config_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config from {}: {e}", config_path.display());
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.level.parse().unwrap_or_default()),
        )
        .init();

    let pipeline = match PipelineState::new(EngineSettings {
        enabled: config.inference.enabled,
        confidence_threshold: config.inference.confidence_threshold,
    }) {
        Ok(p) => Arc::new(p),
        Err(e) => {
            error!(error = %e, "invalid inference settings");
            std::process::exit(1);
        }
    };

    let mut camera = match Camera::from_config(&config.camera) {
        Ok(c) => c,
        Err(e) => {
            error!(error = %e, "failed to create camera source");
            std::process::exit(1);
        }
    };
    if let Err(e) = camera.open().await {
        error!(error = %e, source = camera.name(), "camera unavailable");
        std::process::exit(1);
    }

    let engine = match InferenceEngine::from_config(&config.model) {
        Ok(e) => e,
        Err(e) => {
            error!(error = %e, path = %config.model.path.display(), "failed to load model");
            std::process::exit(1);
        }
    };

    let token = CancellationToken::new();

    let producer = tokio::spawn(run_producer_loop(
        camera,
        Arc::clone(&pipeline),
        ProducerOptions::from(&config.camera),
        token.clone(),
    ));
    let inference = tokio::spawn(run_inference_loop(
        engine,
        Arc::clone(&pipeline),
        LoopOptions::from(&config.inference),
        token.clone(),
    ));

    tokio::spawn({
        let token = token.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("received Ctrl-C, shutting down");
                token.cancel();
            }
        }
    });

    let state = Arc::new(AppState {
        pipeline,
        dataset: DatasetWriter::new(&config.server.dataset_dir),
        overlay: config.server.overlay,
        jpeg_quality: config.server.jpeg_quality,
        stream_interval: Duration::from_millis(config.server.stream_interval_ms),
        token: token.clone(),
    });

    let addr = format!("0.0.0.0:{}", config.server.port);
    info!(
        addr,
        dataset_dir = %state.dataset.root().display(),
        overlay = state.overlay,
        "edge-vision server starting"
    );

    let listener = tokio::net::TcpListener::bind(&addr).await.unwrap_or_else(|e| {
        eprintln!("Failed to bind to {addr}: {e}");
        std::process::exit(1);
    });
    if let Err(e) = axum::serve(listener, router(state))
        .with_graceful_shutdown(token.clone().cancelled_owned())
        .await
    {
        error!(error = %e, "server error");
    }
    token.cancel();

    match producer.await {
        Ok(Ok(frames)) => info!(frames, "producer finished"),
        Ok(Err(e)) => warn!(error = %e, "producer stopped after capture failures"),
        Err(e) => error!(error = %e, "producer task failed"),
    }
    match inference.await {
        Ok(snapshots) => info!(snapshots, "inference finished"),
        Err(e) => error!(error = %e, "inference task failed"),
    }
    info!("shutdown complete");
}
