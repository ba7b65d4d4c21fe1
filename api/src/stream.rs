use std::convert::Infallible;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::State;
use axum::http::header;
use axum::response::IntoResponse;
use bytes::Bytes;
use edge_vision_common::frame::Frame;
use edge_vision_inference::overlay::annotate;
use edge_vision_producer::mjpeg::encode_part;
use futures_util::stream;
use tracing::{debug, warn};

use crate::AppState;

/// GET /video_feed — one multipart part per new frame until shutdown.
pub(crate) async fn video_feed(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let start = (state, None::<u64>, false);
    let parts = stream::unfold(start, |(state, last_seq, mut stale)| async move {
        loop {
            if state.token.is_cancelled() {
                return None;
            }
            let slot = state.pipeline.frames();
            if slot.is_stale() != stale {
                stale = !stale;
                if stale {
                    warn!(seq = ?last_seq, "camera stopped delivering, holding last frame");
                }
            }
            // Peek at the sequence first so an unchanged frame is never cloned
            if slot.latest_seq().is_some_and(|seq| Some(seq) != last_seq) {
                if let Some(frame) = slot.get() {
                    let seq = frame.seq;
                    let part = render_part(&state, frame).await;
                    return Some((Ok::<_, Infallible>(part), (state, Some(seq), stale)));
                }
            }
            tokio::select! {
                _ = state.token.cancelled() => return None,
                _ = tokio::time::sleep(state.stream_interval) => {}
            }
        }
    });

    (
        [
            (header::CONTENT_TYPE, "multipart/x-mixed-replace; boundary=frame"),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        Body::from_stream(parts),
    )
}

async fn render_part(state: &AppState, frame: Frame) -> Bytes {
    if !state.overlay {
        return encode_part(frame.jpeg());
    }
    let Some(snapshot) = state.pipeline.latest_results() else {
        return encode_part(frame.jpeg());
    };

    let quality = state.jpeg_quality;
    let raw = frame.bytes();
    let drawn = tokio::task::spawn_blocking(move || annotate(&raw, &snapshot, quality)).await;
    match drawn {
        Ok(Ok(Some(annotated))) => encode_part(&annotated),
        Ok(Ok(None)) => encode_part(frame.jpeg()),
        Ok(Err(e)) => {
            debug!(error = %e, seq = frame.seq, "overlay skipped");
            encode_part(frame.jpeg())
        }
        Err(e) => {
            warn!(error = %e, "overlay worker failed");
            encode_part(frame.jpeg())
        }
    }
}
