use std::sync::Arc;
use std::time::Duration;

use edge_vision_common::config::CameraConfig;
use edge_vision_common::frame::Frame;
use edge_vision_common::state::PipelineState;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::source::FrameSource;
use crate::CaptureError;

const MAX_BACKOFF: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy)]
pub struct ProducerOptions {
    /// Pause between successful captures.
    pub interval: Duration,
    /// Consecutive failures tolerated before the loop gives up. Zero makes
    /// the first failure fatal.
    pub max_retries: u32,
    /// First retry delay; doubles per consecutive failure up to 10s.
    pub retry_backoff: Duration,
}

impl From<&CameraConfig> for ProducerOptions {
    fn from(config: &CameraConfig) -> Self {
        Self {
            interval: config.capture_interval(),
            max_retries: config.max_retries,
            retry_backoff: config.retry_backoff(),
        }
    }
}

/// Keep the frame slot as fresh as possible until cancelled.
///
/// Returns the number of frames captured. When capture keeps failing past
/// `max_retries`, the slot is marked stale and the last error is returned.
pub async fn run_producer_loop<S: FrameSource>(
    mut source: S,
    state: Arc<PipelineState>,
    options: ProducerOptions,
    token: CancellationToken,
) -> Result<u64, CaptureError> {
    let mut seq: u64 = 0;
    let mut failures: u32 = 0;
    let mut backoff = options.retry_backoff;

    info!(
        source = source.name(),
        interval_ms = options.interval.as_millis() as u64,
        max_retries = options.max_retries,
        "producer loop started"
    );

    loop {
        let captured = tokio::select! {
            _ = token.cancelled() => break,
            captured = source.capture() => captured,
        };

        let delay = match captured {
            Ok(data) => {
                if failures > 0 {
                    info!(failures, "capture recovered");
                }
                failures = 0;
                backoff = options.retry_backoff;

                let frame = Frame::now(data, seq);
                if !frame.looks_like_jpeg() {
                    warn!(seq, bytes = frame.len(), "captured frame lacks a JPEG header");
                }
                debug!(seq, bytes = frame.len(), "frame captured");
                state.publish_frame(frame);
                seq += 1;
                options.interval
            }
            Err(e) => {
                failures += 1;
                if failures > options.max_retries {
                    error!(error = %e, failures, "capture failed, giving up");
                    state.frames().mark_stale();
                    return Err(CaptureError::RetriesExhausted {
                        attempts: failures,
                        last: Box::new(e),
                    });
                }
                warn!(error = %e, failures, "capture failed, retrying in {:?}", backoff);
                let delay = backoff;
                backoff = (backoff * 2).min(MAX_BACKOFF);
                delay
            }
        };

        tokio::select! {
            _ = token.cancelled() => break,
            _ = tokio::time::sleep(delay) => {}
        }
    }

    info!(frames = seq, "producer loop stopped");
    Ok(seq)
}
