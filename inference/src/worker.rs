use std::sync::Arc;
use std::time::Duration;

use edge_vision_common::config::InferenceConfig;
use edge_vision_common::results::Snapshot;
use edge_vision_common::state::PipelineState;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::engine::InferenceEngine;

#[derive(Debug, Clone, Copy)]
pub struct LoopOptions {
    /// Pause after each pass.
    pub interval: Duration,
    /// Poll interval while disabled or waiting for a first frame.
    pub idle_interval: Duration,
}

impl From<&InferenceConfig> for LoopOptions {
    fn from(config: &InferenceConfig) -> Self {
        Self {
            interval: config.interval(),
            idle_interval: config.idle_interval(),
        }
    }
}

/// Returns false when the token fired during the pause.
async fn pause(token: &CancellationToken, duration: Duration) -> bool {
    tokio::select! {
        _ = token.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}

/// Run the engine over the newest frame until cancelled, publishing one
/// snapshot per pass.
///
/// The forward pass runs on the blocking pool. A frame already processed
/// at the current threshold is not processed again. Returns the number of
/// snapshots published.
pub async fn run_inference_loop(
    mut engine: InferenceEngine,
    state: Arc<PipelineState>,
    options: LoopOptions,
    token: CancellationToken,
) -> u64 {
    let mut published: u64 = 0;
    let mut last_processed: Option<(u64, f32)> = None;

    let input = engine.input_spec();
    info!(
        family = ?engine.family(),
        input_width = input.width,
        input_height = input.height,
        element = ?input.element,
        interval_ms = options.interval.as_millis() as u64,
        "inference loop started"
    );

    loop {
        let settings = state.settings();
        if !settings.enabled {
            if !pause(&token, options.idle_interval).await {
                break;
            }
            continue;
        }

        let Some(frame) = state.latest_frame() else {
            if !pause(&token, options.idle_interval).await {
                break;
            }
            continue;
        };

        let threshold = settings.confidence_threshold;
        if last_processed == Some((frame.seq, threshold)) {
            if !pause(&token, options.interval).await {
                break;
            }
            continue;
        }

        let seq = frame.seq;
        let data = frame.bytes();
        let pass = tokio::task::spawn_blocking(move || {
            let result = engine.infer(&data, threshold);
            (engine, result)
        });
        let result = match pass.await {
            Ok((returned, result)) => {
                engine = returned;
                result
            }
            Err(e) => {
                error!(error = %e, "inference worker failed, stopping loop");
                break;
            }
        };

        if token.is_cancelled() {
            break;
        }

        match result {
            // A pass that finished after a pause must not overwrite the
            // frozen snapshot.
            Ok(_) if !state.is_enabled() => {
                debug!(seq, "engine paused during pass, result dropped");
            }
            Ok(outcome) => {
                debug!(
                    seq,
                    records = outcome.records.len(),
                    top_score = ?outcome.top_score,
                    "inference pass complete"
                );
                state.publish_results(Snapshot::new(
                    outcome.records,
                    outcome.top_score,
                    threshold,
                    seq,
                ));
                last_processed = Some((seq, threshold));
                published += 1;
            }
            Err(e) => warn!(error = %e, seq, "inference failed"),
        }

        if !pause(&token, options.interval).await {
            break;
        }
    }

    info!(snapshots = published, "inference loop stopped");
    published
}
