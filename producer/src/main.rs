//! `capture-stills`: capture a timed series of still images into a directory.

use edge_vision_common::config::Config;
use edge_vision_common::frame::Frame;
use edge_vision_producer::dataset::write_frame;
use edge_vision_producer::{Camera, FrameSource};
use std::path::PathBuf;
use tracing::{error, info, warn};

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

    let stills = &config.stills;
    info!(
        source = ?config.camera.source,
        count = stills.count,
        interval_secs = stills.interval_secs,
        output_dir = %stills.output_dir.display(),
        "starting still capture"
    );

    let mut camera = match Camera::from_config(&config.camera) {
        Ok(c) => c,
        Err(e) => {
            error!(error = %e, "failed to create camera source");
            std::process::exit(1);
        }
    };
    if let Err(e) = camera.open().await {
        error!(error = %e, "camera unavailable");
        std::process::exit(1);
    }

    let interval = stills.interval();
    let mut saved = 0u32;
    for i in 1..=stills.count {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted");
                break;
            }
            captured = camera.capture() => match captured {
                Ok(data) => {
                    let frame = Frame::now(data, u64::from(i));
                    match write_frame(&stills.output_dir, &frame.file_name(), &frame).await {
                        Ok(path) => {
                            saved += 1;
                            info!(path = %path.display(), "captured image {i}/{}", stills.count);
                        }
                        Err(e) => {
                            error!(error = %e, "failed to write image, stopping");
                            break;
                        }
                    }
                }
                Err(e) => warn!(error = %e, "capture {i}/{} failed", stills.count),
            },
        }

        if i < stills.count {
            tokio::time::sleep(interval).await;
        }
    }

    info!(saved, "still capture completed");
}
