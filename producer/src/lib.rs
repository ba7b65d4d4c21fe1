pub mod capture;
pub mod dataset;
pub mod mjpeg;
pub mod source;

pub use capture::{run_producer_loop, ProducerOptions};
pub use source::{Camera, FrameSource};

use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("failed to build HTTP client: {0}")]
    HttpClient(reqwest::Error),
    #[error("HTTP connection failed: {0}")]
    HttpConnect(reqwest::Error),
    #[error("HTTP stream error: {0}")]
    HttpStream(reqwest::Error),
    #[error("HTTP status {0}")]
    HttpStatus(u16),
    #[error("camera stream ended")]
    StreamEnded,
    #[error("failed to read {path}: {source}")]
    ReadFile {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("no JPEG files found in {0}")]
    EmptyDirectory(PathBuf),
    #[error("camera returned an empty frame")]
    EmptyFrame,
    #[error("capture failed {attempts} times in a row, last error: {last}")]
    RetriesExhausted {
        attempts: u32,
        last: Box<CaptureError>,
    },
}
