pub mod backends;
pub mod decode;
pub mod engine;
pub mod labels;
pub mod model;
pub mod overlay;
pub mod preprocess;
pub mod worker;

pub use engine::{DetectorLayout, InferenceEngine, Outcome};
pub use labels::Labels;
pub use model::{InputSpec, InputTensor, Model, OutputTensor, Quantization, TensorData};
pub use worker::{run_inference_loop, LoopOptions};

use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum ModelLoadError {
    #[error("model file not found: {0}")]
    NotFound(PathBuf),
    #[error("failed to read labels from {path}: {source}")]
    Labels {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("model backend error: {0}")]
    Backend(String),
    #[error("no model backend compiled in (enable the backend-tract feature)")]
    BackendUnavailable,
}

#[derive(Debug, thiserror::Error)]
pub enum InferenceError {
    #[error("failed to decode frame: {0}")]
    Decode(String),
    #[error("failed to encode frame: {0}")]
    Encode(String),
    #[error("input has {got} elements, model expects {expected}")]
    InputShape { expected: usize, got: usize },
    #[error("model produced {got} outputs, expected at least {expected}")]
    OutputCount { expected: usize, got: usize },
    #[error("unexpected output shape: {0}")]
    OutputShape(String),
    #[error("model backend error: {0}")]
    Backend(String),
}
