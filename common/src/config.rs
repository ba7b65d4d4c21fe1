use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub camera: CameraConfig,
    pub model: ModelConfig,
    #[serde(default)]
    pub inference: InferenceConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub stills: StillsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// One `GET` per capture, each response body is a single JPEG.
    Snapshot,
    /// A persistent `multipart/x-mixed-replace` connection.
    Mjpeg,
    /// Replays `*.jpg` files from a local directory.
    Directory,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CameraConfig {
    #[serde(default = "default_source")]
    pub source: SourceKind,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub directory: Option<PathBuf>,
    #[serde(default = "default_capture_interval_ms")]
    pub capture_interval_ms: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelFamily {
    Classifier,
    Detector,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputType {
    U8,
    I8,
    F32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputLayout {
    Nhwc,
    Nchw,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ModelConfig {
    pub family: ModelFamily,
    pub path: PathBuf,
    #[serde(default)]
    pub labels: Option<PathBuf>,
    #[serde(default = "default_input_size")]
    pub input_width: u32,
    #[serde(default = "default_input_size")]
    pub input_height: u32,
    #[serde(default = "default_input_type")]
    pub input_type: InputType,
    #[serde(default = "default_input_layout")]
    pub input_layout: InputLayout,
    #[serde(default)]
    pub boxes_output: usize,
    #[serde(default = "default_classes_output")]
    pub classes_output: usize,
    #[serde(default = "default_scores_output")]
    pub scores_output: usize,
    #[serde(default = "default_count_output")]
    pub count_output: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InferenceConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f32,
    #[serde(default = "default_inference_interval_ms")]
    pub interval_ms: u64,
    #[serde(default = "default_inference_interval_ms")]
    pub idle_interval_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_stream_interval_ms")]
    pub stream_interval_ms: u64,
    #[serde(default = "default_overlay")]
    pub overlay: bool,
    #[serde(default = "default_jpeg_quality")]
    pub jpeg_quality: u8,
    #[serde(default = "default_dataset_dir")]
    pub dataset_dir: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StillsConfig {
    #[serde(default = "default_stills_count")]
    pub count: u32,
    #[serde(default = "default_stills_interval_secs")]
    pub interval_secs: f64,
    #[serde(default = "default_dataset_dir")]
    pub output_dir: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            confidence_threshold: default_confidence_threshold(),
            interval_ms: default_inference_interval_ms(),
            idle_interval_ms: default_inference_interval_ms(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            stream_interval_ms: default_stream_interval_ms(),
            overlay: default_overlay(),
            jpeg_quality: default_jpeg_quality(),
            dataset_dir: default_dataset_dir(),
        }
    }
}

impl Default for StillsConfig {
    fn default() -> Self {
        Self {
            count: default_stills_count(),
            interval_secs: default_stills_interval_secs(),
            output_dir: default_dataset_dir(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl CameraConfig {
    pub fn capture_interval(&self) -> Duration {
        Duration::from_millis(self.capture_interval_ms)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

impl InferenceConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn idle_interval(&self) -> Duration {
        Duration::from_millis(self.idle_interval_ms)
    }
}

impl StillsConfig {
    /// `None` when `interval_secs` is negative, not finite, or too large for
    /// a `Duration`.
    fn try_interval(&self) -> Option<Duration> {
        Duration::try_from_secs_f64(self.interval_secs).ok()
    }

    pub fn interval(&self) -> Duration {
        self.try_interval().unwrap_or_default()
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFile(path.display().to_string(), e))?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Config =
            toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects values that would make a loop spin or the model unusable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_threshold(self.inference.confidence_threshold)?;

        match self.camera.source {
            SourceKind::Snapshot | SourceKind::Mjpeg if self.camera.url.is_none() => {
                return Err(ConfigError::Invalid(
                    "camera.url is required for snapshot and mjpeg sources".into(),
                ));
            }
            SourceKind::Directory if self.camera.directory.is_none() => {
                return Err(ConfigError::Invalid(
                    "camera.directory is required for the directory source".into(),
                ));
            }
            _ => {}
        }

        let intervals = [
            ("camera.capture_interval_ms", self.camera.capture_interval_ms),
            ("inference.interval_ms", self.inference.interval_ms),
            ("inference.idle_interval_ms", self.inference.idle_interval_ms),
            ("server.stream_interval_ms", self.server.stream_interval_ms),
        ];
        if let Some((name, _)) = intervals.iter().find(|(_, v)| *v == 0) {
            return Err(ConfigError::Invalid(format!("{name} must be greater than zero")));
        }

        if self.model.input_width == 0 || self.model.input_height == 0 {
            return Err(ConfigError::Invalid(
                "model.input_width and model.input_height must be non-zero".into(),
            ));
        }
        if self.stills.try_interval().is_none() {
            return Err(ConfigError::Invalid(format!(
                "stills.interval_secs must be a non-negative number of seconds, got {}",
                self.stills.interval_secs
            )));
        }
        Ok(())
    }
}

/// A confidence threshold must be a finite value in `[0, 1]`.
pub fn check_threshold(value: f32) -> Result<f32, ConfigError> {
    if value.is_finite() && (0.0..=1.0).contains(&value) {
        Ok(value)
    } else {
        Err(ConfigError::InvalidThreshold(value))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {0}: {1}")]
    ReadFile(String, std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(String),
    #[error("invalid config: {0}")]
    Invalid(String),
    #[error("confidence threshold {0} is outside [0, 1]")]
    InvalidThreshold(f32),
}

// Default value functions
fn default_source() -> SourceKind {
    SourceKind::Snapshot
}
fn default_capture_interval_ms() -> u64 {
    100
}
fn default_max_retries() -> u32 {
    3
}
fn default_retry_backoff_ms() -> u64 {
    500
}
fn default_connect_timeout_secs() -> u64 {
    10
}
fn default_input_size() -> u32 {
    224
}
fn default_input_type() -> InputType {
    InputType::U8
}
fn default_input_layout() -> InputLayout {
    InputLayout::Nhwc
}
fn default_classes_output() -> usize {
    1
}
fn default_scores_output() -> usize {
    2
}
fn default_count_output() -> usize {
    3
}
fn default_confidence_threshold() -> f32 {
    0.5
}
fn default_inference_interval_ms() -> u64 {
    100
}
fn default_port() -> u16 {
    5000
}
fn default_stream_interval_ms() -> u64 {
    100
}
fn default_overlay() -> bool {
    true
}
fn default_jpeg_quality() -> u8 {
    80
}
fn default_dataset_dir() -> PathBuf {
    PathBuf::from("dataset")
}
fn default_stills_count() -> u32 {
    100
}
fn default_stills_interval_secs() -> f64 {
    5.0
}
fn default_log_level() -> String {
    "info".into()
}
