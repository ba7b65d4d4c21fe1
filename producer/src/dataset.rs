use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use edge_vision_common::frame::Frame;
use tokio::io::AsyncWriteExt;
use tracing::info;

const MAX_LABEL_LEN: usize = 64;
/// Attempts at a free `_<n>` suffix before giving up on a file name.
const MAX_NAME_SUFFIX: u32 = 1000;

#[derive(Debug, thiserror::Error)]
pub enum DatasetError {
    #[error("invalid label {0:?}: use 1-64 characters from [A-Za-z0-9_-]")]
    InvalidLabel(String),
    #[error("failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Labels become directory names, so they are restricted to a safe charset.
pub fn validate_label(label: &str) -> Result<&str, DatasetError> {
    let label = label.trim();
    let valid = !label.is_empty()
        && label.len() <= MAX_LABEL_LEN
        && label
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if valid {
        Ok(label)
    } else {
        Err(DatasetError::InvalidLabel(label.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavedImage {
    pub label: String,
    pub path: PathBuf,
    /// Images stored under this label since startup, including this one.
    pub count: u32,
}

/// Writes labelled frames under `<root>/<label>/` and counts them.
#[derive(Debug)]
pub struct DatasetWriter {
    root: PathBuf,
    counts: Mutex<BTreeMap<String, u32>>,
}

impl DatasetWriter {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            counts: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub async fn save(&self, label: &str, frame: &Frame) -> Result<SavedImage, DatasetError> {
        let label = validate_label(label)?;
        let dir = self.root.join(label);
        let path = write_frame(&dir, &frame.file_name(), frame).await?;

        let count = {
            let mut counts = self.counts.lock().unwrap_or_else(PoisonError::into_inner);
            let count = counts.entry(label.to_string()).or_insert(0);
            *count += 1;
            *count
        };
        info!(label, count, path = %path.display(), "dataset image saved");

        Ok(SavedImage {
            label: label.to_string(),
            path,
            count,
        })
    }

    pub fn counts(&self) -> BTreeMap<String, u32> {
        self.counts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// Write one frame into `dir` (created if missing) as `file_name`, or as
/// `<stem>_<n>.<ext>` when that name is taken. Existing files are never
/// replaced. Returns the path written.
pub async fn write_frame(
    dir: &Path,
    file_name: &str,
    frame: &Frame,
) -> Result<PathBuf, DatasetError> {
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|source| DatasetError::Io {
            path: dir.to_path_buf(),
            source,
        })?;

    let name = Path::new(file_name);
    let stem = name.file_stem().map(|s| s.to_string_lossy()).unwrap_or_default();
    let ext = name.extension().map(|e| e.to_string_lossy());

    let mut path = dir.join(file_name);
    let mut suffix = 0;
    let mut file = loop {
        let created = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await;
        match created {
            Ok(file) => break file,
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists && suffix < MAX_NAME_SUFFIX => {
                suffix += 1;
                let candidate = match &ext {
                    Some(ext) => format!("{stem}_{suffix}.{ext}"),
                    None => format!("{stem}_{suffix}"),
                };
                path = dir.join(candidate);
            }
            Err(source) => return Err(DatasetError::Io { path, source }),
        }
    };

    let written = async {
        file.write_all(frame.jpeg()).await?;
        file.flush().await
    };
    match written.await {
        Ok(()) => Ok(path),
        Err(source) => Err(DatasetError::Io { path, source }),
    }
}
