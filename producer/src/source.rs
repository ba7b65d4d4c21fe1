//! Camera frame sources.
//!
//! A source hands back one JPEG per `capture` call. Device-specific setup
//! lives behind whatever serves the HTTP endpoint; the directory source
//! stands in for a camera in tests and demos.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;

use bytes::Bytes;
use edge_vision_common::config::{CameraConfig, SourceKind};
use reqwest::header::CONTENT_TYPE;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::mjpeg::MjpegParser;
use crate::CaptureError;

pub trait FrameSource: Send {
    /// Short name for logging.
    fn name(&self) -> &'static str;

    /// Check the device is reachable. Called once before the producer loop
    /// starts; a failure here aborts startup.
    fn open(&mut self) -> impl Future<Output = Result<(), CaptureError>> + Send;

    /// Capture one JPEG-encoded frame.
    fn capture(&mut self) -> impl Future<Output = Result<Bytes, CaptureError>> + Send;
}

fn http_client(connect_timeout: Duration) -> Result<reqwest::Client, CaptureError> {
    reqwest::Client::builder()
        .connect_timeout(connect_timeout)
        .build()
        .map_err(CaptureError::HttpClient)
}

fn non_empty(data: Bytes) -> Result<Bytes, CaptureError> {
    if data.is_empty() {
        Err(CaptureError::EmptyFrame)
    } else {
        Ok(data)
    }
}

// ---------------------------------------------------------------------------
// Snapshot polling
// ---------------------------------------------------------------------------

/// Fetches a single JPEG per capture with a plain `GET`.
pub struct SnapshotSource {
    url: String,
    client: reqwest::Client,
}

impl SnapshotSource {
    pub fn new(url: impl Into<String>, connect_timeout: Duration) -> Result<Self, CaptureError> {
        Ok(Self {
            url: url.into(),
            client: http_client(connect_timeout)?,
        })
    }
}

impl FrameSource for SnapshotSource {
    fn name(&self) -> &'static str {
        "snapshot"
    }

    async fn open(&mut self) -> Result<(), CaptureError> {
        let data = self.capture().await?;
        info!(url = self.url, bytes = data.len(), "camera snapshot endpoint reachable");
        Ok(())
    }

    async fn capture(&mut self) -> Result<Bytes, CaptureError> {
        let resp = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(CaptureError::HttpConnect)?;
        if !resp.status().is_success() {
            return Err(CaptureError::HttpStatus(resp.status().as_u16()));
        }
        non_empty(resp.bytes().await.map_err(CaptureError::HttpStream)?)
    }
}

// ---------------------------------------------------------------------------
// MJPEG stream
// ---------------------------------------------------------------------------

/// Holds a `multipart/x-mixed-replace` connection open and returns the
/// newest complete part on each capture.
///
/// A reader task drains the connection continuously into a watch channel,
/// so parts the camera sends between captures are dropped instead of
/// queueing up in the socket. Reconnects lazily after the stream drops.
pub struct MjpegStreamSource {
    url: String,
    client: reqwest::Client,
    reader: Option<StreamReader>,
}

struct StreamReader {
    parts: watch::Receiver<Option<Bytes>>,
    task: JoinHandle<CaptureError>,
}

impl MjpegStreamSource {
    pub fn new(url: impl Into<String>, connect_timeout: Duration) -> Result<Self, CaptureError> {
        Ok(Self {
            url: url.into(),
            client: http_client(connect_timeout)?,
            reader: None,
        })
    }

    async fn connect(&self) -> Result<StreamReader, CaptureError> {
        info!(url = self.url, "connecting to MJPEG stream");
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(CaptureError::HttpConnect)?;

        if !response.status().is_success() {
            return Err(CaptureError::HttpStatus(response.status().as_u16()));
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok());
        let parser = MjpegParser::from_content_type(content_type);
        info!(status = %response.status(), "connected to MJPEG stream");

        let (tx, parts) = watch::channel(None);
        let task = tokio::spawn(read_parts(response, parser, tx));
        Ok(StreamReader { parts, task })
    }
}

/// Feed the connection through `parser` until it fails, publishing every
/// completed part. Ends early once the source stops listening.
async fn read_parts(
    mut response: reqwest::Response,
    mut parser: MjpegParser,
    tx: watch::Sender<Option<Bytes>>,
) -> CaptureError {
    loop {
        let chunk = tokio::select! {
            _ = tx.closed() => return CaptureError::StreamEnded,
            chunk = response.chunk() => chunk,
        };
        match chunk {
            Ok(Some(chunk)) => {
                if let Some(part) = parser.push(&chunk).pop() {
                    tx.send_replace(Some(part));
                }
            }
            Ok(None) => return CaptureError::StreamEnded,
            Err(e) => return CaptureError::HttpStream(e),
        }
    }
}

impl FrameSource for MjpegStreamSource {
    fn name(&self) -> &'static str {
        "mjpeg"
    }

    async fn open(&mut self) -> Result<(), CaptureError> {
        self.reader = Some(self.connect().await?);
        Ok(())
    }

    /// Waits for a part newer than the one returned last time.
    async fn capture(&mut self) -> Result<Bytes, CaptureError> {
        if self.reader.is_none() {
            self.reader = Some(self.connect().await?);
        }

        if let Some(reader) = self.reader.as_mut() {
            while reader.parts.changed().await.is_ok() {
                let part = reader.parts.borrow_and_update().clone();
                if let Some(part) = part {
                    return Ok(part);
                }
            }
        }

        // Sender dropped: the reader task has finished and holds the cause
        match self.reader.take() {
            Some(reader) => Err(reader.task.await.unwrap_or(CaptureError::StreamEnded)),
            None => Err(CaptureError::StreamEnded),
        }
    }
}

// ---------------------------------------------------------------------------
// Directory replay
// ---------------------------------------------------------------------------

/// Cycles through the JPEG files of a directory in name order.
pub struct DirectorySource {
    dir: PathBuf,
    files: Vec<PathBuf>,
    next: usize,
}

impl DirectorySource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            files: Vec::new(),
            next: 0,
        }
    }

    async fn scan(dir: &Path) -> Result<Vec<PathBuf>, CaptureError> {
        let read_err = |source| CaptureError::ReadFile {
            path: dir.to_path_buf(),
            source,
        };
        let mut entries = tokio::fs::read_dir(dir).await.map_err(read_err)?;
        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(read_err)? {
            let path = entry.path();
            let is_jpeg = path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| ["jpg", "jpeg"].iter().any(|x| e.eq_ignore_ascii_case(x)));
            if is_jpeg {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }
}

impl FrameSource for DirectorySource {
    fn name(&self) -> &'static str {
        "directory"
    }

    async fn open(&mut self) -> Result<(), CaptureError> {
        self.files = Self::scan(&self.dir).await?;
        if self.files.is_empty() {
            return Err(CaptureError::EmptyDirectory(self.dir.clone()));
        }
        self.next = 0;
        info!(
            dir = %self.dir.display(),
            files = self.files.len(),
            "replaying frames from directory"
        );
        Ok(())
    }

    async fn capture(&mut self) -> Result<Bytes, CaptureError> {
        if self.files.is_empty() {
            return Err(CaptureError::EmptyDirectory(self.dir.clone()));
        }
        let path = &self.files[self.next % self.files.len()];
        self.next = (self.next + 1) % self.files.len();
        debug!(path = %path.display(), "reading frame");
        let data = tokio::fs::read(path)
            .await
            .map_err(|source| CaptureError::ReadFile {
                path: path.clone(),
                source,
            })?;
        non_empty(Bytes::from(data))
    }
}

// ---------------------------------------------------------------------------
// Config-selected source
// ---------------------------------------------------------------------------

/// The source named by `camera.source` in the config.
pub enum Camera {
    Snapshot(SnapshotSource),
    Mjpeg(MjpegStreamSource),
    Directory(DirectorySource),
}

impl Camera {
    pub fn from_config(config: &CameraConfig) -> Result<Self, CaptureError> {
        let url = || config.url.clone().unwrap_or_default();
        Ok(match config.source {
            SourceKind::Snapshot => {
                Camera::Snapshot(SnapshotSource::new(url(), config.connect_timeout())?)
            }
            SourceKind::Mjpeg => {
                Camera::Mjpeg(MjpegStreamSource::new(url(), config.connect_timeout())?)
            }
            SourceKind::Directory => Camera::Directory(DirectorySource::new(
                config.directory.clone().unwrap_or_default(),
            )),
        })
    }
}

impl FrameSource for Camera {
    fn name(&self) -> &'static str {
        match self {
            Camera::Snapshot(s) => s.name(),
            Camera::Mjpeg(s) => s.name(),
            Camera::Directory(s) => s.name(),
        }
    }

    async fn open(&mut self) -> Result<(), CaptureError> {
        match self {
            Camera::Snapshot(s) => s.open().await,
            Camera::Mjpeg(s) => s.open().await,
            Camera::Directory(s) => s.open().await,
        }
    }

    async fn capture(&mut self) -> Result<Bytes, CaptureError> {
        match self {
            Camera::Snapshot(s) => s.capture().await,
            Camera::Mjpeg(s) => s.capture().await,
            Camera::Directory(s) => s.capture().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;

    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    use super::*;
    use crate::mjpeg::encode_part;

    const STREAM_HEAD: &[u8] = b"HTTP/1.1 200 OK\r\n\
        Content-Type: multipart/x-mixed-replace; boundary=frame\r\n\
        Connection: close\r\n\r\n";

    /// Bind a local listener and hand each accepted connection to `serve`
    /// after the request head has been read.
    async fn http_server<F, Fut>(serve: F) -> String
    where
        F: Fn(TcpStream) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((mut conn, _)) = listener.accept().await {
                let mut head = Vec::new();
                let mut buf = [0u8; 1024];
                while !head.windows(4).any(|w| w == b"\r\n\r\n") {
                    match conn.read(&mut buf).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => head.extend_from_slice(&buf[..n]),
                    }
                }
                tokio::spawn(serve(conn));
            }
        });
        format!("http://{addr}/")
    }

    fn part_id(part: &[u8]) -> u64 {
        std::str::from_utf8(part)
            .unwrap()
            .strip_prefix("part-")
            .unwrap()
            .parse()
            .unwrap()
    }

    #[tokio::test]
    async fn mjpeg_capture_keeps_up_with_a_fast_camera() {
        let sent = Arc::new(AtomicU64::new(0));
        let last_sent = sent.clone();
        let url = http_server(move |mut conn| {
            let sent = sent.clone();
            async move {
                if conn.write_all(STREAM_HEAD).await.is_err() {
                    return;
                }
                for id in 1.. {
                    let part = encode_part(format!("part-{id}").as_bytes());
                    if conn.write_all(&part).await.is_err() {
                        return;
                    }
                    sent.store(id, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(5)).await;
                }
            }
        })
        .await;

        let mut source = MjpegStreamSource::new(url, Duration::from_secs(2)).unwrap();
        source.open().await.unwrap();

        let mut previous = 0;
        for _ in 0..10 {
            tokio::time::sleep(Duration::from_millis(20)).await;
            let id = part_id(&source.capture().await.unwrap());
            let newest = last_sent.load(Ordering::SeqCst);
            assert!(id > previous, "part {id} repeated after {previous}");
            let lag = newest.saturating_sub(id);
            assert!(lag <= 3, "returned part {id} while camera is at {newest}");
            previous = id;
        }
    }

    #[tokio::test]
    async fn mjpeg_stream_end_is_reported() {
        let url = http_server(|mut conn| async move {
            let _ = conn.write_all(STREAM_HEAD).await;
            for id in 1..=3 {
                let _ = conn.write_all(&encode_part(format!("part-{id}").as_bytes())).await;
            }
            let _ = conn.shutdown().await;
        })
        .await;

        let mut source = MjpegStreamSource::new(url, Duration::from_secs(2)).unwrap();
        source.open().await.unwrap();

        let mut captured = 0;
        let err = loop {
            match source.capture().await {
                Ok(part) => {
                    assert!(part.starts_with(b"part-"));
                    captured += 1;
                    assert!(captured <= 3);
                }
                Err(e) => break e,
            }
        };
        assert!(matches!(err, CaptureError::StreamEnded), "got {err:?}");
        assert!(source.reader.is_none());
    }

    #[tokio::test]
    async fn snapshot_returns_body_and_rejects_error_status() {
        let ok = http_server(|mut conn| async move {
            let response = b"HTTP/1.1 200 OK\r\n\
                Content-Length: 4\r\n\
                Connection: close\r\n\r\njpeg";
            let _ = conn.write_all(response).await;
        })
        .await;
        let mut source = SnapshotSource::new(ok, Duration::from_secs(2)).unwrap();
        source.open().await.unwrap();
        assert_eq!(&source.capture().await.unwrap()[..], b"jpeg");

        let missing = http_server(|mut conn| async move {
            let response = b"HTTP/1.1 404 Not Found\r\n\
                Content-Length: 0\r\n\
                Connection: close\r\n\r\n";
            let _ = conn.write_all(response).await;
        })
        .await;
        let mut source = SnapshotSource::new(missing, Duration::from_secs(2)).unwrap();
        assert!(matches!(
            source.capture().await,
            Err(CaptureError::HttpStatus(404))
        ));
    }

    #[tokio::test]
    async fn directory_source_cycles_in_name_order() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.jpg"), b"second").unwrap();
        std::fs::write(dir.path().join("a.JPEG"), b"first").unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"ignored").unwrap();

        let mut source = DirectorySource::new(dir.path());
        source.open().await.unwrap();
        assert_eq!(source.files.len(), 2);
        assert_eq!(&source.capture().await.unwrap()[..], b"first");
        assert_eq!(&source.capture().await.unwrap()[..], b"second");
        assert_eq!(&source.capture().await.unwrap()[..], b"first");
    }

    #[tokio::test]
    async fn empty_directory_fails_open() {
        let dir = tempfile::tempdir().unwrap();
        let mut source = DirectorySource::new(dir.path());
        assert!(matches!(
            source.open().await,
            Err(CaptureError::EmptyDirectory(_))
        ));
    }

    #[tokio::test]
    async fn empty_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.jpg"), b"").unwrap();
        let mut source = DirectorySource::new(dir.path());
        source.open().await.unwrap();
        assert!(matches!(
            source.capture().await,
            Err(CaptureError::EmptyFrame)
        ));
    }

    #[tokio::test]
    async fn missing_directory_fails_open() {
        let mut camera = Camera::from_config(&CameraConfig {
            source: SourceKind::Directory,
            url: None,
            directory: Some(PathBuf::from("/nonexistent/edge-vision-frames")),
            capture_interval_ms: 100,
            max_retries: 0,
            retry_backoff_ms: 10,
            connect_timeout_secs: 1,
        })
        .unwrap();
        assert_eq!(camera.name(), "directory");
        assert!(matches!(
            camera.open().await,
            Err(CaptureError::ReadFile { .. })
        ));
    }
}
