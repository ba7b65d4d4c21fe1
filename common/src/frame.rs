use bytes::Bytes;

/// One JPEG-encoded camera image with capture metadata.
///
/// Frames are immutable once captured. Cloning is cheap: the JPEG bytes
/// are reference counted, so the frame slot and every reader share a
/// single buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    data: Bytes,
    /// Sequence number assigned by the producer, one per successful capture.
    pub seq: u64,
    /// Unix millis at capture time.
    pub captured_at_ms: i64,
}

/// JPEG start-of-image marker.
const JPEG_SOI: [u8; 2] = [0xFF, 0xD8];

impl Frame {
    pub fn new(data: impl Into<Bytes>, seq: u64, captured_at_ms: i64) -> Self {
        Self {
            data: data.into(),
            seq,
            captured_at_ms,
        }
    }

    /// Create a frame stamped with the current wall-clock time.
    pub fn now(data: impl Into<Bytes>, seq: u64) -> Self {
        Self::new(data, seq, chrono::Utc::now().timestamp_millis())
    }

    pub fn jpeg(&self) -> &[u8] {
        &self.data
    }

    /// Shared handle to the JPEG bytes, for handing to response bodies.
    pub fn bytes(&self) -> Bytes {
        self.data.clone()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Cheap sniff for the JPEG SOI marker. Does not decode anything.
    pub fn looks_like_jpeg(&self) -> bool {
        self.data.starts_with(&JPEG_SOI)
    }

    /// File name used when a frame is written to disk.
    pub fn file_name(&self) -> String {
        let dt = chrono::DateTime::from_timestamp_millis(self.captured_at_ms)
            .unwrap_or_else(chrono::Utc::now);
        let ts = dt.format("%Y%m%d-%H%M%S");
        format!("image_{ts}_{seq:04}.jpg", seq = self.seq)
    }
}
