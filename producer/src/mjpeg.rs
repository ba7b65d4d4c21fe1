use bytes::{Bytes, BytesMut};
use tracing::debug;

/// Boundary token used when a stream does not announce one.
pub const DEFAULT_BOUNDARY: &str = "frame";

const HEADER_END: &[u8] = b"\r\n\r\n";

/// Parse state for the MJPEG multipart stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParseState {
    /// Looking for the boundary marker `--<boundary>\r\n`.
    SeekingBoundary,
    /// Found boundary, now looking for end of headers `\r\n\r\n`.
    SeekingHeaderEnd,
    /// Collecting JPEG bytes until the next boundary.
    CollectingJpeg,
}

/// Incremental splitter for `multipart/x-mixed-replace` bodies.
///
/// Feed it arbitrary chunks as they arrive from the socket; it returns each
/// JPEG part once the boundary that terminates it has been seen.
#[derive(Debug)]
pub struct MjpegParser {
    boundary: Vec<u8>,
    buffer: BytesMut,
    state: ParseState,
    /// Offset in `buffer` from which to resume the boundary scan.
    jpeg_start: usize,
}

impl Default for MjpegParser {
    fn default() -> Self {
        Self::new(DEFAULT_BOUNDARY)
    }
}

impl MjpegParser {
    pub fn new(boundary: &str) -> Self {
        let token = boundary.trim().trim_start_matches("--");
        Self {
            boundary: format!("--{token}\r\n").into_bytes(),
            buffer: BytesMut::with_capacity(256 * 1024),
            state: ParseState::SeekingBoundary,
            jpeg_start: 0,
        }
    }

    /// Build a parser from a `Content-Type` header value, falling back to
    /// [`DEFAULT_BOUNDARY`] when no `boundary=` parameter is present.
    pub fn from_content_type(content_type: Option<&str>) -> Self {
        let boundary = content_type
            .and_then(boundary_param)
            .unwrap_or(DEFAULT_BOUNDARY);
        Self::new(boundary)
    }

    /// Append a chunk and return every JPEG completed by it, oldest first.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Bytes> {
        self.buffer.extend_from_slice(chunk);
        let boundary_len = self.boundary.len();
        let mut frames = Vec::new();

        loop {
            match self.state {
                ParseState::SeekingBoundary => {
                    if let Some(pos) = find_subsequence(&self.buffer, &self.boundary) {
                        let _ = self.buffer.split_to(pos + boundary_len);
                        self.state = ParseState::SeekingHeaderEnd;
                    } else {
                        // Keep a tail in case the boundary spans chunks
                        if self.buffer.len() > boundary_len {
                            let _ = self.buffer.split_to(self.buffer.len() - boundary_len);
                        }
                        break;
                    }
                }
                ParseState::SeekingHeaderEnd => {
                    if let Some(pos) = find_subsequence(&self.buffer, HEADER_END) {
                        let _ = self.buffer.split_to(pos + HEADER_END.len());
                        self.jpeg_start = 0;
                        self.state = ParseState::CollectingJpeg;
                    } else {
                        break;
                    }
                }
                ParseState::CollectingJpeg => {
                    let Some(pos) =
                        find_subsequence(&self.buffer[self.jpeg_start..], &self.boundary)
                    else {
                        // Resume just before the unscanned tail next time
                        self.jpeg_start = self.buffer.len().saturating_sub(boundary_len);
                        break;
                    };
                    let jpeg_end = self.jpeg_start + pos;
                    // Strip trailing \r\n before boundary
                    let end = if self.buffer[..jpeg_end].ends_with(b"\r\n") {
                        jpeg_end - 2
                    } else {
                        jpeg_end
                    };

                    let mut part = self.buffer.split_to(jpeg_end + boundary_len);
                    part.truncate(end);
                    if part.is_empty() {
                        debug!("skipping empty multipart part");
                    } else {
                        frames.push(part.freeze());
                    }
                    self.state = ParseState::SeekingHeaderEnd;
                }
            }
        }

        frames
    }
}

/// Extract the `boundary=` parameter from a multipart content type.
fn boundary_param(content_type: &str) -> Option<&str> {
    content_type.split(';').find_map(|param| {
        let (key, value) = param.trim().split_once('=')?;
        key.trim()
            .eq_ignore_ascii_case("boundary")
            .then(|| value.trim().trim_matches('"'))
            .filter(|v| !v.is_empty())
    })
}

/// Find the position of `needle` in `haystack`.
fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// Frame one JPEG as a multipart part using the default boundary.
pub fn encode_part(jpeg: &[u8]) -> Bytes {
    let mut part = BytesMut::with_capacity(jpeg.len() + 64);
    part.extend_from_slice(b"--");
    part.extend_from_slice(DEFAULT_BOUNDARY.as_bytes());
    part.extend_from_slice(b"\r\nContent-Type: image/jpeg\r\n\r\n");
    part.extend_from_slice(jpeg);
    part.extend_from_slice(b"\r\n");
    part.freeze()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stream_of(parts: &[&[u8]]) -> Vec<u8> {
        let mut body = Vec::new();
        for part in parts {
            body.extend_from_slice(&encode_part(part));
        }
        body
    }

    #[test]
    fn frame_emitted_once_next_boundary_seen() {
        let mut parser = MjpegParser::default();
        let body = stream_of(&[b"\xFF\xD8first\xFF\xD9", b"\xFF\xD8second\xFF\xD9"]);
        let frames = parser.push(&body);
        // The second part has no terminating boundary yet
        assert_eq!(frames.len(), 1);
        assert_eq!(&frames[0][..], b"\xFF\xD8first\xFF\xD9");

        let frames = parser.push(b"--frame\r\n");
        assert_eq!(frames.len(), 1);
        assert_eq!(&frames[0][..], b"\xFF\xD8second\xFF\xD9");
    }

    #[test]
    fn reassembles_across_tiny_chunks() {
        let mut parser = MjpegParser::default();
        let mut body = stream_of(&[b"alpha-jpeg", b"beta-jpeg", b"gamma-jpeg"]);
        body.extend_from_slice(b"--frame\r\n");

        let mut frames = Vec::new();
        for chunk in body.chunks(3) {
            frames.extend(parser.push(chunk));
        }
        let frames: Vec<&[u8]> = frames.iter().map(|f| &f[..]).collect();
        assert_eq!(
            frames,
            vec![&b"alpha-jpeg"[..], &b"beta-jpeg"[..], &b"gamma-jpeg"[..]]
        );
    }

    #[test]
    fn leading_garbage_ignored() {
        let mut parser = MjpegParser::default();
        let mut body = b"HTTP noise before the first part".to_vec();
        body.extend(stream_of(&[b"payload"]));
        body.extend_from_slice(b"--frame\r\n");
        let frames = parser.push(&body);
        assert_eq!(frames.len(), 1);
        assert_eq!(&frames[0][..], b"payload");
    }

    #[test]
    fn custom_boundary_from_content_type() {
        let mut parser = MjpegParser::from_content_type(Some(
            "multipart/x-mixed-replace; boundary=\"--myboundary\"",
        ));
        let body = b"--myboundary\r\n\
            Content-Type: image/jpeg\r\nContent-Length: 4\r\n\r\n\
            JPEG\r\n--myboundary\r\n";
        let frames = parser.push(body);
        assert_eq!(frames.len(), 1);
        assert_eq!(&frames[0][..], b"JPEG");
    }

    #[test]
    fn boundary_param_parsing() {
        assert_eq!(boundary_param("multipart/x-mixed-replace; boundary=frame"), Some("frame"));
        assert_eq!(boundary_param("multipart/x-mixed-replace;Boundary=\"abc\""), Some("abc"));
        assert_eq!(boundary_param("image/jpeg"), None);
    }

    #[test]
    fn encode_part_layout() {
        let part = encode_part(b"JPEG");
        assert_eq!(&part[..], b"--frame\r\nContent-Type: image/jpeg\r\n\r\nJPEG\r\n");
    }
}
