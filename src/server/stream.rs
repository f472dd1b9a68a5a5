//! File streaming with byte-range support.

use super::state::ServerState;
use axum::{
    body::Body,
    extract::FromRequestParts,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use std::path::Path;
use tokio::{
    fs::File,
    io::{AsyncReadExt, AsyncSeekExt, BufReader, SeekFrom},
};
use tokio_util::io::ReaderStream;
use tracing::debug;

const HEADER_BYTE_RANGE: &str = "Range";

const STREAM_CHUNK_SIZE: usize = 8 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    start_inclusive: Option<u64>,
    end_inclusive: Option<u64>,
}

impl ByteRange {
    pub fn new(start_inclusive: Option<u64>, end_inclusive: Option<u64>) -> ByteRange {
        ByteRange {
            start_inclusive,
            end_inclusive,
        }
    }

    fn parse<S: AsRef<str>>(s: S) -> Option<ByteRange> {
        let v = s.as_ref();
        if !v.starts_with("bytes=") {
            return None;
        }

        let v = &v[6..];
        let parts: Vec<&str> = v.split('-').collect();
        if parts.len() != 2 {
            return None;
        }

        Some(ByteRange {
            start_inclusive: Self::parse_bound(parts[0])?,
            end_inclusive: Self::parse_bound(parts[1])?,
        })
    }

    /// An empty bound is an omitted bound; a non-empty bound that fails to
    /// parse makes the whole header unparseable.
    fn parse_bound(s: &str) -> Option<Option<u64>> {
        if s.is_empty() {
            return Some(None);
        }
        s.parse::<u64>().ok().map(Some)
    }

    /// Concrete `(start, end)` bounds against a file of the given length.
    /// Omitted bounds default to the start and last byte of the file.
    /// Returns None when the range cannot be satisfied.
    fn resolve(&self, file_length: u64) -> Option<(u64, u64)> {
        let start = self.start_inclusive.unwrap_or(0);
        let end = match self.end_inclusive {
            Some(end) => end,
            None => file_length.checked_sub(1)?,
        };
        if start > end || end >= file_length {
            return None;
        }
        Some((start, end))
    }
}

pub struct ByteRangeExtractionError {}

impl IntoResponse for ByteRangeExtractionError {
    fn into_response(self) -> Response {
        StatusCode::BAD_REQUEST.into_response()
    }
}

impl FromRequestParts<ServerState> for Option<ByteRange> {
    type Rejection = ByteRangeExtractionError;

    async fn from_request_parts(
        parts: &mut axum::http::request::Parts,
        _state: &ServerState,
    ) -> Result<Self, Self::Rejection> {
        Ok(parts
            .headers
            .get(HEADER_BYTE_RANGE)
            .map(|x| x.to_str())
            .map(|x| x.ok())
            .and_then(|x| x.and_then(ByteRange::parse)))
    }
}

/// Content type inferred from the filename extension.
fn content_type_for(filename: &str) -> &'static str {
    let extension = filename
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase());
    match extension.as_deref() {
        Some("mp4") => "video/mp4",
        Some("mkv") => "video/x-matroska",
        Some("webm") => "video/webm",
        Some("mov") => "video/quicktime",
        Some("avi") => "video/x-msvideo",
        Some("zip") => "application/zip",
        Some("pdf") => "application/pdf",
        _ => "application/octet-stream",
    }
}

fn range_not_satisfiable(file_length: u64) -> Response {
    let response = Response::builder()
        .status(StatusCode::RANGE_NOT_SATISFIABLE)
        .header("Content-Range", format!("bytes */{}", file_length))
        .body(Body::empty());
    match response {
        Ok(response) => response,
        Err(_) => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    }
}

/// Stream a file to the client, honoring an optional byte range.
///
/// Full requests get 200 with the whole file; a parsed range gets 206 with
/// exactly the requested bytes, or 416 when it falls outside the file. The
/// file handle is owned by the response stream and closes on every exit
/// path, including client disconnects.
pub async fn serve_file(path: &Path, filename: &str, byte_range: Option<ByteRange>) -> Response {
    let mut file = match File::open(path).await {
        Ok(file) => file,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return StatusCode::NOT_FOUND.into_response()
        }
        Err(_) => return StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    };

    let file_length = match file.metadata().await {
        Ok(metadata) => metadata.len(),
        Err(_) => return StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    };

    let (status_code, start, end) = match byte_range {
        None => {
            if file_length == 0 {
                return delivery_response(
                    StatusCode::OK,
                    filename,
                    0,
                    None,
                    Body::empty(),
                );
            }
            (StatusCode::OK, 0, file_length - 1)
        }
        Some(range) => match range.resolve(file_length) {
            Some((start, end)) => (StatusCode::PARTIAL_CONTENT, start, end),
            None => return range_not_satisfiable(file_length),
        },
    };

    if start > 0 && file.seek(SeekFrom::Start(start)).await.is_err() {
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }

    let content_length = end - start + 1;
    debug!(
        "Streaming {:?} bytes {}-{} of {}",
        path, start, end, file_length
    );

    let reader = BufReader::with_capacity(STREAM_CHUNK_SIZE, file.take(content_length));
    let body = Body::from_stream(ReaderStream::with_capacity(reader, STREAM_CHUNK_SIZE));

    let content_range = if status_code == StatusCode::PARTIAL_CONTENT {
        Some(format!("bytes {}-{}/{}", start, end, file_length))
    } else {
        None
    };

    delivery_response(status_code, filename, content_length, content_range, body)
}

fn delivery_response(
    status_code: StatusCode,
    filename: &str,
    content_length: u64,
    content_range: Option<String>,
    body: Body,
) -> Response {
    let mut builder = Response::builder()
        .status(status_code)
        .header("Content-Type", content_type_for(filename))
        .header("Content-Length", content_length)
        .header(
            "Content-Disposition",
            format!("attachment; filename=\"{}\"", urlencoding::encode(filename)),
        )
        .header("Accept-Ranges", "bytes")
        .header("Cache-Control", "no-cache, no-store, must-revalidate")
        .header("Pragma", "no-cache")
        .header("Expires", "0");

    if let Some(content_range) = content_range {
        builder = builder.header("Content-Range", content_range);
    }

    match builder.body(body) {
        Ok(response) => response,
        Err(_) => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    }
}
