use memchr::memmem;
use thiserror::Error;

use crate::http::request::Request;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum MultipartError {
    #[error("missing multipart boundary")]
    MissingBoundary,
    #[error("malformed multipart body")]
    Malformed,
}

/// One part of a `multipart/form-data` body. A file part is one with a
/// non-empty filename.
#[derive(Debug, Default)]
pub struct Part {
    pub name: String,
    pub filename: Option<String>,
    pub content_type: String,
    pub data: Vec<u8>,
}

impl Part {
    pub fn is_file(&self) -> bool {
        self.filename.as_deref().map(|f| !f.is_empty()).unwrap_or(false)
    }
}

impl Request {
    /// Lazily parses the body as `multipart/form-data`. Returns `None` when
    /// the request is not multipart at all.
    pub fn multipart(&self) -> Option<Result<Vec<Part>, MultipartError>> {
        let content_type = self.headers.get("content-type")?;
        if !content_type
            .to_ascii_lowercase()
            .starts_with("multipart/form-data")
        {
            return None;
        }
        let Some(boundary) = boundary_from_content_type(content_type) else {
            return Some(Err(MultipartError::MissingBoundary));
        };
        Some(parse_multipart(&self.body, &boundary))
    }
}

/// `multipart/form-data; boundary=----x` → `----x`
pub fn boundary_from_content_type(content_type: &str) -> Option<String> {
    content_type
        .split(';')
        .map(str::trim)
        .find_map(|param| param.strip_prefix("boundary="))
        .map(|b| b.trim_matches('"').to_string())
        .filter(|b| !b.is_empty())
}

pub fn parse_multipart(body: &[u8], boundary: &str) -> Result<Vec<Part>, MultipartError> {
    let delimiter = format!("--{}", boundary);
    let delimiter = delimiter.as_bytes();

    let mut parts = Vec::new();
    let mut pos = memmem::find(body, delimiter).ok_or(MultipartError::Malformed)?;

    loop {
        pos += delimiter.len();
        // Closing delimiter is "--boundary--".
        if body[pos..].starts_with(b"--") {
            return Ok(parts);
        }
        if !body[pos..].starts_with(b"\r\n") {
            return Err(MultipartError::Malformed);
        }
        pos += 2;

        let headers_end = memmem::find(&body[pos..], b"\r\n\r\n").ok_or(MultipartError::Malformed)?;
        let header_block =
            std::str::from_utf8(&body[pos..pos + headers_end]).map_err(|_| MultipartError::Malformed)?;
        pos += headers_end + 4;

        let data_end = memmem::find(&body[pos..], delimiter).ok_or(MultipartError::Malformed)?;
        // Part data ends right before the CRLF that precedes the delimiter.
        let data = body[pos..pos + data_end]
            .strip_suffix(b"\r\n")
            .ok_or(MultipartError::Malformed)?;

        let mut part = parse_part_headers(header_block);
        part.data = data.to_vec();
        parts.push(part);

        pos += data_end;
    }
}

/// Pulls `name`, `filename` and `Content-Type` out of a part's header block.
pub fn parse_part_headers(block: &str) -> Part {
    let mut part = Part::default();

    for line in block.split("\r\n") {
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();

        if name.eq_ignore_ascii_case("content-disposition") {
            for param in value.split(';').map(str::trim) {
                if let Some(n) = param.strip_prefix("name=") {
                    part.name = n.trim_matches('"').to_string();
                } else if let Some(f) = param.strip_prefix("filename=") {
                    part.filename = Some(f.trim_matches('"').to_string());
                }
            }
        } else if name.eq_ignore_ascii_case("content-type") {
            part.content_type = value.to_string();
        }
    }

    part
}
