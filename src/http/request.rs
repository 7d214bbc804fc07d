use std::str::FromStr;

use memchr::memmem;
use thiserror::Error;

use crate::prelude::{
    MAX_HEADER_COUNT, MAX_HEADER_NAME, MAX_HEADER_VALUE, MAX_REQUEST_SIZE, MAX_URI_LEN,
};

const CRLF_LEN: usize = 2;
const HEADER_TERMINATOR: &[u8] = b"\r\n\r\n";
// Longest plausible chunk-size line: 16 hex digits plus slack for extensions.
const MAX_CHUNK_SIZE_LINE: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    GET,
    POST,
    DELETE,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::GET => "GET",
            Method::POST => "POST",
            Method::DELETE => "DELETE",
        }
    }

    /// GET and DELETE are complete at the header terminator; only POST
    /// carries a body.
    pub fn allows_body(&self) -> bool {
        matches!(self, Method::POST)
    }
}

impl FromStr for Method {
    type Err = ();
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "GET" => Ok(Method::GET),
            "POST" => Ok(Method::POST),
            "DELETE" => Ok(Method::DELETE),
            _ => Err(()),
        }
    }
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Methods we recognize on the wire but do not serve.
fn is_known_method(token: &str) -> bool {
    matches!(
        token,
        "GET" | "POST" | "DELETE" | "HEAD" | "PUT" | "OPTIONS" | "PATCH" | "TRACE" | "CONNECT"
    )
}

/// Case-insensitive ordered header multimap. Names are stored lowercased;
/// insertion order is preserved for the CGI `HTTP_*` passthrough.
#[derive(Debug, Clone, Default)]
pub struct Headers {
    entries: Vec<(String, String)>,
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, name: &str, value: String) {
        self.entries.push((name.to_ascii_lowercase(), value));
    }

    /// First value for `name`, if any.
    pub fn get(&self, name: &str) -> Option<&str> {
        let name = name.to_ascii_lowercase();
        self.entries
            .iter()
            .find(|(k, _)| *k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn count(&self, name: &str) -> usize {
        let name = name.to_ascii_lowercase();
        self.entries.iter().filter(|(k, _)| *k == name).count()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// A fully parsed and validated request. Immutable once built.
#[derive(Debug)]
pub struct Request {
    pub method: Method,
    pub path: String,
    pub query: String,
    pub version: String,
    pub headers: Headers,
    pub host: String,
    pub content_length: Option<usize>,
    pub body: Vec<u8>,
    pub keep_alive: bool,
}

impl Request {
    /// Hostname part of the Host header, port stripped.
    pub fn hostname(&self) -> &str {
        self.host.split(':').next().unwrap_or("")
    }
}

// --- Error taxonomy ---

/// Shape failures: the bytes do not form an HTTP/1.1 request head.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("malformed request line")]
    MalformedRequestLine,
    #[error("invalid request target")]
    InvalidUri,
    #[error("request target too long")]
    UriTooLong,
    #[error("invalid http version")]
    InvalidHttpVersion,
    #[error("invalid header line")]
    InvalidHeader,
    #[error("header block too large")]
    HeaderTooLarge,
    #[error("request exceeds the total size limit")]
    RequestTooLarge,
    #[error("invalid chunked encoding")]
    InvalidChunk,
}

/// Semantic failures found while validating a well-shaped head.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("method not supported")]
    UnsupportedMethod,
    #[error("missing host header")]
    MissingHostHeader,
    #[error("invalid content-length")]
    InvalidContentLength,
    #[error("conflicting message framing headers")]
    ConflictingHeader,
    #[error("request body not allowed for this method")]
    MethodBodyMismatch,
    #[error("content-length required")]
    LengthRequired,
    #[error("payload too large")]
    PayloadTooLarge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RequestError {
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Validation(#[from] ValidationError),
}

#[derive(Debug)]
pub enum ParseOutcome {
    /// The buffer holds a valid prefix; read more bytes.
    NeedMore,
    /// A full request was parsed; its bytes were drained from the buffer.
    Complete(Request),
    Invalid(RequestError),
    TooLarge(RequestError),
}

/// Limits the parser enforces before any response exists. `max_body_size` is
/// the largest `client_max_body_size` among the servers sharing the endpoint;
/// the router re-checks the selected server's exact limit afterwards.
#[derive(Debug, Clone, Copy)]
pub struct ParseLimits {
    pub max_body_size: usize,
}

impl Default for ParseLimits {
    fn default() -> Self {
        Self {
            max_body_size: MAX_REQUEST_SIZE,
        }
    }
}

/// Incremental, non-consuming request parser. Call after every read: the
/// buffer is only advanced when a complete request is returned, so pipelined
/// leftovers stay in place and seed the next parse.
pub fn parse_request(buf: &mut Vec<u8>, limits: &ParseLimits) -> ParseOutcome {
    let header_end = match memmem::find(buf, HEADER_TERMINATOR) {
        Some(pos) => pos,
        None => {
            if buf.len() > MAX_REQUEST_SIZE {
                return ParseOutcome::TooLarge(ParseError::RequestTooLarge.into());
            }
            return ParseOutcome::NeedMore;
        }
    };
    let body_start = header_end + HEADER_TERMINATOR.len();

    // Request line.
    let head = &buf[..header_end];
    let line_end = memmem::find(head, b"\r\n").unwrap_or(header_end);
    let (method_token, uri, version) = match split_request_line(&head[..line_end]) {
        Ok(parts) => parts,
        Err(e) => return ParseOutcome::Invalid(e.into()),
    };

    if method_token.parse::<Method>().is_err() {
        if is_known_method(method_token) {
            return ParseOutcome::Invalid(ValidationError::UnsupportedMethod.into());
        }
        return ParseOutcome::Invalid(ParseError::MalformedRequestLine.into());
    }
    let method = method_token.parse::<Method>().unwrap_or(Method::GET);

    let (path, query) = match validate_uri(uri) {
        Ok(parts) => parts,
        Err(e) => return ParseOutcome::Invalid(e.into()),
    };

    if version != "HTTP/1.1" {
        return ParseOutcome::Invalid(ParseError::InvalidHttpVersion.into());
    }

    // Header block.
    let header_block = if line_end < header_end {
        &head[line_end + CRLF_LEN..]
    } else {
        &[][..]
    };
    let headers = match parse_headers(header_block) {
        Ok(headers) => headers,
        Err(e) => return ParseOutcome::Invalid(e.into()),
    };

    // Host: mandatory, exactly once, non-empty.
    let host = match headers.count("host") {
        0 => return ParseOutcome::Invalid(ValidationError::MissingHostHeader.into()),
        1 => {
            let value = headers.get("host").unwrap_or("").to_string();
            if value.is_empty() {
                return ParseOutcome::Invalid(ValidationError::MissingHostHeader.into());
            }
            value
        }
        _ => return ParseOutcome::Invalid(ParseError::InvalidHeader.into()),
    };

    // Message framing.
    let chunked = headers
        .get("transfer-encoding")
        .map(|v| v.to_ascii_lowercase().contains("chunked"))
        .unwrap_or(false);
    let content_length = match headers.count("content-length") {
        0 => None,
        1 => {
            if chunked {
                return ParseOutcome::Invalid(ValidationError::ConflictingHeader.into());
            }
            let raw = headers.get("content-length").unwrap_or("");
            match raw.parse::<usize>() {
                Ok(n) => Some(n),
                Err(_) => {
                    return ParseOutcome::Invalid(ValidationError::InvalidContentLength.into())
                }
            }
        }
        _ => return ParseOutcome::Invalid(ValidationError::InvalidContentLength.into()),
    };

    if !method.allows_body() && (chunked || content_length.unwrap_or(0) > 0) {
        return ParseOutcome::Invalid(ValidationError::MethodBodyMismatch.into());
    }
    if method.allows_body() && !chunked && content_length.is_none() {
        return ParseOutcome::Invalid(ValidationError::LengthRequired.into());
    }
    if let Some(length) = content_length {
        if length > limits.max_body_size {
            return ParseOutcome::TooLarge(ValidationError::PayloadTooLarge.into());
        }
    }

    // Body completeness and extraction.
    let (body, consumed) = if method.allows_body() && chunked {
        match decode_chunked(&buf[body_start..], limits.max_body_size) {
            Ok(Chunked::NeedMore) => {
                if buf.len() > MAX_REQUEST_SIZE {
                    return ParseOutcome::TooLarge(ParseError::RequestTooLarge.into());
                }
                return ParseOutcome::NeedMore;
            }
            Ok(Chunked::Done {
                body,
                consumed: body_consumed,
            }) => (body, body_start + body_consumed),
            Err(RequestError::Validation(ValidationError::PayloadTooLarge)) => {
                return ParseOutcome::TooLarge(ValidationError::PayloadTooLarge.into())
            }
            Err(e) => return ParseOutcome::Invalid(e),
        }
    } else {
        let length = if method.allows_body() {
            content_length.unwrap_or(0)
        } else {
            0
        };
        if buf.len() < body_start + length {
            return ParseOutcome::NeedMore;
        }
        (buf[body_start..body_start + length].to_vec(), body_start + length)
    };

    let keep_alive = headers
        .get("connection")
        .map(|v| !v.eq_ignore_ascii_case("close"))
        .unwrap_or(true);

    let request = Request {
        method,
        path: path.to_string(),
        query: query.to_string(),
        version: version.to_string(),
        host,
        content_length: if method.allows_body() {
            Some(body.len())
        } else {
            content_length
        },
        headers,
        body,
        keep_alive,
    };

    buf.drain(..consumed);
    ParseOutcome::Complete(request)
}

/// Exactly three non-empty tokens separated by single spaces.
fn split_request_line(line: &[u8]) -> Result<(&str, &str, &str), ParseError> {
    let line = std::str::from_utf8(line).map_err(|_| ParseError::MalformedRequestLine)?;
    let mut parts = line.split(' ');
    let method = parts.next().unwrap_or("");
    let uri = parts.next().unwrap_or("");
    let version = parts.next().unwrap_or("");
    if method.is_empty() || uri.is_empty() || version.is_empty() || parts.next().is_some() {
        return Err(ParseError::MalformedRequestLine);
    }
    Ok((method, uri, version))
}

/// Splits the request target into path and raw query, enforcing the URI
/// constraints. Percent-decoding is deliberately not done here.
fn validate_uri(uri: &str) -> Result<(&str, &str), ParseError> {
    if uri.len() > MAX_URI_LEN {
        return Err(ParseError::UriTooLong);
    }
    if !uri.starts_with('/') {
        return Err(ParseError::InvalidUri);
    }
    if uri.bytes().any(|b| b <= 0x1F || b == 0x7F) {
        return Err(ParseError::InvalidUri);
    }

    let (path, query) = match uri.find('?') {
        Some(pos) => (&uri[..pos], &uri[pos + 1..]),
        None => (uri, ""),
    };

    if path.split('/').any(|segment| segment == "..") {
        return Err(ParseError::InvalidUri);
    }

    Ok((path, query))
}

fn is_tchar(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b"!#$%&'*+-.^_`|~".contains(&b)
}

fn parse_headers(block: &[u8]) -> Result<Headers, ParseError> {
    let mut headers = Headers::new();

    let mut rest = block;
    while !rest.is_empty() {
        let line_end = memmem::find(rest, b"\r\n").unwrap_or(rest.len());
        let line = &rest[..line_end];
        rest = &rest[(line_end + CRLF_LEN).min(rest.len())..];

        if headers.len() == MAX_HEADER_COUNT {
            return Err(ParseError::HeaderTooLarge);
        }

        let colon = line
            .iter()
            .position(|&b| b == b':')
            .ok_or(ParseError::InvalidHeader)?;
        let name = &line[..colon];
        if name.is_empty() || !name.iter().all(|&b| is_tchar(b)) {
            return Err(ParseError::InvalidHeader);
        }
        if name.len() > MAX_HEADER_NAME {
            return Err(ParseError::HeaderTooLarge);
        }

        let value = std::str::from_utf8(&line[colon + 1..])
            .map_err(|_| ParseError::InvalidHeader)?
            .trim_matches([' ', '\t']);
        if value.len() > MAX_HEADER_VALUE {
            return Err(ParseError::HeaderTooLarge);
        }

        let name = std::str::from_utf8(name).map_err(|_| ParseError::InvalidHeader)?;
        headers.push(name, value.to_string());
    }

    Ok(headers)
}

// --- Chunked transfer decoding ---

enum Chunked {
    NeedMore,
    Done { body: Vec<u8>, consumed: usize },
}

/// Non-consuming decoder for `Transfer-Encoding: chunked` bodies: walks
/// `size CRLF data CRLF` frames from the start of `input`, skipping chunk
/// extensions and trailers. `consumed` covers everything through the final
/// blank line.
fn decode_chunked(input: &[u8], max_body: usize) -> Result<Chunked, RequestError> {
    let mut pos = 0usize;
    let mut body = Vec::new();

    loop {
        let line_end = match memmem::find(&input[pos..], b"\r\n") {
            Some(i) => i,
            None => {
                if input.len() - pos > MAX_CHUNK_SIZE_LINE {
                    return Err(ParseError::InvalidChunk.into());
                }
                return Ok(Chunked::NeedMore);
            }
        };
        if line_end > MAX_CHUNK_SIZE_LINE {
            return Err(ParseError::InvalidChunk.into());
        }

        let line = std::str::from_utf8(&input[pos..pos + line_end])
            .map_err(|_| ParseError::InvalidChunk)?;
        let size_str = line.split(';').next().unwrap_or("").trim();
        let size =
            usize::from_str_radix(size_str, 16).map_err(|_| ParseError::InvalidChunk)?;
        pos += line_end + CRLF_LEN;

        if size == 0 {
            // Trailer section: zero or more header lines, then a blank line.
            loop {
                match memmem::find(&input[pos..], b"\r\n") {
                    None => return Ok(Chunked::NeedMore),
                    Some(0) => {
                        pos += CRLF_LEN;
                        return Ok(Chunked::Done { body, consumed: pos });
                    }
                    Some(n) => pos += n + CRLF_LEN,
                }
            }
        }

        if body.len() + size > max_body {
            return Err(ValidationError::PayloadTooLarge.into());
        }
        if input.len() < pos + size + CRLF_LEN {
            return Ok(Chunked::NeedMore);
        }
        body.extend_from_slice(&input[pos..pos + size]);
        if &input[pos + size..pos + size + CRLF_LEN] != b"\r\n" {
            return Err(ParseError::InvalidChunk.into());
        }
        pos += size + CRLF_LEN;
    }
}
