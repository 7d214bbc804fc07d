use std::collections::HashMap;
use std::path::Path;
use std::time::SystemTime;

use crate::config::ServerConfig;
use crate::http::request::{ParseError, RequestError, ValidationError};
use crate::prelude::{
    HTTP_BAD_REQUEST, HTTP_HEADER_TOO_LARGE, HTTP_LENGTH_REQUIRED, HTTP_METHOD_NOT_ALLOWED,
    HTTP_PAYLOAD_TOO_LARGE, HTTP_URI_TOO_LONG, SERVER_SOFTWARE,
};

#[derive(Debug)]
pub struct HttpResponse {
    pub status_code: u16,
    pub status_text: String,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn new(status_code: u16) -> Self {
        Self {
            status_code,
            status_text: reason_phrase(status_code).to_string(),
            headers: HashMap::from([("content-length".to_string(), "0".to_string())]),
            body: Vec::new(),
        }
    }

    pub fn set_header(&mut self, key: &str, value: &str) -> &mut Self {
        self.headers.insert(key.to_ascii_lowercase(), value.to_string());
        self
    }

    pub fn set_body(&mut self, body: Vec<u8>, content_type: &str) -> &mut Self {
        self.headers
            .insert("content-length".to_string(), body.len().to_string());
        self.headers
            .insert("content-type".to_string(), content_type.to_string());
        self.body = body;
        self
    }

    pub fn redirect(status_code: u16, target: &str) -> Self {
        let mut res = HttpResponse::new(status_code);
        res.set_header("location", target);
        res
    }

    /// Stamps the headers every response carries: Date, Server, the
    /// negotiated Connection disposition, and a Content-Length for the body.
    pub fn finalize(&mut self, keep_alive: bool) -> &mut Self {
        self.headers.insert(
            "date".to_string(),
            httpdate::fmt_http_date(SystemTime::now()),
        );
        self.headers
            .insert("server".to_string(), SERVER_SOFTWARE.to_string());
        self.headers.insert(
            "connection".to_string(),
            if keep_alive { "keep-alive" } else { "close" }.to_string(),
        );
        self.headers
            .entry("content-length".to_string())
            .or_insert_with(|| self.body.len().to_string());
        self
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut res =
            format!("HTTP/1.1 {} {}\r\n", self.status_code, self.status_text).into_bytes();

        let mut names: Vec<&String> = self.headers.keys().collect();
        names.sort();
        for name in names {
            let line = format!("{}: {}\r\n", to_pascal_case(name), self.headers[name]);
            res.extend_from_slice(line.as_bytes());
        }
        res.extend_from_slice(b"\r\n");
        res.extend_from_slice(&self.body);
        res
    }
}

fn to_pascal_case(s: &str) -> String {
    s.split('-')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                None => String::new(),
                Some(f) => f.to_uppercase().collect::<String>() + chars.as_str(),
            }
        })
        .collect::<Vec<String>>()
        .join("-")
}

pub fn reason_phrase(code: u16) -> &'static str {
    match code {
        200 => "OK",
        201 => "Created",
        204 => "No Content",
        301 => "Moved Permanently",
        302 => "Found",
        303 => "See Other",
        307 => "Temporary Redirect",
        308 => "Permanent Redirect",
        400 => "Bad Request",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        408 => "Request Timeout",
        411 => "Length Required",
        413 => "Payload Too Large",
        414 => "URI Too Long",
        431 => "Request Header Fields Too Large",
        500 => "Internal Server Error",
        501 => "Not Implemented",
        502 => "Bad Gateway",
        504 => "Gateway Timeout",
        _ => "Unknown",
    }
}

/// The one place a request failure turns into an HTTP status.
pub fn status_for(error: &RequestError) -> u16 {
    match error {
        RequestError::Parse(e) => match e {
            ParseError::MalformedRequestLine
            | ParseError::InvalidUri
            | ParseError::InvalidHttpVersion
            | ParseError::InvalidHeader
            | ParseError::InvalidChunk => HTTP_BAD_REQUEST,
            ParseError::UriTooLong => HTTP_URI_TOO_LONG,
            ParseError::HeaderTooLarge => HTTP_HEADER_TOO_LARGE,
            ParseError::RequestTooLarge => HTTP_PAYLOAD_TOO_LARGE,
        },
        RequestError::Validation(e) => match e {
            ValidationError::MissingHostHeader
            | ValidationError::InvalidContentLength
            | ValidationError::ConflictingHeader
            | ValidationError::MethodBodyMismatch => HTTP_BAD_REQUEST,
            ValidationError::UnsupportedMethod => HTTP_METHOD_NOT_ALLOWED,
            ValidationError::LengthRequired => HTTP_LENGTH_REQUIRED,
            ValidationError::PayloadTooLarge => HTTP_PAYLOAD_TOO_LARGE,
        },
    }
}

/// Builds an error response: the matched server's configured `error_page`
/// when one exists and is readable, else a small generated page.
pub fn error_response(status_code: u16, server: Option<&ServerConfig>) -> HttpResponse {
    let mut res = HttpResponse::new(status_code);

    if let Some(server) = server {
        if let Some(page) = server.error_pages.get(&status_code) {
            let path = if page.is_absolute() {
                page.clone()
            } else {
                server.root.join(page)
            };
            if let Ok(content) = std::fs::read(path) {
                res.set_body(content, "text/html");
                return res;
            }
        }
    }

    let body = format!(
        "<html><head><title>{code} {reason}</title></head>\
         <body><h1>{code} {reason}</h1></body></html>",
        code = status_code,
        reason = reason_phrase(status_code)
    );
    res.set_body(body.into_bytes(), "text/html");
    res
}

pub fn get_mime_type(extension: Option<&str>) -> &'static str {
    match extension {
        Some("html") | Some("htm") => "text/html",
        Some("css") => "text/css",
        Some("js") => "application/javascript",
        Some("json") => "application/json",
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("svg") => "image/svg+xml",
        Some("ico") => "image/x-icon",
        Some("pdf") => "application/pdf",
        Some("txt") => "text/plain",
        _ => "application/octet-stream",
    }
}

/// Generated directory listing, used when a directory has no index file and
/// the location enables autoindex.
pub fn generate_autoindex(dir: &Path, uri_path: &str) -> std::io::Result<HttpResponse> {
    let mut html = format!("<html><body><h1>Index of {}</h1><ul>", uri_path);
    let base = uri_path.trim_end_matches('/');

    let mut names: Vec<String> = Vec::new();
    for entry in dir.read_dir()? {
        let entry = entry?;
        if let Ok(mut name) = entry.file_name().into_string() {
            if entry.path().is_dir() {
                name.push('/');
            }
            names.push(name);
        }
    }
    names.sort();

    for name in names {
        html.push_str(&format!("<li><a href=\"{}/{}\">{}</a></li>", base, name, name));
    }
    html.push_str("</ul></body></html>");

    let mut res = HttpResponse::new(200);
    res.set_body(html.into_bytes(), "text/html");
    Ok(res)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn response_bytes_carry_status_line_and_body() {
        let mut res = HttpResponse::new(200);
        res.set_body(b"Hello Rust".to_vec(), "text/plain");
        res.finalize(true);

        let bytes = res.to_bytes();
        let s = String::from_utf8_lossy(&bytes);
        assert!(s.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(s.contains("Content-Type: text/plain\r\n"));
        assert!(s.contains("Content-Length: 10\r\n"));
        assert!(s.contains("Connection: keep-alive\r\n"));
        assert!(s.contains("Server: "));
        assert!(s.contains("Date: "));
        assert!(s.ends_with("\r\n\r\nHello Rust"));
    }

    #[test]
    fn close_disposition_is_echoed() {
        let mut res = HttpResponse::new(404);
        res.finalize(false);
        let s = String::from_utf8_lossy(&res.to_bytes()).to_string();
        assert!(s.contains("Connection: close\r\n"));
    }

    #[test]
    fn generated_error_page_mentions_the_status() {
        let res = error_response(404, None);
        assert_eq!(res.status_code, 404);
        assert!(String::from_utf8_lossy(&res.body).contains("404 Not Found"));
    }
}
