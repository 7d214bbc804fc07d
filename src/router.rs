use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;

use crate::config::{LocationConfig, ServerConfig};
use crate::http::request::{Method, Request};
use crate::prelude::{HTTP_METHOD_NOT_ALLOWED, HTTP_PAYLOAD_TOO_LARGE};

#[derive(Debug, Error)]
pub enum RoutingError {
    #[error("method not allowed")]
    MethodNotAllowed { allowed: Vec<Method> },
    #[error("payload exceeds the server limit")]
    PayloadTooLarge,
}

impl RoutingError {
    pub fn status(&self) -> u16 {
        match self {
            RoutingError::MethodNotAllowed { .. } => HTTP_METHOD_NOT_ALLOWED,
            RoutingError::PayloadTooLarge => HTTP_PAYLOAD_TOO_LARGE,
        }
    }
}

/// Where a routed request goes next.
#[derive(Debug)]
pub enum RouteAction {
    Static,
    Cgi { script: PathBuf },
    Redirect { status: u16, target: String },
}

/// Virtual-host selection: first server on the endpoint whose names contain
/// the Host header's hostname, else the endpoint's default server, else the
/// first server.
pub fn select_server<'a>(servers: &'a [Arc<ServerConfig>], hostname: &str) -> &'a Arc<ServerConfig> {
    servers
        .iter()
        .find(|s| s.names.iter().any(|n| n == hostname))
        .or_else(|| servers.iter().find(|s| s.is_default_server()))
        .unwrap_or(&servers[0])
}

/// Longest-prefix location match with `/` boundaries; ties broken by
/// declaration order.
pub fn select_location<'a>(server: &'a ServerConfig, path: &str) -> Option<&'a LocationConfig> {
    let mut best: Option<&LocationConfig> = None;
    for location in &server.locations {
        if !prefix_matches(&location.prefix, path) {
            continue;
        }
        match best {
            Some(b) if location.prefix.len() <= b.prefix.len() => {}
            _ => best = Some(location),
        }
    }
    best
}

fn prefix_matches(prefix: &str, path: &str) -> bool {
    if !path.starts_with(prefix) {
        return false;
    }
    // "/api" matches "/api" and "/api/x", never "/apix".
    prefix.ends_with('/') || path.len() == prefix.len() || path.as_bytes()[prefix.len()] == b'/'
}

/// Maps a file system path's extension onto the location's CGI binding.
fn is_cgi_target(location: &LocationConfig, path: &str) -> bool {
    match &location.cgi_extension {
        Some(ext) => path
            .rsplit('/')
            .next()
            .and_then(|file| file.rsplit_once('.'))
            .map(|(_, file_ext)| file_ext == ext)
            .unwrap_or(false),
        None => false,
    }
}

fn interpreter_is_executable(location: &LocationConfig) -> bool {
    use std::os::unix::fs::PermissionsExt;
    location
        .cgi_interpreter
        .as_ref()
        .and_then(|p| std::fs::metadata(p).ok())
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

/// Resolves the request path to a file system path for `location`: `alias`
/// replaces the matched prefix, `root` gets the full URI path appended.
pub fn resolve_path(server: &ServerConfig, location: &LocationConfig, path: &str) -> PathBuf {
    if let Some(alias) = &location.alias {
        let stripped = path.strip_prefix(&location.prefix).unwrap_or(path);
        return alias.join(stripped.trim_start_matches('/'));
    }
    let root = location.root.as_ref().unwrap_or(&server.root);
    root.join(path.trim_start_matches('/'))
}

/// Routing steps 2..6 of the request flow: body-limit re-check against the
/// selected server, method gate, configured redirect, CGI-vs-static choice.
pub fn route(
    server: &ServerConfig,
    location: &LocationConfig,
    request: &Request,
) -> Result<RouteAction, RoutingError> {
    if request.body.len() > server.client_max_body_size {
        return Err(RoutingError::PayloadTooLarge);
    }

    if !location.allowed_methods.contains(&request.method) {
        return Err(RoutingError::MethodNotAllowed {
            allowed: location.allowed_methods.clone(),
        });
    }

    if let Some(redirect) = &location.redirect {
        return Ok(RouteAction::Redirect {
            status: redirect.status,
            target: redirect.target.clone(),
        });
    }

    if is_cgi_target(location, &request.path) && interpreter_is_executable(location) {
        return Ok(RouteAction::Cgi {
            script: resolve_path(server, location, &request.path),
        });
    }

    Ok(RouteAction::Static)
}
