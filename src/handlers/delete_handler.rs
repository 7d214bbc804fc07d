use crate::http::response::{error_response, HttpResponse};
use crate::prelude::*;
use crate::router::resolve_path;

/// DELETE removes a single file under the location's tree. Canonicalization
/// keeps `%2e%2e`-style tricks from escaping it.
pub fn handle_delete(
    request: &Request,
    server: &ServerConfig,
    location: &LocationConfig,
) -> HttpResponse {
    let base = resolve_path(server, location, &location.prefix);
    let target = resolve_path(server, location, &request.path);

    let Ok(base) = base.canonicalize() else {
        return error_response(HTTP_NOT_FOUND, Some(server));
    };
    let target = match target.canonicalize() {
        Ok(path) => path,
        Err(e) => {
            return match e.kind() {
                ErrorKind::NotFound => error_response(HTTP_NOT_FOUND, Some(server)),
                _ => error_response(HTTP_FORBIDDEN, Some(server)),
            }
        }
    };

    if !target.starts_with(&base) {
        return error_response(HTTP_FORBIDDEN, Some(server));
    }
    if target.is_dir() {
        return error_response(HTTP_FORBIDDEN, Some(server));
    }

    match fs::remove_file(&target) {
        Ok(()) => HttpResponse::new(HTTP_NO_CONTENT),
        Err(e) => match e.kind() {
            ErrorKind::PermissionDenied => error_response(HTTP_FORBIDDEN, Some(server)),
            _ => error_response(HTTP_INTERNAL_SERVER_ERROR, Some(server)),
        },
    }
}
