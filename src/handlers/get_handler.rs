use crate::http::response::{error_response, generate_autoindex, get_mime_type, HttpResponse};
use crate::prelude::*;
use crate::router::resolve_path;

/// Static GET: resolve against root/alias, serve the file or walk the
/// directory ladder (index files, then autoindex, then 403).
pub fn handle_get(
    request: &Request,
    server: &ServerConfig,
    location: &LocationConfig,
) -> HttpResponse {
    let path = resolve_path(server, location, &request.path);

    if path.is_dir() {
        for index in server.index_files_for(location) {
            let candidate = path.join(index);
            if candidate.is_file() {
                return serve_file(&candidate, server);
            }
        }
        if location.autoindex {
            return generate_autoindex(&path, &request.path)
                .unwrap_or_else(|_| error_response(HTTP_INTERNAL_SERVER_ERROR, Some(server)));
        }
        return error_response(HTTP_FORBIDDEN, Some(server));
    }

    serve_file(&path, server)
}

/// Files are read fresh for every request.
fn serve_file(path: &Path, server: &ServerConfig) -> HttpResponse {
    match fs::read(path) {
        Ok(content) => {
            let mime = get_mime_type(path.extension().and_then(|s| s.to_str()));
            let mut res = HttpResponse::new(HTTP_OK);
            res.set_body(content, mime);
            res
        }
        Err(e) => match e.kind() {
            ErrorKind::NotFound => error_response(HTTP_NOT_FOUND, Some(server)),
            ErrorKind::PermissionDenied => error_response(HTTP_FORBIDDEN, Some(server)),
            _ => error_response(HTTP_INTERNAL_SERVER_ERROR, Some(server)),
        },
    }
}
