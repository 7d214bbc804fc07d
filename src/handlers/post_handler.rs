use crate::http::response::{error_response, HttpResponse};
use crate::prelude::*;
use crate::router::resolve_path;

/// POST stores the request body: multipart file parts under their client
/// filenames, anything else under a generated name. Responds 201 with the
/// stored names.
pub fn handle_post(
    request: &Request,
    server: &ServerConfig,
    location: &LocationConfig,
) -> HttpResponse {
    let target_dir = upload_dir(request, server, location);
    if fs::create_dir_all(&target_dir).is_err() {
        return error_response(HTTP_INTERNAL_SERVER_ERROR, Some(server));
    }

    let stored = match request.multipart() {
        Some(Ok(parts)) => {
            let files: Vec<_> = parts.iter().filter(|p| p.is_file()).collect();
            if files.is_empty() {
                return error_response(HTTP_BAD_REQUEST, Some(server));
            }
            let mut names = Vec::new();
            for part in files {
                let Some(name) = sanitize_filename(part.filename.as_deref().unwrap_or("")) else {
                    return error_response(HTTP_BAD_REQUEST, Some(server));
                };
                if fs::write(target_dir.join(&name), &part.data).is_err() {
                    return error_response(HTTP_INTERNAL_SERVER_ERROR, Some(server));
                }
                names.push(name);
            }
            names
        }
        Some(Err(_)) => return error_response(HTTP_BAD_REQUEST, Some(server)),
        None => {
            let name = generated_filename();
            if fs::write(target_dir.join(&name), &request.body).is_err() {
                return error_response(HTTP_INTERNAL_SERVER_ERROR, Some(server));
            }
            vec![name]
        }
    };

    info!("stored {} file(s) under {}", stored.len(), target_dir.display());
    let mut res = HttpResponse::new(HTTP_CREATED);
    res.set_body(
        format!("Created: {}\n", stored.join(", ")).into_bytes(),
        "text/plain",
    );
    res
}

/// Upload target: the location's `upload_store` (relative paths hang off the
/// effective root), else the directory the URI resolves to.
fn upload_dir(request: &Request, server: &ServerConfig, location: &LocationConfig) -> PathBuf {
    match &location.upload_store {
        Some(dir) if dir.is_absolute() => dir.clone(),
        Some(dir) => {
            let root = location.root.as_ref().unwrap_or(&server.root);
            root.join(dir)
        }
        None => resolve_path(server, location, &request.path),
    }
}

/// Keeps only the final path component of a client-supplied filename.
fn sanitize_filename(raw: &str) -> Option<String> {
    let name = raw.rsplit(['/', '\\']).next().unwrap_or("");
    if name.is_empty() || name == "." || name == ".." {
        return None;
    }
    Some(name.to_string())
}

fn generated_filename() -> String {
    let millis = SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0);
    format!("upload_{}", millis)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_strips_directories() {
        assert_eq!(sanitize_filename("a.txt"), Some("a.txt".to_string()));
        assert_eq!(sanitize_filename("../../etc/passwd"), Some("passwd".to_string()));
        assert_eq!(sanitize_filename("c:\\x\\y.bin"), Some("y.bin".to_string()));
        assert_eq!(sanitize_filename(""), None);
        assert_eq!(sanitize_filename(".."), None);
    }
}
