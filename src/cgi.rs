use std::os::fd::{FromRawFd, IntoRawFd};
use std::os::unix::net::UnixStream as StdUnixStream;
use std::process::{Child, Command, Stdio};

use memchr::memmem;
use mio::net::UnixStream;
use thiserror::Error;

use crate::http::response::HttpResponse;
use crate::prelude::*;
use crate::signal;

#[derive(Debug, Error)]
pub enum CgiError {
    #[error("cgi pipe setup failed: {0}")]
    Pipe(io::Error),
    #[error("cgi interpreter failed to start: {0}")]
    Spawn(io::Error),
    #[error("cgi interpreter exited with a failure status")]
    Exit,
    #[error("cgi produced a malformed header block")]
    BadOutput,
}

impl CgiError {
    pub fn status(&self) -> u16 {
        match self {
            CgiError::Pipe(_) | CgiError::Spawn(_) | CgiError::Exit => HTTP_INTERNAL_SERVER_ERROR,
            CgiError::BadOutput => HTTP_BAD_GATEWAY,
        }
    }
}

/// A running CGI child wired into the event loop: both pipe ends are
/// registered with the poll, the deadline bounds its wall clock.
#[derive(Debug)]
pub struct CgiProcess {
    pub child: Child,
    pub stdout: UnixStream,
    pub stdout_token: Token,
    pub stdin: Option<UnixStream>,
    pub stdin_token: Option<Token>,
    stdin_buf: Vec<u8>,
    output: Vec<u8>,
    stdout_done: bool,
    pub deadline: Instant,
}

/// Forks the interpreter with the script as its argument, the CGI/1.1
/// environment, and a socketpair per direction. The request body is queued
/// for the child's stdin; nothing here blocks.
pub fn spawn(
    request: &Request,
    server: &ServerConfig,
    location: &LocationConfig,
    script: &Path,
    peer: SocketAddr,
    local: SocketAddr,
    registry: &Registry,
    next_token: &mut usize,
) -> std::result::Result<CgiProcess, CgiError> {
    let interpreter = location
        .cgi_interpreter
        .as_ref()
        .ok_or_else(|| CgiError::Spawn(io::Error::new(ErrorKind::NotFound, "no interpreter")))?;

    let (parent_out, child_out) = StdUnixStream::pair().map_err(CgiError::Pipe)?;
    let (parent_in, child_in) = StdUnixStream::pair().map_err(CgiError::Pipe)?;
    parent_out.set_nonblocking(true).map_err(CgiError::Pipe)?;
    parent_in.set_nonblocking(true).map_err(CgiError::Pipe)?;

    let child_stdout = unsafe { File::from_raw_fd(child_out.into_raw_fd()) };
    let child_stdin = unsafe { File::from_raw_fd(child_in.into_raw_fd()) };

    let child = Command::new(interpreter)
        .arg(script)
        .envs(build_cgi_env(request, server, script, peer, local))
        .stdin(Stdio::from(child_stdin))
        .stdout(Stdio::from(child_stdout))
        .stderr(Stdio::null())
        .spawn()
        .map_err(CgiError::Spawn)?;

    let mut stdout = UnixStream::from_std(parent_out);
    let stdout_token = Token(*next_token);
    *next_token += 1;
    registry
        .register(&mut stdout, stdout_token, Interest::READABLE)
        .map_err(CgiError::Pipe)?;

    // With no body to transfer the stdin pipe closes right away so the
    // child sees EOF.
    let (stdin, stdin_token) = if request.body.is_empty() {
        (None, None)
    } else {
        let mut stdin = UnixStream::from_std(parent_in);
        let token = Token(*next_token);
        *next_token += 1;
        registry
            .register(&mut stdin, token, Interest::WRITABLE)
            .map_err(CgiError::Pipe)?;
        (Some(stdin), Some(token))
    };

    debug!(
        "cgi spawn pid={} script={} timeout={:?}",
        child.id(),
        script.display(),
        location.cgi_timeout
    );

    Ok(CgiProcess {
        child,
        stdout,
        stdout_token,
        stdin,
        stdin_token,
        stdin_buf: request.body.clone(),
        output: Vec::new(),
        stdout_done: false,
        deadline: Instant::now() + location.cgi_timeout,
    })
}

impl CgiProcess {
    /// Transfers the request body into the child's stdin; once drained the
    /// pipe is closed so the child sees EOF.
    pub fn pump_stdin(&mut self, registry: &Registry) {
        let Some(stdin) = self.stdin.as_mut() else {
            return;
        };
        loop {
            if self.stdin_buf.is_empty() {
                break;
            }
            match stdin.write(&self.stdin_buf) {
                Ok(0) => break,
                Ok(n) => {
                    self.stdin_buf.drain(..n);
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => return,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                // Child closed its stdin early; stop feeding it.
                Err(_) => break,
            }
        }
        if let Some(mut stdin) = self.stdin.take() {
            let _ = registry.deregister(&mut stdin);
        }
        self.stdin_token = None;
    }

    /// Drains the child's stdout into the output buffer; EOF marks the
    /// stream done and drops our interest in it.
    pub fn pump_stdout(&mut self, registry: &Registry) {
        let mut buf = [0u8; READ_BUF_SIZE];
        loop {
            match self.stdout.read(&mut buf) {
                Ok(0) => {
                    self.stdout_done = true;
                    let _ = registry.deregister(&mut self.stdout);
                    return;
                }
                Ok(n) => self.output.extend_from_slice(&buf[..n]),
                Err(e) if e.kind() == ErrorKind::WouldBlock => return,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(_) => {
                    self.stdout_done = true;
                    let _ = registry.deregister(&mut self.stdout);
                    return;
                }
            }
        }
    }

    pub fn expired(&self, now: Instant) -> bool {
        now >= self.deadline
    }

    /// Non-blocking completion check: once stdout hit EOF and the child is
    /// reaped, the collected output becomes the response. A child that is
    /// still exiting stays pending and is retried on the next sweep.
    pub fn try_finish(&mut self) -> Option<std::result::Result<HttpResponse, CgiError>> {
        if !self.stdout_done {
            return None;
        }
        match self.child.try_wait() {
            Ok(Some(status)) => {
                if status.success() {
                    Some(parse_cgi_output(&self.output))
                } else {
                    Some(Err(CgiError::Exit))
                }
            }
            Ok(None) => None,
            Err(_) => Some(Err(CgiError::Exit)),
        }
    }

    /// Detaches the pipes from the poll and signals the child; the caller
    /// parks the child for reaping (and SIGKILL escalation).
    pub fn shutdown(mut self, registry: &Registry) -> Child {
        if let Some(mut stdin) = self.stdin.take() {
            let _ = registry.deregister(&mut stdin);
        }
        if !self.stdout_done {
            let _ = registry.deregister(&mut self.stdout);
        }
        signal::terminate_child(self.child.id());
        self.child
    }
}

/// CGI/1.1 environment synthesis, including the `HTTP_*` passthrough of
/// every request header.
pub fn build_cgi_env(
    request: &Request,
    server: &ServerConfig,
    script: &Path,
    peer: SocketAddr,
    local: SocketAddr,
) -> HashMap<String, String> {
    let mut env = HashMap::new();

    env.insert("GATEWAY_INTERFACE".to_string(), "CGI/1.1".to_string());
    env.insert("SERVER_PROTOCOL".to_string(), "HTTP/1.1".to_string());
    env.insert("SERVER_SOFTWARE".to_string(), SERVER_SOFTWARE.to_string());
    let server_name = server
        .names
        .first()
        .map(|s| s.as_str())
        .unwrap_or_else(|| request.hostname());
    env.insert("SERVER_NAME".to_string(), server_name.to_string());
    env.insert("SERVER_PORT".to_string(), local.port().to_string());

    env.insert("REQUEST_METHOD".to_string(), request.method.to_string());
    env.insert("SCRIPT_NAME".to_string(), request.path.clone());
    env.insert("SCRIPT_FILENAME".to_string(), script.display().to_string());
    env.insert("PATH_INFO".to_string(), request.path.clone());
    env.insert("QUERY_STRING".to_string(), request.query.clone());

    env.insert("REMOTE_ADDR".to_string(), peer.ip().to_string());
    env.insert("REMOTE_PORT".to_string(), peer.port().to_string());

    if let Some(length) = request.content_length {
        env.insert("CONTENT_LENGTH".to_string(), length.to_string());
    }
    if let Some(content_type) = request.headers.get("content-type") {
        env.insert("CONTENT_TYPE".to_string(), content_type.to_string());
    }

    for (name, value) in request.headers.iter() {
        let key = format!("HTTP_{}", name.to_ascii_uppercase().replace('-', "_"));
        env.insert(key, value.to_string());
    }

    env
}

/// Parses the child's output: an optional `name: value` header block
/// terminated by a blank line, then the body. `Status:` overrides the HTTP
/// status; a missing terminator means the whole output is an HTML body.
pub fn parse_cgi_output(raw: &[u8]) -> std::result::Result<HttpResponse, CgiError> {
    let (header_bytes, body) = match memmem::find(raw, b"\r\n\r\n") {
        Some(pos) => (&raw[..pos], raw[pos + 4..].to_vec()),
        None => match memmem::find(raw, b"\n\n") {
            Some(pos) => (&raw[..pos], raw[pos + 2..].to_vec()),
            None => {
                let mut res = HttpResponse::new(HTTP_OK);
                res.set_body(raw.to_vec(), "text/html");
                return Ok(res);
            }
        },
    };

    let header_block = std::str::from_utf8(header_bytes).map_err(|_| CgiError::BadOutput)?;

    let mut status = HTTP_OK;
    let mut headers = Vec::new();
    for line in header_block.lines() {
        if line.is_empty() {
            continue;
        }
        let (name, value) = line.split_once(':').ok_or(CgiError::BadOutput)?;
        let name = name.trim();
        let value = value.trim();
        if name.is_empty() {
            return Err(CgiError::BadOutput);
        }

        if name.eq_ignore_ascii_case("status") {
            // "Status: 404 Not Found" — only the digits matter.
            status = value
                .split_whitespace()
                .next()
                .and_then(|s| s.parse().ok())
                .ok_or(CgiError::BadOutput)?;
        } else {
            headers.push((name.to_string(), value.to_string()));
        }
    }

    let mut res = HttpResponse::new(status);
    for (name, value) in headers {
        res.set_header(&name, &value);
    }
    res.body = body;
    res.headers
        .insert("content-length".to_string(), res.body.len().to_string());
    res.headers
        .entry("content-type".to_string())
        .or_insert_with(|| "text/html".to_string());

    Ok(res)
}
