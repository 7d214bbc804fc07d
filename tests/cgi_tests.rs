use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use mio::{Events, Poll};

use webserv::cgi::{build_cgi_env, parse_cgi_output, spawn, CgiError};
use webserv::config::{LocationConfig, ServerConfig};
use webserv::http::request::{Headers, Method, Request};

fn request(method: Method, path: &str, query: &str, body: &[u8]) -> Request {
    let mut headers = Headers::new();
    headers.push("host", "example.com".to_string());
    headers.push("x-custom-tag", "42".to_string());
    if !body.is_empty() {
        headers.push("content-type", "text/plain".to_string());
    }
    Request {
        method,
        path: path.to_string(),
        query: query.to_string(),
        version: "HTTP/1.1".to_string(),
        headers,
        host: "example.com".to_string(),
        content_length: if body.is_empty() { None } else { Some(body.len()) },
        body: body.to_vec(),
        keep_alive: true,
    }
}

fn peer() -> SocketAddr {
    "10.0.0.7:41000".parse().unwrap()
}

fn local() -> SocketAddr {
    "127.0.0.1:8080".parse().unwrap()
}

// --- Environment synthesis ---

#[test]
fn cgi_environment_carries_the_request() {
    let req = request(Method::POST, "/cgi/run.py", "a=1&b=2", b"payload");
    let server = ServerConfig {
        names: vec!["example.com".to_string()],
        ..Default::default()
    };
    let env = build_cgi_env(&req, &server, &PathBuf::from("/srv/cgi/run.py"), peer(), local());

    assert_eq!(env["GATEWAY_INTERFACE"], "CGI/1.1");
    assert_eq!(env["SERVER_PROTOCOL"], "HTTP/1.1");
    assert_eq!(env["SERVER_NAME"], "example.com");
    assert_eq!(env["SERVER_PORT"], "8080");
    assert_eq!(env["REQUEST_METHOD"], "POST");
    assert_eq!(env["SCRIPT_NAME"], "/cgi/run.py");
    assert_eq!(env["SCRIPT_FILENAME"], "/srv/cgi/run.py");
    assert_eq!(env["QUERY_STRING"], "a=1&b=2");
    assert_eq!(env["CONTENT_LENGTH"], "7");
    assert_eq!(env["CONTENT_TYPE"], "text/plain");
    assert_eq!(env["REMOTE_ADDR"], "10.0.0.7");
    assert_eq!(env["HTTP_X_CUSTOM_TAG"], "42");
    assert_eq!(env["HTTP_HOST"], "example.com");
}

// --- Output parsing ---

#[test]
fn status_header_sets_the_http_status() {
    let raw = b"Status: 404 Not Found\r\nContent-Type: text/plain\r\n\r\ngone";
    let res = parse_cgi_output(raw).unwrap();
    assert_eq!(res.status_code, 404);
    assert_eq!(res.headers["content-type"], "text/plain");
    assert_eq!(res.body, b"gone");
    assert_eq!(res.headers["content-length"], "4");
}

#[test]
fn headers_default_to_200_text_html() {
    let raw = b"X-Script: yes\r\n\r\n<p>hi</p>";
    let res = parse_cgi_output(raw).unwrap();
    assert_eq!(res.status_code, 200);
    assert_eq!(res.headers["content-type"], "text/html");
    assert_eq!(res.headers["x-script"], "yes");
    assert_eq!(res.body, b"<p>hi</p>");
}

#[test]
fn output_without_header_block_is_all_body() {
    let raw = b"no headers here, just bytes";
    let res = parse_cgi_output(raw).unwrap();
    assert_eq!(res.status_code, 200);
    assert_eq!(res.headers["content-type"], "text/html");
    assert_eq!(res.body, raw);
}

#[test]
fn bare_lf_terminator_is_accepted() {
    let raw = b"Content-Type: text/plain\n\nplain";
    let res = parse_cgi_output(raw).unwrap();
    assert_eq!(res.headers["content-type"], "text/plain");
    assert_eq!(res.body, b"plain");
}

#[test]
fn malformed_header_block_is_a_gateway_error() {
    let raw = b"this line has no colon\r\n\r\nbody";
    match parse_cgi_output(raw) {
        Err(e @ CgiError::BadOutput) => assert_eq!(e.status(), 502),
        other => panic!("expected bad output, got {:?}", other),
    }
}

#[test]
fn content_length_is_recomputed_from_the_body() {
    let raw = b"Content-Length: 9999\r\n\r\nfour";
    let res = parse_cgi_output(raw).unwrap();
    assert_eq!(res.headers["content-length"], "4");
}

// --- Live children ---

fn write_script(dir: &std::path::Path, name: &str, contents: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, contents).unwrap();
    path
}

fn sh_location(timeout: Duration) -> LocationConfig {
    LocationConfig {
        cgi_extension: Some("sh".to_string()),
        cgi_interpreter: Some(PathBuf::from("/bin/sh")),
        cgi_timeout: timeout,
        ..Default::default()
    }
}

/// Drives a spawned child with a private poll until it finishes or the
/// deadline passes.
fn drive_to_completion(
    mut process: webserv::cgi::CgiProcess,
    poll: &mut Poll,
) -> Result<webserv::http::response::HttpResponse, CgiError> {
    let mut events = Events::with_capacity(16);
    loop {
        if let Some(result) = process.try_finish() {
            return result;
        }
        assert!(
            !process.expired(Instant::now()),
            "cgi child exceeded its deadline"
        );
        poll.poll(&mut events, Some(Duration::from_millis(50))).unwrap();
        for event in events.iter() {
            if event.is_writable() {
                process.pump_stdin(poll.registry());
            }
            if event.is_readable() {
                process.pump_stdout(poll.registry());
            }
        }
    }
}

#[test]
fn cgi_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(
        dir.path(),
        "hello.sh",
        "printf 'Status: 200\\r\\nContent-Type: text/plain\\r\\n\\r\\nhi'\n",
    );

    let server = ServerConfig::default();
    let location = sh_location(Duration::from_secs(10));
    let req = request(Method::GET, "/hello.sh", "n=1", b"");

    let mut poll = Poll::new().unwrap();
    let mut next_token = 100;
    let process = spawn(
        &req,
        &server,
        &location,
        &script,
        peer(),
        local(),
        poll.registry(),
        &mut next_token,
    )
    .unwrap();

    let res = drive_to_completion(process, &mut poll).unwrap();
    assert_eq!(res.status_code, 200);
    assert_eq!(res.body, b"hi");
    assert_eq!(res.headers["content-type"], "text/plain");
    assert_eq!(res.headers["content-length"], "2");
}

#[test]
fn cgi_receives_the_request_body_on_stdin() {
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(
        dir.path(),
        "echo.sh",
        "printf 'Content-Type: text/plain\\r\\n\\r\\n'; cat\n",
    );

    let server = ServerConfig::default();
    let location = sh_location(Duration::from_secs(10));
    let req = request(Method::POST, "/echo.sh", "", b"ping across the pipe");

    let mut poll = Poll::new().unwrap();
    let mut next_token = 100;
    let process = spawn(
        &req,
        &server,
        &location,
        &script,
        peer(),
        local(),
        poll.registry(),
        &mut next_token,
    )
    .unwrap();

    let res = drive_to_completion(process, &mut poll).unwrap();
    assert_eq!(res.status_code, 200);
    assert_eq!(res.body, b"ping across the pipe");
}

#[test]
fn failing_child_reports_a_server_error() {
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(dir.path(), "boom.sh", "exit 3\n");

    let server = ServerConfig::default();
    let location = sh_location(Duration::from_secs(10));
    let req = request(Method::GET, "/boom.sh", "", b"");

    let mut poll = Poll::new().unwrap();
    let mut next_token = 100;
    let process = spawn(
        &req,
        &server,
        &location,
        &script,
        peer(),
        local(),
        poll.registry(),
        &mut next_token,
    )
    .unwrap();

    match drive_to_completion(process, &mut poll) {
        Err(e) => assert_eq!(e.status(), 500),
        Ok(res) => panic!("expected failure, got status {}", res.status_code),
    }
}

#[test]
fn runaway_child_is_killed_and_reaped() {
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(dir.path(), "sleep.sh", "sleep 30\n");

    let server = ServerConfig::default();
    let location = sh_location(Duration::from_millis(200));
    let req = request(Method::GET, "/sleep.sh", "", b"");

    let mut poll = Poll::new().unwrap();
    let mut next_token = 100;
    let mut process = spawn(
        &req,
        &server,
        &location,
        &script,
        peer(),
        local(),
        poll.registry(),
        &mut next_token,
    )
    .unwrap();

    let mut events = Events::with_capacity(16);
    while !process.expired(Instant::now()) {
        poll.poll(&mut events, Some(Duration::from_millis(50))).unwrap();
    }

    let mut child = process.shutdown(poll.registry());
    let reap_deadline = Instant::now() + Duration::from_secs(2);
    loop {
        match child.try_wait().unwrap() {
            Some(_) => break,
            None if Instant::now() > reap_deadline => {
                let _ = child.kill();
                panic!("child survived SIGTERM past the grace window");
            }
            None => std::thread::sleep(Duration::from_millis(20)),
        }
    }
}
