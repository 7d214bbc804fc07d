use std::path::PathBuf;
use std::sync::Arc;

use webserv::config::{LocationConfig, Redirect, ServerConfig};
use webserv::http::request::{Headers, Method, Request};
use webserv::router::{
    resolve_path, route, select_location, select_server, RouteAction, RoutingError,
};

fn request(method: Method, path: &str) -> Request {
    Request {
        method,
        path: path.to_string(),
        query: String::new(),
        version: "HTTP/1.1".to_string(),
        headers: Headers::new(),
        host: "x".to_string(),
        content_length: None,
        body: Vec::new(),
        keep_alive: true,
    }
}

fn named_server(names: &[&str]) -> Arc<ServerConfig> {
    Arc::new(ServerConfig {
        names: names.iter().map(|s| s.to_string()).collect(),
        locations: vec![LocationConfig::default()],
        ..Default::default()
    })
}

fn location(prefix: &str) -> LocationConfig {
    LocationConfig {
        prefix: prefix.to_string(),
        ..Default::default()
    }
}

// --- Server selection ---

#[test]
fn host_name_selects_the_server() {
    let servers = vec![named_server(&["a.com"]), named_server(&["b.com"])];
    assert_eq!(select_server(&servers, "b.com").names, vec!["b.com"]);
}

#[test]
fn unmatched_host_falls_back_to_the_default_server() {
    let servers = vec![named_server(&["a.com"]), named_server(&[]), named_server(&["c.com"])];
    assert!(select_server(&servers, "nope.com").names.is_empty());
}

#[test]
fn without_default_the_first_server_wins() {
    let servers = vec![named_server(&["a.com"]), named_server(&["b.com"])];
    assert_eq!(select_server(&servers, "nope.com").names, vec!["a.com"]);
}

// --- Location selection ---

#[test]
fn longest_prefix_wins() {
    let mut server = ServerConfig::default();
    server.locations = vec![location("/"), location("/a"), location("/a/b")];
    assert_eq!(select_location(&server, "/a/b/c").unwrap().prefix, "/a/b");
    assert_eq!(select_location(&server, "/a/x").unwrap().prefix, "/a");
    assert_eq!(select_location(&server, "/zzz").unwrap().prefix, "/");
}

#[test]
fn prefix_matches_on_segment_boundaries_only() {
    let mut server = ServerConfig::default();
    server.locations = vec![location("/api")];
    assert!(select_location(&server, "/api").is_some());
    assert!(select_location(&server, "/api/v1").is_some());
    assert!(select_location(&server, "/apix").is_none());
}

#[test]
fn declaration_order_breaks_ties() {
    let mut server = ServerConfig::default();
    let mut first = location("/a");
    first.autoindex = true;
    server.locations = vec![first, location("/a")];
    assert!(select_location(&server, "/a/x").unwrap().autoindex);
}

#[test]
fn no_matching_location_is_none() {
    let mut server = ServerConfig::default();
    server.locations = vec![location("/only")];
    assert!(select_location(&server, "/other").is_none());
}

// --- Routing ---

#[test]
fn method_gate_reports_the_allowed_set() {
    let server = ServerConfig::default();
    let mut loc = location("/api");
    loc.allowed_methods = vec![Method::GET, Method::POST];

    let result = route(&server, &loc, &request(Method::DELETE, "/api"));
    match result {
        Err(RoutingError::MethodNotAllowed { allowed }) => {
            assert_eq!(allowed, vec![Method::GET, Method::POST]);
        }
        other => panic!("expected 405, got {:?}", other),
    }
}

#[test]
fn body_limit_is_rechecked_after_server_selection() {
    let mut server = ServerConfig::default();
    server.client_max_body_size = 4;
    let loc = location("/");

    let mut req = request(Method::POST, "/upload");
    req.body = b"12345".to_vec();
    req.content_length = Some(5);

    assert!(matches!(
        route(&server, &loc, &req),
        Err(RoutingError::PayloadTooLarge)
    ));
}

#[test]
fn configured_redirect_is_returned() {
    let server = ServerConfig::default();
    let mut loc = location("/old");
    loc.redirect = Some(Redirect {
        status: 301,
        target: "/new".to_string(),
    });

    match route(&server, &loc, &request(Method::GET, "/old")) {
        Ok(RouteAction::Redirect { status, target }) => {
            assert_eq!(status, 301);
            assert_eq!(target, "/new");
        }
        other => panic!("expected redirect, got {:?}", other),
    }
}

#[test]
fn cgi_extension_with_executable_interpreter_dispatches_to_cgi() {
    let mut server = ServerConfig::default();
    server.root = PathBuf::from("/srv/www");
    let mut loc = location("/");
    loc.cgi_extension = Some("sh".to_string());
    loc.cgi_interpreter = Some(PathBuf::from("/bin/sh"));

    match route(&server, &loc, &request(Method::GET, "/hello.sh")) {
        Ok(RouteAction::Cgi { script }) => {
            assert_eq!(script, PathBuf::from("/srv/www/hello.sh"));
        }
        other => panic!("expected cgi, got {:?}", other),
    }

    // Non-matching extension stays static.
    assert!(matches!(
        route(&server, &loc, &request(Method::GET, "/hello.txt")),
        Ok(RouteAction::Static)
    ));
}

#[test]
fn missing_interpreter_falls_back_to_static() {
    let server = ServerConfig::default();
    let mut loc = location("/");
    loc.cgi_extension = Some("sh".to_string());
    loc.cgi_interpreter = Some(PathBuf::from("/definitely/not/here"));

    assert!(matches!(
        route(&server, &loc, &request(Method::GET, "/hello.sh")),
        Ok(RouteAction::Static)
    ));
}

// --- Path resolution ---

#[test]
fn root_appends_the_full_uri_path() {
    let mut server = ServerConfig::default();
    server.root = PathBuf::from("/srv/www");
    let loc = location("/static");

    assert_eq!(
        resolve_path(&server, &loc, "/static/css/site.css"),
        PathBuf::from("/srv/www/static/css/site.css")
    );
}

#[test]
fn location_root_overrides_the_server_root() {
    let server = ServerConfig::default();
    let mut loc = location("/static");
    loc.root = Some(PathBuf::from("/srv/assets"));

    assert_eq!(
        resolve_path(&server, &loc, "/static/app.js"),
        PathBuf::from("/srv/assets/static/app.js")
    );
}

#[test]
fn alias_replaces_the_matched_prefix() {
    let server = ServerConfig::default();
    let mut loc = location("/static");
    loc.alias = Some(PathBuf::from("/srv/assets"));

    assert_eq!(
        resolve_path(&server, &loc, "/static/app.js"),
        PathBuf::from("/srv/assets/app.js")
    );
}
