pub use crate::config::{AppConfig, ConfigError, LocationConfig, Redirect, ServerConfig};
pub use crate::error::{Result, ServerError};
pub use crate::http::request::{
    parse_request, Headers, Method, ParseError, ParseLimits, ParseOutcome, Request, RequestError,
    ValidationError,
};
pub use crate::http::response::HttpResponse;
pub use crate::router::RoutingError;

pub use log::{debug, error, info, trace, warn};
pub use mio::{
    event::Event,
    net::{TcpListener, TcpStream},
    Events, Interest, Poll, Registry, Token,
};

pub use std::collections::HashMap;
pub use std::fs::{self, File};
pub use std::io::{self, ErrorKind, Read, Write};
pub use std::net::SocketAddr;
pub use std::path::{Path, PathBuf};
pub use std::sync::Arc;
pub use std::time::{Duration, Instant, SystemTime};

pub const READ_BUF_SIZE: usize = 4096;

pub const MAX_URI_LEN: usize = 2048;
pub const MAX_HEADER_COUNT: usize = 100;
pub const MAX_HEADER_NAME: usize = 256;
pub const MAX_HEADER_VALUE: usize = 8 * 1024;
pub const MAX_REQUEST_SIZE: usize = 8 * 1024 * 1024;

pub const IDLE_TIMEOUT: Duration = Duration::from_secs(60);
pub const CGI_KILL_GRACE: Duration = Duration::from_secs(1);

pub const SERVER_SOFTWARE: &str = "webserv/0.1";

// 2xx
pub const HTTP_OK: u16 = 200;
pub const HTTP_CREATED: u16 = 201;
pub const HTTP_NO_CONTENT: u16 = 204;

// 3xx
pub const HTTP_MOVED_PERMANENTLY: u16 = 301;
pub const HTTP_FOUND: u16 = 302;

// 4xx Client Errors
pub const HTTP_BAD_REQUEST: u16 = 400;
pub const HTTP_FORBIDDEN: u16 = 403;
pub const HTTP_NOT_FOUND: u16 = 404;
pub const HTTP_METHOD_NOT_ALLOWED: u16 = 405;
pub const HTTP_LENGTH_REQUIRED: u16 = 411;
pub const HTTP_PAYLOAD_TOO_LARGE: u16 = 413;
pub const HTTP_URI_TOO_LONG: u16 = 414;
pub const HTTP_HEADER_TOO_LARGE: u16 = 431;

// 5xx Server Errors
pub const HTTP_INTERNAL_SERVER_ERROR: u16 = 500;
pub const HTTP_BAD_GATEWAY: u16 = 502;
pub const HTTP_GATEWAY_TIMEOUT: u16 = 504;
