use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use log::info;

use crate::http::request::Method;

// --- Defaults ---
pub const DEFAULT_LISTEN: &str = "0.0.0.0:8080";
pub const DEFAULT_ROOT: &str = "./www";
pub const DEFAULT_INDEX: &str = "index.html";
pub const DEFAULT_MAX_BODY_SIZE: usize = 1_048_576; // 1M
pub const DEFAULT_CGI_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_REDIRECT_STATUS: u16 = 302;

/// The whole parsed configuration file: an ordered list of `server` blocks.
/// Immutable once `AppConfig::parse` returns.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub servers: Vec<ServerConfig>,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// `server_name` values. An empty list marks the default server for
    /// every endpoint this block listens on.
    pub names: Vec<String>,
    pub listen: Vec<SocketAddr>,
    pub root: PathBuf,
    pub index_files: Vec<String>,
    pub client_max_body_size: usize,
    pub error_pages: HashMap<u16, PathBuf>,
    /// Ordered: longest-prefix matching breaks ties by declaration order.
    pub locations: Vec<LocationConfig>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            names: Vec::new(),
            listen: Vec::new(),
            root: PathBuf::from(DEFAULT_ROOT),
            index_files: vec![DEFAULT_INDEX.to_string()],
            client_max_body_size: DEFAULT_MAX_BODY_SIZE,
            error_pages: HashMap::new(),
            locations: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LocationConfig {
    pub prefix: String,
    /// URI path appended to `root`; mutually exclusive with `alias`.
    pub root: Option<PathBuf>,
    /// Location prefix replaced by `alias`; mutually exclusive with `root`.
    pub alias: Option<PathBuf>,
    /// Empty means "inherit the server's index files".
    pub index_files: Vec<String>,
    pub allowed_methods: Vec<Method>,
    pub autoindex: bool,
    pub cgi_extension: Option<String>,
    pub cgi_interpreter: Option<PathBuf>,
    pub redirect: Option<Redirect>,
    pub upload_store: Option<PathBuf>,
    pub cgi_timeout: Duration,
}

impl Default for LocationConfig {
    fn default() -> Self {
        Self {
            prefix: "/".to_string(),
            root: None,
            alias: None,
            index_files: Vec::new(),
            allowed_methods: vec![Method::GET, Method::POST, Method::DELETE],
            autoindex: false,
            cgi_extension: None,
            cgi_interpreter: None,
            redirect: None,
            upload_store: None,
            cgi_timeout: DEFAULT_CGI_TIMEOUT,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Redirect {
    pub status: u16,
    pub target: String,
}

impl ServerConfig {
    pub fn is_default_server(&self) -> bool {
        self.names.is_empty()
    }

    /// Index files effective for a location: its own list, else the server's.
    pub fn index_files_for<'a>(&'a self, location: &'a LocationConfig) -> &'a [String] {
        if location.index_files.is_empty() {
            &self.index_files
        } else {
            &location.index_files
        }
    }
}

impl AppConfig {
    /// Startup summary, logged once the file parsed and validated.
    pub fn log_summary(&self) {
        for server in &self.servers {
            let names = if server.names.is_empty() {
                "(default)".to_string()
            } else {
                server.names.join(" ")
            };
            for addr in &server.listen {
                info!(
                    "server {} on {} root={} locations={}",
                    names,
                    addr,
                    server.root.display(),
                    server.locations.len()
                );
            }
        }
    }
}
