use std::net::AddrParseError;

use thiserror::Error;

use crate::config::ConfigError;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("{0}")]
    Config(#[from] ConfigError),
    #[error("{0}")]
    Io(#[from] std::io::Error),
    #[error("invalid listen address: {0}")]
    Addr(#[from] AddrParseError),
    #[error("{0}")]
    Startup(String),
}

pub type Result<T> = std::result::Result<T, ServerError>;
