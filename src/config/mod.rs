pub mod lexer;
pub mod parser;
pub mod types;
pub mod validate;

pub use parser::ConfigError;
pub use types::{AppConfig, LocationConfig, Redirect, ServerConfig};
pub use validate::validate;
