use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;

use crate::config::parser::ConfigError;
use crate::config::types::AppConfig;

/// Post-parse validation. Anything rejected here is a startup failure, not a
/// per-request condition.
pub fn validate(config: &AppConfig) -> Result<(), ConfigError> {
    // (addr, port, name) tuples must be unique across the file, and each
    // endpoint gets at most one default (nameless) server.
    let mut seen_names: HashSet<(SocketAddr, String)> = HashSet::new();
    let mut defaults: HashMap<SocketAddr, usize> = HashMap::new();

    for server in &config.servers {
        for addr in &server.listen {
            if server.names.is_empty() {
                let count = defaults.entry(*addr).or_insert(0);
                *count += 1;
                if *count > 1 {
                    return Err(ConfigError::Invalid(format!(
                        "more than one default server on {}",
                        addr
                    )));
                }
            }
            for name in &server.names {
                if !seen_names.insert((*addr, name.clone())) {
                    return Err(ConfigError::Invalid(format!(
                        "duplicate server_name '{}' on {}",
                        name, addr
                    )));
                }
            }
        }

        for code in server.error_pages.keys() {
            if !(100..=599).contains(code) {
                return Err(ConfigError::Invalid(format!(
                    "error_page status {} out of range",
                    code
                )));
            }
        }

        for location in &server.locations {
            if location.root.is_some() && location.alias.is_some() {
                return Err(ConfigError::Invalid(format!(
                    "location '{}' sets both 'root' and 'alias'",
                    location.prefix
                )));
            }
            if !location.prefix.starts_with('/') {
                return Err(ConfigError::Invalid(format!(
                    "location prefix '{}' must start with '/'",
                    location.prefix
                )));
            }
            if location.cgi_extension.is_some() != location.cgi_interpreter.is_some() {
                return Err(ConfigError::Invalid(format!(
                    "location '{}' has an incomplete cgi binding",
                    location.prefix
                )));
            }
            if let Some(redirect) = &location.redirect {
                if !(300..=399).contains(&redirect.status) {
                    return Err(ConfigError::Invalid(format!(
                        "redirect status {} is not a 3xx code",
                        redirect.status
                    )));
                }
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::types::{LocationConfig, Redirect, ServerConfig};
    use std::path::PathBuf;

    fn make_server(names: &[&str], listen: &str) -> ServerConfig {
        ServerConfig {
            names: names.iter().map(|s| s.to_string()).collect(),
            listen: vec![listen.parse().unwrap()],
            locations: vec![LocationConfig::default()],
            ..Default::default()
        }
    }

    fn config_of(servers: Vec<ServerConfig>) -> AppConfig {
        AppConfig { servers }
    }

    #[test]
    fn distinct_names_on_shared_endpoint_are_fine() {
        let config = config_of(vec![
            make_server(&["example.com"], "127.0.0.1:8080"),
            make_server(&["api.example.com"], "127.0.0.1:8080"),
        ]);
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn duplicate_name_on_endpoint_is_rejected() {
        let config = config_of(vec![
            make_server(&["same.com"], "127.0.0.1:8080"),
            make_server(&["same.com"], "127.0.0.1:8080"),
        ]);
        assert!(validate(&config).is_err());
    }

    #[test]
    fn same_name_on_different_ports_is_fine() {
        let config = config_of(vec![
            make_server(&["same.com"], "127.0.0.1:8080"),
            make_server(&["same.com"], "127.0.0.1:8081"),
        ]);
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn two_default_servers_on_endpoint_are_rejected() {
        let config = config_of(vec![
            make_server(&[], "0.0.0.0:8080"),
            make_server(&[], "0.0.0.0:8080"),
        ]);
        assert!(validate(&config).is_err());
    }

    #[test]
    fn error_page_code_out_of_range_is_rejected() {
        let mut server = make_server(&["a"], "127.0.0.1:8080");
        server.error_pages.insert(99, PathBuf::from("err.html"));
        assert!(validate(&config_of(vec![server])).is_err());
    }

    #[test]
    fn root_and_alias_together_are_rejected() {
        let mut server = make_server(&["a"], "127.0.0.1:8080");
        server.locations[0].root = Some(PathBuf::from("/srv"));
        server.locations[0].alias = Some(PathBuf::from("/other"));
        assert!(validate(&config_of(vec![server])).is_err());
    }

    #[test]
    fn non_3xx_redirect_is_rejected() {
        let mut server = make_server(&["a"], "127.0.0.1:8080");
        server.locations[0].redirect = Some(Redirect {
            status: 200,
            target: "/elsewhere".to_string(),
        });
        assert!(validate(&config_of(vec![server])).is_err());
    }
}
