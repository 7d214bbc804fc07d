use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::config::lexer::{ConfigToken, Lexer, Loc, TokenKind};
use crate::config::types::*;
use crate::config::validate;
use crate::http::request::Method;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("configuration syntax error at line {line}, col {col}: {message}")]
    Syntax {
        message: String,
        line: usize,
        col: usize,
    },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

fn err_at(message: impl Into<String>, loc: Loc) -> ConfigError {
    ConfigError::Syntax {
        message: message.into(),
        line: loc.line,
        col: loc.col,
    }
}

pub type ParseResult<T> = Result<T, ConfigError>;

impl AppConfig {
    /// Parses and validates a configuration file. Any failure here is fatal
    /// at startup.
    pub fn parse(input: &str) -> ParseResult<AppConfig> {
        let tokens = Lexer::new(input).tokenize()?;
        let config = ConfigParser::new(tokens).parse_config()?;
        validate::validate(&config)?;
        Ok(config)
    }
}

pub struct ConfigParser {
    tokens: Vec<ConfigToken>,
    cursor: usize,
}

impl ConfigParser {
    pub fn new(tokens: Vec<ConfigToken>) -> Self {
        Self { tokens, cursor: 0 }
    }

    // ====== Token access ======

    fn peek_kind(&self) -> Option<&TokenKind> {
        self.tokens.get(self.cursor).map(|t| &t.kind)
    }

    fn last_loc(&self) -> Loc {
        self.tokens
            .last()
            .map(|t| t.loc)
            .unwrap_or(Loc { line: 1, col: 1 })
    }

    fn next_token(&mut self) -> Option<&ConfigToken> {
        let t = self.tokens.get(self.cursor);
        if t.is_some() {
            self.cursor += 1;
        }
        t
    }

    fn expect_word(&mut self, what: &str) -> ParseResult<(String, Loc)> {
        let last = self.last_loc();
        match self.next_token() {
            Some(ConfigToken {
                kind: TokenKind::Word(w),
                loc,
            }) => Ok((w.clone(), *loc)),
            Some(t) => Err(err_at(format!("expected {}, found '{:?}'", what, t.kind), t.loc)),
            None => Err(err_at(format!("expected {}, found end of file", what), last)),
        }
    }

    fn expect(&mut self, expected: TokenKind, what: &str) -> ParseResult<Loc> {
        let last = self.last_loc();
        match self.next_token() {
            Some(t) if t.kind == expected => Ok(t.loc),
            Some(t) => Err(err_at(format!("expected '{}', found '{:?}'", what, t.kind), t.loc)),
            None => Err(err_at(format!("expected '{}', found end of file", what), last)),
        }
    }

    /// Collects the argument words of a directive up to its semicolon.
    fn directive_args(&mut self, directive: &str, loc: Loc) -> ParseResult<Vec<String>> {
        let mut args = Vec::new();
        loop {
            match self.peek_kind() {
                Some(TokenKind::Word(w)) => {
                    args.push(w.clone());
                    self.cursor += 1;
                }
                Some(TokenKind::Semicolon) => {
                    self.cursor += 1;
                    return Ok(args);
                }
                Some(_) => {
                    let t = &self.tokens[self.cursor];
                    return Err(err_at(
                        format!("directive '{}' is missing its ';'", directive),
                        t.loc,
                    ));
                }
                None => {
                    return Err(err_at(
                        format!("directive '{}' is missing its ';'", directive),
                        loc,
                    ));
                }
            }
        }
    }

    // ====== Grammar ======

    pub fn parse_config(&mut self) -> ParseResult<AppConfig> {
        let mut servers = Vec::new();

        while let Some(kind) = self.peek_kind() {
            match kind {
                TokenKind::Word(w) if w == "server" => {
                    self.cursor += 1;
                    servers.push(self.parse_server()?);
                }
                _ => {
                    let t = &self.tokens[self.cursor];
                    return Err(err_at(
                        format!("expected 'server' block, found '{:?}'", t.kind),
                        t.loc,
                    ));
                }
            }
        }

        if servers.is_empty() {
            return Err(ConfigError::Invalid(
                "configuration contains no server block".to_string(),
            ));
        }

        Ok(AppConfig { servers })
    }

    fn parse_server(&mut self) -> ParseResult<ServerConfig> {
        self.expect(TokenKind::LBrace, "{")?;
        let mut server = ServerConfig::default();
        let mut saw_directive = false;

        loop {
            match self.peek_kind() {
                Some(TokenKind::RBrace) => {
                    self.cursor += 1;
                    break;
                }
                Some(TokenKind::Word(_)) => {
                    let (word, loc) = self.expect_word("directive")?;
                    saw_directive = true;
                    if word == "location" {
                        server.locations.push(self.parse_location()?);
                    } else {
                        self.parse_server_directive(&mut server, &word, loc)?;
                    }
                }
                Some(_) => {
                    let t = &self.tokens[self.cursor];
                    return Err(err_at(format!("unexpected '{:?}' in server block", t.kind), t.loc));
                }
                None => {
                    return Err(err_at("unterminated server block", self.last_loc()));
                }
            }
        }

        if !saw_directive {
            return Err(ConfigError::Invalid("empty server block".to_string()));
        }
        if server.listen.is_empty() {
            server.listen.push(parse_listen_addr(DEFAULT_LISTEN, self.last_loc())?);
        }
        // A server without explicit locations still serves its root.
        if server.locations.is_empty() {
            server.locations.push(LocationConfig::default());
        }

        Ok(server)
    }

    fn parse_server_directive(
        &mut self,
        server: &mut ServerConfig,
        directive: &str,
        loc: Loc,
    ) -> ParseResult<()> {
        let args = self.directive_args(directive, loc)?;
        let argc = args.len();
        let arity = |want: usize| -> ParseResult<()> {
            if argc == want {
                Ok(())
            } else {
                Err(err_at(
                    format!("'{}' takes {} argument(s), got {}", directive, want, argc),
                    loc,
                ))
            }
        };

        match directive {
            "listen" => {
                arity(1)?;
                server.listen.push(parse_listen_addr(&args[0], loc)?);
            }
            "server_name" => {
                if args.is_empty() {
                    return Err(err_at("'server_name' needs at least one name", loc));
                }
                server.names.extend(args);
            }
            "root" => {
                arity(1)?;
                server.root = PathBuf::from(&args[0]);
            }
            "index" => {
                if args.is_empty() {
                    return Err(err_at("'index' needs at least one file", loc));
                }
                server.index_files = args;
            }
            "client_max_body_size" => {
                arity(1)?;
                server.client_max_body_size = parse_size(&args[0], loc)?;
            }
            "error_page" => {
                arity(2)?;
                let code: u16 = args[0]
                    .parse()
                    .map_err(|_| err_at(format!("invalid status code '{}'", args[0]), loc))?;
                server.error_pages.insert(code, PathBuf::from(&args[1]));
            }
            other => {
                return Err(err_at(format!("unknown server directive '{}'", other), loc));
            }
        }
        Ok(())
    }

    fn parse_location(&mut self) -> ParseResult<LocationConfig> {
        let (prefix, prefix_loc) = self.expect_word("location prefix")?;
        if !prefix.starts_with('/') {
            return Err(err_at(
                format!("location prefix '{}' must start with '/'", prefix),
                prefix_loc,
            ));
        }
        self.expect(TokenKind::LBrace, "{")?;

        let mut location = LocationConfig {
            prefix,
            ..Default::default()
        };

        loop {
            match self.peek_kind() {
                Some(TokenKind::RBrace) => {
                    self.cursor += 1;
                    break;
                }
                Some(TokenKind::Word(_)) => {
                    let (word, loc) = self.expect_word("directive")?;
                    self.parse_location_directive(&mut location, &word, loc)?;
                }
                Some(_) => {
                    let t = &self.tokens[self.cursor];
                    return Err(err_at(
                        format!("unexpected '{:?}' in location block", t.kind),
                        t.loc,
                    ));
                }
                None => {
                    return Err(err_at("unterminated location block", self.last_loc()));
                }
            }
        }

        if location.root.is_some() && location.alias.is_some() {
            return Err(ConfigError::Invalid(format!(
                "location '{}' sets both 'root' and 'alias'",
                location.prefix
            )));
        }

        Ok(location)
    }

    fn parse_location_directive(
        &mut self,
        location: &mut LocationConfig,
        directive: &str,
        loc: Loc,
    ) -> ParseResult<()> {
        let args = self.directive_args(directive, loc)?;
        let argc = args.len();
        let arity = |want: usize| -> ParseResult<()> {
            if argc == want {
                Ok(())
            } else {
                Err(err_at(
                    format!("'{}' takes {} argument(s), got {}", directive, want, argc),
                    loc,
                ))
            }
        };

        match directive {
            "root" => {
                arity(1)?;
                location.root = Some(PathBuf::from(&args[0]));
            }
            "alias" => {
                arity(1)?;
                location.alias = Some(PathBuf::from(&args[0]));
            }
            "index" => {
                if args.is_empty() {
                    return Err(err_at("'index' needs at least one file", loc));
                }
                location.index_files = args;
            }
            "allow_methods" => {
                if args.is_empty() {
                    return Err(err_at("'allow_methods' needs at least one method", loc));
                }
                let mut methods = Vec::new();
                for arg in &args {
                    let method = arg.parse::<Method>().map_err(|_| {
                        err_at(
                            format!("'{}' is not one of GET, POST, DELETE", arg),
                            loc,
                        )
                    })?;
                    if !methods.contains(&method) {
                        methods.push(method);
                    }
                }
                location.allowed_methods = methods;
            }
            "autoindex" => {
                arity(1)?;
                location.autoindex = match args[0].as_str() {
                    "on" => true,
                    "off" => false,
                    other => {
                        return Err(err_at(format!("autoindex must be on|off, got '{}'", other), loc))
                    }
                };
            }
            "cgi" => {
                arity(2)?;
                location.cgi_extension = Some(args[0].trim_start_matches('.').to_string());
                location.cgi_interpreter = Some(PathBuf::from(&args[1]));
            }
            "return" | "redirect" => {
                let (status, target) = match args.len() {
                    1 => (DEFAULT_REDIRECT_STATUS, args[0].clone()),
                    2 => {
                        let code: u16 = args[0].parse().map_err(|_| {
                            err_at(format!("invalid redirect status '{}'", args[0]), loc)
                        })?;
                        (code, args[1].clone())
                    }
                    n => {
                        return Err(err_at(
                            format!("'{}' takes 1 or 2 arguments, got {}", directive, n),
                            loc,
                        ))
                    }
                };
                location.redirect = Some(Redirect { status, target });
            }
            "upload_store" => {
                arity(1)?;
                location.upload_store = Some(PathBuf::from(&args[0]));
            }
            "cgi_timeout" => {
                arity(1)?;
                let secs: u64 = args[0]
                    .parse()
                    .map_err(|_| err_at(format!("invalid timeout '{}'", args[0]), loc))?;
                location.cgi_timeout = Duration::from_secs(secs);
            }
            other => {
                return Err(err_at(format!("unknown location directive '{}'", other), loc));
            }
        }
        Ok(())
    }
}

/// `listen 8080;` or `listen 127.0.0.1:8080;`
fn parse_listen_addr(arg: &str, loc: Loc) -> ParseResult<SocketAddr> {
    let candidate = if arg.contains(':') {
        arg.to_string()
    } else {
        format!("0.0.0.0:{}", arg)
    };
    candidate
        .parse()
        .map_err(|_| err_at(format!("invalid listen address '{}'", arg), loc))
}

/// Sizes accept an optional k/m/g suffix: `client_max_body_size 10m;`
fn parse_size(arg: &str, loc: Loc) -> ParseResult<usize> {
    let bad = || err_at(format!("invalid size '{}'", arg), loc);
    if arg.is_empty() {
        return Err(bad());
    }

    let (digits, multiplier) = match arg.chars().last() {
        Some('k') | Some('K') => (&arg[..arg.len() - 1], 1024usize),
        Some('m') | Some('M') => (&arg[..arg.len() - 1], 1024 * 1024),
        Some('g') | Some('G') => (&arg[..arg.len() - 1], 1024 * 1024 * 1024),
        _ => (arg, 1),
    };

    let value: usize = digits.parse().map_err(|_| bad())?;
    value.checked_mul(multiplier).ok_or_else(bad)
}
