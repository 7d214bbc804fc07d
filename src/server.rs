use std::process::Child;

use crate::cgi;
use crate::connection::{Connection, Phase};
use crate::handlers::{handle_delete, handle_get, handle_post};
use crate::http::response::{error_response, status_for};
use crate::listener::{build_listeners, Listener};
use crate::prelude::*;
use crate::router::{self, RouteAction};
use crate::signal;
use crate::timeouts;

/// A CGI child that was signalled and is waiting to be reaped; SIGKILL
/// escalation happens after the grace period.
#[derive(Debug)]
pub struct DyingChild {
    pub child: Child,
    pub term_at: Instant,
    pub killed: bool,
}

/// The single-threaded engine: every fd in the interest set belongs to
/// exactly one listener, one connection, or one connection's CGI pipes.
pub struct Server {
    pub poll: Poll,
    pub listeners: HashMap<Token, Listener>,
    pub connections: HashMap<Token, Connection>,
    /// CGI pipe token -> owning client token.
    pub cgi_to_client: HashMap<Token, Token>,
    pub next_token: usize,
    pub dying: Vec<DyingChild>,
    pub draining: bool,
}

impl Server {
    pub fn new(config: AppConfig) -> Result<Server> {
        let poll = Poll::new()?;
        let mut listeners = HashMap::new();
        let mut next_token = 0usize;

        for mut listener in build_listeners(&config)? {
            let token = Token(next_token);
            next_token += 1;
            poll.registry()
                .register(&mut listener.socket, token, Interest::READABLE)?;
            listeners.insert(token, listener);
        }

        Ok(Server {
            poll,
            listeners,
            connections: HashMap::new(),
            cgi_to_client: HashMap::new(),
            next_token,
            dying: Vec::new(),
            draining: false,
        })
    }

    /// The readiness loop. The poll wait is the only place the process
    /// blocks; its timeout is bounded by the nearest deadline.
    pub fn run(&mut self) -> Result<()> {
        let mut events = Events::with_capacity(1024);

        loop {
            if signal::shutdown_requested() && !self.draining {
                self.begin_drain();
            }
            if self.draining && self.connections.is_empty() && self.dying.is_empty() {
                info!("shutdown complete");
                return Ok(());
            }

            let timeout = timeouts::next_timeout(self);
            if let Err(e) = self.poll.poll(&mut events, Some(timeout)) {
                if e.kind() == ErrorKind::Interrupted {
                    continue;
                }
                return Err(e.into());
            }

            for event in events.iter() {
                let token = event.token();
                if self.listeners.contains_key(&token) {
                    self.accept_loop(token);
                } else if let Some(&client) = self.cgi_to_client.get(&token) {
                    self.handle_cgi_event(token, client, event);
                } else {
                    self.handle_client_event(token, event);
                }
            }

            timeouts::sweep(self);
        }
    }

    /// Accepts until the listener would block. Each new client is wrapped in
    /// a Connection and watched for reads.
    fn accept_loop(&mut self, token: Token) {
        loop {
            let Some(listener) = self.listeners.get(&token) else {
                return;
            };
            match listener.socket.accept() {
                Ok((mut stream, peer)) => {
                    let servers = listener.servers.clone();
                    let local = listener.addr;
                    let limits = Connection::parse_limits(&servers);

                    let client_token = Token(self.next_token);
                    self.next_token += 1;
                    if let Err(e) = self.poll.registry().register(
                        &mut stream,
                        client_token,
                        Interest::READABLE,
                    ) {
                        warn!("failed to register client {}: {}", peer, e);
                        continue;
                    }
                    trace!("accepted {} on {}", peer, local);
                    self.connections
                        .insert(client_token, Connection::new(stream, peer, local, servers, limits));
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => return,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    // The listener stays up; a failed accept only loses that
                    // one client.
                    warn!("accept failed: {}", e);
                    return;
                }
            }
        }
    }

    fn handle_client_event(&mut self, token: Token, event: &Event) {
        let Some(conn) = self.connections.get_mut(&token) else {
            return;
        };
        conn.touch();

        if event.is_readable() && conn.phase != Phase::Writing && !conn.peer_eof {
            let eof = match conn.read_data() {
                Ok(eof) => eof,
                Err(_) => {
                    self.close_connection(token);
                    return;
                }
            };
            if eof {
                conn.peer_eof = true;
                match conn.phase {
                    // A half-closed peer may still have sent a complete
                    // request; anything incomplete can never finish.
                    Phase::Reading if conn.read_buf.is_empty() => {
                        self.close_connection(token);
                        return;
                    }
                    Phase::Reading => {}
                    // The client vanished mid-CGI: tear down, child included.
                    Phase::WaitingOnCgi | Phase::Writing => {
                        self.close_connection(token);
                        return;
                    }
                }
            }
            if self
                .connections
                .get(&token)
                .map(|c| c.phase == Phase::Reading)
                .unwrap_or(false)
            {
                self.process_input(token);
            }
        }

        if event.is_writable() {
            if let Some(conn) = self.connections.get(&token) {
                if conn.phase == Phase::Writing {
                    self.flush_write(token);
                }
            }
        }
    }

    /// Runs the completeness probe over whatever is buffered; a complete
    /// request goes to the router, a failure becomes its single error
    /// response. One request at a time: parsing stops while a response is
    /// in flight.
    fn process_input(&mut self, token: Token) {
        let Some(conn) = self.connections.get_mut(&token) else {
            return;
        };
        if conn.phase != Phase::Reading || conn.read_buf.is_empty() {
            return;
        }

        match crate::http::request::parse_request(&mut conn.read_buf, &conn.limits) {
            ParseOutcome::NeedMore => {
                if conn.peer_eof {
                    // Test: a request the peer abandoned gets no response.
                    self.close_connection(token);
                }
            }
            ParseOutcome::Invalid(err) | ParseOutcome::TooLarge(err) => {
                debug!("{} rejected: {}", conn.peer, err);
                let server = Arc::clone(router::select_server(&conn.servers, ""));
                let res = error_response(status_for(&err), Some(&server));
                // The connection state is unknowable after a bad request.
                conn.queue_response(res, false);
                self.reregister(token);
            }
            ParseOutcome::Complete(request) => self.dispatch(token, request),
        }
    }

    /// Router steps: virtual host, body-limit re-check, location, method
    /// gate, then redirect / CGI / static.
    fn dispatch(&mut self, token: Token, request: Request) {
        let Some(conn) = self.connections.get_mut(&token) else {
            return;
        };
        let server = Arc::clone(router::select_server(&conn.servers, request.hostname()));
        let keep_alive = request.keep_alive && !conn.peer_eof && !self.draining;

        let Some(location) = router::select_location(&server, &request.path) else {
            conn.request = Some(request);
            let res = error_response(HTTP_NOT_FOUND, Some(&server));
            conn.queue_response(res, keep_alive);
            self.reregister(token);
            return;
        };

        match router::route(&server, location, &request) {
            Err(RoutingError::MethodNotAllowed { allowed }) => {
                let allowed = allowed
                    .iter()
                    .map(|m| m.as_str())
                    .collect::<Vec<_>>()
                    .join(", ");
                let mut res = error_response(HTTP_METHOD_NOT_ALLOWED, Some(&server));
                res.set_header("allow", &allowed);
                conn.request = Some(request);
                conn.queue_response(res, keep_alive);
            }
            Err(RoutingError::PayloadTooLarge) => {
                let res = error_response(HTTP_PAYLOAD_TOO_LARGE, Some(&server));
                conn.request = Some(request);
                conn.queue_response(res, false);
            }
            Ok(RouteAction::Redirect { status, target }) => {
                let res = HttpResponse::redirect(status, &target);
                conn.request = Some(request);
                conn.queue_response(res, keep_alive);
            }
            Ok(RouteAction::Cgi { script }) => {
                if !script.is_file() {
                    let res = error_response(HTTP_NOT_FOUND, Some(&server));
                    conn.request = Some(request);
                    conn.queue_response(res, keep_alive);
                } else {
                    match cgi::spawn(
                        &request,
                        &server,
                        location,
                        &script,
                        conn.peer,
                        conn.local,
                        self.poll.registry(),
                        &mut self.next_token,
                    ) {
                        Ok(process) => {
                            self.cgi_to_client.insert(process.stdout_token, token);
                            if let Some(t) = process.stdin_token {
                                self.cgi_to_client.insert(t, token);
                            }
                            conn.cgi = Some(process);
                            conn.request = Some(request);
                            conn.keep_alive = keep_alive;
                            conn.phase = Phase::WaitingOnCgi;
                        }
                        Err(e) => {
                            warn!("cgi dispatch failed: {}", e);
                            let res = error_response(e.status(), Some(&server));
                            conn.request = Some(request);
                            conn.queue_response(res, keep_alive);
                        }
                    }
                }
            }
            Ok(RouteAction::Static) => {
                let res = match request.method {
                    Method::GET => handle_get(&request, &server, location),
                    Method::POST => handle_post(&request, &server, location),
                    Method::DELETE => handle_delete(&request, &server, location),
                };
                conn.request = Some(request);
                conn.queue_response(res, keep_alive);
            }
        }

        self.reregister(token);
    }

    fn flush_write(&mut self, token: Token) {
        let Some(conn) = self.connections.get_mut(&token) else {
            return;
        };
        match conn.write_data() {
            Ok(true) => {
                if conn.keep_alive && !self.draining {
                    conn.reset_for_next_request();
                    self.reregister(token);
                    // Leftover bytes from the wire seed the next parse.
                    self.process_input(token);
                } else {
                    self.close_connection(token);
                }
            }
            Ok(false) => {}
            // EPIPE / ECONNRESET: the peer is gone, close silently.
            Err(_) => self.close_connection(token),
        }
    }

    fn handle_cgi_event(&mut self, cgi_token: Token, client_token: Token, event: &Event) {
        let Some(conn) = self.connections.get_mut(&client_token) else {
            self.cgi_to_client.remove(&cgi_token);
            return;
        };
        conn.touch();
        let Some(process) = conn.cgi.as_mut() else {
            self.cgi_to_client.remove(&cgi_token);
            return;
        };

        if event.is_writable() && Some(cgi_token) == process.stdin_token {
            process.pump_stdin(self.poll.registry());
            if process.stdin_token.is_none() {
                self.cgi_to_client.remove(&cgi_token);
            }
        }
        if event.is_readable() && cgi_token == process.stdout_token {
            process.pump_stdout(self.poll.registry());
        }

        self.try_finish_cgi(client_token);
    }

    /// Turns a finished CGI child into the client response. Children that
    /// closed stdout but have not exited yet are retried by the sweep.
    pub(crate) fn try_finish_cgi(&mut self, token: Token) {
        let Some(conn) = self.connections.get_mut(&token) else {
            return;
        };
        let Some(result) = conn.cgi.as_mut().and_then(|p| p.try_finish()) else {
            return;
        };
        let Some(mut process) = conn.cgi.take() else {
            return;
        };
        self.cgi_to_client.remove(&process.stdout_token);
        if let Some(t) = process.stdin_token.take() {
            self.cgi_to_client.remove(&t);
        }
        if let Some(mut stdin) = process.stdin.take() {
            let _ = self.poll.registry().deregister(&mut stdin);
        }

        let hostname = conn
            .request
            .as_ref()
            .map(|r| r.hostname().to_string())
            .unwrap_or_default();
        let server = Arc::clone(router::select_server(&conn.servers, &hostname));
        let keep_alive = conn.keep_alive && !conn.peer_eof && !self.draining;

        let response = match result {
            Ok(res) => res,
            Err(e) => {
                warn!("cgi failed: {}", e);
                error_response(e.status(), Some(&server))
            }
        };
        conn.queue_response(response, keep_alive);
        self.reregister(token);
    }

    /// 504 path: signal the child, park it for reaping, answer the client.
    pub(crate) fn fail_cgi_timeout(&mut self, token: Token) {
        let Some(conn) = self.connections.get_mut(&token) else {
            return;
        };
        let Some(process) = conn.cgi.take() else {
            return;
        };
        warn!("cgi timeout pid={}", process.child.id());

        self.cgi_to_client.remove(&process.stdout_token);
        if let Some(t) = process.stdin_token {
            self.cgi_to_client.remove(&t);
        }
        let child = process.shutdown(self.poll.registry());
        self.dying.push(DyingChild {
            child,
            term_at: Instant::now(),
            killed: false,
        });

        let hostname = conn
            .request
            .as_ref()
            .map(|r| r.hostname().to_string())
            .unwrap_or_default();
        let server = Arc::clone(router::select_server(&conn.servers, &hostname));
        let res = error_response(HTTP_GATEWAY_TIMEOUT, Some(&server));
        conn.queue_response(res, false);
        self.reregister(token);
    }

    pub(crate) fn close_connection(&mut self, token: Token) {
        if let Some(mut conn) = self.connections.remove(&token) {
            let _ = self.poll.registry().deregister(&mut conn.stream);
            if let Some(process) = conn.cgi.take() {
                self.cgi_to_client.remove(&process.stdout_token);
                if let Some(t) = process.stdin_token {
                    self.cgi_to_client.remove(&t);
                }
                let child = process.shutdown(self.poll.registry());
                self.dying.push(DyingChild {
                    child,
                    term_at: Instant::now(),
                    killed: false,
                });
            }
            trace!("closed {}", conn.peer);
        }
    }

    fn reregister(&mut self, token: Token) {
        if let Some(conn) = self.connections.get_mut(&token) {
            let interest = conn.interest();
            let _ = self
                .poll
                .registry()
                .reregister(&mut conn.stream, token, interest);
        }
    }

    /// Graceful shutdown: stop accepting, drop idle connections, let
    /// in-flight exchanges finish.
    fn begin_drain(&mut self) {
        info!("shutdown requested, draining {} connection(s)", self.connections.len());
        self.draining = true;
        for listener in self.listeners.values_mut() {
            let _ = self.poll.registry().deregister(&mut listener.socket);
        }
        self.listeners.clear();

        let idle: Vec<Token> = self
            .connections
            .iter()
            .filter(|(_, c)| c.phase == Phase::Reading && c.read_buf.is_empty())
            .map(|(t, _)| *t)
            .collect();
        for token in idle {
            self.close_connection(token);
        }
    }
}
