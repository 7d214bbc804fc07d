use crate::cgi::CgiProcess;
use crate::prelude::*;

/// What the connection is waiting for. Interest registration follows the
/// phase: `Reading` and `WaitingOnCgi` watch the socket for reads, `Writing`
/// for writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Reading,
    WaitingOnCgi,
    Writing,
}

/// Per-client state, created on accept and destroyed on close. The
/// connection exclusively owns its socket; a running CGI child hangs off it
/// and dies with it.
#[derive(Debug)]
pub struct Connection {
    pub stream: TcpStream,
    pub peer: SocketAddr,
    pub local: SocketAddr,
    /// Servers bound to the accepting endpoint; Host selects among them.
    pub servers: Vec<Arc<ServerConfig>>,
    pub read_buf: Vec<u8>,
    pub write_buf: Vec<u8>,
    pub bytes_written: usize,
    pub phase: Phase,
    pub request: Option<Request>,
    pub cgi: Option<CgiProcess>,
    pub keep_alive: bool,
    /// Peer shut down its write side; never read again.
    pub peer_eof: bool,
    pub last_active: Instant,
    pub limits: ParseLimits,
}

impl Connection {
    pub fn new(
        stream: TcpStream,
        peer: SocketAddr,
        local: SocketAddr,
        servers: Vec<Arc<ServerConfig>>,
        limits: ParseLimits,
    ) -> Self {
        Self {
            stream,
            peer,
            local,
            servers,
            read_buf: Vec::with_capacity(READ_BUF_SIZE),
            write_buf: Vec::new(),
            bytes_written: 0,
            phase: Phase::Reading,
            request: None,
            cgi: None,
            keep_alive: true,
            peer_eof: false,
            last_active: Instant::now(),
            limits,
        }
    }

    pub fn touch(&mut self) {
        self.last_active = Instant::now();
    }

    /// Drains the socket into the read buffer. Returns true on EOF.
    pub fn read_data(&mut self) -> io::Result<bool> {
        let mut buf = [0u8; READ_BUF_SIZE];
        loop {
            match self.stream.read(&mut buf) {
                Ok(0) => return Ok(true),
                Ok(n) => self.read_buf.extend_from_slice(&buf[..n]),
                Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(false),
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }

    /// Flushes `write_buf[bytes_written..]`. Returns true once everything
    /// was handed to the socket.
    pub fn write_data(&mut self) -> io::Result<bool> {
        while self.bytes_written < self.write_buf.len() {
            match self.stream.write(&self.write_buf[self.bytes_written..]) {
                Ok(0) => return Err(io::Error::new(ErrorKind::WriteZero, "socket write of 0")),
                Ok(n) => self.bytes_written += n,
                Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(false),
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(true)
    }

    /// Serializes the response into the write buffer and flips to `Writing`.
    pub fn queue_response(&mut self, mut response: HttpResponse, keep_alive: bool) {
        response.finalize(keep_alive);
        self.keep_alive = keep_alive;
        self.write_buf = response.to_bytes();
        self.bytes_written = 0;
        self.phase = Phase::Writing;
        info!(
            "{} \"{}\" -> {}",
            self.peer,
            self.request
                .as_ref()
                .map(|r| format!("{} {}", r.method, r.path))
                .unwrap_or_else(|| "-".to_string()),
            response.status_code
        );
    }

    /// Keep-alive reset: buffers and per-exchange state are cleared in
    /// place. Bytes past the parsed request stay in `read_buf` and seed the
    /// next parse.
    pub fn reset_for_next_request(&mut self) {
        self.write_buf.clear();
        self.bytes_written = 0;
        self.request = None;
        self.phase = Phase::Reading;
        self.touch();
    }

    /// The parse limit for this endpoint: the largest body any of its
    /// servers accepts, bounded by the total-request cap.
    pub fn parse_limits(servers: &[Arc<ServerConfig>]) -> ParseLimits {
        let max_body = servers
            .iter()
            .map(|s| s.client_max_body_size)
            .max()
            .unwrap_or(0)
            .min(MAX_REQUEST_SIZE);
        ParseLimits {
            max_body_size: max_body,
        }
    }

    pub fn interest(&self) -> Interest {
        match self.phase {
            Phase::Reading | Phase::WaitingOnCgi => Interest::READABLE,
            Phase::Writing => Interest::WRITABLE,
        }
    }
}
