use crate::prelude::*;
use crate::server::Server;

/// Upper bound for one poll wait; deadlines inside it wake the sweep.
const MAX_POLL_WAIT: Duration = Duration::from_secs(1);

/// The poll timeout: the nearest idle, CGI, or kill-grace deadline, capped
/// so the shutdown flag is observed promptly.
pub fn next_timeout(server: &Server) -> Duration {
    let now = Instant::now();
    let mut nearest: Option<Instant> = None;
    let mut consider = |deadline: Instant| match nearest {
        Some(current) if current <= deadline => {}
        _ => nearest = Some(deadline),
    };

    for conn in server.connections.values() {
        consider(conn.last_active + IDLE_TIMEOUT);
        if let Some(process) = &conn.cgi {
            consider(process.deadline);
        }
    }
    for dying in &server.dying {
        consider(dying.term_at + CGI_KILL_GRACE);
    }

    match nearest {
        Some(deadline) => deadline.saturating_duration_since(now).min(MAX_POLL_WAIT),
        None => MAX_POLL_WAIT,
    }
}

/// Deadline sweep, run once per loop iteration: expired CGI children become
/// 504s, children that exited between events are collected, idle
/// connections are dropped, and signalled children are reaped (escalating
/// to SIGKILL after the grace period).
pub fn sweep(server: &mut Server) {
    let now = Instant::now();

    let with_cgi: Vec<Token> = server
        .connections
        .iter()
        .filter(|(_, c)| c.cgi.is_some())
        .map(|(t, _)| *t)
        .collect();
    for token in with_cgi {
        let expired = server
            .connections
            .get(&token)
            .and_then(|c| c.cgi.as_ref())
            .map(|p| p.expired(now))
            .unwrap_or(false);
        if expired {
            server.fail_cgi_timeout(token);
        } else {
            server.try_finish_cgi(token);
        }
    }

    let idle: Vec<Token> = server
        .connections
        .iter()
        .filter(|(_, c)| now.duration_since(c.last_active) > IDLE_TIMEOUT)
        .map(|(t, _)| *t)
        .collect();
    for token in idle {
        debug!("closing idle connection");
        server.close_connection(token);
    }

    server.dying.retain_mut(|dying| match dying.child.try_wait() {
        Ok(Some(_)) => false,
        Err(_) => false,
        Ok(None) => {
            if !dying.killed && now.duration_since(dying.term_at) >= CGI_KILL_GRACE {
                let _ = dying.child.kill();
                dying.killed = true;
            }
            true
        }
    });
}
