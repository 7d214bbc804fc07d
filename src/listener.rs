use crate::prelude::*;

/// One listening socket per distinct (address, port). All servers that name
/// the endpoint share it; the Host header picks among them after accept.
#[derive(Debug)]
pub struct Listener {
    pub socket: TcpListener,
    pub addr: SocketAddr,
    pub servers: Vec<Arc<ServerConfig>>,
}

/// Groups the configured servers by listen address and binds each endpoint
/// once. Bind failures are fatal at startup.
pub fn build_listeners(config: &AppConfig) -> Result<Vec<Listener>> {
    let servers: Vec<Arc<ServerConfig>> = config.servers.iter().cloned().map(Arc::new).collect();

    let mut endpoints: Vec<(SocketAddr, Vec<Arc<ServerConfig>>)> = Vec::new();
    for server in &servers {
        for addr in &server.listen {
            match endpoints.iter_mut().find(|(a, _)| a == addr) {
                Some((_, list)) => list.push(Arc::clone(server)),
                None => endpoints.push((*addr, vec![Arc::clone(server)])),
            }
        }
    }

    let mut listeners = Vec::new();
    for (addr, servers) in endpoints {
        let socket = TcpListener::bind(addr).map_err(|e| {
            ServerError::Startup(format!("cannot bind {}: {}", addr, e))
        })?;
        info!("listening on {}", addr);
        listeners.push(Listener {
            socket,
            addr,
            servers,
        });
    }

    Ok(listeners)
}
