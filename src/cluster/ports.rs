use std::collections::HashSet;
use std::net::IpAddr;
use std::net::SocketAddr;
use std::net::TcpListener;

use tracing::debug;

use crate::StartupError;

/// Reserve `count` distinct ports on `host`.
///
/// With a `base` the range `base..base + count` is returned as is. Otherwise every port is
/// taken from the OS and all listeners are held until the set is complete, so two calls in
/// the same batch can never be handed the same ephemeral port.
pub(crate) fn allocate_ports(
    host: IpAddr,
    base: Option<u16>,
    count: usize,
) -> Result<Vec<u16>, StartupError> {
    if let Some(base) = base {
        let end = base as usize + count;
        if base == 0 || end > u16::MAX as usize {
            return Err(StartupError::PortAllocation(format!(
                "{count} ports from {base} overflow the port range"
            )));
        }
        return Ok((base..end as u16).collect());
    }

    let mut listeners = Vec::with_capacity(count);
    let mut seen = HashSet::with_capacity(count);
    for _ in 0..count {
        let listener = TcpListener::bind(SocketAddr::new(host, 0)).map_err(|e| {
            StartupError::PortAllocation(format!("bind {host}:0 failed: {e}"))
        })?;
        let port = listener
            .local_addr()
            .map_err(|e| StartupError::PortAllocation(e.to_string()))?
            .port();
        if !seen.insert(port) {
            return Err(StartupError::PortAllocation(format!(
                "OS handed out port {port} twice"
            )));
        }
        listeners.push((port, listener));
    }

    let ports: Vec<u16> = listeners.iter().map(|(port, _)| *port).collect();
    debug!(?ports, "allocated ports");
    Ok(ports)
}
