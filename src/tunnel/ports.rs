//! Local port allocation for forwarding
//!
//! Probes ports by binding `127.0.0.1:port` and releasing the socket right
//! away. Another process can take the port between the probe and the tunnel
//! binding it; nothing here reserves it.

use std::net::{Ipv4Addr, SocketAddrV4, TcpListener};

use tracing::trace;

use super::TunnelError;

/// First port tried when no range is configured
pub const DEFAULT_START_PORT: u16 = 8000;

/// Number of candidates probed when no range is configured
pub const DEFAULT_MAX_ATTEMPTS: u16 = 100;

/// Return the first port in `start_port..start_port + max_attempts` that can
/// be bound on the loopback interface.
pub fn allocate(start_port: u16, max_attempts: u16) -> Result<u16, TunnelError> {
    let candidates = (0..max_attempts).map_while(|offset| start_port.checked_add(offset));

    for port in candidates {
        match TcpListener::bind(SocketAddrV4::new(Ipv4Addr::LOCALHOST, port)) {
            Ok(listener) => {
                drop(listener);
                return Ok(port);
            }
            Err(e) => trace!("Port {} unavailable: {}", port, e),
        }
    }

    Err(TunnelError::NoPortAvailable {
        start: start_port,
        attempts: max_attempts,
    })
}
