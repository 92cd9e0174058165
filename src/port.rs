//! Free TCP port discovery

use crate::error::ProvisionError;
use std::net::TcpListener;

/// Ask the OS for a port that is free right now.
///
/// Binds an ephemeral listener on loopback, reads back the assigned port and
/// drops the listener. No reservation is held: another process may bind the
/// same port before the engine does.
pub fn free_port() -> Result<u16, ProvisionError> {
    let listener = TcpListener::bind(("127.0.0.1", 0))
        .map_err(|source| ProvisionError::PortAllocation { source })?;
    let port = listener
        .local_addr()
        .map_err(|source| ProvisionError::PortAllocation { source })?
        .port();
    drop(listener);
    Ok(port)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_free_port_is_bindable() {
        let port = free_port().unwrap();
        assert_ne!(port, 0);

        let listener = TcpListener::bind(("127.0.0.1", port));
        assert!(listener.is_ok(), "port {} should be free", port);
    }
}
