//! Host port allocation for sandbox dev servers.
//!
//! A port is discovered by binding `127.0.0.1:0` and reading back what the OS
//! assigned. The listener is dropped immediately, so the port is only known
//! to be free at the instant of allocation. Ports handed out to live
//! sandboxes are kept in a reservation set so the allocator never issues the
//! same port twice while it is still reserved.

use std::collections::HashSet;
use std::net::{Ipv4Addr, SocketAddr, TcpListener};
use std::sync::Mutex;

use devbox_core::{Error, Result};

/// Lowest port the allocator will hand out.
pub const MIN_PORT: u16 = 1024;

const MAX_ATTEMPTS: usize = 32;

/// Serializes port discovery and tracks reserved ports.
#[derive(Debug, Default)]
pub struct PortAllocator {
    reserved: Mutex<HashSet<u16>>,
}

impl PortAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve a currently-free loopback port.
    pub fn allocate(&self) -> Result<u16> {
        let mut reserved = self
            .reserved
            .lock()
            .map_err(|_| Error::internal("port allocator lock poisoned"))?;

        for _ in 0..MAX_ATTEMPTS {
            let port = probe_free_port()?;
            if port < MIN_PORT || reserved.contains(&port) {
                tracing::debug!(port, "Probed port unusable, retrying");
                continue;
            }
            reserved.insert(port);
            tracing::debug!(port, "Port allocated");
            return Ok(port);
        }

        Err(Error::internal(format!(
            "no free port found after {} attempts",
            MAX_ATTEMPTS
        )))
    }

    /// Mark a port as in use without probing (e.g. adopted from the engine).
    pub fn reserve(&self, port: u16) {
        if let Ok(mut reserved) = self.reserved.lock() {
            reserved.insert(port);
        }
    }

    /// Return a port to the pool. Unknown ports are ignored.
    pub fn release(&self, port: u16) {
        if let Ok(mut reserved) = self.reserved.lock() {
            if reserved.remove(&port) {
                tracing::debug!(port, "Port released");
            }
        }
    }

    /// Make the reservation set exactly `live`: ports no longer bound by any
    /// sandbox are released and newly seen ones are adopted.
    pub fn reconcile(&self, live: &HashSet<u16>) {
        if let Ok(mut reserved) = self.reserved.lock() {
            for port in reserved.difference(live) {
                tracing::debug!(port, "Stale port reservation released");
            }
            *reserved = live.clone();
        }
    }

    pub fn is_reserved(&self, port: u16) -> bool {
        self.reserved
            .lock()
            .map(|reserved| reserved.contains(&port))
            .unwrap_or(false)
    }
}

fn probe_free_port() -> Result<u16> {
    let listener = TcpListener::bind(SocketAddr::from((Ipv4Addr::LOCALHOST, 0)))
        .map_err(|e| Error::internal(format!("failed to bind ephemeral port: {}", e)))?;
    let port = listener
        .local_addr()
        .map_err(|e| Error::internal(format!("failed to read ephemeral port: {}", e)))?
        .port();
    drop(listener);
    Ok(port)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocated_port_is_in_range_and_bindable() {
        let allocator = PortAllocator::new();
        let port = allocator.allocate().unwrap();
        assert!(port >= MIN_PORT);

        // The socket was released, so the port can be bound again.
        let listener = TcpListener::bind(SocketAddr::from((Ipv4Addr::LOCALHOST, port)));
        assert!(listener.is_ok());
    }

    #[test]
    fn test_no_duplicate_ports_while_reserved() {
        let allocator = PortAllocator::new();
        let mut seen = HashSet::new();
        for _ in 0..50 {
            let port = allocator.allocate().unwrap();
            assert!(seen.insert(port), "port {} issued twice", port);
        }
    }

    #[test]
    fn test_release_and_reserve() {
        let allocator = PortAllocator::new();
        let port = allocator.allocate().unwrap();
        assert!(allocator.is_reserved(port));

        allocator.release(port);
        assert!(!allocator.is_reserved(port));

        allocator.reserve(port);
        assert!(allocator.is_reserved(port));
    }

    #[test]
    fn test_concurrent_allocation_is_unique() {
        let allocator = std::sync::Arc::new(PortAllocator::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let allocator = allocator.clone();
                std::thread::spawn(move || allocator.allocate().unwrap())
            })
            .collect();

        let ports: HashSet<u16> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(ports.len(), 8);
    }

    #[test]
    fn test_reconcile_drops_stale_and_adopts_live() {
        let allocator = PortAllocator::new();
        let stale = allocator.allocate().unwrap();
        allocator.reserve(3001);

        allocator.reconcile(&HashSet::from([3001, 3002]));

        assert!(!allocator.is_reserved(stale));
        assert!(allocator.is_reserved(3001));
        assert!(allocator.is_reserved(3002));
    }
}
