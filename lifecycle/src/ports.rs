//! Free port negotiation.
//!
//! Candidates are scanned upward from the preferred port and each is probed
//! by binding the engine's address and releasing it immediately. Only
//! `AddrInUse` moves the scan on; any other bind error aborts it.

use errors::PortError;
use std::io::ErrorKind;
use std::ops::RangeInclusive;
use tokio::net::TcpListener;

/// Address the engine binds, and therefore the one probed.
pub const PROBE_HOST: &str = "127.0.0.1";

/// Lazy, finite and restartable sequence of at most `limit` candidate ports
/// starting at `preferred`, capped at the highest port number.
pub fn candidate_ports(preferred: u16, limit: u16) -> RangeInclusive<u16> {
    let first = preferred.max(1);
    let last = first.saturating_add(limit.max(1) - 1);
    first..=last
}

/// Binds `port` on [`PROBE_HOST`] and releases it. `Ok(false)` means the port
/// is in use.
pub async fn probe_port(port: u16) -> Result<bool, PortError> {
    match TcpListener::bind((PROBE_HOST, port)).await {
        Ok(listener) => {
            drop(listener);
            Ok(true)
        }
        Err(e) if e.kind() == ErrorKind::AddrInUse => Ok(false),
        Err(source) => Err(PortError::Probe { port, source })
    }
}

/// Finds free ports for the engine members.
#[derive(Debug, Clone, Copy)]
pub struct PortNegotiator {
    scan_limit: u16
}

impl PortNegotiator {
    pub fn new(scan_limit: u16) -> Self {
        Self { scan_limit }
    }

    /// First bindable port at or above `preferred`.
    pub async fn acquire(&self, preferred: u16) -> Result<u16, PortError> {
        let candidates = candidate_ports(preferred, self.scan_limit);
        let (first, last) = (*candidates.start(), *candidates.end());

        for port in candidates {
            if probe_port(port).await? {
                tracing::debug!(port, "free port found");
                return Ok(port);
            }
            tracing::debug!(port, "port in use");
        }

        Err(PortError::Exhausted { first, last })
    }

    /// `count` distinct free ports, each scan starting just above the
    /// previously acquired port.
    pub async fn acquire_many(&self, preferred: u16, count: usize) -> Result<Vec<u16>, PortError> {
        let mut ports = Vec::with_capacity(count);
        let mut next = preferred;
        for _ in 0..count {
            let port = self.acquire(next).await?;
            ports.push(port);
            next = port.checked_add(1).ok_or(PortError::Exhausted {
                first: preferred,
                last: u16::MAX
            })?;
        }
        Ok(ports)
    }
}
