//! Connectivity and storage-permission collaborators.
//!
//! The client asks a [`ConnectivityGate`] before every call and a
//! [`PermissionGate`] before writing files. Applications plug in their own
//! platform checks; the defaults here suit servers and command-line use.

use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpStream;
use tracing::debug;

/// Reports whether the network is reachable.
#[async_trait]
pub trait ConnectivityGate: Send + Sync {
    /// Returns `false` when calls should fail fast without touching the network.
    async fn has_connection(&self) -> bool;
}

/// Reports whether the process may write downloaded files.
#[async_trait]
pub trait PermissionGate: Send + Sync {
    async fn has_storage_permission(&self) -> bool;
}

/// Connectivity gate that always reports a connection.
#[derive(Debug, Clone, Copy, Default)]
pub struct AssumeOnline;

#[async_trait]
impl ConnectivityGate for AssumeOnline {
    async fn has_connection(&self) -> bool {
        true
    }
}

/// Connectivity gate that opens a TCP connection to a known host.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use courier_core::TcpReachability;
///
/// let gate = TcpReachability::new("api.example.com:443", Duration::from_secs(2));
/// assert_eq!(gate.addr(), "api.example.com:443");
/// ```
#[derive(Debug, Clone)]
pub struct TcpReachability {
    addr: String,
    timeout: Duration,
}

impl TcpReachability {
    /// Creates a reachability check for `addr` (`host:port`).
    pub fn new(addr: impl Into<String>, timeout: Duration) -> Self {
        Self {
            addr: addr.into(),
            timeout,
        }
    }

    #[must_use]
    pub fn addr(&self) -> &str {
        &self.addr
    }
}

#[async_trait]
impl ConnectivityGate for TcpReachability {
    async fn has_connection(&self) -> bool {
        match tokio::time::timeout(self.timeout, TcpStream::connect(&self.addr)).await {
            Ok(Ok(_)) => true,
            Ok(Err(error)) => {
                debug!(addr = %self.addr, error = %error, "connectivity check failed");
                false
            }
            Err(_) => {
                debug!(addr = %self.addr, "connectivity check timed out");
                false
            }
        }
    }
}

/// Permission gate that always grants storage access.
#[derive(Debug, Clone, Copy, Default)]
pub struct GrantedPermissions;

#[async_trait]
impl PermissionGate for GrantedPermissions {
    async fn has_storage_permission(&self) -> bool {
        true
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_defaults_allow_everything() {
        assert!(AssumeOnline.has_connection().await);
        assert!(GrantedPermissions.has_storage_permission().await);
    }

    #[tokio::test]
    async fn test_tcp_reachability_reaches_listener() {
        let Ok(listener) = TcpListener::bind("127.0.0.1:0").await else {
            eprintln!("skipping: cannot bind localhost");
            return;
        };
        let addr = listener.local_addr().unwrap().to_string();
        let gate = TcpReachability::new(addr, Duration::from_secs(2));
        assert!(gate.has_connection().await);
    }

    #[tokio::test]
    async fn test_tcp_reachability_reports_unreachable() {
        let Ok(listener) = TcpListener::bind("127.0.0.1:0").await else {
            eprintln!("skipping: cannot bind localhost");
            return;
        };
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);
        let gate = TcpReachability::new(addr, Duration::from_millis(500));
        assert!(!gate.has_connection().await);
    }
}
