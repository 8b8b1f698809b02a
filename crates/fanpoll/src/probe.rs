//! Reachability probe
//!
//! Before a point's data connection is opened, its address is probed a few
//! times. The probe is a TCP connect to the point's service port.

use async_trait::async_trait;
use std::time::Duration;
use tokio::net::TcpStream;
use tracing::debug;

use crate::config::ProbeConfig;

/// Answers whether an address is reachable right now
#[async_trait]
pub trait Prober: Send + Sync {
    /// One probe attempt
    async fn probe(&self, address: &str) -> bool;
}

/// Probe by opening (and immediately dropping) a TCP connection
#[derive(Debug, Clone)]
pub struct TcpProber {
    default_port: u16,
    timeout: Duration,
}

impl TcpProber {
    /// Create a prober
    pub fn new(default_port: u16, timeout: Duration) -> Self {
        Self {
            default_port,
            timeout,
        }
    }

    /// Create a prober from configuration
    pub fn from_config(config: &ProbeConfig) -> Self {
        Self::new(config.port, config.timeout())
    }
}

/// Split a point address into host and port
///
/// Accepts `host`, `host,port`, `host:port` and `tcp:` prefixes; a named
/// instance suffix (`host\instance`) is dropped.
pub fn probe_target(address: &str, default_port: u16) -> (String, u16) {
    let address = address.trim();
    let address = address.strip_prefix("tcp:").unwrap_or(address);

    let (host, port) = match address.split_once(',') {
        Some((host, port)) => (host, port.trim().parse().ok()),
        None => match address.rsplit_once(':') {
            // A bare IPv6 address has more than one colon
            Some((host, port)) if !host.contains(':') => (host, port.parse().ok()),
            _ => (address, None),
        },
    };
    let host = host.split('\\').next().unwrap_or(host).trim();

    (host.to_string(), port.unwrap_or(default_port))
}

#[async_trait]
impl Prober for TcpProber {
    async fn probe(&self, address: &str) -> bool {
        let (host, port) = probe_target(address, self.default_port);
        match tokio::time::timeout(self.timeout, TcpStream::connect((host.as_str(), port))).await {
            Ok(Ok(_)) => true,
            Ok(Err(e)) => {
                debug!(%host, port, error = %e, "probe refused");
                false
            }
            Err(_) => {
                debug!(%host, port, "probe timed out");
                false
            }
        }
    }
}

/// Probe up to `attempts` times; true as soon as one attempt succeeds
pub async fn check_reachable(prober: &dyn Prober, address: &str, attempts: u32) -> bool {
    for attempt in 1..=attempts {
        if prober.probe(address).await {
            return true;
        }
        debug!(address, attempt, "reachability probe failed");
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockProber;

    #[test]
    fn test_probe_target_forms() {
        assert_eq!(probe_target("10.0.0.5", 1433), ("10.0.0.5".into(), 1433));
        assert_eq!(probe_target("10.0.0.5,1444", 1433), ("10.0.0.5".into(), 1444));
        assert_eq!(probe_target("db.local:2000", 1433), ("db.local".into(), 2000));
        assert_eq!(probe_target("tcp:db.local,1500", 1433), ("db.local".into(), 1500));
        assert_eq!(probe_target("SHOP7\\SQLEXPRESS", 1433), ("SHOP7".into(), 1433));
        assert_eq!(probe_target("fe80::1", 1433), ("fe80::1".into(), 1433));
    }

    #[tokio::test]
    async fn test_tcp_probe_reaches_listener() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let prober = TcpProber::new(port, Duration::from_secs(2));

        assert!(prober.probe("127.0.0.1").await);
    }

    #[tokio::test]
    async fn test_check_reachable_stops_at_first_success() {
        let prober = MockProber::new();
        prober.fail_first("10.0.0.1", 2);

        assert!(check_reachable(&*prober, "10.0.0.1", 3).await);
        assert_eq!(prober.attempts("10.0.0.1"), 3);

        prober.set_unreachable("10.0.0.2");
        assert!(!check_reachable(&*prober, "10.0.0.2", 3).await);
        assert_eq!(prober.attempts("10.0.0.2"), 3);
    }
}
