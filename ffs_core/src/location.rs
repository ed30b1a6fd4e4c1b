use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Geographic location of a peer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub country: String,
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum ResolveError {
    #[error("can't resolve location")]
    CantResolve,
    #[error("location resolver is closed")]
    Closed,
}

/// Maps peer addresses to a location.
///
/// Owned by the top-level assembly of a process and handed to the
/// components that need it.
#[async_trait]
pub trait LocationResolver: Send + Sync {
    /// Resolves the first address that has a known location.
    async fn resolve(&self, addrs: &[String]) -> Result<Location, ResolveError>;

    async fn close(&self) -> Result<(), ResolveError>;
}

/// Resolver over a fixed table of IP addresses.
///
/// Addresses may be plain IPs, `ip:port` socket addresses or multiaddrs
/// such as `/ip4/1.2.3.4/tcp/1234`.
#[derive(Debug, Default)]
pub struct StaticLocationResolver {
    table: HashMap<IpAddr, Location>,
    closed: AtomicBool,
}

impl StaticLocationResolver {
    pub fn new(table: HashMap<IpAddr, Location>) -> Self {
        Self {
            table,
            closed: AtomicBool::new(false),
        }
    }

    pub fn insert(&mut self, ip: IpAddr, location: Location) {
        self.table.insert(ip, location);
    }
}

fn parse_ip(addr: &str) -> Option<IpAddr> {
    if let Ok(ip) = addr.parse::<IpAddr>() {
        return Some(ip);
    }
    if let Ok(sock) = addr.parse::<SocketAddr>() {
        return Some(sock.ip());
    }
    let mut parts = addr.split('/').filter(|p| !p.is_empty());
    while let Some(proto) = parts.next() {
        if proto == "ip4" || proto == "ip6" {
            return parts.next().and_then(|ip| ip.parse().ok());
        }
    }
    None
}

#[async_trait]
impl LocationResolver for StaticLocationResolver {
    async fn resolve(&self, addrs: &[String]) -> Result<Location, ResolveError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(ResolveError::Closed);
        }
        addrs
            .iter()
            .filter_map(|addr| parse_ip(addr))
            .find_map(|ip| self.table.get(&ip).cloned())
            .ok_or(ResolveError::CantResolve)
    }

    async fn close(&self) -> Result<(), ResolveError> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}
