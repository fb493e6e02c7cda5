//! Routing table inspection
//!
//! The metadata service lives on a link-local address. Before talking to
//! it we check that the kernel has a route covering that address and log
//! what we find; routes are never modified here.

use async_trait::async_trait;
use std::net::Ipv4Addr;
use std::path::PathBuf;
use tracing::debug;

use crate::CloudInitError;

const PROC_NET_ROUTE: &str = "/proc/net/route";

/// One IPv4 routing table entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub interface: String,
    pub destination: Ipv4Addr,
    pub gateway: Ipv4Addr,
    pub mask: Ipv4Addr,
    pub metric: u32,
}

impl Route {
    /// Whether packets to `addr` would take this route
    pub fn covers(&self, addr: Ipv4Addr) -> bool {
        let mask = u32::from(self.mask);
        u32::from(addr) & mask == u32::from(self.destination) & mask
    }

    pub fn is_default(&self) -> bool {
        self.destination.is_unspecified() && self.mask.is_unspecified()
    }
}

/// Routing knowledge needed before contacting a metadata service
#[async_trait]
pub trait RouteHelper: Send + Sync {
    async fn routes(&self) -> Result<Vec<Route>, CloudInitError>;

    /// Check that the host of `url` is routable
    async fn ensure_reachable(&self, url: &str) -> Result<(), CloudInitError>;
}

/// Reads the kernel routing table from procfs
#[derive(Debug, Clone)]
pub struct SystemRoutes {
    table: PathBuf,
}

impl SystemRoutes {
    pub fn new() -> Self {
        Self::with_table(PROC_NET_ROUTE)
    }

    /// Read routes from an alternative table file
    pub fn with_table(table: impl Into<PathBuf>) -> Self {
        Self {
            table: table.into(),
        }
    }
}

impl Default for SystemRoutes {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RouteHelper for SystemRoutes {
    async fn routes(&self) -> Result<Vec<Route>, CloudInitError> {
        let content = tokio::fs::read_to_string(&self.table).await?;
        Ok(parse_route_table(&content))
    }

    async fn ensure_reachable(&self, url: &str) -> Result<(), CloudInitError> {
        let parsed = reqwest::Url::parse(url)
            .map_err(|e| CloudInitError::Config(format!("invalid URL {}: {}", url, e)))?;

        let Some(addr) = parsed.host_str().and_then(|h| h.parse::<Ipv4Addr>().ok()) else {
            return Ok(());
        };
        if !addr.is_link_local() {
            return Ok(());
        }

        let routes = self.routes().await?;
        match routes.iter().filter(|r| r.covers(addr)).min_by_key(|r| r.metric) {
            Some(route) if route.is_default() => {
                debug!("{} is reached through the default route on {}", addr, route.interface);
                Ok(())
            }
            Some(route) => {
                debug!(
                    "{} is reached through {}/{} on {}",
                    addr, route.destination, route.mask, route.interface
                );
                Ok(())
            }
            None => Err(CloudInitError::Network(format!("no route to {}", addr))),
        }
    }
}

/// Parse the contents of `/proc/net/route`
///
/// Addresses are hexadecimal in host byte order; malformed lines are
/// skipped.
pub fn parse_route_table(content: &str) -> Vec<Route> {
    content.lines().skip(1).filter_map(parse_route_line).collect()
}

fn parse_route_line(line: &str) -> Option<Route> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.len() < 8 {
        return None;
    }
    Some(Route {
        interface: fields[0].to_string(),
        destination: parse_hex_addr(fields[1])?,
        gateway: parse_hex_addr(fields[2])?,
        metric: fields[6].parse().ok()?,
        mask: parse_hex_addr(fields[7])?,
    })
}

fn parse_hex_addr(field: &str) -> Option<Ipv4Addr> {
    let raw = u32::from_str_radix(field, 16).ok()?;
    Some(Ipv4Addr::from(raw.to_le_bytes()))
}
