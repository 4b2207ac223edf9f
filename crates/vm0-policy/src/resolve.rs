//! Hostname resolution seam.
//!
//! IP rules need a forward lookup of the hostname under evaluation. The
//! evaluator only ever sees this trait, so tests substitute a fixed table
//! and production wires in the system resolver.

use async_trait::async_trait;
use std::net::IpAddr;
use tracing::debug;

/// Forward DNS resolution. Failures are a silent `None`; an IP rule whose
/// lookup fails simply does not match.
#[async_trait]
pub trait ResolveHost: Send + Sync {
    async fn resolve(&self, host: &str) -> Option<IpAddr>;
}

/// System resolver backed by the tokio lookup machinery.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemResolver;

#[async_trait]
impl ResolveHost for SystemResolver {
    async fn resolve(&self, host: &str) -> Option<IpAddr> {
        match tokio::net::lookup_host((host, 0u16)).await {
            Ok(mut addrs) => addrs.next().map(|a| a.ip()),
            Err(e) => {
                debug!(host, error = %e, "hostname resolution failed");
                None
            }
        }
    }
}
