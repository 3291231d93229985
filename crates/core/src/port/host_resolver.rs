// Host Resolver Port (DNS lookup for callback target validation)

use async_trait::async_trait;
use std::net::IpAddr;

#[async_trait]
pub trait HostResolver: Send + Sync {
    /// Resolve a hostname to every address it maps to
    async fn resolve(&self, host: &str, port: u16) -> std::io::Result<Vec<IpAddr>>;
}

/// OS resolver (production)
pub struct SystemResolver;

#[async_trait]
impl HostResolver for SystemResolver {
    async fn resolve(&self, host: &str, port: u16) -> std::io::Result<Vec<IpAddr>> {
        let addrs = tokio::net::lookup_host((host, port)).await?;
        Ok(addrs.map(|addr| addr.ip()).collect())
    }
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use std::collections::HashMap;

    /// Fixed host table; unknown hosts fail to resolve
    #[derive(Default)]
    pub struct StaticResolver {
        table: HashMap<String, Vec<IpAddr>>,
    }

    impl StaticResolver {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with_host(mut self, host: &str, addrs: &[IpAddr]) -> Self {
            self.table.insert(host.to_ascii_lowercase(), addrs.to_vec());
            self
        }
    }

    #[async_trait]
    impl HostResolver for StaticResolver {
        async fn resolve(&self, host: &str, _port: u16) -> std::io::Result<Vec<IpAddr>> {
            self.table
                .get(&host.to_ascii_lowercase())
                .cloned()
                .ok_or_else(|| {
                    std::io::Error::new(
                        std::io::ErrorKind::NotFound,
                        format!("no such host: {}", host),
                    )
                })
        }
    }
}
