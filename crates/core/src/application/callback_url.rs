//! Callback target validation (SSRF defense)
//!
//! Runs once at admission. The scheme must be allowed, the URL must name a
//! host, and when a block flag is on every address the host resolves to is
//! checked against the blocked ranges.

use crate::application::config::RuntimeConfig;
use crate::error::{AppError, Result};
use crate::port::HostResolver;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::sync::Arc;
use tracing::warn;
use url::{Host, Url};

/// Address space a callback host falls into
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressClass {
    Public,
    /// Loopback, unspecified and "this network" addresses
    Local,
    /// RFC 1918, link-local, unique-local, carrier-grade NAT, broadcast
    Private,
}

pub fn classify(ip: IpAddr) -> AddressClass {
    match ip {
        IpAddr::V4(v4) => classify_v4(v4),
        IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
            Some(v4) => classify_v4(v4),
            None => classify_v6(v6),
        },
    }
}

fn classify_v4(ip: Ipv4Addr) -> AddressClass {
    let octets = ip.octets();
    if ip.is_loopback() || ip.is_unspecified() || octets[0] == 0 {
        AddressClass::Local
    } else if ip.is_private()
        || ip.is_link_local()
        || ip.is_broadcast()
        || (octets[0] == 100 && (octets[1] & 0xc0) == 64)
    {
        AddressClass::Private
    } else {
        AddressClass::Public
    }
}

fn classify_v6(ip: Ipv6Addr) -> AddressClass {
    let first = ip.segments()[0];
    if ip.is_loopback() || ip.is_unspecified() {
        AddressClass::Local
    } else if (first & 0xfe00) == 0xfc00 || (first & 0xffc0) == 0xfe80 {
        AddressClass::Private
    } else {
        AddressClass::Public
    }
}

#[derive(Debug, Clone)]
pub struct CallbackUrlPolicy {
    pub allowed_schemes: Vec<String>,
    pub block_private_ips: bool,
    pub block_localhost: bool,
}

impl CallbackUrlPolicy {
    pub fn from_config(config: &RuntimeConfig) -> Self {
        Self {
            allowed_schemes: config
                .allowed_callback_schemes
                .iter()
                .map(|s| s.to_ascii_lowercase())
                .collect(),
            block_private_ips: config.block_private_ips,
            block_localhost: config.block_localhost,
        }
    }

    fn blocks(&self, class: AddressClass) -> bool {
        match class {
            AddressClass::Public => false,
            AddressClass::Local => self.block_localhost,
            AddressClass::Private => self.block_private_ips,
        }
    }
}

pub struct CallbackUrlValidator {
    policy: CallbackUrlPolicy,
    resolver: Arc<dyn HostResolver>,
}

impl CallbackUrlValidator {
    pub fn new(policy: CallbackUrlPolicy, resolver: Arc<dyn HostResolver>) -> Self {
        Self { policy, resolver }
    }

    /// Parse and vet a callback target; the normalized URL is returned
    pub async fn validate(&self, raw: &str) -> Result<Url> {
        let url = Url::parse(raw.trim())
            .map_err(|e| AppError::Validation(format!("Invalid callback URL: {}", e)))?;

        if !self.policy.allowed_schemes.iter().any(|s| s == url.scheme()) {
            return Err(AppError::Validation(format!(
                "Callback URL scheme '{}' is not allowed. Allowed: {}",
                url.scheme(),
                self.policy.allowed_schemes.join(", ")
            )));
        }

        let host = url
            .host()
            .ok_or_else(|| AppError::Validation("Callback URL must include a host".to_string()))?;

        if !self.policy.block_private_ips && !self.policy.block_localhost {
            return Ok(url);
        }

        let addrs = match host {
            Host::Ipv4(ip) => vec![IpAddr::V4(ip)],
            Host::Ipv6(ip) => vec![IpAddr::V6(ip)],
            Host::Domain(domain) => {
                let domain = domain.trim_end_matches('.').to_ascii_lowercase();
                if self.policy.block_localhost
                    && (domain == "localhost" || domain.ends_with(".localhost"))
                {
                    return Err(self.reject(&url, "localhost is not allowed"));
                }
                let port = url.port_or_known_default().unwrap_or(80);
                let resolved = self.resolver.resolve(&domain, port).await.map_err(|e| {
                    AppError::Validation(format!("Could not resolve callback host '{}': {}", domain, e))
                })?;
                if resolved.is_empty() {
                    return Err(AppError::Validation(format!(
                        "Callback host '{}' resolved to no addresses",
                        domain
                    )));
                }
                resolved
            }
        };

        for ip in addrs {
            let class = classify(ip);
            if self.policy.blocks(class) {
                let reason = match class {
                    AddressClass::Local => format!("{} is a loopback address", ip),
                    _ => format!("{} is a private or link-local address", ip),
                };
                return Err(self.reject(&url, &reason));
            }
        }

        Ok(url)
    }

    fn reject(&self, url: &Url, reason: &str) -> AppError {
        warn!(callback_url = %url, reason = %reason, "Blocked callback target");
        AppError::Validation(format!("Callback URL not allowed: {}", reason))
    }
}
