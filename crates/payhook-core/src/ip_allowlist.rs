//! # Source Address Allowlist
//!
//! Optional restriction of deliveries to known gateway addresses. Entries are
//! exact addresses or CIDR blocks, IPv4 or IPv6. No entries means no
//! restriction; operators opt in explicitly.

use crate::config::{ConfigError, WebhookSecurityConfig};
use std::fmt;
use std::net::IpAddr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AllowEntry {
    Exact(IpAddr),
    Block { network: IpAddr, prefix: u8 },
}

impl AllowEntry {
    fn parse(raw: &str) -> Result<Self, ConfigError> {
        let entry = raw.trim();
        let invalid = |message: &str| ConfigError::InvalidAllowlistEntry {
            entry: raw.to_string(),
            message: message.to_string(),
        };

        match entry.split_once('/') {
            None => entry
                .parse::<IpAddr>()
                .map(|ip| Self::Exact(ip.to_canonical()))
                .map_err(|_| invalid("not an IP address")),
            Some((addr, prefix)) => {
                let network = addr
                    .parse::<IpAddr>()
                    .map_err(|_| invalid("network is not an IP address"))?;
                let prefix = prefix
                    .parse::<u8>()
                    .map_err(|_| invalid("prefix length is not a number"))?;
                let max = match network {
                    IpAddr::V4(_) => 32,
                    IpAddr::V6(_) => 128,
                };
                if prefix > max {
                    return Err(invalid(&format!("prefix length exceeds {}", max)));
                }
                Ok(Self::Block { network, prefix })
            }
        }
    }

    fn contains(&self, ip: IpAddr) -> bool {
        match *self {
            Self::Exact(allowed) => allowed == ip,
            Self::Block { network, prefix } => match (network, ip) {
                (IpAddr::V4(net), IpAddr::V4(addr)) => {
                    let mask = if prefix == 0 {
                        0
                    } else {
                        u32::MAX << (32 - u32::from(prefix))
                    };
                    u32::from(net) & mask == u32::from(addr) & mask
                }
                (IpAddr::V6(net), IpAddr::V6(addr)) => {
                    let mask = if prefix == 0 {
                        0
                    } else {
                        u128::MAX << (128 - u32::from(prefix))
                    };
                    u128::from(net) & mask == u128::from(addr) & mask
                }
                _ => false,
            },
        }
    }
}

impl fmt::Display for AllowEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exact(ip) => write!(f, "{}", ip),
            Self::Block { network, prefix } => write!(f, "{}/{}", network, prefix),
        }
    }
}

/// Parsed set of allowed source addresses
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IpAllowlist {
    entries: Vec<AllowEntry>,
}

impl IpAllowlist {
    /// Allowlist that admits every source
    pub fn allow_all() -> Self {
        Self::default()
    }

    /// Parse configured entries
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidAllowlistEntry`] for the first entry that
    /// is neither an address nor a valid CIDR block.
    pub fn parse(entries: &[String]) -> Result<Self, ConfigError> {
        let entries = entries
            .iter()
            .map(|e| AllowEntry::parse(e))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { entries })
    }

    /// Build from configuration; disabled means allow all
    pub fn from_config(config: &WebhookSecurityConfig) -> Result<Self, ConfigError> {
        if config.enable_ip_allowlist {
            Self::parse(&config.allowed_ips)
        } else {
            Ok(Self::allow_all())
        }
    }

    /// Whether any restriction is in force
    pub fn is_restricted(&self) -> bool {
        !self.entries.is_empty()
    }

    /// Check a source address
    ///
    /// An unparseable source is rejected whenever a restriction is active.
    pub fn is_allowed(&self, source: &str) -> bool {
        if !self.is_restricted() {
            return true;
        }

        let ip = match source.trim().parse::<IpAddr>() {
            Ok(ip) => ip.to_canonical(),
            Err(_) => return false,
        };

        self.entries.iter().any(|entry| entry.contains(ip))
    }

    /// Configured entries in normalised text form
    pub fn entries(&self) -> Vec<String> {
        self.entries.iter().map(ToString::to_string).collect()
    }
}

#[cfg(test)]
#[path = "ip_allowlist_tests.rs"]
mod tests;
