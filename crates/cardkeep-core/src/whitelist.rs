//! IP whitelist.
//!
//! Requests from a whitelisted address skip login entirely. Rules are
//! written by hand in the settings panel, so three forms are accepted:
//!
//! - a single address: `192.168.1.20`, `::1`
//! - a CIDR block: `10.0.0.0/8`, `fd00::/8`
//! - a wildcard glob over the textual address: `192.168.*.*`, `fe80::*`
//!
//! IPv4-mapped IPv6 peers (`::ffff:192.168.1.20`, common on dual-stack
//! listeners) are matched as their IPv4 address.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use serde::Serialize;
use tracing::warn;

use crate::error::WhitelistError;

/// One whitelist rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IpRule {
    Exact { ip: IpAddr },
    Cidr { network: IpAddr, prefix_len: u8 },
    Wildcard { pattern: String },
}

impl fmt::Display for IpRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exact { ip } => write!(f, "{ip}"),
            Self::Cidr {
                network,
                prefix_len,
            } => write!(f, "{network}/{prefix_len}"),
            Self::Wildcard { pattern } => f.write_str(pattern),
        }
    }
}

/// Collapse IPv4-mapped IPv6 addresses to IPv4.
#[must_use]
pub fn normalize_ip(ip: IpAddr) -> IpAddr {
    match ip {
        IpAddr::V6(v6) => v6
            .to_ipv4_mapped()
            .map_or(IpAddr::V6(v6), IpAddr::V4),
        v4 @ IpAddr::V4(_) => v4,
    }
}

fn mask_v4(ip: Ipv4Addr, prefix: u8) -> u32 {
    let mask = if prefix == 0 {
        0
    } else {
        u32::MAX << (32 - u32::from(prefix))
    };
    u32::from(ip) & mask
}

fn mask_v6(ip: Ipv6Addr, prefix: u8) -> u128 {
    let mask = if prefix == 0 {
        0
    } else {
        u128::MAX << (128 - u32::from(prefix))
    };
    u128::from(ip) & mask
}

impl IpRule {
    /// Parse a single rule.
    ///
    /// # Errors
    ///
    /// Returns [`WhitelistError::InvalidRule`] if the text is not an
    /// address, a CIDR block with an in-range prefix, or a wildcard made of
    /// hex digits, `.`, `:` and `*`.
    pub fn parse(rule: &str) -> Result<Self, WhitelistError> {
        let rule = rule.trim();
        let invalid = |reason: &str| WhitelistError::InvalidRule {
            rule: rule.to_owned(),
            reason: reason.to_owned(),
        };

        if rule.is_empty() {
            return Err(invalid("empty rule"));
        }

        if let Some((addr, prefix)) = rule.split_once('/') {
            let network: IpAddr = addr
                .trim()
                .parse()
                .map_err(|_| invalid("network is not an IP address"))?;
            let prefix_len: u8 = prefix
                .trim()
                .parse()
                .map_err(|_| invalid("prefix length is not a number"))?;
            let network = normalize_ip(network);
            let network = match network {
                IpAddr::V4(v4) => {
                    if prefix_len > 32 {
                        return Err(invalid("IPv4 prefix length must be at most 32"));
                    }
                    IpAddr::V4(Ipv4Addr::from(mask_v4(v4, prefix_len)))
                }
                IpAddr::V6(v6) => {
                    if prefix_len > 128 {
                        return Err(invalid("IPv6 prefix length must be at most 128"));
                    }
                    IpAddr::V6(Ipv6Addr::from(mask_v6(v6, prefix_len)))
                }
            };
            return Ok(Self::Cidr {
                network,
                prefix_len,
            });
        }

        if rule.contains('*') {
            if !rule
                .chars()
                .all(|c| c.is_ascii_hexdigit() || matches!(c, '.' | ':' | '*'))
            {
                return Err(invalid("wildcard may only contain hex digits, '.', ':' and '*'"));
            }
            return Ok(Self::Wildcard {
                pattern: rule.to_ascii_lowercase(),
            });
        }

        let ip: IpAddr = rule.parse().map_err(|_| invalid("not an IP address"))?;
        Ok(Self::Exact {
            ip: normalize_ip(ip),
        })
    }

    /// Whether `ip` (already normalised) falls under this rule.
    #[must_use]
    pub fn matches(&self, ip: IpAddr) -> bool {
        match self {
            Self::Exact { ip: rule_ip } => *rule_ip == ip,
            Self::Cidr {
                network,
                prefix_len,
            } => match (network, ip) {
                (IpAddr::V4(net), IpAddr::V4(addr)) => {
                    mask_v4(addr, *prefix_len) == u32::from(*net)
                }
                (IpAddr::V6(net), IpAddr::V6(addr)) => {
                    mask_v6(addr, *prefix_len) == u128::from(*net)
                }
                _ => false,
            },
            Self::Wildcard { pattern } => glob_match::glob_match(pattern, &ip.to_string()),
        }
    }
}

/// An ordered list of rules. First match wins.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Whitelist {
    rules: Vec<IpRule>,
}

impl Whitelist {
    /// Parse every rule, failing on the first bad one. Blank entries are
    /// ignored.
    ///
    /// # Errors
    ///
    /// Returns the first [`WhitelistError::InvalidRule`].
    pub fn parse<S: AsRef<str>>(rules: &[S]) -> Result<Self, WhitelistError> {
        let rules = rules
            .iter()
            .map(AsRef::as_ref)
            .filter(|r| !r.trim().is_empty())
            .map(IpRule::parse)
            .collect::<Result<_, _>>()?;
        Ok(Self { rules })
    }

    /// Parse every rule, logging and skipping the bad ones.
    #[must_use]
    pub fn parse_lenient<S: AsRef<str>>(rules: &[S]) -> Self {
        let rules = rules
            .iter()
            .map(AsRef::as_ref)
            .filter(|r| !r.trim().is_empty())
            .filter_map(|r| match IpRule::parse(r) {
                Ok(rule) => Some(rule),
                Err(e) => {
                    warn!(error = %e, "skipping invalid whitelist rule");
                    None
                }
            })
            .collect();
        Self { rules }
    }

    /// The first rule matching `ip`, if any.
    #[must_use]
    pub fn find_match(&self, ip: IpAddr) -> Option<&IpRule> {
        let ip = normalize_ip(ip);
        self.rules.iter().find(|rule| rule.matches(ip))
    }

    /// Whether `ip` may bypass login: a rule matches, or it is a loopback
    /// address and `trust_loopback` is set.
    #[must_use]
    pub fn is_trusted(&self, ip: IpAddr, trust_loopback: bool) -> bool {
        (trust_loopback && normalize_ip(ip).is_loopback()) || self.find_match(ip).is_some()
    }

    #[must_use]
    pub fn rules(&self) -> &[IpRule] {
        &self.rules
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

/// Determine the client address of a request.
///
/// Without `trust_proxy_headers` this is always the TCP peer. With it, the
/// first parseable `X-Forwarded-For` entry wins, then `X-Real-IP`, then the
/// peer.
#[must_use]
pub fn resolve_client_ip(
    peer: IpAddr,
    forwarded_for: Option<&str>,
    real_ip: Option<&str>,
    trust_proxy_headers: bool,
) -> IpAddr {
    if !trust_proxy_headers {
        return normalize_ip(peer);
    }
    let from_forwarded = forwarded_for.and_then(|v| {
        v.split(',')
            .map(str::trim)
            .find_map(|s| s.parse::<IpAddr>().ok())
    });
    let from_real = || real_ip.and_then(|v| v.trim().parse::<IpAddr>().ok());
    normalize_ip(from_forwarded.or_else(from_real).unwrap_or(peer))
}
