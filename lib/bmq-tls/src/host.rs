/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::fmt;
use std::net::{IpAddr, Ipv6Addr};
use std::str::FromStr;

use anyhow::anyhow;

/// Peer host identity used for SNI and endpoint identity checks.
///
/// Numeric addresses are kept apart from symbolic names: only the latter are
/// ever sent in the SNI extension, while identity checking applies to both.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub enum Host {
    Ip(IpAddr),
    Domain(String),
}

impl fmt::Display for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Host::Ip(ip) => write!(f, "{ip}"),
            Host::Domain(domain) => write!(f, "{domain}"),
        }
    }
}

impl FromStr for Host {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(anyhow!("empty host string"));
        }
        if let Some(inner) = s.strip_prefix('[') {
            let Some(inner) = inner.strip_suffix(']') else {
                return Err(anyhow!("unbalanced brackets in host string"));
            };
            let ip6 = Ipv6Addr::from_str(inner)
                .map_err(|e| anyhow!("invalid ipv6 address in brackets: {e}"))?;
            return Ok(Host::Ip(IpAddr::V6(ip6)));
        }
        if let Ok(ip) = IpAddr::from_str(s) {
            return Ok(Host::Ip(ip));
        }
        Ok(Host::Domain(s.to_string()))
    }
}

/// Split a broker endpoint of the form `host[:port]` into the host identity
/// and the optional port.
///
/// The port suffix is stripped before the hostname is used for SNI or
/// identity checks. Bare IPv6 literals without brackets are left untouched.
pub fn split_endpoint(endpoint: &str) -> anyhow::Result<(Host, Option<u16>)> {
    if let Some((head, tail)) = endpoint.rsplit_once(':')
        && !head.is_empty()
        && (!head.contains(':') || head.starts_with('['))
        && let Ok(port) = u16::from_str(tail)
    {
        let host = Host::from_str(head)?;
        return Ok((host, Some(port)));
    }
    let host = Host::from_str(endpoint)?;
    Ok((host, None))
}
