//! SSRF (Server-Side Request Forgery) checks for image URLs.
//!
//! A URL is accepted only when every address its host stands for is public.
//! The address that passed the check is returned pinned in a
//! [`ResolvedTarget`] so the subsequent connection cannot be re-resolved to a
//! different host (DNS rebinding).

use async_trait::async_trait;
use picmirror_core::Rejection;
use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::lookup_host;

/// Host names refused outright, matched exactly or as a dotted suffix.
const DENIED_HOSTS: &[&str] = &[
    "localhost",
    "localhost.localdomain",
    "metadata",
    "metadata.google.internal",
    "metadata.goog",
    "instance-data",
    "169.254.169.254",
    "100.100.100.200",
    "fd00:ec2::254",
    "0.0.0.0",
    "127.0.0.1",
    "::1",
    "::",
];

/// Suffixes that only ever name internal hosts.
const DENIED_SUFFIXES: &[&str] = &[".localhost", ".internal", ".local", ".localdomain"];

/// A URL host that passed every check, with the address to connect to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedTarget {
    pub(crate) validated_ip: IpAddr,
    pub(crate) hostname: String,
    pub(crate) port: u16,
}

impl ResolvedTarget {
    pub fn validated_ip(&self) -> IpAddr {
        self.validated_ip
    }

    /// Host literal from the URL, still used for the Host header and TLS SNI.
    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

/// Name resolution seam so the resolver can run without a network.
#[async_trait]
pub trait HostResolver: Send + Sync {
    async fn lookup(&self, host: &str, port: u16) -> io::Result<Vec<IpAddr>>;
}

/// Resolver backed by the operating system, bounded by a timeout.
#[derive(Debug, Clone)]
pub struct SystemResolver {
    timeout: Duration,
}

impl SystemResolver {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl HostResolver for SystemResolver {
    async fn lookup(&self, host: &str, port: u16) -> io::Result<Vec<IpAddr>> {
        match tokio::time::timeout(self.timeout, lookup_host((host, port))).await {
            Ok(addrs) => Ok(addrs?.map(|addr| addr.ip()).collect()),
            Err(_) => Err(io::Error::new(
                io::ErrorKind::TimedOut,
                "DNS resolution timed out",
            )),
        }
    }
}

#[derive(Clone)]
pub struct UrlSafetyResolver {
    resolver: Arc<dyn HostResolver>,
}

impl UrlSafetyResolver {
    pub fn new(resolver: Arc<dyn HostResolver>) -> Self {
        Self { resolver }
    }

    pub fn system(dns_timeout: Duration) -> Self {
        Self::new(Arc::new(SystemResolver::new(dns_timeout)))
    }

    /// Check `raw` and pin the address to connect to.
    ///
    /// Every failure collapses into [`Rejection::UnsafeUrl`]; the reason is
    /// only logged.
    pub async fn resolve(&self, raw: &str) -> Result<ResolvedTarget, Rejection> {
        match self.check(raw).await {
            Ok(target) => Ok(target),
            Err(reason) => {
                tracing::warn!(url = %truncate(raw), reason, "Rejected unsafe URL");
                Err(Rejection::UnsafeUrl)
            }
        }
    }

    async fn check(&self, raw: &str) -> Result<ResolvedTarget, &'static str> {
        let url = reqwest::Url::parse(raw.trim()).map_err(|_| "unparseable URL")?;

        if url.scheme() != "http" && url.scheme() != "https" {
            return Err("scheme not allowed");
        }
        if !url.username().is_empty() || url.password().is_some() {
            return Err("credentials in URL");
        }

        let host = url
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or("missing host")?;
        let hostname = host
            .trim_start_matches('[')
            .trim_end_matches(']')
            .trim_end_matches('.')
            .to_ascii_lowercase();
        if hostname.is_empty() {
            return Err("missing host");
        }
        let port = url.port_or_known_default().ok_or("missing port")?;

        let literal = parse_ip_literal(&hostname);

        if is_denied_name(&hostname) || literal.is_some_and(|ip| is_denied_name(&ip.to_string())) {
            return Err("denylisted host");
        }

        let validated_ip = match literal {
            Some(ip) => {
                if is_disallowed_ip(&ip) {
                    return Err("literal address is internal");
                }
                ip
            }
            None => {
                let addrs = self.resolver.lookup(&hostname, port).await.map_err(|e| {
                    tracing::debug!(host = %hostname, error = %e, "DNS resolution failed");
                    "DNS resolution failed"
                })?;
                if addrs.is_empty() {
                    return Err("DNS returned no addresses");
                }
                if addrs.iter().any(is_disallowed_ip) {
                    return Err("host resolves to an internal address");
                }
                pick_preferred(&addrs).ok_or("DNS returned no addresses")?
            }
        };

        Ok(ResolvedTarget {
            validated_ip,
            hostname: host.trim_start_matches('[').trim_end_matches(']').to_string(),
            port,
        })
    }
}

/// IPv4 first, then IPv6.
fn pick_preferred(addrs: &[IpAddr]) -> Option<IpAddr> {
    addrs
        .iter()
        .find(|ip| ip.is_ipv4())
        .or_else(|| addrs.first())
        .copied()
}

/// Numeric hosts, including a bare 32-bit decimal form of an IPv4 address.
fn parse_ip_literal(host: &str) -> Option<IpAddr> {
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Some(ip);
    }
    if !host.is_empty() && host.bytes().all(|b| b.is_ascii_digit()) {
        return host.parse::<u32>().ok().map(|n| IpAddr::V4(Ipv4Addr::from(n)));
    }
    None
}

fn is_denied_name(host: &str) -> bool {
    DENIED_HOSTS
        .iter()
        .any(|name| host == *name || host.ends_with(&format!(".{}", name)))
        || DENIED_SUFFIXES.iter().any(|suffix| host.ends_with(suffix))
}

/// Private, loopback, link-local, multicast, shared and reserved ranges.
pub fn is_disallowed_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(ipv4) => {
            let octets = ipv4.octets();
            octets[0] == 10
                || (octets[0] == 172 && (16..=31).contains(&octets[1]))
                || (octets[0] == 192 && octets[1] == 168)
                || octets[0] == 127
                || (octets[0] == 169 && octets[1] == 254)
                || (octets[0] == 100 && (64..=127).contains(&octets[1]))
                || octets[0] >= 224
                || octets[0] == 0
        }
        IpAddr::V6(ipv6) => {
            if let Some(ipv4) = embedded_ipv4(ipv6) {
                return is_disallowed_ip(&IpAddr::V4(ipv4));
            }
            ipv6.is_loopback()
                || ipv6.is_unspecified()
                || ipv6.is_multicast()
                || is_ipv6_link_local(ipv6)
                || is_ipv6_unique_local(ipv6)
        }
    }
}

/// IPv4 address carried inside an IPv6 one: IPv4-mapped `::ffff:0:0/96`,
/// IPv4-compatible `::/96`, NAT64 `64:ff9b::/96` and 6to4 `2002::/16`.
fn embedded_ipv4(ip: &Ipv6Addr) -> Option<Ipv4Addr> {
    let s = ip.segments();
    let split = |hi: u16, lo: u16| {
        let [a, b] = hi.to_be_bytes();
        let [c, d] = lo.to_be_bytes();
        Ipv4Addr::new(a, b, c, d)
    };
    match s {
        [0, 0, 0, 0, 0, 0xffff, hi, lo]
        | [0, 0, 0, 0, 0, 0, hi, lo]
        | [0x64, 0xff9b, 0, 0, 0, 0, hi, lo] => Some(split(hi, lo)),
        [0x2002, hi, lo, ..] => Some(split(hi, lo)),
        _ => None,
    }
}

fn is_ipv6_link_local(ip: &Ipv6Addr) -> bool {
    ip.segments()[0] & 0xffc0 == 0xfe80
}

fn is_ipv6_unique_local(ip: &Ipv6Addr) -> bool {
    ip.segments()[0] & 0xfe00 == 0xfc00
}

fn truncate(raw: &str) -> &str {
    match raw.char_indices().nth(120) {
        Some((idx, _)) => &raw[..idx],
        None => raw,
    }
}
