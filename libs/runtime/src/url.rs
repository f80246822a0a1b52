//! Canonical URLs
//!
//! Runtimes, nodes and virtual nodes share one address format:
//! `<transport_tag>://<host>:<port>/<name>`. The name segment disambiguates
//! entries within a host:port pair.

use crate::{Result, RuntimeError};
use async_trait::async_trait;
use percent_encoding::percent_decode_str;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

/// Characters a name segment may not contain
const RESERVED: &[char] = &['/', '?', '#', '%', '@', ':', '[', ']', '\\'];

/// Address of a runtime, node or virtual node
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RuntimeUrl {
    transport_tag: String,
    host: String,
    port: u16,
    name: String,
}

impl RuntimeUrl {
    /// Build a URL from its parts
    pub fn new(
        transport_tag: impl Into<String>,
        host: impl Into<String>,
        port: u16,
        name: impl Into<String>,
    ) -> Result<Self> {
        let transport_tag = transport_tag.into().to_ascii_lowercase();
        let host = host.into().to_ascii_lowercase();
        let name = name.into();

        let display = format!("{}://{}:{}/{}", transport_tag, host, port, name);
        validate_tag(&transport_tag).map_err(|reason| RuntimeError::invalid_url(&display, reason))?;
        validate_host(&host).map_err(|reason| RuntimeError::invalid_url(&display, reason))?;
        validate_name(&name).map_err(|reason| RuntimeError::invalid_url(&display, reason))?;

        Ok(Self {
            transport_tag,
            host,
            port,
            name,
        })
    }

    /// Parse a canonical URL string
    pub fn parse(input: &str) -> Result<Self> {
        let parsed = url::Url::parse(input)
            .map_err(|e| RuntimeError::invalid_url(input, e.to_string()))?;

        let host = parsed
            .host_str()
            .ok_or_else(|| RuntimeError::invalid_url(input, "missing host"))?;
        let port = parsed
            .port_or_known_default()
            .ok_or_else(|| RuntimeError::invalid_url(input, "missing port"))?;
        if parsed.query().is_some() || parsed.fragment().is_some() {
            return Err(RuntimeError::invalid_url(input, "query and fragment not allowed"));
        }
        // `url` percent-encodes non-ASCII and some punctuation in the path
        let name = percent_decode_str(parsed.path().trim_start_matches('/'))
            .decode_utf8()
            .map_err(|_| RuntimeError::invalid_url(input, "name is not valid UTF-8"))?;

        Self::new(parsed.scheme(), host, port, name.as_ref())
    }

    pub fn transport_tag(&self) -> &str {
        &self.transport_tag
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Name segment
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Same transport, host and port, different name
    pub fn with_name(&self, name: impl Into<String>) -> Result<Self> {
        Self::new(self.transport_tag.clone(), self.host.clone(), self.port, name)
    }

    /// `host:port`
    pub fn authority(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// True when both URLs point at the same naming facility endpoint
    pub fn same_endpoint(&self, other: &RuntimeUrl) -> bool {
        self.transport_tag == other.transport_tag
            && self.host == other.host
            && self.port == other.port
    }
}

fn validate_tag(tag: &str) -> std::result::Result<(), &'static str> {
    let mut chars = tag.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() => {}
        _ => return Err("transport tag must start with a letter"),
    }
    if chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.')) {
        Ok(())
    } else {
        Err("transport tag contains invalid characters")
    }
}

/// Host names are ASCII labels; IPv6 literals keep their brackets
fn validate_host(host: &str) -> std::result::Result<(), &'static str> {
    if host.is_empty() {
        return Err("empty host");
    }
    if let Some(literal) = host.strip_prefix('[').and_then(|h| h.strip_suffix(']')) {
        return literal
            .parse::<std::net::Ipv6Addr>()
            .map(|_| ())
            .map_err(|_| "invalid IPv6 literal");
    }
    if host.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '.')) {
        Ok(())
    } else {
        Err("host contains invalid characters")
    }
}

/// Validate a node, virtual node or runtime name
pub fn validate_name(name: &str) -> std::result::Result<(), &'static str> {
    if name.is_empty() {
        return Err("empty name");
    }
    if name == "." || name == ".." {
        return Err("relative path names are not allowed");
    }
    if name.chars().any(|c| c.is_whitespace() || c.is_control() || RESERVED.contains(&c)) {
        return Err("name contains reserved characters");
    }
    Ok(())
}

impl fmt::Display for RuntimeUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}://{}:{}/{}",
            self.transport_tag, self.host, self.port, self.name
        )
    }
}

impl FromStr for RuntimeUrl {
    type Err = RuntimeError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for RuntimeUrl {
    type Error = RuntimeError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<RuntimeUrl> for String {
    fn from(url: RuntimeUrl) -> Self {
        url.to_string()
    }
}

/// Resolves host names before they are published in the naming facility
#[async_trait]
pub trait HostResolver: Send + Sync {
    async fn resolve(&self, host: &str) -> Result<IpAddr>;
}

/// Resolver backed by the operating system
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemResolver;

#[async_trait]
impl HostResolver for SystemResolver {
    async fn resolve(&self, host: &str) -> Result<IpAddr> {
        if let Ok(addr) = host.trim_matches(|c: char| c == '[' || c == ']').parse::<IpAddr>() {
            return Ok(addr);
        }

        let mut addrs = tokio::net::lookup_host((host, 0))
            .await
            .map_err(|e| RuntimeError::host_resolution(host, e.to_string()))?;

        addrs
            .next()
            .map(|addr| addr.ip())
            .ok_or_else(|| RuntimeError::host_resolution(host, "no addresses returned"))
    }
}

/// Resolver with a fixed host table, for closed deployments and tests
#[derive(Debug, Default, Clone)]
pub struct StaticResolver {
    hosts: HashMap<String, IpAddr>,
}

impl StaticResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_host(mut self, host: impl Into<String>, addr: IpAddr) -> Self {
        self.hosts.insert(host.into().to_ascii_lowercase(), addr);
        self
    }
}

#[async_trait]
impl HostResolver for StaticResolver {
    async fn resolve(&self, host: &str) -> Result<IpAddr> {
        self.hosts
            .get(&host.to_ascii_lowercase())
            .copied()
            .ok_or_else(|| RuntimeError::host_resolution(host, "host not in static table"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::net::Ipv4Addr;

    #[test]
    fn test_parse_canonical_url() {
        let url = RuntimeUrl::parse("pa://node-a.example:1099/worker-1").unwrap();
        assert_eq!(url.transport_tag(), "pa");
        assert_eq!(url.host(), "node-a.example");
        assert_eq!(url.port(), 1099);
        assert_eq!(url.name(), "worker-1");
        assert_eq!(url.to_string(), "pa://node-a.example:1099/worker-1");
    }

    #[test]
    fn test_parse_rejects_missing_parts() {
        assert!(RuntimeUrl::parse("pa://host/worker").is_err());
        assert!(RuntimeUrl::parse("pa://host:1099/").is_err());
        assert!(RuntimeUrl::parse("worker-1").is_err());
        assert!(RuntimeUrl::parse("pa://host:1099/a/b").is_err());
    }

    #[test]
    fn test_non_ascii_name_survives_round_trip() {
        let url = RuntimeUrl::new("pa", "localhost", 1099, "wörker").unwrap();
        assert_eq!(url.to_string(), "pa://localhost:1099/wörker");

        let parsed = RuntimeUrl::parse(&url.to_string()).unwrap();
        assert_eq!(parsed.name(), "wörker");
        assert_eq!(parsed, url);

        // an encoded reserved character is still reserved
        assert!(RuntimeUrl::parse("pa://localhost:1099/a%2Fb").is_err());
    }

    #[test]
    fn test_host_must_be_ascii() {
        assert!(RuntimeUrl::new("pa", "hôte", 1099, "worker").is_err());
        assert!(RuntimeUrl::new("pa", "a/b", 1099, "worker").is_err());

        let v6 = RuntimeUrl::new("pa", "[::1]", 1099, "worker").unwrap();
        assert_eq!(RuntimeUrl::parse(&v6.to_string()).unwrap(), v6);
    }

    #[test]
    fn test_with_name_keeps_endpoint() {
        let runtime = RuntimeUrl::new("pa", "localhost", 1099, "PA_JVM1").unwrap();
        let node = runtime.with_name("worker-1").unwrap();
        assert!(node.same_endpoint(&runtime));
        assert_eq!(node.authority(), "localhost:1099");
    }

    #[test]
    fn test_serde_as_string() {
        let url = RuntimeUrl::new("pa", "localhost", 1099, "vg-A").unwrap();
        let json = serde_json::to_string(&url).unwrap();
        assert_eq!(json, "\"pa://localhost:1099/vg-A\"");
        let back: RuntimeUrl = serde_json::from_str(&json).unwrap();
        assert_eq!(back, url);
    }

    #[tokio::test]
    async fn test_static_resolver() {
        let resolver =
            StaticResolver::new().with_host("LocalHost", IpAddr::V4(Ipv4Addr::LOCALHOST));
        assert!(resolver.resolve("localhost").await.is_ok());
        let err = resolver.resolve("elsewhere").await.unwrap_err();
        assert!(matches!(err, RuntimeError::HostResolution { .. }));
    }

    #[tokio::test]
    async fn test_system_resolver_accepts_literals() {
        let addr = SystemResolver.resolve("10.1.2.3").await.unwrap();
        assert_eq!(addr, IpAddr::V4(Ipv4Addr::new(10, 1, 2, 3)));
    }

    proptest! {
        #[test]
        fn parse_format_round_trip(
            tag in "pa[a-z0-9]{0,4}",
            host in "[a-z][a-z0-9-]{0,12}",
            port in 1u16..,
            name in r#"[A-Za-z0-9_.~!$&'()*+,;=<>{}|^"`äöüé漢-]{1,16}"#,
        ) {
            prop_assume!(name != "." && name != "..");
            let url = RuntimeUrl::new(tag, host, port, name).unwrap();
            let parsed = RuntimeUrl::parse(&url.to_string()).unwrap();
            prop_assert_eq!(parsed, url);
        }
    }
}
