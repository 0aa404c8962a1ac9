use super::classifier::{DestinationClassifier, parse_ip_literal};
use crate::config::PolicyConfig;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

static HOST_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^https?://(\[[0-9a-f:.]+\]|[\w.\-@]+)").expect("host pattern is valid")
});

/// What to do with a destination whose address could not be determined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FailPolicy {
    #[default]
    Open,
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Unclassified {
    NoHost,
    LookupFailed(String),
    NoAddresses,
    TimedOut(Duration),
}

impl std::fmt::Display for Unclassified {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoHost => write!(f, "no host in url"),
            Self::LookupFailed(e) => write!(f, "lookup failed: {}", e),
            Self::NoAddresses => write!(f, "lookup returned no addresses"),
            Self::TimedOut(d) => write!(f, "lookup timed out after {}ms", d.as_millis()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Destination {
    Private(IpAddr),
    Public,
    Unclassified(Unclassified),
}

#[async_trait]
pub trait HostResolver: Send + Sync {
    async fn lookup(&self, host: &str) -> std::io::Result<Vec<IpAddr>>;
}

/// Resolves through the operating system's resolver.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemResolver;

#[async_trait]
impl HostResolver for SystemResolver {
    async fn lookup(&self, host: &str) -> std::io::Result<Vec<IpAddr>> {
        let addrs = tokio::net::lookup_host((host, 0)).await?;
        Ok(addrs.map(|a| a.ip()).collect())
    }
}

/// Fixed host table. Unknown hosts fail to resolve.
#[derive(Debug, Default, Clone)]
pub struct StaticResolver {
    hosts: HashMap<String, Vec<IpAddr>>,
}

impl StaticResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_host(mut self, host: &str, addrs: &[IpAddr]) -> Self {
        self.hosts.insert(host.to_ascii_lowercase(), addrs.to_vec());
        self
    }
}

#[async_trait]
impl HostResolver for StaticResolver {
    async fn lookup(&self, host: &str) -> std::io::Result<Vec<IpAddr>> {
        self.hosts
            .get(&host.to_ascii_lowercase())
            .cloned()
            .ok_or_else(|| {
                std::io::Error::new(std::io::ErrorKind::NotFound, format!("unknown host {host}"))
            })
    }
}

/// Extracts the host token of an http(s) URL, dropping any userinfo prefix.
pub fn extract_host(url: &str) -> Option<&str> {
    let token = HOST_PATTERN.captures(url)?.get(1)?.as_str();
    let host = token.rsplit('@').next().unwrap_or(token);
    (!host.is_empty()).then_some(host)
}

#[derive(Clone)]
pub struct PrivateNetworkResolver {
    classifier: DestinationClassifier,
    resolver: Arc<dyn HostResolver>,
    timeout: Duration,
    fail_policy: FailPolicy,
}

impl PrivateNetworkResolver {
    pub fn new(config: &PolicyConfig, resolver: Arc<dyn HostResolver>) -> Self {
        Self {
            classifier: DestinationClassifier::new(config.address_scope),
            resolver,
            timeout: Duration::from_millis(config.resolve_timeout_ms),
            fail_policy: config.fail_policy,
        }
    }

    pub async fn classify(&self, url: &str) -> Destination {
        let Some(host) = extract_host(url) else {
            return Destination::Unclassified(Unclassified::NoHost);
        };

        if let Some(ip) = parse_ip_literal(host) {
            return if self.classifier.is_private_ip(ip) {
                Destination::Private(ip)
            } else {
                Destination::Public
            };
        }

        let addrs = match tokio::time::timeout(self.timeout, self.resolver.lookup(host)).await {
            Ok(Ok(addrs)) => addrs,
            Ok(Err(e)) => {
                return Destination::Unclassified(Unclassified::LookupFailed(e.to_string()));
            }
            Err(_) => return Destination::Unclassified(Unclassified::TimedOut(self.timeout)),
        };

        if addrs.is_empty() {
            return Destination::Unclassified(Unclassified::NoAddresses);
        }

        match addrs.into_iter().find(|ip| self.classifier.is_private_ip(*ip)) {
            Some(ip) => Destination::Private(ip),
            None => Destination::Public,
        }
    }

    /// Returns true when the request must not leave: the host resolves into a
    /// private range, or it cannot be classified and the fail policy is closed.
    pub async fn is_private_destination(&self, url: &str) -> bool {
        match self.classify(url).await {
            Destination::Private(ip) => {
                tracing::debug!("{} resolves to private address {}", url, ip);
                true
            }
            Destination::Public => false,
            Destination::Unclassified(reason) => {
                tracing::debug!("Cannot classify {}: {} ({:?})", url, reason, self.fail_policy);
                self.fail_policy == FailPolicy::Closed
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::AddressScope;

    struct HangingResolver;

    #[async_trait]
    impl HostResolver for HangingResolver {
        async fn lookup(&self, _host: &str) -> std::io::Result<Vec<IpAddr>> {
            std::future::pending().await
        }
    }

    fn policy(fail_policy: FailPolicy) -> PolicyConfig {
        PolicyConfig {
            address_scope: AddressScope::Rfc1918,
            fail_policy,
            resolve_timeout_ms: 500,
        }
    }

    fn resolver_with(table: StaticResolver, fail_policy: FailPolicy) -> PrivateNetworkResolver {
        PrivateNetworkResolver::new(&policy(fail_policy), Arc::new(table))
    }

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn test_extract_host() {
        assert_eq!(extract_host("http://example.com/ad.js"), Some("example.com"));
        assert_eq!(extract_host("https://cdn.ads-1.net:8443/x"), Some("cdn.ads-1.net"));
        assert_eq!(extract_host("HTTP://Example.com"), Some("Example.com"));
        assert_eq!(extract_host("http://user@10.0.0.5/"), Some("10.0.0.5"));
        assert_eq!(extract_host("http://[::1]:8080/"), Some("[::1]"));
        assert_eq!(extract_host("data:text/html,hi"), None);
        assert_eq!(extract_host("ftp://example.com"), None);
        assert_eq!(extract_host("http://"), None);
        assert_eq!(extract_host("http://user@/"), None);
    }

    #[tokio::test]
    async fn test_literal_ip_skips_lookup() {
        let r = resolver_with(StaticResolver::new(), FailPolicy::Open);
        assert!(r.is_private_destination("http://10.0.0.5/beacon").await);
        assert!(r.is_private_destination("http://127.0.0.1/ad.html").await);
        assert!(!r.is_private_destination("http://8.8.8.8/").await);
    }

    #[tokio::test]
    async fn test_hostname_resolving_to_any_private_address() {
        let table = StaticResolver::new()
            .with_host("internal.corp", &[ip("93.184.216.34"), ip("192.168.1.10")])
            .with_host("example.com", &[ip("93.184.216.34")]);
        let r = resolver_with(table, FailPolicy::Open);

        assert!(r.is_private_destination("https://internal.corp/api").await);
        assert!(!r.is_private_destination("https://example.com/").await);
        assert_eq!(
            r.classify("https://internal.corp/").await,
            Destination::Private(ip("192.168.1.10"))
        );
    }

    #[tokio::test]
    async fn test_unresolvable_host_fails_open_by_default() {
        let r = resolver_with(StaticResolver::new(), FailPolicy::Open);
        assert!(!r.is_private_destination("http://nowhere.invalid/").await);
        assert!(!r.is_private_destination("not a url").await);
    }

    #[tokio::test]
    async fn test_unresolvable_host_blocked_when_fail_closed() {
        let r = resolver_with(StaticResolver::new(), FailPolicy::Closed);
        assert!(r.is_private_destination("http://nowhere.invalid/").await);
        assert!(r.is_private_destination("not a url").await);
    }

    #[tokio::test]
    async fn test_empty_resolution_is_unclassified() {
        let table = StaticResolver::new().with_host("empty.test", &[]);
        let r = resolver_with(table, FailPolicy::Open);
        assert_eq!(
            r.classify("http://empty.test/").await,
            Destination::Unclassified(Unclassified::NoAddresses)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_lookup_timeout_applies_fail_policy() {
        let open = PrivateNetworkResolver::new(&policy(FailPolicy::Open), Arc::new(HangingResolver));
        assert_eq!(
            open.classify("http://slow.test/").await,
            Destination::Unclassified(Unclassified::TimedOut(Duration::from_millis(500)))
        );
        assert!(!open.is_private_destination("http://slow.test/").await);

        let closed =
            PrivateNetworkResolver::new(&policy(FailPolicy::Closed), Arc::new(HangingResolver));
        assert!(closed.is_private_destination("http://slow.test/").await);
    }
}
