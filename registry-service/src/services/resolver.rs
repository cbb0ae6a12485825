use async_trait::async_trait;
use std::collections::HashSet;

/// Decides whether a repository host is reachable by name.
#[async_trait]
pub trait HostResolver: Send + Sync {
    async fn resolves(&self, host: &str) -> bool;
}

/// Resolves through the system resolver.
pub struct DnsResolver;

#[async_trait]
impl HostResolver for DnsResolver {
    async fn resolves(&self, host: &str) -> bool {
        match tokio::net::lookup_host((host, 443)).await {
            Ok(mut addrs) => addrs.next().is_some(),
            Err(e) => {
                tracing::debug!(host = %host, error = %e, "Host lookup failed");
                false
            }
        }
    }
}

/// Fixed answer set. `accept_all` is used when host checks are disabled.
pub struct StaticResolver {
    known: Option<HashSet<String>>,
}

impl StaticResolver {
    pub fn accept_all() -> Self {
        Self { known: None }
    }

    pub fn with_hosts<I, S>(hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            known: Some(hosts.into_iter().map(|h| h.into().to_lowercase()).collect()),
        }
    }
}

#[async_trait]
impl HostResolver for StaticResolver {
    async fn resolves(&self, host: &str) -> bool {
        match &self.known {
            None => true,
            Some(known) => known.contains(&host.to_lowercase()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn static_resolver_matches_case_insensitively() {
        let resolver = StaticResolver::with_hosts(["GitHub.com"]);
        assert!(resolver.resolves("github.com").await);
        assert!(!resolver.resolves("gitlab.com").await);
        assert!(StaticResolver::accept_all().resolves("anything.invalid").await);
    }

    #[tokio::test]
    async fn dns_resolver_accepts_ip_literals() {
        assert!(DnsResolver.resolves("127.0.0.1").await);
    }
}
