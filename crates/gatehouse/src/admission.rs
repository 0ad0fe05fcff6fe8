//! IP blacklist admission, run once per accepted connection.
//!
//! Three sources of patterns are consulted, in order:
//!
//! 1. the static list from [`ConnectorConfig::blacklist`](crate::ConnectorConfig),
//! 2. the dynamic list installed with `set_blacklist`,
//! 3. the [`BlacklistProvider`], if one is configured.
//!
//! A match in the first two rejects without asking the provider. The
//! provider fails open: if it errors or returns a pattern that is not a
//! valid regular expression, the connection is admitted.

use std::net::IpAddr;
use std::sync::Arc;

use parking_lot::RwLock;
use regex::Regex;

use crate::{AdmissionError, BlacklistProvider};

/// The admission decision for one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Accepted,
    Rejected,
}

/// Decides whether a client IP may connect.
pub struct AdmissionFilter {
    static_list: Vec<Regex>,
    dynamic: RwLock<Vec<Regex>>,
    provider: Option<Arc<dyn BlacklistProvider>>,
}

impl AdmissionFilter {
    /// Builds a filter from the static blacklist and an optional provider.
    ///
    /// # Errors
    /// [`AdmissionError::Pattern`] if a static pattern does not compile.
    pub fn new(
        static_patterns: &[String],
        provider: Option<Arc<dyn BlacklistProvider>>,
    ) -> Result<Self, AdmissionError> {
        Ok(Self {
            static_list: compile(static_patterns)?,
            dynamic: RwLock::new(Vec::new()),
            provider,
        })
    }

    /// Replaces the dynamic blacklist.
    ///
    /// # Errors
    /// [`AdmissionError::Pattern`] if any pattern does not compile; the
    /// previous list then stays in place.
    pub fn set_blacklist(&self, patterns: &[String]) -> Result<(), AdmissionError> {
        let compiled = compile(patterns)?;
        tracing::info!(count = compiled.len(), "dynamic blacklist updated");
        *self.dynamic.write() = compiled;
        Ok(())
    }

    /// Checks `ip` against every blacklist.
    pub async fn admit(&self, ip: IpAddr) -> Admission {
        let ip = normalize(ip).to_string();

        let listed = matches_any(&self.static_list, &ip) || {
            let dynamic = self.dynamic.read();
            matches_any(&dynamic, &ip)
        };
        if listed {
            tracing::warn!(%ip, "client ip is blacklisted");
            return Admission::Rejected;
        }

        let Some(provider) = &self.provider else {
            return Admission::Accepted;
        };

        let patterns = match provider.fetch().await {
            Ok(patterns) => patterns,
            Err(e) => {
                tracing::warn!(%ip, error = %e, "blacklist provider failed, admitting client");
                return Admission::Accepted;
            }
        };

        match compile(&patterns) {
            Ok(list) if matches_any(&list, &ip) => {
                tracing::warn!(%ip, "client ip is blacklisted by provider");
                Admission::Rejected
            }
            Ok(_) => Admission::Accepted,
            Err(e) => {
                tracing::warn!(%ip, error = %e, "provider blacklist is malformed, admitting client");
                Admission::Accepted
            }
        }
    }
}

/// IPv4 clients on a dual-stack listener show up as `::ffff:a.b.c.d`;
/// patterns are written against the plain IPv4 form.
fn normalize(ip: IpAddr) -> IpAddr {
    match ip {
        IpAddr::V6(v6) => v6
            .to_ipv4_mapped()
            .map(IpAddr::V4)
            .unwrap_or(IpAddr::V6(v6)),
        v4 => v4,
    }
}

fn compile(patterns: &[String]) -> Result<Vec<Regex>, AdmissionError> {
    patterns
        .iter()
        .map(|pattern| {
            Regex::new(pattern).map_err(|source| AdmissionError::Pattern {
                pattern: pattern.clone(),
                source,
            })
        })
        .collect()
}

fn matches_any(list: &[Regex], ip: &str) -> bool {
    list.iter().any(|re| re.is_match(ip))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FixedProvider {
        result: Result<Vec<String>, String>,
        calls: AtomicUsize,
    }

    impl FixedProvider {
        fn new(result: Result<Vec<&str>, &str>) -> Arc<Self> {
            Arc::new(Self {
                result: result
                    .map(|list| list.into_iter().map(String::from).collect())
                    .map_err(String::from),
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl BlacklistProvider for FixedProvider {
        async fn fetch(&self) -> Result<Vec<String>, AdmissionError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.result.clone().map_err(AdmissionError::Provider)
        }
    }

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    fn patterns(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_admit_no_lists_accepts() {
        let filter = AdmissionFilter::new(&[], None).unwrap();
        assert_eq!(filter.admit(ip("10.0.0.1")).await, Admission::Accepted);
    }

    #[tokio::test]
    async fn test_admit_static_match_rejects() {
        let filter = AdmissionFilter::new(&patterns(&[r"^10\.0\."]), None).unwrap();
        assert_eq!(filter.admit(ip("10.0.0.1")).await, Admission::Rejected);
        assert_eq!(filter.admit(ip("10.1.0.1")).await, Admission::Accepted);
    }

    #[tokio::test]
    async fn test_admit_dynamic_match_skips_provider() {
        let provider = FixedProvider::new(Ok(vec![]));
        let filter = AdmissionFilter::new(&[], Some(provider.clone())).unwrap();
        filter.set_blacklist(&patterns(&[r"^192\.168\.1\.7$"])).unwrap();

        assert_eq!(filter.admit(ip("192.168.1.7")).await, Admission::Rejected);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_admit_dynamic_miss_still_asks_provider() {
        let provider = FixedProvider::new(Ok(vec![r"^172\.16\."]));
        let filter = AdmissionFilter::new(&[], Some(provider.clone())).unwrap();
        filter.set_blacklist(&patterns(&[r"^192\.168\."])).unwrap();

        assert_eq!(filter.admit(ip("172.16.0.4")).await, Admission::Rejected);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_admit_provider_error_fails_open() {
        let filter =
            AdmissionFilter::new(&[], Some(FixedProvider::new(Err("db down")))).unwrap();
        assert_eq!(filter.admit(ip("172.16.0.4")).await, Admission::Accepted);
    }

    #[tokio::test]
    async fn test_admit_malformed_provider_list_fails_open() {
        let provider = FixedProvider::new(Ok(vec![r"^172\.16\.", "(unclosed"]));
        let filter = AdmissionFilter::new(&[], Some(provider)).unwrap();
        assert_eq!(filter.admit(ip("172.16.0.4")).await, Admission::Accepted);
    }

    #[tokio::test]
    async fn test_admit_ipv4_mapped_address_matches_ipv4_pattern() {
        let filter = AdmissionFilter::new(&patterns(&[r"^127\.0\.0\.1$"]), None).unwrap();
        assert_eq!(filter.admit(ip("::ffff:127.0.0.1")).await, Admission::Rejected);
    }

    #[test]
    fn test_set_blacklist_invalid_pattern_keeps_previous_list() {
        let filter = AdmissionFilter::new(&[], None).unwrap();
        filter.set_blacklist(&patterns(&["^1\\."])).unwrap();

        let result = filter.set_blacklist(&patterns(&["[bad"]));

        assert!(matches!(result, Err(AdmissionError::Pattern { pattern, .. }) if pattern == "[bad"));
        assert_eq!(filter.dynamic.read().len(), 1);
    }

    #[test]
    fn test_new_invalid_static_pattern_errors() {
        assert!(AdmissionFilter::new(&patterns(&["(x"]), None).is_err());
    }
}
