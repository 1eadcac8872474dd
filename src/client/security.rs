//! Pre-flight URL checks

use url::Url;

/// Result of a security check
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecurityVerdict {
    pub valid: bool,
    pub reason: Option<String>,
}

impl SecurityVerdict {
    pub fn allow() -> Self {
        Self { valid: true, reason: None }
    }

    pub fn deny(reason: impl Into<String>) -> Self {
        Self {
            valid: false,
            reason: Some(reason.into()),
        }
    }
}

/// Checked against every URL before a request leaves the process
pub trait SecurityValidator: Send + Sync {
    fn validate(&self, url: &Url) -> SecurityVerdict;
}

/// Default policy: http(s) only, optionally https only for remote hosts
#[derive(Debug, Clone, Default)]
pub struct UrlSecurityPolicy {
    pub require_https: bool,
}

impl UrlSecurityPolicy {
    pub fn new(require_https: bool) -> Self {
        Self { require_https }
    }
}

impl SecurityValidator for UrlSecurityPolicy {
    fn validate(&self, url: &Url) -> SecurityVerdict {
        match url.scheme() {
            "https" => SecurityVerdict::allow(),
            "http" => {
                if self.require_https && !url.host_str().is_some_and(is_local_host) {
                    SecurityVerdict::deny("HTTPS is required for remote hosts")
                } else {
                    SecurityVerdict::allow()
                }
            }
            other => SecurityVerdict::deny(format!("Unsupported protocol: {}", other)),
        }
    }
}

/// Loopback names a local mock server would listen on
pub fn is_local_host(host: &str) -> bool {
    matches!(host, "localhost" | "127.0.0.1" | "[::1]" | "::1")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check(policy: &UrlSecurityPolicy, url: &str) -> SecurityVerdict {
        policy.validate(&Url::parse(url).unwrap())
    }

    #[test]
    fn test_scheme_allow_list() {
        let policy = UrlSecurityPolicy::default();
        assert!(check(&policy, "http://example.com").valid);
        assert!(check(&policy, "https://example.com").valid);

        let verdict = check(&policy, "ftp://example.com/file");
        assert!(!verdict.valid);
        assert_eq!(verdict.reason.as_deref(), Some("Unsupported protocol: ftp"));
    }

    #[test]
    fn test_https_only_keeps_localhost() {
        let policy = UrlSecurityPolicy::new(true);
        assert!(!check(&policy, "http://example.com").valid);
        assert!(check(&policy, "http://localhost:3000/api").valid);
        assert!(check(&policy, "http://127.0.0.1:8080").valid);
        assert!(check(&policy, "https://example.com").valid);
    }
}
