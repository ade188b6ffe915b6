//! Outbound URL validation for alert delivery.
//!
//! Webhook URLs come from configuration but are still checked before every
//! request so a misconfigured receiver cannot point the monitor at internal
//! services.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use thiserror::Error;
use url::{Host, Url};

/// Reasons a URL is rejected.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GuardError {
    #[error("invalid URL: {0}")]
    Parse(String),
    #[error("unsupported scheme: {0}")]
    Scheme(String),
    #[error("URL has no host")]
    MissingHost,
    #[error("private or local address not allowed: {0}")]
    PrivateAddress(String),
}

/// Validates outbound URLs.
#[derive(Debug, Clone, Copy, Default)]
pub struct UrlGuard {
    allow_private: bool,
}

impl UrlGuard {
    pub fn new(allow_private: bool) -> Self {
        Self { allow_private }
    }

    /// Check that `raw` is an http(s) URL that may be contacted.
    pub fn validate(&self, raw: &str) -> Result<Url, GuardError> {
        let url = Url::parse(raw).map_err(|e| GuardError::Parse(e.to_string()))?;

        match url.scheme() {
            "http" | "https" => {}
            other => return Err(GuardError::Scheme(other.to_string())),
        }

        let host = url.host().ok_or(GuardError::MissingHost)?;
        if !self.allow_private {
            let blocked = match &host {
                Host::Domain(name) => is_local_name(name),
                Host::Ipv4(ip) => is_private_v4(ip),
                Host::Ipv6(ip) => is_private_v6(ip),
            };
            if blocked {
                return Err(GuardError::PrivateAddress(host.to_string()));
            }
        }

        Ok(url)
    }
}

fn is_local_name(name: &str) -> bool {
    let name = name.trim_end_matches('.').to_ascii_lowercase();
    if let Ok(ip) = name.parse::<IpAddr>() {
        return match ip {
            IpAddr::V4(v4) => is_private_v4(&v4),
            IpAddr::V6(v6) => is_private_v6(&v6),
        };
    }
    name == "localhost"
        || name.ends_with(".localhost")
        || name.ends_with(".local")
        || name.ends_with(".internal")
}

fn is_private_v4(ip: &Ipv4Addr) -> bool {
    ip.is_private()
        || ip.is_loopback()
        || ip.is_link_local()
        || ip.is_broadcast()
        || ip.is_unspecified()
        // Carrier-grade NAT, 100.64.0.0/10
        || (ip.octets()[0] == 100 && (ip.octets()[1] & 0xc0) == 64)
}

fn is_private_v6(ip: &Ipv6Addr) -> bool {
    if let Some(v4) = ip.to_ipv4_mapped() {
        return is_private_v4(&v4);
    }
    let first = ip.segments()[0];
    ip.is_loopback()
        || ip.is_unspecified()
        || ip.is_multicast()
        // Unique local fc00::/7 and link-local fe80::/10
        || (first & 0xfe00) == 0xfc00
        || (first & 0xffc0) == 0xfe80
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accepts_public_urls() {
        let guard = UrlGuard::default();
        assert!(guard.validate("https://hooks.example.com/abc").is_ok());
        assert!(guard.validate("http://93.184.216.34:8080/hook").is_ok());
    }

    #[test]
    fn test_rejects_private_and_local() {
        let guard = UrlGuard::default();
        for url in [
            "http://localhost/hook",
            "http://127.0.0.1:9000/hook",
            "http://10.0.0.5/hook",
            "http://192.168.1.1/hook",
            "http://169.254.169.254/latest/meta-data",
            "http://[::1]/hook",
            "http://[fd00::1]/hook",
            "http://[::ffff:127.0.0.1]/hook",
            "http://printer.local/hook",
            "http://100.64.1.1/hook",
        ] {
            assert!(
                matches!(guard.validate(url), Err(GuardError::PrivateAddress(_))),
                "{} should be rejected",
                url
            );
        }
    }

    #[test]
    fn test_rejects_bad_scheme_and_garbage() {
        let guard = UrlGuard::default();
        assert!(matches!(guard.validate("ftp://example.com/x"), Err(GuardError::Scheme(_))));
        assert!(matches!(guard.validate("file:///etc/passwd"), Err(GuardError::Scheme(_))));
        assert!(matches!(guard.validate("not a url"), Err(GuardError::Parse(_))));
    }

    #[test]
    fn test_allow_private() {
        let guard = UrlGuard::new(true);
        assert!(guard.validate("http://127.0.0.1:9000/hook").is_ok());
        assert!(guard.validate("ftp://127.0.0.1/hook").is_err());
    }
}
