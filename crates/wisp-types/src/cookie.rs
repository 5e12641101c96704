//! Response cookies queued by a session.
//!
//! Cookies are never applied in-process; the transport writes them as
//! response headers when the turn is flushed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cookie {
    pub name: String,
    pub value: String,
    /// Absolute expiry. `None` means a session cookie.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default)]
    pub secure: bool,
    #[serde(default)]
    pub http_only: bool,
}

impl Cookie {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            expires: None,
            domain: None,
            path: None,
            secure: false,
            http_only: false,
        }
    }

    /// Builds the cookie that instructs the client to drop `name` for the
    /// given domain and path (RFC 6265 §5.3 matching).
    pub fn removal(name: impl Into<String>, domain: Option<String>, path: Option<String>) -> Self {
        Self {
            expires: Some(DateTime::<Utc>::UNIX_EPOCH),
            domain,
            path,
            ..Self::new(name, "deleted")
        }
    }

    #[must_use]
    pub fn with_expires(mut self, expires: DateTime<Utc>) -> Self {
        self.expires = Some(expires);
        self
    }

    #[must_use]
    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    #[must_use]
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    #[must_use]
    pub fn secure(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }

    /// Returns whether this cookie deletes a previously set one.
    pub fn is_removal(&self) -> bool {
        self.expires.is_some_and(|at| at <= DateTime::<Utc>::UNIX_EPOCH)
    }

    /// Returns whether this cookie has the same identity as `(name, domain, path)`.
    pub fn matches(&self, name: &str, domain: Option<&str>, path: Option<&str>) -> bool {
        self.name == name && self.domain.as_deref() == domain && self.path.as_deref() == path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_removal_cookie_is_expired() {
        let cookie = Cookie::removal("user", None, Some("/app".to_string()));
        assert!(cookie.is_removal());
        assert!(cookie.matches("user", None, Some("/app")));
        assert!(!cookie.matches("user", None, None));
    }

    #[test]
    fn test_plain_cookie_is_not_removal() {
        let cookie = Cookie::new("theme", "dark").with_path("/");
        assert!(!cookie.is_removal());
    }
}
