//! Cookies queued for the next response.
//!
//! Nothing is applied in-process: cookies wait here until the transport
//! writes them as response headers.

use std::collections::HashMap;

use wisp_types::Cookie;

#[derive(Debug, Default)]
pub struct CookieJar {
    pending: Vec<Cookie>,
    /// Cookies set during the session, by name.
    added: HashMap<String, Cookie>,
}

impl CookieJar {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues `cookie`, replacing a queued cookie with the same identity.
    pub fn set(&mut self, cookie: Cookie) {
        self.queue(cookie.clone());
        self.added.insert(cookie.name.clone(), cookie);
    }

    /// Queues an expired cookie matching `(name, domain, path)`.
    pub fn remove(&mut self, name: &str, domain: Option<&str>, path: Option<&str>) {
        self.added.remove(name);
        self.queue(Cookie::removal(
            name,
            domain.map(str::to_string),
            path.map(str::to_string),
        ));
    }

    fn queue(&mut self, cookie: Cookie) {
        self.pending.retain(|c| {
            !c.matches(&cookie.name, cookie.domain.as_deref(), cookie.path.as_deref())
        });
        self.pending.push(cookie);
    }

    /// Returns the value of a cookie set during this session.
    pub fn added(&self, name: &str) -> Option<&str> {
        self.added.get(name).map(|c| c.value.as_str())
    }

    /// Takes the cookies to send with the next response.
    pub fn drain(&mut self) -> Vec<Cookie> {
        std::mem::take(&mut self.pending)
    }
}
