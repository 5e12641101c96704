//! Internal (virtual) path tracking.
//!
//! The router keeps two paths: the one the client currently shows
//! (`rendered`) and the one the application has asked for (`pending`). The
//! difference is flushed with the next response. Paths always start with '/';
//! runs of '/' are collapsed, nothing else is normalized.

use tracing::{debug, warn};

use crate::error::{Result, SessionError};

#[derive(Debug, Clone)]
pub struct PathRouter {
    rendered: String,
    pending: String,
    default_valid: bool,
    valid: bool,
    /// Paths to announce to the application, in order.
    changes: Vec<String>,
}

impl PathRouter {
    /// Creates a router for the path the client opened the session with.
    ///
    /// The initial path is what the client already shows, so it is not dirty.
    pub fn new(initial: &str, default_valid: bool) -> Self {
        let path = if initial.starts_with('/') {
            normalize(initial)
        } else {
            normalize(&format!("/{initial}"))
        };
        Self {
            rendered: path.clone(),
            pending: path,
            default_valid,
            valid: default_valid,
            changes: Vec::new(),
        }
    }

    /// Returns the current internal path (including changes not yet flushed).
    pub fn current_path(&self) -> &str {
        &self.pending
    }

    /// Returns the path the client shows.
    pub fn rendered_path(&self) -> &str {
        &self.rendered
    }

    /// Changes the internal path from application code.
    ///
    /// Fails with `InvalidArgument` (state untouched) when `path` does not
    /// start with '/'. Returns whether the path actually changed; setting the
    /// current path again is a no-op and never announces anything.
    ///
    /// With `emit_change` the change is announced and validity falls back to
    /// the default, so the handlers reacting to it decide. Without it the
    /// application set the path itself and the path counts as valid.
    pub fn set_path(&mut self, path: &str, emit_change: bool) -> Result<bool> {
        if !path.starts_with('/') {
            return Err(SessionError::invalid_argument(format!(
                "internal path '{path}' must start with '/'"
            )));
        }

        let path = normalize(path);
        if path == self.pending {
            return Ok(false);
        }

        self.pending = path;
        if emit_change {
            self.valid = self.default_valid;
            self.changes.push(self.pending.clone());
        } else {
            self.valid = true;
        }
        Ok(true)
    }

    /// Applies a navigation initiated by the client (history, bookmark).
    ///
    /// The client already shows the new path, so nothing is flushed back.
    /// Paths not starting with '/' are plain anchors and are ignored.
    pub fn navigate(&mut self, path: &str) -> bool {
        if !path.starts_with('/') {
            debug!(path, "ignoring client navigation to non-internal path");
            return false;
        }

        let path = normalize(path);
        if path == self.pending {
            self.rendered = path;
            return false;
        }

        self.rendered.clone_from(&path);
        self.pending = path;
        self.valid = self.default_valid;
        self.changes.push(self.pending.clone());
        true
    }

    /// Takes the paths that must be announced, oldest first.
    pub fn drain_changes(&mut self) -> Vec<String> {
        std::mem::take(&mut self.changes)
    }

    /// Returns whether the client must be told about a new path.
    pub fn is_dirty(&self) -> bool {
        self.pending != self.rendered
    }

    /// Marks the pending path as rendered, returning it if it was dirty.
    pub fn take_dirty(&mut self) -> Option<String> {
        if self.is_dirty() {
            self.rendered.clone_from(&self.pending);
            Some(self.pending.clone())
        } else {
            None
        }
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    /// Overrides validity for the current navigation.
    pub fn set_valid(&mut self, valid: bool) {
        self.valid = valid;
    }

    pub fn default_valid(&self) -> bool {
        self.default_valid
    }

    pub fn set_default_valid(&mut self, valid: bool) {
        self.default_valid = valid;
    }

    /// Returns whether the current path equals `base` or lies below it.
    pub fn matches(&self, base: &str) -> bool {
        path_matches(base, &append_slash(&self.pending))
    }

    /// Returns the segment of the current path that follows `base`.
    pub fn next_part(&self, base: &str) -> String {
        next_part(&self.pending, base)
    }

    /// Returns the remainder of the current path after `base`.
    pub fn sub_path(&self, base: &str) -> String {
        sub_path(&self.pending, base)
    }

    /// Returns whether the transport must answer "not found".
    ///
    /// Only clients that cannot run scripts get this outcome; interactive
    /// clients receive an invalid-path notification instead.
    pub fn is_not_found(&self, interactive: bool) -> bool {
        !interactive && !self.valid
    }
}

/// Collapses runs of '/' into one.
pub fn normalize(path: &str) -> String {
    let mut out = String::with_capacity(path.len());
    let mut last_slash = false;
    for ch in path.chars() {
        if ch == '/' {
            if !last_slash {
                out.push(ch);
            }
            last_slash = true;
        } else {
            out.push(ch);
            last_slash = false;
        }
    }
    out
}

/// Returns whether `query` is `base` or a sub path of `base`.
///
/// Pure prefix test on segment boundaries: `/a` matches `/a/b` but not `/ab`.
pub fn path_matches(base: &str, query: &str) -> bool {
    if query == base {
        return true;
    }
    query.len() > base.len()
        && query.starts_with(base)
        && (base.ends_with('/') || query.as_bytes()[base.len()] == b'/')
}

/// Returns the part of `path` after `base`.
///
/// Logs a warning and returns an empty string when `path` is not within `base`.
pub fn sub_path(path: &str, base: &str) -> String {
    let current = append_slash(path);
    if !path_matches(base, &current) {
        warn!(path, base, "path is not within base path");
        return String::new();
    }
    current[base.len()..].trim_start_matches('/').to_string()
}

/// Returns the single segment of `path` that follows `base`.
///
/// `next_part("/a/b", "/a/")` is `"b"`. Logs a warning and returns an empty
/// string when `path` is not within `base`.
pub fn next_part(path: &str, base: &str) -> String {
    let sub = sub_path(path, base);
    match sub.find('/') {
        Some(end) => sub[..end].to_string(),
        None => sub,
    }
}

fn append_slash(path: &str) -> String {
    if path.ends_with('/') {
        path.to_string()
    } else {
        format!("{path}/")
    }
}
