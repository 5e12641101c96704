//! Events delivered from the remote client to a session.
//!
//! Events are serializable so transports can decode them straight from a
//! request body or a websocket frame.

use serde::{Deserialize, Serialize};

/// An event sent by the browser.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEvent {
    /// History navigation (back/forward, or a bookmarked link).
    Navigate { path: String },

    /// An exposed signal fired in the browser.
    Signal {
        /// Opaque token previously handed out by the session.
        token: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        args: Vec<String>,
    },

    /// The client-side idle timer expired.
    IdleTimeout,

    /// The page is being unloaded (closed, navigated away, or refreshed).
    Unload,

    /// Uncaught JavaScript error reported by the client.
    ScriptError { text: String },

    /// The client returned to a suspended session.
    Resume,

    /// Second round-trip of a two-phase render.
    FetchDeferred,

    /// Keep-alive ping.
    KeepAlive,
}

impl ClientEvent {
    /// Short label used in log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            ClientEvent::Navigate { .. } => "navigate",
            ClientEvent::Signal { .. } => "signal",
            ClientEvent::IdleTimeout => "idle_timeout",
            ClientEvent::Unload => "unload",
            ClientEvent::ScriptError { .. } => "script_error",
            ClientEvent::Resume => "resume",
            ClientEvent::FetchDeferred => "fetch_deferred",
            ClientEvent::KeepAlive => "keep_alive",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_navigate_wire_format() {
        let json = r#"{"type":"navigate","path":"/a/b"}"#;
        let event: ClientEvent = serde_json::from_str(json).unwrap();
        assert_eq!(
            event,
            ClientEvent::Navigate {
                path: "/a/b".to_string()
            }
        );
    }

    #[test]
    fn test_signal_args_default_to_empty() {
        let json = r#"{"type":"signal","token":"s1.abc"}"#;
        let event: ClientEvent = serde_json::from_str(json).unwrap();
        assert_eq!(
            event,
            ClientEvent::Signal {
                token: "s1.abc".to_string(),
                args: Vec::new(),
            }
        );

        let out = serde_json::to_string(&event).unwrap();
        assert!(!out.contains("args"));
    }
}
