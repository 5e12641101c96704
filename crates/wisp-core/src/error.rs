//! Session error taxonomy.
//!
//! Lock failures and unknown tokens are not errors: acquisition returns
//! `Option<UpdateLock>` and token decoding returns `Option`, since both can be
//! triggered by a racing background thread or a hostile client.

use thiserror::Error;

/// Errors surfaced by session operations.
#[derive(Debug, Error)]
pub enum SessionError {
    /// A caller passed a malformed value (e.g. an internal path without a leading '/').
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The operation is not allowed in the session's current state.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Session state is already borrowed further up the current call stack.
    ///
    /// Happens when a handler re-enters the session through a recursive
    /// lock while its own turn is still running.
    #[error("session state is already borrowed by the running turn")]
    StateBorrowed,

    /// The session is being destroyed and can no longer be locked.
    #[error("session {session_id} is no longer available")]
    NotAcquired { session_id: String },

    /// An application handler failed; the session has been terminated.
    #[error("session {session_id} terminated: {message}")]
    Fatal { session_id: String, message: String },
}

pub type Result<T> = std::result::Result<T, SessionError>;

impl SessionError {
    pub(crate) fn invalid_argument(message: impl Into<String>) -> Self {
        SessionError::InvalidArgument(message.into())
    }

    pub(crate) fn invalid_state(message: impl Into<String>) -> Self {
        SessionError::InvalidState(message.into())
    }

    /// Returns whether the session is gone after this error.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionError::NotAcquired { .. } | SessionError::Fatal { .. }
        )
    }
}
