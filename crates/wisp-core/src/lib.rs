//! Wisp session core (session state machine, update lock, change batching,
//! exposed tokens, session registry).

pub mod config;
pub mod error;
pub mod logging;
pub mod registry;
pub mod session;

pub use config::{Config, SessionConfig};
pub use error::{Result, SessionError};
pub use registry::SessionRegistry;
pub use session::app::{Application, Notification, TurnContext};
pub use session::exposure::{ExposedTarget, ObjectId, TargetKind};
pub use session::gate::WaitOutcome;
pub use session::lifecycle::LifecycleState;
pub use session::{Environment, Fallback, Session, SessionHandle, UpdateLock};
pub use wisp_types;
