//! Wire-facing value types shared between the session core and its
//! transport/renderer collaborators.

pub mod cookie;
pub mod delta;
pub mod event;
pub mod head;

pub use cookie::Cookie;
pub use delta::{DomDelta, RenderDelta, RenderOutcome, RenderPhase};
pub use event::ClientEvent;
pub use head::{
    MetaHeader, MetaHeaderType, MetaLink, ScriptLibrary, ScriptPreamble, StyleRule, StyleSheet,
};
