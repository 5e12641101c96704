//! Ambient "current session" lookup for code that cannot take a handle.
//!
//! Every [`UpdateLock`](super::UpdateLock) binds its session to the thread
//! while it is held and restores the previous binding when dropped. The core
//! API never depends on this; it exists for call sites deep inside
//! application code.

use std::any::Any;
use std::cell::RefCell;
use std::sync::{Arc, Weak};

#[derive(Clone)]
pub(crate) struct Binding {
    pub(crate) id: String,
    pub(crate) session: Weak<dyn Any + Send + Sync>,
}

thread_local! {
    static CURRENT: RefCell<Option<Binding>> = const { RefCell::new(None) };
}

/// Binds `binding` to the thread, returning the binding it displaced.
pub(crate) fn bind(binding: Binding) -> Option<Binding> {
    CURRENT.with(|current| current.borrow_mut().replace(binding))
}

pub(crate) fn restore(previous: Option<Binding>) {
    CURRENT.with(|current| *current.borrow_mut() = previous);
}

/// Returns the concrete session state bound to the thread, if it is of type `T`.
pub(crate) fn bound<T: Any + Send + Sync>() -> Option<Arc<T>> {
    let session = CURRENT.with(|current| current.borrow().as_ref()?.session.upgrade())?;
    session.downcast::<T>().ok()
}

/// Returns the id of the session whose lock the calling thread holds.
pub fn bound_session_id() -> Option<String> {
    CURRENT.with(|current| current.borrow().as_ref().map(|b| b.id.clone()))
}
