//! Recursive, revocable exclusion for session state.
//!
//! One execution context (thread) at a time owns the gate; the owner may
//! re-acquire it without blocking, and the gate is free again only after as
//! many releases as acquisitions. Once the session commits to destruction the
//! gate is *dead*: every acquisition fails immediately, and contexts already
//! blocked waiting for it wake up and fail too.
//!
//! The gate also carries the server-push bookkeeping: an enable counter and a
//! trigger flag that the outermost release consumes.

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

#[derive(Debug, Default)]
struct GateState {
    owner: Option<ThreadId>,
    depth: usize,
    dead: bool,
    /// Client-event turns completed so far; waiters watch it advance.
    turns: u64,
    push_enablers: usize,
    push_armed: bool,
}

/// Result of yielding the gate while waiting for another turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// Another context completed a turn; the gate is held again.
    Event,
    /// Nothing happened before the timeout; the gate is held again.
    TimedOut,
    /// The session was destroyed while waiting; the gate is not held.
    Destroyed,
}

#[derive(Debug, Default)]
pub struct UpdateGate {
    state: Mutex<GateState>,
    released: Condvar,
}

impl UpdateGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Blocks until the calling thread owns the gate.
    ///
    /// Returns `false` without blocking (or after being woken) when the gate
    /// is dead.
    pub fn acquire(&self) -> bool {
        self.acquire_until(None)
    }

    /// Like [`acquire`](Self::acquire) but gives up after `timeout`.
    pub fn acquire_timeout(&self, timeout: Duration) -> bool {
        self.acquire_until(Some(Instant::now() + timeout))
    }

    /// Acquires only if no other thread owns the gate.
    pub fn try_acquire(&self) -> bool {
        let me = thread::current().id();
        let mut state = self.state();
        Self::claim(&mut state, me)
    }

    fn acquire_until(&self, deadline: Option<Instant>) -> bool {
        let me = thread::current().id();
        let mut state = self.state();
        loop {
            if state.dead {
                return false;
            }
            if Self::claim(&mut state, me) {
                return true;
            }
            state = match deadline {
                None => self
                    .released
                    .wait(state)
                    .unwrap_or_else(PoisonError::into_inner),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return false;
                    }
                    self.released
                        .wait_timeout(state, deadline - now)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0
                }
            };
        }
    }

    fn claim(state: &mut GateState, me: ThreadId) -> bool {
        if state.dead {
            return false;
        }
        match state.owner {
            None => {
                state.owner = Some(me);
                state.depth = 1;
                true
            }
            Some(owner) if owner == me => {
                state.depth += 1;
                true
            }
            Some(_) => false,
        }
    }

    /// Releases one level of ownership held by the calling thread.
    ///
    /// Returns `true` when this release freed the gate. Releasing a gate the
    /// thread does not own (it lost ownership while the session died) is a
    /// no-op.
    pub fn release(&self) -> bool {
        let me = thread::current().id();
        let mut state = self.state();
        if state.owner != Some(me) {
            return false;
        }
        state.depth -= 1;
        if state.depth > 0 {
            return false;
        }
        state.owner = None;
        drop(state);
        self.released.notify_all();
        true
    }

    /// Returns how many times the calling thread holds the gate.
    pub fn depth(&self) -> usize {
        let me = thread::current().id();
        let state = self.state();
        if state.owner == Some(me) {
            state.depth
        } else {
            0
        }
    }

    pub fn is_held_by_current(&self) -> bool {
        self.depth() > 0
    }

    pub fn is_dead(&self) -> bool {
        self.state().dead
    }

    /// Commits the session to destruction and wakes every waiter.
    ///
    /// The current owner keeps the gate until it releases it, so teardown can
    /// finish under exclusion.
    pub fn mark_dead(&self) {
        self.state().dead = true;
        self.released.notify_all();
    }

    /// Records that a client-event turn finished.
    pub fn complete_turn(&self) {
        let mut state = self.state();
        state.turns = state.turns.wrapping_add(1);
    }

    pub fn turns(&self) -> u64 {
        self.state().turns
    }

    /// Gives up ownership entirely until another turn completes.
    ///
    /// The caller must own the gate. On [`WaitOutcome::Event`] and
    /// [`WaitOutcome::TimedOut`] the gate is owned again with the same depth.
    pub fn yield_until_turn(&self, seen: u64, timeout: Duration) -> WaitOutcome {
        let me = thread::current().id();
        let mut state = self.state();
        if state.owner != Some(me) {
            return if state.dead {
                WaitOutcome::Destroyed
            } else {
                WaitOutcome::TimedOut
            };
        }

        let depth = state.depth;
        state.owner = None;
        state.depth = 0;
        self.released.notify_all();

        let deadline = Instant::now() + timeout;
        let outcome = loop {
            if state.dead {
                return WaitOutcome::Destroyed;
            }
            if state.turns != seen {
                break WaitOutcome::Event;
            }
            let now = Instant::now();
            if now >= deadline {
                break WaitOutcome::TimedOut;
            }
            state = self
                .released
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        };

        loop {
            if state.dead {
                return WaitOutcome::Destroyed;
            }
            if state.owner.is_none() {
                state.owner = Some(me);
                state.depth = depth;
                return outcome;
            }
            state = self
                .released
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Adds (`true`) or removes (`false`) one server-push enabler.
    pub fn enable_push(&self, enabled: bool) {
        let mut state = self.state();
        state.push_enablers = if enabled {
            state.push_enablers.saturating_add(1)
        } else {
            state.push_enablers.saturating_sub(1)
        };
        if state.push_enablers == 0 {
            state.push_armed = false;
        }
    }

    pub fn push_enabled(&self) -> bool {
        self.state().push_enablers > 0
    }

    /// Arms a push for the next outermost release. No-op when push is disabled.
    ///
    /// Returns whether a push is armed.
    pub fn trigger_push(&self) -> bool {
        let mut state = self.state();
        if state.push_enablers > 0 {
            state.push_armed = true;
        }
        state.push_armed
    }

    /// Consumes the armed push, if any.
    pub fn take_push_trigger(&self) -> bool {
        std::mem::take(&mut self.state().push_armed)
    }

    fn state(&self) -> MutexGuard<'_, GateState> {
        // A panicking holder leaves the bookkeeping consistent; keep going.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
