//! One user's interaction session.
//!
//! A [`Session`] owns the application tree and all per-session state. Every
//! access to that state goes through an [`UpdateLock`], obtained from the
//! session itself (request path) or from a [`SessionHandle`] (background
//! threads). Locks are recursive per thread and fail once the session has
//! committed to destruction.
//!
//! A turn is one unit of event handling: [`UpdateLock::notify`] delivers an
//! event, notifications it caused are delivered before the turn ends, and
//! [`UpdateLock::flush`] drains the accumulated changes into a
//! [`RenderDelta`].

pub mod app;
pub mod batch;
pub mod cookies;
pub mod current;
pub mod exposure;
pub mod gate;
pub mod lifecycle;
pub mod path;
pub mod url;

use std::any::Any;
use std::collections::VecDeque;
use std::marker::PhantomData;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, TryLockError, Weak};
use std::thread;
use std::time::{Duration, Instant};

use tokio::sync::mpsc::error::SendError;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, error, info, info_span, warn};
use wisp_types::{ClientEvent, RenderDelta, RenderOutcome};

use self::app::{Application, Notification, TurnContext};
use self::batch::ChangeBatcher;
use self::cookies::CookieJar;
use self::current::Binding;
use self::exposure::{ExposureRegistry, ObjectId, TargetKind};
use self::gate::{UpdateGate, WaitOutcome};
use self::lifecycle::LifecycleState;
use self::path::PathRouter;
use crate::config::SessionConfig;
use crate::error::{Result, SessionError};

/// What the transport knows about the client. Fixed for the session's life.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Environment {
    /// Whether the client runs scripts (incremental updates, push).
    pub interactive: bool,
    /// Whether the client is a crawler.
    pub bot: bool,
    /// Whether the session id can live in a cookie instead of the URL.
    pub supports_cookies: bool,
    /// Path the application is deployed at.
    pub deployment_path: String,
    /// Internal path the client opened the session with.
    pub internal_path: String,
}

impl Default for Environment {
    fn default() -> Self {
        Self {
            interactive: true,
            bot: false,
            supports_cookies: true,
            deployment_path: "/".to_string(),
            internal_path: "/".to_string(),
        }
    }
}

/// A unit of work queued for a session from outside its turn.
pub type PostedFn<A> = Box<dyn FnOnce(&mut A, &mut TurnContext<'_>) -> anyhow::Result<()> + Send>;

/// Runs instead of a posted event when the session is gone.
pub type Fallback = Box<dyn FnOnce() + Send>;

struct Posted<A> {
    run: PostedFn<A>,
    fallback: Option<Fallback>,
}

/// Server-side expiry bookkeeping, readable without the session lock.
#[derive(Debug)]
pub(crate) struct Expiry {
    last_activity: Instant,
    pub(crate) unload_deadline: Option<Instant>,
    pub(crate) suspended_until: Option<Instant>,
    pub(crate) quitting: bool,
}

impl Expiry {
    fn new() -> Self {
        Self {
            last_activity: Instant::now(),
            unload_deadline: None,
            suspended_until: None,
            quitting: false,
        }
    }

    fn touch(&mut self) {
        self.last_activity = Instant::now();
        self.unload_deadline = None;
    }

    fn due_at(&self, session_timeout: Option<Duration>) -> Option<Instant> {
        if self.quitting {
            return Some(self.last_activity);
        }
        if let Some(until) = self.suspended_until {
            return Some(until);
        }
        let idle = session_timeout.map(|timeout| self.last_activity + timeout);
        match (idle, self.unload_deadline) {
            (Some(idle), Some(unload)) => Some(idle.min(unload)),
            (idle, unload) => idle.or(unload),
        }
    }
}

/// Session data that may be read without holding the lock.
pub(crate) struct SessionMeta {
    id: Mutex<String>,
    env: Environment,
    config: Arc<SessionConfig>,
    gate: UpdateGate,
    expiry: Mutex<Expiry>,
    rendered: AtomicBool,
}

impl SessionMeta {
    pub(crate) fn id(&self) -> String {
        lock_unpoisoned(&self.id).clone()
    }

    pub(crate) fn expiry(&self) -> MutexGuard<'_, Expiry> {
        lock_unpoisoned(&self.expiry)
    }
}

/// Session state owned by the turn.
pub(crate) struct SessionCore {
    lifecycle: LifecycleState,
    path: PathRouter,
    batch: ChangeBatcher,
    exposure: ExposureRegistry,
    cookies: CookieJar,
    notifications: VecDeque<Notification>,
    /// Stack of widgets that scope client events (modal dialogs).
    exposed_constraints: Vec<ObjectId>,
    quit_message: Option<String>,
    redirect: Option<String>,
    /// A push the transport never received, sent with the next response.
    unsent: Option<RenderDelta>,
}

impl SessionCore {
    fn new(env: &Environment, config: &SessionConfig) -> Self {
        Self {
            lifecycle: LifecycleState::Constructing,
            path: PathRouter::new(&env.internal_path, config.internal_path_default_valid),
            batch: ChangeBatcher::new(env.interactive),
            exposure: ExposureRegistry::new(),
            cookies: CookieJar::new(),
            notifications: VecDeque::new(),
            exposed_constraints: Vec::new(),
            quit_message: None,
            redirect: None,
            unsent: None,
        }
    }

    fn is_exposed<A: Application>(&self, app: &A, widget: ObjectId) -> bool {
        self.exposed_constraints
            .last()
            .is_none_or(|top| app.is_descendant(widget, *top))
    }
}

struct SessionState<A> {
    core: SessionCore,
    app: A,
}

impl<A: Application> SessionState<A> {
    fn dispatch(&mut self, meta: &SessionMeta, event: ClientEvent) -> anyhow::Result<()> {
        let SessionState { core, app } = self;
        match event {
            ClientEvent::Navigate { path } => {
                core.path.navigate(&path);
            }
            ClientEvent::Signal { token, args } => {
                let Some(target) = core.exposure.decode(&token).cloned() else {
                    return Ok(());
                };
                if target.kind != TargetKind::Signal {
                    debug!(token = exposure::log_prefix(&token), "token does not name a signal");
                    return Ok(());
                }
                if !core.is_exposed(app, target.object) {
                    warn!(
                        widget = %target.object,
                        signal = %target.name,
                        "dropping event outside the exposed scope"
                    );
                    return Ok(());
                }
                app.handle_signal(&mut TurnContext::new(core, meta), &target, &args)?;
            }
            ClientEvent::IdleTimeout => app.idle_timeout(&mut TurnContext::new(core, meta))?,
            ClientEvent::Unload => app.unload(&mut TurnContext::new(core, meta))?,
            ClientEvent::ScriptError { text } => {
                app.script_error(&mut TurnContext::new(core, meta), &text)?;
            }
            ClientEvent::Resume => TurnContext::new(core, meta).resume()?,
            ClientEvent::FetchDeferred | ClientEvent::KeepAlive => {}
        }
        Ok(())
    }

    /// Delivers queued notifications, including those raised while
    /// delivering, up to the configured number of rounds.
    fn deliver_notifications(&mut self, meta: &SessionMeta) -> anyhow::Result<()> {
        let rounds = meta.config.max_notification_rounds;
        let SessionState { core, app } = self;

        for _ in 0..rounds {
            for path in core.path.drain_changes() {
                core.notifications
                    .push_back(Notification::InternalPathChanged(path));
            }
            let Some(notification) = core.notifications.pop_front() else {
                return Ok(());
            };

            debug!(?notification, "delivering notification");
            app.notified(&mut TurnContext::new(core, meta), &notification)?;

            if let Notification::InternalPathChanged(path) = &notification
                && meta.env.interactive
                && !core.path.is_valid()
                && core.path.current_path() == path
            {
                core.notifications
                    .push_front(Notification::InternalPathInvalid(path.clone()));
            }
        }

        let dropped = core.notifications.len() + core.path.drain_changes().len();
        if dropped > 0 {
            warn!(dropped, rounds, "notification cascade limit reached");
            core.notifications.clear();
        }
        Ok(())
    }

    fn flush(&mut self, meta: &SessionMeta, full: bool) -> RenderDelta {
        let SessionState { core, app } = self;
        let full = full || !core.batch.rendered_once() || !meta.env.interactive;

        let dom = app.collect_changes(full);
        let mut delta = core.batch.flush(dom, meta.config.two_phase_threshold, full);
        delta.internal_path = core.path.take_dirty();
        delta.cookies = core.cookies.drain();
        if let Some(earlier) = core.unsent.take() {
            delta.prepend(earlier);
        }
        if delta.full {
            delta.idle_timeout_secs = meta.config.idle_timeout.map(|timeout| timeout.as_secs());
        }
        delta.outcome = if let Some(url) = core.redirect.take() {
            RenderOutcome::Redirect { url }
        } else if core.lifecycle == LifecycleState::Quitting {
            RenderOutcome::Quit {
                restart_message: core.quit_message.clone(),
            }
        } else if core.path.is_not_found(meta.env.interactive) {
            RenderOutcome::NotFound
        } else {
            RenderOutcome::Ok
        };
        core.exposure.end_turn();

        if full {
            meta.rendered.store(true, Ordering::Release);
        }
        delta
    }
}

struct Shared<A: Application> {
    meta: SessionMeta,
    state: Mutex<SessionState<A>>,
    posted: Mutex<VecDeque<Posted<A>>>,
    push: Mutex<Option<UnboundedSender<RenderDelta>>>,
}

fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn new_session_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

/// The owning reference to a session.
///
/// Dropping the last `Session` destroys the session if nothing else did.
pub struct Session<A: Application> {
    shared: Arc<Shared<A>>,
}

impl<A: Application> Session<A> {
    /// Creates a session and runs [`Application::initialize`].
    ///
    /// Fails with [`SessionError::Fatal`] when initialization fails; the
    /// session is destroyed in that case.
    pub fn new(env: Environment, config: Arc<SessionConfig>, app: A) -> Result<Self> {
        let id = new_session_id();
        let core = SessionCore::new(&env, &config);
        let shared = Arc::new(Shared {
            meta: SessionMeta {
                id: Mutex::new(id.clone()),
                env,
                config,
                gate: UpdateGate::new(),
                expiry: Mutex::new(Expiry::new()),
                rendered: AtomicBool::new(false),
            },
            state: Mutex::new(SessionState { core, app }),
            posted: Mutex::new(VecDeque::new()),
            push: Mutex::new(None),
        });

        let session = Self { shared };
        let lock = session
            .lock()
            .ok_or(SessionError::NotAcquired { session_id: id.clone() })?;
        lock.initialize()?;
        drop(lock);

        info!(session = %id, "session created");
        Ok(session)
    }

    pub fn id(&self) -> String {
        self.shared.meta.id()
    }

    pub(crate) fn set_id(&self, id: String) {
        *lock_unpoisoned(&self.shared.meta.id) = id;
    }

    pub fn environment(&self) -> &Environment {
        &self.shared.meta.env
    }

    pub fn config(&self) -> &SessionConfig {
        &self.shared.meta.config
    }

    /// Returns a weak handle for background threads.
    pub fn handle(&self) -> SessionHandle<A> {
        SessionHandle {
            shared: Arc::downgrade(&self.shared),
        }
    }

    /// Blocks until the session is locked; `None` once it is being destroyed.
    pub fn lock(&self) -> Option<UpdateLock<A>> {
        UpdateLock::acquire(Arc::clone(&self.shared), Acquire::Blocking)
    }

    pub fn try_lock(&self) -> Option<UpdateLock<A>> {
        UpdateLock::acquire(Arc::clone(&self.shared), Acquire::Try)
    }

    pub fn is_destroyed(&self) -> bool {
        self.shared.meta.gate.is_dead()
    }

    /// Returns whether the page has been rendered at least once.
    pub fn is_rendered(&self) -> bool {
        self.shared.meta.rendered.load(Ordering::Acquire)
    }

    /// When the server should expire this session, if ever.
    pub fn expires_at(&self) -> Option<Instant> {
        let meta = &self.shared.meta;
        meta.expiry().due_at(meta.config.session_timeout)
    }

    /// Opens the push channel. Deltas produced by triggered updates arrive on
    /// the returned receiver; a new call replaces the previous channel.
    pub fn connect_push(&self) -> UnboundedReceiver<RenderDelta> {
        let (tx, rx) = mpsc::unbounded_channel();
        *lock_unpoisoned(&self.shared.push) = Some(tx);
        rx
    }

    pub fn disconnect_push(&self) {
        lock_unpoisoned(&self.shared.push).take();
    }

    /// Handles one client request: locks, delivers `event`, and flushes.
    pub fn process(&self, event: ClientEvent) -> Result<RenderDelta> {
        let lock = self.lock().ok_or_else(|| SessionError::NotAcquired {
            session_id: self.id(),
        })?;
        if event == ClientEvent::FetchDeferred {
            return Ok(lock.take_deferred()?.unwrap_or_default());
        }
        lock.notify(event)?;
        lock.flush()
    }

    /// Queues `f` to run under the session lock.
    ///
    /// Runs right away when the lock is free, otherwise when the current
    /// holder releases it. Returns `false` (after running `fallback`) when the
    /// session is gone.
    pub fn post<F>(&self, f: F, fallback: Option<Fallback>) -> bool
    where
        F: FnOnce(&mut A, &mut TurnContext<'_>) -> anyhow::Result<()> + Send + 'static,
    {
        if self.is_destroyed() {
            if let Some(fallback) = fallback {
                fallback();
            }
            return false;
        }

        lock_unpoisoned(&self.shared.posted).push_back(Posted {
            run: Box::new(f),
            fallback,
        });

        if self.is_destroyed() {
            // Lost the race with teardown, which already drained the queue.
            run_fallbacks(&self.shared.posted);
            return false;
        }

        if let Some(lock) = self.try_lock() {
            drop(lock);
        }
        true
    }

    /// Destroys the session. Returns `false` if it already was.
    pub fn destroy(&self) -> bool {
        let Some(lock) = self.lock() else {
            return false;
        };
        match lock.destroy() {
            Ok(()) => true,
            Err(err) => {
                warn!(session = %self.id(), %err, "could not destroy session");
                false
            }
        }
    }
}

impl<A: Application> Drop for Session<A> {
    fn drop(&mut self) {
        if !self.is_destroyed() {
            self.destroy();
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}

fn run_fallbacks<A>(posted: &Mutex<VecDeque<Posted<A>>>) {
    let pending = std::mem::take(&mut *lock_unpoisoned(posted));
    for posted in pending {
        if let Some(fallback) = posted.fallback {
            fallback();
        }
    }
}

/// A weak reference to a session for use from any thread.
pub struct SessionHandle<A: Application> {
    shared: Weak<Shared<A>>,
}

impl<A: Application> Clone for SessionHandle<A> {
    fn clone(&self) -> Self {
        Self {
            shared: Weak::clone(&self.shared),
        }
    }
}

impl<A: Application> SessionHandle<A> {
    /// Returns a handle to the session whose lock this thread holds.
    pub fn current() -> Option<Self> {
        let shared = current::bound::<Shared<A>>()?;
        Some(Self {
            shared: Arc::downgrade(&shared),
        })
    }

    /// Blocks until the session is locked.
    ///
    /// Returns `None` if the session is gone or being destroyed; the caller
    /// must not touch session state in that case.
    pub fn lock(&self) -> Option<UpdateLock<A>> {
        UpdateLock::acquire(self.shared.upgrade()?, Acquire::Blocking)
    }

    pub fn try_lock(&self) -> Option<UpdateLock<A>> {
        UpdateLock::acquire(self.shared.upgrade()?, Acquire::Try)
    }

    pub fn lock_timeout(&self, timeout: Duration) -> Option<UpdateLock<A>> {
        UpdateLock::acquire(self.shared.upgrade()?, Acquire::Timeout(timeout))
    }

    pub fn is_alive(&self) -> bool {
        self.shared
            .upgrade()
            .is_some_and(|shared| !shared.meta.gate.is_dead())
    }

    pub fn session_id(&self) -> Option<String> {
        self.shared.upgrade().map(|shared| shared.meta.id())
    }
}

enum Acquire {
    Blocking,
    Try,
    Timeout(Duration),
}

/// Exclusive, recursive access to a session.
///
/// Held by one thread; dropping the outermost lock of a thread runs posted
/// events, delivers a triggered push and restores the thread's previous
/// current-session binding.
#[must_use = "the session is unlocked as soon as the lock is dropped"]
pub struct UpdateLock<A: Application> {
    shared: Arc<Shared<A>>,
    previous: Option<Binding>,
    /// Cleared when the session died while this lock yielded the gate.
    held: bool,
    _not_send: PhantomData<*const ()>,
}

impl<A: Application> UpdateLock<A> {
    fn acquire(shared: Arc<Shared<A>>, how: Acquire) -> Option<Self> {
        let gate = &shared.meta.gate;
        let acquired = match how {
            Acquire::Blocking => gate.acquire(),
            Acquire::Try => gate.try_acquire(),
            Acquire::Timeout(timeout) => gate.acquire_timeout(timeout),
        };
        if !acquired {
            return None;
        }

        let weak: Weak<Shared<A>> = Arc::downgrade(&shared);
        let weak: Weak<dyn Any + Send + Sync> = weak;
        let previous = current::bind(Binding {
            id: shared.meta.id(),
            session: weak,
        });
        Some(Self {
            shared,
            previous,
            held: true,
            _not_send: PhantomData,
        })
    }

    /// Returns whether the session behind this lock is still usable.
    pub fn is_valid(&self) -> bool {
        self.held && !self.shared.meta.gate.is_dead()
    }

    pub fn session_id(&self) -> String {
        self.shared.meta.id()
    }

    fn not_acquired(&self) -> SessionError {
        SessionError::NotAcquired {
            session_id: self.session_id(),
        }
    }

    fn state(&self) -> Result<MutexGuard<'_, SessionState<A>>> {
        if !self.held {
            return Err(self.not_acquired());
        }
        let state = match self.shared.state.try_lock() {
            Ok(state) => state,
            Err(TryLockError::WouldBlock) => return Err(SessionError::StateBorrowed),
            Err(TryLockError::Poisoned(poisoned)) => {
                // A panic escaped while the state was half updated.
                let mut state = poisoned.into_inner();
                if state.core.lifecycle != LifecycleState::Destroyed {
                    error!(session = %self.session_id(), "session state poisoned, terminating session");
                    self.discard(&mut state);
                }
                return Err(self.not_acquired());
            }
        };
        if state.core.lifecycle == LifecycleState::Destroyed {
            return Err(self.not_acquired());
        }
        Ok(state)
    }

    /// Runs `f` and the notifications it raised as one turn.
    ///
    /// An application error tears the session down.
    fn run_turn<R>(
        &self,
        f: impl FnOnce(&mut SessionState<A>, &SessionMeta) -> anyhow::Result<R>,
    ) -> Result<R> {
        let mut state = self.state()?;
        let span = info_span!("session", id = %self.session_id());
        let _enter = span.enter();
        self.guarded(&mut state, |state, meta| {
            let value = f(state, meta)?;
            state.deliver_notifications(meta)?;
            Ok(value)
        })
    }

    /// Runs application code against `state`. Errors and panics are fatal to
    /// the session, never to the caller's thread.
    fn guarded<R>(
        &self,
        state: &mut SessionState<A>,
        f: impl FnOnce(&mut SessionState<A>, &SessionMeta) -> anyhow::Result<R>,
    ) -> Result<R> {
        let meta = &self.shared.meta;
        match panic::catch_unwind(AssertUnwindSafe(|| f(&mut *state, meta))) {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => Err(self.fail(state, &err)),
            Err(payload) => {
                let err = anyhow::anyhow!("panicked: {}", panic_message(payload.as_ref()));
                Err(self.fail(state, &err))
            }
        }
    }

    fn fail(&self, state: &mut SessionState<A>, err: &anyhow::Error) -> SessionError {
        let session_id = self.session_id();
        let message = format!("{err:#}");
        error!(session = %session_id, error = %message, "application error, terminating session");
        self.teardown(state);
        SessionError::Fatal {
            session_id,
            message,
        }
    }

    fn teardown(&self, state: &mut SessionState<A>) {
        if state.core.lifecycle == LifecycleState::Destroyed {
            return;
        }
        self.shared.meta.gate.mark_dead();
        if panic::catch_unwind(AssertUnwindSafe(|| state.app.finalize())).is_err() {
            error!(session = %self.session_id(), "finalize panicked");
        }
        self.discard(state);
    }

    /// Drops the session's registries without calling into the application.
    fn discard(&self, state: &mut SessionState<A>) {
        let meta = &self.shared.meta;
        meta.gate.mark_dead();

        let core = &mut state.core;
        core.lifecycle = LifecycleState::Destroyed;
        core.exposure.clear();
        core.notifications.clear();
        core.exposed_constraints.clear();
        core.unsent = None;

        lock_unpoisoned(&self.shared.push).take();
        run_fallbacks(&self.shared.posted);
        info!(session = %meta.id(), "session destroyed");
    }

    fn initialize(&self) -> Result<()> {
        self.run_turn(|state, meta| {
            let SessionState { core, app } = state;
            app.initialize(&mut TurnContext::new(core, meta))?;
            if core.lifecycle == LifecycleState::Constructing {
                core.lifecycle.transition(LifecycleState::Active)?;
            }
            Ok(())
        })
    }

    /// Runs application code against the session as a turn of its own.
    ///
    /// Fails with [`SessionError::StateBorrowed`] when called from inside a
    /// turn already running on this thread.
    pub fn with<R>(&self, f: impl FnOnce(&mut A, &mut TurnContext<'_>) -> R) -> Result<R> {
        self.run_turn(|state, meta| {
            let SessionState { core, app } = state;
            Ok(f(app, &mut TurnContext::new(core, meta)))
        })
    }

    /// Delivers a client event to the application.
    ///
    /// Events reaching a quitting session are ignored.
    pub fn notify(&self, event: ClientEvent) -> Result<()> {
        let meta = &self.shared.meta;
        meta.expiry().touch();

        let result = self.run_turn(|state, meta| {
            debug!(event = event.kind(), "handling event");
            if !state.core.lifecycle.is_live() {
                debug!(state = %state.core.lifecycle, "ignoring event");
                return Ok(());
            }
            state.dispatch(meta, event)
        });
        meta.gate.complete_turn();
        result
    }

    /// Drains the turn's changes. A quitting session is destroyed afterwards.
    pub fn flush(&self) -> Result<RenderDelta> {
        self.flush_with(false)
    }

    /// Like [`flush`](Self::flush) but renders the complete page (reload).
    pub fn flush_full(&self) -> Result<RenderDelta> {
        self.flush_with(true)
    }

    fn flush_with(&self, full: bool) -> Result<RenderDelta> {
        let mut state = self.state()?;
        let span = info_span!("session", id = %self.session_id());
        let _enter = span.enter();
        let delta = self.guarded(&mut state, |state, meta| Ok(state.flush(meta, full)))?;
        if state.core.lifecycle == LifecycleState::Quitting {
            self.teardown(&mut state);
        }
        Ok(delta)
    }

    /// Takes the second phase of a two-phase render.
    pub fn take_deferred(&self) -> Result<Option<RenderDelta>> {
        Ok(self.state()?.core.batch.take_deferred())
    }

    pub fn lifecycle(&self) -> Result<LifecycleState> {
        Ok(self.state()?.core.lifecycle)
    }

    pub fn internal_path(&self) -> Result<String> {
        Ok(self.state()?.core.path.current_path().to_string())
    }

    /// Returns whether client events for `widget` are currently accepted.
    pub fn is_exposed(&self, widget: ObjectId) -> Result<bool> {
        let state = self.state()?;
        Ok(state.core.is_exposed(&state.app, widget))
    }

    /// Rejects requests larger than the configured limit, telling the
    /// application about it.
    pub fn check_request_size(&self, bytes: u64) -> Result<()> {
        let max = self.shared.meta.config.max_request_size;
        if bytes <= max {
            return Ok(());
        }
        warn!(session = %self.session_id(), bytes, max, "request too large");
        self.run_turn(|state, _| {
            state
                .core
                .notifications
                .push_back(Notification::RequestTooLarge(bytes));
            Ok(())
        })?;
        Err(SessionError::invalid_argument(format!(
            "request of {bytes} bytes exceeds the limit of {max} bytes"
        )))
    }

    /// Adds (`true`) or removes (`false`) a server-push enabler.
    pub fn enable_updates(&self, enabled: bool) {
        self.shared.meta.gate.enable_push(enabled);
    }

    /// Arms a push of pending changes for the next outermost release.
    pub fn trigger_update(&self) {
        if !self.shared.meta.gate.trigger_push() {
            warn!(session = %self.session_id(), "trigger_update without enabled updates");
        }
    }

    /// Pushes pending changes, then gives up the lock until another thread
    /// completes a client-event turn or `timeout` elapses.
    ///
    /// Blocks the calling thread. On [`WaitOutcome::Destroyed`] this lock is
    /// no longer valid.
    pub fn wait_for_event(&mut self, timeout: Duration) -> Result<WaitOutcome> {
        if !self.held {
            return Ok(WaitOutcome::Destroyed);
        }
        if let Err(TryLockError::WouldBlock) = self.shared.state.try_lock() {
            return Err(SessionError::StateBorrowed);
        }

        self.propagate();
        let gate = &self.shared.meta.gate;
        let outcome = gate.yield_until_turn(gate.turns(), timeout);
        if outcome == WaitOutcome::Destroyed {
            self.held = false;
        }
        Ok(outcome)
    }

    /// Destroys the session: runs [`Application::finalize`] and drops all
    /// registries. Pending acquisitions fail.
    pub fn destroy(&self) -> Result<()> {
        let mut state = self.state()?;
        self.teardown(&mut state);
        Ok(())
    }

    /// Sends pending changes down the push channel.
    ///
    /// Changes are only drained when updates are enabled and a transport is
    /// listening; otherwise they stay pending for the next response.
    fn propagate(&self) {
        if !self.shared.meta.gate.push_enabled() {
            return;
        }
        let tx = lock_unpoisoned(&self.shared.push)
            .as_ref()
            .filter(|tx| !tx.is_closed())
            .cloned();
        let Some(tx) = tx else {
            debug!("no push channel connected, keeping changes for the next response");
            return;
        };
        let Ok(mut state) = self.state() else {
            return;
        };
        if !state.core.batch.rendered_once() {
            debug!("not pushing before the first render");
            return;
        }

        let Ok(delta) = self.guarded(&mut state, |state, meta| Ok(state.flush(meta, false))) else {
            return;
        };
        if !delta.is_empty() {
            match tx.send(delta) {
                Ok(()) => debug!("pushed pending changes"),
                Err(SendError(delta)) => {
                    debug!("push channel closed, keeping changes for the next response");
                    state.core.unsent = Some(delta);
                }
            }
        }
        if state.core.lifecycle == LifecycleState::Quitting {
            self.teardown(&mut state);
        }
    }

    fn run_posted(&self) {
        loop {
            let next = lock_unpoisoned(&self.shared.posted).pop_front();
            let Some(Posted { run, fallback }) = next else {
                break;
            };
            if !self.is_valid() {
                if let Some(fallback) = fallback {
                    fallback();
                }
                continue;
            }
            let result = self.run_turn(|state, meta| {
                let SessionState { core, app } = state;
                run(app, &mut TurnContext::new(core, meta))
            });
            if let Err(err) = result {
                warn!(session = %self.session_id(), %err, "posted event failed");
            }
        }
    }
}

impl<A: Application> Drop for UpdateLock<A> {
    fn drop(&mut self) {
        let gate = &self.shared.meta.gate;
        let outermost = self.held && gate.depth() == 1;
        // Unwinding: no more application code on this thread.
        let unwinding = thread::panicking();
        if outermost && !unwinding {
            self.run_posted();
            if gate.take_push_trigger() {
                self.propagate();
            }
        }
        if self.held {
            gate.release();
        }
        current::restore(self.previous.take());

        // An event posted while we were finishing up found the lock taken.
        if outermost
            && !unwinding
            && !gate.is_dead()
            && !lock_unpoisoned(&self.shared.posted).is_empty()
            && let Some(lock) = UpdateLock::acquire(Arc::clone(&self.shared), Acquire::Try)
        {
            drop(lock);
        }
    }
}
