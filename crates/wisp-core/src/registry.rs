//! Registry of live sessions.
//!
//! The registry owns every session of a deployment, routes posted events to
//! them and expires the ones that timed out, quit or were abandoned after an
//! unload. Session locks are never taken while the registry map is locked.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::SessionConfig;
use crate::error::Result;
use crate::session::app::{Application, TurnContext};
use crate::session::{Environment, Fallback, Session, new_session_id};

type SessionMap<A> = HashMap<String, Arc<Session<A>>>;

pub struct SessionRegistry<A: Application> {
    config: Arc<SessionConfig>,
    sessions: Mutex<SessionMap<A>>,
}

impl<A: Application> SessionRegistry<A> {
    pub fn new(config: Arc<SessionConfig>) -> Self {
        Self {
            config,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    fn sessions(&self) -> MutexGuard<'_, SessionMap<A>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn config(&self) -> &Arc<SessionConfig> {
        &self.config
    }

    /// Creates, initializes and registers a session for a new client.
    pub fn create(&self, env: Environment, app: A) -> Result<Arc<Session<A>>> {
        let session = Session::new(env, Arc::clone(&self.config), app)?;
        Ok(self.insert(session))
    }

    pub fn insert(&self, session: Session<A>) -> Arc<Session<A>> {
        let session = Arc::new(session);
        self.sessions()
            .insert(session.id(), Arc::clone(&session));
        session
    }

    pub fn get(&self, id: &str) -> Option<Arc<Session<A>>> {
        self.sessions().get(id).cloned()
    }

    /// Unregisters a session. It is destroyed once the last reference is dropped.
    pub fn remove(&self, id: &str) -> Option<Arc<Session<A>>> {
        self.sessions().remove(id)
    }

    pub fn session_count(&self) -> usize {
        self.sessions().len()
    }

    /// Returns the ids of all sessions, or only of those that rendered a page.
    pub fn session_ids(&self, only_rendered: bool) -> Vec<String> {
        self.sessions()
            .iter()
            .filter(|(_, session)| !only_rendered || session.is_rendered())
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Queues `f` for the session `id`.
    ///
    /// Returns `false` after running `fallback` when the session is unknown
    /// or already gone.
    pub fn post<F>(&self, id: &str, f: F, fallback: Option<Fallback>) -> bool
    where
        F: FnOnce(&mut A, &mut TurnContext<'_>) -> anyhow::Result<()> + Send + 'static,
    {
        match self.get(id) {
            Some(session) => session.post(f, fallback),
            None => {
                debug!(session = id, "post to unknown session");
                if let Some(fallback) = fallback {
                    fallback();
                }
                false
            }
        }
    }

    /// Re-keys a session under a fresh id and returns it.
    pub fn change_session_id(&self, id: &str) -> Option<String> {
        let mut sessions = self.sessions();
        let session = sessions.remove(id)?;
        let new_id = new_session_id();
        session.set_id(new_id.clone());
        sessions.insert(new_id.clone(), session);
        info!(old = id, new = %new_id, "session id changed");
        Some(new_id)
    }

    /// Destroys every session that is due at `now`. Returns how many.
    pub fn expire_sessions(&self, now: Instant) -> usize {
        let expired: Vec<Arc<Session<A>>> = {
            let mut sessions = self.sessions();
            let due: Vec<String> = sessions
                .iter()
                .filter(|(_, session)| {
                    session.is_destroyed() || session.expires_at().is_some_and(|at| at <= now)
                })
                .map(|(id, _)| id.clone())
                .collect();
            due.iter().filter_map(|id| sessions.remove(id)).collect()
        };

        for session in &expired {
            info!(session = %session.id(), "session expired");
            session.destroy();
        }
        expired.len()
    }

    /// Destroys all sessions.
    pub fn shutdown(&self) {
        let sessions: Vec<Arc<Session<A>>> = self.sessions().drain().map(|(_, s)| s).collect();
        info!(count = sessions.len(), "shutting down sessions");
        for session in sessions {
            session.destroy();
        }
    }

    /// Runs [`expire_sessions`](Self::expire_sessions) every `interval` until
    /// `cancel` fires.
    pub fn spawn_expiry_sweeper(
        self: &Arc<Self>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let registry = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let registry = Arc::clone(&registry);
                        let sweep = tokio::task::spawn_blocking(move || {
                            registry.expire_sessions(Instant::now())
                        });
                        match sweep.await {
                            Ok(0) => {}
                            Ok(expired) => debug!(expired, "expiry sweep"),
                            Err(err) => warn!(%err, "expiry sweep failed"),
                        }
                    }
                }
            }
            debug!("expiry sweeper stopped");
        })
    }
}
