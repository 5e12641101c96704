//! The application collaborator and the capability it gets during a turn.
//!
//! A session owns one [`Application`]: the widget tree and everything built on
//! it. The session calls into it with a [`TurnContext`], the narrow interface
//! through which application code changes session state (internal path,
//! scripts, head content, cookies, exposed tokens, lifecycle).

use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};
use wisp_types::{
    Cookie, DomDelta, MetaHeader, MetaHeaderType, MetaLink, StyleRule, StyleSheet,
};

use super::exposure::{ExposedTarget, ObjectId};
use super::lifecycle::LifecycleState;
use super::{Environment, SessionCore, SessionMeta, url};
use crate::config::SessionConfig;
use crate::error::Result;

/// Something the session tells the application about, within the turn that
/// caused it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    /// The internal path changed (from code with `emit_change`, or from the
    /// client).
    InternalPathChanged(String),
    /// No handler of the preceding change accepted the new path.
    InternalPathInvalid(String),
    /// The client returned to a suspended session.
    Unsuspended,
    /// A request was rejected for exceeding the size limit.
    RequestTooLarge(u64),
}

/// The server-side application of one session.
///
/// Hooks returning `anyhow::Result` terminate the session on `Err`.
pub trait Application: Send + 'static {
    /// Builds the initial tree. The session becomes active when this succeeds.
    fn initialize(&mut self, _ctx: &mut TurnContext<'_>) -> anyhow::Result<()> {
        Ok(())
    }

    /// Last call before the tree is dropped.
    fn finalize(&mut self) {}

    /// An exposed signal fired in the client.
    fn handle_signal(
        &mut self,
        ctx: &mut TurnContext<'_>,
        target: &ExposedTarget,
        args: &[String],
    ) -> anyhow::Result<()>;

    fn notified(
        &mut self,
        _ctx: &mut TurnContext<'_>,
        _notification: &Notification,
    ) -> anyhow::Result<()> {
        Ok(())
    }

    /// The client reported the user idle. Quits by default.
    fn idle_timeout(&mut self, ctx: &mut TurnContext<'_>) -> anyhow::Result<()> {
        info!(session = %ctx.session_id(), "idle timeout, quitting");
        ctx.quit(None);
        Ok(())
    }

    /// The page was unloaded.
    fn unload(&mut self, ctx: &mut TurnContext<'_>) -> anyhow::Result<()> {
        ctx.apply_unload_policy();
        Ok(())
    }

    fn script_error(&mut self, ctx: &mut TurnContext<'_>, text: &str) -> anyhow::Result<()> {
        error!(session = %ctx.session_id(), text, "client script error");
        Ok(())
    }

    /// Renders pending DOM changes. `full` asks for the whole page.
    fn collect_changes(&mut self, _full: bool) -> DomDelta {
        DomDelta::default()
    }

    /// Returns whether `widget` is `ancestor` or lies inside it.
    fn is_descendant(&self, widget: ObjectId, ancestor: ObjectId) -> bool {
        widget == ancestor
    }
}

/// Session capabilities available to application code during a turn.
pub struct TurnContext<'a> {
    pub(super) core: &'a mut SessionCore,
    pub(super) meta: &'a SessionMeta,
}

impl<'a> TurnContext<'a> {
    pub(super) fn new(core: &'a mut SessionCore, meta: &'a SessionMeta) -> Self {
        Self { core, meta }
    }

    pub fn session_id(&self) -> String {
        self.meta.id()
    }

    pub fn environment(&self) -> &Environment {
        &self.meta.env
    }

    pub fn config(&self) -> &SessionConfig {
        &self.meta.config
    }

    pub fn lifecycle(&self) -> LifecycleState {
        self.core.lifecycle
    }

    // Internal path

    pub fn internal_path(&self) -> &str {
        self.core.path.current_path()
    }

    /// Changes the internal path; see [`PathRouter::set_path`](super::path::PathRouter::set_path).
    pub fn set_internal_path(&mut self, path: &str, emit_change: bool) -> Result<()> {
        self.core.path.set_path(path, emit_change)?;
        Ok(())
    }

    pub fn internal_path_matches(&self, base: &str) -> bool {
        self.core.path.matches(base)
    }

    pub fn internal_path_next_part(&self, base: &str) -> String {
        self.core.path.next_part(base)
    }

    pub fn internal_sub_path(&self, base: &str) -> String {
        self.core.path.sub_path(base)
    }

    pub fn internal_path_valid(&self) -> bool {
        self.core.path.is_valid()
    }

    /// Accepts (or rejects) the current internal path.
    pub fn set_internal_path_valid(&mut self, valid: bool) {
        self.core.path.set_valid(valid);
    }

    pub fn set_internal_path_default_valid(&mut self, valid: bool) {
        self.core.path.set_default_valid(valid);
    }

    /// URL a user can bookmark to come back to `internal_path`.
    pub fn bookmark_url(&self, internal_path: &str) -> String {
        let env = &self.meta.env;
        let id = self.meta.id();
        url::bookmark_url(
            &env.deployment_path,
            internal_path,
            (!env.supports_cookies).then_some(id.as_str()),
        )
    }

    // Scripts and head content

    pub fn add_script(&mut self, js: &str, run_after_load: bool) {
        self.core.batch.add_script(js, run_after_load);
    }

    pub fn add_auto_script(&mut self, js: &str) {
        self.core.batch.add_auto_script(js);
    }

    pub fn declare_function(&mut self, name: &str, function: &str) {
        self.core.batch.declare_function(name, function);
    }

    /// Loads a script library once per session. Returns whether it was new.
    pub fn require(&mut self, url: &str, symbol: Option<&str>) -> bool {
        self.core.batch.require(url, symbol)
    }

    /// Links a style sheet once per session. Returns whether it was new.
    pub fn use_style_sheet(&mut self, sheet: StyleSheet) -> bool {
        self.core.batch.use_style_sheet(sheet)
    }

    pub fn remove_style_sheet(&mut self, href: &str) -> bool {
        self.core.batch.remove_style_sheet(href)
    }

    /// Adds or replaces an inline CSS rule.
    pub fn add_style_rule(&mut self, selector: &str, declarations: &str) {
        self.core
            .batch
            .add_style_rule(StyleRule::new(selector, declarations));
    }

    pub fn remove_style_rule(&mut self, selector: &str) -> bool {
        self.core.batch.remove_style_rule(selector)
    }

    pub fn add_meta_header(&mut self, header: MetaHeader) -> Result<()> {
        self.core.batch.add_meta_header(header)
    }

    pub fn remove_meta_header(&mut self, kind: MetaHeaderType, name: Option<&str>) -> Result<()> {
        self.core.batch.remove_meta_header(kind, name)
    }

    pub fn meta_header(&self, kind: MetaHeaderType, name: &str) -> Option<&str> {
        self.core.batch.meta_header(kind, name)
    }

    pub fn add_meta_link(&mut self, link: MetaLink) -> Result<()> {
        self.core.batch.add_meta_link(link)
    }

    pub fn remove_meta_link(&mut self, href: &str) -> Result<()> {
        self.core.batch.remove_meta_link(href)
    }

    // Cookies

    pub fn set_cookie(&mut self, cookie: Cookie) {
        self.core.cookies.set(cookie);
    }

    pub fn remove_cookie(&mut self, name: &str, domain: Option<&str>, path: Option<&str>) {
        self.core.cookies.remove(name, domain, path);
    }

    pub fn added_cookie(&self, name: &str) -> Option<&str> {
        self.core.cookies.added(name)
    }

    // Exposure

    pub fn expose(&mut self, target: ExposedTarget) -> String {
        self.core.exposure.expose(target)
    }

    pub fn withdraw(&mut self, target: &ExposedTarget) -> bool {
        self.core.exposure.withdraw(target)
    }

    /// Withdraws every token of a widget that is going away.
    pub fn withdraw_object(&mut self, object: ObjectId) -> usize {
        self.core.exposed_constraints.retain(|c| *c != object);
        self.core.exposure.withdraw_object(object)
    }

    pub fn encode_object(&mut self, object: ObjectId) -> String {
        self.core.exposure.encode_object(object)
    }

    pub fn decode_object(&self, token: &str) -> Option<ObjectId> {
        self.core.exposure.decode_object(token)
    }

    /// Restricts client events to widgets inside `widget` (a modal dialog).
    pub fn push_exposed_constraint(&mut self, widget: ObjectId) {
        self.core.exposed_constraints.push(widget);
    }

    pub fn pop_exposed_constraint(&mut self, widget: ObjectId) {
        if let Some(pos) = self
            .core
            .exposed_constraints
            .iter()
            .rposition(|c| *c == widget)
        {
            self.core.exposed_constraints.remove(pos);
        } else {
            debug!(%widget, "exposed constraint was not pushed");
        }
    }

    // Lifecycle

    /// Ends the session once the current turn has been rendered.
    ///
    /// `restart_message` is shown by the client with an offer to start over.
    pub fn quit(&mut self, restart_message: Option<String>) {
        if self.core.lifecycle.is_quitting() {
            return;
        }
        if self
            .core
            .lifecycle
            .transition(LifecycleState::Quitting)
            .is_ok()
        {
            self.core.quit_message = restart_message;
            self.meta.expiry().quitting = true;
        }
    }

    pub fn is_quitting(&self) -> bool {
        self.core.lifecycle.is_quitting()
    }

    /// Sends the client to `url` with the next response.
    pub fn redirect(&mut self, url: impl Into<String>) {
        self.core.redirect = Some(url.into());
    }

    /// Lets the client leave while keeping the session for `duration`.
    pub fn suspend(&mut self, duration: Duration) -> Result<()> {
        self.core.lifecycle.transition(LifecycleState::Suspended)?;
        self.meta.expiry().suspended_until = Some(Instant::now() + duration);
        info!(session = %self.session_id(), ?duration, "session suspended");
        Ok(())
    }

    /// Brings a suspended session back and announces it.
    pub fn resume(&mut self) -> Result<()> {
        if self.core.lifecycle != LifecycleState::Suspended {
            debug!(state = %self.core.lifecycle, "resume ignored");
            return Ok(());
        }
        self.core.lifecycle.transition(LifecycleState::Active)?;
        self.meta.expiry().suspended_until = None;
        self.core
            .notifications
            .push_back(Notification::Unsuspended);
        Ok(())
    }

    /// Quits, or keeps the session for a short grace period when a reload
    /// reconnects to the same session.
    pub fn apply_unload_policy(&mut self) {
        let meta = self.meta;
        let config = &meta.config;
        if config.reload_is_new_session {
            info!(session = %self.session_id(), "page unloaded, quitting");
            self.quit(None);
        } else {
            let grace = config.unload_grace;
            info!(session = %self.session_id(), ?grace, "page unloaded, expiring unless reloaded");
            meta.expiry().unload_deadline = Some(Instant::now() + grace);
        }
    }

    // Server push

    /// Adds (`true`) or removes (`false`) a server-push enabler.
    pub fn enable_updates(&mut self, enabled: bool) {
        self.meta.gate.enable_push(enabled);
    }

    pub fn updates_enabled(&self) -> bool {
        self.meta.gate.push_enabled()
    }

    /// Pushes pending changes when the session lock is next released.
    pub fn trigger_update(&mut self) {
        if !self.meta.gate.trigger_push() {
            warn!(session = %self.session_id(), "trigger_update without enabled updates");
        }
    }
}
