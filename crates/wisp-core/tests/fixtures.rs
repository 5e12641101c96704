//! A small routed application used by the integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use wisp_core::wisp_types::DomDelta;
use wisp_core::{
    Application, Environment, ExposedTarget, Notification, ObjectId, Session, SessionConfig,
    TurnContext,
};

pub const NAV_LINK: ObjectId = ObjectId(1);
pub const DIALOG: ObjectId = ObjectId(2);
pub const DIALOG_BUTTON: ObjectId = ObjectId(3);

/// Serves `/` and `/docs/<topic>` for a fixed set of topics.
#[derive(Default)]
pub struct Docs {
    pub topics: Vec<String>,
    pub shown: Option<String>,
    pub notifications: Vec<Notification>,
    pub clicks: usize,
    /// Token of the navigation link's `clicked` signal.
    pub nav_token: String,
    /// Pending DOM output, drained by `collect_changes`.
    pub visible: String,
    pub invisible: String,
}

impl Docs {
    pub fn with_topics(topics: &[&str]) -> Self {
        Self {
            topics: topics.iter().map(|t| (*t).to_string()).collect(),
            ..Self::default()
        }
    }

    fn route(&mut self, ctx: &mut TurnContext<'_>) {
        if ctx.internal_path() == "/" {
            self.shown = None;
            ctx.set_internal_path_valid(true);
        } else if ctx.internal_path_matches("/docs") {
            let topic = ctx.internal_path_next_part("/docs/");
            if self.topics.contains(&topic) {
                self.visible.push_str(&format!("show('{topic}');"));
                self.shown = Some(topic);
                ctx.set_internal_path_valid(true);
            } else {
                ctx.set_internal_path_valid(false);
            }
        }
    }
}

impl Application for Docs {
    fn initialize(&mut self, ctx: &mut TurnContext<'_>) -> anyhow::Result<()> {
        ctx.require("/js/docs.js", Some("Docs"));
        self.nav_token = ctx.expose(ExposedTarget::signal(NAV_LINK, "clicked"));
        self.route(ctx);
        Ok(())
    }

    fn handle_signal(
        &mut self,
        ctx: &mut TurnContext<'_>,
        target: &ExposedTarget,
        args: &[String],
    ) -> anyhow::Result<()> {
        self.clicks += 1;
        if target.object == NAV_LINK
            && let Some(path) = args.first()
        {
            ctx.set_internal_path(path, true)?;
        }
        Ok(())
    }

    fn notified(
        &mut self,
        ctx: &mut TurnContext<'_>,
        notification: &Notification,
    ) -> anyhow::Result<()> {
        self.notifications.push(notification.clone());
        if let Notification::InternalPathChanged(_) = notification {
            self.route(ctx);
        }
        Ok(())
    }

    fn collect_changes(&mut self, full: bool) -> DomDelta {
        let mut visible = std::mem::take(&mut self.visible);
        if full {
            visible.insert_str(0, "render_page();");
        }
        DomDelta::new(visible, std::mem::take(&mut self.invisible))
    }

    fn is_descendant(&self, widget: ObjectId, ancestor: ObjectId) -> bool {
        widget == ancestor || (ancestor == DIALOG && widget == DIALOG_BUTTON)
    }
}

pub fn docs_session(env: Environment, config: SessionConfig) -> Session<Docs> {
    Session::new(env, Arc::new(config), Docs::with_topics(&["intro", "install"])).unwrap()
}

pub fn default_docs_session() -> Session<Docs> {
    docs_session(Environment::default(), SessionConfig::default())
}
