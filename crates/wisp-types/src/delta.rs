//! Output of a session turn: the changes the transport sends to the client.

use serde::{Deserialize, Serialize};

use crate::cookie::Cookie;
use crate::head::{MetaHeader, MetaLink, ScriptLibrary, ScriptPreamble, StyleRule, StyleSheet};

/// DOM changes produced by the renderer for one turn.
///
/// `visible` updates what the user currently sees; `invisible` prepares
/// hidden parts of the tree (stacked pages, closed menus) and may be deferred.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DomDelta {
    pub visible: String,
    pub invisible: String,
}

impl DomDelta {
    pub fn new(visible: impl Into<String>, invisible: impl Into<String>) -> Self {
        Self {
            visible: visible.into(),
            invisible: invisible.into(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.visible.is_empty() && self.invisible.is_empty()
    }
}

/// Which part of a (possibly split) response a delta is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RenderPhase {
    /// Everything in one response.
    #[default]
    Single,
    /// Visible changes only; the client must fetch the rest.
    First,
    /// The deferred invisible changes.
    Second,
}

/// What the transport should do besides applying the delta.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RenderOutcome {
    #[default]
    Ok,
    /// The internal path is invalid and the client cannot run scripts.
    NotFound,
    /// The session has quit; an optional message offers a restart.
    Quit {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        restart_message: Option<String>,
    },
    /// Send the client elsewhere.
    Redirect { url: String },
}

/// Changes flushed at the end of a turn.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderDelta {
    pub phase: RenderPhase,
    /// Whether this is a complete page render rather than an update.
    pub full: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub libraries: Vec<ScriptLibrary>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub preambles: Vec<ScriptPreamble>,
    /// Style sheets to link, in order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub style_sheets: Vec<StyleSheet>,
    /// Hrefs of previously linked style sheets to unlink.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub removed_style_sheets: Vec<String>,
    /// Inline rules to add or replace.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub style_rules: Vec<StyleRule>,
    /// Selectors of previously sent inline rules to drop.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub removed_style_rules: Vec<String>,
    /// Script to evaluate, in order.
    pub script: String,
    /// Size of the invisible changes held back for the second phase.
    #[serde(default)]
    pub deferred_bytes: usize,
    /// New internal path the client must show, if it changed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub internal_path: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub meta_headers: Vec<MetaHeader>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub meta_links: Vec<MetaLink>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cookies: Vec<Cookie>,
    /// Client idle timer in seconds, sent with full renders.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idle_timeout_secs: Option<u64>,
    #[serde(default)]
    pub outcome: RenderOutcome,
}

impl RenderDelta {
    /// Returns whether the client must issue a second round-trip.
    pub fn is_two_phase(&self) -> bool {
        self.phase == RenderPhase::First
    }

    /// Returns whether the delta carries nothing worth sending.
    pub fn is_empty(&self) -> bool {
        self.libraries.is_empty()
            && self.preambles.is_empty()
            && self.style_sheets.is_empty()
            && self.removed_style_sheets.is_empty()
            && self.style_rules.is_empty()
            && self.removed_style_rules.is_empty()
            && self.script.is_empty()
            && self.internal_path.is_none()
            && self.meta_headers.is_empty()
            && self.meta_links.is_empty()
            && self.cookies.is_empty()
            && self.outcome == RenderOutcome::Ok
    }

    /// Folds in an earlier delta the client never received.
    ///
    /// The earlier changes go first. A full render supersedes everything but
    /// the earlier cookies and path.
    pub fn prepend(&mut self, earlier: RenderDelta) {
        let RenderDelta {
            mut libraries,
            mut preambles,
            mut style_sheets,
            mut removed_style_sheets,
            mut style_rules,
            mut removed_style_rules,
            mut script,
            internal_path,
            mut meta_headers,
            mut meta_links,
            mut cookies,
            ..
        } = earlier;

        cookies.append(&mut self.cookies);
        self.cookies = cookies;
        if self.internal_path.is_none() {
            self.internal_path = internal_path;
        }
        if self.full {
            return;
        }

        libraries.append(&mut self.libraries);
        self.libraries = libraries;
        preambles.append(&mut self.preambles);
        self.preambles = preambles;
        style_sheets.append(&mut self.style_sheets);
        self.style_sheets = style_sheets;
        removed_style_sheets.append(&mut self.removed_style_sheets);
        self.removed_style_sheets = removed_style_sheets;
        style_rules.append(&mut self.style_rules);
        self.style_rules = style_rules;
        removed_style_rules.append(&mut self.removed_style_rules);
        self.removed_style_rules = removed_style_rules;
        meta_headers.append(&mut self.meta_headers);
        self.meta_headers = meta_headers;
        meta_links.append(&mut self.meta_links);
        self.meta_links = meta_links;
        script.push_str(&self.script);
        self.script = script;
    }
}
