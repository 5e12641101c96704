//! Per-turn accumulation of client-side changes.
//!
//! Scripts, libraries, function declarations, style sheets and head content
//! pile up here while a turn runs and are drained by [`ChangeBatcher::flush`].
//! Buckets are cleared when read; a full page render re-sends what a fresh
//! page needs (libraries, declarations, style, before-load scripts, head
//! content).

use std::collections::HashSet;

use tracing::debug;
use wisp_types::{
    DomDelta, MetaHeader, MetaHeaderType, MetaLink, RenderDelta, RenderPhase, ScriptLibrary,
    ScriptPreamble, StyleRule, StyleSheet,
};

use crate::error::{Result, SessionError};

#[derive(Debug, Default)]
pub struct ChangeBatcher {
    /// Whether the client runs scripts; plain-HTML clients always get full renders.
    interactive: bool,
    rendered_once: bool,

    before_load: String,
    /// Every before-load statement so far, replayed on full renders.
    page_setup: String,
    after_load: String,

    auto_script: String,
    auto_changed: bool,

    libraries: Vec<ScriptLibrary>,
    libraries_sent: usize,
    required: HashSet<String>,

    preambles: Vec<ScriptPreamble>,
    preambles_sent: usize,

    style_sheets: Vec<StyleSheet>,
    style_sheets_sent: usize,
    removed_style_sheets: Vec<String>,
    style_rules: Vec<StyleRule>,
    style_rules_sent: usize,
    removed_style_rules: Vec<String>,

    meta_headers: Vec<MetaHeader>,
    meta_links: Vec<MetaLink>,

    /// Invisible changes waiting for the second phase.
    deferred: String,
}

impl ChangeBatcher {
    pub fn new(interactive: bool) -> Self {
        Self {
            interactive,
            ..Self::default()
        }
    }

    /// Queues a JavaScript statement.
    ///
    /// Before-load statements run ahead of the libraries required this turn
    /// and are replayed on every full render.
    pub fn add_script(&mut self, js: &str, run_after_load: bool) {
        let mut statement = js.to_string();
        if !js.ends_with(';') && !js.ends_with('\n') {
            statement.push(';');
        }
        if run_after_load {
            self.after_load.push_str(&statement);
        } else {
            self.page_setup.push_str(&statement);
            self.before_load.push_str(&statement);
        }
    }

    /// Adds a statement that re-runs after every DOM update.
    pub fn add_auto_script(&mut self, js: &str) {
        self.auto_script.push_str(js);
        self.auto_changed = true;
    }

    /// Requests an external library.
    ///
    /// Returns `true` only the first time `url` is requested during the
    /// session's lifetime; the symbol of later requests is ignored.
    pub fn require(&mut self, url: &str, symbol: Option<&str>) -> bool {
        if !self.required.insert(url.to_string()) {
            debug!(url, "library already required");
            return false;
        }
        self.libraries.push(ScriptLibrary {
            url: url.to_string(),
            symbol: symbol.map(str::to_string),
        });
        true
    }

    /// Declares a named function on the client application object.
    ///
    /// Redeclaring a name replaces the body; the new body is streamed again.
    pub fn declare_function(&mut self, name: &str, function: &str) {
        if let Some(pos) = self.preambles.iter().position(|p| p.name == name) {
            let old = self.preambles.remove(pos);
            if old.function == function {
                self.preambles.insert(pos, old);
                return;
            }
            if pos < self.preambles_sent {
                self.preambles_sent -= 1;
            }
        }
        self.preambles.push(ScriptPreamble {
            name: name.to_string(),
            function: function.to_string(),
        });
    }

    /// Links a style sheet. Returns `false` if `href` is already linked.
    pub fn use_style_sheet(&mut self, sheet: StyleSheet) -> bool {
        if self.style_sheets.iter().any(|s| s.href == sheet.href) {
            debug!(href = %sheet.href, "style sheet already linked");
            return false;
        }
        self.style_sheets.push(sheet);
        true
    }

    /// Unlinks a style sheet. A sheet the client already has is removed there
    /// with the next flush.
    pub fn remove_style_sheet(&mut self, href: &str) -> bool {
        let Some(pos) = self.style_sheets.iter().position(|s| s.href == href) else {
            return false;
        };
        self.style_sheets.remove(pos);
        if pos < self.style_sheets_sent {
            self.style_sheets_sent -= 1;
            self.removed_style_sheets.push(href.to_string());
        }
        true
    }

    /// Adds or replaces the inline rule for `rule.selector`.
    pub fn add_style_rule(&mut self, rule: StyleRule) {
        if let Some(pos) = self
            .style_rules
            .iter()
            .position(|r| r.selector == rule.selector)
        {
            if self.style_rules[pos] == rule {
                return;
            }
            self.style_rules.remove(pos);
            if pos < self.style_rules_sent {
                self.style_rules_sent -= 1;
            }
        }
        self.style_rules.push(rule);
    }

    pub fn remove_style_rule(&mut self, selector: &str) -> bool {
        let Some(pos) = self.style_rules.iter().position(|r| r.selector == selector) else {
            return false;
        };
        self.style_rules.remove(pos);
        if pos < self.style_rules_sent {
            self.style_rules_sent -= 1;
            self.removed_style_rules.push(selector.to_string());
        }
        true
    }

    /// Returns whether head content may still change in this turn.
    ///
    /// Interactive clients only read the head on the first full render.
    pub fn head_mutable(&self) -> bool {
        !self.interactive || !self.rendered_once
    }

    fn check_head_mutable(&self, what: &str) -> Result<()> {
        if self.head_mutable() {
            Ok(())
        } else {
            Err(SessionError::invalid_state(format!(
                "cannot {what} after the page has been rendered"
            )))
        }
    }

    /// Adds or replaces the meta header keyed by `(kind, name)`.
    pub fn add_meta_header(&mut self, header: MetaHeader) -> Result<()> {
        self.check_head_mutable("add a meta header")?;
        match self
            .meta_headers
            .iter_mut()
            .find(|h| h.kind == header.kind && h.name == header.name)
        {
            Some(existing) => *existing = header,
            None => self.meta_headers.push(header),
        }
        Ok(())
    }

    /// Removes meta headers of `kind`; `None` removes every header of that kind.
    pub fn remove_meta_header(&mut self, kind: MetaHeaderType, name: Option<&str>) -> Result<()> {
        self.check_head_mutable("remove a meta header")?;
        self.meta_headers
            .retain(|h| h.kind != kind || name.is_some_and(|name| h.name != name));
        Ok(())
    }

    pub fn meta_header(&self, kind: MetaHeaderType, name: &str) -> Option<&str> {
        self.meta_headers
            .iter()
            .find(|h| h.kind == kind && h.name == name)
            .map(|h| h.content.as_str())
    }

    /// Adds or replaces the link keyed by `href`.
    pub fn add_meta_link(&mut self, link: MetaLink) -> Result<()> {
        self.check_head_mutable("add a meta link")?;
        match self.meta_links.iter_mut().find(|l| l.href == link.href) {
            Some(existing) => *existing = link,
            None => self.meta_links.push(link),
        }
        Ok(())
    }

    pub fn remove_meta_link(&mut self, href: &str) -> Result<()> {
        self.check_head_mutable("remove a meta link")?;
        self.meta_links.retain(|l| l.href != href);
        Ok(())
    }

    /// Returns whether anything is waiting to be flushed.
    pub fn has_pending(&self) -> bool {
        !self.before_load.is_empty()
            || !self.after_load.is_empty()
            || self.auto_changed
            || self.libraries.len() > self.libraries_sent
            || self.preambles.len() > self.preambles_sent
            || self.style_sheets.len() > self.style_sheets_sent
            || self.style_rules.len() > self.style_rules_sent
            || !self.removed_style_sheets.is_empty()
            || !self.removed_style_rules.is_empty()
    }

    /// Drains pending changes together with the renderer's DOM changes.
    ///
    /// When the invisible part of `dom` (plus anything still deferred) is
    /// larger than `threshold` bytes, it is held back and the delta is
    /// [`RenderPhase::First`]; the transport fetches it with
    /// [`take_deferred`](Self::take_deferred). The visible part always goes
    /// out in the first phase.
    ///
    /// A full render starts from a fresh page: it replays the whole page
    /// setup and drops invisible changes deferred for the old one.
    pub fn flush(&mut self, dom: DomDelta, threshold: usize, full: bool) -> RenderDelta {
        let full = full || !self.interactive;
        let mut delta = RenderDelta {
            full,
            ..RenderDelta::default()
        };

        let sent = if full {
            [0; 4]
        } else {
            [
                self.libraries_sent,
                self.preambles_sent,
                self.style_sheets_sent,
                self.style_rules_sent,
            ]
        };
        delta.libraries = self.libraries[sent[0]..].to_vec();
        delta.preambles = self.preambles[sent[1]..].to_vec();
        delta.style_sheets = self.style_sheets[sent[2]..].to_vec();
        delta.style_rules = self.style_rules[sent[3]..].to_vec();
        self.libraries_sent = self.libraries.len();
        self.preambles_sent = self.preambles.len();
        self.style_sheets_sent = self.style_sheets.len();
        self.style_rules_sent = self.style_rules.len();

        let removed_sheets = std::mem::take(&mut self.removed_style_sheets);
        let removed_rules = std::mem::take(&mut self.removed_style_rules);
        let before_load = std::mem::take(&mut self.before_load);
        let mut script = if full {
            if !self.deferred.is_empty() {
                debug!(
                    bytes = self.deferred.len(),
                    "full render drops deferred changes"
                );
                self.deferred.clear();
            }
            self.page_setup.clone()
        } else {
            delta.removed_style_sheets = removed_sheets;
            delta.removed_style_rules = removed_rules;
            before_load
        };

        let dom_changed = !dom.is_empty();
        script.push_str(&dom.visible);

        let mut invisible = std::mem::take(&mut self.deferred);
        invisible.push_str(&dom.invisible);
        if invisible.len() > threshold {
            delta.phase = RenderPhase::First;
            delta.deferred_bytes = invisible.len();
            debug!(
                bytes = invisible.len(),
                threshold, "deferring invisible changes to second phase"
            );
            self.deferred = invisible;
        } else {
            script.push_str(&invisible);
        }

        script.push_str(&std::mem::take(&mut self.after_load));
        if self.auto_changed || dom_changed || full {
            script.push_str(&self.auto_script);
        }
        self.auto_changed = false;
        delta.script = script;

        if full {
            delta.meta_headers.clone_from(&self.meta_headers);
            delta.meta_links.clone_from(&self.meta_links);
            self.rendered_once = true;
        }

        delta
    }

    /// Takes the invisible changes held back by a two-phase flush.
    pub fn take_deferred(&mut self) -> Option<RenderDelta> {
        if self.deferred.is_empty() {
            return None;
        }
        let script = std::mem::take(&mut self.deferred);
        Some(RenderDelta {
            phase: RenderPhase::Second,
            script,
            ..RenderDelta::default()
        })
    }

    pub fn rendered_once(&self) -> bool {
        self.rendered_once
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rendered(interactive: bool) -> ChangeBatcher {
        let mut batcher = ChangeBatcher::new(interactive);
        batcher.flush(DomDelta::default(), 5000, true);
        batcher
    }

    #[test]
    fn test_require_returns_true_once_per_url() {
        let mut batcher = ChangeBatcher::new(true);
        assert!(batcher.require("/js/chart.js", None));
        assert!(!batcher.require("/js/chart.js", Some("Chart")));
        assert!(batcher.require("/js/other.js", Some("Other")));

        let delta = batcher.flush(DomDelta::default(), 5000, false);
        assert_eq!(delta.libraries.len(), 2);
        assert_eq!(delta.libraries[0].symbol, None);

        // Still false after the library went out.
        assert!(!batcher.require("/js/chart.js", None));
    }

    #[test]
    fn test_flush_is_erase_on_read() {
        let mut batcher = rendered(true);
        batcher.add_script("a()", false);
        batcher.add_script("b()", true);

        let delta = batcher.flush(DomDelta::default(), 5000, false);
        assert_eq!(delta.script, "a();b();");

        let delta = batcher.flush(DomDelta::default(), 5000, false);
        assert!(delta.script.is_empty());
        assert!(delta.is_empty());
    }

    #[test]
    fn test_script_order_before_dom_after() {
        let mut batcher = rendered(true);
        batcher.add_script("after()", true);
        batcher.add_script("before()", false);

        let delta = batcher.flush(DomDelta::new("visible();", "hidden();"), 5000, false);
        assert_eq!(delta.script, "before();visible();hidden();after();");
    }

    #[test]
    fn test_two_phase_exactly_above_threshold() {
        let threshold = 10;

        let mut batcher = rendered(true);
        let at = "x".repeat(threshold);
        let delta = batcher.flush(DomDelta::new("v;", at.clone()), threshold, false);
        assert_eq!(delta.phase, RenderPhase::Single);
        assert!(delta.script.contains(&at));
        assert!(batcher.take_deferred().is_none());

        let above = "y".repeat(threshold + 1);
        let delta = batcher.flush(DomDelta::new("v;", above.clone()), threshold, false);
        assert!(delta.is_two_phase());
        assert_eq!(delta.deferred_bytes, threshold + 1);
        assert!(delta.script.contains("v;"), "visible part goes out first");
        assert!(!delta.script.contains(&above));

        let second = batcher.take_deferred().unwrap();
        assert_eq!(second.phase, RenderPhase::Second);
        assert_eq!(second.script, above);
        assert!(batcher.take_deferred().is_none());
    }

    #[test]
    fn test_unfetched_deferred_changes_are_not_lost() {
        let mut batcher = rendered(true);
        batcher.flush(DomDelta::new("", "a".repeat(20)), 10, false);
        let delta = batcher.flush(DomDelta::new("", "b"), 10, false);
        assert!(delta.is_two_phase());
        assert_eq!(batcher.take_deferred().unwrap().script.len(), 21);
    }

    #[test]
    fn test_full_render_replays_page_setup() {
        let mut batcher = ChangeBatcher::new(true);
        batcher.require("/lib.js", None);
        batcher.declare_function("f", "function(){}");
        batcher.add_script("setup()", false);
        batcher.flush(DomDelta::default(), 5000, true);

        let update = batcher.flush(DomDelta::default(), 5000, false);
        assert!(update.libraries.is_empty());
        assert!(update.preambles.is_empty());
        assert!(update.script.is_empty());

        let reload = batcher.flush(DomDelta::default(), 5000, true);
        assert_eq!(reload.libraries.len(), 1);
        assert_eq!(reload.preambles.len(), 1);
        assert_eq!(reload.script, "setup();");
    }

    #[test]
    fn test_before_load_bucket_is_drained() {
        let mut batcher = rendered(true);
        batcher.add_script("setup()", false);

        let delta = batcher.flush(DomDelta::default(), 5000, false);
        assert_eq!(delta.script, "setup();");
        assert!(batcher.before_load.is_empty());

        let delta = batcher.flush(DomDelta::default(), 5000, false);
        assert!(delta.script.is_empty());
        assert!(!batcher.has_pending());
    }

    #[test]
    fn test_full_render_drops_stale_deferred_changes() {
        let mut batcher = rendered(true);
        let delta = batcher.flush(DomDelta::new("", "old".repeat(10)), 10, false);
        assert!(delta.is_two_phase());

        let reload = batcher.flush(DomDelta::new("page();", ""), 10, true);
        assert_eq!(reload.phase, RenderPhase::Single);
        assert!(!reload.script.contains("old"));
        assert!(batcher.take_deferred().is_none());
    }

    #[test]
    fn test_style_sheets_stream_once_and_queue_removals() {
        let mut batcher = rendered(true);
        assert!(batcher.use_style_sheet(StyleSheet::new("/css/a.css")));
        assert!(!batcher.use_style_sheet(StyleSheet::new("/css/a.css").with_media("print")));
        assert!(batcher.use_style_sheet(StyleSheet::new("/css/b.css")));

        let delta = batcher.flush(DomDelta::default(), 5000, false);
        assert_eq!(delta.style_sheets.len(), 2);
        assert!(batcher.flush(DomDelta::default(), 5000, false).is_empty());

        // Unsent sheets vanish quietly; sent ones are unlinked on the client.
        batcher.use_style_sheet(StyleSheet::new("/css/c.css"));
        assert!(batcher.remove_style_sheet("/css/c.css"));
        assert!(batcher.remove_style_sheet("/css/a.css"));
        assert!(!batcher.remove_style_sheet("/css/missing.css"));

        let delta = batcher.flush(DomDelta::default(), 5000, false);
        assert!(delta.style_sheets.is_empty());
        assert_eq!(delta.removed_style_sheets, vec!["/css/a.css".to_string()]);
        assert!(batcher.flush(DomDelta::default(), 5000, false).is_empty());
    }

    #[test]
    fn test_style_rules_restream_on_change() {
        let mut batcher = rendered(true);
        batcher.add_style_rule(StyleRule::new(".error", "color: red"));
        batcher.add_style_rule(StyleRule::new(".hint", "color: grey"));
        let delta = batcher.flush(DomDelta::default(), 5000, false);
        assert_eq!(delta.style_rules.len(), 2);

        batcher.add_style_rule(StyleRule::new(".error", "color: red"));
        assert!(!batcher.has_pending());

        batcher.add_style_rule(StyleRule::new(".error", "color: orange"));
        assert!(batcher.remove_style_rule(".hint"));
        let delta = batcher.flush(DomDelta::default(), 5000, false);
        assert_eq!(
            delta.style_rules,
            vec![StyleRule::new(".error", "color: orange")]
        );
        assert_eq!(delta.removed_style_rules, vec![".hint".to_string()]);
    }

    #[test]
    fn test_full_render_replays_current_style() {
        let mut batcher = rendered(true);
        batcher.use_style_sheet(StyleSheet::new("/css/a.css"));
        batcher.use_style_sheet(StyleSheet::new("/css/b.css"));
        batcher.add_style_rule(StyleRule::new(".x", "margin: 0"));
        batcher.flush(DomDelta::default(), 5000, false);
        batcher.remove_style_sheet("/css/a.css");

        let reload = batcher.flush(DomDelta::default(), 5000, true);
        assert_eq!(reload.style_sheets, vec![StyleSheet::new("/css/b.css")]);
        assert_eq!(reload.style_rules.len(), 1);
        assert!(reload.removed_style_sheets.is_empty(), "a fresh page has nothing to unlink");

        let update = batcher.flush(DomDelta::default(), 5000, false);
        assert!(update.style_sheets.is_empty());
        assert!(update.removed_style_sheets.is_empty());
    }

    #[test]
    fn test_declare_function_streams_changes_once() {
        let mut batcher = rendered(true);
        batcher.declare_function("f", "function(){return 1}");
        let delta = batcher.flush(DomDelta::default(), 5000, false);
        assert_eq!(delta.preambles.len(), 1);

        batcher.declare_function("f", "function(){return 1}");
        assert!(!batcher.has_pending());

        batcher.declare_function("f", "function(){return 2}");
        let delta = batcher.flush(DomDelta::default(), 5000, false);
        assert_eq!(delta.preambles.len(), 1);
        assert_eq!(delta.preambles[0].function, "function(){return 2}");
    }

    #[test]
    fn test_auto_script_follows_dom_changes() {
        let mut batcher = rendered(true);
        batcher.add_auto_script("layout();");
        let delta = batcher.flush(DomDelta::default(), 5000, false);
        assert_eq!(delta.script, "layout();");

        let delta = batcher.flush(DomDelta::default(), 5000, false);
        assert!(delta.script.is_empty());

        let delta = batcher.flush(DomDelta::new("x;", ""), 5000, false);
        assert_eq!(delta.script, "x;layout();");
    }

    #[test]
    fn test_meta_header_upsert_by_kind_and_name() {
        let mut batcher = ChangeBatcher::new(true);
        batcher
            .add_meta_header(MetaHeader::new(MetaHeaderType::Meta, "robots", "index"))
            .unwrap();
        batcher
            .add_meta_header(MetaHeader::new(MetaHeaderType::Meta, "robots", "noindex"))
            .unwrap();
        batcher
            .add_meta_header(MetaHeader::new(MetaHeaderType::Property, "robots", "x"))
            .unwrap();

        assert_eq!(
            batcher.meta_header(MetaHeaderType::Meta, "robots"),
            Some("noindex")
        );
        let delta = batcher.flush(DomDelta::default(), 5000, true);
        assert_eq!(delta.meta_headers.len(), 2);
    }

    #[test]
    fn test_remove_meta_header_without_name_clears_kind() {
        let mut batcher = ChangeBatcher::new(true);
        for name in ["a", "b"] {
            batcher
                .add_meta_header(MetaHeader::new(MetaHeaderType::Meta, name, "1"))
                .unwrap();
        }
        batcher
            .add_meta_header(MetaHeader::new(MetaHeaderType::HttpHeader, "a", "1"))
            .unwrap();

        batcher
            .remove_meta_header(MetaHeaderType::Meta, Some("a"))
            .unwrap();
        assert!(batcher.meta_header(MetaHeaderType::Meta, "a").is_none());
        assert!(batcher.meta_header(MetaHeaderType::Meta, "b").is_some());

        batcher.remove_meta_header(MetaHeaderType::Meta, None).unwrap();
        assert!(batcher.meta_header(MetaHeaderType::Meta, "b").is_none());
        assert!(batcher.meta_header(MetaHeaderType::HttpHeader, "a").is_some());
    }

    #[test]
    fn test_head_is_frozen_after_interactive_render() {
        let mut batcher = rendered(true);
        let err = batcher
            .add_meta_header(MetaHeader::new(MetaHeaderType::Meta, "k", "v"))
            .unwrap_err();
        assert!(matches!(err, SessionError::InvalidState(_)));
        assert!(batcher.add_meta_link(MetaLink::new("/a.css", "stylesheet")).is_err());
        assert!(batcher.remove_meta_link("/a.css").is_err());
    }

    #[test]
    fn test_plain_html_clients_keep_head_mutable() {
        let mut batcher = rendered(false);
        batcher
            .add_meta_link(MetaLink::new("/a.css", "stylesheet"))
            .unwrap();
        batcher
            .add_meta_link(MetaLink::new("/a.css", "alternate stylesheet"))
            .unwrap();

        let delta = batcher.flush(DomDelta::default(), 5000, false);
        assert!(delta.full, "plain clients always get full renders");
        assert_eq!(delta.meta_links.len(), 1);
        assert_eq!(delta.meta_links[0].rel, "alternate stylesheet");
    }
}
