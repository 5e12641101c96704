//! Document head content and script library descriptors.

use serde::{Deserialize, Serialize};

/// Kind of a `<meta>` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetaHeaderType {
    /// `<meta name=...>`
    Meta,
    /// `<meta http-equiv=...>`
    HttpHeader,
    /// `<meta property=...>`
    Property,
}

/// A `<meta>` header. Keyed by `(kind, name)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetaHeader {
    pub kind: MetaHeaderType,
    pub name: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lang: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
}

impl MetaHeader {
    pub fn new(kind: MetaHeaderType, name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
            content: content.into(),
            lang: None,
            user_agent: None,
        }
    }

    #[must_use]
    pub fn with_lang(mut self, lang: impl Into<String>) -> Self {
        self.lang = Some(lang.into());
        self
    }
}

/// A `<link>` element in the document head. Keyed by `href`.
///
/// Empty optional attributes are omitted when rendered.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MetaLink {
    pub href: String,
    pub rel: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub media: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub hreflang: String,
    #[serde(default, rename = "type", skip_serializing_if = "String::is_empty")]
    pub link_type: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub sizes: String,
    #[serde(default)]
    pub disabled: bool,
}

impl MetaLink {
    pub fn new(href: impl Into<String>, rel: impl Into<String>) -> Self {
        Self {
            href: href.into(),
            rel: rel.into(),
            ..Self::default()
        }
    }
}

/// An external script library requested by the session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptLibrary {
    pub url: String,
    /// Global symbol whose presence means the library is already loaded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub symbol: Option<String>,
}

/// A named JavaScript function declared on the application object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptPreamble {
    pub name: String,
    pub function: String,
}

/// An external style sheet linked into the page. Keyed by `href`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StyleSheet {
    pub href: String,
    /// Media query, e.g. `print`; empty means all media.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub media: String,
    /// Conditional-comment condition for legacy browsers, e.g. `lt IE 9`.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub condition: String,
}

impl StyleSheet {
    pub fn new(href: impl Into<String>) -> Self {
        Self {
            href: href.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_media(mut self, media: impl Into<String>) -> Self {
        self.media = media.into();
        self
    }

    #[must_use]
    pub fn with_condition(mut self, condition: impl Into<String>) -> Self {
        self.condition = condition.into();
        self
    }
}

/// An inline CSS rule of the session's own style sheet. Keyed by `selector`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StyleRule {
    pub selector: String,
    pub declarations: String,
}

impl StyleRule {
    pub fn new(selector: impl Into<String>, declarations: impl Into<String>) -> Self {
        Self {
            selector: selector.into(),
            declarations: declarations.into(),
        }
    }

    /// The rule as CSS text.
    pub fn to_css(&self) -> String {
        format!("{} {{ {} }}", self.selector, self.declarations)
    }
}
