//! Opaque tokens for server-side objects handed to the client.
//!
//! A token looks like `s42.<22 base64url chars>`: a kind prefix, a map key
//! that is never reused, and a random suffix. The key makes a token resolve
//! to at most one target for the session's lifetime; the suffix keeps tokens
//! unguessable from one another.

use std::collections::{HashMap, HashSet};
use std::fmt;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngCore;
use rand::rngs::OsRng;
use subtle::ConstantTimeEq;
use tracing::debug;

const SUFFIX_BYTES: usize = 16;
/// Client-supplied tokens are cut to this many characters in logs.
const LOGGED_TOKEN_CHARS: usize = 24;

/// Identity of an application object (widget, resource owner).
///
/// Assigned by the application; the session only compares them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId(pub u64);

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TargetKind {
    Signal,
    Resource,
    Object,
}

impl TargetKind {
    fn prefix(self) -> char {
        match self {
            TargetKind::Signal => 's',
            TargetKind::Resource => 'r',
            TargetKind::Object => 'o',
        }
    }

    fn from_prefix(prefix: char) -> Option<Self> {
        match prefix {
            's' => Some(TargetKind::Signal),
            'r' => Some(TargetKind::Resource),
            'o' => Some(TargetKind::Object),
            _ => None,
        }
    }
}

/// What a token stands for: a named signal or resource of an object, or the
/// object itself.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ExposedTarget {
    pub kind: TargetKind,
    pub object: ObjectId,
    pub name: String,
}

impl ExposedTarget {
    pub fn signal(object: ObjectId, name: impl Into<String>) -> Self {
        Self {
            kind: TargetKind::Signal,
            object,
            name: name.into(),
        }
    }

    pub fn resource(object: ObjectId, name: impl Into<String>) -> Self {
        Self {
            kind: TargetKind::Resource,
            object,
            name: name.into(),
        }
    }

    pub fn object(object: ObjectId) -> Self {
        Self {
            kind: TargetKind::Object,
            object,
            name: String::new(),
        }
    }
}

#[derive(Debug)]
struct Entry {
    target: ExposedTarget,
    suffix: String,
}

#[derive(Debug)]
pub struct ExposureRegistry {
    next_key: u64,
    entries: HashMap<u64, Entry>,
    by_target: HashMap<ExposedTarget, u64>,
    /// Tokens withdrawn during the current turn.
    just_removed: HashSet<String>,
    /// Compared against when a token names no entry.
    dummy_suffix: String,
}

impl Default for ExposureRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ExposureRegistry {
    pub fn new() -> Self {
        Self {
            next_key: 1,
            entries: HashMap::new(),
            by_target: HashMap::new(),
            just_removed: HashSet::new(),
            dummy_suffix: random_suffix(),
        }
    }

    /// Returns the token for `target`, issuing one if it has none.
    pub fn expose(&mut self, target: ExposedTarget) -> String {
        if let Some(key) = self.by_target.get(&target)
            && let Some(entry) = self.entries.get(key)
        {
            return format_token(entry.target.kind, *key, &entry.suffix);
        }

        let key = self.next_key;
        self.next_key += 1;
        let suffix = random_suffix();
        let token = format_token(target.kind, key, &suffix);
        self.by_target.insert(target.clone(), key);
        self.entries.insert(key, Entry { target, suffix });
        token
    }

    /// Resolves a token from the client.
    ///
    /// Malformed, unknown and withdrawn tokens all yield `None`.
    pub fn decode(&self, token: &str) -> Option<&ExposedTarget> {
        let parsed = parse_token(token);
        let entry = parsed.and_then(|(kind, key, _)| {
            self.entries
                .get(&key)
                .filter(|entry| entry.target.kind == kind)
        });

        let presented = parsed.map_or(token, |(_, _, suffix)| suffix);
        let expected = entry.map_or(self.dummy_suffix.as_str(), |e| e.suffix.as_str());
        let suffix_ok: bool = presented.as_bytes().ct_eq(expected.as_bytes()).into();

        match entry {
            Some(entry) if suffix_ok => Some(&entry.target),
            _ => {
                let shown = log_prefix(token);
                if self.just_removed.contains(token) {
                    debug!(token = shown, "token was withdrawn during this turn");
                } else {
                    debug!(token = shown, len = token.len(), "unknown token");
                }
                None
            }
        }
    }

    /// Withdraws the token bound to `target`. Returns whether one existed.
    pub fn withdraw(&mut self, target: &ExposedTarget) -> bool {
        let Some(key) = self.by_target.remove(target) else {
            return false;
        };
        if let Some(entry) = self.entries.remove(&key) {
            self.just_removed
                .insert(format_token(entry.target.kind, key, &entry.suffix));
        }
        true
    }

    /// Withdraws every token bound to `object`, including its encodings.
    ///
    /// Returns the number of tokens withdrawn.
    pub fn withdraw_object(&mut self, object: ObjectId) -> usize {
        let targets: Vec<ExposedTarget> = self
            .by_target
            .keys()
            .filter(|target| target.object == object)
            .cloned()
            .collect();
        targets.iter().filter(|t| self.withdraw(t)).count()
    }

    /// Encodes a reference to an application object.
    ///
    /// There is no way to retire a single encoding; it lives until the
    /// object is withdrawn as a whole.
    pub fn encode_object(&mut self, object: ObjectId) -> String {
        self.expose(ExposedTarget::object(object))
    }

    pub fn decode_object(&self, token: &str) -> Option<ObjectId> {
        self.decode(token)
            .filter(|target| target.kind == TargetKind::Object)
            .map(|target| target.object)
    }

    /// Returns whether `token` was withdrawn during the current turn.
    pub fn was_just_removed(&self, token: &str) -> bool {
        self.just_removed.contains(token)
    }

    /// Forgets the tokens withdrawn during the turn that just ended.
    pub fn end_turn(&mut self) {
        self.just_removed.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drops every token. Used when the session is torn down.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.by_target.clear();
        self.just_removed.clear();
    }
}

fn random_suffix() -> String {
    let mut bytes = [0u8; SUFFIX_BYTES];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

fn format_token(kind: TargetKind, key: u64, suffix: &str) -> String {
    format!("{}{key}.{suffix}", kind.prefix())
}

pub(crate) fn log_prefix(token: &str) -> &str {
    token
        .char_indices()
        .nth(LOGGED_TOKEN_CHARS)
        .map_or(token, |(end, _)| &token[..end])
}

fn parse_token(token: &str) -> Option<(TargetKind, u64, &str)> {
    let mut chars = token.chars();
    let kind = TargetKind::from_prefix(chars.next()?)?;
    let (key, suffix) = chars.as_str().split_once('.')?;
    let key = key.parse().ok()?;
    Some((kind, key, suffix))
}
