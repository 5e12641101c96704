//! Configuration management for Wisp.
//!
//! Loads configuration from `$WISP_CONFIG` (or `./wisp.toml`) with sensible
//! defaults. Sessions never read the file themselves: they receive an
//! immutable [`SessionConfig`] built once by [`Config::session`].

use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Default filter directive when `RUST_LOG` is not set.
    pub level: String,
    /// Directory for daily rolling log files.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub directory: Option<String>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            directory: None,
        }
    }
}

/// Main configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Invisible-change size (bytes) above which rendering uses two phases
    pub two_phase_threshold: usize,

    /// Whether unclaimed internal paths are valid by default
    pub internal_path_default_valid: bool,

    /// Client idle timeout in seconds (0 disables)
    pub idle_timeout_secs: u64,

    /// Server-side inactivity expiry in seconds (0 disables)
    pub session_timeout_secs: u64,

    /// Whether an unload quits the session immediately
    pub reload_is_new_session: bool,

    /// Survival window after an unload when reloads reconnect
    pub unload_grace_secs: u64,

    /// Maximum request size in bytes
    pub max_request_size: u64,

    /// Bound on notification cascades per turn
    pub max_notification_rounds: usize,

    #[serde(default)]
    pub log: LogConfig,
}

impl Config {
    const DEFAULT_TWO_PHASE_THRESHOLD: usize = 5000;
    const DEFAULT_SESSION_TIMEOUT_SECS: u64 = 600;
    const DEFAULT_UNLOAD_GRACE_SECS: u64 = 5;
    const DEFAULT_MAX_REQUEST_SIZE: u64 = 128 * 1024;
    const DEFAULT_MAX_NOTIFICATION_ROUNDS: usize = 64;

    /// Loads configuration from the default config path.
    pub fn load() -> Result<Self> {
        Self::load_from(&paths::config_path())
    }

    /// Loads configuration from a specific path.
    /// Returns defaults if file doesn't exist.
    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = fs::read_to_string(path)
                .with_context(|| format!("Failed to read config from {}", path.display()))?;
            toml::from_str(&contents)
                .with_context(|| format!("Failed to parse config from {}", path.display()))
        } else {
            Ok(Config::default())
        }
    }

    /// Creates a default config file at the given path.
    /// Returns an error if the file already exists.
    pub fn init(path: &Path) -> Result<()> {
        if path.exists() {
            anyhow::bail!("Config file already exists at {}", path.display());
        }

        Self::write_config(path, default_config_template())
    }

    /// Rewrites an existing config file on top of the latest template.
    ///
    /// User values are kept; comments and sections added to the template
    /// since the file was written are brought in.
    pub fn upgrade(path: &Path) -> Result<()> {
        let user_config = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;
        let merged = merge_with_template(&user_config)?;
        Self::write_config(path, &merged)
    }

    /// Generates a fresh config TOML from Rust defaults.
    ///
    /// Used by `xtask update-default-config` to keep `default_config.toml`
    /// in sync with `Config::default()`.
    pub fn generate() -> Result<String> {
        use toml_edit::DocumentMut;

        let generated_toml = toml::to_string(&Config::default())
            .context("Failed to serialize default config to TOML")?;

        // Parse template as base (preserves comments)
        let mut doc: DocumentMut = default_config_template()
            .parse()
            .context("Failed to parse default config template")?;

        let generated_doc: DocumentMut = generated_toml
            .parse()
            .context("Failed to parse generated config")?;

        merge_items(doc.as_table_mut(), generated_doc.as_table());

        Ok(doc.to_string())
    }

    /// Projects the session-relevant settings into an immutable, shareable form.
    pub fn session(&self) -> Arc<SessionConfig> {
        Arc::new(SessionConfig {
            two_phase_threshold: self.two_phase_threshold,
            internal_path_default_valid: self.internal_path_default_valid,
            idle_timeout: secs_or_none(self.idle_timeout_secs),
            session_timeout: secs_or_none(self.session_timeout_secs),
            reload_is_new_session: self.reload_is_new_session,
            unload_grace: Duration::from_secs(self.unload_grace_secs),
            max_request_size: self.max_request_size,
            max_notification_rounds: self.max_notification_rounds.max(1),
        })
    }

    /// Writes config content to a file, creating parent directories as needed.
    /// Uses atomic write (temp file + rename) to prevent corruption.
    fn write_config(path: &Path, content: &str) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory {}", parent.display()))?;
        }

        let tmp_path = path.with_extension("toml.tmp");
        fs::write(&tmp_path, content)
            .with_context(|| format!("Failed to write config to {}", tmp_path.display()))?;
        fs::rename(&tmp_path, path).with_context(|| {
            format!(
                "Failed to rename {} to {}",
                tmp_path.display(),
                path.display()
            )
        })?;

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            two_phase_threshold: Self::DEFAULT_TWO_PHASE_THRESHOLD,
            internal_path_default_valid: true,
            idle_timeout_secs: 0,
            session_timeout_secs: Self::DEFAULT_SESSION_TIMEOUT_SECS,
            reload_is_new_session: true,
            unload_grace_secs: Self::DEFAULT_UNLOAD_GRACE_SECS,
            max_request_size: Self::DEFAULT_MAX_REQUEST_SIZE,
            max_notification_rounds: Self::DEFAULT_MAX_NOTIFICATION_ROUNDS,
            log: LogConfig::default(),
        }
    }
}

/// Per-deployment session settings, fixed for the lifetime of a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    pub two_phase_threshold: usize,
    pub internal_path_default_valid: bool,
    /// Bootstraps the client idle timer on full renders.
    pub idle_timeout: Option<Duration>,
    pub session_timeout: Option<Duration>,
    pub reload_is_new_session: bool,
    pub unload_grace: Duration,
    pub max_request_size: u64,
    pub max_notification_rounds: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        let config = Config::default().session();
        Arc::unwrap_or_clone(config)
    }
}

fn secs_or_none(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}

/// Returns the default config template with comments.
///
/// This is embedded from default_config.toml at compile time.
/// To update, edit default_config.toml directly.
fn default_config_template() -> &'static str {
    include_str!("../default_config.toml")
}

/// Merges user config values into the default template.
///
/// This ensures new comments/sections from the template are always present,
/// while preserving user's customized values.
fn merge_with_template(user_config: &str) -> Result<String> {
    use toml_edit::DocumentMut;

    let mut doc: DocumentMut = default_config_template()
        .parse()
        .context("Failed to parse default config template")?;

    let user_doc: DocumentMut = user_config.parse().context("Failed to parse user config")?;

    merge_items(doc.as_table_mut(), user_doc.as_table());

    Ok(doc.to_string())
}

/// Recursively merges items from source table into target table.
fn merge_items(target: &mut toml_edit::Table, source: &toml_edit::Table) {
    use toml_edit::Item;

    for (key, value) in source.iter() {
        match value {
            Item::Value(v) => {
                target[key] = Item::Value(v.clone());
            }
            Item::Table(src_table) => {
                if let Some(Item::Table(target_table)) = target.get_mut(key) {
                    merge_items(target_table, src_table);
                } else {
                    target[key] = Item::Table(src_table.clone());
                }
            }
            Item::ArrayOfTables(src_arr) => {
                target[key] = Item::ArrayOfTables(src_arr.clone());
            }
            Item::None => {}
        }
    }
}

pub mod paths {
    //! Config file location.
    //!
    //! Resolution order:
    //! 1. WISP_CONFIG environment variable (if set)
    //! 2. ./wisp.toml

    use std::path::PathBuf;

    /// Returns the path to the config file.
    pub fn config_path() -> PathBuf {
        if let Ok(path) = std::env::var("WISP_CONFIG") {
            return PathBuf::from(path);
        }
        PathBuf::from("wisp.toml")
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::tempdir;

    use super::*;

    #[test]
    fn test_load_missing_file_returns_defaults() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("nonexistent.toml");

        let config = Config::load_from(&config_path).unwrap();
        assert_eq!(config.two_phase_threshold, 5000);
        assert!(config.internal_path_default_valid);
        assert!(config.reload_is_new_session);
    }

    #[test]
    fn test_load_partial_config_merges_defaults() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("wisp.toml");

        fs::write(&config_path, "two_phase_threshold = 100\n[log]\nlevel = \"debug\"\n").unwrap();

        let config = Config::load_from(&config_path).unwrap();
        assert_eq!(config.two_phase_threshold, 100);
        assert_eq!(config.session_timeout_secs, 600);
        assert_eq!(config.log.level, "debug");
        assert_eq!(config.log.directory, None);
    }

    #[test]
    fn test_load_invalid_toml_fails_with_path() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("wisp.toml");
        fs::write(&config_path, "two_phase_threshold = \"lots\"").unwrap();

        let err = Config::load_from(&config_path).unwrap_err();
        assert!(format!("{err:#}").contains("wisp.toml"));
    }

    #[test]
    fn test_init_creates_config_with_defaults() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("subdir").join("wisp.toml");

        Config::init(&config_path).unwrap();

        let contents = fs::read_to_string(&config_path).unwrap();
        assert!(contents.contains("two_phase_threshold = 5000"));
        assert!(contents.contains("# directory ="));
    }

    #[test]
    fn test_init_fails_if_exists() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("wisp.toml");
        fs::write(&config_path, "").unwrap();

        assert!(Config::init(&config_path).is_err());
    }

    #[test]
    fn test_upgrade_keeps_user_values_and_adds_comments() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("wisp.toml");
        fs::write(&config_path, "idle_timeout_secs = 30\n").unwrap();

        Config::upgrade(&config_path).unwrap();

        let contents = fs::read_to_string(&config_path).unwrap();
        assert!(contents.contains("idle_timeout_secs = 30"));
        assert!(contents.contains("# Size (bytes) of invisible changes"));
        let config = Config::load_from(&config_path).unwrap();
        assert_eq!(config.idle_timeout_secs, 30);
    }

    #[test]
    fn test_generate_matches_defaults() {
        let generated = Config::generate().unwrap();
        let parsed: Config = toml::from_str(&generated).unwrap();
        assert_eq!(parsed.two_phase_threshold, Config::default().two_phase_threshold);
        assert_eq!(parsed.max_request_size, 131_072);
    }

    #[test]
    fn test_session_config_zero_disables_timeouts() {
        let config = Config {
            idle_timeout_secs: 0,
            session_timeout_secs: 0,
            max_notification_rounds: 0,
            ..Config::default()
        };
        let session = config.session();
        assert_eq!(session.idle_timeout, None);
        assert_eq!(session.session_timeout, None);
        assert_eq!(session.max_notification_rounds, 1);
    }

    #[test]
    fn test_session_config_converts_seconds() {
        let config = Config {
            idle_timeout_secs: 90,
            ..Config::default()
        };
        let session = config.session();
        assert_eq!(session.idle_timeout, Some(Duration::from_secs(90)));
        assert_eq!(session.unload_grace, Duration::from_secs(5));
    }
}
