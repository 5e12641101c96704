use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use wisp_core::Config;

mod codebase;

#[derive(Debug, Parser)]
#[command(name = "xtask", about = "Wisp maintainer tasks")]
struct Cli {
    #[command(subcommand)]
    command: Option<CommandName>,
}

#[derive(Debug, Default, Subcommand)]
enum CommandName {
    /// Regenerate wisp-core/default_config.toml from the config defaults.
    #[default]
    UpdateDefaultConfig,
    /// Fail if default_config.toml is out of date.
    CheckDefaultConfig,
    /// Write codebase.txt with the sources of the given directories.
    Codebase {
        /// Directories relative to the workspace root (defaults to all crates).
        dirs: Vec<String>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command.unwrap_or_default() {
        CommandName::UpdateDefaultConfig => update_default_config(),
        CommandName::CheckDefaultConfig => check_default_config(),
        CommandName::Codebase { dirs } => codebase::run(&project_root()?, &dirs),
    }
}

fn default_config_path() -> Result<PathBuf> {
    Ok(project_root()?
        .join("crates")
        .join("wisp-core")
        .join("default_config.toml"))
}

fn update_default_config() -> Result<()> {
    let dest = default_config_path()?;
    let generated = Config::generate().context("generate default config")?;
    fs::write(&dest, generated).with_context(|| format!("write {}", dest.display()))?;

    println!("Updated {}", dest.display());
    Ok(())
}

fn check_default_config() -> Result<()> {
    let path = default_config_path()?;
    let current =
        fs::read_to_string(&path).with_context(|| format!("read {}", path.display()))?;
    let generated = Config::generate().context("generate default config")?;
    if current != generated {
        bail!(
            "{} is stale, run `cargo xtask update-default-config`",
            path.display()
        );
    }
    println!("{} is up to date", path.display());
    Ok(())
}

fn project_root() -> Result<PathBuf> {
    let manifest_dir = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    let root = manifest_dir
        .parent()
        .and_then(|crates| crates.parent())
        .context("locate workspace root from CARGO_MANIFEST_DIR")?;
    Ok(root.to_path_buf())
}
