//! Concatenates workspace sources into a single text file for review.

use std::fmt::Write as _;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use anyhow::{Context, bail};

const DEFAULT_DIRS: &[&str] = &["crates/wisp-types", "crates/wisp-core", "crates/xtask"];
const INCLUDE_EXTENSIONS: &[&str] = &["rs", "toml", "md"];
const SKIP_DIRS: &[&str] = &["target"];
const OUTPUT_FILE: &str = "codebase.txt";

pub fn run(root: &Path, dirs: &[String]) -> anyhow::Result<()> {
    let dirs: Vec<String> = if dirs.is_empty() {
        DEFAULT_DIRS.iter().map(|d| (*d).to_string()).collect()
    } else {
        dirs.to_vec()
    };

    let files = collect_files(root, &dirs)?;
    if files.is_empty() {
        bail!("no source files under {}", dirs.join(", "));
    }

    let mut output = String::new();
    writeln!(output, "WISP SOURCES ({} files)", files.len())?;
    for dir in &dirs {
        writeln!(output, "  - {dir}")?;
    }
    output.push('\n');

    for path in &files {
        let content =
            fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
        let relative = path.strip_prefix(root).unwrap_or(path);
        writeln!(output, "{}", "=".repeat(80))?;
        writeln!(output, "FILE: {} ({} bytes)", relative.display(), content.len())?;
        writeln!(output, "{}", "=".repeat(80))?;
        output.push_str(&content);
        output.push_str("\n\n");
    }

    let output_file = root.join(OUTPUT_FILE);
    fs::write(&output_file, &output)
        .with_context(|| format!("write {}", output_file.display()))?;
    println!("Wrote {} ({} bytes)", output_file.display(), output.len());
    Ok(())
}

fn collect_files(root: &Path, dirs: &[String]) -> io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for dir in dirs {
        let path = root.join(dir);
        if path.is_dir() {
            walk(&path, &mut files)?;
        } else {
            eprintln!("skipping missing directory {dir}");
        }
    }
    files.sort();
    Ok(files)
}

fn walk(dir: &Path, files: &mut Vec<PathBuf>) -> io::Result<()> {
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        let name = path.file_name().map(|n| n.to_string_lossy().into_owned());
        let Some(name) = name else { continue };

        if path.is_dir() {
            if !name.starts_with('.') && !SKIP_DIRS.contains(&name.as_str()) {
                walk(&path, files)?;
            }
        } else if is_source(&path) {
            files.push(path);
        }
    }
    Ok(())
}

fn is_source(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| INCLUDE_EXTENSIONS.contains(&ext))
}
