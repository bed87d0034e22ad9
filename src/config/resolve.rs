use std::path::{Path, PathBuf};

use crate::config::recent::RecentSolution;
use crate::config::CONFIG_FILENAME;

/// Walk up the directory tree from `start`, checking for `filename` at each level.
/// Returns the full path to the file if found, or None if the root is reached
/// without finding it.
pub fn find_config(start: &Path, filename: &str) -> Option<PathBuf> {
    let mut current = start.to_path_buf();
    loop {
        let candidate = current.join(filename);
        if candidate.is_file() {
            return Some(candidate);
        }
        if !current.pop() {
            return None;
        }
    }
}

/// Where a solution root came from, for log messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RootSource {
    Flag,
    ConfigFile,
    Recent,
    CurrentDir,
}

/// Decide which solution root to load.
///
/// Precedence: `--root`, the directory of `--file`, the nearest
/// `devfleet.toml` above `cwd`, the last loaded root, then `cwd` itself.
pub fn resolve_root_from(
    cli_root: Option<&Path>,
    cli_file: Option<&Path>,
    cwd: &Path,
    recent: Option<&Path>,
) -> anyhow::Result<(PathBuf, RootSource)> {
    if let Some(root) = cli_root {
        if !root.is_dir() {
            anyhow::bail!("Solution root not found: {}", root.display());
        }
        return Ok((root.canonicalize()?, RootSource::Flag));
    }

    if let Some(file) = cli_file {
        if !file.is_file() {
            anyhow::bail!("Config file not found: {}", file.display());
        }
        let file = file.canonicalize()?;
        let dir = file.parent().map(Path::to_path_buf).unwrap_or_else(|| cwd.to_path_buf());
        return Ok((dir, RootSource::ConfigFile));
    }

    if let Some(dir) = find_config(cwd, CONFIG_FILENAME)
        .as_deref()
        .and_then(Path::parent)
    {
        return Ok((dir.to_path_buf(), RootSource::ConfigFile));
    }

    if let Some(root) = recent.filter(|r| r.is_dir()) {
        return Ok((root.to_path_buf(), RootSource::Recent));
    }

    Ok((cwd.to_path_buf(), RootSource::CurrentDir))
}

/// [`resolve_root_from`] against the real working directory and, unless
/// `use_recent` is off, the recent-solution record.
pub fn resolve_root(
    cli_root: Option<&Path>,
    cli_file: Option<&Path>,
    use_recent: bool,
) -> anyhow::Result<PathBuf> {
    let cwd = std::env::current_dir()?;
    let recent = if use_recent { RecentSolution::load() } else { None };
    let (root, source) = resolve_root_from(
        cli_root,
        cli_file,
        &cwd,
        recent.as_ref().map(|r| r.root.as_path()),
    )?;
    tracing::debug!(root = %root.display(), ?source, "resolved solution root");
    Ok(root)
}
