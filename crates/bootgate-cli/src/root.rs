use anyhow::Context;
use bootgate_core::config::{self, Config};
use std::path::{Path, PathBuf};

/// A loaded config and the directory it lives in. Relative paths in the
/// config resolve against `root`.
pub struct Host {
    pub path: PathBuf,
    pub root: PathBuf,
    pub config: Config,
}

/// Locate the config file.
///
/// Priority:
/// 1. `--config` flag / `BOOTGATE_CONFIG` env var (passed in as `explicit`)
/// 2. Walk upward from the cwd looking for `bootgate.yaml`
pub fn resolve_config(explicit: Option<&Path>) -> anyhow::Result<PathBuf> {
    if let Some(p) = explicit {
        return Ok(p.to_path_buf());
    }
    let cwd = std::env::current_dir().context("cannot read current directory")?;
    config::discover(&cwd).with_context(|| {
        format!(
            "no {} found in {} or any parent directory",
            config::CONFIG_FILE,
            cwd.display()
        )
    })
}

pub fn load(explicit: Option<&Path>) -> anyhow::Result<Host> {
    let path = resolve_config(explicit)?;
    let config = Config::load(&path)
        .with_context(|| format!("failed to load config from {}", path.display()))?;
    let root = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    Ok(Host { path, root, config })
}
