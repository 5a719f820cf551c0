//! Credential values for unit environments and database bootstrap.
//!
//! Secrets are read once, when a run's configuration is built, from an
//! env-style file and the process environment (the environment wins). Only
//! secret *names* ever appear in unit definitions, snapshots, or logs.

use crate::error::{BootgateError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

/// A credential value. Formatting never reveals the contents.
#[derive(Clone, PartialEq, Eq)]
pub struct SecretString(String);

impl SecretString {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretString(***)")
    }
}

impl fmt::Display for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("***")
    }
}

/// Where secrets come from.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SecretsConfig {
    /// Env-style file (`KEY=VALUE` per line). Optional.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,
}

/// Secret values resolved for one run.
#[derive(Debug, Clone, Default)]
pub struct Secrets {
    values: BTreeMap<String, SecretString>,
}

impl Secrets {
    /// Load the file (if configured) and then overlay the process environment
    /// for every key in `wanted`.
    pub fn load(config: &SecretsConfig, wanted: &[String]) -> Result<Self> {
        let mut values = BTreeMap::new();
        if let Some(path) = &config.file {
            values.extend(read_env_file(path)?);
        }
        for key in wanted {
            if let Ok(v) = std::env::var(key) {
                values.insert(key.clone(), SecretString::new(v));
            }
        }
        Ok(Self { values })
    }

    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            values: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), SecretString::new(v)))
                .collect(),
        }
    }

    pub fn get(&self, name: &str) -> Result<&SecretString> {
        self.values
            .get(name)
            .ok_or_else(|| BootgateError::SecretNotFound(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    /// Fail listing every name in `names` that has no value.
    pub fn require_all(&self, names: &[String]) -> Result<()> {
        let missing: Vec<&str> = names
            .iter()
            .filter(|n| !self.contains(n))
            .map(|n| n.as_str())
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(BootgateError::SecretNotFound(missing.join(", ")))
        }
    }
}

fn read_env_file(path: &Path) -> Result<BTreeMap<String, SecretString>> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        BootgateError::InvalidConfig(format!(
            "cannot read secrets file {}: {e}",
            path.display()
        ))
    })?;
    Ok(parse_env(&content)
        .into_iter()
        .map(|(k, v)| (k, SecretString::new(v)))
        .collect())
}

/// Parse `KEY=VALUE` lines. Blank lines and `#` comments are skipped, an
/// optional `export ` prefix is accepted, and matching surrounding quotes are
/// stripped from values.
pub fn parse_env(content: &str) -> Vec<(String, String)> {
    content
        .lines()
        .filter_map(|line| {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                return None;
            }
            let line = line.strip_prefix("export ").unwrap_or(line);
            let (k, v) = line.split_once('=')?;
            let k = k.trim();
            if k.is_empty() {
                return None;
            }
            Some((k.to_string(), unquote(v.trim()).to_string()))
        })
        .collect()
}

fn unquote(v: &str) -> &str {
    for q in ['"', '\''] {
        if v.len() >= 2 && v.starts_with(q) && v.ends_with(q) {
            return &v[1..v.len() - 1];
        }
    }
    v
}
