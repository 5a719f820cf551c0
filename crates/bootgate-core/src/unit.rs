//! Service units and their lifecycle states.

use crate::error::{BootgateError, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

// ---------------------------------------------------------------------------
// UnitKind / RestartPolicy / UnitAction
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum UnitKind {
    /// Runs to completion once; success releases dependents.
    #[default]
    Oneshot,
    /// Runs forever; being up releases dependents.
    LongRunning,
}

impl UnitKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            UnitKind::Oneshot => "oneshot",
            UnitKind::LongRunning => "long_running",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RestartPolicy {
    #[default]
    Always,
    OnFailure,
    Never,
}

impl RestartPolicy {
    /// Whether a long-running unit that exited with `code` is started again.
    pub fn should_restart(&self, code: Option<i32>) -> bool {
        match self {
            RestartPolicy::Always => true,
            RestartPolicy::OnFailure => code != Some(0),
            RestartPolicy::Never => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", deny_unknown_fields)]
pub enum UnitAction {
    /// Run an external program.
    Exec {
        argv: Vec<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        workdir: Option<PathBuf>,
    },
    /// Block until the database accepts connections.
    WaitReady,
    /// Ensure the login role, ownership and grants.
    BootstrapDb,
    /// Apply schema migrations.
    Migrate,
}

impl UnitAction {
    pub fn label(&self) -> String {
        match self {
            UnitAction::Exec { argv, .. } => argv.join(" "),
            UnitAction::WaitReady => "builtin:wait_ready".to_string(),
            UnitAction::BootstrapDb => "builtin:bootstrap_db".to_string(),
            UnitAction::Migrate => "builtin:migrate".to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// UnitSpec
// ---------------------------------------------------------------------------

fn default_restart_sec() -> u64 {
    5
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UnitSpec {
    pub name: String,
    #[serde(default)]
    pub kind: UnitKind,
    pub action: UnitAction,
    /// Plain environment bindings.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
    /// Names of secrets exported into the environment under the same name.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub secrets: Vec<String>,
    /// Export the primary and shadow connection strings.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub database_urls: bool,
    #[serde(default)]
    pub restart: RestartPolicy,
    #[serde(default = "default_restart_sec")]
    pub restart_sec: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub requires: Vec<String>,
}

impl UnitSpec {
    pub fn new(name: impl Into<String>, kind: UnitKind, action: UnitAction) -> Self {
        Self {
            name: name.into(),
            kind,
            action,
            env: BTreeMap::new(),
            secrets: Vec::new(),
            database_urls: false,
            restart: RestartPolicy::default(),
            restart_sec: default_restart_sec(),
            requires: Vec::new(),
        }
    }

    pub fn requires(mut self, deps: &[&str]) -> Self {
        self.requires = deps.iter().map(|d| d.to_string()).collect();
        self
    }

    /// Whether a predecessor in `state` releases its dependents.
    pub fn releases_dependents(&self, state: &UnitState) -> bool {
        match self.kind {
            UnitKind::Oneshot => matches!(state, UnitState::Succeeded),
            UnitKind::LongRunning => matches!(state, UnitState::Running),
        }
    }

    /// Whether a predecessor in `state` will never release its dependents.
    pub fn blocks_dependents(&self, state: &UnitState) -> bool {
        match state {
            UnitState::Fatal { .. } | UnitState::Stopped => true,
            UnitState::WaitingOnDependencies { blocked_by } => blocked_by.is_some(),
            UnitState::Exited { code } => !self.restart.should_restart(*code),
            _ => false,
        }
    }

    /// Stable digest of the definition. Secret values never take part; only
    /// their names do.
    pub fn fingerprint(&self) -> String {
        let canonical = serde_json::to_vec(self).unwrap_or_default();
        format!("{:x}", Sha256::digest(&canonical))
    }
}

// ---------------------------------------------------------------------------
// UnitState
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum UnitState {
    Pending,
    /// `blocked_by` names the predecessor that can no longer succeed.
    WaitingOnDependencies { blocked_by: Option<String> },
    Running,
    Succeeded,
    Exited { code: Option<i32> },
    RestartScheduled { attempt: u32 },
    Fatal { reason: String },
    /// Stopped by shutdown.
    Stopped,
}

impl fmt::Display for UnitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnitState::Pending => write!(f, "pending"),
            UnitState::WaitingOnDependencies { blocked_by: None } => write!(f, "waiting"),
            UnitState::WaitingOnDependencies {
                blocked_by: Some(dep),
            } => write!(f, "blocked ({dep})"),
            UnitState::Running => write!(f, "running"),
            UnitState::Succeeded => write!(f, "succeeded"),
            UnitState::Exited { code: Some(c) } => write!(f, "exited ({c})"),
            UnitState::Exited { code: None } => write!(f, "exited (signal)"),
            UnitState::RestartScheduled { attempt } => write!(f, "restart-scheduled (#{attempt})"),
            UnitState::Fatal { reason } => write!(f, "fatal: {reason}"),
            UnitState::Stopped => write!(f, "stopped"),
        }
    }
}

impl UnitState {
    pub fn is_fatal(&self) -> bool {
        matches!(self, UnitState::Fatal { .. })
    }

    pub fn is_blocked(&self) -> bool {
        matches!(
            self,
            UnitState::WaitingOnDependencies {
                blocked_by: Some(_)
            }
        )
    }

    fn allowed(kind: UnitKind, from: &UnitState, to: &UnitState) -> bool {
        use UnitState::*;
        if matches!(to, Stopped) {
            return !matches!(from, Succeeded | Fatal { .. } | Stopped);
        }
        match (from, to) {
            (Pending, WaitingOnDependencies { blocked_by: None }) => true,
            (WaitingOnDependencies { blocked_by: None }, WaitingOnDependencies { blocked_by: Some(_) }) => true,
            (WaitingOnDependencies { blocked_by: None }, Running) => true,
            (Running, Succeeded) => kind == UnitKind::Oneshot,
            // Launch failures skip Running.
            (WaitingOnDependencies { blocked_by: None }, Fatal { .. }) => true,
            (Running, Fatal { .. }) => kind == UnitKind::Oneshot,
            (WaitingOnDependencies { blocked_by: None } | Running, Exited { .. }) => {
                kind == UnitKind::LongRunning
            }
            (Exited { .. }, RestartScheduled { .. }) => kind == UnitKind::LongRunning,
            // Relaunches go back through the dependency gate.
            (RestartScheduled { .. }, WaitingOnDependencies { blocked_by: None }) => {
                kind == UnitKind::LongRunning
            }
            _ => false,
        }
    }

    /// Validate a transition for a unit of `kind`.
    pub fn check_transition(unit: &str, kind: UnitKind, from: &UnitState, to: &UnitState) -> Result<()> {
        if Self::allowed(kind, from, to) {
            Ok(())
        } else {
            Err(BootgateError::InvalidTransition {
                unit: unit.to_string(),
                from: from.to_string(),
                to: to.to_string(),
            })
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
