//! Live unit status and its on-disk snapshot.

use crate::error::Result;
use crate::graph::UnitGraph;
use crate::io;
use crate::unit::UnitState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

pub const STATUS_FILE: &str = "status.json";

pub fn status_path(state_dir: &Path) -> PathBuf {
    state_dir.join(STATUS_FILE)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitStatus {
    pub name: String,
    pub fingerprint: String,
    #[serde(flatten)]
    pub state: UnitState,
    pub since: DateTime<Utc>,
    /// Board-wide sequence number of the latest transition.
    pub seq: u64,
    /// Sequence number at which the unit first entered `Running`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_seq: Option<u64>,
    /// Sequence number at which the unit first released its dependents.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub released_seq: Option<u64>,
    #[serde(default)]
    pub restarts: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub host: String,
    pub updated_at: DateTime<Utc>,
    pub units: Vec<UnitStatus>,
}

impl StatusSnapshot {
    pub fn unit(&self, name: &str) -> Option<&UnitStatus> {
        self.units.iter().find(|u| u.name == name)
    }

    pub fn load(path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        let data = std::fs::read_to_string(path)?;
        Ok(Some(serde_json::from_str(&data)?))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let data = serde_json::to_vec_pretty(self)?;
        io::atomic_write(path, &data)
    }
}

struct Board {
    seq: u64,
    units: Vec<UnitStatus>,
}

/// Shared, cheaply clonable record of every unit's state.
#[derive(Clone)]
pub struct StatusBoard {
    host: Arc<str>,
    board: Arc<Mutex<Board>>,
    changed: Arc<Notify>,
}

impl StatusBoard {
    pub fn new(host: &str, graph: &UnitGraph) -> Self {
        let now = Utc::now();
        let units = graph
            .units()
            .iter()
            .map(|u| UnitStatus {
                name: u.name.clone(),
                fingerprint: u.fingerprint(),
                state: UnitState::Pending,
                since: now,
                seq: 0,
                started_seq: None,
                released_seq: None,
                restarts: 0,
            })
            .collect();
        Self {
            host: Arc::from(host),
            board: Arc::new(Mutex::new(Board { seq: 0, units })),
            changed: Arc::new(Notify::new()),
        }
    }

    /// Record a transition. `releases` marks that dependents may now start.
    pub fn record(&self, unit: &str, state: &UnitState, releases: bool) {
        {
            let mut board = self.board.lock().unwrap_or_else(|e| e.into_inner());
            board.seq += 1;
            let seq = board.seq;
            if let Some(status) = board.units.iter_mut().find(|u| u.name == unit) {
                status.state = state.clone();
                status.since = Utc::now();
                status.seq = seq;
                if matches!(state, UnitState::Running) && status.started_seq.is_none() {
                    status.started_seq = Some(seq);
                }
                if matches!(state, UnitState::RestartScheduled { .. }) {
                    status.restarts += 1;
                }
                if releases && status.released_seq.is_none() {
                    status.released_seq = Some(seq);
                }
            }
        }
        self.changed.notify_one();
    }

    pub fn state(&self, unit: &str) -> Option<UnitState> {
        let board = self.board.lock().unwrap_or_else(|e| e.into_inner());
        board
            .units
            .iter()
            .find(|u| u.name == unit)
            .map(|u| u.state.clone())
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        let board = self.board.lock().unwrap_or_else(|e| e.into_inner());
        StatusSnapshot {
            host: self.host.to_string(),
            updated_at: Utc::now(),
            units: board.units.clone(),
        }
    }

    /// Resolves after at least one transition since the previous call.
    pub async fn changed(&self) {
        self.changed.notified().await
    }

    /// Persist the snapshot after every change until the task is aborted.
    pub fn spawn_persister(&self, path: PathBuf) -> tokio::task::JoinHandle<()> {
        let board = self.clone();
        tokio::spawn(async move {
            loop {
                board.changed().await;
                if let Err(e) = board.snapshot().save(&path) {
                    tracing::warn!(path = %path.display(), error = %e, "failed to write status snapshot");
                }
            }
        })
    }
}
