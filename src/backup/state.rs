//! Lifecycle state of a configuration root.
//!
//! `Clean -> (snapshot) -> Snapshotted -> (destructive op) -> Cleaned -> (restore) -> Clean`

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::error::{BackupError, Result};
use crate::utils::atomic_write;

pub const STATE_FILE: &str = "state.json";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    #[default]
    Clean,
    Snapshotted,
    Cleaned,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateRecord {
    pub state: LifecycleState,
    pub updated_at: DateTime<Utc>,
    /// Most recent backup taken for this root
    #[serde(default)]
    pub last_backup: Option<String>,
}

#[derive(Debug, Clone)]
pub struct StateFile {
    path: PathBuf,
}

impl StateFile {
    pub fn new(dir: &Path) -> Self {
        Self { path: dir.join(STATE_FILE) }
    }

    /// Current record; a missing file means the root was never snapshotted
    pub fn load(&self) -> Result<Option<StateRecord>> {
        match std::fs::read(&self.path) {
            Ok(bytes) => serde_json::from_slice(&bytes).map(Some).map_err(|e| {
                BackupError::serialization(e, format!("parsing {}", self.path.display()))
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(BackupError::io(e, format!("reading {}", self.path.display()))),
        }
    }

    pub fn state(&self) -> Result<LifecycleState> {
        Ok(self.load()?.map(|r| r.state).unwrap_or_default())
    }

    pub fn transition(&self, state: LifecycleState, last_backup: Option<&str>) -> Result<()> {
        let previous = self.load()?;
        let record = StateRecord {
            state,
            updated_at: Utc::now(),
            last_backup: last_backup
                .map(str::to_string)
                .or_else(|| previous.and_then(|p| p.last_backup)),
        };

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| BackupError::io(e, format!("creating {}", parent.display())))?;
        }
        let bytes = serde_json::to_vec_pretty(&record)
            .map_err(|e| BackupError::serialization(e, "encoding lifecycle state"))?;
        atomic_write(&self.path, &bytes, None)
            .map_err(|e| BackupError::io(e, format!("writing {}", self.path.display())))
    }
}
