//! Snapshot, list, restore and delete backups of the tracked configuration files.
//!
//! A snapshot is staged in a hidden directory and renamed into place once the
//! manifest is written, so listing never observes a half-written backup.
//! Restore verifies every captured file against its checksum before writing
//! anything, then replaces live files one by one with atomic writes.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{SubsecRound, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use super::error::{BackupError, Result};
use super::manifest::{
    captured_file_name, sha256_hex, BackupKind, BackupManifest, BackupSummary, ManifestEntry,
    FILES_DIR, MANIFEST_FILE, TIMESTAMP_FORMAT,
};
use super::state::{LifecycleState, StateFile};
use crate::config::DeploymentConfig;
use crate::utils::{atomic_write, file_mode, is_contained_relative, BACKUP_NAME_REGEX};

const DEFAULT_PERMANENT_NAME: &str = "backup";
const DEFAULT_TEMPORARY_NAME: &str = "auto";
const STAGING_PREFIX: &str = ".staging-";

/// Result of a restore
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RestoreReport {
    pub backup: String,
    pub restored: usize,
    /// The root was already clean; nothing was written
    pub noop: bool,
}

#[derive(Debug, Clone)]
pub struct BackupManager {
    root: PathBuf,
    tracked: Vec<(String, PathBuf)>,
    permanent_dir: PathBuf,
    temporary_dir: PathBuf,
    state: StateFile,
}

impl BackupManager {
    pub fn new(config: &DeploymentConfig) -> Self {
        let permanent_dir = config.backup_dir();
        Self {
            root: config.root.clone(),
            tracked: config.tracked_files(),
            state: StateFile::new(&permanent_dir),
            temporary_dir: config.temp_backup_dir(),
            permanent_dir,
        }
    }

    pub fn state(&self) -> Result<LifecycleState> {
        self.state.state()
    }

    /// Record that a destructive operation removed live state
    pub fn mark_cleaned(&self) -> Result<()> {
        self.state.transition(LifecycleState::Cleaned, None)
    }

    /// Capture every tracked file that currently exists. Live files are only read.
    pub fn snapshot(&self, kind: BackupKind, name: Option<&str>) -> Result<BackupManifest> {
        let base_name = match name {
            Some(name) => {
                if !BACKUP_NAME_REGEX.is_match(name) {
                    return Err(BackupError::InvalidName { name: name.to_string() });
                }
                name.to_string()
            }
            None => match kind {
                BackupKind::Temporary => DEFAULT_TEMPORARY_NAME.to_string(),
                BackupKind::Permanent => DEFAULT_PERMANENT_NAME.to_string(),
            },
        };

        let created_at = Utc::now().trunc_subsecs(3);
        let stamp = created_at.format(TIMESTAMP_FORMAT).to_string();
        let dir = self.dir_for(kind);
        fs::create_dir_all(&dir).map_err(|e| BackupError::io(e, format!("creating {}", dir.display())))?;

        // Permanent names are never reused: a collision keeps the timestamped id as the name
        let display_name = if kind == BackupKind::Permanent
            && self.scan(&dir)?.iter().any(|b| b.name == base_name)
        {
            format!("{}-{}", base_name, stamp)
        } else {
            base_name.clone()
        };

        let id = self.unique_id(&dir, &format!("{}-{}", base_name, stamp));
        let staging = dir.join(format!("{}{}", STAGING_PREFIX, id));
        let files_dir = staging.join(FILES_DIR);
        fs::create_dir_all(&files_dir)
            .map_err(|e| BackupError::io(e, format!("creating {}", files_dir.display())))?;

        let entries = match self.capture(&files_dir) {
            Ok(entries) => entries,
            Err(err) => {
                let _ = fs::remove_dir_all(&staging);
                return Err(err);
            }
        };

        let manifest = BackupManifest {
            id: id.clone(),
            name: display_name,
            kind,
            created_at,
            root: self.root.clone(),
            entries,
        };
        let bytes = serde_json::to_vec_pretty(&manifest)
            .map_err(|e| BackupError::serialization(e, "encoding backup manifest"))?;
        fs::write(staging.join(MANIFEST_FILE), bytes)
            .map_err(|e| BackupError::io(e, format!("writing manifest for {}", id)))?;

        let final_dir = dir.join(&id);
        fs::rename(&staging, &final_dir)
            .map_err(|e| BackupError::io(e, format!("finalising {}", final_dir.display())))?;

        if kind == BackupKind::Temporary {
            self.supersede_temporaries(&id)?;
        }
        self.state.transition(LifecycleState::Snapshotted, Some(&id))?;

        info!(
            backup = %manifest.id,
            kind = %kind,
            files = manifest.entries.len(),
            "Backup created"
        );
        Ok(manifest)
    }

    /// Every backup, newest first
    pub fn list(&self) -> Result<Vec<BackupSummary>> {
        let mut backups = self.scan(&self.permanent_dir)?;
        if self.temporary_dir != self.permanent_dir {
            backups.extend(self.scan(&self.temporary_dir)?);
        }
        backups.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));
        Ok(backups)
    }

    /// True when at least one permanent backup exists
    pub fn has_permanent(&self) -> Result<bool> {
        Ok(self.list()?.iter().any(|b| b.kind == BackupKind::Permanent))
    }

    /// Pick one backup. `None` selects the newest.
    ///
    /// An exact id wins, then a unique exact name, then the newest name or id
    /// prefix match. Ties fail rather than guess.
    pub fn resolve(&self, selector: Option<&str>) -> Result<BackupSummary> {
        let backups = self.list()?;
        let not_found = || BackupError::NotFound { selector: selector.unwrap_or("latest").to_string() };

        let Some(selector) = selector else {
            return backups.into_iter().next().ok_or_else(not_found);
        };

        if let Some(exact) = backups.iter().find(|b| b.id == selector) {
            return Ok(exact.clone());
        }

        let named: Vec<&BackupSummary> = backups.iter().filter(|b| b.name == selector).collect();
        match named.as_slice() {
            [only] => return Ok((*only).clone()),
            [] => {}
            _ => return Err(not_found()),
        }

        let prefixed: Vec<&BackupSummary> = backups
            .iter()
            .filter(|b| b.name.starts_with(selector) || b.id.starts_with(selector))
            .collect();
        match prefixed.as_slice() {
            [] => Err(not_found()),
            [newest, rest @ ..] => {
                if rest.first().is_some_and(|next| next.created_at == newest.created_at) {
                    Err(not_found())
                } else {
                    Ok((*newest).clone())
                }
            }
        }
    }

    /// Restore the files captured in the selected backup.
    ///
    /// Files not in the manifest are left alone. From a clean root this is a
    /// successful no-op.
    pub fn restore(&self, selector: Option<&str>) -> Result<RestoreReport> {
        let summary = self.resolve(selector)?;

        if self.state()? == LifecycleState::Clean {
            info!(backup = %summary.id, "Configuration root is clean; nothing to restore");
            return Ok(RestoreReport { backup: summary.id, restored: 0, noop: true });
        }

        let manifest = BackupManifest::load(&summary.dir)?;
        let contents = self.verify(&summary.dir, &manifest)?;

        for (entry, bytes) in manifest.entries.iter().zip(&contents) {
            let target = self.root.join(&entry.path);
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)
                    .map_err(|e| BackupError::io(e, format!("creating {}", parent.display())))?;
            }
            let mode = file_mode(&target).unwrap_or(0o600);
            atomic_write(&target, bytes, Some(mode))
                .map_err(|e| BackupError::io(e, format!("restoring {}", target.display())))?;
            debug!(path = %entry.path.display(), service = %entry.service, "Restored file");
        }

        self.state.transition(LifecycleState::Clean, Some(&manifest.id))?;
        info!(backup = %manifest.id, files = contents.len(), "Backup restored");

        Ok(RestoreReport { backup: manifest.id, restored: contents.len(), noop: false })
    }

    pub fn delete(&self, selector: &str) -> Result<BackupSummary> {
        let summary = self.resolve(Some(selector))?;
        fs::remove_dir_all(&summary.dir)
            .map_err(|e| BackupError::io(e, format!("removing {}", summary.dir.display())))?;
        info!(backup = %summary.id, "Backup deleted");
        Ok(summary)
    }

    fn dir_for(&self, kind: BackupKind) -> PathBuf {
        match kind {
            BackupKind::Temporary => self.temporary_dir.clone(),
            BackupKind::Permanent => self.permanent_dir.clone(),
        }
    }

    fn unique_id(&self, dir: &Path, candidate: &str) -> String {
        let mut id = candidate.to_string();
        let mut n = 1;
        while dir.join(&id).exists() {
            id = format!("{}-{}", candidate, n);
            n += 1;
        }
        id
    }

    fn capture(&self, files_dir: &Path) -> Result<Vec<ManifestEntry>> {
        let mut entries = Vec::new();
        for (index, (service, rel)) in self.tracked.iter().enumerate() {
            let source = self.root.join(rel);
            let bytes = match fs::read(&source) {
                Ok(bytes) => bytes,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    debug!(path = %rel.display(), "Tracked file absent; not captured");
                    continue;
                }
                Err(e) => return Err(BackupError::io(e, format!("reading {}", source.display()))),
            };

            let file = captured_file_name(index, service, rel);
            fs::write(files_dir.join(&file), &bytes)
                .map_err(|e| BackupError::io(e, format!("capturing {}", rel.display())))?;

            entries.push(ManifestEntry {
                service: service.clone(),
                path: rel.clone(),
                file,
                sha256: sha256_hex(&bytes),
                size: bytes.len() as u64,
            });
        }
        Ok(entries)
    }

    fn verify(&self, dir: &Path, manifest: &BackupManifest) -> Result<Vec<Vec<u8>>> {
        let corrupt = |reason: String| BackupError::Corrupt { id: manifest.id.clone(), reason };

        manifest
            .entries
            .iter()
            .map(|entry| {
                if !is_contained_relative(&entry.path) {
                    return Err(corrupt(format!("entry path '{}' escapes the root", entry.path.display())));
                }
                if !is_contained_relative(Path::new(&entry.file)) || entry.file.contains('/') {
                    return Err(corrupt(format!("invalid captured file name '{}'", entry.file)));
                }
                let bytes = fs::read(dir.join(FILES_DIR).join(&entry.file))
                    .map_err(|e| corrupt(format!("{}: {}", entry.file, e)))?;
                if sha256_hex(&bytes) != entry.sha256 {
                    return Err(corrupt(format!("checksum mismatch for {}", entry.path.display())));
                }
                Ok(bytes)
            })
            .collect()
    }

    fn scan(&self, dir: &Path) -> Result<Vec<BackupSummary>> {
        let read = match fs::read_dir(dir) {
            Ok(read) => read,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(BackupError::io(e, format!("listing {}", dir.display()))),
        };

        let mut backups = Vec::new();
        for entry in read {
            let entry = entry.map_err(|e| BackupError::io(e, format!("listing {}", dir.display())))?;
            let path = entry.path();
            let hidden = entry.file_name().to_string_lossy().starts_with('.');
            if hidden || !path.join(MANIFEST_FILE).is_file() {
                continue;
            }
            match BackupManifest::load(&path) {
                Ok(manifest) => backups.push(manifest.summary(path)),
                Err(err) => warn!(dir = %path.display(), error = %err, "Ignoring unreadable backup"),
            }
        }
        Ok(backups)
    }

    fn supersede_temporaries(&self, keep: &str) -> Result<()> {
        for old in self.scan(&self.temporary_dir)? {
            if old.id == keep || old.kind != BackupKind::Temporary {
                continue;
            }
            fs::remove_dir_all(&old.dir)
                .map_err(|e| BackupError::io(e, format!("removing {}", old.dir.display())))?;
            debug!(backup = %old.id, "Superseded temporary backup");
        }
        Ok(())
    }
}
