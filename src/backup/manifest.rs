//! On-disk backup layout.
//!
//! ```text
//! <backup dir>/<name>-<timestamp>/
//!     manifest.json
//!     files/000-gateway-.env
//!     files/001-api-.env
//! ```

use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::error::{BackupError, Result};

pub const MANIFEST_FILE: &str = "manifest.json";
pub const FILES_DIR: &str = "files";

/// Timestamp suffix of backup directory names, e.g. `20261019T101500123Z`
pub const TIMESTAMP_FORMAT: &str = "%Y%m%dT%H%M%S%3fZ";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackupKind {
    /// Implicit snapshot before a destructive operation; superseded by the next one
    Temporary,
    /// Named snapshot kept until deleted
    Permanent,
}

impl fmt::Display for BackupKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackupKind::Temporary => write!(f, "temporary"),
            BackupKind::Permanent => write!(f, "permanent"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    /// Owning service id, or `extra` for additional tracked files
    pub service: String,
    /// Path relative to the configuration root
    pub path: PathBuf,
    /// Captured file name under `files/`
    pub file: String,
    pub sha256: String,
    pub size: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupManifest {
    pub id: String,
    pub name: String,
    pub kind: BackupKind,
    pub created_at: DateTime<Utc>,
    pub root: PathBuf,
    pub entries: Vec<ManifestEntry>,
}

impl BackupManifest {
    pub fn load(dir: &Path) -> Result<Self> {
        let path = dir.join(MANIFEST_FILE);
        let bytes = std::fs::read(&path)
            .map_err(|e| BackupError::io(e, format!("reading {}", path.display())))?;
        serde_json::from_slice(&bytes)
            .map_err(|e| BackupError::serialization(e, format!("parsing {}", path.display())))
    }

    pub fn summary(&self, dir: PathBuf) -> BackupSummary {
        BackupSummary {
            id: self.id.clone(),
            name: self.name.clone(),
            kind: self.kind,
            created_at: self.created_at,
            files: self.entries.len(),
            size: self.entries.iter().map(|e| e.size).sum(),
            dir,
        }
    }
}

/// One row of `list()`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackupSummary {
    pub id: String,
    pub name: String,
    pub kind: BackupKind,
    pub created_at: DateTime<Utc>,
    pub files: usize,
    pub size: u64,
    #[serde(skip)]
    pub dir: PathBuf,
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Name of the captured copy of the `index`-th tracked file
pub fn captured_file_name(index: usize, service: &str, path: &Path) -> String {
    let base = path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
    let sanitized: String = base
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') { c } else { '_' })
        .collect();
    format!("{:03}-{}-{}", index, service, sanitized)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_captured_file_name_is_flat() {
        assert_eq!(captured_file_name(0, "gateway", Path::new("gateway/.env")), "000-gateway-.env");
        assert_eq!(
            captured_file_name(12, "extra", Path::new("gateway/conf/my config.yaml")),
            "012-extra-my_config.yaml"
        );
    }

    #[test]
    fn test_manifest_timestamp_has_millisecond_precision() {
        use chrono::TimeZone;

        let manifest = BackupManifest {
            id: "nightly-20261019T101500123Z".into(),
            name: "nightly".into(),
            kind: BackupKind::Permanent,
            created_at: Utc.timestamp_millis_opt(1_792_404_900_123).unwrap(),
            root: PathBuf::from("/srv/stack"),
            entries: vec![],
        };
        let json = serde_json::to_value(&manifest).unwrap();
        assert!(json["created_at"].as_str().unwrap().ends_with(".123Z"));
        assert_eq!(json["kind"], "permanent");

        let parsed: BackupManifest = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, manifest);
    }
}
