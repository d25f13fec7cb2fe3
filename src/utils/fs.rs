//! Filesystem helpers shared by the secret store and the backup manager.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tracing::{debug, warn};

/// Replace `path` with `contents` by writing a sibling temporary file, syncing
/// it and renaming it over the target. Readers observe either the old or the
/// new content, never a partial file.
///
/// When `mode` is given the file permissions are set before the rename (Unix only).
pub fn atomic_write(path: &Path, contents: &[u8], mode: Option<u32>) -> io::Result<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    let mut tmp = NamedTempFile::new_in(parent)?;
    tmp.write_all(contents)?;
    tmp.as_file().sync_all()?;
    set_mode(tmp.path(), mode)?;
    tmp.persist(path).map_err(|err| err.error)?;

    sync_dir(parent);
    Ok(())
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: Option<u32>) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;

    if let Some(mode) = mode {
        fs::set_permissions(path, fs::Permissions::from_mode(mode))?;
    }
    Ok(())
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: Option<u32>) -> io::Result<()> {
    Ok(())
}

// Persist the rename itself. Best effort: not every platform can open a directory.
fn sync_dir(dir: &Path) {
    if let Ok(handle) = fs::File::open(dir) {
        if let Err(err) = handle.sync_all() {
            debug!(dir = %dir.display(), error = %err, "Directory sync not supported");
        }
    }
}

/// Permission bits of an existing file, if any (Unix only)
#[cfg(unix)]
pub fn file_mode(path: &Path) -> Option<u32> {
    use std::os::unix::fs::PermissionsExt;

    fs::metadata(path).ok().map(|meta| meta.permissions().mode() & 0o777)
}

#[cfg(not(unix))]
pub fn file_mode(_path: &Path) -> Option<u32> {
    None
}

/// Remove a file or directory tree. Returns `false` when nothing existed.
pub fn remove_path(path: &Path) -> io::Result<bool> {
    match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => {
            fs::remove_dir_all(path)?;
            Ok(true)
        }
        Ok(_) => {
            fs::remove_file(path)?;
            Ok(true)
        }
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(err) => Err(err),
    }
}

/// Exclusive lock on a configuration root, held for the lifetime of the guard.
///
/// The lock file carries the owning PID. A stale lock left by a crashed run
/// must be removed by the operator.
#[derive(Debug)]
pub struct RootLock {
    path: PathBuf,
}

impl RootLock {
    pub const FILE_NAME: &'static str = ".stackctl.lock";

    /// Acquire the lock, failing with `AlreadyExists` when another run holds it
    pub fn acquire(root: &Path) -> io::Result<Self> {
        let path = root.join(Self::FILE_NAME);
        let mut file = fs::OpenOptions::new().write(true).create_new(true).open(&path)?;
        writeln!(file, "{}", std::process::id())?;
        debug!(lock = %path.display(), "Acquired configuration root lock");
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for RootLock {
    fn drop(&mut self) {
        if let Err(err) = fs::remove_file(&self.path) {
            warn!(lock = %self.path.display(), error = %err, "Failed to release configuration root lock");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_atomic_write_replaces_content() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("service.env");
        fs::write(&path, "OLD=1\n").unwrap();

        atomic_write(&path, b"NEW=2\n", None).unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "NEW=2\n");
        let leftovers: Vec<_> = fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(leftovers.len(), 1, "temporary file must be renamed away");
    }

    #[cfg(unix)]
    #[test]
    fn test_atomic_write_sets_mode() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("secret.env");
        atomic_write(&path, b"KEY=value\n", Some(0o600)).unwrap();

        let mode = fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o600);
    }

    #[test]
    fn test_remove_path_handles_files_dirs_and_missing() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("a.log");
        let tree = dir.path().join("data/nested");
        fs::write(&file, "x").unwrap();
        fs::create_dir_all(&tree).unwrap();
        fs::write(tree.join("b"), "y").unwrap();

        assert!(remove_path(&file).unwrap());
        assert!(remove_path(&dir.path().join("data")).unwrap());
        assert!(!remove_path(&dir.path().join("missing")).unwrap());
        assert!(!dir.path().join("data").exists());
    }

    #[test]
    fn test_root_lock_is_exclusive() {
        let dir = TempDir::new().unwrap();
        let lock = RootLock::acquire(dir.path()).unwrap();

        let err = RootLock::acquire(dir.path()).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::AlreadyExists);

        drop(lock);
        assert!(RootLock::acquire(dir.path()).is_ok());
    }
}
