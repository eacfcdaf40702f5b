//! ALFA File Vault - Secure Filesystem Operations
//!
//! Atomic writes, exclusive creation and overwrite-before-delete for
//! everything the vault keeps on disk (key entries, encrypted objects).

use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Read, Write};
use std::path::{Component, Path, PathBuf};

use uuid::Uuid;

use crate::error::{VaultError, VaultResult};

/// Chunk used when overwriting before delete
const WIPE_CHUNK: usize = 1024 * 1024;

/// Secure Filesystem Handler
#[derive(Debug, Clone)]
pub struct SecureFs {
    root: PathBuf,
}

impl SecureFs {
    /// Create new SecureFs with root directory
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
        }
    }

    /// Resolve a relative path, refusing anything that escapes the root
    fn full_path(&self, relative: &str) -> VaultResult<PathBuf> {
        let rel = Path::new(relative);
        let clean = !relative.is_empty()
            && rel
                .components()
                .all(|c| matches!(c, Component::Normal(_)));

        if !clean {
            return Err(VaultError::InvalidInput(format!("unsafe path: {}", relative)));
        }
        Ok(self.root.join(rel))
    }

    fn ensure_parent(path: &Path) -> VaultResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        Ok(())
    }

    /// Sibling temp path, unique per call so concurrent writers never share one
    fn temp_path(path: &Path) -> PathBuf {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("entry");
        path.with_file_name(format!(".{}.{}.tmp", name, Uuid::new_v4().simple()))
    }

    /// Write `data` to a fresh owner-only temp file next to `path`, synced
    fn write_temp(path: &Path, data: &[u8]) -> VaultResult<PathBuf> {
        let temp_path = Self::temp_path(path);
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&temp_path)?;

        let written = restrict_permissions(&temp_path)
            .and_then(|_| file.write_all(data).map_err(VaultError::from))
            .and_then(|_| file.sync_all().map_err(VaultError::from));
        if let Err(e) = written {
            drop(file);
            let _ = fs::remove_file(&temp_path);
            return Err(e);
        }
        Ok(temp_path)
    }

    /// Write file atomically (temp file + rename), replacing any existing one
    pub fn write_file(&self, relative_path: &str, data: &[u8]) -> VaultResult<()> {
        let path = self.full_path(relative_path)?;
        Self::ensure_parent(&path)?;

        let temp_path = Self::write_temp(&path, data)?;
        if let Err(e) = fs::rename(&temp_path, &path) {
            let _ = fs::remove_file(&temp_path);
            return Err(e.into());
        }
        Ok(())
    }

    /// Create a file only if it does not exist yet.
    ///
    /// The content is written and synced under a temp name, then published
    /// with a hard link, which fails if the target exists. Readers never see
    /// a partially written file. Returns `false` without touching the file
    /// when it already exists.
    pub fn write_new(&self, relative_path: &str, data: &[u8]) -> VaultResult<bool> {
        let path = self.full_path(relative_path)?;
        Self::ensure_parent(&path)?;

        let temp_path = Self::write_temp(&path, data)?;
        let published = fs::hard_link(&temp_path, &path);
        if let Err(e) = fs::remove_file(&temp_path) {
            log::warn!("Could not remove temp file {}: {}", temp_path.display(), e);
        }

        match published {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Read a file
    pub fn read_file(&self, relative_path: &str) -> VaultResult<Vec<u8>> {
        let path = self.full_path(relative_path)?;

        let mut file = match File::open(&path) {
            Ok(f) => f,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(VaultError::FileNotFound(relative_path.to_string()))
            }
            Err(e) => return Err(e.into()),
        };

        let mut data = Vec::new();
        file.read_to_end(&mut data)?;
        Ok(data)
    }

    /// Overwrite with zeros, then delete. Returns whether the file existed.
    ///
    /// The file is renamed aside before the wipe so readers see either the
    /// old content or no file at all.
    pub fn delete_file(&self, relative_path: &str) -> VaultResult<bool> {
        let path = self.full_path(relative_path)?;
        let doomed = Self::temp_path(&path);

        match fs::rename(&path, &doomed) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e.into()),
        }

        let size = fs::metadata(&doomed).map(|m| m.len() as usize).unwrap_or(0);
        if size > 0 {
            if let Ok(mut file) = OpenOptions::new().write(true).open(&doomed) {
                let zeros = vec![0u8; size.min(WIPE_CHUNK)];
                let mut remaining = size;
                while remaining > 0 {
                    let n = remaining.min(zeros.len());
                    if file.write_all(&zeros[..n]).is_err() {
                        break;
                    }
                    remaining -= n;
                }
                let _ = file.sync_all();
            }
        }

        fs::remove_file(&doomed)?;
        Ok(true)
    }

    /// Check if file exists
    pub fn exists(&self, relative_path: &str) -> bool {
        self.full_path(relative_path)
            .map(|p| p.exists())
            .unwrap_or(false)
    }
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> VaultResult<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;
    Ok(())
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> VaultResult<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_secure_fs() {
        let dir = tempdir().unwrap();
        let fs = SecureFs::new(dir.path());

        fs.write_file("objects/u1/data.enc", b"encrypted data").unwrap();
        assert!(fs.exists("objects/u1/data.enc"));

        let data = fs.read_file("objects/u1/data.enc").unwrap();
        assert_eq!(data, b"encrypted data");

        assert!(fs.delete_file("objects/u1/data.enc").unwrap());
        assert!(!fs.exists("objects/u1/data.enc"));
        assert!(!fs.delete_file("objects/u1/data.enc").unwrap());
    }

    #[test]
    fn test_write_new_is_exclusive() {
        let dir = tempdir().unwrap();
        let fs = SecureFs::new(dir.path());

        assert!(fs.write_new("keys/a.key", b"first").unwrap());
        assert!(!fs.write_new("keys/a.key", b"second").unwrap());
        assert_eq!(fs.read_file("keys/a.key").unwrap(), b"first");
    }

    #[test]
    fn test_missing_file_is_not_found() {
        let dir = tempdir().unwrap();
        let fs = SecureFs::new(dir.path());
        assert!(matches!(fs.read_file("nope.bin"), Err(VaultError::FileNotFound(_))));
    }

    #[test]
    fn test_path_escape_rejected() {
        let dir = tempdir().unwrap();
        let fs = SecureFs::new(dir.path());

        assert!(matches!(
            fs.write_file("../outside", b"x"),
            Err(VaultError::InvalidInput(_))
        ));
        assert!(fs.read_file("/etc/passwd").is_err());
        assert!(fs.write_file("", b"x").is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_files_are_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempdir().unwrap();
        let fs = SecureFs::new(dir.path());
        fs.write_new("keys/b.key", b"k").unwrap();

        let mode = std::fs::metadata(dir.path().join("keys/b.key"))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn test_no_temp_files_left_behind() {
        let dir = tempdir().unwrap();
        let fs = SecureFs::new(dir.path());
        fs.write_file("keys/a.key", b"one").unwrap();
        fs.write_file("keys/a.key", b"two").unwrap();
        assert!(fs.write_new("keys/b.key", b"b").unwrap());
        assert!(!fs.write_new("keys/b.key", b"c").unwrap());
        assert!(fs.delete_file("keys/a.key").unwrap());

        let names: Vec<String> = std::fs::read_dir(dir.path().join("keys"))
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["b.key"]);
    }

    #[test]
    fn test_concurrent_write_new_never_exposes_partial_file() {
        let dir = tempdir().unwrap();
        let payload = vec![7u8; 64 * 1024];

        for round in 0..20 {
            let target = format!("keys/race-{}.key", round);
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    let fs = SecureFs::new(dir.path());
                    let target = target.clone();
                    let payload = payload.clone();
                    std::thread::spawn(move || {
                        let created = fs.write_new(&target, &payload).unwrap();
                        let read = fs.read_file(&target).unwrap();
                        (created, read.len())
                    })
                })
                .collect();

            let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
            assert_eq!(results.iter().filter(|(created, _)| *created).count(), 1);
            assert!(results.iter().all(|(_, len)| *len == payload.len()));
        }
    }
}
