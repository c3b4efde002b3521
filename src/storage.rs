//! File persistence primitives shared by the session, primer and insight stores
//!
//! - [`FileLock`]: advisory lock file created with `O_EXCL`, polled with a
//!   bounded wait, removed on drop.
//! - [`write_atomic`]: temp file in the same directory, owner-only
//!   permissions, then rename over the target.

use crate::error::{Error, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};

const LOCK_POLL: Duration = Duration::from_millis(25);

/// Exclusive advisory lock backed by a lock file
///
/// The file holds an owner token (`<pid> <uuid>`). Release only removes the
/// file while it still carries this lock's token.
#[derive(Debug)]
pub struct FileLock {
    path: PathBuf,
    token: String,
    _file: File,
}

impl FileLock {
    /// Acquire the lock at `path`, waiting at most `timeout`.
    ///
    /// A lock file older than `stale_after` is treated as abandoned by a
    /// crashed process and reclaimed once. Reclaiming renames the file to a
    /// private name before deleting it, so two waiters cannot both remove
    /// it. Staleness is judged by mtime only: a holder that keeps a lock
    /// longer than `stale_after` loses it.
    pub fn acquire(path: &Path, timeout: Duration, stale_after: Duration) -> Result<Self> {
        let start = Instant::now();
        let mut stale_removed = false;
        let token = format!("{} {}", std::process::id(), uuid::Uuid::new_v4().simple());
        loop {
            match OpenOptions::new().write(true).create_new(true).open(path) {
                Ok(mut file) => {
                    if let Err(e) = file.write_all(token.as_bytes()).and_then(|()| file.flush()) {
                        let _ = fs::remove_file(path);
                        return Err(Error::Io(e));
                    }
                    return Ok(Self {
                        path: path.to_path_buf(),
                        token,
                        _file: file,
                    });
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    if !stale_removed && file_age(path).is_some_and(|age| age > stale_after) {
                        stale_removed = true;
                        if reclaim_stale(path, stale_after) {
                            continue;
                        }
                    }
                    if start.elapsed() >= timeout {
                        return Err(Error::LockTimeout(format!(
                            "{} held for more than {}ms",
                            path.display(),
                            timeout.as_millis()
                        )));
                    }
                    std::thread::sleep(LOCK_POLL);
                }
                Err(e) => return Err(Error::Io(e)),
            }
        }
    }

    /// Path of the lock file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether the lock file on disk still carries this lock's token
    pub fn is_owned(&self) -> bool {
        fs::read_to_string(&self.path).is_ok_and(|content| content == self.token)
    }
}

/// Move an abandoned lock aside and delete it. Returns false when the file
/// was already gone or turned out to be a live lock.
fn reclaim_stale(path: &Path, stale_after: Duration) -> bool {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let aside = path.with_file_name(format!(".{}.{}.stale", file_name, uuid::Uuid::new_v4().simple()));
    if fs::rename(path, &aside).is_err() {
        return false;
    }
    // Another waiter may have reclaimed first and a new holder created a
    // fresh lock in between; put that one back.
    if !file_age(&aside).is_some_and(|age| age > stale_after) {
        if fs::hard_link(&aside, path).is_err() {
            tracing::warn!(lock = %path.display(), "Live lock moved aside and not restored");
        }
        let _ = fs::remove_file(&aside);
        return false;
    }
    tracing::warn!(lock = %path.display(), "Removing abandoned lock file");
    if let Err(e) = fs::remove_file(&aside) {
        tracing::debug!(lock = %aside.display(), error = %e, "Failed to remove reclaimed lock");
    }
    true
}

impl Drop for FileLock {
    fn drop(&mut self) {
        if !self.is_owned() {
            tracing::warn!(lock = %self.path.display(), "Lock was reclaimed by another process; leaving it");
            return;
        }
        if let Err(e) = fs::remove_file(&self.path) {
            tracing::debug!(lock = %self.path.display(), error = %e, "Failed to release lock");
        }
    }
}

/// Write `bytes` to `path` atomically with owner-only permissions
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| Error::InvalidInput(format!("{} has no parent", path.display())))?;
    fs::create_dir_all(parent)?;

    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| Error::InvalidInput(format!("{} has no file name", path.display())))?;
    let tmp_path = parent.join(format!(".{}.{}.tmp", file_name, uuid::Uuid::new_v4().simple()));

    let result = (|| -> Result<()> {
        let mut file = File::create(&tmp_path)?;
        restrict_permissions(&tmp_path)?;
        file.write_all(bytes)?;
        file.sync_all()?;
        fs::rename(&tmp_path, path)?;
        Ok(())
    })();

    if result.is_err() {
        let _ = fs::remove_file(&tmp_path);
    }
    result
}

/// Serialize `value` as pretty JSON and write it atomically
pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let bytes = serde_json::to_vec_pretty(value)?;
    write_atomic(path, &bytes)
}

/// Read a JSON document, mapping a missing file to `NotFound`
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(Error::NotFound(path.display().to_string()))
        }
        Err(e) => return Err(Error::Io(e)),
    };
    Ok(serde_json::from_slice(&bytes)?)
}

/// Time since the file was last modified
pub fn file_age(path: &Path) -> Option<Duration> {
    let modified = fs::metadata(path).ok()?.modified().ok()?;
    SystemTime::now().duration_since(modified).ok()
}

/// Remove a file, treating "already gone" as success
pub fn remove_if_exists(path: &Path) -> Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(Error::Io(e)),
    }
}

/// Reduce a free-form name (project, tool) to a filesystem-safe key
pub fn sanitize_key(name: &str) -> String {
    let key: String = name
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c.to_ascii_lowercase()
            } else {
                '-'
            }
        })
        .collect();
    let key = key.trim_matches('-').to_string();
    if key.is_empty() {
        "default".to_string()
    } else {
        key
    }
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;
    Ok(())
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> Result<()> {
    Ok(())
}
