// Single-instance lock file in the user home directory.
//
// The lock is advisory (fs2) and pid-stamped. A leftover file whose lock
// is free means the previous process died without cleanup; it is reclaimed
// silently. Dropping the guard releases the lock and removes the file.

use crate::core::monitor::debug_logger::get_debug_logger;
use crate::core::monitor::types::MonitorError;
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;

pub const LOCK_FILE_NAME: &str = ".netpulse.lock";

pub struct InstanceLock {
    file: File,
    path: PathBuf,
}

impl InstanceLock {
    /// Acquire the lock under the user's home directory.
    pub fn acquire() -> Result<Self, MonitorError> {
        let home = dirs::home_dir().ok_or(MonitorError::HomeDirNotFound)?;
        Self::acquire_at(home.join(LOCK_FILE_NAME))
    }

    pub fn acquire_at(path: PathBuf) -> Result<Self, MonitorError> {
        let stale = path.exists();
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| MonitorError::StateFileError(e.to_string()))?;

        file.try_lock_exclusive()
            .map_err(|_| MonitorError::LockHeld(path.display().to_string()))?;

        if stale {
            // Lock acquired despite an existing file: previous instance
            // died without cleanup.
            get_debug_logger().info("InstanceLock", "reclaimed stale lock file");
        }

        // Pid stamp for humans inspecting the file
        let _ = file.set_len(0);
        let _ = writeln!(file, "{}", std::process::id());
        let _ = file.flush();

        Ok(Self { file, path })
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }
}

impl Drop for InstanceLock {
    fn drop(&mut self) {
        let _ = fs2::FileExt::unlock(&self.file);
        let _ = std::fs::remove_file(&self.path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_release_cycle() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(LOCK_FILE_NAME);

        let lock = InstanceLock::acquire_at(path.clone()).unwrap();
        assert!(path.exists());
        let stamped = std::fs::read_to_string(&path).unwrap();
        assert_eq!(stamped.trim(), std::process::id().to_string());

        drop(lock);
        assert!(!path.exists());
    }

    #[test]
    fn second_acquire_fails_while_held() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(LOCK_FILE_NAME);
        let _held = InstanceLock::acquire_at(path.clone()).unwrap();
        let second = InstanceLock::acquire_at(path);
        assert!(matches!(second, Err(MonitorError::LockHeld(_))));
    }

    #[test]
    fn stale_file_is_reclaimed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(LOCK_FILE_NAME);
        std::fs::write(&path, "99999\n").unwrap();
        let lock = InstanceLock::acquire_at(path.clone()).unwrap();
        let stamped = std::fs::read_to_string(&path).unwrap();
        assert_eq!(stamped.trim(), std::process::id().to_string());
        drop(lock);
    }
}
