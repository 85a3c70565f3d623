use crate::CoreError;
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::debug;

/// Advisory file lock serializing lifecycle changes to one container.
///
/// Held across "inspect then start/create" so two processes (or threads)
/// starting the same engine cannot both issue a create. Released on drop.
pub struct LifecycleLock {
    lock_file: File,
    path: PathBuf,
}

impl LifecycleLock {
    /// `<dir>/<container>.lock`.
    pub fn path_for(dir: &Path, container_name: &str) -> PathBuf {
        dir.join(format!("{container_name}.lock"))
    }

    /// Default lock directory, shared by every process of this user.
    pub fn default_dir() -> PathBuf {
        std::env::temp_dir().join("graphmem-locks")
    }

    /// Block until the lock is held.
    pub fn acquire(lock_path: &Path) -> Result<Self, CoreError> {
        let file = open_lock_file(lock_path)?;
        file.lock_exclusive()?;
        debug!("acquired lifecycle lock {}", lock_path.display());
        Ok(Self {
            lock_file: file,
            path: lock_path.to_path_buf(),
        })
    }

    /// `None` if another holder has it.
    pub fn try_acquire(lock_path: &Path) -> Result<Option<Self>, CoreError> {
        let file = open_lock_file(lock_path)?;
        match file.try_lock_exclusive() {
            Ok(()) => Ok(Some(Self {
                lock_file: file,
                path: lock_path.to_path_buf(),
            })),
            Err(_) => Ok(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn open_lock_file(lock_path: &Path) -> Result<File, CoreError> {
    if let Some(parent) = lock_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    Ok(OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(false)
        .open(lock_path)?)
}

impl Drop for LifecycleLock {
    fn drop(&mut self) {
        let _ = self.lock_file.unlock();
    }
}

static SHUTDOWN_REQUESTED: AtomicBool = AtomicBool::new(false);

/// Ctrl-C sets the shutdown flag so long waits can stop early; a second
/// Ctrl-C exits immediately.
pub fn install_signal_handler() {
    let _ = ctrlc::set_handler(move || {
        if SHUTDOWN_REQUESTED.load(Ordering::SeqCst) {
            std::process::exit(130);
        }
        SHUTDOWN_REQUESTED.store(true, Ordering::SeqCst);
        eprintln!("\nshutdown requested, abandoning the current wait...");
    });
}

pub fn shutdown_requested() -> bool {
    SHUTDOWN_REQUESTED.load(Ordering::SeqCst)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_path_is_keyed_by_container() {
        let dir = Path::new("/tmp/locks");
        assert_eq!(
            LifecycleLock::path_for(dir, "graphmem-neo4j"),
            PathBuf::from("/tmp/locks/graphmem-neo4j.lock")
        );
    }

    #[test]
    fn acquire_creates_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = LifecycleLock::path_for(&dir.path().join("nested"), "engine");
        let lock = LifecycleLock::acquire(&path).unwrap();
        assert!(path.exists());
        assert_eq!(lock.path(), path);
    }

    #[test]
    fn held_lock_blocks_try_acquire() {
        let dir = tempfile::tempdir().unwrap();
        let path = LifecycleLock::path_for(dir.path(), "engine");
        let _held = LifecycleLock::acquire(&path).unwrap();
        assert!(LifecycleLock::try_acquire(&path).unwrap().is_none());
    }

    #[test]
    fn different_containers_do_not_contend() {
        let dir = tempfile::tempdir().unwrap();
        let _a = LifecycleLock::acquire(&LifecycleLock::path_for(dir.path(), "a")).unwrap();
        let b = LifecycleLock::try_acquire(&LifecycleLock::path_for(dir.path(), "b")).unwrap();
        assert!(b.is_some());
    }

    #[test]
    fn released_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let path = LifecycleLock::path_for(dir.path(), "engine");
        drop(LifecycleLock::acquire(&path).unwrap());
        assert!(LifecycleLock::try_acquire(&path).unwrap().is_some());
    }

    #[test]
    fn shutdown_flag_starts_clear() {
        assert!(!shutdown_requested());
    }
}
