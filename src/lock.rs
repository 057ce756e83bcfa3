//! Advisory lockfile protocol for coordinating with external writers.
//!
//! A lockfile is an empty file whose presence signals "writer active"; its
//! mtime is the lock's freshness. Locks older than the configured timeout are
//! stale and may be ignored or removed.

use std::io;
use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;
use std::time::SystemTime;

use tokio::time::Instant;
use tokio::time::sleep;
use tracing::debug;

/// Name of a directory-level lockfile.
pub const GLOBAL_LOCK_NAME: &str = ".LOCK";

/// Suffix appended to a buffer path for its file-specific lockfile.
pub const LOCK_SUFFIX: &str = ".LOCK";

/// Poll interval while a fresh lockfile exists.
const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// How often a writer refreshes its lockfile's mtime.
const TOUCH_INTERVAL: Duration = Duration::from_secs(10);

/// The file-specific lockfile adjacent to a buffer path.
pub fn lock_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(LOCK_SUFFIX);
    PathBuf::from(name)
}

/// Waits until no fresh lockfile exists at `path`.
///
/// Returns immediately when the file is absent or older than `timeout`;
/// otherwise polls once per second. Pure read, never mutates.
pub async fn wait_no_lock(path: &Path, timeout: Duration) {
    let mut logged = false;
    loop {
        let Ok(meta) = tokio::fs::metadata(path).await else {
            return;
        };
        let age = meta
            .modified()
            .ok()
            .map(|mtime| SystemTime::now().duration_since(mtime).unwrap_or_default());
        let Some(age) = age else {
            return;
        };
        if age > timeout {
            // Stale: the writer died or forgot to clean up.
            return;
        }
        if !logged {
            debug!("waiting on lockfile {}", path.display());
            logged = true;
        }
        sleep(POLL_INTERVAL).await;
    }
}

/// Best-effort unlink of a lockfile; absence counts as success.
pub async fn break_lock(path: &Path) -> io::Result<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err),
    }
}

/// Write-side lockfile guard.
///
/// Created before streaming an upload and removed when the guard is dropped,
/// whether the write succeeded or not. [`WriteLock::touch_if_stale`] keeps the
/// mtime fresh so readers do not mistake a long write for a dead one.
#[derive(Debug)]
pub struct WriteLock {
    /// Path of the lockfile.
    path: PathBuf,
    /// When the lockfile's mtime was last refreshed.
    last_touch: Instant,
}

impl WriteLock {
    /// Creates the lockfile and returns the guard.
    pub async fn acquire(path: PathBuf) -> io::Result<Self> {
        tokio::fs::write(&path, b"").await?;
        Ok(Self {
            path,
            last_touch: Instant::now(),
        })
    }

    /// Refreshes the lockfile's mtime when the touch interval has elapsed.
    pub async fn touch_if_stale(&mut self) -> io::Result<()> {
        if self.last_touch.elapsed() >= TOUCH_INTERVAL {
            tokio::fs::write(&self.path, b"").await?;
            self.last_touch = Instant::now();
        }
        Ok(())
    }
}

impl Drop for WriteLock {
    fn drop(&mut self) {
        // Cleanup must run on every exit path, including unwinds; a leftover
        // lock only delays readers until the staleness timeout.
        let _ = std::fs::remove_file(&self.path);
    }
}
