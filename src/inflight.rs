//! Registry of uploads currently in flight on this server instance.

use std::collections::HashSet;

use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::checksum::Checksum;

/// The set of digests currently being written by this process.
///
/// Gates PUT to a single writer per digest and lets readers wait out a
/// concurrent upload before touching the disk, so they never observe a
/// partial or just-about-to-publish file.
#[derive(Debug, Default)]
pub struct InflightSet {
    /// Digests with an active upload.
    entries: Mutex<HashSet<Checksum>>,
    /// Signalled whenever an entry is removed.
    changed: Notify,
}

impl InflightSet {
    /// Creates an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Claims `checksum` for upload.
    ///
    /// Returns `false` when an upload for the digest is already running.
    pub fn try_insert(&self, checksum: &Checksum) -> bool {
        self.entries.lock().insert(checksum.clone())
    }

    /// Removes a finished upload and wakes every waiter.
    pub fn remove_and_notify(&self, checksum: &Checksum) {
        self.entries.lock().remove(checksum);
        self.changed.notify_waiters();
    }

    /// Waits until none of `checksums` has an upload in flight.
    ///
    /// Rechecks the intersection on every wakeup.
    pub async fn wait_until_absent(&self, checksums: &[Checksum]) {
        loop {
            let notified = self.changed.notified();
            tokio::pin!(notified);
            // Register for wakeups before checking, so a removal between the
            // check and the await is not lost.
            notified.as_mut().enable();
            {
                let entries = self.entries.lock();
                if !checksums.iter().any(|cs| entries.contains(cs)) {
                    return;
                }
            }
            notified.await;
        }
    }
}
