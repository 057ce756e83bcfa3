//! Registry of announced-but-not-yet-uploaded buffers.
//!
//! A client that intends to upload a buffer can announce it with a promise;
//! concurrent readers of that digest then wait for the upload instead of
//! reporting a miss. Promises expire after a fixed TTL.

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::time::Instant;
use tokio::time::timeout_at;

use crate::checksum::Checksum;

/// How long a promise stays valid without being resolved.
pub const PROMISE_TTL: Duration = Duration::from_secs(600);

/// A single announced digest.
#[derive(Debug)]
struct PromiseEntry {
    /// Flips to `true` when the matching upload completes.
    ///
    /// A watch channel keeps its value, so a waiter that subscribes after
    /// resolution still observes it.
    resolved: watch::Sender<bool>,
    /// When the promise lapses.
    expires_at: Instant,
}

/// TTL-bounded table of digests a client has announced it will upload.
#[derive(Debug)]
pub struct PromiseRegistry {
    /// Promise lifetime.
    ttl: Duration,
    /// Announced digests.
    entries: Mutex<HashMap<Checksum, PromiseEntry>>,
}

impl Default for PromiseRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl PromiseRegistry {
    /// Creates a registry with the standard TTL.
    pub fn new() -> Self {
        Self::with_ttl(PROMISE_TTL)
    }

    /// Creates a registry with a custom TTL, for tests.
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Drops entries whose TTL has elapsed.
    fn sweep(entries: &mut HashMap<Checksum, PromiseEntry>, now: Instant) {
        entries.retain(|_, entry| entry.expires_at > now);
    }

    /// Announces `checksum`, or refreshes the expiry of an existing promise.
    ///
    /// The wakeup channel of an existing promise is preserved across the
    /// refresh, so waiters stay subscribed. Returns the TTL.
    pub fn add(&self, checksum: &Checksum) -> Duration {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        Self::sweep(&mut entries, now);
        entries
            .entry(checksum.clone())
            .and_modify(|entry| entry.expires_at = now + self.ttl)
            .or_insert_with(|| PromiseEntry {
                resolved: watch::Sender::new(false),
                expires_at: now + self.ttl,
            });
        self.ttl
    }

    /// Resolves `checksum`, waking every waiter. Idempotent.
    pub fn resolve(&self, checksum: &Checksum) {
        let entry = self.entries.lock().remove(checksum);
        if let Some(entry) = entry {
            let _ = entry.resolved.send(true);
        }
    }

    /// Positions in `checksums` that are currently promised.
    pub fn promised_indices(&self, checksums: &[Checksum]) -> Vec<usize> {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        Self::sweep(&mut entries, now);
        checksums
            .iter()
            .enumerate()
            .filter(|(_, cs)| entries.contains_key(cs))
            .map(|(index, _)| index)
            .collect()
    }

    /// Waits for `checksum` to be resolved.
    ///
    /// Returns `true` when the promise resolved before its TTL, meaning the
    /// caller should retry the file lookup, and `false` when no promise
    /// exists or the TTL elapsed while waiting.
    pub async fn wait_for(&self, checksum: &Checksum) -> bool {
        loop {
            let (mut resolved, deadline) = {
                let now = Instant::now();
                let mut entries = self.entries.lock();
                Self::sweep(&mut entries, now);
                match entries.get(checksum) {
                    None => return false,
                    Some(entry) => (entry.resolved.subscribe(), entry.expires_at),
                }
            };
            match timeout_at(deadline, resolved.wait_for(|done| *done)).await {
                Ok(Ok(_)) => return true,
                // The entry was dropped without resolving (expired and swept
                // by another caller, possibly re-added); re-examine it.
                Ok(Err(_)) => continue,
                // Deadline passed, but a refresh may have moved it.
                Err(_) => continue,
            }
        }
    }
}
