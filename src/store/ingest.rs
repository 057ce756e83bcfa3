//! Streaming verified ingestion of uploads.
//!
//! The body is hashed while it is written to a temp file adjacent to the
//! target; the canonical name appears only after the digest matches, via a
//! hard link. No partial data is ever visible under the canonical name.

use std::io;

use axum::body::Bytes;
use futures::Stream;
use futures::StreamExt;
use tokio::io::AsyncWriteExt;
use tracing::info;
use tracing::warn;

use super::Store;
use super::StoreError;
use crate::checksum::Checksum;
use crate::lock;
use crate::lock::WriteLock;

/// Terminal state of an ingest attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    /// The body was stored and published.
    Stored,

    /// The buffer already exists on disk; nothing was written.
    AlreadyStored,

    /// Another upload for this digest is in flight on this server.
    Busy,

    /// The body hashed to a different digest; nothing was published.
    ChecksumMismatch,

    /// The client disconnected mid-body; nothing was published.
    Disconnect,
}

/// Runs the upload with the in-flight entry already claimed by the caller.
pub(super) async fn ingest_guarded<S, E>(
    store: &Store,
    checksum: &Checksum,
    mut body: S,
) -> Result<IngestOutcome, StoreError>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
{
    info!("PUT {checksum} start");
    let path = store.write_path(checksum)?;

    if tokio::fs::metadata(&path).await.is_ok() {
        info!("PUT {checksum} already exists");
        return Ok(IngestOutcome::AlreadyStored);
    }

    let dir = store.write_dir(checksum);
    tokio::fs::create_dir_all(&dir).await?;

    // Wait out other writers, then take over the file lock for this upload.
    let global_lock = store.layout.write_lock_path(&store.directory, checksum);
    let file_lock = lock::lock_path(&path);
    lock::wait_no_lock(&global_lock, store.lock_timeout).await;
    lock::wait_no_lock(&file_lock, store.lock_timeout).await;
    lock::break_lock(&global_lock).await?;
    lock::break_lock(&file_lock).await?;
    let mut write_lock = WriteLock::acquire(file_lock).await?;

    // The temp file lives next to the target so the link below stays on one
    // filesystem; it is unlinked on drop unless published.
    let temp = tempfile::Builder::new()
        .prefix(&format!("{checksum}-"))
        .tempfile_in(&dir)?;
    let mut file = tokio::fs::File::from_std(temp.reopen()?);

    let mut hasher = store.algorithm.hasher();
    while let Some(chunk) = body.next().await {
        let Ok(chunk) = chunk else {
            warn!("PUT {checksum} client disconnected");
            return Ok(IngestOutcome::Disconnect);
        };
        hasher.update(&chunk);
        write_lock.touch_if_stale().await?;
        file.write_all(&chunk).await?;
    }
    file.flush().await?;

    let actual = hasher.finalize();
    if actual != *checksum {
        warn!("PUT {checksum} incorrect checksum (got {actual})");
        return Ok(IngestOutcome::ChecksumMismatch);
    }

    match tokio::fs::hard_link(temp.path(), &path).await {
        Ok(()) => {}
        // A peer published the same content between our exists check and the
        // link; theirs is byte-identical by definition.
        Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {}
        Err(err) => return Err(err.into()),
    }

    info!("PUT {checksum} completed");
    Ok(IngestOutcome::Stored)
}
