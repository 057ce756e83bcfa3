//! Verified retrieval of buffers.
//!
//! A read resolves the checksum to a path, hashes the content, and only then
//! serves it. Misses and mismatches wait out advisory locks and re-resolve
//! once, since an external writer may be mid-publish; a promise for the
//! digest turns a persistent miss into a wait instead of an error.

use std::fs::Metadata;
use std::path::PathBuf;

use tracing::warn;

use super::Store;
use super::StoreError;
use crate::checksum::Checksum;

/// Resolves and verifies `checksum`, waiting on a promise when the buffer is
/// not on disk yet.
pub(super) async fn open_verified(
    store: &Store,
    checksum: &Checksum,
) -> Result<(PathBuf, Metadata), StoreError> {
    loop {
        match try_open(store, checksum).await {
            Err(StoreError::NotFound) => {
                if store.promises().wait_for(checksum).await {
                    // The announced upload completed; look again.
                    continue;
                }
                return Err(StoreError::NotFound);
            }
            result => return result,
        }
    }
}

/// One full resolution pass: resolve (twice on a miss, with a lock wait in
/// between), then hash, then re-resolve and re-hash once on a mismatch.
async fn try_open(
    store: &Store,
    checksum: &Checksum,
) -> Result<(PathBuf, Metadata), StoreError> {
    let (path, meta) = match store.resolve(checksum).await {
        Ok(resolved) => resolved,
        Err(StoreError::NotFound) => {
            store.wait_read_locks(checksum, None).await;
            store.resolve(checksum).await?
        }
        Err(err) => return Err(err),
    };

    let actual = store.hash_file(&path).await?;
    if actual == *checksum {
        return Ok((path, meta));
    }

    // A writer may have been mid-publish during the first pass.
    warn!(
        "checksum mismatch at {} (got {actual}), waiting out writers",
        path.display()
    );
    store.wait_read_locks(checksum, Some(&path)).await;
    let (path, meta) = store.resolve(checksum).await?;
    let actual = store.hash_file(&path).await?;
    if actual == *checksum {
        return Ok((path, meta));
    }
    Err(StoreError::Corruption {
        path,
        algorithm: store.algorithm.label(),
    })
}
