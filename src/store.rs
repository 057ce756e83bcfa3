//! The content-addressed storage engine.
//!
//! Maps checksums to files on local disk, ingests uploads atomically, serves
//! verified reads, and answers batched existence queries. Coordination with
//! concurrent uploads and announced-but-pending buffers happens through the
//! in-flight and promise registries the store owns.

mod ingest;
mod retrieve;

use std::fs::Metadata;
use std::io;
use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;

use axum::body::Bytes;
use futures::Stream;
use futures::future::join_all;
use tokio::io::AsyncBufReadExt;

pub use ingest::IngestOutcome;

use crate::checksum::Checksum;
use crate::checksum::ChecksumAlgorithm;
use crate::inflight::InflightSet;
use crate::layout::ExtraDir;
use crate::layout::Layout;
use crate::layout::candidate_paths;
use crate::lock;
use crate::promise::PromiseRegistry;

/// Chunk size for hashing and streaming buffer files.
pub const CHUNK_SIZE: usize = 64 * 1024;

/// Errors from the storage engine.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// No candidate path holds the buffer.
    #[error("Not found")]
    NotFound,

    /// A candidate path exists but is not a regular file.
    #[error("File at path {} is not a file.", .0.display())]
    NotAFile(PathBuf),

    /// Two consecutive verification attempts hashed to the wrong digest.
    #[error(
        "File corruption: file at path {} does not have the correct {algorithm} checksum.",
        path.display()
    )]
    Corruption {
        /// The resolved path whose content is wrong.
        path: PathBuf,
        /// Label of the configured algorithm.
        algorithm: &'static str,
    },

    /// Upload attempted against a layout without a write path.
    #[error("layout does not accept uploads")]
    ReadOnlyLayout,

    /// Any other filesystem failure.
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// The content-addressed store: primary directory, fallbacks, and the
/// coordination registries shared with the HTTP layer.
#[derive(Debug)]
pub struct Store {
    /// Primary buffer directory.
    directory: PathBuf,
    /// Layout of the primary directory.
    layout: Layout,
    /// Read-only fallback roots, in consultation order.
    extra_dirs: Vec<ExtraDir>,
    /// Age beyond which an advisory lockfile is stale.
    lock_timeout: Duration,
    /// Hash algorithm buffers are named by.
    algorithm: ChecksumAlgorithm,
    /// Digests currently being uploaded.
    inflight: InflightSet,
    /// Digests announced for upload.
    promises: PromiseRegistry,
}

impl Store {
    /// Creates a store over `directory`.
    pub fn new(
        directory: PathBuf,
        layout: Layout,
        extra_dirs: Vec<ExtraDir>,
        lock_timeout: Duration,
        algorithm: ChecksumAlgorithm,
    ) -> Self {
        Self {
            directory,
            layout,
            extra_dirs,
            lock_timeout,
            algorithm,
            inflight: InflightSet::new(),
            promises: PromiseRegistry::new(),
        }
    }

    /// The in-flight upload registry.
    pub fn inflight(&self) -> &InflightSet {
        &self.inflight
    }

    /// The promise registry.
    pub fn promises(&self) -> &PromiseRegistry {
        &self.promises
    }

    /// The configured hash algorithm.
    pub fn algorithm(&self) -> ChecksumAlgorithm {
        self.algorithm
    }

    /// Serves a verified read: resolves the buffer across layouts, waits out
    /// external writers, and checks the content hash before handing back the
    /// path and its metadata.
    ///
    /// # Errors
    ///
    /// [`StoreError::NotFound`] after all fallbacks and promise resolution,
    /// [`StoreError::Corruption`] after two consecutive hash mismatches, or
    /// [`StoreError::NotAFile`] for a candidate that is not a regular file.
    pub async fn open_verified(
        &self,
        checksum: &Checksum,
    ) -> Result<(PathBuf, Metadata), StoreError> {
        retrieve::open_verified(self, checksum).await
    }

    /// Ingests a streaming upload whose bytes must hash to `checksum`.
    ///
    /// See [`IngestOutcome`] for the terminal states; cleanup (temp file,
    /// in-flight entry, lockfile) runs on every path.
    pub async fn ingest<S, E>(
        &self,
        checksum: &Checksum,
        body: S,
    ) -> Result<IngestOutcome, StoreError>
    where
        S: Stream<Item = Result<Bytes, E>> + Unpin,
    {
        if !self.inflight.try_insert(checksum) {
            tracing::info!("PUT {checksum} already in progress");
            return Ok(IngestOutcome::Busy);
        }
        let result = ingest::ingest_guarded(self, checksum, body).await;
        // Readers may proceed once the outcome is decided, and the promise
        // resolves only after the file is visible to them.
        self.inflight.remove_and_notify(checksum);
        if matches!(
            result,
            Ok(IngestOutcome::Stored) | Ok(IngestOutcome::AlreadyStored)
        ) {
            self.promises.resolve(checksum);
        }
        result
    }

    /// Batched existence scan: for each digest, `0` when absent, otherwise
    /// the file size in bytes. Promised-but-absent digests report `1`.
    ///
    /// Stats are issued concurrently per directory scan; individual stat
    /// failures count as misses.
    pub async fn sizes(&self, checksums: &[Checksum]) -> Vec<u64> {
        self.inflight.wait_until_absent(checksums).await;

        let mut sizes: Vec<u64> = join_all(checksums.iter().map(|checksum| async move {
            for path in self.layout.primary_candidates(&self.directory, checksum) {
                if let Some(size) = stat_size(&path).await {
                    return size;
                }
            }
            0
        }))
        .await;

        for extra in &self.extra_dirs {
            let pending: Vec<usize> = (0..checksums.len()).filter(|&i| sizes[i] == 0).collect();
            if pending.is_empty() {
                break;
            }
            let found = join_all(
                pending
                    .iter()
                    .map(|&i| stat_size_owned(extra.buffer_path(&checksums[i]))),
            )
            .await;
            for (&i, size) in pending.iter().zip(found) {
                if let Some(size) = size {
                    sizes[i] = size;
                }
            }
        }

        for index in self.promises.promised_indices(checksums) {
            if sizes[index] == 0 {
                sizes[index] = 1;
            }
        }
        sizes
    }

    /// The canonical write path for `checksum` in the primary layout.
    fn write_path(&self, checksum: &Checksum) -> Result<PathBuf, StoreError> {
        self.layout
            .write_path(&self.directory, checksum)
            .ok_or(StoreError::ReadOnlyLayout)
    }

    /// The directory that holds the write path.
    fn write_dir(&self, checksum: &Checksum) -> PathBuf {
        match self.layout {
            Layout::Prefix => self.directory.join(checksum.prefix()),
            _ => self.directory.clone(),
        }
    }

    /// Resolves the first existing regular file among the candidates.
    async fn resolve(&self, checksum: &Checksum) -> Result<(PathBuf, Metadata), StoreError> {
        for path in candidate_paths(self.layout, &self.directory, &self.extra_dirs, checksum) {
            match tokio::fs::metadata(&path).await {
                Ok(meta) if meta.is_file() => return Ok((path, meta)),
                Ok(_) => return Err(StoreError::NotAFile(path)),
                Err(err) if err.kind() == io::ErrorKind::NotFound => continue,
                Err(err) => return Err(err.into()),
            }
        }
        Err(StoreError::NotFound)
    }

    /// Waits out every lockfile a reader must honor for `checksum`.
    ///
    /// `resolved` is the already-resolved buffer path, when there is one; for
    /// flat and prefix layouts the canonical path's lock is checked even
    /// before the file exists.
    async fn wait_read_locks(&self, checksum: &Checksum, resolved: Option<&Path>) {
        for lock_path in self.layout.global_lock_paths(&self.directory, checksum) {
            lock::wait_no_lock(&lock_path, self.lock_timeout).await;
        }
        let file = match resolved {
            Some(path) => Some(path.to_path_buf()),
            None => self.layout.write_path(&self.directory, checksum),
        };
        if let Some(path) = file {
            lock::wait_no_lock(&lock::lock_path(&path), self.lock_timeout).await;
        }
    }

    /// Streams the file at `path` through the configured hash.
    async fn hash_file(&self, path: &Path) -> Result<Checksum, StoreError> {
        let file = match tokio::fs::File::open(path).await {
            Ok(file) => file,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound);
            }
            Err(err) => return Err(err.into()),
        };
        let mut reader = tokio::io::BufReader::with_capacity(CHUNK_SIZE, file);
        let mut hasher = self.algorithm.hasher();
        loop {
            let chunk = reader.fill_buf().await?;
            if chunk.is_empty() {
                break;
            }
            hasher.update(chunk);
            let consumed = chunk.len();
            reader.consume(consumed);
        }
        Ok(hasher.finalize())
    }
}

/// Size of the regular file at `path`, or `None` on any miss or error.
async fn stat_size(path: &Path) -> Option<u64> {
    match tokio::fs::metadata(path).await {
        Ok(meta) if meta.is_file() => Some(meta.len()),
        _ => None,
    }
}

/// Owned-path variant of [`stat_size`] for collected futures.
async fn stat_size_owned(path: PathBuf) -> Option<u64> {
    stat_size(&path).await
}
