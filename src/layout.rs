//! Directory layouts and candidate path resolution.
//!
//! A layout maps a checksum to the on-disk location of its buffer within a
//! root directory. The resolver is a pure function from (layout, directory,
//! extras, checksum) to an ordered list of candidate paths.

use std::fmt;
use std::path::Path;
use std::path::PathBuf;

use clap::ValueEnum;

use crate::checksum::Checksum;

/// Zero-byte marker file signalling that a directory uses the prefix layout.
///
/// Consulted for extra directories, whose layout is not configured explicitly.
pub const PREFIX_MARKER: &str = ".HASHSERVER_PREFIX";

/// Vault subdirectories, in the fixed search order.
const VAULT_SUBDIRS: [(&str, &str); 4] = [
    ("independent", "small"),
    ("independent", "big"),
    ("dependent", "small"),
    ("dependent", "big"),
];

/// The directory-to-path mapping rule for buffers.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum Layout {
    /// Buffer at `$DIR/$CHECKSUM`.
    Flat,

    /// Buffer at `$DIR/$P2/$CHECKSUM`, where `$P2` is the first two hex
    /// characters of the checksum.
    #[default]
    Prefix,

    /// Read-only archive layout: buffer under one of the four
    /// `{independent,dependent}/{small,big}` subdirectories.
    Vault,
}

impl Layout {
    /// The canonical write path for a buffer, when the layout has one.
    ///
    /// Vault is read-only and has no single canonical path; use
    /// [`Layout::primary_candidates`] to enumerate its locations.
    pub fn write_path(self, dir: &Path, checksum: &Checksum) -> Option<PathBuf> {
        match self {
            Self::Flat => Some(dir.join(checksum.as_str())),
            Self::Prefix => Some(dir.join(checksum.prefix()).join(checksum.as_str())),
            Self::Vault => None,
        }
    }

    /// Candidate buffer paths under the primary directory, in search order.
    pub fn primary_candidates(self, dir: &Path, checksum: &Checksum) -> Vec<PathBuf> {
        match self {
            Self::Flat | Self::Prefix => {
                // Infallible for flat and prefix.
                self.write_path(dir, checksum).into_iter().collect()
            }
            Self::Vault => VAULT_SUBDIRS
                .iter()
                .map(|(dep, size)| dir.join(dep).join(size).join(checksum.as_str()))
                .collect(),
        }
    }

    /// Directory-level lockfiles a reader must honor, in check order.
    ///
    /// The root lock always applies; the prefix layout additionally carries a
    /// lock in the two-character subdirectory, which is where writers place
    /// theirs.
    pub fn global_lock_paths(self, dir: &Path, checksum: &Checksum) -> Vec<PathBuf> {
        let mut locks = vec![dir.join(crate::lock::GLOBAL_LOCK_NAME)];
        if self == Self::Prefix {
            locks.push(
                dir.join(checksum.prefix())
                    .join(crate::lock::GLOBAL_LOCK_NAME),
            );
        }
        locks
    }

    /// The directory-level lockfile a writer waits on before publishing.
    pub fn write_lock_path(self, dir: &Path, checksum: &Checksum) -> PathBuf {
        match self {
            Self::Prefix => dir
                .join(checksum.prefix())
                .join(crate::lock::GLOBAL_LOCK_NAME),
            _ => dir.join(crate::lock::GLOBAL_LOCK_NAME),
        }
    }
}

impl fmt::Display for Layout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Flat => write!(f, "flat"),
            Self::Prefix => write!(f, "prefix"),
            Self::Vault => write!(f, "vault"),
        }
    }
}

/// A read-only fallback root consulted after the primary directory.
///
/// Each extra directory is flat unless the [`PREFIX_MARKER`] sentinel exists
/// at its root. Vault is not allowed as an extra.
#[derive(Clone, Debug)]
pub struct ExtraDir {
    /// Root of the extra directory.
    path: PathBuf,
    /// Flat or prefix, as signalled by the marker file.
    layout: Layout,
}

impl ExtraDir {
    /// Probes the marker file to decide the directory's layout.
    pub async fn discover(path: PathBuf) -> Self {
        let layout = match tokio::fs::metadata(path.join(PREFIX_MARKER)).await {
            Ok(_) => Layout::Prefix,
            Err(_) => Layout::Flat,
        };
        Self { path, layout }
    }

    /// An extra directory with a known layout, for tests.
    #[cfg(test)]
    pub(crate) fn with_layout(path: PathBuf, layout: Layout) -> Self {
        Self { path, layout }
    }

    /// The path a buffer would occupy in this directory.
    pub fn buffer_path(&self, checksum: &Checksum) -> PathBuf {
        match self.layout {
            Layout::Prefix => self
                .path
                .join(checksum.prefix())
                .join(checksum.as_str()),
            _ => self.path.join(checksum.as_str()),
        }
    }
}

/// All candidate paths for a buffer: primary layout first, then each extra
/// directory in order.
pub fn candidate_paths(
    layout: Layout,
    dir: &Path,
    extras: &[ExtraDir],
    checksum: &Checksum,
) -> Vec<PathBuf> {
    let mut candidates = layout.primary_candidates(dir, checksum);
    candidates.extend(extras.iter().map(|extra| extra.buffer_path(checksum)));
    candidates
}
