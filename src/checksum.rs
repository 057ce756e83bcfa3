//! Checksum parsing and the hash-algorithm registry.
//!
//! A buffer is identified by the hex digest of its bytes under the configured
//! algorithm. The canonical external form is 64 lowercase hex characters;
//! uppercase input is accepted and normalized, everything else is rejected.

use std::fmt;

use clap::ValueEnum;
use serde::Serialize;
use sha2::Digest as _;

/// Number of raw bytes in a checksum.
const CHECKSUM_BYTES: usize = 32;

/// Number of hex characters in the canonical form.
const CHECKSUM_HEX_LEN: usize = 2 * CHECKSUM_BYTES;

/// A checksum that failed to parse.
///
/// The messages match what clients of the validation envelope expect.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChecksumError {
    /// The input does not decode to exactly 32 bytes.
    #[error("Wrong length")]
    WrongLength,

    /// The input contains a character outside `[0-9a-fA-F]`.
    #[error("non-hexadecimal number found in fromhex() arg at position {0}")]
    NonHex(usize),
}

/// The canonical identity of a buffer: 64 lowercase hex characters.
#[derive(Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct Checksum(String);

impl Checksum {
    /// Parses a checksum from its hex form, normalizing to lowercase.
    ///
    /// Idempotent on canonical input.
    ///
    /// # Errors
    ///
    /// Returns [`ChecksumError::WrongLength`] when the input does not decode
    /// to 32 bytes and [`ChecksumError::NonHex`] at the first offending
    /// character otherwise.
    pub fn parse(input: &str) -> Result<Self, ChecksumError> {
        // An odd-length string cannot decode to bytes at all; report that
        // before inspecting characters, like a hex decoder would.
        if input.len() % 2 == 1 {
            return Err(ChecksumError::WrongLength);
        }
        if let Some(position) = input.bytes().position(|b| !b.is_ascii_hexdigit()) {
            return Err(ChecksumError::NonHex(position));
        }
        if input.len() != CHECKSUM_HEX_LEN {
            return Err(ChecksumError::WrongLength);
        }
        Ok(Self(input.to_ascii_lowercase()))
    }

    /// Hex-encodes a raw 32-byte digest.
    pub fn from_bytes(bytes: &[u8; CHECKSUM_BYTES]) -> Self {
        Self(hex::encode(bytes))
    }

    /// The canonical hex form.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The first two hex characters, used by the prefix layout.
    pub fn prefix(&self) -> &str {
        &self.0[..2]
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Checksum({})", self.0)
    }
}

/// The registry of supported checksum algorithms.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum ChecksumAlgorithm {
    /// SHA3-256 (the default).
    #[default]
    Sha3_256,

    /// SHA-256.
    #[value(alias = "sha256")]
    Sha2_256,
}

impl ChecksumAlgorithm {
    /// The human-readable label used in corruption diagnostics.
    pub fn label(self) -> &'static str {
        match self {
            Self::Sha3_256 => "SHA3-256",
            Self::Sha2_256 => "SHA-256",
        }
    }

    /// Creates a streaming hasher for this algorithm.
    pub fn hasher(self) -> Hasher {
        match self {
            Self::Sha3_256 => Hasher::Sha3(sha3::Sha3_256::new()),
            Self::Sha2_256 => Hasher::Sha2(sha2::Sha256::new()),
        }
    }

    /// One-shot checksum of a byte slice.
    pub fn checksum(self, bytes: &[u8]) -> Checksum {
        let mut hasher = self.hasher();
        hasher.update(bytes);
        hasher.finalize()
    }
}

impl fmt::Display for ChecksumAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sha3_256 => write!(f, "sha3-256"),
            Self::Sha2_256 => write!(f, "sha2-256"),
        }
    }
}

/// A streaming hasher over one of the registry algorithms.
///
/// Fed chunk-by-chunk on both ingest and retrieval so that a mismatch is
/// detected at EOF without a second pass over the data.
#[derive(Debug)]
pub enum Hasher {
    /// SHA3-256 state.
    Sha3(sha3::Sha3_256),

    /// SHA-256 state.
    Sha2(sha2::Sha256),
}

impl Hasher {
    /// Feeds a chunk into the digest state.
    pub fn update(&mut self, chunk: &[u8]) {
        match self {
            Self::Sha3(state) => state.update(chunk),
            Self::Sha2(state) => state.update(chunk),
        }
    }

    /// Finalizes the digest as a canonical checksum.
    pub fn finalize(self) -> Checksum {
        let digest: [u8; CHECKSUM_BYTES] = match self {
            Self::Sha3(state) => state.finalize().into(),
            Self::Sha2(state) => state.finalize().into(),
        };
        Checksum::from_bytes(&digest)
    }
}
