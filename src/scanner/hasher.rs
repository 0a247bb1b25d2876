//! BLAKE3 file hasher with streaming support.
//!
//! # Overview
//! [`Hasher`] produces the [`Checksum`] stored by the cache. Small files are
//! read through a fixed buffer; files at or above the mmap threshold are
//! memory-mapped and hashed on the rayon pool.

use std::fs::File;
use std::io::{ErrorKind, Read};
use std::path::Path;

use crate::cache::Checksum;

use super::HashError;

/// Read buffer size for streamed hashing.
pub const BUFFER_SIZE: usize = 64 * 1024;

/// Files at least this large are hashed through a memory map.
pub const DEFAULT_MMAP_THRESHOLD: u64 = 16 * 1024 * 1024;

/// Content hasher producing 32-byte BLAKE3 digests.
#[derive(Debug, Clone)]
pub struct Hasher {
    mmap_threshold: u64,
}

impl Default for Hasher {
    fn default() -> Self {
        Self::new()
    }
}

impl Hasher {
    /// Create a hasher with the default mmap threshold.
    #[must_use]
    pub fn new() -> Self {
        Self {
            mmap_threshold: DEFAULT_MMAP_THRESHOLD,
        }
    }

    /// Override the size at which files are memory-mapped.
    #[must_use]
    pub fn with_mmap_threshold(mut self, bytes: u64) -> Self {
        self.mmap_threshold = bytes;
        self
    }

    /// Hash the full content of `path`.
    ///
    /// # Errors
    ///
    /// [`HashError::NotFound`] if the file vanished, [`HashError::PermissionDenied`]
    /// if it cannot be read, [`HashError::Io`] for anything else.
    pub fn checksum(&self, path: &Path) -> Result<Checksum, HashError> {
        let map_err = |e: std::io::Error| match e.kind() {
            ErrorKind::NotFound => HashError::NotFound(path.to_path_buf()),
            ErrorKind::PermissionDenied => HashError::PermissionDenied(path.to_path_buf()),
            _ => HashError::Io {
                path: path.to_path_buf(),
                source: e,
            },
        };

        let mut file = File::open(path).map_err(map_err)?;
        let len = file.metadata().map_err(map_err)?.len();
        let mut hasher = blake3::Hasher::new();

        if len >= self.mmap_threshold {
            log::trace!("Hashing {} via mmap ({} bytes)", path.display(), len);
            hasher.update_mmap_rayon(path).map_err(map_err)?;
        } else {
            let mut buffer = vec![0u8; BUFFER_SIZE];
            loop {
                let n = match file.read(&mut buffer) {
                    Ok(0) => break,
                    Ok(n) => n,
                    Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                    Err(e) => return Err(map_err(e)),
                };
                hasher.update(&buffer[..n]);
            }
        }

        Ok(Checksum::from(*hasher.finalize().as_bytes()))
    }
}
