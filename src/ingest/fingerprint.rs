//! Content fingerprinting (size + SHA-256)

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::io::Read;
use std::path::Path;

/// Read buffer size for hashing
pub const CHUNK_SIZE: usize = 1 << 20;

/// Identity of a file's content
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fingerprint {
    /// Size in bytes
    pub size: u64,
    /// Lowercase hex SHA-256 of the content
    pub content_hash: String,
}

/// Fingerprint a file by streaming it in fixed-size chunks
pub fn fingerprint(path: &Path) -> Result<Fingerprint> {
    let file = std::fs::File::open(path).map_err(|e| Error::io(path, e))?;
    fingerprint_reader(file).map_err(|e| Error::io(path, e))
}

/// Fingerprint any readable source
pub fn fingerprint_reader<R: Read>(reader: R) -> std::io::Result<Fingerprint> {
    let mut hashing = HashingReader::new(reader);
    let mut buffer = vec![0u8; CHUNK_SIZE];
    loop {
        let read = hashing.read(&mut buffer)?;
        if read == 0 {
            break;
        }
    }
    Ok(hashing.finish())
}

/// Reader adapter that hashes every byte passing through it.
///
/// The loader parses through one of these so the bytes it stages can be
/// compared against the fingerprint taken before parsing.
pub struct HashingReader<R> {
    inner: R,
    hasher: Sha256,
    size: u64,
}

impl<R: Read> HashingReader<R> {
    /// Wrap a reader
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            hasher: Sha256::new(),
            size: 0,
        }
    }

    /// Read the remainder of the source so the hash covers all of it
    pub fn drain(&mut self) -> std::io::Result<()> {
        std::io::copy(self, &mut std::io::sink())?;
        Ok(())
    }

    /// Fingerprint of the bytes read so far
    pub fn finish(self) -> Fingerprint {
        Fingerprint {
            size: self.size,
            content_hash: hex::encode(self.hasher.finalize()),
        }
    }
}

impl<R: Read> Read for HashingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let read = self.inner.read(buf)?;
        self.hasher.update(&buf[..read]);
        self.size += read as u64;
        Ok(read)
    }
}
