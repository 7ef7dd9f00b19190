//! SHA-256 file digests.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use sha2::{Digest, Sha256};

use crate::error::{Result, WatchdogError};

/// A raw SHA-256 digest.
pub type Sha256Digest = [u8; 32];

const CHUNK: usize = 64 * 1024;

/// Hashes a file in fixed-size chunks.
///
/// # Errors
///
/// Returns an IO error if the file cannot be read.
pub fn file_digest(path: &Path) -> Result<Sha256Digest> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; CHUNK];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hasher.finalize().into())
}

/// Hex encoding of [`file_digest`].
///
/// # Errors
///
/// Returns an IO error if the file cannot be read.
pub fn file_digest_hex(path: &Path) -> Result<String> {
    file_digest(path).map(hex::encode)
}

/// Parses a hex digest, ignoring surrounding whitespace and case.
#[must_use]
pub fn parse_hex(s: &str) -> Option<Sha256Digest> {
    let bytes = hex::decode(s.trim()).ok()?;
    bytes.try_into().ok()
}

/// Reads the expected digest from an update marker: the first non-empty line,
/// hex encoded.
///
/// # Errors
///
/// Returns [`WatchdogError::MissingDigest`] if the marker is empty or the
/// line is not a 32-byte hex digest, and an IO error if it cannot be read.
pub fn expected_from_signal(path: &Path) -> Result<Sha256Digest> {
    let content = std::fs::read_to_string(path)?;
    content
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .and_then(parse_hex)
        .ok_or(WatchdogError::MissingDigest)
}

/// Hashes `path` and compares it byte for byte with `expected`.
///
/// Returns the hex digest of the file on success.
///
/// # Errors
///
/// Returns [`WatchdogError::DigestMismatch`] when the digests differ.
pub fn verify(path: &Path, expected: &Sha256Digest) -> Result<String> {
    let actual = file_digest(path)?;
    if actual == *expected {
        Ok(hex::encode(actual))
    } else {
        Err(WatchdogError::DigestMismatch {
            expected: hex::encode(expected),
            actual: hex::encode(actual),
        })
    }
}
