// src/hash.rs

//! Digests used across pantry
//!
//! SHA-256 addresses everything content-like: source archives in the
//! download cache, packaged files in the manifest and recipe revisions.
//! The package id alone is SHA-1, since consumers expect 40 hex characters.

use sha1::Sha1;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{self, BufReader};
use std::path::Path;

/// Hex length of a SHA-256 digest
pub const SHA256_HEX_LEN: usize = 64;

/// SHA-256 of a byte slice, lowercase hex
pub fn sha256(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// SHA-1 of a byte slice, lowercase hex
pub fn sha1(data: &[u8]) -> String {
    hex::encode(Sha1::digest(data))
}

/// SHA-256 over several parts fed in order, as if concatenated
pub fn sha256_parts<I, P>(parts: I) -> String
where
    I: IntoIterator<Item = P>,
    P: AsRef<[u8]>,
{
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part.as_ref());
    }
    hex::encode(hasher.finalize())
}

/// SHA-256 of a file, streamed
pub fn hash_file(path: &Path) -> io::Result<String> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut hasher = Sha256::new();
    io::copy(&mut reader, &mut hasher)?;
    Ok(hex::encode(hasher.finalize()))
}

/// Whether `value` looks like a SHA-256 hex digest
pub fn is_sha256(value: &str) -> bool {
    value.len() == SHA256_HEX_LEN && value.bytes().all(|b| b.is_ascii_hexdigit())
}

/// Compare a file against an expected SHA-256
///
/// The outer error is I/O; the inner one carries the actual digest when the
/// content does not match.
pub fn verify_file_sha256(path: &Path, expected: &str) -> io::Result<Result<(), String>> {
    let actual = hash_file(path)?;
    Ok(if actual.eq_ignore_ascii_case(expected) { Ok(()) } else { Err(actual) })
}
