//! Artifact hash verification.
//!
//! Manifest hashes carry an optional algorithm prefix:
//!
//! | Prefix    | Algorithm |
//! |-----------|-----------|
//! | (none)    | SHA-256   |
//! | `sha1:`   | SHA-1     |
//! | `sha512:` | SHA-512   |
//! | `md5:`    | MD5       |
//!
//! Files are streamed through the digest; comparison ignores case.

use crate::error::{LadleError, Result};
use sha2::Digest;
use std::fs::File;
use std::io::Read;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashAlgorithm {
    Sha256,
    Sha1,
    Sha512,
    Md5,
}

/// Split a manifest hash into its algorithm and lowercase hex digest.
pub fn parse_hash(value: &str) -> (HashAlgorithm, String) {
    let (algorithm, digest) = if let Some(rest) = value.strip_prefix("sha1:") {
        (HashAlgorithm::Sha1, rest)
    } else if let Some(rest) = value.strip_prefix("sha512:") {
        (HashAlgorithm::Sha512, rest)
    } else if let Some(rest) = value.strip_prefix("md5:") {
        (HashAlgorithm::Md5, rest)
    } else if let Some(rest) = value.strip_prefix("sha256:") {
        (HashAlgorithm::Sha256, rest)
    } else {
        (HashAlgorithm::Sha256, value)
    };
    (algorithm, digest.trim().to_ascii_lowercase())
}

fn stream_digest<D: Digest, R: Read>(mut reader: R) -> Result<String>
where
    sha2::digest::Output<D>: std::fmt::LowerHex,
{
    let mut hasher = D::new();
    let mut buffer = vec![0; 8192];

    loop {
        let n = reader.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

/// Compute the lowercase hex digest of a file.
pub fn file_digest(path: &Path, algorithm: HashAlgorithm) -> Result<String> {
    let file = File::open(path)?;
    match algorithm {
        HashAlgorithm::Sha256 => stream_digest::<sha2::Sha256, _>(file),
        HashAlgorithm::Sha512 => stream_digest::<sha2::Sha512, _>(file),
        HashAlgorithm::Sha1 => stream_digest::<sha1::Sha1, _>(file),
        HashAlgorithm::Md5 => stream_digest::<md5::Md5, _>(file),
    }
}

/// Verify `path` against a manifest hash. An empty hash always passes.
pub fn verify_file(path: &Path, expected: &str) -> Result<()> {
    if expected.trim().is_empty() {
        return Ok(());
    }

    let (algorithm, expected) = parse_hash(expected);
    let actual = file_digest(path, algorithm)?;

    if actual != expected {
        return Err(LadleError::ChecksumMismatch {
            file: path.to_path_buf(),
            expected,
            actual,
        });
    }

    Ok(())
}
