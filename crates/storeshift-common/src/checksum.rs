//! Checksum utilities for backup artifact integrity
//!
//! All digests are lowercase hex SHA-256. Directory digests cover the
//! relative path and content of every regular file, visited in sorted order,
//! so the same tree always produces the same digest.

use crate::error::{CommonError, Result};
use sha2::{Digest, Sha256};
use std::io::Read;
use std::path::Path;
use walkdir::WalkDir;

const READ_BUFFER_SIZE: usize = 8192;

/// Compute the digest of a byte blob
pub fn digest(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Compute the digest of any readable source
pub fn digest_reader<R: Read>(reader: &mut R) -> Result<String> {
    let mut hasher = Sha256::new();
    feed(&mut hasher, reader)?;
    Ok(hex::encode(hasher.finalize()))
}

/// Compute the digest of a file
pub fn digest_file(path: impl AsRef<Path>) -> Result<String> {
    let mut file = std::fs::File::open(path)?;
    digest_reader(&mut file)
}

/// Compute the digest of a directory tree
pub fn digest_dir(root: impl AsRef<Path>) -> Result<String> {
    let root = root.as_ref();
    let mut hasher = Sha256::new();

    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }

        let relative = entry
            .path()
            .strip_prefix(root)
            .unwrap_or(entry.path())
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");

        let mut file = std::fs::File::open(entry.path())?;
        let size = file.metadata()?.len();

        // Length prefixes keep path/content boundaries unambiguous
        hasher.update((relative.len() as u64).to_le_bytes());
        hasher.update(relative.as_bytes());
        hasher.update(size.to_le_bytes());
        feed(&mut hasher, &mut file)?;
    }

    Ok(hex::encode(hasher.finalize()))
}

/// Compute the digest of a file or a directory tree
pub fn digest_path(path: impl AsRef<Path>) -> Result<String> {
    let path = path.as_ref();
    if path.is_dir() {
        digest_dir(path)
    } else {
        digest_file(path)
    }
}

/// Verify that a file or directory still matches a recorded digest
pub fn verify_path(path: impl AsRef<Path>, expected: &str) -> Result<()> {
    let path = path.as_ref();
    let actual = digest_path(path)?;
    if actual.eq_ignore_ascii_case(expected) {
        Ok(())
    } else {
        Err(CommonError::ChecksumMismatch {
            path: path.display().to_string(),
            expected: expected.to_string(),
            actual,
        })
    }
}

fn feed<R: Read>(hasher: &mut Sha256, reader: &mut R) -> Result<()> {
    let mut buffer = [0u8; READ_BUFFER_SIZE];
    loop {
        let bytes_read = reader.read(&mut buffer)?;
        if bytes_read == 0 {
            return Ok(());
        }
        hasher.update(&buffer[..bytes_read]);
    }
}
