//! Streaming SHA-256 content hashing.

use crate::utils::errors::{IngestError, Result};
use sha2::{Digest, Sha256};
use std::path::Path;
use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;

/// Read block size; memory use is bounded by this regardless of file size.
pub const HASH_BLOCK_SIZE: usize = 1024 * 1024;

/// Hex SHA-256 digest of the file at `path`.
///
/// The cancel token is checked before every block read; a cancelled hash
/// returns [`IngestError::Cancelled`] and never a partial digest.
pub async fn hash_file(path: &Path, cancel: &CancellationToken) -> Result<String> {
    if cancel.is_cancelled() {
        return Err(IngestError::Cancelled);
    }

    let mut file = tokio::fs::File::open(path).await?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; HASH_BLOCK_SIZE];

    loop {
        let n = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(IngestError::Cancelled),
            read = file.read(&mut buf) => read?,
        };
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[tokio::test]
    async fn test_known_digest() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"hello").unwrap();
        file.flush().unwrap();

        let digest = hash_file(file.path(), &CancellationToken::new()).await.unwrap();
        assert_eq!(
            digest,
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
    }

    #[tokio::test]
    async fn test_multi_block_file() {
        let mut file = NamedTempFile::new().unwrap();
        let data = vec![7u8; HASH_BLOCK_SIZE * 2 + 17];
        file.write_all(&data).unwrap();
        file.flush().unwrap();

        let digest = hash_file(file.path(), &CancellationToken::new()).await.unwrap();
        assert_eq!(digest, format!("{:x}", Sha256::digest(&data)));
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let file = NamedTempFile::new().unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = hash_file(file.path(), &cancel).await;
        assert!(matches!(result, Err(IngestError::Cancelled)));
    }

    #[tokio::test]
    async fn test_missing_file_is_io_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let result = hash_file(&dir.path().join("missing.jpg"), &CancellationToken::new()).await;
        assert!(matches!(result, Err(IngestError::Io(_))));
    }
}
