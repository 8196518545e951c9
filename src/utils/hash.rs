use crate::error::FileError;
use crate::models::LocalFile;
use sha2::{Digest, Sha256};
use std::path::Path;
use tokio::io::AsyncReadExt;

const READ_BUFFER_SIZE: usize = 64 * 1024;

pub fn calculate_hash(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Streams the file through SHA-256 without holding it in memory.
pub async fn fingerprint(path: &Path) -> Result<String, FileError> {
    let file = tokio::fs::File::open(path)
        .await
        .map_err(|source| FileError::Open {
            path: path.to_path_buf(),
            source,
        })?;
    calculate_hash_from_reader(file)
        .await
        .map_err(|source| FileError::Read {
            path: path.to_path_buf(),
            source,
        })
}

pub async fn calculate_hash_from_reader<R: tokio::io::AsyncRead + Unpin>(
    mut reader: R,
) -> std::io::Result<String> {
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; READ_BUFFER_SIZE];
    loop {
        let n = reader.read(&mut buffer).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Resolves size and content hash for a local file.
pub async fn resolve_local_file(path: &Path) -> Result<LocalFile, FileError> {
    let metadata = tokio::fs::metadata(path)
        .await
        .map_err(|source| FileError::Open {
            path: path.to_path_buf(),
            source,
        })?;
    let hash = fingerprint(path).await?;
    Ok(LocalFile {
        path: path.to_path_buf(),
        size: metadata.len(),
        hash,
    })
}
