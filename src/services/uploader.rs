use crate::error::{FileError, TransferError};
use crate::models::{LocalFile, StoredObject};
use crate::services::storage::{ObjectStore, PutOptions};
use crate::utils::hash::calculate_hash;
use futures::{StreamExt, TryStreamExt};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

pub const DEFAULT_CHUNK_SIZE: u64 = 10 * 1024 * 1024;
pub const DEFAULT_CONCURRENCY: usize = 10;

/// Most parts a single multipart upload may have.
pub const MAX_PARTS: u64 = 10_000;

/// Metadata key holding the content hash. Out-of-band, not a transport checksum.
pub const HASH_METADATA_KEY: &str = "sha256";

#[derive(Debug)]
pub struct UploadResult {
    pub object: StoredObject,
    pub parts: usize,
}

pub struct ChunkedUploader {
    store: Arc<dyn ObjectStore>,
    chunk_size: u64,
    concurrency: usize,
}

impl ChunkedUploader {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self {
            store,
            chunk_size: DEFAULT_CHUNK_SIZE,
            concurrency: DEFAULT_CONCURRENCY,
        }
    }

    pub fn with_limits(mut self, chunk_size: u64, concurrency: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self.concurrency = concurrency.max(1);
        self
    }

    /// Returns true only if an object exists at `key` tagged with the local hash.
    /// Probe errors count as "absent" so they trigger an upload.
    pub async fn exists_with_matching_hash(&self, key: &str, local: &LocalFile) -> bool {
        match self.store.head_object(key).await {
            Ok(Some(head)) => match head.metadata.get(HASH_METADATA_KEY) {
                Some(remote_hash) if *remote_hash == local.hash => true,
                Some(remote_hash) => {
                    tracing::info!(
                        "Stored hash {} for {} differs from local {}",
                        remote_hash,
                        key,
                        local.hash
                    );
                    false
                }
                None => {
                    tracing::debug!("Object {} has no hash tag", key);
                    false
                }
            },
            Ok(None) => false,
            Err(e) => {
                tracing::warn!("Probe for {} failed, uploading anyway: {}", key, e);
                false
            }
        }
    }

    pub async fn upload(
        &self,
        key: &str,
        local: &LocalFile,
        server_side_encryption: Option<&str>,
    ) -> Result<UploadResult, TransferError> {
        let started = Instant::now();
        let options = PutOptions {
            content_type: Some("application/octet-stream".to_string()),
            metadata: HashMap::from([(HASH_METADATA_KEY.to_string(), local.hash.clone())]),
            server_side_encryption: server_side_encryption.map(str::to_string),
        };

        let parts = if local.size <= self.chunk_size {
            let data = tokio::fs::read(&local.path)
                .await
                .map_err(|source| FileError::Read {
                    path: local.path.clone(),
                    source,
                })?;
            self.store
                .put_object(key, data, &options)
                .await
                .map_err(|source| TransferError::Remote {
                    key: key.to_string(),
                    source,
                })?;
            1
        } else {
            self.upload_multipart(key, local, &options).await?
        };

        tracing::info!(
            "Uploaded {} to s3://{}/{} in {} part(s) after {:.2} seconds",
            local.path.display(),
            self.store.bucket(),
            key,
            parts,
            started.elapsed().as_secs_f64()
        );

        Ok(UploadResult {
            object: StoredObject {
                bucket: self.store.bucket().to_string(),
                key: key.to_string(),
                size: local.size,
                hash: Some(local.hash.clone()),
            },
            parts,
        })
    }

    /// Writes an in-memory document, tagging it with its own hash.
    pub async fn upload_bytes(
        &self,
        key: &str,
        data: Vec<u8>,
        content_type: &str,
        server_side_encryption: Option<&str>,
    ) -> Result<StoredObject, TransferError> {
        let hash = calculate_hash(&data);
        let size = data.len() as u64;
        let options = PutOptions {
            content_type: Some(content_type.to_string()),
            metadata: HashMap::from([(HASH_METADATA_KEY.to_string(), hash.clone())]),
            server_side_encryption: server_side_encryption.map(str::to_string),
        };
        self.store
            .put_object(key, data, &options)
            .await
            .map_err(|source| TransferError::Remote {
                key: key.to_string(),
                source,
            })?;
        Ok(StoredObject {
            bucket: self.store.bucket().to_string(),
            key: key.to_string(),
            size,
            hash: Some(hash),
        })
    }

    async fn upload_multipart(
        &self,
        key: &str,
        local: &LocalFile,
        options: &PutOptions,
    ) -> Result<usize, TransferError> {
        let upload_id = self
            .store
            .create_multipart_upload(key, options)
            .await
            .map_err(|source| TransferError::Remote {
                key: key.to_string(),
                source,
            })?;

        let ranges = chunk_ranges(local.size, self.chunk_size);
        let total = ranges.len();
        tracing::debug!("Multipart upload {} for {}: {} parts", upload_id, key, total);

        let result = futures::stream::iter(ranges)
            .map(|(part_number, offset, len)| {
                let upload_id = upload_id.as_str();
                async move {
                    let data = read_chunk(&local.path, offset, len).await?;
                    let etag = self
                        .store
                        .upload_part(key, upload_id, part_number, data)
                        .await
                        .map_err(|source| TransferError::Part {
                            key: key.to_string(),
                            part_number,
                            source,
                        })?;
                    Ok::<_, TransferError>((part_number, etag))
                }
            })
            .buffer_unordered(self.concurrency)
            .try_collect::<Vec<_>>()
            .await;

        let mut parts = match result {
            Ok(parts) => parts,
            Err(e) => {
                self.abort(key, &upload_id).await;
                return Err(e);
            }
        };
        parts.sort_by_key(|(part_number, _)| *part_number);

        if let Err(source) = self
            .store
            .complete_multipart_upload(key, &upload_id, parts)
            .await
        {
            self.abort(key, &upload_id).await;
            return Err(TransferError::Remote {
                key: key.to_string(),
                source,
            });
        }

        Ok(total)
    }

    async fn abort(&self, key: &str, upload_id: &str) {
        if let Err(e) = self.store.abort_multipart_upload(key, upload_id).await {
            tracing::warn!("Failed to abort multipart upload {} for {}: {}", upload_id, key, e);
        }
    }
}

/// Splits `size` bytes into (part_number, offset, len) triples. Part numbers start at 1.
/// The chunk grows when `size` would otherwise need more than `MAX_PARTS` parts.
fn chunk_ranges(size: u64, chunk_size: u64) -> Vec<(i32, u64, u64)> {
    let chunk_size = chunk_size.max(size.div_ceil(MAX_PARTS)).max(1);
    let mut ranges = Vec::new();
    let mut offset = 0;
    let mut part_number = 1;
    while offset < size {
        let len = chunk_size.min(size - offset);
        ranges.push((part_number, offset, len));
        offset += len;
        part_number += 1;
    }
    ranges
}

async fn read_chunk(path: &Path, offset: u64, len: u64) -> Result<Vec<u8>, FileError> {
    let read_err = |source| FileError::Read {
        path: path.to_path_buf(),
        source,
    };
    let mut file = tokio::fs::File::open(path)
        .await
        .map_err(|source| FileError::Open {
            path: path.to_path_buf(),
            source,
        })?;
    file.seek(std::io::SeekFrom::Start(offset))
        .await
        .map_err(read_err)?;
    let mut buffer = vec![0u8; len as usize];
    file.read_exact(&mut buffer).await.map_err(read_err)?;
    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_ranges_cover_file() {
        let ranges = chunk_ranges(25, 10);
        assert_eq!(ranges, vec![(1, 0, 10), (2, 10, 10), (3, 20, 5)]);
    }

    #[test]
    fn test_chunk_ranges_exact_multiple() {
        let ranges = chunk_ranges(20, 10);
        assert_eq!(ranges.len(), 2);
        assert_eq!(ranges[1], (2, 10, 10));
    }

    #[test]
    fn test_chunk_ranges_stay_within_part_limit() {
        let size = 100 * 1024 * 1024 * 1024;
        let ranges = chunk_ranges(size, DEFAULT_CHUNK_SIZE);
        assert_eq!(ranges.len() as u64, MAX_PARTS);
        assert_eq!(ranges.iter().map(|(_, _, len)| len).sum::<u64>(), size);
        let (last_part, last_offset, last_len) = ranges[ranges.len() - 1];
        assert_eq!(last_part, 10_000);
        assert_eq!(last_offset + last_len, size);
    }

    #[test]
    fn test_chunk_ranges_below_part_limit_keep_chunk_size() {
        let size = MAX_PARTS * 10;
        let ranges = chunk_ranges(size, 10);
        assert_eq!(ranges.len() as u64, MAX_PARTS);
        assert!(ranges.iter().all(|(_, _, len)| *len == 10));
    }

    #[test]
    fn test_chunk_ranges_empty_file() {
        assert!(chunk_ranges(0, 10).is_empty());
    }
}
