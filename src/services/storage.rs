use crate::models::{ObjectHead, SignedAction, SignedCapability};
use anyhow::{Result, anyhow};
use async_trait::async_trait;
use aws_sdk_s3::Client;
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart, ServerSideEncryption};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::time::{Duration, SystemTime};

/// Options applied to every object written by an upload.
#[derive(Debug, Clone, Default)]
pub struct PutOptions {
    pub content_type: Option<String>,
    pub metadata: HashMap<String, String>,
    pub server_side_encryption: Option<String>,
}

/// The object store capability provider. One instance is bound to one bucket.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    fn bucket(&self) -> &str;

    async fn put_object(&self, key: &str, data: Vec<u8>, options: &PutOptions) -> Result<()>;

    /// Returns the upload id.
    async fn create_multipart_upload(&self, key: &str, options: &PutOptions) -> Result<String>;

    /// Returns the part's ETag.
    async fn upload_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: i32,
        data: Vec<u8>,
    ) -> Result<String>;

    async fn complete_multipart_upload(
        &self,
        key: &str,
        upload_id: &str,
        parts: Vec<(i32, String)>,
    ) -> Result<()>;

    async fn abort_multipart_upload(&self, key: &str, upload_id: &str) -> Result<()>;

    /// Metadata-only probe. `Ok(None)` when no object exists at `key`.
    async fn head_object(&self, key: &str) -> Result<Option<ObjectHead>>;

    async fn presign(
        &self,
        action: SignedAction,
        key: &str,
        expires_in: Duration,
    ) -> Result<SignedCapability>;

    /// Performs the remote action a delete capability grants.
    async fn invoke_delete(&self, capability: &SignedCapability) -> Result<()>;
}

pub struct S3ObjectStore {
    client: Client,
    bucket: String,
    http: reqwest::Client,
}

impl S3ObjectStore {
    pub fn new(client: Client, bucket: String) -> Self {
        Self {
            client,
            bucket,
            http: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn put_object(&self, key: &str, data: Vec<u8>, options: &PutOptions) -> Result<()> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(data))
            .set_content_type(options.content_type.clone())
            .set_metadata(Some(options.metadata.clone()))
            .set_server_side_encryption(
                options
                    .server_side_encryption
                    .as_deref()
                    .map(ServerSideEncryption::from),
            )
            .send()
            .await?;
        Ok(())
    }

    async fn create_multipart_upload(&self, key: &str, options: &PutOptions) -> Result<String> {
        let res = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .set_content_type(options.content_type.clone())
            .set_metadata(Some(options.metadata.clone()))
            .set_server_side_encryption(
                options
                    .server_side_encryption
                    .as_deref()
                    .map(ServerSideEncryption::from),
            )
            .send()
            .await?;

        res.upload_id()
            .map(str::to_string)
            .ok_or_else(|| anyhow!("No upload ID"))
    }

    async fn upload_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: i32,
        data: Vec<u8>,
    ) -> Result<String> {
        let res = self
            .client
            .upload_part()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .body(ByteStream::from(data))
            .part_number(part_number)
            .send()
            .await?;
        Ok(res.e_tag().unwrap_or_default().to_string())
    }

    async fn complete_multipart_upload(
        &self,
        key: &str,
        upload_id: &str,
        parts: Vec<(i32, String)>,
    ) -> Result<()> {
        let completed_parts = parts
            .into_iter()
            .map(|(part_number, etag)| {
                CompletedPart::builder()
                    .e_tag(etag)
                    .part_number(part_number)
                    .build()
            })
            .collect();

        let completed_multipart_upload = CompletedMultipartUpload::builder()
            .set_parts(Some(completed_parts))
            .build();

        self.client
            .complete_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .multipart_upload(completed_multipart_upload)
            .send()
            .await?;
        Ok(())
    }

    async fn abort_multipart_upload(&self, key: &str, upload_id: &str) -> Result<()> {
        self.client
            .abort_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .send()
            .await?;
        Ok(())
    }

    async fn head_object(&self, key: &str) -> Result<Option<ObjectHead>> {
        let res = self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await;

        match res {
            Ok(head) => Ok(Some(ObjectHead {
                size: head.content_length().unwrap_or(0).max(0) as u64,
                metadata: head.metadata().cloned().unwrap_or_default(),
            })),
            Err(e) => {
                let service_error = e.into_service_error();
                if service_error.is_not_found() {
                    Ok(None)
                } else {
                    Err(anyhow!(service_error))
                }
            }
        }
    }

    async fn presign(
        &self,
        action: SignedAction,
        key: &str,
        expires_in: Duration,
    ) -> Result<SignedCapability> {
        let issued_at = SystemTime::now();
        let config = PresigningConfig::builder()
            .start_time(issued_at)
            .expires_in(expires_in)
            .build()?;

        let request = match action {
            SignedAction::Get => {
                self.client
                    .get_object()
                    .bucket(&self.bucket)
                    .key(key)
                    .presigned(config)
                    .await?
            }
            SignedAction::Head => {
                self.client
                    .head_object()
                    .bucket(&self.bucket)
                    .key(key)
                    .presigned(config)
                    .await?
            }
            SignedAction::Delete => {
                self.client
                    .delete_object()
                    .bucket(&self.bucket)
                    .key(key)
                    .presigned(config)
                    .await?
            }
        };

        let issued_at = DateTime::<Utc>::from(issued_at);
        Ok(SignedCapability {
            action,
            key: key.to_string(),
            url: request.uri().to_string(),
            issued_at,
            expires_at: issued_at + chrono::Duration::from_std(expires_in)?,
        })
    }

    async fn invoke_delete(&self, capability: &SignedCapability) -> Result<()> {
        if capability.action != SignedAction::Delete {
            return Err(anyhow!(
                "capability for {} grants {}, not DELETE",
                capability.key,
                capability.action.as_str()
            ));
        }
        self.http
            .delete(&capability.url)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}
