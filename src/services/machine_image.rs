use crate::error::{DriverError, PublishError};
use crate::models::{MachineImage, MachineImageDriverConfig, SignedAction, StoredObject};
use crate::services::drivers::{PublishContext, ResourceDriver};
use crate::services::manifest::{ManifestGenerator, manifest_key_for};
use crate::services::storage::ObjectStore;
use crate::services::uploader::ChunkedUploader;
use crate::utils::hash::resolve_local_file;
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

/// Uploads a machine image and publishes its signed import manifest.
pub struct MachineImagePublisher {
    store: Arc<dyn ObjectStore>,
    uploader: ChunkedUploader,
    manifests: ManifestGenerator,
}

impl MachineImagePublisher {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self {
            uploader: ChunkedUploader::new(store.clone()),
            manifests: ManifestGenerator::new(store.clone()),
            store,
        }
    }

    pub fn with_upload_limits(mut self, chunk_size: u64, concurrency: usize) -> Self {
        self.uploader = self.uploader.with_limits(chunk_size, concurrency);
        self
    }

    pub async fn create(&self, config: &MachineImageDriverConfig) -> Result<MachineImage, PublishError> {
        let started = Instant::now();
        let result = self.create_inner(config).await;
        tracing::info!(
            "completed create() in {:.2} minutes",
            started.elapsed().as_secs_f64() / 60.0
        );
        result
    }

    async fn create_inner(&self, config: &MachineImageDriverConfig) -> Result<MachineImage, PublishError> {
        let local = resolve_local_file(&config.machine_image_path).await?;
        let image_base_name = base_name(&config.machine_image_path);
        let key = object_key(&config.bucket_folder, &image_base_name);
        let bucket = self.store.bucket().to_string();

        tracing::info!("uploading image to s3://{}/{}", bucket, key);
        if self.uploader.exists_with_matching_hash(&key, &local).await {
            tracing::info!(
                "s3://{}/{} already matches {}, skipping upload",
                bucket,
                key,
                local.hash
            );
        } else {
            self.uploader
                .upload(&key, &local, config.server_side_encryption.as_deref())
                .await
                .inspect_err(|e| tracing::error!("[{}]: FAILED upload: {}", local.path.display(), e))?;
        }

        // Size comes from the store, not the local file.
        let image = self.read_back(&key).await?;

        let mut manifest = self
            .manifests
            .generate(&key, image.size, config.volume_size_gb, &config.file_format)
            .await?;

        let manifest_key = manifest_key_for(&key);
        let self_destruct = self
            .manifests
            .sign(SignedAction::Delete, &manifest_key)
            .await?;
        manifest.self_destruct = Some(self_destruct.clone());

        let document = manifest.to_xml()?;
        let started = Instant::now();
        self.uploader
            .upload_bytes(
                &manifest_key,
                document.into_bytes(),
                "application/xml",
                config.server_side_encryption.as_deref(),
            )
            .await?;
        tracing::info!(
            "finished uploading machine image manifest to s3 after {:.2} seconds",
            started.elapsed().as_secs_f64()
        );

        let get_url = self
            .manifests
            .sign(SignedAction::Get, &manifest_key)
            .await?;

        Ok(MachineImage {
            get_url,
            delete_urls: vec![self_destruct, manifest.delete],
        })
    }

    async fn read_back(&self, key: &str) -> Result<StoredObject, PublishError> {
        let probe_error = |source| PublishError::Probe {
            bucket: self.store.bucket().to_string(),
            key: key.to_string(),
            source,
        };
        let head = self
            .store
            .head_object(key)
            .await
            .map_err(probe_error)?
            .ok_or_else(|| probe_error(anyhow::anyhow!("object not found after upload")))?;

        Ok(StoredObject {
            bucket: self.store.bucket().to_string(),
            key: key.to_string(),
            size: head.size,
            hash: head
                .metadata
                .get(crate::services::uploader::HASH_METADATA_KEY)
                .cloned(),
        })
    }

    /// Invokes every recorded delete capability. A failure on one side does
    /// not re-attempt the side that succeeded.
    pub async fn delete(&self, machine_image: &MachineImage) -> Result<(), PublishError> {
        let mut failed = Vec::new();
        for capability in &machine_image.delete_urls {
            match self.store.invoke_delete(capability).await {
                Ok(()) => tracing::info!("deleted {}", capability.key),
                Err(e) => {
                    tracing::warn!("failed to delete {}: {}", capability.key, e);
                    failed.push(format!("{}: {}", capability.key, e));
                }
            }
        }

        if failed.is_empty() {
            Ok(())
        } else {
            Err(PublishError::PartialDelete {
                failed,
                total: machine_image.delete_urls.len(),
            })
        }
    }
}

#[async_trait]
impl ResourceDriver<MachineImageDriverConfig, MachineImage> for MachineImagePublisher {
    async fn create(
        &self,
        ctx: &PublishContext,
        config: MachineImageDriverConfig,
    ) -> Result<MachineImage, DriverError> {
        tracing::debug!("[{}] creating machine image", ctx.run_id);
        Ok(MachineImagePublisher::create(self, &config).await?)
    }

    async fn delete(&self, ctx: &PublishContext, resource: &MachineImage) -> Result<(), DriverError> {
        tracing::debug!("[{}] deleting machine image {}", ctx.run_id, resource.get_url.key);
        Ok(MachineImagePublisher::delete(self, resource).await?)
    }
}

fn base_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn object_key(folder: &str, name: &str) -> String {
    let folder = folder.trim_matches('/');
    if folder.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", folder, name)
    }
}
