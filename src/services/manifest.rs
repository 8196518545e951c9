//! Import volume manifests.
//!
//! A manifest tells the remote import service how to fetch, probe and delete
//! one stored image object. It is itself uploaded next to the image and
//! carries a separate delete capability for its own object.

use crate::error::{PublishError, SigningError};
use crate::models::{SignedAction, SignedCapability};
use crate::services::storage::ObjectStore;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Validity window of every generated capability.
pub const CAPABILITY_TTL: Duration = Duration::from_secs(2 * 60 * 60);

pub const MANIFEST_VERSION: &str = "2010-11-15";
pub const MANIFEST_KEY_SUFFIX: &str = "-manifest";

const GB_IN_BYTES: u64 = 1 << 30;
const IMPORTER_NAME: &str = "ec2-upload-disk-image";
const IMPORTER_VERSION: &str = "1.0.0";

/// Smallest whole number of gigabytes that holds `size_bytes`.
pub fn volume_size_gb_for(size_bytes: u64) -> u64 {
    size_bytes.div_ceil(GB_IN_BYTES)
}

pub fn manifest_key_for(image_key: &str) -> String {
    format!("{}{}", image_key, MANIFEST_KEY_SUFFIX)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportManifest {
    pub key: String,
    pub size_bytes: u64,
    pub volume_size_gb: u64,
    pub file_format: String,
    pub get: SignedCapability,
    pub head: SignedCapability,
    pub delete: SignedCapability,
    /// Delete capability for the manifest object itself.
    pub self_destruct: Option<SignedCapability>,
}

impl ImportManifest {
    pub fn to_xml(&self) -> Result<String, PublishError> {
        let document = ManifestDocument {
            version: MANIFEST_VERSION.to_string(),
            file_format: self.file_format.clone(),
            importer: Importer {
                name: IMPORTER_NAME.to_string(),
                version: IMPORTER_VERSION.to_string(),
                release: MANIFEST_VERSION.to_string(),
            },
            self_destruct_url: self
                .self_destruct
                .as_ref()
                .map(|c| c.url.clone())
                .unwrap_or_default(),
            import: ImportSpec {
                size: self.size_bytes,
                volume_size: self.volume_size_gb,
                parts: Parts {
                    count: 1,
                    part: Part {
                        index: 0,
                        byte_range: ByteRange {
                            start: 0,
                            end: self.size_bytes.saturating_sub(1),
                        },
                        key: self.key.clone(),
                        head_url: self.head.url.clone(),
                        get_url: self.get.url.clone(),
                        delete_url: self.delete.url.clone(),
                    },
                },
            },
        };
        quick_xml::se::to_string(&document).map_err(|e| PublishError::Serialize(e.to_string()))
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename = "manifest")]
pub struct ManifestDocument {
    pub version: String,
    #[serde(rename = "file-format")]
    pub file_format: String,
    pub importer: Importer,
    #[serde(rename = "self-destruct-url")]
    pub self_destruct_url: String,
    pub import: ImportSpec,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct Importer {
    pub name: String,
    pub version: String,
    pub release: String,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct ImportSpec {
    pub size: u64,
    #[serde(rename = "volume-size")]
    pub volume_size: u64,
    pub parts: Parts,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct Parts {
    #[serde(rename = "@count")]
    pub count: u32,
    pub part: Part,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct Part {
    #[serde(rename = "@index")]
    pub index: u32,
    #[serde(rename = "byte-range")]
    pub byte_range: ByteRange,
    pub key: String,
    #[serde(rename = "head-url")]
    pub head_url: String,
    #[serde(rename = "get-url")]
    pub get_url: String,
    #[serde(rename = "delete-url")]
    pub delete_url: String,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct ByteRange {
    #[serde(rename = "@start")]
    pub start: u64,
    #[serde(rename = "@end")]
    pub end: u64,
}

pub struct ManifestGenerator {
    store: Arc<dyn ObjectStore>,
    ttl: Duration,
}

impl ManifestGenerator {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self {
            store,
            ttl: CAPABILITY_TTL,
        }
    }

    /// Signs a single action against `key`.
    pub async fn sign(&self, action: SignedAction, key: &str) -> Result<SignedCapability, SigningError> {
        let capability = self
            .store
            .presign(action, key, self.ttl)
            .await
            .map_err(|source| SigningError {
                action: action.as_str(),
                key: key.to_string(),
                source,
            })?;
        tracing::debug!(
            "generated presigned {} URL {}",
            action.as_str(),
            capability.url
        );
        Ok(capability)
    }

    /// Generates the fetch, probe and delete capabilities for a stored object.
    /// Must only be called once the object is confirmed present.
    pub async fn generate(
        &self,
        key: &str,
        size_bytes: u64,
        volume_size_gb: Option<u64>,
        file_format: &str,
    ) -> Result<ImportManifest, SigningError> {
        let get = self.sign(SignedAction::Get, key).await?;
        let head = self.sign(SignedAction::Head, key).await?;
        let delete = self.sign(SignedAction::Delete, key).await?;

        let volume_size_gb = volume_size_gb
            .filter(|gb| *gb > 0)
            .unwrap_or_else(|| volume_size_gb_for(size_bytes));

        Ok(ImportManifest {
            key: key.to_string(),
            size_bytes,
            volume_size_gb,
            file_format: file_format.to_string(),
            get,
            head,
            delete,
            self_destruct: None,
        })
    }
}
