use crate::models::{Accessibility, AmiProperties, VirtualizationType};
use crate::services::manifest::CAPABILITY_TTL;
use crate::services::uploader::{DEFAULT_CHUNK_SIZE, DEFAULT_CONCURRENCY};
use std::collections::BTreeMap;
use std::env;
use std::time::Duration;

pub const DEFAULT_BUCKET_FOLDER: &str = "bosh-stemcell";

/// Target region and image configuration for a publish run
#[derive(Debug, Clone)]
pub struct PublisherConfig {
    /// Region name (default: "us-east-1")
    pub region: String,

    /// Bucket holding images and manifests
    pub bucket_name: String,

    /// Folder inside the bucket (default: "bosh-stemcell")
    pub bucket_folder: String,

    /// Keep the uploaded image and manifest after the run (default: false)
    pub keep_image: bool,

    /// Server-side encryption mode, e.g. "AES256" or "aws:kms"
    pub server_side_encryption: Option<String>,

    /// Custom S3 endpoint; enables path-style addressing
    pub s3_endpoint: Option<String>,

    pub ami_properties: AmiProperties,

    /// Upload chunk size in bytes (default: 10 MB)
    pub upload_chunk_size: u64,

    /// Concurrent chunk uploads (default: 10)
    pub upload_concurrency: usize,

    /// Bound on the whole run. Defaults to the signed URL validity window,
    /// since the import consumes those URLs.
    pub pipeline_deadline: Option<Duration>,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            region: "us-east-1".to_string(),
            bucket_name: String::new(),
            bucket_folder: DEFAULT_BUCKET_FOLDER.to_string(),
            keep_image: false,
            server_side_encryption: None,
            s3_endpoint: None,
            ami_properties: AmiProperties {
                name: String::new(),
                description: String::new(),
                accessibility: Accessibility::Private,
                virtualization_type: VirtualizationType::Hvm,
                tags: BTreeMap::new(),
            },
            upload_chunk_size: DEFAULT_CHUNK_SIZE,
            upload_concurrency: DEFAULT_CONCURRENCY,
            pipeline_deadline: Some(CAPABILITY_TTL),
        }
    }
}

impl PublisherConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let default = Self::default();

        Self {
            region: env::var("REGION").unwrap_or(default.region),

            bucket_name: env::var("BUCKET_NAME").unwrap_or(default.bucket_name),

            bucket_folder: env::var("BUCKET_FOLDER").unwrap_or(default.bucket_folder),

            keep_image: env::var("KEEP_IMAGE")
                .map(|v| parse_flag(&v))
                .unwrap_or(default.keep_image),

            server_side_encryption: env::var("SERVER_SIDE_ENCRYPTION")
                .ok()
                .filter(|v| !v.is_empty())
                .or(default.server_side_encryption),

            s3_endpoint: env::var("S3_ENDPOINT")
                .ok()
                .filter(|v| !v.is_empty())
                .or(default.s3_endpoint),

            ami_properties: AmiProperties {
                name: env::var("AMI_NAME").unwrap_or(default.ami_properties.name),
                description: env::var("AMI_DESCRIPTION")
                    .unwrap_or(default.ami_properties.description),
                accessibility: env::var("AMI_VISIBILITY")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(default.ami_properties.accessibility),
                virtualization_type: env::var("AMI_VIRTUALIZATION_TYPE")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(default.ami_properties.virtualization_type),
                tags: env::var("AMI_TAGS")
                    .map(|v| parse_tags(&v))
                    .unwrap_or(default.ami_properties.tags),
            },

            upload_chunk_size: env::var("UPLOAD_CHUNK_SIZE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.upload_chunk_size),

            upload_concurrency: env::var("UPLOAD_CONCURRENCY")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.upload_concurrency),

            pipeline_deadline: match env::var("PIPELINE_DEADLINE_SECS") {
                Ok(v) => match v.parse::<u64>() {
                    Ok(0) => None,
                    Ok(secs) => Some(Duration::from_secs(secs)),
                    Err(_) => default.pipeline_deadline,
                },
                Err(_) => default.pipeline_deadline,
            },
        }
    }
}

fn parse_flag(value: &str) -> bool {
    let value = value.to_lowercase();
    value == "true" || value == "1" || value == "yes"
}

/// Parses `k=v,k=v`. Entries without `=` are ignored.
fn parse_tags(value: &str) -> BTreeMap<String, String> {
    value
        .split(',')
        .filter_map(|pair| pair.split_once('='))
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .filter(|(k, _)| !k.is_empty())
        .collect()
}
