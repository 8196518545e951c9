use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// A local file resolved for upload. Computed once per upload attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalFile {
    pub path: PathBuf,
    pub size: u64,
    pub hash: String,
}

/// An object confirmed present in the object store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredObject {
    pub bucket: String,
    pub key: String,
    pub size: u64,
    pub hash: Option<String>,
}

/// Metadata returned by a remote existence probe.
#[derive(Debug, Clone, Default)]
pub struct ObjectHead {
    pub size: u64,
    pub metadata: HashMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignedAction {
    Get,
    Head,
    Delete,
}

impl SignedAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignedAction::Get => "GET",
            SignedAction::Head => "HEAD",
            SignedAction::Delete => "DELETE",
        }
    }
}

/// A time-boxed right to perform one action against one object.
///
/// Capabilities generated for the same object at different times carry
/// different expiries and are not interchangeable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedCapability {
    pub action: SignedAction,
    pub key: String,
    pub url: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl SignedCapability {
    pub fn is_valid_at(&self, at: DateTime<Utc>) -> bool {
        at >= self.issued_at && at < self.expires_at
    }

    pub fn remaining(&self, at: DateTime<Utc>) -> chrono::Duration {
        (self.expires_at - at).max(chrono::Duration::zero())
    }
}

/// An uploaded disk image plus its signed import manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MachineImage {
    pub get_url: SignedCapability,
    pub delete_urls: Vec<SignedCapability>,
}

#[derive(Debug, Clone, Default)]
pub struct MachineImageDriverConfig {
    pub machine_image_path: PathBuf,
    pub bucket_folder: String,
    pub server_side_encryption: Option<String>,
    pub file_format: String,
    /// Zero or absent means "derive from the stored object size".
    pub volume_size_gb: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Volume {
    pub id: String,
}

#[derive(Debug, Clone)]
pub struct VolumeDriverConfig {
    pub machine_image_manifest_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub id: String,
}

#[derive(Debug, Clone)]
pub struct SnapshotDriverConfig {
    pub volume_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VirtualizationType {
    Hvm,
    Paravirtual,
}

impl fmt::Display for VirtualizationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VirtualizationType::Hvm => write!(f, "hvm"),
            VirtualizationType::Paravirtual => write!(f, "paravirtual"),
        }
    }
}

impl FromStr for VirtualizationType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "hvm" => Ok(VirtualizationType::Hvm),
            "paravirtual" | "pv" => Ok(VirtualizationType::Paravirtual),
            other => Err(format!("unknown virtualization type: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Accessibility {
    Public,
    Private,
}

impl FromStr for Accessibility {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "public" => Ok(Accessibility::Public),
            "private" => Ok(Accessibility::Private),
            other => Err(format!("unknown visibility: {}", other)),
        }
    }
}

/// Properties applied to the registered image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AmiProperties {
    pub name: String,
    pub description: String,
    pub accessibility: Accessibility,
    pub virtualization_type: VirtualizationType,
    pub tags: BTreeMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct AmiDriverConfig {
    pub snapshot_id: String,
    pub ami_properties: AmiProperties,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ami {
    pub id: String,
    pub region: String,
    pub virtualization_type: VirtualizationType,
    pub accessibility: Accessibility,
}

/// Registered images produced by a publish run, keyed by virtualization type.
/// Append-only.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AmiCollection {
    amis: BTreeMap<VirtualizationType, Vec<Ami>>,
}

impl AmiCollection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, ami: Ami) {
        self.amis.entry(ami.virtualization_type).or_default().push(ami);
    }

    pub fn get(&self, virtualization_type: VirtualizationType) -> &[Ami] {
        self.amis
            .get(&virtualization_type)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.amis.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
