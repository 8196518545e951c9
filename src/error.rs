use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FileError {
    #[error("opening {path}: {source}")]
    Open {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("reading {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
}

#[derive(Error, Debug)]
pub enum TransferError {
    #[error("local file error: {0}")]
    File(#[from] FileError),

    #[error("uploading part {part_number} of {key}: {source}")]
    Part {
        key: String,
        part_number: i32,
        source: anyhow::Error,
    },

    #[error("uploading {key}: {source}")]
    Remote {
        key: String,
        source: anyhow::Error,
    },
}

#[derive(Error, Debug)]
#[error("signing {action} request for {key}: {source}")]
pub struct SigningError {
    pub action: &'static str,
    pub key: String,
    pub source: anyhow::Error,
}

#[derive(Error, Debug)]
pub enum PublishError {
    #[error(transparent)]
    File(#[from] FileError),

    #[error(transparent)]
    Transfer(#[from] TransferError),

    #[error("failed to generate machine image manifest: {0}")]
    Signing(#[from] SigningError),

    #[error("fetching properties for uploaded machine image {key} in bucket {bucket}: {source}")]
    Probe {
        bucket: String,
        key: String,
        source: anyhow::Error,
    },

    #[error("serializing machine image manifest: {0}")]
    Serialize(String),

    #[error("deleting machine image: {} of {total} deletes failed: {}", .failed.len(), .failed.join("; "))]
    PartialDelete { failed: Vec<String>, total: usize },
}

/// What every resource driver returns on failure.
#[derive(Error, Debug)]
pub enum DriverError {
    #[error(transparent)]
    Publish(#[from] PublishError),

    #[error("deadline exceeded after {0:?}")]
    DeadlineExceeded(Duration),

    #[error(transparent)]
    Provider(#[from] anyhow::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStage {
    MachineImage,
    Volume,
    Snapshot,
    Ami,
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PipelineStage::MachineImage => "creating machine image",
            PipelineStage::Volume => "creating volume",
            PipelineStage::Snapshot => "creating snapshot",
            PipelineStage::Ami => "creating ami",
        };
        f.write_str(name)
    }
}

/// A cleanup that failed while unwinding. Reported, never escalated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanupWarning {
    pub resource: String,
    pub message: String,
}

impl fmt::Display for CleanupWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "failed to delete {}: {}", self.resource, self.message)
    }
}

#[derive(Error, Debug)]
#[error("{stage}: {source}")]
pub struct PipelineError {
    pub stage: PipelineStage,
    pub source: DriverError,
    pub cleanup_warnings: Vec<CleanupWarning>,
}
