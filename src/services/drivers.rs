use crate::error::DriverError;
use crate::models::{
    Ami, AmiDriverConfig, MachineImage, MachineImageDriverConfig, Snapshot, SnapshotDriverConfig,
    Volume, VolumeDriverConfig,
};
use async_trait::async_trait;
use std::time::Duration;
use tokio::time::Instant;
use uuid::Uuid;

/// Per-run context passed explicitly into every driver call.
#[derive(Debug, Clone)]
pub struct PublishContext {
    pub run_id: Uuid,
    pub started_at: Instant,
    pub deadline: Option<Instant>,
}

impl PublishContext {
    pub fn new(budget: Option<Duration>) -> Self {
        let started_at = Instant::now();
        Self {
            run_id: Uuid::new_v4(),
            started_at,
            deadline: budget.map(|b| started_at + b),
        }
    }

    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    /// Fails once the run deadline has passed. Checked between stages so an
    /// in-flight create always returns its resource for cleanup.
    pub fn check_deadline(&self) -> Result<(), DriverError> {
        match self.remaining() {
            Some(remaining) if remaining.is_zero() => {
                Err(DriverError::DeadlineExceeded(self.started_at.elapsed()))
            }
            _ => Ok(()),
        }
    }
}

/// A driver that creates and deletes one kind of cloud resource.
#[async_trait]
pub trait ResourceDriver<C, R>: Send + Sync
where
    C: Send + 'static,
    R: Send + Sync + 'static,
{
    async fn create(&self, ctx: &PublishContext, config: C) -> Result<R, DriverError>;

    async fn delete(&self, ctx: &PublishContext, resource: &R) -> Result<(), DriverError>;
}

pub type MachineImageDriver = dyn ResourceDriver<MachineImageDriverConfig, MachineImage>;
pub type VolumeDriver = dyn ResourceDriver<VolumeDriverConfig, Volume>;
pub type SnapshotDriver = dyn ResourceDriver<SnapshotDriverConfig, Snapshot>;
pub type AmiDriver = dyn ResourceDriver<AmiDriverConfig, Ami>;

/// The drivers needed to publish into one isolated region.
pub trait DriverSet: Send + Sync {
    fn machine_image_driver(&self) -> &MachineImageDriver;
    fn volume_driver(&self) -> &VolumeDriver;
    fn snapshot_driver(&self) -> &SnapshotDriver;
    fn ami_driver(&self) -> &AmiDriver;
}
