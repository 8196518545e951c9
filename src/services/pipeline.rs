use crate::config::PublisherConfig;
use crate::error::{CleanupWarning, DriverError, PipelineError, PipelineStage};
use crate::models::{
    AmiCollection, AmiDriverConfig, AmiProperties, MachineImageDriverConfig, SnapshotDriverConfig,
    VolumeDriverConfig,
};
use crate::services::drivers::{DriverSet, PublishContext};
use futures::FutureExt;
use futures::future::BoxFuture;
use std::path::PathBuf;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Start,
    ImageCreated,
    VolumeCreated,
    SnapshotCreated,
    ImageRegistered,
    Done,
    Failed(PipelineStage),
}

impl PipelineState {
    pub fn can_transition_to(self, next: PipelineState) -> bool {
        use PipelineState::*;
        match (self, next) {
            (Start, ImageCreated)
            | (ImageCreated, VolumeCreated)
            | (VolumeCreated, SnapshotCreated)
            | (SnapshotCreated, ImageRegistered)
            | (ImageRegistered, Done) => true,
            (Done, _) | (Failed(_), _) => false,
            (_, Failed(_)) => true,
            _ => false,
        }
    }
}

/// Whether a created resource is removed once the run succeeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Intermediate,
    Deliverable,
}

type Undo<'a> = Box<dyn FnOnce() -> BoxFuture<'a, Result<(), DriverError>> + Send + 'a>;

struct Compensation<'a> {
    resource: String,
    disposition: Disposition,
    undo: Undo<'a>,
}

/// Created resources with the delete that reverses each one.
#[derive(Default)]
pub struct CompensationStack<'a> {
    entries: Vec<Compensation<'a>>,
}

impl<'a> CompensationStack<'a> {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    pub fn push<F>(&mut self, resource: impl Into<String>, disposition: Disposition, undo: F)
    where
        F: FnOnce() -> BoxFuture<'a, Result<(), DriverError>> + Send + 'a,
    {
        self.entries.push(Compensation {
            resource: resource.into(),
            disposition,
            undo: Box::new(undo),
        });
    }

    /// Deletes everything, newest first. Failures are collected, not raised.
    pub async fn unwind(self) -> Vec<CleanupWarning> {
        let mut warnings = Vec::new();
        for entry in self.entries.into_iter().rev() {
            run_undo(entry, &mut warnings).await;
        }
        warnings
    }

    /// Deletes intermediate resources in creation order and keeps deliverables.
    pub async fn discharge(self) -> Vec<CleanupWarning> {
        let mut warnings = Vec::new();
        for entry in self.entries {
            if entry.disposition == Disposition::Intermediate {
                run_undo(entry, &mut warnings).await;
            }
        }
        warnings
    }
}

async fn run_undo(entry: Compensation<'_>, warnings: &mut Vec<CleanupWarning>) {
    tracing::info!("cleaning up {}", entry.resource);
    if let Err(e) = (entry.undo)().await {
        tracing::warn!("Failed to delete {}: {}", entry.resource, e);
        warnings.push(CleanupWarning {
            resource: entry.resource,
            message: e.to_string(),
        });
    }
}

#[derive(Debug, Clone)]
pub struct MachineImageConfig {
    pub local_path: PathBuf,
    pub file_format: String,
    pub volume_size_gb: Option<u64>,
}

/// Result of a successful publish. Cleanup failures on the success path do
/// not fail the run but are reported here.
#[derive(Debug)]
pub struct PublishOutcome {
    pub amis: AmiCollection,
    pub cleanup_warnings: Vec<CleanupWarning>,
}

/// Publishes a local machine image as a registered image in one isolated region.
pub struct IsolatedRegionPublisher {
    pub region: String,
    pub bucket_folder: String,
    pub keep_image: bool,
    pub server_side_encryption: Option<String>,
    pub ami_properties: AmiProperties,
    pub deadline: Option<Duration>,
}

impl IsolatedRegionPublisher {
    pub fn new(config: &PublisherConfig) -> Self {
        Self {
            region: config.region.clone(),
            bucket_folder: config.bucket_folder.clone(),
            keep_image: config.keep_image,
            server_side_encryption: config.server_side_encryption.clone(),
            ami_properties: config.ami_properties.clone(),
            deadline: config.pipeline_deadline,
        }
    }

    pub async fn publish(
        &self,
        drivers: &dyn DriverSet,
        machine_image_config: MachineImageConfig,
    ) -> Result<PublishOutcome, PipelineError> {
        let ctx = PublishContext::new(self.deadline);
        let started = Instant::now();
        let result = self.run(&ctx, drivers, machine_image_config).await;
        tracing::info!(
            "[{}] completed publish() in {:.2} minutes",
            ctx.run_id,
            started.elapsed().as_secs_f64() / 60.0
        );
        result
    }

    /// Drives every stage with an explicit context. Creates are never
    /// cancelled mid-flight; the deadline is checked once each created
    /// resource is on the compensation stack.
    pub async fn run(
        &self,
        ctx: &PublishContext,
        drivers: &dyn DriverSet,
        machine_image_config: MachineImageConfig,
    ) -> Result<PublishOutcome, PipelineError> {
        let mut run = PipelineRun::new(ctx);

        let machine_image_driver = drivers.machine_image_driver();
        let machine_image = match machine_image_driver
            .create(
                ctx,
                MachineImageDriverConfig {
                    machine_image_path: machine_image_config.local_path,
                    bucket_folder: self.bucket_folder.clone(),
                    server_side_encryption: self.server_side_encryption.clone(),
                    file_format: machine_image_config.file_format,
                    volume_size_gb: machine_image_config.volume_size_gb,
                },
            )
            .await
        {
            Ok(image) => image,
            Err(e) => return Err(run.fail(PipelineStage::MachineImage, e).await),
        };
        run.advance(PipelineState::ImageCreated);

        if self.keep_image {
            tracing::info!("retaining machine image {}", machine_image.get_url.key);
        } else {
            let image = machine_image.clone();
            run.compensations.push(
                format!("machine image {}", machine_image.get_url.key),
                Disposition::Intermediate,
                move || async move { machine_image_driver.delete(ctx, &image).await }.boxed(),
            );
        }
        if let Err(e) = ctx.check_deadline() {
            return Err(run.fail(PipelineStage::MachineImage, e).await);
        }

        let volume_driver = drivers.volume_driver();
        let volume = match volume_driver
            .create(
                ctx,
                VolumeDriverConfig {
                    machine_image_manifest_url: machine_image.get_url.url.clone(),
                },
            )
            .await
        {
            Ok(volume) => volume,
            Err(e) => return Err(run.fail(PipelineStage::Volume, e).await),
        };
        run.advance(PipelineState::VolumeCreated);
        {
            let volume = volume.clone();
            run.compensations.push(
                format!("volume {}", volume.id),
                Disposition::Intermediate,
                move || async move { volume_driver.delete(ctx, &volume).await }.boxed(),
            );
        }
        if let Err(e) = ctx.check_deadline() {
            return Err(run.fail(PipelineStage::Volume, e).await);
        }

        let snapshot_driver = drivers.snapshot_driver();
        let snapshot = match snapshot_driver
            .create(
                ctx,
                SnapshotDriverConfig {
                    volume_id: volume.id.clone(),
                },
            )
            .await
        {
            Ok(snapshot) => snapshot,
            Err(e) => return Err(run.fail(PipelineStage::Snapshot, e).await),
        };
        run.advance(PipelineState::SnapshotCreated);
        {
            let snapshot = snapshot.clone();
            run.compensations.push(
                format!("snapshot {}", snapshot.id),
                Disposition::Deliverable,
                move || async move { snapshot_driver.delete(ctx, &snapshot).await }.boxed(),
            );
        }
        if let Err(e) = ctx.check_deadline() {
            return Err(run.fail(PipelineStage::Snapshot, e).await);
        }

        let ami = match drivers
            .ami_driver()
            .create(
                ctx,
                AmiDriverConfig {
                    snapshot_id: snapshot.id.clone(),
                    ami_properties: self.ami_properties.clone(),
                },
            )
            .await
        {
            Ok(ami) => ami,
            Err(e) => return Err(run.fail(PipelineStage::Ami, e).await),
        };
        run.advance(PipelineState::ImageRegistered);
        tracing::info!("registered {} in {} from {}", ami.id, self.region, snapshot.id);

        let mut amis = AmiCollection::new();
        amis.add(ami);
        let cleanup_warnings = run.finish().await;
        Ok(PublishOutcome {
            amis,
            cleanup_warnings,
        })
    }
}

struct PipelineRun<'a> {
    ctx: &'a PublishContext,
    state: PipelineState,
    compensations: CompensationStack<'a>,
}

impl<'a> PipelineRun<'a> {
    fn new(ctx: &'a PublishContext) -> Self {
        Self {
            ctx,
            state: PipelineState::Start,
            compensations: CompensationStack::new(),
        }
    }

    fn advance(&mut self, next: PipelineState) {
        debug_assert!(self.state.can_transition_to(next));
        tracing::debug!("[{}] {:?} -> {:?}", self.ctx.run_id, self.state, next);
        self.state = next;
    }

    async fn fail(mut self, stage: PipelineStage, source: DriverError) -> PipelineError {
        self.advance(PipelineState::Failed(stage));
        tracing::error!("[{}] {}: {}", self.ctx.run_id, stage, source);
        let cleanup_warnings = std::mem::take(&mut self.compensations).unwind().await;
        PipelineError {
            stage,
            source,
            cleanup_warnings,
        }
    }

    async fn finish(mut self) -> Vec<CleanupWarning> {
        let warnings = std::mem::take(&mut self.compensations).discharge().await;
        for warning in &warnings {
            tracing::warn!("[{}] {}", self.ctx.run_id, warning);
        }
        self.advance(PipelineState::Done);
        warnings
    }
}
