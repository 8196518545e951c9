pub mod config;
pub mod error;
pub mod infrastructure;
pub mod models;
pub mod services;
pub mod utils;

pub use config::PublisherConfig;
pub use error::{DriverError, PipelineError, PipelineStage, PublishError};
pub use models::{AmiCollection, MachineImage};
pub use services::drivers::{DriverSet, PublishContext, ResourceDriver};
pub use services::machine_image::MachineImagePublisher;
pub use services::pipeline::{IsolatedRegionPublisher, MachineImageConfig, PublishOutcome};
