use anyhow::Context;
use clap::{Parser, Subcommand};
use dotenvy::dotenv;
use region_image_publisher::config::PublisherConfig;
use region_image_publisher::infrastructure::storage;
use region_image_publisher::models::{MachineImage, MachineImageDriverConfig};
use region_image_publisher::services::machine_image::MachineImagePublisher;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(author, version, about = "Publish machine images into an isolated region", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Upload an image and its signed import manifest; prints the machine image as JSON
    CreateMachineImage {
        #[arg(long)]
        image: PathBuf,

        #[arg(long, default_value = "RAW")]
        file_format: String,

        /// Defaults to the image size rounded up to whole gigabytes
        #[arg(long)]
        volume_size: Option<u64>,
    },
    /// Delete a machine image previously printed by create-machine-image
    DeleteMachineImage {
        #[arg(long)]
        machine_image: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    // Initialize tracing with EnvFilter
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "region_image_publisher=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let config = PublisherConfig::from_env();
    anyhow::ensure!(!config.bucket_name.is_empty(), "BUCKET_NAME must be set");

    info!(
        "🚀 Publisher: region={}, bucket={}/{}, keep_image={}",
        config.region, config.bucket_name, config.bucket_folder, config.keep_image
    );

    let store = storage::setup_storage(&config).await;
    let publisher = MachineImagePublisher::new(store)
        .with_upload_limits(config.upload_chunk_size, config.upload_concurrency);

    match cli.command {
        Command::CreateMachineImage {
            image,
            file_format,
            volume_size,
        } => {
            let machine_image = publisher
                .create(&MachineImageDriverConfig {
                    machine_image_path: image,
                    bucket_folder: config.bucket_folder.clone(),
                    server_side_encryption: config.server_side_encryption.clone(),
                    file_format,
                    volume_size_gb: volume_size,
                })
                .await?;
            println!("{}", serde_json::to_string_pretty(&machine_image)?);
            info!("✅ Machine image manifest ready");
        }
        Command::DeleteMachineImage { machine_image } => {
            let raw = tokio::fs::read_to_string(&machine_image)
                .await
                .with_context(|| format!("reading {}", machine_image.display()))?;
            let machine_image: MachineImage = serde_json::from_str(&raw)?;
            publisher.delete(&machine_image).await?;
            info!("🧹 Machine image deleted");
        }
    }

    Ok(())
}
