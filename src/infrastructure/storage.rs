use crate::config::PublisherConfig;
use crate::services::storage::S3ObjectStore;
use aws_sdk_s3::config::Region;
use std::env;
use std::sync::Arc;
use tracing::info;

pub async fn setup_storage(config: &PublisherConfig) -> Arc<S3ObjectStore> {
    info!(
        "☁️  S3 Storage: region {} (Bucket: {})",
        config.region, config.bucket_name
    );

    let mut loader = aws_config::from_env().region(Region::new(config.region.clone()));

    if let Some(endpoint_url) = &config.s3_endpoint {
        info!("☁️  Using custom endpoint {}", endpoint_url);
        loader = loader.endpoint_url(endpoint_url);
    }

    if let (Ok(access_key), Ok(secret_key)) =
        (env::var("AWS_ACCESS_KEY_ID"), env::var("AWS_SECRET_ACCESS_KEY"))
    {
        loader = loader.credentials_provider(aws_sdk_s3::config::Credentials::new(
            access_key, secret_key, None, None, "static",
        ));
    }

    let aws_config = loader.load().await;

    let s3_config = aws_sdk_s3::config::Builder::from(&aws_config)
        .force_path_style(config.s3_endpoint.is_some())
        .build();

    let s3_client = aws_sdk_s3::Client::from_conf(s3_config);
    Arc::new(S3ObjectStore::new(s3_client, config.bucket_name.clone()))
}
