use crate::{AzureBlobStorage, ConnectionString, LocalStorage, StorageBackend, StorageError, StorageResult};
use snapvault_core::{StorageBackendKind, StorageConfig, UploadConfig};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[cfg(feature = "s3")]
use crate::S3Storage;

/// Build the configured storage backend. Called once at startup; handlers
/// only ever see the resulting trait object.
pub async fn create_backend(
    storage: &StorageConfig,
    upload: &UploadConfig,
) -> StorageResult<Arc<dyn StorageBackend>> {
    match storage.backend {
        StorageBackendKind::Local => {
            let path = &storage.local.path;
            // Ensure the storage directory exists
            if !path.exists() {
                tokio::fs::create_dir_all(path).await.map_err(|e| {
                    StorageError::Backend(format!("Failed to create storage directory: {}", e))
                })?;
            }

            let backend = LocalStorage::new(path.clone(), &upload.name_prefix);
            backend.remove_stale_partials().await?;

            info!("Using local photo storage at {:?}", path);
            Ok(Arc::new(backend))
        }

        StorageBackendKind::Azure => {
            let azure = &storage.azure;
            let raw = azure.connection_string.as_deref().ok_or_else(|| {
                StorageError::Configuration("Azure connection string is not set".to_string())
            })?;
            let connection = ConnectionString::parse(raw)?;

            let backend = AzureBlobStorage::new(
                connection,
                azure.container.clone(),
                &upload.name_prefix,
                Duration::from_secs(azure.timeout),
            )?;
            backend.ensure_container(azure.public_access).await?;

            Ok(Arc::new(backend))
        }

        #[cfg(feature = "s3")]
        StorageBackendKind::S3 => {
            let s3 = &storage.s3;
            let mut config_builder = aws_sdk_s3::config::Builder::new()
                .behavior_version_latest()
                .region(aws_sdk_s3::config::Region::new(s3.region.clone()));

            // Set custom endpoint if provided (for S3-compatible services like MinIO)
            if let Some(endpoint_url) = &s3.endpoint {
                config_builder = config_builder
                    .endpoint_url(endpoint_url)
                    .force_path_style(true);
            }

            if let (Some(access_key), Some(secret_key)) = (&s3.access_key_id, &s3.secret_access_key) {
                let credentials = aws_sdk_s3::config::Credentials::new(
                    access_key,
                    secret_key,
                    None,
                    None,
                    "snapvault-config",
                );
                config_builder = config_builder.credentials_provider(credentials);
            }

            let client = aws_sdk_s3::Client::from_conf(config_builder.build());

            info!("Using S3 photo storage in bucket {}", s3.bucket);
            Ok(Arc::new(S3Storage::new(
                client,
                s3.bucket.clone(),
                s3.region.clone(),
                s3.endpoint.clone(),
                &upload.name_prefix,
                Duration::from_secs(s3.timeout),
            )))
        }
    }
}
