pub mod config;
pub mod error;
pub mod models;

pub use config::{
    AzureStorageConfig, CoreConfig, GalleryConfig, LocalStorageConfig, ServerConfig,
    StorageBackendKind, StorageConfig, UploadConfig,
};
#[cfg(feature = "s3")]
pub use config::S3StorageConfig;
pub use error::{CoreError, CoreResult};
pub use models::{is_image_name, ImageKind, StoredImage};
