pub mod azure;
pub mod backend;
pub mod config;
pub mod error;
pub mod local;
pub mod naming;

#[cfg(feature = "s3")]
pub mod s3;


pub use azure::{AzureBlobStorage, ConnectionString};
pub use backend::{encode_name, validate_name, StorageBackend};
pub use config::create_backend;
pub use error::{StorageError, StorageResult};
pub use local::LocalStorage;
pub use naming::NameGenerator;

#[cfg(feature = "s3")]
pub use s3::S3Storage;
