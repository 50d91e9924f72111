use crate::{CoreError, CoreResult};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

pub const DEFAULT_CONTAINER: &str = "esp32-photos";

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct CoreConfig {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub upload: UploadConfig,
    pub gallery: GalleryConfig,
}

impl CoreConfig {
    /// Load configuration from defaults, a TOML file and the environment.
    ///
    /// Later sources win: defaults, TOML, `SNAPVAULT_*` variables (nested
    /// keys separated by `__`, e.g. `SNAPVAULT_UPLOAD__MAX_FILE_SIZE`), then
    /// the platform variables `PORT` and `AZURE_STORAGE_CONNECTION_STRING`.
    pub fn load(config_path: Option<&Path>) -> CoreResult<Self> {
        let mut figment = Figment::from(Serialized::defaults(CoreConfig::default()));

        if let Some(path) = config_path {
            if !path.exists() {
                return Err(CoreError::configuration(format!(
                    "Config file not found: {}",
                    path.display()
                )));
            }
            figment = figment.merge(Toml::file(path));
        } else {
            figment = figment
                .merge(Toml::file("snapvault.toml"))
                .merge(Toml::file("config/snapvault.toml"));
        }

        figment = figment
            .merge(Env::prefixed("SNAPVAULT_").split("__"))
            .merge(Env::raw().only(&["PORT"]).map(|_| "server.port".into()))
            .merge(
                Env::raw()
                    .only(&["AZURE_STORAGE_CONNECTION_STRING"])
                    .map(|_| "storage.azure.connection_string".into()),
            );

        let config: CoreConfig = figment.extract()?;
        config.validate()?;
        debug!(
            backend = ?config.storage.backend,
            port = config.server.port,
            "Configuration loaded"
        );
        Ok(config)
    }

    pub fn validate(&self) -> CoreResult<()> {
        if self.upload.field_name.trim().is_empty() {
            return Err(CoreError::configuration("upload.field_name cannot be empty"));
        }
        if self.upload.name_prefix.contains(['/', '\\', '.']) {
            return Err(CoreError::configuration(
                "upload.name_prefix cannot contain path separators or dots",
            ));
        }
        if self.upload.max_file_size == 0 {
            return Err(CoreError::configuration("upload.max_file_size must be positive"));
        }
        if self.gallery.thumbnail_width == 0 {
            return Err(CoreError::configuration("gallery.thumbnail_width must be positive"));
        }
        if matches!(self.storage.backend, StorageBackendKind::Azure)
            && self.storage.azure.connection_string.is_none()
        {
            return Err(CoreError::configuration(
                "Azure storage selected but no connection string configured \
                 (set AZURE_STORAGE_CONNECTION_STRING)",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub cors_origins: Vec<String>,
    /// Seconds before an in-flight request is aborted.
    pub request_timeout: u64,
    /// Upper bound on a whole request body, multipart framing included.
    pub max_request_size: usize,
    pub enable_delete: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            cors_origins: vec!["*".to_string()],
            request_timeout: 30,
            max_request_size: 11 * 1024 * 1024, // 11MB
            enable_delete: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackendKind {
    #[default]
    Local,
    Azure,
    #[cfg(feature = "s3")]
    S3,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackendKind,
    pub local: LocalStorageConfig,
    pub azure: AzureStorageConfig,
    #[cfg(feature = "s3")]
    pub s3: S3StorageConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LocalStorageConfig {
    pub path: PathBuf,
}

impl Default for LocalStorageConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("uploads"),
        }
    }
}

#[derive(Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AzureStorageConfig {
    pub connection_string: Option<String>,
    pub container: String,
    /// Seconds allowed for a single blob service call.
    pub timeout: u64,
    /// Create the container with anonymous blob read access so gallery
    /// thumbnails can link straight to the blob URL.
    pub public_access: bool,
}

impl Default for AzureStorageConfig {
    fn default() -> Self {
        Self {
            connection_string: None,
            container: DEFAULT_CONTAINER.to_string(),
            timeout: 30,
            public_access: true,
        }
    }
}

// Keeps the account key out of logs.
impl std::fmt::Debug for AzureStorageConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AzureStorageConfig")
            .field(
                "connection_string",
                &self.connection_string.as_ref().map(|_| "<redacted>"),
            )
            .field("container", &self.container)
            .field("timeout", &self.timeout)
            .field("public_access", &self.public_access)
            .finish()
    }
}

#[cfg(feature = "s3")]
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct S3StorageConfig {
    pub bucket: String,
    pub region: String,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub endpoint: Option<String>,
    pub timeout: u64,
}

#[cfg(feature = "s3")]
impl Default for S3StorageConfig {
    fn default() -> Self {
        Self {
            bucket: DEFAULT_CONTAINER.to_string(),
            region: "us-east-1".to_string(),
            access_key_id: None,
            secret_access_key: None,
            endpoint: None,
            timeout: 30,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct UploadConfig {
    /// Multipart field carrying the photo.
    pub field_name: String,
    /// Prefix of generated names, e.g. `photo` gives `photo_<epoch_ms>.jpg`.
    pub name_prefix: String,
    pub max_file_size: u64,
    /// Allowed extensions, lowercase. Empty means any extension is accepted.
    pub allowed_extensions: Vec<String>,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            field_name: "photo".to_string(),
            name_prefix: "photo".to_string(),
            max_file_size: 10 * 1024 * 1024, // 10MB
            allowed_extensions: vec![
                "jpg".to_string(),
                "jpeg".to_string(),
                "png".to_string(),
                "gif".to_string(),
            ],
        }
    }
}

impl UploadConfig {
    /// Check the client supplied filename against the allow-list
    pub fn is_extension_allowed(&self, filename: &str) -> bool {
        if self.allowed_extensions.is_empty() {
            return true;
        }

        Path::new(filename)
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_lowercase())
            .is_some_and(|ext| self.allowed_extensions.iter().any(|allowed| allowed == &ext))
    }

    pub fn is_size_allowed(&self, size: u64) -> bool {
        size <= self.max_file_size
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct GalleryConfig {
    pub title: String,
    pub thumbnail_width: u32,
    /// Sort by upload time, most recent first. When false the backend's
    /// enumeration order is kept.
    pub newest_first: bool,
}

impl Default for GalleryConfig {
    fn default() -> Self {
        Self {
            title: "ESP32-CAM Photo Gallery".to_string(),
            thumbnail_width: 300,
            newest_first: true,
        }
    }
}
