use crate::{
    encode_name, validate_name, NameGenerator, StorageBackend, StorageError, StorageResult,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use snapvault_core::StoredImage;
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

/// Path prefix the HTTP layer serves stored files under.
pub const LOCAL_URL_PREFIX: &str = "/uploads";

const PARTIAL_SUFFIX: &str = ".partial";
const MAX_NAME_ATTEMPTS: usize = 16;

/// Photos kept flat in a single directory. All metadata comes from `stat`.
pub struct LocalStorage {
    base_path: PathBuf,
    names: NameGenerator,
}

impl LocalStorage {
    pub fn new(base_path: PathBuf, name_prefix: &str) -> Self {
        Self {
            base_path,
            names: NameGenerator::new(name_prefix),
        }
    }

    fn path_for(&self, name: &str) -> StorageResult<PathBuf> {
        let name = validate_name(name)?;
        Ok(self.base_path.join(name))
    }

    /// Pick a generated name that is not already taken on disk. The generator
    /// alone covers this process; the check covers a restarted process whose
    /// clock went backwards.
    async fn fresh_name(&self, name_hint: &str) -> StorageResult<String> {
        for _ in 0..MAX_NAME_ATTEMPTS {
            let name = self.names.next_name(name_hint);
            if !fs::try_exists(self.base_path.join(&name)).await? {
                return Ok(name);
            }
            warn!("Generated name already exists on disk, retrying: {}", name);
        }
        Err(StorageError::Backend(
            "Could not generate an unused file name".to_string(),
        ))
    }

    /// Remove `.{name}.partial` files left behind by uploads that were
    /// cancelled between write and rename. Only safe before serving starts.
    pub async fn remove_stale_partials(&self) -> StorageResult<usize> {
        let mut entries = fs::read_dir(&self.base_path).await?;
        let mut removed = 0;

        while let Some(entry) = entries.next_entry().await? {
            let file_name = entry.file_name();
            let Some(name) = file_name.to_str() else {
                continue;
            };
            if !(name.starts_with('.') && name.ends_with(PARTIAL_SUFFIX)) {
                continue;
            }

            match fs::remove_file(entry.path()).await {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }

        if removed > 0 {
            warn!("Removed {} stale partial uploads from {:?}", removed, self.base_path);
        }
        Ok(removed)
    }

    async fn write_partial(path: &Path, data: &[u8]) -> io::Result<()> {
        let mut file = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
            .await?;
        file.write_all(data).await?;
        file.sync_all().await?;
        Ok(())
    }
}

fn file_time(metadata: &std::fs::Metadata) -> DateTime<Utc> {
    metadata
        .created()
        .or_else(|_| metadata.modified())
        .map(DateTime::<Utc>::from)
        .unwrap_or_else(|_| Utc::now())
}

fn map_not_found(err: io::Error, name: &str) -> StorageError {
    if err.kind() == io::ErrorKind::NotFound {
        StorageError::NotFound(name.to_string())
    } else {
        StorageError::Io(err)
    }
}

#[async_trait]
impl StorageBackend for LocalStorage {
    async fn put(&self, name_hint: &str, data: &[u8]) -> StorageResult<StoredImage> {
        let name = self.fresh_name(name_hint).await?;
        let final_path = self.base_path.join(&name);
        let partial_path = self
            .base_path
            .join(format!(".{}{}", name, PARTIAL_SUFFIX));

        debug!("Storing photo at: {:?}", final_path);

        // Written under a hidden name first so `list` never sees a half-written file
        if let Err(e) = Self::write_partial(&partial_path, data).await {
            let _ = fs::remove_file(&partial_path).await;
            return Err(e.into());
        }
        if let Err(e) = fs::rename(&partial_path, &final_path).await {
            let _ = fs::remove_file(&partial_path).await;
            return Err(e.into());
        }

        let metadata = fs::metadata(&final_path).await?;
        debug!("Stored photo {}: {} bytes", name, metadata.len());

        Ok(StoredImage {
            name,
            size_bytes: metadata.len(),
            created_at: file_time(&metadata),
        })
    }

    async fn list(&self) -> StorageResult<Vec<StoredImage>> {
        let mut entries = fs::read_dir(&self.base_path).await?;
        let mut images = Vec::new();

        while let Some(entry) = entries.next_entry().await? {
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if name.starts_with('.') {
                continue;
            }

            // A file deleted between read_dir and stat simply drops out
            let metadata = match entry.metadata().await {
                Ok(metadata) => metadata,
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            if !metadata.is_file() {
                continue;
            }

            images.push(StoredImage {
                name,
                size_bytes: metadata.len(),
                created_at: file_time(&metadata),
            });
        }

        debug!("Listed {} files in {:?}", images.len(), self.base_path);
        Ok(images)
    }

    async fn retrieve(&self, name: &str) -> StorageResult<Vec<u8>> {
        let file_path = self.path_for(name)?;

        debug!("Retrieving photo from: {:?}", file_path);

        let data = fs::read(&file_path)
            .await
            .map_err(|e| map_not_found(e, name))?;
        debug!("Retrieved photo: {} bytes", data.len());

        Ok(data)
    }

    async fn exists(&self, name: &str) -> StorageResult<bool> {
        let file_path = self.path_for(name)?;
        Ok(fs::try_exists(&file_path).await?)
    }

    async fn delete(&self, name: &str) -> StorageResult<()> {
        let file_path = self.path_for(name)?;

        debug!("Deleting photo at: {:?}", file_path);

        fs::remove_file(&file_path)
            .await
            .map_err(|e| map_not_found(e, name))?;

        debug!("Deleted photo: {:?}", file_path);
        Ok(())
    }

    fn url_for(&self, name: &str) -> String {
        format!("{}/{}", LOCAL_URL_PREFIX, encode_name(name))
    }

    fn kind(&self) -> &'static str {
        "local"
    }
}
