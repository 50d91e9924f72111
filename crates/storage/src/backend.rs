use crate::{StorageError, StorageResult};
use async_trait::async_trait;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use snapvault_core::StoredImage;

/// Unreserved URL characters pass through, everything else is encoded.
const NAME_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Where uploaded photos live.
///
/// Implementations must make a photo visible to `list` only once its bytes
/// are completely written, and must give every `put` a distinct name so
/// concurrent uploads never overwrite each other.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Persist `data` under a freshly generated name. `name_hint` is the
    /// client's filename and only contributes the image extension.
    async fn put(&self, name_hint: &str, data: &[u8]) -> StorageResult<StoredImage>;

    /// Enumerate every stored photo. Each call re-reads the store.
    async fn list(&self) -> StorageResult<Vec<StoredImage>>;

    async fn retrieve(&self, name: &str) -> StorageResult<Vec<u8>>;

    async fn exists(&self, name: &str) -> StorageResult<bool>;

    /// Remove a photo. Fails with `NotFound` when nothing is stored under `name`.
    async fn delete(&self, name: &str) -> StorageResult<()>;

    /// URL a browser can fetch the photo from.
    fn url_for(&self, name: &str) -> String;

    /// Short backend label for logs and health output.
    fn kind(&self) -> &'static str;
}

/// Stored names are flat: no separators, no traversal, no hidden files.
pub fn validate_name(name: &str) -> StorageResult<&str> {
    if name.is_empty() {
        return Err(StorageError::InvalidPath("Empty name".to_string()));
    }

    if name.contains(['/', '\\']) || name.contains("..") || name.starts_with('.') {
        return Err(StorageError::InvalidPath(format!(
            "Name contains invalid sequences: {}",
            name
        )));
    }

    if name.chars().any(|c| c.is_control()) {
        return Err(StorageError::InvalidPath(format!(
            "Name contains control characters: {:?}",
            name
        )));
    }

    Ok(name)
}

/// Percent-encode a stored name for use as a URL path segment.
pub fn encode_name(name: &str) -> String {
    utf8_percent_encode(name, NAME_ENCODE_SET).to_string()
}
