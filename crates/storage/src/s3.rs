use crate::{
    encode_name, validate_name, NameGenerator, StorageBackend, StorageError, StorageResult,
};
use async_trait::async_trait;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use chrono::{DateTime, Utc};
use snapvault_core::{ImageKind, StoredImage};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, error};

pub struct S3Storage {
    client: Client,
    bucket: String,
    region: String,
    endpoint: Option<String>,
    timeout: Duration,
    names: NameGenerator,
}

impl S3Storage {
    pub fn new(
        client: Client,
        bucket: String,
        region: String,
        endpoint: Option<String>,
        name_prefix: &str,
        timeout: Duration,
    ) -> Self {
        debug!(
            "Initializing S3 storage client for bucket '{}' in region '{}'",
            bucket, region
        );

        Self {
            client,
            bucket,
            region,
            endpoint,
            timeout,
            names: NameGenerator::new(name_prefix),
        }
    }

    /// Bound a single S3 call by the configured timeout.
    async fn bounded<T, F>(&self, operation: &str, fut: F) -> StorageResult<T>
    where
        F: Future<Output = StorageResult<T>>,
    {
        tokio::time::timeout(self.timeout, fut)
            .await
            .map_err(|_| {
                error!("S3 {} timed out after {:?}", operation, self.timeout);
                StorageError::Backend(format!("S3 {} timed out", operation))
            })?
    }
}

fn to_chrono(value: &aws_sdk_s3::primitives::DateTime) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(value.secs(), value.subsec_nanos())
}

#[async_trait]
impl StorageBackend for S3Storage {
    async fn put(&self, name_hint: &str, data: &[u8]) -> StorageResult<StoredImage> {
        let name = self.names.next_name(name_hint);
        let content_type = ImageKind::from_filename(&name)
            .unwrap_or(ImageKind::Jpeg)
            .content_type();

        debug!(
            "Storing object in S3: bucket={}, region={}, key={}",
            self.bucket, self.region, name
        );

        let request = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(&name)
            .content_type(content_type)
            .body(ByteStream::from(data.to_vec()));

        let result = self
            .bounded("put_object", async {
                request.send().await.map_err(|e| {
                    error!("Failed to store object in S3: {}", e);
                    StorageError::Backend(format!("S3 put_object failed: {}", e))
                })
            })
            .await?;

        debug!("Stored object in S3: {} bytes, etag: {:?}", data.len(), result.e_tag());

        Ok(StoredImage {
            name,
            size_bytes: data.len() as u64,
            created_at: Utc::now(),
        })
    }

    async fn list(&self) -> StorageResult<Vec<StoredImage>> {
        let mut images = Vec::new();
        let mut continuation: Option<String> = None;

        loop {
            let request = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .set_continuation_token(continuation.clone());

            let page = self
                .bounded("list_objects_v2", async {
                    request.send().await.map_err(|e| {
                        error!("Failed to list objects in S3: {}", e);
                        StorageError::Backend(format!("S3 list_objects_v2 failed: {}", e))
                    })
                })
                .await?;

            for object in page.contents() {
                let Some(key) = object.key() else { continue };
                images.push(StoredImage {
                    name: key.to_string(),
                    size_bytes: object.size().unwrap_or(0).max(0) as u64,
                    created_at: object
                        .last_modified()
                        .and_then(to_chrono)
                        .unwrap_or_default(),
                });
            }

            match page.next_continuation_token() {
                Some(token) if page.is_truncated().unwrap_or(false) => {
                    continuation = Some(token.to_string())
                }
                _ => break,
            }
        }

        debug!("Listed {} objects in bucket {}", images.len(), self.bucket);
        Ok(images)
    }

    async fn retrieve(&self, name: &str) -> StorageResult<Vec<u8>> {
        let key = validate_name(name)?;

        debug!(
            "Retrieving object from S3: bucket={}, region={}, key={}",
            self.bucket, self.region, key
        );

        let request = self.client.get_object().bucket(&self.bucket).key(key);
        let result = self
            .bounded("get_object", async {
                request.send().await.map_err(|e| {
                    if e.as_service_error().is_some_and(|se| se.is_no_such_key()) {
                        StorageError::NotFound(key.to_string())
                    } else {
                        error!("Failed to retrieve object from S3: {}", e);
                        StorageError::Backend(format!("S3 get_object failed: {}", e))
                    }
                })
            })
            .await?;

        let data = self
            .bounded("get_object body", async {
                result.body.collect().await.map_err(|e| {
                    error!("Failed to read S3 object body: {}", e);
                    StorageError::Backend(format!("Failed to read S3 body: {}", e))
                })
            })
            .await?
            .into_bytes()
            .to_vec();

        debug!("Retrieved object from S3: {} bytes", data.len());
        Ok(data)
    }

    async fn exists(&self, name: &str) -> StorageResult<bool> {
        let key = validate_name(name)?;

        debug!("Checking if object exists in S3: bucket={}, key={}", self.bucket, key);

        let request = self.client.head_object().bucket(&self.bucket).key(key);
        self.bounded("head_object", async {
            match request.send().await {
                Ok(_) => Ok(true),
                Err(e) if e.as_service_error().is_some_and(|se| se.is_not_found()) => Ok(false),
                Err(e) => {
                    error!("Failed to check object existence in S3: {}", e);
                    Err(StorageError::Backend(format!("S3 head_object failed: {}", e)))
                }
            }
        })
        .await
    }

    async fn delete(&self, name: &str) -> StorageResult<()> {
        let key = validate_name(name)?;

        // delete_object succeeds for missing keys, so check first
        if !self.exists(key).await? {
            return Err(StorageError::NotFound(key.to_string()));
        }

        debug!("Deleting object from S3: bucket={}, key={}", self.bucket, key);

        let request = self.client.delete_object().bucket(&self.bucket).key(key);
        self.bounded("delete_object", async {
            request.send().await.map_err(|e| {
                error!("Failed to delete object from S3: {}", e);
                StorageError::Backend(format!("S3 delete_object failed: {}", e))
            })
        })
        .await?;

        debug!("Deleted object from S3: {}", key);
        Ok(())
    }

    fn url_for(&self, name: &str) -> String {
        match &self.endpoint {
            Some(endpoint) => format!(
                "{}/{}/{}",
                endpoint.trim_end_matches('/'),
                self.bucket,
                encode_name(name)
            ),
            None => format!(
                "https://{}.s3.{}.amazonaws.com/{}",
                self.bucket,
                self.region,
                encode_name(name)
            ),
        }
    }

    fn kind(&self) -> &'static str {
        "s3"
    }
}
