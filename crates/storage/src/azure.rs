//! Azure Blob Storage backend.
//!
//! Talks to the Blob service REST API directly with `reqwest`. Every photo is
//! a single block blob written with one Put Blob call, so a blob is either
//! fully present or absent. Listing pages through List Blobs with the
//! continuation marker.
//!
//! Authentication comes from the storage account connection string: Shared
//! Key (`AccountKey=`) is preferred, a `SharedAccessSignature=` token is used
//! otherwise.

use crate::naming::timestamp_from_name;
use crate::{validate_name, NameGenerator, StorageBackend, StorageError, StorageResult};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use reqwest::{Method, StatusCode};
use sha2::Sha256;
use snapvault_core::{ImageKind, StoredImage};
use std::time::{Duration, SystemTime};
use tracing::{debug, error, info, warn};

/// REST API version sent with every request.
const AZURE_API_VERSION: &str = "2021-12-02";
const MAX_NAME_ATTEMPTS: usize = 16;

const DEV_ACCOUNT_NAME: &str = "devstoreaccount1";
const DEV_ACCOUNT_KEY: &str =
    "Eby8vdM02xNOcqFlqUwJPLlmEtlCDXJ1OUzFT50uSRZ6IFsuFq2UVErCz4I6tq/K1SZFPTOtr/KBHBeksoGMGw==";
const DEV_BLOB_ENDPOINT: &str = "http://127.0.0.1:10000/devstoreaccount1";

/// Everything except unreserved characters; '/' stays literal in blob paths.
const BLOB_PATH_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~')
    .remove(b'/');

const QUERY_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

#[derive(Clone)]
enum AzureAuth {
    SharedKey { key_bytes: Vec<u8> },
    SasToken { token: String },
}

/// Parsed storage account connection string.
#[derive(Clone)]
pub struct ConnectionString {
    account_name: String,
    auth: AzureAuth,
    blob_endpoint: String,
    /// Path component of the endpoint, non-empty for path-style endpoints
    /// such as the local emulator.
    endpoint_path: String,
}

impl ConnectionString {
    pub fn parse(raw: &str) -> StorageResult<Self> {
        let mut account_name = None;
        let mut account_key = None;
        let mut sas_token = None;
        let mut blob_endpoint = None;
        let mut protocol = "https".to_string();
        let mut suffix = "core.windows.net".to_string();
        let mut development = false;

        for part in raw.split(';').map(str::trim).filter(|p| !p.is_empty()) {
            let Some((key, value)) = part.split_once('=') else {
                return Err(StorageError::Configuration(format!(
                    "Malformed connection string segment: {}",
                    key_only(part)
                )));
            };
            match key {
                "AccountName" => account_name = Some(value.to_string()),
                "AccountKey" => account_key = Some(value.to_string()),
                "SharedAccessSignature" => {
                    sas_token = Some(value.trim_start_matches('?').to_string())
                }
                "BlobEndpoint" => blob_endpoint = Some(value.trim_end_matches('/').to_string()),
                "DefaultEndpointsProtocol" => protocol = value.to_string(),
                "EndpointSuffix" => suffix = value.to_string(),
                "UseDevelopmentStorage" => development = value.eq_ignore_ascii_case("true"),
                other => debug!("Ignoring connection string key: {}", other),
            }
        }

        if development {
            account_name.get_or_insert_with(|| DEV_ACCOUNT_NAME.to_string());
            account_key.get_or_insert_with(|| DEV_ACCOUNT_KEY.to_string());
            blob_endpoint.get_or_insert_with(|| DEV_BLOB_ENDPOINT.to_string());
        }

        let account_name = account_name.ok_or_else(|| {
            StorageError::Configuration("Connection string has no AccountName".to_string())
        })?;

        let auth = if let Some(key) = account_key {
            let key_bytes = BASE64_STANDARD.decode(key.as_bytes()).map_err(|e| {
                StorageError::Configuration(format!("Invalid AccountKey (not base64): {}", e))
            })?;
            AzureAuth::SharedKey { key_bytes }
        } else if let Some(token) = sas_token {
            AzureAuth::SasToken { token }
        } else {
            return Err(StorageError::Configuration(
                "Connection string has neither AccountKey nor SharedAccessSignature".to_string(),
            ));
        };

        let blob_endpoint = blob_endpoint
            .unwrap_or_else(|| format!("{}://{}.blob.{}", protocol, account_name, suffix));
        let endpoint_url = reqwest::Url::parse(&blob_endpoint).map_err(|e| {
            StorageError::Configuration(format!("Invalid blob endpoint {}: {}", blob_endpoint, e))
        })?;
        let endpoint_path = endpoint_url.path().trim_end_matches('/').to_string();

        Ok(Self {
            account_name,
            auth,
            blob_endpoint,
            endpoint_path,
        })
    }

    pub fn account_name(&self) -> &str {
        &self.account_name
    }

    pub fn blob_endpoint(&self) -> &str {
        &self.blob_endpoint
    }
}

// Only the key of a bad segment is echoed; the value may be a secret.
fn key_only(segment: &str) -> &str {
    segment.split('=').next().unwrap_or_default()
}

impl std::fmt::Debug for ConnectionString {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionString")
            .field("account_name", &self.account_name)
            .field("blob_endpoint", &self.blob_endpoint)
            .finish_non_exhaustive()
    }
}

pub struct AzureBlobStorage {
    client: reqwest::Client,
    connection: ConnectionString,
    container: String,
    names: NameGenerator,
}

impl AzureBlobStorage {
    pub fn new(
        connection: ConnectionString,
        container: String,
        name_prefix: &str,
        timeout: Duration,
    ) -> StorageResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| StorageError::Backend(format!("Failed to create HTTP client: {}", e)))?;

        info!(
            "Azure blob storage initialized: account={} container={} endpoint={}",
            connection.account_name, container, connection.blob_endpoint
        );

        Ok(Self {
            client,
            connection,
            container,
            names: NameGenerator::new(name_prefix),
        })
    }

    /// Create the container if it does not exist yet.
    pub async fn ensure_container(&self, public_access: bool) -> StorageResult<()> {
        let mut headers = Vec::new();
        if public_access {
            headers.push(("x-ms-blob-public-access".to_string(), "blob".to_string()));
        }

        let resp = self
            .send(
                Method::PUT,
                None,
                &[("restype", "container")],
                headers,
                Vec::new(),
                "",
            )
            .await?;

        match resp.status() {
            status if status.is_success() => {
                info!("Created blob container {}", self.container);
                Ok(())
            }
            StatusCode::CONFLICT => {
                debug!("Blob container {} already exists", self.container);
                Ok(())
            }
            status => {
                let body = resp.text().await.unwrap_or_default();
                Err(map_azure_error("create container", status, &body))
            }
        }
    }

    fn resource_path(&self, blob_name: Option<&str>) -> String {
        match blob_name {
            Some(name) => format!(
                "{}/{}/{}",
                self.connection.endpoint_path,
                self.container,
                utf8_percent_encode(name, BLOB_PATH_ENCODE_SET)
            ),
            None => format!("{}/{}", self.connection.endpoint_path, self.container),
        }
    }

    fn request_url(&self, blob_name: Option<&str>, query: &[(&str, &str)]) -> String {
        let mut url = match blob_name {
            Some(name) => format!(
                "{}/{}/{}",
                self.connection.blob_endpoint,
                self.container,
                utf8_percent_encode(name, BLOB_PATH_ENCODE_SET)
            ),
            None => format!("{}/{}", self.connection.blob_endpoint, self.container),
        };

        let mut params: Vec<String> = query
            .iter()
            .map(|(k, v)| format!("{}={}", k, utf8_percent_encode(v, QUERY_ENCODE_SET)))
            .collect();
        if let AzureAuth::SasToken { token } = &self.connection.auth {
            params.push(token.clone());
        }
        if !params.is_empty() {
            url.push('?');
            url.push_str(&params.join("&"));
        }
        url
    }

    /// Canonicalized resource: `/{account}{decoded path}` followed by the
    /// sorted query parameters, one `\nkey:value` line each.
    fn canonicalized_resource(&self, blob_name: Option<&str>, query: &[(&str, &str)]) -> String {
        let path = self.resource_path(blob_name);
        let decoded = percent_decode_str(&path).decode_utf8_lossy();
        let mut resource = format!("/{}{}", self.connection.account_name, decoded);

        let mut sorted: Vec<(String, &str)> =
            query.iter().map(|(k, v)| (k.to_lowercase(), *v)).collect();
        sorted.sort_by(|a, b| a.0.cmp(&b.0));
        for (k, v) in sorted {
            resource.push_str(&format!("\n{}:{}", k, v));
        }
        resource
    }

    /// Build the Shared Key string-to-sign. Besides the `x-ms-` headers only
    /// `If-None-Match` is taken from `ms_headers`, into its standard slot.
    fn string_to_sign(
        method: &Method,
        content_length: usize,
        content_type: &str,
        ms_headers: &[(String, String)],
        canonicalized_resource: &str,
    ) -> String {
        // Content-Length is empty for zero-length bodies
        let content_length = if content_length == 0 {
            String::new()
        } else {
            content_length.to_string()
        };

        let if_none_match = ms_headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case("if-none-match"))
            .map(|(_, v)| v.as_str())
            .unwrap_or_default();

        let mut headers: Vec<(String, &str)> = ms_headers
            .iter()
            .map(|(k, v)| (k.to_lowercase(), v.as_str()))
            .filter(|(k, _)| k.starts_with("x-ms-"))
            .collect();
        headers.sort_by(|a, b| a.0.cmp(&b.0));
        let canonicalized_headers = headers
            .iter()
            .map(|(k, v)| format!("{}:{}", k, v))
            .collect::<Vec<_>>()
            .join("\n");

        format!(
            "{}\n\n\n{}\n\n{}\n\n\n\n{}\n\n\n{}\n{}",
            method.as_str(),
            content_length,
            content_type,
            if_none_match,
            canonicalized_headers,
            canonicalized_resource
        )
    }

    fn sign(&self, key_bytes: &[u8], string_to_sign: &str) -> StorageResult<String> {
        type HmacSha256 = Hmac<Sha256>;
        let mut mac = HmacSha256::new_from_slice(key_bytes)
            .map_err(|e| StorageError::Configuration(format!("HMAC key error: {}", e)))?;
        mac.update(string_to_sign.as_bytes());
        let signature = BASE64_STANDARD.encode(mac.finalize().into_bytes());
        Ok(format!(
            "SharedKey {}:{}",
            self.connection.account_name, signature
        ))
    }

    /// Issue one signed request. Transport failures (including the client
    /// timeout) become `Backend` errors; status handling is left to callers.
    async fn send(
        &self,
        method: Method,
        blob_name: Option<&str>,
        query: &[(&str, &str)],
        extra_headers: Vec<(String, String)>,
        body: Vec<u8>,
        content_type: &str,
    ) -> StorageResult<reqwest::Response> {
        let url = self.request_url(blob_name, query);
        let date = httpdate::fmt_http_date(SystemTime::now());

        let mut ms_headers = vec![
            ("x-ms-date".to_string(), date),
            ("x-ms-version".to_string(), AZURE_API_VERSION.to_string()),
        ];
        ms_headers.extend(extra_headers);

        let mut req = self.client.request(method.clone(), &url);
        for (name, value) in &ms_headers {
            req = req.header(name.as_str(), value.as_str());
        }
        if !content_type.is_empty() {
            req = req.header("Content-Type", content_type);
        }

        if let AzureAuth::SharedKey { key_bytes } = &self.connection.auth {
            let resource = self.canonicalized_resource(blob_name, query);
            let string_to_sign =
                Self::string_to_sign(&method, body.len(), content_type, &ms_headers, &resource);
            req = req.header("Authorization", self.sign(key_bytes, &string_to_sign)?);
        }

        if !body.is_empty() || method == Method::PUT {
            req = req.body(body);
        }

        req.send().await.map_err(|e| {
            error!("Azure {} request failed: {}", method, e);
            if e.is_timeout() {
                StorageError::Backend(format!("Azure {} request timed out", method))
            } else {
                StorageError::Backend(format!("Azure {} request failed: {}", method, e))
            }
        })
    }

    async fn list_page(
        &self,
        marker: Option<&str>,
    ) -> StorageResult<(Vec<StoredImage>, Option<String>)> {
        let mut query = vec![("restype", "container"), ("comp", "list")];
        if let Some(marker) = marker {
            query.push(("marker", marker));
        }

        let resp = self
            .send(Method::GET, None, &query, Vec::new(), Vec::new(), "")
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(map_azure_error("list blobs", status, &body));
        }

        let body = resp
            .text()
            .await
            .map_err(|e| StorageError::Backend(format!("Failed to read list response: {}", e)))?;
        Ok(parse_list_blobs(&body))
    }
}

fn map_azure_error(context: &str, status: StatusCode, body: &str) -> StorageError {
    error!("Azure {} failed: HTTP {}", context, status);
    StorageError::Backend(format!("Azure {}: HTTP {} - {}", context, status, body))
}

fn xml_element<'a>(xml: &'a str, tag: &str) -> Option<&'a str> {
    let open = format!("<{}>", tag);
    let close = format!("</{}>", tag);
    let start = xml.find(&open)? + open.len();
    let end = xml[start..].find(&close)?;
    Some(&xml[start..start + end])
}

fn xml_unescape(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

fn parse_http_time(value: Option<&str>) -> Option<DateTime<Utc>> {
    value
        .and_then(|v| httpdate::parse_http_date(v.trim()).ok())
        .map(DateTime::<Utc>::from)
}

/// Pull the blobs and the continuation marker out of a List Blobs response.
fn parse_list_blobs(body: &str) -> (Vec<StoredImage>, Option<String>) {
    let mut images = Vec::new();
    let mut rest = body;

    while let Some(start) = rest.find("<Blob>") {
        let Some(len) = rest[start..].find("</Blob>") else {
            break;
        };
        let blob_xml = &rest[start..start + len];
        rest = &rest[start + len..];

        let Some(name) = xml_element(blob_xml, "Name").map(xml_unescape) else {
            continue;
        };
        let size_bytes = xml_element(blob_xml, "Content-Length")
            .and_then(|v| v.trim().parse::<u64>().ok())
            .unwrap_or(0);
        let created_at = parse_http_time(xml_element(blob_xml, "Creation-Time"))
            .or_else(|| parse_http_time(xml_element(blob_xml, "Last-Modified")))
            .or_else(|| timestamp_from_name(&name))
            .unwrap_or_default();

        images.push(StoredImage {
            name,
            size_bytes,
            created_at,
        });
    }

    let next_marker = xml_element(body, "NextMarker")
        .filter(|m| !m.is_empty())
        .map(xml_unescape);

    (images, next_marker)
}

#[async_trait]
impl StorageBackend for AzureBlobStorage {
    async fn put(&self, name_hint: &str, data: &[u8]) -> StorageResult<StoredImage> {
        for _ in 0..MAX_NAME_ATTEMPTS {
            let name = self.names.next_name(name_hint);
            let content_type = ImageKind::from_filename(&name)
                .unwrap_or(ImageKind::Jpeg)
                .content_type();

            debug!(
                "Uploading blob: container={}, name={}, {} bytes",
                self.container,
                name,
                data.len()
            );

            // Never overwrite: the service refuses if the name is taken.
            let resp = self
                .send(
                    Method::PUT,
                    Some(&name),
                    &[],
                    vec![
                        ("x-ms-blob-type".to_string(), "BlockBlob".to_string()),
                        ("If-None-Match".to_string(), "*".to_string()),
                    ],
                    data.to_vec(),
                    content_type,
                )
                .await?;

            let status = resp.status();
            if status == StatusCode::CONFLICT || status == StatusCode::PRECONDITION_FAILED {
                debug!("Blob {} already exists, picking another name", name);
                continue;
            }
            if !status.is_success() {
                let body = resp.text().await.unwrap_or_default();
                return Err(map_azure_error("upload", status, &body));
            }

            debug!("Uploaded blob {}", name);
            return Ok(StoredImage {
                name,
                size_bytes: data.len() as u64,
                created_at: Utc::now(),
            });
        }

        Err(StorageError::Backend(
            "Could not generate an unused blob name".to_string(),
        ))
    }

    async fn list(&self) -> StorageResult<Vec<StoredImage>> {
        let mut images = Vec::new();
        let mut marker: Option<String> = None;

        loop {
            let (page, next_marker) = self.list_page(marker.as_deref()).await?;
            images.extend(page);
            match next_marker {
                Some(next) => marker = Some(next),
                None => break,
            }
        }

        debug!("Listed {} blobs in {}", images.len(), self.container);
        Ok(images)
    }

    async fn retrieve(&self, name: &str) -> StorageResult<Vec<u8>> {
        let name = validate_name(name)?;

        let resp = self
            .send(Method::GET, Some(name), &[], Vec::new(), Vec::new(), "")
            .await?;

        match resp.status() {
            status if status.is_success() => {
                let data = resp.bytes().await.map_err(|e| {
                    StorageError::Backend(format!("Failed to read blob body: {}", e))
                })?;
                debug!("Downloaded blob {}: {} bytes", name, data.len());
                Ok(data.to_vec())
            }
            StatusCode::NOT_FOUND => Err(StorageError::NotFound(name.to_string())),
            status => {
                let body = resp.text().await.unwrap_or_default();
                Err(map_azure_error("download", status, &body))
            }
        }
    }

    async fn exists(&self, name: &str) -> StorageResult<bool> {
        let name = validate_name(name)?;

        let resp = self
            .send(Method::HEAD, Some(name), &[], Vec::new(), Vec::new(), "")
            .await?;

        match resp.status() {
            status if status.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            status => Err(map_azure_error("exists", status, "")),
        }
    }

    async fn delete(&self, name: &str) -> StorageResult<()> {
        let name = validate_name(name)?;

        let resp = self
            .send(Method::DELETE, Some(name), &[], Vec::new(), Vec::new(), "")
            .await?;

        match resp.status() {
            status if status.is_success() => {
                debug!("Deleted blob {}", name);
                Ok(())
            }
            StatusCode::NOT_FOUND => {
                warn!("Attempted to delete non-existent blob: {}", name);
                Err(StorageError::NotFound(name.to_string()))
            }
            status => {
                let body = resp.text().await.unwrap_or_default();
                Err(map_azure_error("delete", status, &body))
            }
        }
    }

    fn url_for(&self, name: &str) -> String {
        format!(
            "{}/{}/{}",
            self.connection.blob_endpoint,
            self.container,
            utf8_percent_encode(name, BLOB_PATH_ENCODE_SET)
        )
    }

    fn kind(&self) -> &'static str {
        "azure"
    }
}
