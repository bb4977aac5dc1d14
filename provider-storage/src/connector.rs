//! Storage API connector
//!
//! Bucket and file operations over the authenticated client.

use bridge_traits::http::CONTENT_TYPE;
use bridge_traits::{HttpRequest, HttpResponse};
use bytes::{BufMut, Bytes, BytesMut};
use core_auth::AuthenticatedClient;
use core_runtime::config::DEFAULT_MAX_UPLOAD_BYTES;
use core_runtime::events::{CoreEvent, StorageEvent};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use crate::error::{Result, StorageError};
use crate::types::{Bucket, CreateBucket, DownloadedFile, StoredFile, UpdateBucket};

const BUCKETS_PATH: &str = "/api/buckets";

/// Multipart field the service reads the upload from
const UPLOAD_FIELD: &str = "file";

const DEFAULT_UPLOAD_CONTENT_TYPE: &str = "application/octet-stream";

/// Storage API connector
///
/// # Example
///
/// ```ignore
/// use provider_storage::{CreateBucket, StorageApi};
///
/// let storage = StorageApi::new(client, config.max_upload_bytes);
/// let bucket = storage.create_bucket(&CreateBucket::new("photos")).await?;
/// storage.upload_file(bucket.id, "cat.jpg", Some("image/jpeg"), bytes).await?;
/// ```
pub struct StorageApi {
    client: Arc<AuthenticatedClient>,
    max_upload_bytes: u64,
}

impl StorageApi {
    pub fn new(client: Arc<AuthenticatedClient>, max_upload_bytes: u64) -> Self {
        Self {
            client,
            max_upload_bytes,
        }
    }

    pub fn with_default_limit(client: Arc<AuthenticatedClient>) -> Self {
        Self::new(client, DEFAULT_MAX_UPLOAD_BYTES)
    }

    pub fn max_upload_bytes(&self) -> u64 {
        self.max_upload_bytes
    }

    fn emit(&self, event: StorageEvent) {
        let _ = self.client.event_bus().emit(CoreEvent::Storage(event));
    }

    #[instrument(skip(self))]
    pub async fn list_buckets(&self) -> Result<Vec<Bucket>> {
        let buckets: Vec<Bucket> = self.client.get_json(BUCKETS_PATH).await?;
        debug!(count = buckets.len(), "Listed buckets");
        Ok(buckets)
    }

    #[instrument(skip(self))]
    pub async fn get_bucket(&self, bucket_id: i64) -> Result<Bucket> {
        Ok(self.client.get_json(&bucket_path(bucket_id)).await?)
    }

    #[instrument(skip(self, request), fields(name = %request.name))]
    pub async fn create_bucket(&self, request: &CreateBucket) -> Result<Bucket> {
        let name = request.name.trim();
        if name.is_empty() {
            return Err(StorageError::InvalidInput(
                "bucket name cannot be empty".to_string(),
            ));
        }
        if request.storage_limit == Some(0) {
            return Err(StorageError::InvalidInput(
                "storage limit must be greater than zero".to_string(),
            ));
        }

        let body = CreateBucket {
            name: name.to_string(),
            ..request.clone()
        };
        let bucket: Bucket = self.client.post_json(BUCKETS_PATH, &body).await?;

        info!(bucket_id = bucket.id, "Bucket created");
        self.emit(StorageEvent::BucketCreated {
            bucket_id: bucket.id,
            name: bucket.name.clone(),
        });
        Ok(bucket)
    }

    #[instrument(skip(self, update))]
    pub async fn update_bucket(&self, bucket_id: i64, update: &UpdateBucket) -> Result<Bucket> {
        if update.is_empty() {
            return Err(StorageError::InvalidInput(
                "nothing to update".to_string(),
            ));
        }
        if matches!(update.name.as_deref(), Some(name) if name.trim().is_empty()) {
            return Err(StorageError::InvalidInput(
                "bucket name cannot be empty".to_string(),
            ));
        }

        let bucket: Bucket = self
            .client
            .patch_json(&bucket_path(bucket_id), update)
            .await?;

        self.emit(StorageEvent::BucketUpdated { bucket_id });
        Ok(bucket)
    }

    #[instrument(skip(self))]
    pub async fn delete_bucket(&self, bucket_id: i64) -> Result<()> {
        self.client.delete(&bucket_path(bucket_id)).await?;

        info!("Bucket deleted");
        self.emit(StorageEvent::BucketDeleted { bucket_id });
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn list_files(&self, bucket_id: i64) -> Result<Vec<StoredFile>> {
        let files: Vec<StoredFile> = self
            .client
            .get_json(&format!("{}/files", bucket_path(bucket_id)))
            .await?;
        debug!(count = files.len(), "Listed files");
        Ok(files)
    }

    /// Upload one file as multipart field `file`.
    ///
    /// Files over the configured limit are rejected before any request is
    /// made.
    #[instrument(skip(self, content), fields(size = content.len()))]
    pub async fn upload_file(
        &self,
        bucket_id: i64,
        file_name: &str,
        content_type: Option<&str>,
        content: Bytes,
    ) -> Result<StoredFile> {
        if file_name.trim().is_empty() {
            return Err(StorageError::InvalidInput(
                "file name cannot be empty".to_string(),
            ));
        }

        let size = content.len() as u64;
        if size > self.max_upload_bytes {
            warn!(limit = self.max_upload_bytes, "Upload rejected, file too large");
            return Err(StorageError::FileTooLarge {
                file_name: file_name.to_string(),
                size,
                limit: self.max_upload_bytes,
            });
        }

        let boundary = format!("----storage-client-{}", uuid::Uuid::new_v4().simple());
        let body = multipart_body(
            &boundary,
            file_name,
            content_type.unwrap_or(DEFAULT_UPLOAD_CONTENT_TYPE),
            &content,
        );

        let request = HttpRequest::post(format!("{}/files", bucket_path(bucket_id)))
            .header(
                CONTENT_TYPE,
                format!("multipart/form-data; boundary={}", boundary),
            )
            .body(body);

        let response = self.client.send(request).await?;
        let file: StoredFile = parse(&response)?;

        info!(file_id = file.id, "File uploaded");
        self.emit(StorageEvent::FileUploaded {
            bucket_id,
            file_id: file.id,
            size: file.file_size.unwrap_or(size),
        });
        Ok(file)
    }

    #[instrument(skip(self))]
    pub async fn download_file(&self, file_id: i64) -> Result<DownloadedFile> {
        let response = self
            .client
            .send(HttpRequest::get(format!("{}/download", file_path(file_id))))
            .await?;

        let file_name = response
            .header("Content-Disposition")
            .and_then(filename_from_disposition)
            .unwrap_or_else(|| format!("file-{}", file_id));

        debug!(bytes = response.body.len(), "File downloaded");
        Ok(DownloadedFile {
            file_name,
            content_type: response.header(CONTENT_TYPE).map(String::from),
            bytes: response.body,
        })
    }

    #[instrument(skip(self))]
    pub async fn delete_file(&self, file_id: i64) -> Result<()> {
        self.client.delete(&file_path(file_id)).await?;

        info!("File deleted");
        self.emit(StorageEvent::FileDeleted { file_id });
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn move_file(&self, file_id: i64, target_bucket_id: i64) -> Result<StoredFile> {
        let path = format!("{}/move/{}", file_path(file_id), target_bucket_id);
        let response = self.client.send(HttpRequest::patch(path)).await?;
        let file: StoredFile = parse(&response)?;

        info!("File moved");
        self.emit(StorageEvent::FileMoved {
            file_id,
            target_bucket_id,
        });
        Ok(file)
    }
}

fn bucket_path(bucket_id: i64) -> String {
    format!("{}/{}", BUCKETS_PATH, bucket_id)
}

fn file_path(file_id: i64) -> String {
    format!("/api/files/{}", file_id)
}

fn parse<T: DeserializeOwned>(response: &HttpResponse) -> Result<T> {
    response
        .json()
        .map_err(|e| StorageError::ParseError(e.to_string()))
}

/// Single-part `multipart/form-data` body.
fn multipart_body(boundary: &str, file_name: &str, content_type: &str, content: &[u8]) -> Bytes {
    // quotes and line breaks would end the header value early
    let safe_name: String = file_name
        .chars()
        .filter(|c| *c != '\r' && *c != '\n')
        .map(|c| if c == '"' { '\'' } else { c })
        .collect();

    let head = format!(
        "--{boundary}\r\nContent-Disposition: form-data; name=\"{field}\"; filename=\"{name}\"\r\nContent-Type: {content_type}\r\n\r\n",
        boundary = boundary,
        field = UPLOAD_FIELD,
        name = safe_name,
        content_type = content_type,
    );
    let tail = format!("\r\n--{}--\r\n", boundary);

    let mut body = BytesMut::with_capacity(head.len() + content.len() + tail.len());
    body.put_slice(head.as_bytes());
    body.put_slice(content);
    body.put_slice(tail.as_bytes());
    body.freeze()
}

/// File name from a `Content-Disposition` header. `filename*` (RFC 5987)
/// wins over `filename`.
fn filename_from_disposition(header: &str) -> Option<String> {
    let mut plain = None;

    for part in header.split(';').map(str::trim) {
        let Some((key, value)) = part.split_once('=') else {
            continue;
        };
        match key.trim().to_ascii_lowercase().as_str() {
            "filename*" => {
                let encoded = value.trim().trim_matches('"');
                let encoded = encoded
                    .split_once("''")
                    .map(|(_, rest)| rest)
                    .unwrap_or(encoded);
                if let Ok(decoded) = urlencoding::decode(encoded) {
                    if !decoded.is_empty() {
                        return Some(decoded.into_owned());
                    }
                }
            }
            "filename" => {
                let name = value.trim().trim_matches('"');
                if !name.is_empty() {
                    plain = Some(name.to_string());
                }
            }
            _ => {}
        }
    }

    plain
}
