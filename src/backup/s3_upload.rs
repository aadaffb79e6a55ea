// mysqlbackup/src/backup/s3_upload.rs
use async_trait::async_trait;
use aws_sdk_s3 as s3;
use s3::config::Region;
use s3::error::DisplayErrorContext;
use s3::primitives::{ByteStream, Length};
use s3::types::{CompletedMultipartUpload, CompletedPart};
use std::path::{Path, PathBuf};
use tokio::task::JoinSet;

use crate::config::S3Config;
use crate::errors::{AppError, Result};

pub const MB: u64 = 1024 * 1024;
/// S3 rejects multipart uploads with more parts than this.
pub const MAX_PARTS: u64 = 10_000;

/// Durable write of a local file to an object key.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put(&self, path: &Path, key: &str) -> Result<()>;
}

/// Multipart tunables. Files above `multipart_threshold` are sent in
/// `multipart_chunksize` parts, at most `max_concurrency` at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferConfig {
    pub multipart_threshold: u64,
    pub multipart_chunksize: u64,
    pub max_concurrency: usize,
}

impl Default for TransferConfig {
    fn default() -> Self {
        TransferConfig {
            multipart_threshold: 15 * MB,
            multipart_chunksize: 15 * MB,
            max_concurrency: 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartRange {
    pub number: i32,
    pub offset: u64,
    pub length: u64,
}

impl TransferConfig {
    pub fn use_multipart(&self, file_len: u64) -> bool {
        file_len > self.multipart_threshold
    }

    /// Splits a file into 1-based numbered parts covering every byte once.
    ///
    /// The part size grows past `multipart_chunksize` when the file would
    /// otherwise need more than `MAX_PARTS` parts.
    pub fn part_ranges(&self, file_len: u64) -> Vec<PartRange> {
        let chunk = self
            .multipart_chunksize
            .max(file_len.div_ceil(MAX_PARTS))
            .max(1);
        (0..file_len.div_ceil(chunk))
            .map(|i| {
                let offset = i * chunk;
                PartRange {
                    number: i as i32 + 1,
                    offset,
                    length: chunk.min(file_len - offset),
                }
            })
            .collect()
    }
}

type ApiResult<T> = std::result::Result<T, String>;

/// Object storage calls made by [`S3Uploader`]. Errors are rendered messages.
#[async_trait]
pub trait StorageApi: Clone + Send + Sync + 'static {
    async fn put(&self, bucket: &str, key: &str, body: ByteStream) -> ApiResult<()>;

    /// Returns the upload id.
    async fn create_multipart(&self, bucket: &str, key: &str) -> ApiResult<String>;

    /// Returns the part's ETag.
    async fn put_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: i32,
        body: ByteStream,
    ) -> ApiResult<Option<String>>;

    async fn complete_multipart(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: Vec<CompletedPart>,
    ) -> ApiResult<()>;

    async fn abort_multipart(&self, bucket: &str, key: &str, upload_id: &str) -> ApiResult<()>;
}

#[async_trait]
impl StorageApi for s3::Client {
    async fn put(&self, bucket: &str, key: &str, body: ByteStream) -> ApiResult<()> {
        self.put_object()
            .bucket(bucket)
            .key(key)
            .body(body)
            .send()
            .await
            .map(|_| ())
            .map_err(|e| DisplayErrorContext(&e).to_string())
    }

    async fn create_multipart(&self, bucket: &str, key: &str) -> ApiResult<String> {
        let created = self
            .create_multipart_upload()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| DisplayErrorContext(&e).to_string())?;
        created
            .upload_id()
            .map(str::to_string)
            .ok_or_else(|| "Storage returned no multipart upload id".to_string())
    }

    async fn put_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: i32,
        body: ByteStream,
    ) -> ApiResult<Option<String>> {
        let output = self
            .upload_part()
            .bucket(bucket)
            .key(key)
            .upload_id(upload_id)
            .part_number(part_number)
            .body(body)
            .send()
            .await
            .map_err(|e| DisplayErrorContext(&e).to_string())?;
        Ok(output.e_tag().map(str::to_string))
    }

    async fn complete_multipart(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: Vec<CompletedPart>,
    ) -> ApiResult<()> {
        self.complete_multipart_upload()
            .bucket(bucket)
            .key(key)
            .upload_id(upload_id)
            .multipart_upload(
                CompletedMultipartUpload::builder()
                    .set_parts(Some(parts))
                    .build(),
            )
            .send()
            .await
            .map(|_| ())
            .map_err(|e| DisplayErrorContext(&e).to_string())
    }

    async fn abort_multipart(&self, bucket: &str, key: &str, upload_id: &str) -> ApiResult<()> {
        self.abort_multipart_upload()
            .bucket(bucket)
            .key(key)
            .upload_id(upload_id)
            .send()
            .await
            .map(|_| ())
            .map_err(|e| DisplayErrorContext(&e).to_string())
    }
}

/// Uploads to an S3-compatible object storage service.
#[derive(Debug, Clone)]
pub struct S3Uploader<C = s3::Client> {
    client: C,
    bucket: String,
    transfer: TransferConfig,
}

impl S3Uploader<s3::Client> {
    pub async fn new(s3_config: &S3Config) -> Self {
        let sdk_config = aws_config::defaults(s3::config::BehaviorVersion::latest())
            .endpoint_url(&s3_config.endpoint)
            .region(Region::new(s3_config.region.clone()))
            .credentials_provider(s3::config::Credentials::new(
                &s3_config.access_key,
                &s3_config.secret_key,
                None, // session_token
                None, // expiry
                "Static", // provider_name
            ))
            .load()
            .await;

        let client_config = s3::config::Builder::from(&sdk_config)
            .force_path_style(s3_config.force_path_style)
            .build();

        S3Uploader::with_client(
            s3::Client::from_conf(client_config),
            &s3_config.bucket,
            TransferConfig::default(),
        )
    }
}

impl<C: StorageApi> S3Uploader<C> {
    pub fn with_client(client: C, bucket: &str, transfer: TransferConfig) -> Self {
        S3Uploader {
            client,
            bucket: bucket.to_string(),
            transfer,
        }
    }

    async fn put_single(&self, path: &Path, key: &str) -> Result<()> {
        let body = ByteStream::from_path(path).await.map_err(|e| {
            AppError::upload(
                &self.bucket,
                key,
                format!("Failed to read {}: {}", path.display(), e),
            )
        })?;

        self.client
            .put(&self.bucket, key, body)
            .await
            .map_err(|message| AppError::upload(&self.bucket, key, message))
    }

    async fn put_multipart(&self, path: &Path, key: &str, file_len: u64) -> Result<()> {
        let upload_id = self
            .client
            .create_multipart(&self.bucket, key)
            .await
            .map_err(|message| AppError::upload(&self.bucket, key, message))?;

        let result = match self.upload_parts(path, key, &upload_id, file_len).await {
            Ok(parts) => self
                .client
                .complete_multipart(&self.bucket, key, &upload_id, parts)
                .await
                .map_err(|message| AppError::upload(&self.bucket, key, message)),
            Err(e) => Err(e),
        };

        if result.is_err() {
            if let Err(abort_err) = self.client.abort_multipart(&self.bucket, key, &upload_id).await {
                tracing::warn!(
                    key,
                    upload_id = %upload_id,
                    error = %abort_err,
                    "Failed to abort multipart upload"
                );
            }
        }
        result
    }

    async fn upload_parts(
        &self,
        path: &Path,
        key: &str,
        upload_id: &str,
        file_len: u64,
    ) -> Result<Vec<CompletedPart>> {
        let max_in_flight = self.transfer.max_concurrency.max(1);
        let mut in_flight = JoinSet::new();
        let mut completed = Vec::new();

        for part in self.transfer.part_ranges(file_len) {
            if in_flight.len() >= max_in_flight {
                if let Some(done) = in_flight.join_next().await {
                    completed.push(self.collect_part(key, done)?);
                }
            }
            in_flight.spawn(upload_part(
                self.client.clone(),
                self.bucket.clone(),
                key.to_string(),
                upload_id.to_string(),
                path.to_path_buf(),
                part,
            ));
        }
        while let Some(done) = in_flight.join_next().await {
            completed.push(self.collect_part(key, done)?);
        }

        // Parts finish in any order; completion needs them ascending.
        completed.sort_by_key(|p| p.part_number());
        Ok(completed)
    }

    fn collect_part(
        &self,
        key: &str,
        done: std::result::Result<ApiResult<CompletedPart>, tokio::task::JoinError>,
    ) -> Result<CompletedPart> {
        match done {
            Ok(Ok(part)) => Ok(part),
            Ok(Err(message)) => Err(AppError::upload(&self.bucket, key, message)),
            Err(e) => Err(AppError::upload(
                &self.bucket,
                key,
                format!("Part upload task failed: {}", e),
            )),
        }
    }
}

async fn upload_part<C: StorageApi>(
    client: C,
    bucket: String,
    key: String,
    upload_id: String,
    path: PathBuf,
    part: PartRange,
) -> ApiResult<CompletedPart> {
    let body = ByteStream::read_from()
        .path(&path)
        .offset(part.offset)
        .length(Length::Exact(part.length))
        .build()
        .await
        .map_err(|e| format!("Failed to read part {} of {}: {}", part.number, path.display(), e))?;

    let e_tag = client
        .put_part(&bucket, &key, &upload_id, part.number, body)
        .await
        .map_err(|message| format!("Part {} failed: {}", part.number, message))?;

    tracing::debug!(part = part.number, bytes = part.length, "Uploaded part");
    Ok(CompletedPart::builder()
        .set_e_tag(e_tag)
        .part_number(part.number)
        .build())
}

#[async_trait]
impl<C: StorageApi> ObjectStore for S3Uploader<C> {
    async fn put(&self, path: &Path, key: &str) -> Result<()> {
        let file_len = tokio::fs::metadata(path)
            .await
            .map_err(|e| {
                AppError::upload(
                    &self.bucket,
                    key,
                    format!("Failed to stat {}: {}", path.display(), e),
                )
            })?
            .len();

        tracing::info!(
            bucket = %self.bucket,
            key,
            bytes = file_len,
            "Uploading backup"
        );
        if self.transfer.use_multipart(file_len) {
            self.put_multipart(path, key, file_len).await?;
        } else {
            self.put_single(path, key).await?;
        }

        tracing::info!(bucket = %self.bucket, key, "Upload complete");
        Ok(())
    }
}
