//! Object storage for uploaded videos.
//!
//! `LocalObjectStore` keeps payloads on disk sharded beneath
//! `base_path/{shard}/{shard}/{key}`. `S3ObjectStore` writes to an S3 bucket.
//! Both sit behind the `ObjectStore` trait so the upload pipeline does not
//! care where bytes end up.

use async_trait::async_trait;
use aws_sdk_s3::{
    config::{BehaviorVersion, Credentials, Region},
    primitives::ByteStream,
};
use bytes::Bytes;
use futures::{Stream, StreamExt, pin_mut};
use md5::Context;
use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
    pin::Pin,
};
use thiserror::Error;
use tokio::{
    fs::{self, File},
    io::{AsyncRead, AsyncWriteExt},
};
use tokio_util::io::ReaderStream;
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("invalid object key")]
    InvalidObjectKey,
    #[error("object `{0}` not found")]
    NotFound(String),
    #[error("storage backend error: {0}")]
    Backend(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type StorageResult<T> = Result<T, StorageError>;

/// What the store reports after a successful write.
#[derive(Debug, Clone)]
pub struct StoredObject {
    pub key: String,
    pub size_bytes: i64,
    pub etag: Option<String>,
}

/// Streaming reader over a stored payload.
pub struct ObjectReader {
    pub reader: Pin<Box<dyn AsyncRead + Send>>,
    pub content_length: Option<i64>,
    /// Content type reported by the backend, when it keeps one.
    pub content_type: Option<String>,
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Upload the file at `path` under `key`.
    async fn put_file(
        &self,
        key: &str,
        path: &Path,
        content_type: &str,
    ) -> StorageResult<StoredObject>;

    /// Open a stored object for reading.
    async fn open(&self, key: &str) -> StorageResult<ObjectReader>;

    /// Remove `key`. Missing objects are not an error.
    async fn delete(&self, key: &str) -> StorageResult<()>;

    /// Public location of `key`, recorded as the shot's source URL.
    fn public_url(&self, key: &str) -> String;

    /// Cheap connectivity check used by `/readyz`.
    async fn probe(&self) -> StorageResult<()>;

    fn name(&self) -> &'static str;
}

const MAX_OBJECT_KEY_LEN: usize = 1024;

/// Basic key validation to avoid trivial path traversal vectors.
///
/// Rejects empty or overlong keys, keys that begin with `/`, and keys
/// containing `..`, backslashes or control bytes.
pub fn ensure_key_safe(key: &str) -> StorageResult<()> {
    if key.is_empty() || key.len() > MAX_OBJECT_KEY_LEN {
        return Err(StorageError::InvalidObjectKey);
    }
    if key.starts_with('/') || key.contains("..") {
        return Err(StorageError::InvalidObjectKey);
    }
    if key
        .bytes()
        .any(|b| b.is_ascii_control() || b == b'\\' || b == b'\0')
    {
        return Err(StorageError::InvalidObjectKey);
    }
    Ok(())
}

/// Best-effort content type from the key's extension.
pub fn content_type_for_key(key: &str) -> &'static str {
    let ext = key
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "mp4" | "m4v" => "video/mp4",
        "mov" => "video/quicktime",
        "webm" => "video/webm",
        "avi" => "video/x-msvideo",
        "mkv" => "video/x-matroska",
        _ => "application/octet-stream",
    }
}

/// Disk-backed store. Objects are not indexed anywhere else; the shot record
/// holds the key.
#[derive(Clone, Debug)]
pub struct LocalObjectStore {
    /// Base directory on disk where object payloads are stored.
    pub base_path: PathBuf,

    /// Prefix used to build public URLs, e.g. `http://localhost:5000/objects`.
    pub public_base_url: String,
}

impl LocalObjectStore {
    pub fn new(base_path: impl Into<PathBuf>, public_base_url: impl Into<String>) -> Self {
        Self {
            base_path: base_path.into(),
            public_base_url: public_base_url.into(),
        }
    }

    /// Generate two-level shard identifiers for an object key.
    ///
    /// Uses MD5(key) and returns the first two bytes as lowercase hex.
    fn object_shards(key: &str) -> (String, String) {
        let digest = md5::compute(key);
        (format!("{:02x}", digest[0]), format!("{:02x}", digest[1]))
    }

    /// Combines base_path/{shard}/{shard}/{key}. Parent directories may not
    /// exist yet.
    pub fn object_path(&self, key: &str) -> PathBuf {
        let (shard_a, shard_b) = Self::object_shards(key);
        let mut path = self.base_path.clone();
        path.push(shard_a);
        path.push(shard_b);
        path.push(key);
        path
    }

    /// Stream bytes to disk.
    ///
    /// Writes into a temporary sibling while computing MD5 and size, fsyncs,
    /// then renames into place. The temp file is removed on any error.
    pub async fn write_stream<S>(&self, key: &str, stream: S) -> StorageResult<StoredObject>
    where
        S: Stream<Item = io::Result<Bytes>> + Send,
    {
        ensure_key_safe(key)?;

        let file_path = self.object_path(key);
        let parent = file_path.parent().map(Path::to_path_buf).ok_or_else(|| {
            StorageError::Io(io::Error::new(
                ErrorKind::Other,
                "object path missing parent directory",
            ))
        })?;
        fs::create_dir_all(&parent).await?;
        let tmp_path = parent.join(format!(".tmp-{}", Uuid::new_v4()));
        let mut file = File::create(&tmp_path).await?;

        let mut size_bytes: i64 = 0;
        let mut digest = Context::new();
        pin_mut!(stream);
        while let Some(chunk_res) = stream.next().await {
            let chunk = match chunk_res {
                Ok(chunk) => chunk,
                Err(err) => {
                    let _ = fs::remove_file(&tmp_path).await;
                    return Err(StorageError::Io(err));
                }
            };
            size_bytes += chunk.len() as i64;
            digest.consume(&chunk);
            if let Err(err) = file.write_all(&chunk).await {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(StorageError::Io(err));
            }
        }
        if let Err(err) = file.flush().await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(StorageError::Io(err));
        }
        if let Err(err) = file.sync_all().await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(StorageError::Io(err));
        }
        drop(file);

        if let Err(err) = fs::rename(&tmp_path, &file_path).await {
            if err.kind() == ErrorKind::AlreadyExists {
                fs::remove_file(&file_path).await?;
                fs::rename(&tmp_path, &file_path).await?;
            } else {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(StorageError::Io(err));
            }
        }

        Ok(StoredObject {
            key: key.to_string(),
            size_bytes,
            etag: Some(format!("{:x}", digest.compute())),
        })
    }

    /// Remove empty directories from `start` up to, but excluding, `stop`.
    async fn prune_empty_dirs(&self, start: &Path, stop: &Path) {
        let mut current = start.to_path_buf();
        while current.starts_with(stop) && current != stop {
            match fs::remove_dir(&current).await {
                Ok(_) => {
                    if let Some(parent) = current.parent() {
                        current = parent.to_path_buf();
                    } else {
                        break;
                    }
                }
                Err(err) if err.kind() == ErrorKind::NotFound => break,
                Err(err) if err.kind() == ErrorKind::DirectoryNotEmpty => break,
                Err(err) => {
                    debug!("failed to prune directory {}: {}", current.display(), err);
                    break;
                }
            }
        }
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    async fn put_file(
        &self,
        key: &str,
        path: &Path,
        _content_type: &str,
    ) -> StorageResult<StoredObject> {
        let file = File::open(path).await?;
        self.write_stream(key, ReaderStream::new(file)).await
    }

    async fn open(&self, key: &str) -> StorageResult<ObjectReader> {
        ensure_key_safe(key)?;
        let file_path = self.object_path(key);
        let file = File::open(&file_path).await.map_err(|err| {
            if err.kind() == ErrorKind::NotFound {
                StorageError::NotFound(key.to_string())
            } else {
                StorageError::Io(err)
            }
        })?;
        let content_length = file.metadata().await.ok().map(|m| m.len() as i64);

        Ok(ObjectReader {
            reader: Box::pin(file),
            content_length,
            content_type: None,
        })
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        ensure_key_safe(key)?;
        let file_path = self.object_path(key);
        match fs::remove_file(&file_path).await {
            Ok(_) => debug!("removed physical file {}", file_path.display()),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("file {} already missing", file_path.display());
            }
            Err(err) => return Err(StorageError::Io(err)),
        }

        if let Some(parent) = file_path.parent() {
            self.prune_empty_dirs(parent, &self.base_path).await;
        }
        Ok(())
    }

    fn public_url(&self, key: &str) -> String {
        format!("{}/{}", self.public_base_url.trim_end_matches('/'), key)
    }

    /// Write/read/delete a marker file under `base_path`.
    async fn probe(&self) -> StorageResult<()> {
        fs::create_dir_all(&self.base_path).await?;
        let tmp_path = self.base_path.join(format!(".readyz-{}", Uuid::new_v4()));
        fs::write(&tmp_path, b"readyz").await?;
        let bytes = fs::read(&tmp_path).await;
        let _ = fs::remove_file(&tmp_path).await;
        if bytes? != b"readyz" {
            return Err(StorageError::Backend("file content mismatch".into()));
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "local"
    }
}

/// Settings for the S3 backend.
#[derive(Clone)]
pub struct S3Settings {
    pub region: String,
    pub bucket: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    /// Custom endpoint for S3-compatible services such as MinIO.
    pub endpoint: Option<String>,
}

/// S3-backed store using static credentials.
pub struct S3ObjectStore {
    client: aws_sdk_s3::Client,
    bucket: String,
    endpoint: Option<String>,
}

impl S3ObjectStore {
    pub fn new(settings: S3Settings) -> Self {
        let credentials = Credentials::new(
            settings.access_key_id,
            settings.secret_access_key,
            None,
            None,
            "static",
        );

        let mut config_builder = aws_sdk_s3::config::Builder::new()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(settings.region))
            .credentials_provider(credentials);

        if let Some(ep) = settings.endpoint.clone() {
            config_builder = config_builder.endpoint_url(ep).force_path_style(true);
        }

        let client = aws_sdk_s3::Client::from_conf(config_builder.build());

        Self {
            client,
            bucket: settings.bucket,
            endpoint: settings.endpoint,
        }
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn put_file(
        &self,
        key: &str,
        path: &Path,
        content_type: &str,
    ) -> StorageResult<StoredObject> {
        ensure_key_safe(key)?;
        let size_bytes = fs::metadata(path).await?.len() as i64;
        let body = ByteStream::from_path(path)
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        let output = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .body(body)
            .send()
            .await
            .map_err(|e| StorageError::Backend(e.into_service_error().to_string()))?;

        Ok(StoredObject {
            key: key.to_string(),
            size_bytes,
            etag: output.e_tag().map(|e| e.trim_matches('"').to_string()),
        })
    }

    async fn open(&self, key: &str) -> StorageResult<ObjectReader> {
        ensure_key_safe(key)?;
        let output = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                let service_error = e.into_service_error();
                if service_error.is_no_such_key() {
                    StorageError::NotFound(key.to_string())
                } else {
                    StorageError::Backend(service_error.to_string())
                }
            })?;
        let content_length = output.content_length();
        let content_type = output.content_type().map(str::to_string);

        Ok(ObjectReader {
            reader: Box::pin(output.body.into_async_read()),
            content_length,
            content_type,
        })
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        ensure_key_safe(key)?;
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| StorageError::Backend(e.into_service_error().to_string()))?;
        Ok(())
    }

    fn public_url(&self, key: &str) -> String {
        match &self.endpoint {
            Some(ep) => format!("{}/{}/{}", ep.trim_end_matches('/'), self.bucket, key),
            None => format!("https://{}.s3.amazonaws.com/{}", self.bucket, key),
        }
    }

    async fn probe(&self) -> StorageResult<()> {
        self.client
            .head_bucket()
            .bucket(&self.bucket)
            .send()
            .await
            .map_err(|e| StorageError::Backend(e.into_service_error().to_string()))?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "s3"
    }
}
