//! Upload-and-record pipeline.
//!
//! An upload is spooled to a local temp file (enforcing the size cap), pushed
//! to object storage, scored by the analyzer and recorded as one shot. If the
//! record cannot be written the stored object is deleted again.

use crate::{
    models::shot::{AnalysisUpdate, Handedness, NewShot, Shot},
    services::{
        analysis::{AnalysisResult, Analyzer},
        object_store::{ObjectStore, StorageError},
        shot_repository::{RepoError, RepoResult, ShotRepository},
    },
};
use axum::http::StatusCode;
use bytes::Bytes;
use chrono::Utc;
use futures::{Stream, StreamExt, pin_mut};
use std::{
    io,
    path::{Path, PathBuf},
    sync::{
        Arc,
        atomic::{AtomicI64, Ordering},
    },
};
use thiserror::Error;
use tokio::{fs, io::AsyncWriteExt};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

pub const DEFAULT_CONTENT_TYPE: &str = "video/mp4";
const MAX_FILE_NAME_LEN: usize = 200;

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("no file uploaded")]
    NoFile,
    #[error("more than one video field")]
    DuplicateVideo,
    #[error("invalid hand value `{0}`")]
    InvalidHand(String),
    #[error("upload exceeds {limit} bytes")]
    TooLarge { limit: u64 },
    #[error("malformed multipart body: {message}")]
    Multipart { status: StatusCode, message: String },
    #[error("failed to spool upload: {0}")]
    Spool(io::Error),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Repo(#[from] RepoError),
}

/// A video received from the client and parked on local disk.
#[derive(Debug)]
pub struct SpooledUpload {
    pub path: PathBuf,
    pub original_name: String,
    pub content_type: String,
    pub size_bytes: u64,
}

/// The parsed multipart form.
#[derive(Debug, Default)]
pub struct UploadForm {
    pub video: Option<SpooledUpload>,
    pub hand: Option<Handedness>,
}

#[derive(Debug)]
pub struct UploadOutcome {
    pub shot: Shot,
    pub storage_key: String,
    pub analysis: AnalysisResult,
}

#[derive(Clone)]
pub struct ShotService {
    pub store: Arc<dyn ObjectStore>,
    pub repo: ShotRepository,
    pub analyzer: Arc<dyn Analyzer>,
    pub upload_tmp_dir: PathBuf,
    pub max_upload_bytes: u64,
    /// Millisecond stamp of the last issued storage key.
    last_key_millis: Arc<AtomicI64>,
}

impl ShotService {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        repo: ShotRepository,
        analyzer: Arc<dyn Analyzer>,
        upload_tmp_dir: impl Into<PathBuf>,
        max_upload_bytes: u64,
    ) -> Self {
        Self {
            store,
            repo,
            analyzer,
            upload_tmp_dir: upload_tmp_dir.into(),
            max_upload_bytes,
            last_key_millis: Arc::new(AtomicI64::new(0)),
        }
    }

    /// Storage key for a new upload.
    ///
    /// Stamps are strictly increasing across clones of this service, so two
    /// uploads never share a key and a compensating delete only ever removes
    /// the object this upload wrote.
    pub fn next_storage_key(&self, original_name: &str) -> String {
        let now = Utc::now().timestamp_millis();
        let previous = match self.last_key_millis.fetch_update(
            Ordering::SeqCst,
            Ordering::SeqCst,
            |last| Some(now.max(last + 1)),
        ) {
            Ok(last) | Err(last) => last,
        };
        storage_key(now.max(previous + 1), original_name)
    }

    /// Write an incoming file stream to `upload_tmp_dir`.
    ///
    /// Fails with `TooLarge` as soon as the running size passes the cap. The
    /// partial file is removed on every error.
    pub async fn spool<S, E>(
        &self,
        stream: S,
        original_name: String,
        content_type: Option<String>,
    ) -> Result<SpooledUpload, UploadError>
    where
        S: Stream<Item = Result<Bytes, E>>,
        UploadError: From<E>,
    {
        fs::create_dir_all(&self.upload_tmp_dir)
            .await
            .map_err(UploadError::Spool)?;
        let path = self.upload_tmp_dir.join(format!("{}.part", Uuid::new_v4()));
        let mut file = fs::File::create(&path).await.map_err(UploadError::Spool)?;

        let mut size_bytes: u64 = 0;
        pin_mut!(stream);
        while let Some(chunk_res) = stream.next().await {
            let chunk = match chunk_res {
                Ok(chunk) => chunk,
                Err(err) => {
                    self.discard_spool(&path).await;
                    return Err(err.into());
                }
            };
            size_bytes += chunk.len() as u64;
            if size_bytes > self.max_upload_bytes {
                warn!(
                    "rejecting upload `{}`: exceeds {} bytes",
                    original_name, self.max_upload_bytes
                );
                drop(file);
                self.discard_spool(&path).await;
                return Err(UploadError::TooLarge {
                    limit: self.max_upload_bytes,
                });
            }
            if let Err(err) = file.write_all(&chunk).await {
                self.discard_spool(&path).await;
                return Err(UploadError::Spool(err));
            }
        }
        if let Err(err) = file.flush().await {
            self.discard_spool(&path).await;
            return Err(UploadError::Spool(err));
        }

        debug!("spooled `{}` ({} bytes) to {}", original_name, size_bytes, path.display());
        Ok(SpooledUpload {
            path,
            original_name,
            content_type: content_type
                .filter(|ct| !ct.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string()),
            size_bytes,
        })
    }

    /// Best-effort removal of a spooled file.
    pub async fn discard_spool(&self, path: &Path) {
        match fs::remove_file(path).await {
            Ok(_) => debug!("removed spooled file {}", path.display()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => warn!("failed to remove spooled file {}: {}", path.display(), err),
        }
    }

    /// Store the spooled video, analyze it and write the shot record.
    pub async fn process_upload(
        &self,
        owner: &str,
        form: UploadForm,
    ) -> Result<UploadOutcome, UploadError> {
        let video = match form.video {
            Some(video) if video.size_bytes > 0 => video,
            Some(empty) => {
                self.discard_spool(&empty.path).await;
                return Err(UploadError::NoFile);
            }
            None => return Err(UploadError::NoFile),
        };

        let storage_key = self.next_storage_key(&video.original_name);
        let stored = self
            .store
            .put_file(&storage_key, &video.path, &video.content_type)
            .await;
        self.discard_spool(&video.path).await;
        let stored = stored?;
        info!(
            "stored `{}` in {} storage ({} bytes, etag {})",
            stored.key,
            self.store.name(),
            stored.size_bytes,
            stored.etag.as_deref().unwrap_or("-")
        );

        let analysis = self.analyzer.analyze(&storage_key).await;

        let new_shot = NewShot {
            owner: owner.to_string(),
            storage_key: storage_key.clone(),
            source_url: self.store.public_url(&storage_key),
            content_type: video.content_type,
            size_bytes: stored.size_bytes,
            hand: form.hand,
            created_at: Utc::now(),
        };

        match self.repo.create(new_shot).await {
            Ok(shot) => {
                info!("recorded shot {} for {}", shot.id, owner);
                Ok(UploadOutcome {
                    shot,
                    storage_key,
                    analysis,
                })
            }
            Err(err) => {
                error!(
                    "failed to record shot for `{}`, removing stored object: {}",
                    storage_key, err
                );
                if let Err(delete_err) = self.store.delete(&storage_key).await {
                    error!("object `{}` left orphaned: {}", storage_key, delete_err);
                }
                Err(err.into())
            }
        }
    }

    pub async fn list_shots(&self, owner: &str) -> RepoResult<Vec<Shot>> {
        self.repo.list_for_owner(owner).await
    }

    pub async fn record_analysis(
        &self,
        owner: &str,
        id: Uuid,
        update: AnalysisUpdate,
    ) -> RepoResult<Shot> {
        self.repo.record_analysis(owner, id, update).await
    }
}

/// `videos/<unix millis>_<sanitized basename>`.
pub fn storage_key(millis: i64, original_name: &str) -> String {
    format!(
        "videos/{}_{}",
        millis,
        sanitize_file_name(original_name)
    )
}

/// Reduce a client-supplied file name to a safe basename.
pub fn sanitize_file_name(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
    let mut cleaned: String = base
        .chars()
        .map(|c| if c.is_control() { '_' } else { c })
        .collect();
    while cleaned.contains("..") {
        cleaned = cleaned.replace("..", ".");
    }
    let cleaned = cleaned.trim();
    if cleaned.is_empty() || cleaned == "." {
        return "video".to_string();
    }
    cleaned.chars().take(MAX_FILE_NAME_LEN).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::{
        analysis::FixedAnalyzer,
        object_store::{LocalObjectStore, ensure_key_safe},
    };

    #[test]
    fn sanitizes_file_names() {
        assert_eq!(sanitize_file_name("shot.mp4"), "shot.mp4");
        assert_eq!(sanitize_file_name("C:\\Users\\me\\shot.mp4"), "shot.mp4");
        assert_eq!(sanitize_file_name("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_file_name("a\u{0}b.mp4"), "a_b.mp4");
        assert_eq!(sanitize_file_name("my..clip.mp4"), "my.clip.mp4");
        assert_eq!(sanitize_file_name(".."), "video");
        assert_eq!(sanitize_file_name(""), "video");
        assert_eq!(sanitize_file_name(&"x".repeat(500)).len(), MAX_FILE_NAME_LEN);
    }

    #[test]
    fn storage_keys_are_timestamped_and_safe() {
        let key = storage_key(1_700_000_000_123, "dir/my shot.mov");
        assert_eq!(key, "videos/1700000000123_my shot.mov");
        assert!(ensure_key_safe(&key).is_ok());
        assert!(ensure_key_safe(&storage_key(1_700_000_000_123, "/..\\..")).is_ok());
    }

    fn key_millis(key: &str) -> i64 {
        key.trim_start_matches("videos/")
            .split('_')
            .next()
            .unwrap()
            .parse()
            .unwrap()
    }

    #[tokio::test]
    async fn same_name_keys_never_repeat() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(dir.path(), 1024).await;
        let other_handle = svc.clone();

        let keys: Vec<_> = (0..50)
            .map(|i| {
                if i % 2 == 0 {
                    svc.next_storage_key("shot.mp4")
                } else {
                    other_handle.next_storage_key("shot.mp4")
                }
            })
            .collect();

        for pair in keys.windows(2) {
            assert!(key_millis(&pair[0]) < key_millis(&pair[1]));
        }
        assert!(keys.iter().all(|k| k.ends_with("_shot.mp4")));
    }

    async fn service(dir: &Path, max_upload_bytes: u64) -> ShotService {
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        crate::db::run_migrations(&pool).await.unwrap();
        ShotService::new(
            Arc::new(LocalObjectStore::new(dir.join("objects"), "http://x/objects")),
            ShotRepository::new(Arc::new(pool)),
            Arc::new(FixedAnalyzer(64)),
            dir.join("tmp"),
            max_upload_bytes,
        )
    }

    fn chunks(parts: &[&'static [u8]]) -> impl Stream<Item = Result<Bytes, UploadError>> {
        futures::stream::iter(
            parts
                .iter()
                .map(|p| Ok(Bytes::from_static(*p)))
                .collect::<Vec<_>>(),
        )
    }

    async fn dir_is_empty(path: &Path) -> bool {
        match fs::read_dir(path).await {
            Ok(mut entries) => entries.next_entry().await.unwrap().is_none(),
            Err(_) => true,
        }
    }

    #[tokio::test]
    async fn spool_enforces_limit_and_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(dir.path(), 8).await;

        let result = svc
            .spool(chunks(&[b"12345", b"67890"]), "big.mp4".into(), None)
            .await;
        assert!(matches!(result, Err(UploadError::TooLarge { limit: 8 })));
        assert!(dir_is_empty(&dir.path().join("tmp")).await);
    }

    #[tokio::test]
    async fn spool_defaults_content_type() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(dir.path(), 1024).await;

        let spooled = svc
            .spool(chunks(&[b"abc"]), "a.mp4".into(), Some(String::new()))
            .await
            .unwrap();
        assert_eq!(spooled.content_type, DEFAULT_CONTENT_TYPE);
        assert_eq!(spooled.size_bytes, 3);
        svc.discard_spool(&spooled.path).await;
    }

    #[tokio::test]
    async fn process_upload_stores_and_records() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(dir.path(), 1024).await;

        let video = svc
            .spool(chunks(&[b"frame-data"]), "shot.mp4".into(), None)
            .await
            .unwrap();
        let outcome = svc
            .process_upload(
                "alice",
                UploadForm {
                    video: Some(video),
                    hand: Some(Handedness::Left),
                },
            )
            .await
            .unwrap();

        assert!(outcome.storage_key.starts_with("videos/"));
        assert!(outcome.storage_key.ends_with("_shot.mp4"));
        assert_eq!(outcome.analysis.score, 64);
        assert_eq!(outcome.shot.owner, "alice");
        assert_eq!(outcome.shot.size_bytes, 10);
        assert_eq!(outcome.shot.hand, Some(Handedness::Left));
        assert!(outcome.shot.score.is_none());
        assert!(outcome.shot.processed_url.is_none());
        assert_eq!(
            outcome.shot.source_url,
            format!("http://x/objects/{}", outcome.storage_key)
        );
        assert!(svc.store.open(&outcome.storage_key).await.is_ok());
        assert!(dir_is_empty(&dir.path().join("tmp")).await);
    }

    #[tokio::test]
    async fn missing_or_empty_video_is_no_file() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(dir.path(), 1024).await;

        let none = svc.process_upload("alice", UploadForm::default()).await;
        assert!(matches!(none, Err(UploadError::NoFile)));

        let empty = svc
            .spool(chunks(&[]), "empty.mp4".into(), None)
            .await
            .unwrap();
        let result = svc
            .process_upload(
                "alice",
                UploadForm {
                    video: Some(empty),
                    hand: None,
                },
            )
            .await;
        assert!(matches!(result, Err(UploadError::NoFile)));
        assert!(dir_is_empty(&dir.path().join("tmp")).await);
    }

    #[tokio::test]
    async fn failed_record_write_removes_stored_object() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(dir.path(), 1024).await;
        sqlx::query("DROP TABLE shots")
            .execute(&*svc.repo.db)
            .await
            .unwrap();

        let video = svc
            .spool(chunks(&[b"frame-data"]), "shot.mp4".into(), None)
            .await
            .unwrap();
        let result = svc
            .process_upload(
                "alice",
                UploadForm {
                    video: Some(video),
                    hand: None,
                },
            )
            .await;

        assert!(matches!(result, Err(UploadError::Repo(_))));
        assert!(dir_is_empty(&dir.path().join("objects")).await);
        assert!(dir_is_empty(&dir.path().join("tmp")).await);
    }

    #[tokio::test]
    async fn failed_record_write_keeps_earlier_same_name_object() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(dir.path(), 1024).await;

        let first = svc
            .spool(chunks(&[b"first"]), "shot.mp4".into(), None)
            .await
            .unwrap();
        let kept = svc
            .process_upload(
                "alice",
                UploadForm {
                    video: Some(first),
                    hand: None,
                },
            )
            .await
            .unwrap();

        sqlx::query("DROP TABLE shots")
            .execute(&*svc.repo.db)
            .await
            .unwrap();
        let second = svc
            .spool(chunks(&[b"second"]), "shot.mp4".into(), None)
            .await
            .unwrap();
        let result = svc
            .process_upload(
                "bob",
                UploadForm {
                    video: Some(second),
                    hand: None,
                },
            )
            .await;
        assert!(matches!(result, Err(UploadError::Repo(_))));

        let mut object = svc.store.open(&kept.storage_key).await.unwrap();
        let mut bytes = Vec::new();
        tokio::io::AsyncReadExt::read_to_end(&mut object.reader, &mut bytes)
            .await
            .unwrap();
        assert_eq!(bytes, b"first");
    }
}
