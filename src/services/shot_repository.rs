//! SQLite-backed persistence for shot records.

use crate::models::shot::{AnalysisUpdate, NewShot, Shot};
use chrono::Utc;
use sqlx::{SqlitePool, types::Json};
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("shot not found")]
    NotFound,
    #[error("shot has already been analyzed")]
    AlreadyAnalyzed,
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

pub type RepoResult<T> = Result<T, RepoError>;

const SHOT_COLUMNS: &str = "id, owner, storage_key, source_url, content_type, size_bytes, hand, \
     processed_url, score, analysis, created_at, analyzed_at";

#[derive(Clone)]
pub struct ShotRepository {
    pub db: Arc<SqlitePool>,
}

impl ShotRepository {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }

    /// Insert one record. Results from the ML step start out unset.
    pub async fn create(&self, shot: NewShot) -> RepoResult<Shot> {
        let sql = format!(
            "INSERT INTO shots (
                id, owner, storage_key, source_url, content_type, size_bytes, hand, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING {SHOT_COLUMNS}"
        );

        let created = sqlx::query_as::<_, Shot>(&sql)
            .bind(Uuid::new_v4())
            .bind(&shot.owner)
            .bind(&shot.storage_key)
            .bind(&shot.source_url)
            .bind(&shot.content_type)
            .bind(shot.size_bytes)
            .bind(shot.hand)
            .bind(shot.created_at)
            .fetch_one(&*self.db)
            .await?;

        Ok(created)
    }

    /// All records owned by `owner`, oldest first.
    pub async fn list_for_owner(&self, owner: &str) -> RepoResult<Vec<Shot>> {
        let sql = format!(
            "SELECT {SHOT_COLUMNS} FROM shots WHERE owner = ? ORDER BY created_at ASC, id ASC"
        );

        let shots = sqlx::query_as::<_, Shot>(&sql)
            .bind(owner)
            .fetch_all(&*self.db)
            .await?;

        Ok(shots)
    }

    /// Apply the ML worker's result. Only the first call for a record lands;
    /// later calls get `AlreadyAnalyzed`.
    pub async fn record_analysis(
        &self,
        owner: &str,
        id: Uuid,
        update: AnalysisUpdate,
    ) -> RepoResult<Shot> {
        let sql = format!(
            "UPDATE shots
             SET processed_url = ?, score = ?, analysis = ?, analyzed_at = ?
             WHERE id = ? AND owner = ? AND analyzed_at IS NULL
             RETURNING {SHOT_COLUMNS}"
        );

        let updated = sqlx::query_as::<_, Shot>(&sql)
            .bind(update.processed_url)
            .bind(update.score)
            .bind(update.analysis.map(Json))
            .bind(Utc::now())
            .bind(id)
            .bind(owner)
            .fetch_optional(&*self.db)
            .await?;

        if let Some(shot) = updated {
            return Ok(shot);
        }

        let exists: Option<i64> =
            sqlx::query_scalar("SELECT 1 FROM shots WHERE id = ? AND owner = ?")
                .bind(id)
                .bind(owner)
                .fetch_optional(&*self.db)
                .await?;

        match exists {
            Some(_) => Err(RepoError::AlreadyAnalyzed),
            None => Err(RepoError::NotFound),
        }
    }

    /// Content type recorded for the upload stored under `storage_key`.
    pub async fn content_type_for_key(&self, storage_key: &str) -> RepoResult<Option<String>> {
        let content_type: Option<String> = sqlx::query_scalar(
            "SELECT content_type FROM shots WHERE storage_key = ? ORDER BY created_at DESC LIMIT 1",
        )
        .bind(storage_key)
        .fetch_optional(&*self.db)
        .await?;

        Ok(content_type)
    }

    pub async fn ping(&self) -> RepoResult<()> {
        let v: i64 = sqlx::query_scalar("SELECT 1").fetch_one(&*self.db).await?;
        if v != 1 {
            return Err(RepoError::Sqlx(sqlx::Error::Protocol(format!(
                "unexpected result: {}",
                v
            ))));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{db, models::shot::Handedness};
    use chrono::{DateTime, Duration};
    use serde_json::json;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn repo() -> ShotRepository {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        db::run_migrations(&pool).await.unwrap();
        ShotRepository::new(Arc::new(pool))
    }

    fn new_shot(owner: &str, key: &str, created_at: DateTime<Utc>) -> NewShot {
        NewShot {
            owner: owner.into(),
            storage_key: key.into(),
            source_url: format!("http://localhost/objects/{}", key),
            content_type: "video/mp4".into(),
            size_bytes: 42,
            hand: Some(Handedness::Right),
            created_at,
        }
    }

    #[tokio::test]
    async fn create_starts_with_unset_results() {
        let repo = repo().await;
        let shot = repo
            .create(new_shot("alice", "videos/1_a.mp4", Utc::now()))
            .await
            .unwrap();

        assert_eq!(shot.owner, "alice");
        assert_eq!(shot.hand, Some(Handedness::Right));
        assert!(shot.score.is_none());
        assert!(shot.processed_url.is_none());
        assert!(shot.analysis.is_none());
        assert!(shot.analyzed_at.is_none());
    }

    #[tokio::test]
    async fn list_is_scoped_and_sorted_by_created_at() {
        let repo = repo().await;
        let base = Utc::now();
        repo.create(new_shot("alice", "videos/3.mp4", base + Duration::seconds(30)))
            .await
            .unwrap();
        repo.create(new_shot("bob", "videos/2.mp4", base + Duration::seconds(20)))
            .await
            .unwrap();
        repo.create(new_shot("alice", "videos/1.mp4", base + Duration::milliseconds(1500)))
            .await
            .unwrap();
        repo.create(new_shot("alice", "videos/0.mp4", base))
            .await
            .unwrap();

        let shots = repo.list_for_owner("alice").await.unwrap();
        let keys: Vec<_> = shots.iter().map(|s| s.storage_key.as_str()).collect();
        assert_eq!(keys, vec!["videos/0.mp4", "videos/1.mp4", "videos/3.mp4"]);
        assert!(shots.iter().all(|s| s.owner == "alice"));

        assert!(repo.list_for_owner("carol").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn analysis_is_recorded_once() {
        let repo = repo().await;
        let shot = repo
            .create(new_shot("alice", "videos/1.mp4", Utc::now()))
            .await
            .unwrap();

        let update = AnalysisUpdate {
            processed_url: Some("https://cdn.example/processed/1.mp4".into()),
            score: Some(87.5),
            analysis: Some(json!({ "elbow": "tucked" })),
        };
        let updated = repo
            .record_analysis("alice", shot.id, update.clone())
            .await
            .unwrap();
        assert_eq!(updated.score, Some(87.5));
        assert_eq!(
            updated.analysis.as_ref().map(|a| &a.0),
            Some(&json!({ "elbow": "tucked" }))
        );
        assert!(updated.analyzed_at.is_some());

        let again = repo.record_analysis("alice", shot.id, update.clone()).await;
        assert!(matches!(again, Err(RepoError::AlreadyAnalyzed)));

        let wrong_owner = repo.record_analysis("bob", shot.id, update).await;
        assert!(matches!(wrong_owner, Err(RepoError::NotFound)));
    }

    #[tokio::test]
    async fn content_type_is_looked_up_by_key() {
        let repo = repo().await;
        let mut shot = new_shot("alice", "videos/1_clip.bin", Utc::now());
        shot.content_type = "video/webm".into();
        repo.create(shot).await.unwrap();

        assert_eq!(
            repo.content_type_for_key("videos/1_clip.bin").await.unwrap(),
            Some("video/webm".to_string())
        );
        assert_eq!(repo.content_type_for_key("videos/missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn ping_works() {
        repo().await.ping().await.unwrap();
    }
}
