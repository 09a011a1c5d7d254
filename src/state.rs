use crate::{
    config::{AppConfig, AuthMode, StorageBackend},
    services::{
        analysis::RandomAnalyzer,
        auth::{FirebaseVerifier, SharedSecretVerifier, TokenVerifier},
        object_store::{LocalObjectStore, ObjectStore, S3ObjectStore},
        shot_repository::ShotRepository,
        shot_service::ShotService,
    },
};
use anyhow::Result;
use sqlx::SqlitePool;
use std::sync::Arc;

/// Shared, read-only state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub shots: ShotService,
    pub verifier: Arc<dyn TokenVerifier>,
    /// Bearer token the ML worker presents when reporting results. The
    /// callback route is only mounted when this is set.
    pub worker_token: Option<String>,
}

impl AppState {
    /// Wire the production services described by `cfg`.
    pub fn from_config(cfg: &AppConfig, db: Arc<SqlitePool>) -> Result<Self> {
        let store: Arc<dyn ObjectStore> = match &cfg.storage {
            StorageBackend::Local {
                storage_dir,
                public_base_url,
            } => Arc::new(LocalObjectStore::new(storage_dir, public_base_url.clone())),
            StorageBackend::S3(settings) => Arc::new(S3ObjectStore::new(settings.clone())),
        };

        let verifier: Arc<dyn TokenVerifier> = match &cfg.auth {
            AuthMode::Firebase {
                project_id,
                jwks_url,
            } => Arc::new(FirebaseVerifier::new(project_id.clone(), jwks_url.clone())?),
            AuthMode::SharedSecret(secret) => Arc::new(SharedSecretVerifier::new(secret.as_bytes())),
        };

        let shots = ShotService::new(
            store,
            ShotRepository::new(db),
            Arc::new(RandomAnalyzer),
            &cfg.upload_tmp_dir,
            cfg.max_upload_bytes,
        );

        Ok(Self {
            shots,
            verifier,
            worker_token: cfg.worker_token.clone(),
        })
    }
}
