use anyhow::Result;
use chrono::Duration;
use shotform::{
    AppState, build_router,
    config::{self, AuthMode, Mode},
    db,
    services::auth::SharedSecretVerifier,
};
use std::{io::ErrorKind, path::Path, sync::Arc};
use tokio::{fs, net::TcpListener};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // --- Parse config + run mode ---
    let (cfg, mode) = config::AppConfig::from_env_and_args()?;

    if let Mode::IssueToken(uid) = &mode {
        if let AuthMode::SharedSecret(secret) = &cfg.auth {
            let token = SharedSecretVerifier::new(secret.as_bytes()).issue(uid, Duration::days(7))?;
            println!("{}", token);
        }
        return Ok(());
    }

    tracing::info!("Starting shotform with config: {:?}", cfg);

    // --- Ensure spool directory exists ---
    if !Path::new(&cfg.upload_tmp_dir).exists() {
        fs::create_dir_all(&cfg.upload_tmp_dir).await?;
        tracing::info!("Created upload directory at {}", cfg.upload_tmp_dir);
    }

    // --- Initialize SQLite connection ---
    let pool = Arc::new(db::connect(&cfg.database_url).await?);
    db::run_migrations(&pool).await?;

    // --- Handle migration mode ---
    if mode == Mode::Migrate {
        tracing::info!("Database migration complete.");
        return Ok(()); // exit after migration
    }

    // --- Build router ---
    let state = AppState::from_config(&cfg, pool)?;
    let app = build_router(state);

    // --- Start server ---
    let addr = cfg.addr();
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err)
            if err.kind() == ErrorKind::PermissionDenied
                && matches!(cfg.host.as_str(), "0.0.0.0" | "::") =>
        {
            let fallback_addr = format!("127.0.0.1:{}", cfg.port);
            tracing::warn!(
                "Permission denied binding to {} ({}). Falling back to {}",
                addr,
                err,
                fallback_addr
            );
            TcpListener::bind(&fallback_addr).await?
        }
        Err(err) => return Err(err.into()),
    };

    tracing::info!("Server listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await?;

    Ok(())
}
