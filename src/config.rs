use crate::services::{auth::FIREBASE_JWKS_URL, object_store::S3Settings};
use anyhow::{Context, Result, bail};
use clap::Parser;
use std::{env, fmt};

/// Where uploaded videos are kept.
#[derive(Clone)]
pub enum StorageBackend {
    Local {
        storage_dir: String,
        public_base_url: String,
    },
    S3(S3Settings),
}

/// How bearer tokens are verified.
#[derive(Clone)]
pub enum AuthMode {
    Firebase { project_id: String, jwks_url: String },
    SharedSecret(String),
}

/// What the binary should do after parsing its configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mode {
    Serve,
    Migrate,
    IssueToken(String),
}

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub database_url: String,
    pub upload_tmp_dir: String,
    pub max_upload_bytes: u64,
    pub storage: StorageBackend,
    pub auth: AuthMode,
    pub worker_token: Option<String>,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug, Default)]
#[command(author, version, about = "Shooting-form video upload API")]
pub struct Args {
    /// Host to bind to (overrides SHOTFORM_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides SHOTFORM_PORT / PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Database URL (overrides SHOTFORM_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Directory for spooled uploads (overrides SHOTFORM_UPLOAD_TMP_DIR)
    #[arg(long)]
    pub upload_tmp_dir: Option<String>,

    /// Maximum video size in bytes (overrides SHOTFORM_MAX_UPLOAD_BYTES)
    #[arg(long)]
    pub max_upload_bytes: Option<u64>,

    /// Storage backend, `local` or `s3` (overrides SHOTFORM_STORAGE)
    #[arg(long)]
    pub storage: Option<String>,

    /// Directory where objects are stored by the local backend (overrides SHOTFORM_STORAGE_DIR)
    #[arg(long)]
    pub storage_dir: Option<String>,

    /// URL prefix for locally stored objects (overrides SHOTFORM_PUBLIC_BASE_URL)
    #[arg(long)]
    pub public_base_url: Option<String>,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,

    /// Print a development token for this uid and exit (shared-secret auth only)
    #[arg(long, value_name = "UID")]
    pub issue_token: Option<String>,
}

pub const DEFAULT_MAX_UPLOAD_BYTES: u64 = 100 * 1024 * 1024;

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and run mode.
    pub fn from_env_and_args() -> Result<(Self, Mode)> {
        // Parse CLI once
        let args = Args::parse();
        Self::resolve(args, |name| env::var(name).ok())
    }

    /// Merge `args` over values looked up with `var`, then over defaults.
    pub fn resolve(args: Args, var: impl Fn(&str) -> Option<String>) -> Result<(Self, Mode)> {
        let non_empty = |name: &str| var(name).filter(|v| !v.trim().is_empty());

        let env_port = match non_empty("SHOTFORM_PORT").or_else(|| non_empty("PORT")) {
            Some(value) => value
                .parse::<u16>()
                .with_context(|| format!("parsing SHOTFORM_PORT value `{}`", value))?,
            None => 5000,
        };
        let port = args.port.unwrap_or(env_port);

        let env_max_upload = match non_empty("SHOTFORM_MAX_UPLOAD_BYTES") {
            Some(value) => value
                .parse::<u64>()
                .with_context(|| format!("parsing SHOTFORM_MAX_UPLOAD_BYTES value `{}`", value))?,
            None => DEFAULT_MAX_UPLOAD_BYTES,
        };

        let storage_kind = args
            .storage
            .or_else(|| non_empty("SHOTFORM_STORAGE"))
            .unwrap_or_else(|| "local".into())
            .to_ascii_lowercase();
        let storage = match storage_kind.as_str() {
            "local" => StorageBackend::Local {
                storage_dir: args
                    .storage_dir
                    .or_else(|| non_empty("SHOTFORM_STORAGE_DIR"))
                    .unwrap_or_else(|| "./data/objects".into()),
                public_base_url: args
                    .public_base_url
                    .or_else(|| non_empty("SHOTFORM_PUBLIC_BASE_URL"))
                    .unwrap_or_else(|| format!("http://localhost:{}/objects", port)),
            },
            "s3" => {
                let required = |name: &str| {
                    non_empty(name).with_context(|| format!("{} is required for s3 storage", name))
                };
                StorageBackend::S3(S3Settings {
                    region: required("AWS_REGION")?,
                    bucket: required("S3_BUCKET_NAME")?,
                    access_key_id: required("AWS_ACCESS_KEY_ID")?,
                    secret_access_key: required("AWS_SECRET_ACCESS_KEY")?,
                    endpoint: non_empty("S3_ENDPOINT"),
                })
            }
            other => bail!("unknown storage backend `{}` (expected `local` or `s3`)", other),
        };

        let auth = match (non_empty("FIREBASE_PROJECT_ID"), non_empty("SHOTFORM_AUTH_SECRET")) {
            (Some(project_id), _) => AuthMode::Firebase {
                project_id,
                jwks_url: non_empty("FIREBASE_JWKS_URL")
                    .unwrap_or_else(|| FIREBASE_JWKS_URL.to_string()),
            },
            (None, Some(secret)) => AuthMode::SharedSecret(secret),
            (None, None) => {
                bail!("set FIREBASE_PROJECT_ID or SHOTFORM_AUTH_SECRET to configure token verification")
            }
        };

        let mode = if let Some(uid) = args.issue_token {
            if !matches!(auth, AuthMode::SharedSecret(_)) {
                bail!("--issue-token requires SHOTFORM_AUTH_SECRET and no FIREBASE_PROJECT_ID");
            }
            Mode::IssueToken(uid)
        } else if args.migrate {
            Mode::Migrate
        } else {
            Mode::Serve
        };

        // --- Merge ---
        let cfg = Self {
            host: args
                .host
                .or_else(|| non_empty("SHOTFORM_HOST"))
                .unwrap_or_else(|| "0.0.0.0".into()),
            port,
            database_url: args
                .database_url
                .or_else(|| non_empty("SHOTFORM_DATABASE_URL"))
                .unwrap_or_else(|| "sqlite://./data/meta/shotform.db".into()),
            upload_tmp_dir: args
                .upload_tmp_dir
                .or_else(|| non_empty("SHOTFORM_UPLOAD_TMP_DIR"))
                .unwrap_or_else(|| "./data/uploads".into()),
            max_upload_bytes: args.max_upload_bytes.unwrap_or(env_max_upload),
            storage,
            auth,
            worker_token: non_empty("SHOTFORM_WORKER_TOKEN"),
        };

        Ok((cfg, mode))
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let storage = match &self.storage {
            StorageBackend::Local {
                storage_dir,
                public_base_url,
            } => format!("local({}, {})", storage_dir, public_base_url),
            StorageBackend::S3(s3) => format!(
                "s3(bucket={}, region={}, endpoint={:?})",
                s3.bucket, s3.region, s3.endpoint
            ),
        };
        let auth = match &self.auth {
            AuthMode::Firebase { project_id, .. } => format!("firebase({})", project_id),
            AuthMode::SharedSecret(_) => "shared-secret(<redacted>)".to_string(),
        };

        f.debug_struct("AppConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database_url", &self.database_url)
            .field("upload_tmp_dir", &self.upload_tmp_dir)
            .field("max_upload_bytes", &self.max_upload_bytes)
            .field("storage", &storage)
            .field("auth", &auth)
            .field("worker_callback", &self.worker_token.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn defaults_with_shared_secret() {
        let (cfg, mode) =
            AppConfig::resolve(Args::default(), lookup(&[("SHOTFORM_AUTH_SECRET", "s3cret")]))
                .unwrap();

        assert_eq!(mode, Mode::Serve);
        assert_eq!(cfg.addr(), "0.0.0.0:5000");
        assert_eq!(cfg.max_upload_bytes, 104_857_600);
        assert!(matches!(cfg.auth, AuthMode::SharedSecret(ref s) if s == "s3cret"));
        match &cfg.storage {
            StorageBackend::Local {
                storage_dir,
                public_base_url,
            } => {
                assert_eq!(storage_dir, "./data/objects");
                assert_eq!(public_base_url, "http://localhost:5000/objects");
            }
            StorageBackend::S3(_) => panic!("expected local storage"),
        }
        assert!(cfg.worker_token.is_none());
        assert!(!format!("{:?}", cfg).contains("s3cret"));
    }

    #[test]
    fn args_override_env() {
        let args = Args {
            port: Some(8080),
            max_upload_bytes: Some(10),
            migrate: true,
            ..Args::default()
        };
        let (cfg, mode) = AppConfig::resolve(
            args,
            lookup(&[
                ("SHOTFORM_PORT", "9000"),
                ("SHOTFORM_MAX_UPLOAD_BYTES", "20"),
                ("FIREBASE_PROJECT_ID", "hoops"),
            ]),
        )
        .unwrap();

        assert_eq!(mode, Mode::Migrate);
        assert_eq!(cfg.port, 8080);
        assert_eq!(cfg.max_upload_bytes, 10);
        match cfg.auth {
            AuthMode::Firebase {
                project_id,
                jwks_url,
            } => {
                assert_eq!(project_id, "hoops");
                assert_eq!(jwks_url, FIREBASE_JWKS_URL);
            }
            AuthMode::SharedSecret(_) => panic!("expected firebase auth"),
        }
    }

    #[test]
    fn s3_requires_credentials() {
        let env = lookup(&[
            ("SHOTFORM_AUTH_SECRET", "x"),
            ("SHOTFORM_STORAGE", "s3"),
            ("AWS_REGION", "ap-northeast-2"),
            ("S3_BUCKET_NAME", "shots"),
        ]);
        let err = AppConfig::resolve(Args::default(), env).unwrap_err();
        assert!(err.to_string().contains("AWS_ACCESS_KEY_ID"));
    }

    #[test]
    fn rejects_bad_values() {
        assert!(AppConfig::resolve(Args::default(), lookup(&[])).is_err());
        assert!(
            AppConfig::resolve(
                Args::default(),
                lookup(&[("SHOTFORM_AUTH_SECRET", "x"), ("SHOTFORM_PORT", "http")])
            )
            .is_err()
        );
        let args = Args {
            issue_token: Some("uid".into()),
            ..Args::default()
        };
        assert!(AppConfig::resolve(args, lookup(&[("FIREBASE_PROJECT_ID", "p")])).is_err());
    }
}
