//! Bearer-token verification.
//!
//! Production tokens are Firebase ID tokens: RS256 JWTs whose signing keys
//! are published as a JWK set. Local development can use HS256 tokens signed
//! with a shared secret instead. Either way the result is an `AuthUser` that
//! `require_auth` puts into the request extensions.

use crate::errors::AppError;
use async_trait::async_trait;
use axum::{
    extract::{Request, State},
    http::{HeaderMap, header},
    middleware::Next,
    response::Response,
};
use chrono::{Duration, Utc};
use jsonwebtoken::{
    Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, decode_header, encode,
    jwk::JwkSet,
};
use serde::{Deserialize, Serialize};
use std::{sync::Arc, time};
use thiserror::Error;

/// Google's published signing keys for Firebase ID tokens.
pub const FIREBASE_JWKS_URL: &str =
    "https://www.googleapis.com/service_accounts/v1/jwk/securetoken@system.gserviceaccount.com";

const FIREBASE_ISSUER_PREFIX: &str = "https://securetoken.google.com/";

/// Upper bound on one JWK set fetch, connect included.
pub const JWKS_FETCH_TIMEOUT: time::Duration = time::Duration::from_secs(10);
const JWKS_CONNECT_TIMEOUT: time::Duration = time::Duration::from_secs(5);

/// Identity of a verified caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthUser {
    /// Stable user id (the token's `sub`).
    pub uid: String,
    pub email: Option<String>,
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("missing bearer token")]
    MissingToken,
    #[error("invalid token: {0}")]
    InvalidToken(String),
    #[error("no signing key with id `{0}`")]
    UnknownKey(String),
    #[error("failed to fetch signing keys: {0}")]
    KeyFetch(String),
}

/// JWT claims read from user tokens.
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub exp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

impl TryFrom<Claims> for AuthUser {
    type Error = AuthError;

    fn try_from(claims: Claims) -> Result<Self, Self::Error> {
        if claims.sub.trim().is_empty() {
            return Err(AuthError::InvalidToken("empty subject".into()));
        }
        Ok(AuthUser {
            uid: claims.sub,
            email: claims.email,
        })
    }
}

#[async_trait]
pub trait TokenVerifier: Send + Sync {
    async fn verify(&self, token: &str) -> Result<AuthUser, AuthError>;
}

/// Verifies Firebase ID tokens for one project.
///
/// Signing keys are fetched for every verification. A fetch that does not
/// finish within the timeout fails as `KeyFetch`.
pub struct FirebaseVerifier {
    project_id: String,
    jwks_url: String,
    http: reqwest::Client,
}

impl FirebaseVerifier {
    pub fn new(
        project_id: impl Into<String>,
        jwks_url: impl Into<String>,
    ) -> Result<Self, AuthError> {
        Self::with_timeout(project_id, jwks_url, JWKS_FETCH_TIMEOUT)
    }

    pub fn with_timeout(
        project_id: impl Into<String>,
        jwks_url: impl Into<String>,
        timeout: time::Duration,
    ) -> Result<Self, AuthError> {
        let http = reqwest::Client::builder()
            .connect_timeout(timeout.min(JWKS_CONNECT_TIMEOUT))
            .timeout(timeout)
            .build()
            .map_err(|e| AuthError::KeyFetch(e.to_string()))?;

        Ok(Self {
            project_id: project_id.into(),
            jwks_url: jwks_url.into(),
            http,
        })
    }

    async fn fetch_keys(&self) -> Result<JwkSet, AuthError> {
        self.http
            .get(&self.jwks_url)
            .send()
            .await
            .and_then(|resp| resp.error_for_status())
            .map_err(|e| AuthError::KeyFetch(e.to_string()))?
            .json::<JwkSet>()
            .await
            .map_err(|e| AuthError::KeyFetch(e.to_string()))
    }
}

#[async_trait]
impl TokenVerifier for FirebaseVerifier {
    async fn verify(&self, token: &str) -> Result<AuthUser, AuthError> {
        let header = decode_header(token).map_err(|e| AuthError::InvalidToken(e.to_string()))?;
        if header.alg != Algorithm::RS256 {
            return Err(AuthError::InvalidToken(format!(
                "unexpected algorithm {:?}",
                header.alg
            )));
        }
        let kid = header
            .kid
            .ok_or_else(|| AuthError::InvalidToken("missing key id".into()))?;

        let keys = self.fetch_keys().await?;
        let jwk = keys.find(&kid).ok_or(AuthError::UnknownKey(kid.clone()))?;
        let key = DecodingKey::from_jwk(jwk).map_err(|e| AuthError::InvalidToken(e.to_string()))?;

        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_audience(&[&self.project_id]);
        validation.set_issuer(&[format!("{}{}", FIREBASE_ISSUER_PREFIX, self.project_id)]);
        validation.set_required_spec_claims(&["exp", "sub", "aud", "iss"]);

        let data = decode::<Claims>(token, &key, &validation)
            .map_err(|e| AuthError::InvalidToken(e.to_string()))?;
        AuthUser::try_from(data.claims)
    }
}

/// HS256 tokens signed with a shared secret. Meant for local development.
pub struct SharedSecretVerifier {
    decoding: DecodingKey,
    encoding: EncodingKey,
}

impl SharedSecretVerifier {
    pub fn new(secret: &[u8]) -> Self {
        Self {
            decoding: DecodingKey::from_secret(secret),
            encoding: EncodingKey::from_secret(secret),
        }
    }

    /// Mint a token for `uid` that expires after `ttl`.
    pub fn issue(&self, uid: &str, ttl: Duration) -> Result<String, AuthError> {
        let now = Utc::now();
        let claims = Claims {
            sub: uid.to_string(),
            exp: (now + ttl).timestamp(),
            iat: Some(now.timestamp()),
            email: None,
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| AuthError::InvalidToken(e.to_string()))
    }
}

#[async_trait]
impl TokenVerifier for SharedSecretVerifier {
    async fn verify(&self, token: &str) -> Result<AuthUser, AuthError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_required_spec_claims(&["exp", "sub"]);

        let data = decode::<Claims>(token, &self.decoding, &validation)
            .map_err(|e| AuthError::InvalidToken(e.to_string()))?;
        AuthUser::try_from(data.claims)
    }
}

/// Extract the token from an `Authorization: Bearer <token>` header.
pub fn bearer_token(headers: &HeaderMap) -> Result<&str, AuthError> {
    let value = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or(AuthError::MissingToken)?;
    let token = value
        .strip_prefix("Bearer ")
        .map(str::trim)
        .ok_or(AuthError::MissingToken)?;
    if token.is_empty() {
        return Err(AuthError::MissingToken);
    }
    Ok(token)
}

/// Reject the request unless it carries a verifiable bearer token.
///
/// Runs before the handler touches the body, so unauthenticated uploads are
/// never spooled.
pub async fn require_auth(
    State(verifier): State<Arc<dyn TokenVerifier>>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = bearer_token(req.headers())?.to_string();
    let user = verifier.verify(&token).await?;
    tracing::debug!("authenticated request for uid {}", user.uid);

    req.extensions_mut().insert(user);
    Ok(next.run(req).await)
}
