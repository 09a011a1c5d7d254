//! Serves stored videos so source URLs built by the local backend resolve.

use crate::{
    errors::AppError,
    services::object_store::{StorageError, content_type_for_key},
    state::AppState,
};
use axum::{
    body::Body,
    extract::{Path, State},
    http::{HeaderValue, StatusCode, header},
    response::Response,
};
use tokio_util::io::ReaderStream;

/// `GET /objects/{*key}` as a streaming response.
///
/// Content type comes from the backend, then from the shot record, then
/// from the key's extension.
pub async fn get_object(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Response, AppError> {
    let object = match state.shots.store.open(&key).await {
        Ok(object) => object,
        Err(StorageError::NotFound(_)) | Err(StorageError::InvalidObjectKey) => {
            return Err(AppError::not_found("Object not found"));
        }
        Err(err) => return Err(err.into()),
    };

    let content_type = match object.content_type {
        Some(content_type) => Some(content_type),
        None => state
            .shots
            .repo
            .content_type_for_key(&key)
            .await
            .unwrap_or_else(|err| {
                tracing::warn!("content type lookup for `{}` failed: {}", key, err);
                None
            }),
    };
    let content_type = content_type
        .and_then(|ct| HeaderValue::from_str(&ct).ok())
        .unwrap_or_else(|| HeaderValue::from_static(content_type_for_key(&key)));

    let body = Body::from_stream(ReaderStream::new(object.reader));
    let mut response = Response::new(body);
    *response.status_mut() = StatusCode::OK;

    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, content_type);
    if let Some(length) = object.content_length {
        if let Ok(value) = HeaderValue::from_str(&length.max(0).to_string()) {
            headers.insert(header::CONTENT_LENGTH, value);
        }
    }

    Ok(response)
}
