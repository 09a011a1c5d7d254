//! HTTP handlers for uploading and listing shots, plus the ML worker callback.

use crate::{
    errors::AppError,
    models::shot::{AnalysisUpdate, Handedness, Shot},
    services::{
        analysis::AnalysisResult,
        auth::{AuthUser, bearer_token},
        shot_service::{ShotService, UploadError, UploadForm},
    },
    state::AppState,
};
use axum::{
    Extension, Json,
    extract::{
        Multipart, Path, State,
        multipart::{MultipartError, MultipartRejection},
        rejection::JsonRejection,
    },
    http::HeaderMap,
};
use serde::Serialize;
use subtle::ConstantTimeEq;
use uuid::Uuid;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    pub message: String,
    #[serde(rename = "s3Key")]
    pub s3_key: String,
    pub shot_id: Uuid,
    pub analysis_result: AnalysisResult,
}

#[derive(Debug, Serialize)]
pub struct ShotsResponse {
    pub shots: Vec<Shot>,
}

impl From<MultipartError> for UploadError {
    fn from(err: MultipartError) -> Self {
        UploadError::Multipart {
            status: err.status(),
            message: err.body_text(),
        }
    }
}

/// `POST /api/upload-video`
///
/// Expects a `video` file field and an optional `hand` field.
pub async fn upload_video(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<UploadResponse>, AppError> {
    let mut multipart = multipart.map_err(|rejection| {
        AppError::new(rejection.status(), rejection.body_text())
    })?;

    let form = read_upload_form(&state.shots, &mut multipart).await?;
    let outcome = state.shots.process_upload(&user.uid, form).await?;

    Ok(Json(UploadResponse {
        message: "Upload & analysis success".into(),
        s3_key: outcome.storage_key,
        shot_id: outcome.shot.id,
        analysis_result: outcome.analysis,
    }))
}

/// Collect the form, removing any spooled video if a later field fails.
async fn read_upload_form(
    service: &ShotService,
    multipart: &mut Multipart,
) -> Result<UploadForm, UploadError> {
    let mut form = UploadForm::default();
    match collect_fields(service, multipart, &mut form).await {
        Ok(()) => Ok(form),
        Err(err) => {
            if let Some(video) = form.video.take() {
                service.discard_spool(&video.path).await;
            }
            Err(err)
        }
    }
}

async fn collect_fields(
    service: &ShotService,
    multipart: &mut Multipart,
    form: &mut UploadForm,
) -> Result<(), UploadError> {
    while let Some(field) = multipart.next_field().await? {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("video") => {
                if form.video.is_some() {
                    return Err(UploadError::DuplicateVideo);
                }
                let original_name = field.file_name().unwrap_or_default().to_string();
                let content_type = field.content_type().map(str::to_string);
                form.video = Some(service.spool(field, original_name, content_type).await?);
            }
            Some("hand") => {
                let value = field.text().await?;
                if !value.trim().is_empty() {
                    let hand = value
                        .parse::<Handedness>()
                        .map_err(UploadError::InvalidHand)?;
                    form.hand = Some(hand);
                }
            }
            other => tracing::debug!("ignoring multipart field {:?}", other),
        }
    }
    Ok(())
}

/// `GET /api/user-shots`
pub async fn user_shots(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> Result<Json<ShotsResponse>, AppError> {
    let shots = state.shots.list_shots(&user.uid).await.map_err(|err| {
        tracing::error!("failed to list shots for {}: {}", user.uid, err);
        AppError::internal("Failed to fetch user shots")
    })?;

    Ok(Json(ShotsResponse { shots }))
}

/// `PUT /internal/shots/{owner}/{id}/analysis`
///
/// Called by the ML worker once it has scored a video.
pub async fn record_analysis(
    State(state): State<AppState>,
    Path((owner, id)): Path<(String, Uuid)>,
    headers: HeaderMap,
    payload: Result<Json<AnalysisUpdate>, JsonRejection>,
) -> Result<Json<Shot>, AppError> {
    let expected = state
        .worker_token
        .as_deref()
        .ok_or_else(|| AppError::not_found("Not found"))?;
    if !worker_token_matches(&headers, expected) {
        return Err(AppError::unauthorized("Invalid worker token"));
    }

    let Json(update) =
        payload.map_err(|rejection| AppError::bad_request(rejection.body_text()))?;
    // an empty update would still stamp `analyzed_at` and lock out the real result
    if update.is_empty() {
        return Err(AppError::bad_request(
            "provide at least one of processedUrl, score or analysis",
        ));
    }
    if let Some(score) = update.score {
        if !(0.0..=100.0).contains(&score) {
            return Err(AppError::bad_request("score must be within 0..=100"));
        }
    }

    let shot = state.shots.record_analysis(&owner, id, update).await?;
    tracing::info!("recorded analysis for shot {} ({})", shot.id, owner);
    Ok(Json(shot))
}

/// Constant-time check of the presented bearer token.
fn worker_token_matches(headers: &HeaderMap, expected: &str) -> bool {
    bearer_token(headers)
        .map(|token| bool::from(token.as_bytes().ct_eq(expected.as_bytes())))
        .unwrap_or(false)
}
