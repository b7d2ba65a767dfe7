//! Handler for `POST /3d/generate`.
//!
//! Runs submit, wait-for-terminal and materialize in sequence for one
//! uploaded image. Generation itself is never retried; a download failure
//! after a successful generation re-runs only the materialization.

use axum::extract::{Multipart, State};
use axum::Json;
use manara_core::asset::ResultAsset;
use manara_core::error::CoreError;
use manara_core::generation::{GenerationParams, ImageInput};
use manara_core::job::ProviderKind;
use manara_providers::provider::{wait_for_terminal, ProgressReporter};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::error::{AppError, AppResult};
use crate::response::SuccessResponse;
use crate::state::AppState;

/// Model name used when the form omits `name`.
pub const DEFAULT_MODEL_NAME: &str = "Untitled model";

/// Payload of a successful generation.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratedModel {
    pub glb_url: String,
    /// Same as `glb_url`; kept for clients reading the generic field.
    pub url: String,
    pub name: String,
    pub provider: ProviderKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mirror_url: Option<String>,
}

/// Parsed multipart form.
struct GenerateForm {
    image: Option<(String, String, Vec<u8>)>,
    name: Option<String>,
    params: Option<String>,
}

/// POST /3d/generate
///
/// Multipart fields: `image` (required file), `name` (optional text) and
/// `params` (optional JSON generation parameters).
pub async fn generate_model(
    State(state): State<AppState>,
    multipart: Multipart,
) -> AppResult<Json<SuccessResponse<GeneratedModel>>> {
    let form = read_form(multipart).await?;

    let (file_name, mime_type, bytes) = form
        .image
        .ok_or_else(|| AppError::BadRequest("Missing required 'image' field".into()))?;
    if bytes.len() > state.config.max_upload_bytes {
        return Err(AppError::Core(CoreError::Validation(format!(
            "Image exceeds the {} byte upload limit",
            state.config.max_upload_bytes
        ))));
    }
    let input = ImageInput::new(bytes, &mime_type, file_name)?;
    let params = match form.params.as_deref() {
        Some(raw) => GenerationParams::from_json(raw)?,
        None => GenerationParams::default(),
    };
    let name = form
        .name
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| DEFAULT_MODEL_NAME.to_string());

    let asset = run_generation(&state, &input, &params).await?;

    Ok(Json(SuccessResponse::new(GeneratedModel {
        glb_url: asset.public_url.clone(),
        url: asset.public_url.clone(),
        name,
        provider: asset.provider,
        mirror_url: asset.mirror.url().map(String::from),
    })))
}

async fn read_form(mut multipart: Multipart) -> AppResult<GenerateForm> {
    let mut form = GenerateForm {
        image: None,
        name: None,
        params: None,
    };

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(e.to_string()))?
    {
        let field_name = field.name().unwrap_or("").to_string();
        match field_name.as_str() {
            "image" => {
                let file_name = field.file_name().unwrap_or("image").to_string();
                let mime_type = field.content_type().unwrap_or("").to_string();
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| AppError::BadRequest(e.to_string()))?;
                form.image = Some((file_name, mime_type, data.to_vec()));
            }
            "name" | "params" => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| AppError::BadRequest(e.to_string()))?;
                if field_name == "name" {
                    form.name = Some(text);
                } else {
                    form.params = Some(text);
                }
            }
            _ => {}
        }
    }
    Ok(form)
}

/// Submit, wait, and materialize one job.
///
/// The job's cancellation token fires when this future is dropped, so a
/// client disconnect stops the poll or closes the event stream.
pub async fn run_generation(
    state: &AppState,
    input: &ImageInput,
    params: &GenerationParams,
) -> Result<ResultAsset, CoreError> {
    let provider = state.provider.as_ref();

    let submission = provider.submit(input, params).await?;
    let mut job = submission.into_job(provider.kind());
    tracing::info!(
        job_id = %job.job_id,
        provider = %job.provider,
        input = %job.input_asset_ref,
        "Generation job submitted",
    );

    let cancel = CancellationToken::new();
    let _cancel_on_drop = cancel.clone().drop_guard();
    let progress = ProgressReporter::log_only();

    let descriptor = wait_for_terminal(provider, &mut job, &progress, &cancel).await?;

    let attempts = state.config.materialize_attempts.max(1);
    let mut attempt = 1;
    loop {
        match state
            .materializer
            .materialize(&job, &descriptor, provider.artifact_bearer())
            .await
        {
            Err(err) if err.is_retryable() && attempt < attempts => {
                tracing::warn!(
                    job_id = %job.job_id,
                    attempt,
                    error = %err,
                    "Artifact download failed, retrying materialization",
                );
                attempt += 1;
            }
            result => return result,
        }
    }
}
