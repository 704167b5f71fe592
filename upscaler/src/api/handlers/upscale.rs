//! HTTP handler for the upscale endpoint.

use crate::AppState;
use crate::api::models::upscale::{ImageUrlField, UpscaleFailure, UpscaleRequest, UpscaleSuccess};
use crate::errors::{Error, Result};
use crate::upscale::{truncate_url, upscale_image};
use axum::{
    Json,
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode, header::USER_AGENT},
    response::{IntoResponse, Response},
};
use tracing::info;

#[utoipa::path(
    post,
    path = "/api/upscale",
    tag = "upscale",
    summary = "Upscale an image",
    description = "Fetches the image at `imageUrl`, checks that it is an image of at most 5MB and 2,096,704 pixels, \
and upscales it 2x with a hosted Real-ESRGAN model. The model call is abandoned after 45 seconds.",
    request_body = UpscaleRequest,
    responses(
        (status = 200, description = "Image upscaled", body = UpscaleSuccess),
        (status = 400, description = "Missing URL, failed validation, timeout or provider failure", body = UpscaleFailure),
        (status = 500, description = "Unexpected failure, including a body that is not JSON", body = UpscaleFailure),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn upscale(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Response {
    match handle(&state, &headers, &body).await {
        Ok(success) => (StatusCode::OK, Json(success)).into_response(),
        Err(error) => error.render(state.config.environment),
    }
}

async fn handle(state: &AppState, headers: &HeaderMap, body: &[u8]) -> Result<UpscaleSuccess> {
    // Accepted regardless of content-type, as long as it parses
    let request: UpscaleRequest = serde_json::from_slice(body).map_err(anyhow::Error::from)?;

    let user_agent = headers.get(USER_AGENT).and_then(|value| value.to_str().ok()).unwrap_or("unknown");
    let field = request.image_url_field();
    let logged_url = match &field {
        ImageUrlField::Url(url) => truncate_url(url),
        ImageUrlField::Missing => String::new(),
        ImageUrlField::Invalid(value) => truncate_url(&value.to_string()),
    };
    info!(user_agent, image_url = %logged_url, "Processing upscale request");

    let image_url = match field {
        ImageUrlField::Url(url) => url,
        ImageUrlField::Missing => return Err(Error::MissingImageUrl),
        ImageUrlField::Invalid(value) => {
            return Err(Error::validation(format!(
                "Invalid image URL: expected a string, got {}",
                truncate_url(&value.to_string())
            )));
        }
    };

    upscale_image(&state.validator, state.provider.clone(), state.config.upscale.timeout, image_url).await
}
