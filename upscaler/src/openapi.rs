//! OpenAPI documentation for the upscale API, served at `/api/openapi.json` and rendered at `/docs`.

use crate::api;
use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Upscaler API",
        description = "Validates an uploaded image and upscales it 2x with a hosted Real-ESRGAN model."
    ),
    paths(api::handlers::upscale::upscale),
    components(schemas(
        api::models::upscale::UpscaleRequest,
        api::models::upscale::UpscaleSuccess,
        api::models::upscale::UpscaleFailure,
        api::models::upscale::ErrorDetails,
        api::models::upscale::OutputFormat,
    )),
    tags(
        (name = "upscale", description = "Image upscaling"),
    )
)]
pub struct ApiDoc;
