//! End-to-end tests: the full application with wiremock standing in for both the image host
//! and the Replicate API.

use crate::Application;
use crate::api::models::upscale::{OutputFormat, UpscaleFailure, UpscaleSuccess};
use crate::config::Config;
use crate::test_utils::{create_test_config, encode_image, mount_image};
use axum::http::{Method, StatusCode};
use axum_test::TestServer;
use serde_json::json;
use url::Url;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const OUTPUT_URL: &str = "https://replicate.delivery/pbxt/upscaled.png";

fn config_for(replicate: &MockServer) -> Config {
    let mut config = create_test_config();
    config.replicate.api_base = Url::parse(&format!("{}/v1/", replicate.uri())).unwrap();
    config
}

fn create_app(replicate: &MockServer) -> TestServer {
    Application::new(config_for(replicate))
        .expect("Failed to create application")
        .into_test_server()
}

/// Replicate answers the create call with an already settled prediction
async fn mount_prediction(replicate: &MockServer, output_format: &str, output: serde_json::Value) {
    Mock::given(method("POST"))
        .and(path("/v1/predictions"))
        .and(header("authorization", "Bearer r8_test_token"))
        .and(header("prefer", "wait"))
        .and(body_partial_json(json!({
            "input": { "scale": 2, "face_enhance": false, "tile": 0, "output_format": output_format }
        })))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "id": "gm3qorzdhgbfurvjtvhg6dckhu",
            "status": "succeeded",
            "output": output,
            "error": null,
            "urls": { "get": format!("{}/v1/predictions/gm3qorzdhgbfurvjtvhg6dckhu", replicate.uri()) }
        })))
        .expect(1)
        .mount(replicate)
        .await;
}

#[test_log::test(tokio::test)]
async fn test_jpeg_upscale_end_to_end() {
    let image_host = MockServer::start().await;
    let replicate = MockServer::start().await;
    let image_url = mount_image(&image_host, "/uploads/photo.jpg", encode_image(640, 480, image::ImageFormat::Jpeg), "image/jpeg").await;
    mount_prediction(&replicate, "jpg", json!(OUTPUT_URL)).await;

    let response = create_app(&replicate)
        .post("/api/upscale")
        .json(&json!({ "imageUrl": image_url }))
        .await;

    response.assert_status_ok();
    assert_eq!(response.header("cache-control"), "no-store");
    let success: UpscaleSuccess = response.json();
    assert_eq!(success, UpscaleSuccess::new(OUTPUT_URL, OutputFormat::Jpg));
}

#[test_log::test(tokio::test)]
async fn test_output_format_follows_content_type() {
    let image_host = MockServer::start().await;
    let replicate = MockServer::start().await;
    let png_url = mount_image(&image_host, "/a.png", encode_image(32, 32, image::ImageFormat::Png), "image/png").await;
    let webp_url = mount_image(&image_host, "/a.webp", encode_image(32, 32, image::ImageFormat::WebP), "image/webp").await;
    mount_prediction(&replicate, "png", json!(OUTPUT_URL)).await;
    mount_prediction(&replicate, "jpg", json!([OUTPUT_URL])).await;
    let server = create_app(&replicate);

    let png: UpscaleSuccess = server.post("/api/upscale").json(&json!({ "imageUrl": png_url })).await.json();
    assert_eq!(png.format, OutputFormat::Png);

    let webp: UpscaleSuccess = server.post("/api/upscale").json(&json!({ "imageUrl": webp_url })).await.json();
    assert_eq!(webp.format, OutputFormat::Jpg);
    assert_eq!(webp.url, OUTPUT_URL);
}

#[test_log::test(tokio::test)]
async fn test_polls_until_prediction_settles() {
    let image_host = MockServer::start().await;
    let replicate = MockServer::start().await;
    let image_url = mount_image(&image_host, "/photo.png", encode_image(64, 64, image::ImageFormat::Png), "image/png").await;
    let poll_url = format!("{}/v1/predictions/abc123", replicate.uri());

    Mock::given(method("POST"))
        .and(path("/v1/predictions"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "id": "abc123",
            "status": "processing",
            "output": null,
            "urls": { "get": poll_url }
        })))
        .mount(&replicate)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/predictions/abc123"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "abc123",
            "status": "succeeded",
            "output": OUTPUT_URL,
            "urls": { "get": poll_url }
        })))
        .mount(&replicate)
        .await;

    let response = create_app(&replicate)
        .post("/api/upscale")
        .json(&json!({ "imageUrl": image_url }))
        .await;

    response.assert_status_ok();
    let success: UpscaleSuccess = response.json();
    assert_eq!(success.url, OUTPUT_URL);
}

#[test_log::test(tokio::test)]
async fn test_non_image_is_rejected_before_the_provider() {
    let image_host = MockServer::start().await;
    let replicate = MockServer::start().await;
    let url = mount_image(&image_host, "/notes.txt", b"just some text".to_vec(), "text/plain").await;

    let response = create_app(&replicate).post("/api/upscale").json(&json!({ "imageUrl": url })).await;

    response.assert_status(StatusCode::BAD_REQUEST);
    let failure: UpscaleFailure = response.json();
    assert_eq!(failure.error, "Invalid file type. Only images are allowed.");
    assert_eq!(failure.details.unwrap().kind, "ValidationError");
    assert!(replicate.received_requests().await.unwrap().is_empty());
}

#[test_log::test(tokio::test)]
async fn test_oversized_file_is_rejected() {
    let image_host = MockServer::start().await;
    let replicate = MockServer::start().await;
    let url = mount_image(&image_host, "/huge.jpg", vec![0u8; 6 * 1024 * 1024], "image/jpeg").await;

    let response = create_app(&replicate).post("/api/upscale").json(&json!({ "imageUrl": url })).await;

    response.assert_status(StatusCode::BAD_REQUEST);
    let failure: UpscaleFailure = response.json();
    assert_eq!(failure.error, "File size exceeds 5MB limit");
    assert!(replicate.received_requests().await.unwrap().is_empty());
}

#[test_log::test(tokio::test)]
async fn test_pixel_budget_boundary() {
    let image_host = MockServer::start().await;
    let replicate = MockServer::start().await;
    let too_big = mount_image(&image_host, "/too-big.png", encode_image(1449, 1448, image::ImageFormat::Png), "image/png").await;
    let just_fits = mount_image(&image_host, "/fits.png", encode_image(1448, 1448, image::ImageFormat::Png), "image/png").await;
    mount_prediction(&replicate, "png", json!(OUTPUT_URL)).await;
    let server = create_app(&replicate);

    let response = server.post("/api/upscale").json(&json!({ "imageUrl": too_big })).await;
    response.assert_status(StatusCode::BAD_REQUEST);
    let failure: UpscaleFailure = response.json();
    assert_eq!(
        failure.error,
        "Image dimensions (1449x1448) exceed the maximum allowed pixel count. Total pixels: 2,098,152, \
         Maximum allowed: 2,096,704. Please resize your image to smaller dimensions."
    );

    let response = server.post("/api/upscale").json(&json!({ "imageUrl": just_fits })).await;
    response.assert_status_ok();
}

#[test_log::test(tokio::test)]
async fn test_empty_output_is_provider_error() {
    let image_host = MockServer::start().await;
    let replicate = MockServer::start().await;
    let url = mount_image(&image_host, "/photo.jpg", encode_image(16, 16, image::ImageFormat::Jpeg), "image/jpeg").await;
    mount_prediction(&replicate, "jpg", json!(null)).await;

    let response = create_app(&replicate).post("/api/upscale").json(&json!({ "imageUrl": url })).await;

    response.assert_status(StatusCode::BAD_REQUEST);
    let failure: UpscaleFailure = response.json();
    assert_eq!(failure.error, "Replicate API returned no output");
    assert_eq!(failure.details.unwrap().kind, "ProviderError");
}

#[test_log::test(tokio::test)]
async fn test_failed_prediction_message_is_surfaced() {
    let image_host = MockServer::start().await;
    let replicate = MockServer::start().await;
    let url = mount_image(&image_host, "/photo.jpg", encode_image(16, 16, image::ImageFormat::Jpeg), "image/jpeg").await;
    Mock::given(method("POST"))
        .and(path("/v1/predictions"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "id": "xyz",
            "status": "failed",
            "error": "CUDA out of memory",
            "urls": { "get": format!("{}/v1/predictions/xyz", replicate.uri()) }
        })))
        .mount(&replicate)
        .await;

    let response = create_app(&replicate).post("/api/upscale").json(&json!({ "imageUrl": url })).await;

    response.assert_status(StatusCode::BAD_REQUEST);
    let failure: UpscaleFailure = response.json();
    assert_eq!(failure.error, "Replicate prediction failed: CUDA out of memory");
}

#[test_log::test(tokio::test)]
async fn test_repeated_validation_failure_is_deterministic() {
    let image_host = MockServer::start().await;
    let replicate = MockServer::start().await;
    let url = mount_image(&image_host, "/doc.pdf", b"%PDF-1.7".to_vec(), "application/pdf").await;
    let server = create_app(&replicate);

    let first = server.post("/api/upscale").json(&json!({ "imageUrl": url })).await;
    let second = server.post("/api/upscale").json(&json!({ "imageUrl": url })).await;

    assert_eq!(first.status_code(), second.status_code());
    assert_eq!(first.json::<UpscaleFailure>(), second.json::<UpscaleFailure>());
}

#[test_log::test(tokio::test)]
async fn test_healthz_and_docs() {
    let replicate = MockServer::start().await;
    let server = create_app(&replicate);

    let health = server.get("/healthz").await;
    health.assert_status_ok();
    health.assert_text("OK");

    let openapi = server.get("/api/openapi.json").await;
    openapi.assert_status_ok();
    let doc: serde_json::Value = openapi.json();
    assert!(doc["paths"]["/api/upscale"]["post"].is_object());

    server.get("/docs").await.assert_status_ok();
}

#[test_log::test(tokio::test)]
async fn test_cors_preflight() {
    let replicate = MockServer::start().await;
    let server = create_app(&replicate);

    let response = server
        .method(Method::OPTIONS, "/api/upscale")
        .add_header("origin", "https://upscaler.example.com")
        .add_header("access-control-request-method", "POST")
        .add_header("access-control-request-headers", "content-type")
        .await;

    response.assert_status_ok();
    assert_eq!(response.header("access-control-allow-origin"), "*");
    let methods = response.header("access-control-allow-methods");
    assert!(methods.to_str().unwrap().contains("POST"));
}

#[test]
fn test_application_requires_token() {
    let mut config = create_test_config();
    config.replicate.api_token = None;

    assert!(Application::new(config).is_err());
}
