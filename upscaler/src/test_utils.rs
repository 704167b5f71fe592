//! Shared helpers for unit and integration tests.

use crate::config::{Config, ReplicateConfig};
use crate::provider::{UpscaleInput, UpscaleProvider};
use crate::validation::ImageValidator;
use crate::{AppState, build_router};
use anyhow::anyhow;
use async_trait::async_trait;
use axum_test::TestServer;
use image::{ImageFormat, Rgb, RgbImage};
use std::io::Cursor;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

enum Outcome {
    Output(Option<String>),
    Failure(String),
}

/// In-process stand-in for a hosted model.
pub struct FakeProvider {
    outcome: Outcome,
    delay: Duration,
    /// Set once the call has run to completion, even if nobody was waiting for it
    pub finished: Arc<AtomicBool>,
    /// Every input the provider was called with
    pub seen: Arc<Mutex<Vec<UpscaleInput>>>,
}

impl FakeProvider {
    fn new(outcome: Outcome, delay: Duration) -> Self {
        Self {
            outcome,
            delay,
            finished: Arc::new(AtomicBool::new(false)),
            seen: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn returning(output: Option<&str>) -> Self {
        Self::new(Outcome::Output(output.map(str::to_string)), Duration::ZERO)
    }

    pub fn delayed(delay: Duration, output: Option<&str>) -> Self {
        Self::new(Outcome::Output(output.map(str::to_string)), delay)
    }

    pub fn failing(message: &str) -> Self {
        Self::new(Outcome::Failure(message.to_string()), Duration::ZERO)
    }
}

#[async_trait]
impl UpscaleProvider for FakeProvider {
    fn name(&self) -> &str {
        "Fake provider"
    }

    async fn upscale(&self, input: UpscaleInput) -> anyhow::Result<Option<String>> {
        self.seen.lock().unwrap().push(input);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.finished.store(true, Ordering::SeqCst);

        match &self.outcome {
            Outcome::Output(output) => Ok(output.clone()),
            Outcome::Failure(message) => Err(anyhow!(message.clone())),
        }
    }
}

/// Encode a solid-colour image of the given size.
pub fn encode_image(width: u32, height: u32, format: ImageFormat) -> Vec<u8> {
    let image = RgbImage::from_pixel(width, height, Rgb([120, 80, 200]));
    let mut bytes = Cursor::new(Vec::new());
    image.write_to(&mut bytes, format).expect("Failed to encode test image");
    bytes.into_inner()
}

/// Serve `body` at `route` with the given content type, returning its full URL.
pub async fn mount_image(server: &MockServer, route: &str, body: Vec<u8>, content_type: &str) -> String {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, content_type))
        .mount(server)
        .await;
    format!("{}{}", server.uri(), route)
}

pub fn create_test_config() -> Config {
    Config {
        host: "127.0.0.1".to_string(),
        port: 0,
        replicate: ReplicateConfig {
            api_token: Some("r8_test_token".to_string()),
            poll_interval: Duration::from_millis(10),
            max_poll_duration: Duration::from_secs(5),
            ..Default::default()
        },
        ..Default::default()
    }
}

/// Router backed by `provider` instead of Replicate.
pub fn create_test_server(config: Config, provider: impl UpscaleProvider + 'static) -> TestServer {
    let state = AppState::builder()
        .config(config)
        .validator(ImageValidator::new(reqwest::Client::new()))
        .provider(Arc::new(provider))
        .build();
    let router = build_router(&state).expect("Failed to build router");
    TestServer::new(router.into_make_service()).expect("Failed to create test server")
}
