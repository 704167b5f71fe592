//! Replicate prediction client.
//!
//! A prediction is created with `Prefer: wait`, so short jobs come back already settled. Jobs
//! still `starting` or `processing` are polled through their `urls.get` link.

use super::{UpscaleInput, UpscaleProvider};
use crate::config::ReplicateConfig;
use anyhow::{Context, anyhow, bail};
use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, instrument};
use url::Url;

#[derive(Debug, Serialize)]
struct CreatePrediction<'a> {
    version: &'a str,
    input: &'a UpscaleInput,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
enum PredictionStatus {
    Starting,
    Processing,
    Succeeded,
    Failed,
    Canceled,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Deserialize)]
struct PredictionUrls {
    get: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Prediction {
    id: Option<String>,
    status: PredictionStatus,
    #[serde(default)]
    output: Option<Value>,
    #[serde(default)]
    error: Option<Value>,
    urls: Option<PredictionUrls>,
}

pub struct ReplicateProvider {
    client: Client,
    predictions_url: Url,
    api_token: String,
    model_version: String,
    poll_interval: Duration,
    max_poll_duration: Duration,
}

/// Makes sure a url has a trailing slash, so `join` appends instead of replacing the last segment.
fn ensure_slash(url: &Url) -> Url {
    if url.path().ends_with('/') {
        url.clone()
    } else {
        let mut new_url = url.clone();
        let mut path = new_url.path().to_string();
        path.push('/');
        new_url.set_path(&path);
        new_url
    }
}

impl ReplicateProvider {
    pub fn new(client: Client, config: &ReplicateConfig) -> anyhow::Result<Self> {
        let api_token = config
            .api_token
            .clone()
            .filter(|token| !token.trim().is_empty())
            .ok_or_else(|| anyhow!("Missing Replicate API token"))?;
        let predictions_url = ensure_slash(&config.api_base)
            .join("predictions")
            .context("Failed to construct predictions URL")?;

        Ok(Self {
            client,
            predictions_url,
            api_token,
            model_version: config.model_version.clone(),
            poll_interval: config.poll_interval,
            max_poll_duration: config.max_poll_duration,
        })
    }

    async fn create_prediction(&self, input: &UpscaleInput) -> anyhow::Result<Prediction> {
        let response = self
            .client
            .post(self.predictions_url.clone())
            .bearer_auth(&self.api_token)
            .header("Prefer", "wait")
            .json(&CreatePrediction {
                version: &self.model_version,
                input,
            })
            .send()
            .await
            .context("Replicate request failed")?;

        read_prediction(response).await
    }

    async fn poll(&self, mut prediction: Prediction) -> anyhow::Result<Prediction> {
        let poll_url = prediction
            .urls
            .as_ref()
            .and_then(|urls| urls.get.as_deref())
            .map(str::trim)
            .filter(|url| !url.is_empty())
            .ok_or_else(|| anyhow!("Replicate prediction missing poll URL"))?
            .to_string();

        let started = Instant::now();
        while matches!(prediction.status, PredictionStatus::Starting | PredictionStatus::Processing) {
            if started.elapsed() >= self.max_poll_duration {
                bail!("Replicate polling gave up after {:?}", self.max_poll_duration);
            }
            tokio::time::sleep(self.poll_interval).await;

            let response = self
                .client
                .get(&poll_url)
                .bearer_auth(&self.api_token)
                .send()
                .await
                .context("Replicate poll request failed")?;
            prediction = read_prediction(response).await?;
            debug!(id = ?prediction.id, status = ?prediction.status, "Polled prediction");
        }

        Ok(prediction)
    }
}

async fn read_prediction(response: Response) -> anyhow::Result<Prediction> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        bail!("Replicate API error {}: {}", status, body.trim());
    }

    let body_text = response.text().await?;
    serde_json::from_str(&body_text).map_err(|e| {
        tracing::error!("Failed to parse prediction response as JSON. Error: {}", e);
        tracing::debug!("Response body was: {}", body_text);
        anyhow!("error decoding prediction response: {}", e)
    })
}

/// The model returns a single URL, but arrays of URLs are accepted too.
fn extract_output(value: &Value) -> Option<String> {
    match value {
        Value::String(url) => Some(url.trim().to_string()).filter(|url| !url.is_empty()),
        Value::Array(items) => items.iter().find_map(extract_output),
        _ => None,
    }
}

fn describe_error(error: Option<&Value>) -> String {
    match error {
        Some(Value::String(message)) if !message.trim().is_empty() => message.trim().to_string(),
        Some(Value::Null) | None => "no error message".to_string(),
        Some(other) => other.to_string(),
    }
}

#[async_trait]
impl UpscaleProvider for ReplicateProvider {
    fn name(&self) -> &str {
        "Replicate API"
    }

    #[instrument(skip_all, fields(output_format = %input.output_format))]
    async fn upscale(&self, input: UpscaleInput) -> anyhow::Result<Option<String>> {
        let mut prediction = self.create_prediction(&input).await?;
        info!(id = ?prediction.id, status = ?prediction.status, "Created prediction");

        if matches!(prediction.status, PredictionStatus::Starting | PredictionStatus::Processing) {
            prediction = self.poll(prediction).await?;
        }

        match prediction.status {
            PredictionStatus::Succeeded => Ok(prediction.output.as_ref().and_then(extract_output)),
            PredictionStatus::Failed => bail!("Replicate prediction failed: {}", describe_error(prediction.error.as_ref())),
            PredictionStatus::Canceled => bail!("Replicate prediction was canceled"),
            PredictionStatus::Starting | PredictionStatus::Processing | PredictionStatus::Unknown => {
                bail!("Replicate prediction ended in an unexpected state")
            }
        }
    }
}
