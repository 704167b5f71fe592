//! The upscale pipeline: validate the image, race the provider against the deadline, check
//! the output.
//!
//! The provider call runs in its own task. When the deadline wins, the task's handle is
//! dropped, which detaches it: the remote prediction keeps running and whatever it eventually
//! returns is discarded. Nothing is retried.

use crate::api::models::upscale::UpscaleSuccess;
use crate::errors::{Error, Result};
use crate::provider::{UpscaleInput, UpscaleProvider};
use crate::validation::ImageValidator;
use anyhow::anyhow;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument, warn};

/// Default deadline for the provider call.
pub const PROVIDER_TIMEOUT: Duration = Duration::from_secs(45);

const LOGGED_URL_CHARS: usize = 50;

/// Shorten a URL for logs; uploaded-file URLs can carry long signed query strings.
pub fn truncate_url(url: &str) -> String {
    match url.char_indices().nth(LOGGED_URL_CHARS) {
        Some((cut, _)) => format!("{}...", &url[..cut]),
        None => url.to_string(),
    }
}

#[instrument(skip_all, fields(image_url = %truncate_url(image_url)))]
pub async fn upscale_image(
    validator: &ImageValidator,
    provider: Arc<dyn UpscaleProvider>,
    deadline: Duration,
    image_url: &str,
) -> Result<UpscaleSuccess> {
    let image = validator.validate(image_url).await?;
    let output_format = image.format.output_format();

    info!(provider = provider.name(), %output_format, "Starting upscale");
    let input = UpscaleInput::new(image_url, output_format);
    let output = invoke_with_deadline(provider.clone(), input, deadline).await?;

    let Some(url) = output.filter(|url| !url.trim().is_empty()) else {
        return Err(Error::Provider {
            message: format!("{} returned no output", provider.name()),
            chain: Vec::new(),
        });
    };

    info!(output = %truncate_url(&url), "Upscale complete");
    Ok(UpscaleSuccess::new(url, output_format))
}

/// Run the provider call, giving up on it after `deadline`.
pub async fn invoke_with_deadline(provider: Arc<dyn UpscaleProvider>, input: UpscaleInput, deadline: Duration) -> Result<Option<String>> {
    let task = tokio::spawn(async move { provider.upscale(input).await });

    match tokio::time::timeout(deadline, task).await {
        // Dropping the JoinHandle detaches the task rather than aborting it
        Err(_) => {
            warn!(?deadline, "Provider call exceeded deadline, abandoning it");
            Err(Error::Timeout { after: deadline })
        }
        Ok(Err(join_error)) => Err(Error::Other(anyhow!("Upscale task failed: {join_error}"))),
        Ok(Ok(Err(provider_error))) => Err(Error::provider(provider_error)),
        Ok(Ok(Ok(output))) => Ok(output),
    }
}
