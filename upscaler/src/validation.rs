//! Pre-flight checks on the uploaded image.
//!
//! The image is fetched once. The checks run in a fixed order and stop at the first failure:
//! reachability, content type, declared size, actual size, then the pixel budget. The pixel
//! budget is best-effort: if the header cannot be decoded the check is skipped.

use crate::api::models::upscale::OutputFormat;
use crate::errors::{Error, Result};
use crate::upscale::truncate_url;
use image::ImageReader;
use reqwest::{Client, Response, header::CONTENT_LENGTH, header::CONTENT_TYPE};
use std::io::Cursor;
use tracing::{debug, instrument};
use url::Url;

/// Largest accepted upload, in bytes (5 MiB).
pub const MAX_FILE_SIZE: u64 = 5 * 1024 * 1024;

/// Largest accepted `width * height`. This is the most the model's GPU memory budget
/// allows (1448 x 1448).
pub const MAX_TOTAL_PIXELS: u64 = 2_096_704;

/// Source format derived from the response content type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageFormat {
    Jpg,
    Png,
    /// Any other `image/*` subtype, e.g. `webp`
    Other(String),
}

impl ImageFormat {
    /// `image/jpeg` maps to `jpg`, `image/png` to `png`. Parameters and case are ignored.
    pub fn from_content_type(content_type: &str) -> Self {
        let essence = content_type.split(';').next().unwrap_or_default().trim().to_ascii_lowercase();
        let subtype = essence.split_once('/').map(|(_, sub)| sub).unwrap_or_default();
        match subtype {
            "jpeg" | "jpg" => ImageFormat::Jpg,
            "png" => ImageFormat::Png,
            other => ImageFormat::Other(other.to_string()),
        }
    }

    /// Format to ask the model for; anything it cannot emit falls back to `jpg`.
    pub fn output_format(&self) -> OutputFormat {
        match self {
            ImageFormat::Png => OutputFormat::Png,
            ImageFormat::Jpg | ImageFormat::Other(_) => OutputFormat::Jpg,
        }
    }
}

/// An image that passed every check.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedImage {
    pub content_type: String,
    pub byte_size: u64,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub format: ImageFormat,
}

/// Fetches and inspects uploaded images.
#[derive(Debug, Clone)]
pub struct ImageValidator {
    client: Client,
}

impl ImageValidator {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    #[instrument(skip_all, fields(image_url = %truncate_url(image_url)))]
    pub async fn validate(&self, image_url: &str) -> Result<ValidatedImage> {
        let url = parse_image_url(image_url)?;

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| Error::validation(format!("Failed to fetch image: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let reason = status.canonical_reason().unwrap_or(status.as_str());
            return Err(Error::validation(format!("Failed to fetch image: {reason}")));
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string)
            .unwrap_or_default();
        if !content_type.starts_with("image/") {
            debug!(content_type = %content_type, "Rejecting non-image content");
            return Err(Error::validation("Invalid file type. Only images are allowed."));
        }

        let declared = response
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.trim().parse::<u64>().ok());
        check_declared_size(declared)?;

        let bytes = read_capped(response, MAX_FILE_SIZE).await?;
        let byte_size = bytes.len() as u64;

        let (width, height) = match read_dimensions(&bytes) {
            Some((width, height)) => {
                check_pixel_budget(width, height)?;
                (Some(width), Some(height))
            }
            None => {
                debug!("Could not decode image dimensions, skipping pixel budget check");
                (None, None)
            }
        };

        let format = ImageFormat::from_content_type(&content_type);
        debug!(byte_size, ?width, ?height, ?format, "Image passed validation");

        Ok(ValidatedImage {
            content_type,
            byte_size,
            width,
            height,
            format,
        })
    }
}

fn parse_image_url(raw: &str) -> Result<Url> {
    let url = Url::parse(raw).map_err(|e| Error::validation(format!("Invalid image URL: {e}")))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        scheme => Err(Error::validation(format!("Invalid image URL: unsupported scheme '{scheme}'"))),
    }
}

fn size_exceeded() -> Error {
    Error::validation("File size exceeds 5MB limit")
}

/// Reject early on a declared `content-length` above the limit.
pub fn check_declared_size(content_length: Option<u64>) -> Result<()> {
    match content_length {
        Some(length) if length > MAX_FILE_SIZE => Err(size_exceeded()),
        _ => Ok(()),
    }
}

/// Read the body, giving up as soon as it grows past `limit`. Covers responses that omit or
/// understate `content-length`.
async fn read_capped(mut response: Response, limit: u64) -> Result<Vec<u8>> {
    let mut body = Vec::new();
    while let Some(chunk) = response
        .chunk()
        .await
        .map_err(|e| Error::validation(format!("Failed to fetch image: {e}")))?
    {
        if (body.len() + chunk.len()) as u64 > limit {
            return Err(size_exceeded());
        }
        body.extend_from_slice(&chunk);
    }
    Ok(body)
}

/// Decode just enough of the image header to get its dimensions.
pub fn read_dimensions(bytes: &[u8]) -> Option<(u32, u32)> {
    let reader = ImageReader::new(Cursor::new(bytes)).with_guessed_format().ok()?;
    reader.into_dimensions().ok()
}

pub fn check_pixel_budget(width: u32, height: u32) -> Result<()> {
    let total = u64::from(width) * u64::from(height);
    if total > MAX_TOTAL_PIXELS {
        return Err(Error::validation(format!(
            "Image dimensions ({width}x{height}) exceed the maximum allowed pixel count. \
             Total pixels: {}, Maximum allowed: {}. Please resize your image to smaller dimensions.",
            group_thousands(total),
            group_thousands(MAX_TOTAL_PIXELS)
        )));
    }
    Ok(())
}

/// `2096704` -> `2,096,704`
fn group_thousands(value: u64) -> String {
    let digits = value.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}
