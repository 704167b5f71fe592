use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use utoipa::ToSchema;

/// Request payload for `POST /api/upscale`.
///
/// Only `imageUrl` is read; any other fields sent by the client are ignored. The field is kept
/// as raw JSON so that a wrongly typed value is reported as a client error rather than a
/// parse failure.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UpscaleRequest {
    /// Publicly fetchable URL of the uploaded image
    #[serde(default)]
    #[schema(value_type = Option<String>, example = "https://upcdn.io/W142hJk/raw/uploads/photo.jpg")]
    pub image_url: Option<Value>,
}

/// What the `imageUrl` field of a request turned out to hold.
#[derive(Debug, Clone, PartialEq)]
pub enum ImageUrlField<'a> {
    /// A non-blank string, trimmed
    Url(&'a str),
    /// Absent, `null`, `false`, `0` or a blank string
    Missing,
    /// Any other JSON value
    Invalid(&'a Value),
}

impl UpscaleRequest {
    pub fn image_url_field(&self) -> ImageUrlField<'_> {
        match &self.image_url {
            Some(Value::String(url)) if !url.trim().is_empty() => ImageUrlField::Url(url.trim()),
            None | Some(Value::Null) | Some(Value::Bool(false)) | Some(Value::String(_)) => ImageUrlField::Missing,
            Some(Value::Number(n)) if n.as_f64() == Some(0.0) => ImageUrlField::Missing,
            Some(other) => ImageUrlField::Invalid(other),
        }
    }
}

/// Output format requested from the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Jpg,
    Png,
}

impl OutputFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            OutputFormat::Jpg => "jpg",
            OutputFormat::Png => "png",
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Successful upscale response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct UpscaleSuccess {
    /// Always `true`
    pub success: bool,
    /// Location of the upscaled image, as returned by the provider
    pub url: String,
    /// Format the image was upscaled to
    pub format: OutputFormat,
}

impl UpscaleSuccess {
    pub fn new(url: impl Into<String>, format: OutputFormat) -> Self {
        Self {
            success: true,
            url: url.into(),
            format,
        }
    }
}

/// Diagnostic details attached to a failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ErrorDetails {
    pub message: String,
    /// Failure class: `ClientInputError`, `ValidationError`, `TimeoutError`, `ProviderError` or `UnexpectedError`
    #[serde(rename = "type")]
    pub kind: String,
    /// Error source chain, only populated in development mode
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<Vec<String>>,
}

/// Failed upscale response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct UpscaleFailure {
    /// Always `false`
    pub success: bool,
    /// Human-readable message, suitable for showing to the user as-is
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<ErrorDetails>,
}

impl UpscaleFailure {
    pub fn new(error: impl Into<String>, details: ErrorDetails) -> Self {
        Self {
            success: false,
            error: error.into(),
            details: Some(details),
        }
    }
}

/// Either response shape, as seen by a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum UpscaleResult {
    Success(UpscaleSuccess),
    Failure(UpscaleFailure),
}

impl From<UpscaleSuccess> for UpscaleResult {
    fn from(value: UpscaleSuccess) -> Self {
        UpscaleResult::Success(value)
    }
}

impl From<UpscaleFailure> for UpscaleResult {
    fn from(value: UpscaleFailure) -> Self {
        UpscaleResult::Failure(value)
    }
}
