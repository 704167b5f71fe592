//! Remote super-resolution providers.
//!
//! The pipeline only sees the [`UpscaleProvider`] trait. [`ReplicateProvider`] is the
//! production implementation; tests substitute their own.

mod replicate;

pub use replicate::ReplicateProvider;

use crate::api::models::upscale::OutputFormat;
use async_trait::async_trait;
use serde::Serialize;

/// Model input for one upscale. Only the image and output format vary per request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UpscaleInput {
    pub image: String,
    pub scale: u8,
    pub face_enhance: bool,
    pub tile: u32,
    pub output_format: OutputFormat,
}

impl UpscaleInput {
    pub const SCALE: u8 = 2;
    pub const FACE_ENHANCE: bool = false;
    pub const TILE: u32 = 0;

    pub fn new(image: impl Into<String>, output_format: OutputFormat) -> Self {
        Self {
            image: image.into(),
            scale: Self::SCALE,
            face_enhance: Self::FACE_ENHANCE,
            tile: Self::TILE,
            output_format,
        }
    }
}

/// A hosted model that turns an image URL into an upscaled image URL.
///
/// `Ok(None)` means the provider finished without producing anything.
#[async_trait]
pub trait UpscaleProvider: Send + Sync {
    /// Name used in logs and in the "returned no output" message
    fn name(&self) -> &str;

    async fn upscale(&self, input: UpscaleInput) -> anyhow::Result<Option<String>>;
}
