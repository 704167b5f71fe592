//! Client-side progress of one upscale attempt.
//!
//! Front-ends render a three step indicator: upload, processing, complete. The state is an
//! explicit value that the caller owns and passes down, so there is exactly one place that
//! decides which step is showing.

use crate::api::models::upscale::{OutputFormat, UpscaleResult};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum ProcessState {
    /// Waiting for a file. Carries the error of the previous attempt, if it failed.
    Upload { error: Option<String> },
    /// The upscale request is in flight
    Processing { progress: u8 },
    /// Reachable only from a successful response
    Complete { url: String, format: OutputFormat },
}

impl Default for ProcessState {
    fn default() -> Self {
        ProcessState::Upload { error: None }
    }
}

/// Returned when a transition is not valid from the current step.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("cannot {action} while in the {step} step")]
pub struct InvalidTransition {
    pub action: &'static str,
    pub step: &'static str,
}

impl ProcessState {
    pub fn step(&self) -> &'static str {
        match self {
            ProcessState::Upload { .. } => "upload",
            ProcessState::Processing { .. } => "processing",
            ProcessState::Complete { .. } => "complete",
        }
    }

    pub fn progress(&self) -> u8 {
        match self {
            ProcessState::Upload { .. } => 0,
            ProcessState::Processing { progress } => *progress,
            ProcessState::Complete { .. } => 100,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            ProcessState::Upload { error } => error.as_deref(),
            _ => None,
        }
    }

    /// An upload finished and the image URL was sent for upscaling.
    pub fn start(self) -> Result<Self, InvalidTransition> {
        match self {
            ProcessState::Upload { .. } => Ok(ProcessState::Processing { progress: 0 }),
            other => Err(other.invalid("start")),
        }
    }

    /// Move the progress bar. Values are clamped to 100 and never go backwards.
    pub fn advance(self, progress: u8) -> Result<Self, InvalidTransition> {
        match self {
            ProcessState::Processing { progress: current } => Ok(ProcessState::Processing {
                progress: progress.min(100).max(current),
            }),
            other => Err(other.invalid("advance")),
        }
    }

    /// Apply the service's response. Failures return to the upload step with progress reset.
    pub fn finish(self, result: UpscaleResult) -> Result<Self, InvalidTransition> {
        match self {
            ProcessState::Processing { .. } => Ok(match result {
                UpscaleResult::Success(success) if success.success => ProcessState::Complete {
                    url: success.url,
                    format: success.format,
                },
                UpscaleResult::Success(_) => ProcessState::Upload {
                    error: Some("Failed to process image".to_string()),
                },
                UpscaleResult::Failure(failure) => ProcessState::Upload { error: Some(failure.error) },
            }),
            other => Err(other.invalid("finish")),
        }
    }

    /// Start over from any step.
    pub fn reset(self) -> Self {
        ProcessState::default()
    }

    fn invalid(&self, action: &'static str) -> InvalidTransition {
        InvalidTransition { action, step: self.step() }
    }
}
