use crate::api::models::upscale::{ErrorDetails, UpscaleFailure};
use crate::config::Environment;
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use std::time::Duration;
use thiserror::Error as ThisError;

#[derive(ThisError, Debug)]
pub enum Error {
    /// The request did not name an image to upscale
    #[error("Image URL is required")]
    MissingImageUrl,

    /// The image behind the URL failed a pre-flight check
    #[error("{message}")]
    Validation { message: String },

    /// The provider did not settle before the deadline
    #[error("Processing timed out. Please try a smaller image or try again.")]
    Timeout { after: Duration },

    /// The provider reported a failure or produced no output
    #[error("{message}")]
    Provider { message: String, chain: Vec<String> },

    /// Unexpected error with full context chain
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    pub fn validation(message: impl Into<String>) -> Self {
        Error::Validation { message: message.into() }
    }

    /// Wrap a provider failure, keeping the upstream message as the user-facing text
    pub fn provider(err: anyhow::Error) -> Self {
        Error::Provider {
            message: err.to_string(),
            chain: err.chain().skip(1).map(ToString::to_string).collect(),
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::MissingImageUrl | Error::Validation { .. } | Error::Timeout { .. } | Error::Provider { .. } => StatusCode::BAD_REQUEST,
            Error::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Name of the failure class, reported as `details.type`
    pub fn kind(&self) -> &'static str {
        match self {
            Error::MissingImageUrl => "ClientInputError",
            Error::Validation { .. } => "ValidationError",
            Error::Timeout { .. } => "TimeoutError",
            Error::Provider { .. } => "ProviderError",
            Error::Other(_) => "UnexpectedError",
        }
    }

    /// Returns the top-level `error` string shown to the user verbatim
    pub fn user_message(&self) -> String {
        match self {
            Error::Other(_) => "Failed to process image".to_string(),
            _ => self.to_string(),
        }
    }

    fn detail_message(&self) -> String {
        match self {
            Error::MissingImageUrl => "No image URL was provided in the request".to_string(),
            _ => self.to_string(),
        }
    }

    /// The error followed by its causes, outermost first
    fn stack(&self) -> Vec<String> {
        match self {
            Error::Other(err) => err.chain().map(ToString::to_string).collect(),
            Error::Provider { message, chain } => std::iter::once(message.clone()).chain(chain.iter().cloned()).collect(),
            Error::MissingImageUrl | Error::Validation { .. } | Error::Timeout { .. } => vec![self.to_string()],
        }
    }

    /// Build the failure body. Source chains are only exposed in development mode.
    pub fn to_failure(&self, environment: Environment) -> UpscaleFailure {
        let stack = environment.is_development().then(|| self.stack());
        UpscaleFailure::new(
            self.user_message(),
            ErrorDetails {
                message: self.detail_message(),
                kind: self.kind().to_string(),
                stack,
            },
        )
    }

    pub fn render(self, environment: Environment) -> Response {
        match &self {
            Error::Other(_) => {
                tracing::error!(error_type = self.kind(), "Unexpected error: {:#}", self);
            }
            Error::Timeout { after } => {
                tracing::warn!(error_type = self.kind(), "Provider did not settle within {:?}", after);
            }
            Error::Provider { .. } => {
                tracing::warn!(error_type = self.kind(), "Provider error: {}", self);
            }
            Error::MissingImageUrl | Error::Validation { .. } => {
                tracing::info!(error_type = self.kind(), "Client error: {}", self);
            }
        }

        (self.status_code(), Json(self.to_failure(environment))).into_response()
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        self.render(Environment::Production)
    }
}

/// Type alias for service operation results
pub type Result<T> = std::result::Result<T, Error>;
