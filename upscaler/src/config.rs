//! Application configuration management.
//!
//! Configuration is loaded from a YAML file with environment variable overrides. The configuration
//! file path defaults to `config.yaml` but can be specified via `-f` flag or `UPSCALER_CONFIG`
//! environment variable.
//!
//! ## Loading Priority
//!
//! Configuration sources are merged in the following order (later sources override earlier ones):
//!
//! 1. **YAML config file** - Base configuration (default: `config.yaml`)
//! 2. **REPLICATE_API_TOKEN** - Special case: sets `replicate.api_token` if present
//! 3. **Environment variables** - Variables prefixed with `UPSCALER_` override YAML values
//!
//! For nested config values, use double underscores in environment variables. For example,
//! `UPSCALER_UPSCALE__TIMEOUT=30s` sets the `upscale.timeout` field.
//!
//! ## Usage
//!
//! ```no_run
//! use clap::Parser;
//! use upscaler::config::{Args, Config};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let args = Args::parse();
//! let config = Config::load(&args)?;
//!
//! println!("Server will bind to {}:{}", config.host, config.port);
//! # Ok(())
//! # }
//! ```
//!
//! ## Configuration Structure
//!
//! - **Server**: `host`, `port` - HTTP server binding configuration
//! - **Mode**: `environment` - `production` (default) or `development`; development mode adds
//!   error source chains to failure responses
//! - **Replicate**: `replicate.api_token`, `replicate.model_version`, ... - inference provider
//! - **Upscale**: `upscale.timeout`, `upscale.fetch_timeout` - deadlines for the pipeline
//! - **CORS**: `cors.allowed_origins`, `cors.max_age` - browser access
//! - **Telemetry**: `enable_otel_export` - OTLP trace export
//!
//! The Replicate API token is mandatory. A process started without one fails config validation
//! instead of failing every request later.

use anyhow::bail;
use clap::Parser;
use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use url::Url;

/// Simple CLI args - just for specifying config file
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to configuration file
    #[arg(short = 'f', long, env = "UPSCALER_CONFIG", default_value = "config.yaml")]
    pub config: String,

    /// Validate configuration and exit without starting the server.
    #[arg(long)]
    pub validate: bool,
}

/// Main application configuration.
///
/// All fields have defaults, so an empty file plus `REPLICATE_API_TOKEN` is a complete config.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// HTTP server host to bind to (e.g., "0.0.0.0" for all interfaces)
    pub host: String,
    /// HTTP server port to bind to
    pub port: u16,
    /// Deployment mode, controls how much diagnostic detail failure responses carry
    pub environment: Environment,
    /// Enable OpenTelemetry OTLP export for distributed tracing
    pub enable_otel_export: bool,
    /// Inference provider settings
    pub replicate: ReplicateConfig,
    /// Pipeline deadlines
    pub upscale: UpscaleConfig,
    /// CORS settings for the browser front-end
    pub cors: CorsConfig,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Production,
    Development,
}

impl Environment {
    pub fn is_development(self) -> bool {
        matches!(self, Environment::Development)
    }
}

/// Replicate prediction API settings.
#[derive(Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct ReplicateConfig {
    /// Base URL of the Replicate HTTP API
    pub api_base: Url,
    /// API token, usually supplied through `REPLICATE_API_TOKEN`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_token: Option<String>,
    /// Model version hash for `nightmareai/real-esrgan`
    pub model_version: String,
    /// Delay between polls of a prediction that has not settled yet
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,
    /// Upper bound on polling, so predictions abandoned after a timeout stop eventually
    #[serde(with = "humantime_serde")]
    pub max_poll_duration: Duration,
}

// Written by hand so the token never reaches the logs
impl fmt::Debug for ReplicateConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReplicateConfig")
            .field("api_base", &self.api_base.as_str())
            .field("api_token", &self.api_token.as_ref().map(|_| "[redacted]"))
            .field("model_version", &self.model_version)
            .field("poll_interval", &self.poll_interval)
            .field("max_poll_duration", &self.max_poll_duration)
            .finish()
    }
}

impl Default for ReplicateConfig {
    fn default() -> Self {
        Self {
            api_base: Url::parse("https://api.replicate.com/v1/").expect("static URL is valid"),
            api_token: None,
            model_version: "42fed1c4974146d4d2414e2be2c5277c7fcf05fcc3a73abf41610695738c1d7b".to_string(),
            poll_interval: Duration::from_secs(1),
            max_poll_duration: Duration::from_secs(10 * 60),
        }
    }
}

/// Deadlines for a single upscale request.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct UpscaleConfig {
    /// How long to wait for the provider before answering with a timeout.
    /// Stays under the 60 second request ceiling of typical hosting platforms.
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    /// Timeout for fetching the source image during validation
    #[serde(with = "humantime_serde")]
    pub fetch_timeout: Duration,
}

impl Default for UpscaleConfig {
    fn default() -> Self {
        Self {
            timeout: crate::upscale::PROVIDER_TIMEOUT,
            fetch_timeout: Duration::from_secs(30),
        }
    }
}

/// CORS (Cross-Origin Resource Sharing) configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct CorsConfig {
    /// Allowed origins for CORS requests
    pub allowed_origins: Vec<CorsOrigin>,
    /// Cache preflight requests for this many seconds
    pub max_age: Option<u64>,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: vec![CorsOrigin::Wildcard],
            max_age: Some(3600),
        }
    }
}

/// CORS origin specification.
///
/// Can be either a wildcard (`*`) to allow all origins, or a specific URL.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum CorsOrigin {
    /// Allow all origins (`*`)
    #[serde(deserialize_with = "parse_wildcard")]
    Wildcard,
    /// Specific origin URL (e.g., `https://app.example.com`)
    #[serde(deserialize_with = "parse_url")]
    Url(Url),
}

fn parse_wildcard<'de, D>(deserializer: D) -> Result<(), D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s: String = Deserialize::deserialize(deserializer)?;
    if s == "*" {
        Ok(())
    } else {
        Err(serde::de::Error::custom("Expected '*'"))
    }
}

fn parse_url<'de, D>(deserializer: D) -> Result<Url, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s: String = Deserialize::deserialize(deserializer)?;
    Url::parse(&s).map_err(serde::de::Error::custom)
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            environment: Environment::default(),
            enable_otel_export: false,
            replicate: ReplicateConfig::default(),
            upscale: UpscaleConfig::default(),
            cors: CorsConfig::default(),
        }
    }
}

impl Config {
    #[allow(clippy::result_large_err)]
    pub fn load(args: &Args) -> Result<Self, figment::Error> {
        let config: Self = Self::figment(args).extract()?;
        config.validate().map_err(|e| figment::Error::from(e.to_string()))?;
        Ok(config)
    }

    /// Validate the configuration for consistency and required fields
    pub fn validate(&self) -> anyhow::Result<()> {
        match self.replicate.api_token.as_deref().map(str::trim) {
            None | Some("") => bail!(
                "Config validation: Missing Replicate API token. \
                 Please set REPLICATE_API_TOKEN environment variable or add replicate.api_token to config file."
            ),
            Some(_) => {}
        }

        if self.replicate.model_version.trim().is_empty() {
            bail!("Config validation: replicate.model_version cannot be empty");
        }

        if self.replicate.poll_interval.is_zero() {
            bail!("Config validation: replicate.poll_interval must be greater than zero");
        }

        if self.upscale.timeout.is_zero() {
            bail!("Config validation: upscale.timeout must be greater than zero");
        }

        if self.upscale.fetch_timeout.is_zero() {
            bail!("Config validation: upscale.fetch_timeout must be greater than zero");
        }

        if self.cors.allowed_origins.is_empty() {
            bail!("Config validation: CORS allowed_origins cannot be empty. Add at least one allowed origin.");
        }

        Ok(())
    }

    pub fn figment(args: &Args) -> Figment {
        Figment::new()
            // Load base config file
            .merge(Yaml::file(&args.config))
            // The conventional Replicate variable name
            .merge(
                Env::raw()
                    .only(&["REPLICATE_API_TOKEN"])
                    .map(|_| "replicate.api_token".into()),
            )
            // Prefixed variables override everything else; UPSCALER_CONFIG belongs to clap
            .merge(Env::prefixed("UPSCALER_").ignore(&["config"]).split("__"))
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
