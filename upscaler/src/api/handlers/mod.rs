//! HTTP request handlers.
//!
//! - [`upscale`]: the upscale endpoint, which never lets an error escape without a JSON body
//!
//! # Error Handling
//!
//! Failures are [`crate::errors::Error`] values, rendered into `{ success: false, ... }` bodies
//! with 400 or 500 status codes.

pub mod upscale;
