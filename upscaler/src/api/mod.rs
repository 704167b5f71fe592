//! API layer for HTTP request handling and data models.
//!
//! - **[`handlers`]**: Axum route handlers
//! - **[`models`]**: Request/response data structures
//!
//! # API Structure
//!
//! - **Upscale** (`POST /api/upscale`): validate an uploaded image and upscale it
//! - **Health** (`GET /healthz`): liveness probe
//!
//! All endpoints are documented with `utoipa`; the rendered docs live at `/docs`.

pub mod handlers;
pub mod models;
