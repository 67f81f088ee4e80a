//! Watchdesk API - REST adapter for the tracking backend
//!
//! Covers the roster endpoints (plain and date-scoped) and the
//! force-email fallback. All responses use the backend's
//! `{ "data": ... }` envelope; requests authenticate with a bearer
//! token when one is configured.

pub mod client;
pub mod error;

pub use client::{ApiClient, ApiConfig, RosterSource};
pub use error::{ApiError, ApiResult};
