//! HTTP client for the tracking backend.

use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;
use wd_core::{UserId, UserRecord};

use crate::error::{ApiError, ApiResult};

/// Default per-request timeout.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);

// ============================================================================
// Configuration
// ============================================================================

/// Connection settings for the tracking backend's REST API.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Base URL, e.g. `https://track.example.net`.
    pub base_url: String,

    /// Bearer token attached to every request. The backend rejects
    /// unauthenticated roster reads, so leaving this unset only works
    /// against open development backends.
    pub auth_token: Option<String>,

    /// Per-request timeout.
    pub timeout: Duration,
}

impl ApiConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            auth_token: None,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

// ============================================================================
// Wire shapes
// ============================================================================

/// Response envelope used by every backend endpoint.
#[derive(Debug, Deserialize)]
struct DataEnvelope<T> {
    data: T,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ForceEmailRequest<'a> {
    user_id: UserId,
    message: &'a str,
}

#[derive(Debug, Deserialize)]
struct ForceEmailResponse {
    success: bool,
    #[serde(default)]
    message: Option<String>,
}

// ============================================================================
// Client
// ============================================================================

/// HTTP client for the tracking backend. Cheap to clone; clones share
/// the underlying connection pool.
#[derive(Debug, Clone)]
pub struct ApiClient {
    http: Client,
    config: ApiConfig,
}

impl ApiClient {
    /// Builds a client from connection settings.
    pub fn new(config: ApiConfig) -> ApiResult<Self> {
        let mut headers = HeaderMap::new();
        if let Some(token) = &config.auth_token {
            let mut value = HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|_| ApiError::InvalidToken)?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }

        let http = Client::builder()
            .timeout(config.timeout)
            .default_headers(headers)
            .build()
            .map_err(ApiError::Http)?;

        Ok(Self { http, config })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    /// Fetches the current roster of tracked users.
    pub async fn fetch_users(&self) -> ApiResult<Vec<UserRecord>> {
        self.fetch_roster_from("/api/users/usersLogs", &[]).await
    }

    /// Fetches the roster restricted to users with activity logs on
    /// `date`.
    pub async fn fetch_users_with_logs(&self, date: NaiveDate) -> ApiResult<Vec<UserRecord>> {
        let date = date.format("%Y-%m-%d").to_string();
        self.fetch_roster_from("/api/users/usersWithLogs", &[("date", date.as_str())])
            .await
    }

    async fn fetch_roster_from(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> ApiResult<Vec<UserRecord>> {
        let url = self.url(path);
        debug!(url = %url, "Fetching roster");

        let response = self
            .http
            .get(&url)
            .query(query)
            .send()
            .await
            .map_err(ApiError::transport)?;
        let response = check_status(response)?;

        let envelope: DataEnvelope<Vec<UserRecord>> = response
            .json()
            .await
            .map_err(|err| ApiError::Decode(err.to_string()))?;
        debug!(users = envelope.data.len(), "Roster fetched");
        Ok(envelope.data)
    }

    /// Email fallback for users that cannot be reached over the live
    /// channel. Fire-and-forget from the caller's point of view: the
    /// result only says whether the backend accepted the request.
    pub async fn force_email(&self, user_id: UserId, message: &str) -> ApiResult<()> {
        let response = self
            .http
            .post(self.url("/api/notify/force-email"))
            .json(&ForceEmailRequest { user_id, message })
            .send()
            .await
            .map_err(ApiError::transport)?;
        let response = check_status(response)?;

        let body: ForceEmailResponse = response
            .json()
            .await
            .map_err(|err| ApiError::Decode(err.to_string()))?;
        if body.success {
            Ok(())
        } else {
            Err(ApiError::Rejected {
                message: body
                    .message
                    .unwrap_or_else(|| "request refused".to_string()),
            })
        }
    }
}

fn check_status(response: Response) -> ApiResult<Response> {
    let status = response.status();
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return Err(ApiError::Unauthorized {
            status: status.as_u16(),
        });
    }
    if !status.is_success() {
        return Err(ApiError::Status {
            status: status.as_u16(),
        });
    }
    Ok(response)
}

// ============================================================================
// RosterSource
// ============================================================================

/// Source of roster records for the sync engine. Implemented by
/// [`ApiClient`] in production and by scripted stubs in engine tests.
#[async_trait]
pub trait RosterSource: Send + Sync {
    async fn fetch_roster(&self) -> ApiResult<Vec<UserRecord>>;
}

#[async_trait]
impl RosterSource for ApiClient {
    async fn fetch_roster(&self) -> ApiResult<Vec<UserRecord>> {
        self.fetch_users().await
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = ApiConfig::new("https://track.example.net");
        assert_eq!(config.base_url, "https://track.example.net");
        assert_eq!(config.auth_token, None);
        assert_eq!(config.timeout, DEFAULT_TIMEOUT);
    }

    #[test]
    fn test_url_joins_without_double_slash() {
        let client = ApiClient::new(ApiConfig::new("http://localhost:4000/")).expect("client");
        assert_eq!(
            client.url("/api/users/usersLogs"),
            "http://localhost:4000/api/users/usersLogs"
        );
    }

    #[test]
    fn test_envelope_parses_roster_payload() {
        let json = r#"{"data": [{"id": 1, "name": "Avery", "activeStatus": true}]}"#;
        let envelope: DataEnvelope<Vec<UserRecord>> =
            serde_json::from_str(json).expect("parse envelope");
        assert_eq!(envelope.data.len(), 1);
        assert_eq!(envelope.data[0].name, "Avery");
    }

    #[test]
    fn test_force_email_request_uses_camel_case() {
        let request = ForceEmailRequest {
            user_id: UserId::new(12),
            message: "wake up",
        };
        let json = serde_json::to_string(&request).expect("encode");
        assert_eq!(json, r#"{"userId":12,"message":"wake up"}"#);
    }

    #[test]
    fn test_invalid_token_rejected_at_build() {
        let mut config = ApiConfig::new("http://localhost");
        config.auth_token = Some("bad\ntoken".to_string());
        assert!(matches!(
            ApiClient::new(config),
            Err(ApiError::InvalidToken)
        ));
    }
}
