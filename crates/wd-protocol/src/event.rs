//! Inbound event payloads.
//!
//! Alert payloads stay wire-shaped: the backend treats severity and
//! timestamp as advisory, so they parse as raw optionals and the typed
//! accessors fill in defaults instead of failing the whole frame.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use wd_core::{Severity, UserId};

/// Alert subtype that gets buffered and resolved into a notification.
/// Every other subtype is logged and dropped.
pub const ALERT_USER_INACTIVE: &str = "user-inactive";

/// `user-status-update` payload: presence change for one tracked user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusEvent {
    pub user_id: UserId,
    pub is_online: bool,
    /// Set when the backend knows the user is under active tracking;
    /// a tracked user coming back online clears their standing alert.
    #[serde(default)]
    pub is_tracking: bool,
}

/// `admin-alert` payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertEvent {
    /// Alert subtype, `"type"` on the wire.
    #[serde(rename = "type")]
    pub kind: String,
    pub user_id: UserId,
    pub message: String,
    #[serde(default)]
    pub severity: Option<String>,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

impl AlertEvent {
    /// Whether this alert subtype becomes a notification.
    pub fn is_actionable(&self) -> bool {
        self.kind == ALERT_USER_INACTIVE
    }

    /// Effective severity; missing or unrecognized labels are info.
    pub fn resolved_severity(&self) -> Severity {
        self.severity
            .as_deref()
            .map(Severity::parse_lenient)
            .unwrap_or_default()
    }

    /// Event timestamp, or `fallback` when the backend sent none.
    pub fn timestamp_or(&self, fallback: DateTime<Utc>) -> DateTime<Utc> {
        self.timestamp.unwrap_or(fallback)
    }
}
