//! Resolved notifications and per-user alert aggregates.

use crate::user::UserId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Display label used when an alert references a user the roster does
/// not know, even after loading. Frozen into the notification at
/// resolution time and never revisited.
pub const UNKNOWN_USER: &str = "Unknown User";

// ============================================================================
// NotificationId
// ============================================================================

/// Unique identifier for a stored notification.
///
/// Minted by the notification store from a monotonic sequence that
/// keeps growing across restarts, so sorting by id equals sorting by
/// recency.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct NotificationId(u64);

impl NotificationId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for NotificationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for NotificationId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

// ============================================================================
// Severity
// ============================================================================

/// Severity attached to an alert by the backend. Advisory only: it
/// drives display urgency, never routing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    #[default]
    Info,
    Warning,
    Error,
}

impl Severity {
    /// Lenient parse: unknown labels fall back to `Info`, mirroring how
    /// the backend treats the field.
    pub fn parse_lenient(label: &str) -> Self {
        match label {
            "warning" => Severity::Warning,
            "error" => Severity::Error,
            _ => Severity::Info,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Error => "error",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

// ============================================================================
// Resolved alerts and notifications
// ============================================================================

/// A raw alert after resolution against the roster: display name
/// attached, severity and timestamp defaults filled in. Input to the
/// notification store, which mints the id.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedAlert {
    /// Alert subtype as it appeared on the wire (e.g. `user-inactive`).
    pub kind: String,
    pub severity: Severity,
    pub message: String,
    pub user_id: UserId,
    /// Display name frozen at resolution time.
    pub user_name: String,
    pub timestamp: DateTime<Utc>,
}

/// A stored notification.
///
/// `user_name` is resolved at insertion time and never re-derived from
/// a later roster; `read` is the only field that changes after
/// creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: NotificationId,
    pub kind: String,
    pub severity: Severity,
    pub message: String,
    pub user_id: UserId,
    pub user_name: String,
    pub timestamp: DateTime<Utc>,
    pub read: bool,
}

impl Notification {
    /// Builds the stored form of a resolved alert. Always starts unread.
    pub fn from_alert(id: NotificationId, alert: ResolvedAlert) -> Self {
        Self {
            id,
            kind: alert.kind,
            severity: alert.severity,
            message: alert.message,
            user_id: alert.user_id,
            user_name: alert.user_name,
            timestamp: alert.timestamp,
            read: false,
        }
    }
}

// ============================================================================
// UserAlertAggregate
// ============================================================================

/// Latest-alert-plus-count summary kept per user while an alert is
/// outstanding. Exists only for users with unread-originating activity
/// since the last clear.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserAlertAggregate {
    /// Snapshot of the most recent notification for this user, as it
    /// looked when added (its `read` flag is not kept in sync).
    pub latest: Notification,
    /// How many alerts have accumulated since the aggregate was created.
    pub count: u32,
}

impl UserAlertAggregate {
    /// Aggregate for a user's first alert since the last clear.
    pub fn first(latest: Notification) -> Self {
        Self { latest, count: 1 }
    }

    /// Folds another alert into the aggregate.
    pub fn update(&mut self, latest: Notification) {
        self.latest = latest;
        self.count = self.count.saturating_add(1);
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn resolved(user_id: i64, message: &str) -> ResolvedAlert {
        ResolvedAlert {
            kind: "user-inactive".to_string(),
            severity: Severity::Warning,
            message: message.to_string(),
            user_id: UserId::new(user_id),
            user_name: "Avery".to_string(),
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_severity_parse_lenient() {
        assert_eq!(Severity::parse_lenient("warning"), Severity::Warning);
        assert_eq!(Severity::parse_lenient("error"), Severity::Error);
        assert_eq!(Severity::parse_lenient("info"), Severity::Info);
        assert_eq!(Severity::parse_lenient("catastrophic"), Severity::Info);
        assert_eq!(Severity::parse_lenient(""), Severity::Info);
    }

    #[test]
    fn test_severity_serde_lowercase() {
        assert_eq!(
            serde_json::to_string(&Severity::Warning).expect("encode"),
            r#""warning""#
        );
        let parsed: Severity = serde_json::from_str(r#""error""#).expect("decode");
        assert_eq!(parsed, Severity::Error);
    }

    #[test]
    fn test_notification_from_alert_starts_unread() {
        let alert = resolved(7, "idle for 30 minutes");
        let notification = Notification::from_alert(NotificationId::new(1), alert.clone());
        assert!(!notification.read);
        assert_eq!(notification.user_id, alert.user_id);
        assert_eq!(notification.user_name, "Avery");
        assert_eq!(notification.message, "idle for 30 minutes");
    }

    #[test]
    fn test_notification_id_orders_by_recency() {
        let older = NotificationId::new(3);
        let newer = NotificationId::new(9);
        assert!(newer > older);
    }

    #[test]
    fn test_aggregate_counts_accumulate() {
        let first = Notification::from_alert(NotificationId::new(1), resolved(7, "first"));
        let second = Notification::from_alert(NotificationId::new(2), resolved(7, "second"));

        let mut aggregate = UserAlertAggregate::first(first);
        assert_eq!(aggregate.count, 1);

        aggregate.update(second.clone());
        assert_eq!(aggregate.count, 2);
        assert_eq!(aggregate.latest, second);
    }

    #[test]
    fn test_aggregate_snapshot_serde_roundtrip() {
        let aggregate =
            UserAlertAggregate::first(Notification::from_alert(NotificationId::new(5), resolved(2, "x")));
        let json = serde_json::to_string(&aggregate).expect("encode");
        let back: UserAlertAggregate = serde_json::from_str(&json).expect("decode");
        assert_eq!(back, aggregate);
    }
}
