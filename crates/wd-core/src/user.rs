//! Tracked users and the roster records they are built from.
//!
//! The backend's roster endpoints return [`UserRecord`]s: wire-shaped,
//! camelCase, with `activeStatus` optional because older backend builds
//! omit it for users without recent activity. The directory cache turns
//! records into [`TrackedUser`]s, filling the gap from the last status
//! it knew so a refresh never regresses a user to a stale offline
//! default.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// UserId
// ============================================================================

/// Unique identifier for a tracked user, assigned by the backend.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct UserId(i64);

impl UserId {
    /// Creates a user id from its backend value.
    pub fn new(id: i64) -> Self {
        Self(id)
    }

    /// Returns the raw backend value.
    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for UserId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

// ============================================================================
// Roster records
// ============================================================================

/// One roster entry as returned by the backend.
///
/// `active_status` is optional on the wire; see the module docs for why.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRecord {
    pub id: UserId,
    pub name: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub active_status: Option<bool>,
    #[serde(default)]
    pub last_activity: Option<DateTime<Utc>>,
}

/// A tracked user as held by the directory cache, with its
/// online/offline status resolved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackedUser {
    pub id: UserId,
    pub name: String,
    pub email: Option<String>,
    pub active_status: bool,
    pub last_activity: Option<DateTime<Utc>>,
}

impl TrackedUser {
    /// Builds a cached user from an incoming roster record.
    ///
    /// Precedence for the status flag: the record's own value, then
    /// `known_status` (the last value seen for this id from any earlier
    /// record or presence event), then offline.
    pub fn from_record(record: UserRecord, known_status: Option<bool>) -> Self {
        let active_status = record.active_status.or(known_status).unwrap_or(false);
        Self {
            id: record.id,
            name: record.name,
            email: record.email,
            active_status,
            last_activity: record.last_activity,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
