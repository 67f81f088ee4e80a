//! Reference directory cache for tracked users.
//!
//! Owns the last-fetched roster, the loaded flag the alert buffer keys
//! off, and a last-known-status overlay that gives presence continuity
//! across wholesale reloads: a refresh never regresses a user to
//! offline because the refreshed record omitted its status, and status
//! events that arrive before the first load survive it.
//!
//! Reloads are tagged with issue numbers. Responses for an issue older
//! than the newest applied one are discarded, so an on-demand reload
//! racing the periodic tick cannot clobber the roster with stale data.

use std::collections::HashMap;
use tracing::debug;
use wd_core::{TrackedUser, UserId, UserRecord};

/// Result of applying a finished reload to the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// The reload was current and replaced the roster.
    Applied { users: usize, first_load: bool },
    /// A newer reload already applied; this response was discarded.
    Stale,
}

/// Read-only snapshot published to consumers on every roster change.
#[derive(Debug, Clone, Default)]
pub struct RosterSnapshot {
    /// Users in roster order.
    pub users: Vec<TrackedUser>,
    pub loaded: bool,
}

/// The directory cache. Exclusively owned by the sync engine task; the
/// rest of the application sees it through [`RosterSnapshot`]s.
#[derive(Debug, Default)]
pub struct RosterCache {
    users: HashMap<UserId, TrackedUser>,
    /// Roster order of the current load, for stable snapshots.
    order: Vec<UserId>,
    /// Last status seen per id from any source (applied records or
    /// presence events); consulted when a reload omits a status.
    known_status: HashMap<UserId, bool>,
    loaded: bool,
    next_issue: u64,
    applied_issue: u64,
}

impl RosterCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    pub fn find_by_id(&self, id: UserId) -> Option<&TrackedUser> {
        self.users.get(&id)
    }

    /// Display name for an id, when the roster knows it.
    pub fn display_name(&self, id: UserId) -> Option<&str> {
        self.users.get(&id).map(|user| user.name.as_str())
    }

    /// Records a presence change. The overlay always remembers it; the
    /// return value says whether a current roster entry was updated
    /// too.
    pub fn set_status(&mut self, id: UserId, online: bool) -> bool {
        self.known_status.insert(id, online);
        match self.users.get_mut(&id) {
            Some(user) => {
                user.active_status = online;
                true
            }
            None => false,
        }
    }

    /// Starts a reload, returning the issue number its response must be
    /// tagged with.
    pub fn begin_reload(&mut self) -> u64 {
        self.next_issue += 1;
        self.next_issue
    }

    /// Applies a finished reload: wholesale replacement, with omitted
    /// statuses inherited from the overlay. Last-writer-wins by issue
    /// order.
    pub fn apply(&mut self, issue: u64, records: Vec<UserRecord>) -> ApplyOutcome {
        if issue <= self.applied_issue {
            debug!(
                issue,
                applied = self.applied_issue,
                "Discarding stale roster reload"
            );
            return ApplyOutcome::Stale;
        }
        self.applied_issue = issue;
        let first_load = !self.loaded;

        let mut users = HashMap::with_capacity(records.len());
        let mut order = Vec::with_capacity(records.len());
        for record in records {
            let id = record.id;
            let known = self.known_status.get(&id).copied();
            let user = TrackedUser::from_record(record, known);
            self.known_status.insert(id, user.active_status);
            if users.insert(id, user).is_none() {
                order.push(id);
            }
        }
        self.users = users;
        self.order = order;
        self.loaded = true;

        ApplyOutcome::Applied {
            users: self.users.len(),
            first_load,
        }
    }

    /// Snapshot in roster order.
    pub fn snapshot(&self) -> RosterSnapshot {
        RosterSnapshot {
            users: self
                .order
                .iter()
                .filter_map(|id| self.users.get(id))
                .cloned()
                .collect(),
            loaded: self.loaded,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
