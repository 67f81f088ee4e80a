//! Presence reconciliation.
//!
//! Status events land here. The roster's online flag is written
//! unconditionally, ids the roster has never seen included (the
//! overlay remembers them for the next reload). A tracked user coming
//! back online additionally has their standing aggregate dismissed:
//! the return itself resolves the alert, no operator action needed.
//! Their notification history is never touched by this path.

use tracing::debug;
use wd_protocol::StatusEvent;

use crate::roster::RosterCache;
use crate::store::StoreHandle;

/// What one presence event did when reconciled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReconcileOutcome {
    /// A current roster entry carried the new status. The overlay
    /// records the status either way.
    pub entry_updated: bool,
    /// The user's standing aggregate was dismissed.
    pub aggregate_cleared: bool,
}

/// Applies one presence event to the roster and, when it signals a
/// tracked user back online, dismisses that user's aggregate through
/// the store.
///
/// A store that has already shut down makes the aggregate clear a
/// guarded no-op; the roster write still happens.
pub async fn apply_status_event(
    roster: &mut RosterCache,
    store: &StoreHandle,
    event: &StatusEvent,
) -> ReconcileOutcome {
    let entry_updated = roster.set_status(event.user_id, event.is_online);

    let mut aggregate_cleared = false;
    if event.is_online && event.is_tracking {
        match store.clear_user_alert(event.user_id).await {
            Ok(existed) => aggregate_cleared = existed,
            Err(err) => {
                debug!(user_id = %event.user_id, error = %err, "Aggregate clear skipped, store closed");
            }
        }
    }

    debug!(
        user_id = %event.user_id,
        online = event.is_online,
        tracking = event.is_tracking,
        entry_updated,
        aggregate_cleared,
        "Status event reconciled"
    );

    ReconcileOutcome {
        entry_updated,
        aggregate_cleared,
    }
}

// ============================================================================
// Tests
// ============================================================================
