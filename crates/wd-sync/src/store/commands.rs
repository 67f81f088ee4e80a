//! Store actor commands, errors, events, and the snapshot view.
//!
//! Message types for communicating with the `StoreActor`:
//! - `StoreCommand`: commands sent to the actor
//! - `StoreError`: errors surfaced to callers
//! - `StoreEvent`: change feed published to subscribers
//! - `StoreSnapshot`: point-in-time read of the whole store

use std::collections::HashMap;

use thiserror::Error;
use tokio::sync::oneshot;
use wd_core::{Notification, NotificationId, ResolvedAlert, UserAlertAggregate, UserId};

// ============================================================================
// Store Commands
// ============================================================================

/// Commands sent to the store actor.
///
/// Request-response commands carry a oneshot for the reply;
/// `MarkActivated` is fire-and-forget, reported by the desktop alert
/// task when the operator clicks a toast.
#[derive(Debug)]
pub enum StoreCommand {
    /// Record a resolved alert: prepend it, count it unread, fold it
    /// into the per-user aggregate. Replies with the minted id.
    Add {
        /// The resolved alert (boxed to reduce enum size variance).
        alert: Box<ResolvedAlert>,
        /// Channel to send the minted id
        respond_to: oneshot::Sender<NotificationId>,
    },

    /// Mark one notification read.
    ///
    /// Replies `true` when the flag actually flipped; already-read and
    /// unknown ids are no-ops and reply `false`.
    MarkRead {
        id: NotificationId,
        respond_to: oneshot::Sender<bool>,
    },

    /// Mark every notification read and drop all aggregates.
    ///
    /// Replies with how many notifications were still unread.
    MarkAllRead { respond_to: oneshot::Sender<usize> },

    /// Drop the whole collection. Irreversible.
    ///
    /// Replies with how many notifications were removed.
    ClearAll { respond_to: oneshot::Sender<usize> },

    /// Dismiss one user's aggregate without touching their history.
    ///
    /// Replies `true` when an aggregate existed for the user.
    ClearUserAlert {
        user_id: UserId,
        respond_to: oneshot::Sender<bool>,
    },

    /// Read the entire store state.
    Snapshot {
        respond_to: oneshot::Sender<StoreSnapshot>,
    },

    /// Read just the unread count.
    UnreadCount { respond_to: oneshot::Sender<usize> },

    /// The desktop toast for this notification was clicked; mark it
    /// read and announce the activation. Fire-and-forget.
    MarkActivated { id: NotificationId },
}

// ============================================================================
// Store Errors
// ============================================================================

/// Errors that can occur when talking to the store actor.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// The command or response channel was closed.
    ///
    /// This typically indicates the actor was shut down.
    #[error("notification store closed")]
    ChannelClosed,
}

// ============================================================================
// Store Events
// ============================================================================

/// Change feed published by the store to subscribers.
///
/// Every mutation is announced here so badge counts and any
/// presentation layer can follow along without polling.
#[derive(Debug, Clone)]
pub enum StoreEvent {
    /// A resolved alert entered the store.
    Added {
        /// The stored notification (boxed to reduce enum size variance).
        notification: Box<Notification>,
        /// Unread count after the add.
        unread: usize,
    },

    /// One notification transitioned unread to read.
    Read { id: NotificationId, unread: usize },

    /// Every notification was marked read; aggregates were dropped.
    AllRead,

    /// The whole collection was emptied.
    Cleared,

    /// One user's aggregate was dismissed; their history is kept.
    AggregateCleared { user_id: UserId },

    /// The operator clicked the desktop toast for this notification.
    /// Follows the corresponding `Read` event.
    Activated { id: NotificationId },
}

// ============================================================================
// Store Snapshot
// ============================================================================

/// Point-in-time copy of the store state.
#[derive(Debug, Clone, Default)]
pub struct StoreSnapshot {
    /// Notifications, most-recent-first.
    pub notifications: Vec<Notification>,
    pub unread: usize,
    /// Users with a standing alert since the last clear.
    pub aggregates: HashMap<UserId, UserAlertAggregate>,
}

impl StoreSnapshot {
    pub fn len(&self) -> usize {
        self.notifications.len()
    }

    pub fn is_empty(&self) -> bool {
        self.notifications.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use wd_core::Severity;

    #[test]
    fn test_store_error_display() {
        let err = StoreError::ChannelClosed;
        assert_eq!(err.to_string(), "notification store closed");
    }

    #[test]
    fn test_store_event_variants_clone() {
        let notification = Notification::from_alert(
            NotificationId::new(1),
            ResolvedAlert {
                kind: "user-inactive".to_string(),
                severity: Severity::Warning,
                message: "idle".to_string(),
                user_id: UserId::new(7),
                user_name: "Avery".to_string(),
                timestamp: Utc::now(),
            },
        );

        let added = StoreEvent::Added {
            notification: Box::new(notification),
            unread: 1,
        };
        let _cloned = added.clone();

        let read = StoreEvent::Read {
            id: NotificationId::new(1),
            unread: 0,
        };
        let _cloned = read.clone();

        let cleared = StoreEvent::AggregateCleared {
            user_id: UserId::new(7),
        };
        let _cloned = cleared.clone();
    }

    #[test]
    fn test_snapshot_default_is_empty() {
        let snapshot = StoreSnapshot::default();
        assert!(snapshot.is_empty());
        assert_eq!(snapshot.len(), 0);
        assert_eq!(snapshot.unread, 0);
        assert!(snapshot.aggregates.is_empty());
    }

    #[tokio::test]
    async fn test_command_oneshot_pattern() {
        let (tx, rx) = oneshot::channel::<NotificationId>();

        tokio::spawn(async move {
            tx.send(NotificationId::new(42)).ok();
        });

        let id = rx.await.expect("reply");
        assert_eq!(id, NotificationId::new(42));
    }
}
