//! Client interface for interacting with the StoreActor.
//!
//! The `StoreHandle` is the cheap-to-clone face of the notification
//! store: commands go down an mpsc channel, replies come back on
//! oneshots, and the change feed is a broadcast subscription. Channel
//! errors surface as `StoreError::ChannelClosed`.

use tokio::sync::{broadcast, mpsc, oneshot};
use wd_core::{NotificationId, ResolvedAlert, UserId};

use super::commands::{StoreCommand, StoreError, StoreEvent, StoreSnapshot};

// ============================================================================
// Store Handle
// ============================================================================

/// Handle for interacting with the store actor.
///
/// Cheap to clone and shareable across tasks. All mutation methods are
/// async round-trips to the actor; reads fall back to empty defaults
/// when the actor is unreachable.
#[derive(Clone)]
pub struct StoreHandle {
    /// Command sender to the actor
    sender: mpsc::Sender<StoreCommand>,

    /// Change feed broadcaster for subscribing to updates
    event_sender: broadcast::Sender<StoreEvent>,
}

impl StoreHandle {
    pub fn new(
        sender: mpsc::Sender<StoreCommand>,
        event_sender: broadcast::Sender<StoreEvent>,
    ) -> Self {
        Self {
            sender,
            event_sender,
        }
    }

    /// Records a resolved alert and returns the minted id.
    ///
    /// # Errors
    ///
    /// - `StoreError::ChannelClosed` if the actor has shut down
    pub async fn add(&self, alert: ResolvedAlert) -> Result<NotificationId, StoreError> {
        let (tx, rx) = oneshot::channel();

        self.sender
            .send(StoreCommand::Add {
                alert: Box::new(alert),
                respond_to: tx,
            })
            .await
            .map_err(|_| StoreError::ChannelClosed)?;

        rx.await.map_err(|_| StoreError::ChannelClosed)
    }

    /// Marks one notification read.
    ///
    /// Returns `Ok(true)` when the flag actually flipped; already-read
    /// and unknown ids report `Ok(false)`.
    ///
    /// # Errors
    ///
    /// - `StoreError::ChannelClosed` if the actor has shut down
    pub async fn mark_read(&self, id: NotificationId) -> Result<bool, StoreError> {
        let (tx, rx) = oneshot::channel();

        self.sender
            .send(StoreCommand::MarkRead { id, respond_to: tx })
            .await
            .map_err(|_| StoreError::ChannelClosed)?;

        rx.await.map_err(|_| StoreError::ChannelClosed)
    }

    /// Marks every notification read, returning how many were still
    /// unread.
    ///
    /// # Errors
    ///
    /// - `StoreError::ChannelClosed` if the actor has shut down
    pub async fn mark_all_read(&self) -> Result<usize, StoreError> {
        let (tx, rx) = oneshot::channel();

        self.sender
            .send(StoreCommand::MarkAllRead { respond_to: tx })
            .await
            .map_err(|_| StoreError::ChannelClosed)?;

        rx.await.map_err(|_| StoreError::ChannelClosed)
    }

    /// Empties the collection, returning how many entries were dropped.
    ///
    /// # Errors
    ///
    /// - `StoreError::ChannelClosed` if the actor has shut down
    pub async fn clear_all(&self) -> Result<usize, StoreError> {
        let (tx, rx) = oneshot::channel();

        self.sender
            .send(StoreCommand::ClearAll { respond_to: tx })
            .await
            .map_err(|_| StoreError::ChannelClosed)?;

        rx.await.map_err(|_| StoreError::ChannelClosed)
    }

    /// Dismisses one user's aggregate; their history stays.
    ///
    /// Returns `Ok(true)` when an aggregate existed.
    ///
    /// # Errors
    ///
    /// - `StoreError::ChannelClosed` if the actor has shut down
    pub async fn clear_user_alert(&self, user_id: UserId) -> Result<bool, StoreError> {
        let (tx, rx) = oneshot::channel();

        self.sender
            .send(StoreCommand::ClearUserAlert {
                user_id,
                respond_to: tx,
            })
            .await
            .map_err(|_| StoreError::ChannelClosed)?;

        rx.await.map_err(|_| StoreError::ChannelClosed)
    }

    /// Reads the whole store.
    ///
    /// An unreachable actor reads as an empty snapshot.
    pub async fn snapshot(&self) -> StoreSnapshot {
        let (tx, rx) = oneshot::channel();

        if self
            .sender
            .send(StoreCommand::Snapshot { respond_to: tx })
            .await
            .is_err()
        {
            return StoreSnapshot::default();
        }

        rx.await.unwrap_or_default()
    }

    /// Current unread count.
    ///
    /// An unreachable actor reads as zero.
    pub async fn unread_count(&self) -> usize {
        let (tx, rx) = oneshot::channel();

        if self
            .sender
            .send(StoreCommand::UnreadCount { respond_to: tx })
            .await
            .is_err()
        {
            return 0;
        }

        rx.await.unwrap_or(0)
    }

    /// Subscribes to the change feed.
    ///
    /// Returns a broadcast receiver carrying every store mutation
    /// (adds, reads, clears, toast activations).
    ///
    /// This is a synchronous operation - it doesn't contact the actor.
    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.event_sender.subscribe()
    }
}
