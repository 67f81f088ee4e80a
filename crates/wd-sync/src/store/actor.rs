//! Store actor - owns all notification state and processes commands.
//!
//! The StoreActor is the single owner of the notification collection,
//! the unread count, and the per-user aggregates. Commands arrive on an
//! mpsc channel and apply one at a time; every mutation is mirrored to
//! the durable store and announced on the broadcast change feed.
//!
//! # Panic-Free Guarantees
//!
//! This module follows the panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - All fallible operations use `?`, pattern matching, or `unwrap_or`
//! - Channel send failures are ignored or logged, never panic

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use wd_core::{Notification, NotificationId, ResolvedAlert, UserAlertAggregate, UserId};

use crate::notify::{DesktopNotifier, NotifyOutcome};
use crate::persist::{LocalStore, NOTIFICATIONS_KEY};

use super::commands::{StoreCommand, StoreEvent, StoreSnapshot};

// ============================================================================
// Persisted form
// ============================================================================

/// On-disk shape of the store, one JSON document under
/// [`NOTIFICATIONS_KEY`]. `unread` is stored for inspection but the
/// restore path recomputes it from the collection.
#[derive(Debug, Serialize, Deserialize)]
struct PersistedStore {
    next_id: u64,
    unread: usize,
    notifications: Vec<Notification>,
    aggregates: HashMap<UserId, UserAlertAggregate>,
}

// ============================================================================
// Store Actor
// ============================================================================

/// The notification store actor.
///
/// Implements the actor pattern: receives commands via mpsc channel,
/// processes them sequentially, and publishes change events to
/// subscribers. Runs until its cancellation token fires.
///
/// # Ownership
///
/// The actor owns:
/// - `notifications`: the ordered collection, most-recent-first
/// - `unread`: count of notifications still unread
/// - `aggregates`: per-user latest-alert-plus-count summaries
///
/// No other component may mutate these; everything goes through
/// [`StoreHandle`](super::StoreHandle).
pub struct StoreActor {
    /// Command receiver
    receiver: mpsc::Receiver<StoreCommand>,

    /// Cloned into desktop alert tasks so a toast click can come back
    /// as `MarkActivated`.
    self_sender: mpsc::Sender<StoreCommand>,

    /// Change feed publisher
    event_publisher: broadcast::Sender<StoreEvent>,

    /// Teardown signal shared with the rest of the subsystem
    cancel: CancellationToken,

    /// Notifications, most-recent-first. Prepend on add.
    notifications: Vec<Notification>,

    /// How many notifications are unread.
    unread: usize,

    /// Standing alert summary per user, dropped on clear.
    aggregates: HashMap<UserId, UserAlertAggregate>,

    /// Next id to mint. Keeps growing across restarts so sorting by id
    /// stays sorting by recency.
    next_id: u64,

    /// Durable backing. Set to `None` after a write failure, at which
    /// point the store carries on in memory only.
    persist: Option<LocalStore>,

    /// Desktop alert sink, when the platform has one.
    notifier: Option<Arc<dyn DesktopNotifier>>,
}

impl StoreActor {
    /// Creates a new store actor with empty state.
    ///
    /// Call [`restore`](Self::restore) before running to pick up a
    /// persisted snapshot.
    pub fn new(
        receiver: mpsc::Receiver<StoreCommand>,
        self_sender: mpsc::Sender<StoreCommand>,
        event_publisher: broadcast::Sender<StoreEvent>,
        cancel: CancellationToken,
        persist: Option<LocalStore>,
        notifier: Option<Arc<dyn DesktopNotifier>>,
    ) -> Self {
        Self {
            receiver,
            self_sender,
            event_publisher,
            cancel,
            notifications: Vec::new(),
            unread: 0,
            aggregates: HashMap::new(),
            next_id: 1,
            persist,
            notifier,
        }
    }

    /// Loads the persisted snapshot, when one exists.
    ///
    /// The unread count is recomputed from the restored collection
    /// rather than trusted, so drift in the stored value self-heals.
    /// Ids continue from wherever the previous run stopped.
    pub fn restore(&mut self) {
        let Some(store) = &self.persist else { return };

        let persisted: PersistedStore = match store.get(NOTIFICATIONS_KEY) {
            Ok(Some(state)) => state,
            Ok(None) => return,
            Err(err) => {
                warn!(error = %err, "Persisted notifications unreadable, starting empty");
                return;
            }
        };

        let recomputed = persisted.notifications.iter().filter(|n| !n.read).count();
        if recomputed != persisted.unread {
            warn!(
                stored = persisted.unread,
                recomputed, "Persisted unread count drifted, using recomputed value"
            );
        }

        let max_id = persisted
            .notifications
            .iter()
            .map(|n| n.id.as_u64())
            .max()
            .unwrap_or(0);

        self.notifications = persisted.notifications;
        self.unread = recomputed;
        self.aggregates = persisted.aggregates;
        self.next_id = persisted.next_id.max(max_id + 1);

        info!(
            notifications = self.notifications.len(),
            unread = self.unread,
            "Notification store restored"
        );
    }

    /// Runs the actor event loop until cancelled.
    ///
    /// This is the main entry point - call this in a spawned task.
    pub async fn run(mut self) {
        info!("Notification store actor starting");

        loop {
            tokio::select! {
                biased;

                _ = self.cancel.cancelled() => {
                    debug!("Notification store actor cancelled");
                    break;
                }

                cmd = self.receiver.recv() => {
                    match cmd {
                        Some(cmd) => self.handle_command(cmd),
                        None => break,
                    }
                }
            }
        }

        info!(
            notifications = self.notifications.len(),
            unread = self.unread,
            "Notification store actor stopped"
        );
    }

    /// Dispatches a command to the appropriate handler.
    fn handle_command(&mut self, cmd: StoreCommand) {
        match cmd {
            StoreCommand::Add { alert, respond_to } => {
                let id = self.handle_add(*alert);
                // Ignore send error - caller may have dropped the receiver
                let _ = respond_to.send(id);
            }
            StoreCommand::MarkRead { id, respond_to } => {
                let flipped = self.handle_mark_read(id);
                let _ = respond_to.send(flipped);
            }
            StoreCommand::MarkAllRead { respond_to } => {
                let newly_read = self.handle_mark_all_read();
                let _ = respond_to.send(newly_read);
            }
            StoreCommand::ClearAll { respond_to } => {
                let removed = self.handle_clear_all();
                let _ = respond_to.send(removed);
            }
            StoreCommand::ClearUserAlert {
                user_id,
                respond_to,
            } => {
                let existed = self.handle_clear_user_alert(user_id);
                let _ = respond_to.send(existed);
            }
            StoreCommand::Snapshot { respond_to } => {
                let _ = respond_to.send(self.snapshot());
            }
            StoreCommand::UnreadCount { respond_to } => {
                let _ = respond_to.send(self.unread);
            }
            StoreCommand::MarkActivated { id } => {
                self.handle_mark_activated(id);
            }
        }
    }

    // ========================================================================
    // Command Handlers
    // ========================================================================

    /// Handles recording a resolved alert.
    ///
    /// Prepends it (most-recent-first order), counts it unread, folds
    /// it into the user's aggregate, then kicks off the desktop toast.
    fn handle_add(&mut self, alert: ResolvedAlert) -> NotificationId {
        let id = NotificationId::new(self.next_id);
        self.next_id += 1;

        let notification = Notification::from_alert(id, alert);

        self.notifications.insert(0, notification.clone());
        self.unread += 1;
        match self.aggregates.get_mut(&notification.user_id) {
            Some(aggregate) => aggregate.update(notification.clone()),
            None => {
                self.aggregates.insert(
                    notification.user_id,
                    UserAlertAggregate::first(notification.clone()),
                );
            }
        }

        info!(
            id = %id,
            user_id = %notification.user_id,
            user = %notification.user_name,
            severity = %notification.severity,
            unread = self.unread,
            "Notification added"
        );

        self.flush();
        self.raise_desktop_alert(&notification);

        let _ = self.event_publisher.send(StoreEvent::Added {
            notification: Box::new(notification),
            unread: self.unread,
        });

        id
    }

    /// Handles marking one notification read.
    ///
    /// Idempotent: already-read and unknown ids change nothing and
    /// return `false`.
    fn handle_mark_read(&mut self, id: NotificationId) -> bool {
        let Some(notification) = self
            .notifications
            .iter_mut()
            .find(|n| n.id == id && !n.read)
        else {
            debug!(id = %id, "Mark-read was a no-op");
            return false;
        };

        notification.read = true;
        self.unread = self.unread.saturating_sub(1);

        debug!(id = %id, unread = self.unread, "Notification marked read");

        self.flush();
        let _ = self.event_publisher.send(StoreEvent::Read {
            id,
            unread: self.unread,
        });

        true
    }

    /// Handles marking everything read.
    ///
    /// Aggregates exist to flag unread-originating activity, so once
    /// nothing is unread they all drop too.
    fn handle_mark_all_read(&mut self) -> usize {
        let newly_read = self.notifications.iter().filter(|n| !n.read).count();
        for notification in &mut self.notifications {
            notification.read = true;
        }
        self.unread = 0;
        self.aggregates.clear();

        info!(newly_read, "All notifications marked read");

        self.flush();
        let _ = self.event_publisher.send(StoreEvent::AllRead);

        newly_read
    }

    /// Handles emptying the collection. Irreversible.
    fn handle_clear_all(&mut self) -> usize {
        let removed = self.notifications.len();
        self.notifications.clear();
        self.unread = 0;
        self.aggregates.clear();

        info!(removed, "Notification store cleared");

        self.flush();
        let _ = self.event_publisher.send(StoreEvent::Cleared);

        removed
    }

    /// Handles dismissing one user's aggregate.
    ///
    /// The "currently flagged" view is separate from history: the
    /// user's notifications stay in the collection untouched.
    fn handle_clear_user_alert(&mut self, user_id: UserId) -> bool {
        if self.aggregates.remove(&user_id).is_none() {
            debug!(user_id = %user_id, "No aggregate to clear");
            return false;
        }

        debug!(user_id = %user_id, "User aggregate cleared");

        self.flush();
        let _ = self
            .event_publisher
            .send(StoreEvent::AggregateCleared { user_id });

        true
    }

    /// Handles a toast click: mark that notification read, then
    /// announce the activation so the presentation layer can surface
    /// the notification list.
    fn handle_mark_activated(&mut self, id: NotificationId) {
        self.handle_mark_read(id);
        let _ = self.event_publisher.send(StoreEvent::Activated { id });
    }

    fn snapshot(&self) -> StoreSnapshot {
        StoreSnapshot {
            notifications: self.notifications.clone(),
            unread: self.unread,
            aggregates: self.aggregates.clone(),
        }
    }

    // ========================================================================
    // Side Effects
    // ========================================================================

    /// Mirrors the in-memory state to disk.
    ///
    /// A failed write logs once and turns persistence off; the
    /// in-memory state stays the source of truth either way.
    fn flush(&mut self) {
        let Some(store) = &self.persist else { return };

        let state = PersistedStore {
            next_id: self.next_id,
            unread: self.unread,
            notifications: self.notifications.clone(),
            aggregates: self.aggregates.clone(),
        };

        if let Err(err) = store.put(NOTIFICATIONS_KEY, &state) {
            error!(error = %err, "Persisting notifications failed, continuing in memory only");
            self.persist = None;
        }
    }

    /// Raises a best-effort desktop toast for a fresh notification.
    ///
    /// Never blocks the actor: the wait for a click runs in its own
    /// task and reports back as a `MarkActivated` command. Delivery
    /// failures are the notifier's to log; the notification is in the
    /// store regardless.
    fn raise_desktop_alert(&self, notification: &Notification) {
        let Some(notifier) = self.notifier.clone() else {
            return;
        };

        let sender = self.self_sender.clone();
        let notification = notification.clone();
        tokio::spawn(async move {
            match notifier.notify(&notification).await {
                Ok(NotifyOutcome::Activated) => {
                    // Click marks exactly this notification read. The
                    // send fails only when the actor is already gone,
                    // which makes the click moot.
                    let _ = sender
                        .send(StoreCommand::MarkActivated {
                            id: notification.id,
                        })
                        .await;
                }
                Ok(NotifyOutcome::Raised) => {}
                Err(_) => {}
            }
        });
    }

    // ========================================================================
    // Accessors (for testing)
    // ========================================================================

    /// Returns the number of stored notifications.
    #[cfg(test)]
    pub fn notification_count(&self) -> usize {
        self.notifications.len()
    }

    /// Returns the unread count.
    #[cfg(test)]
    pub fn unread_count(&self) -> usize {
        self.unread
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::NotifyError;
    use async_trait::async_trait;
    use chrono::Utc;
    use tempfile::TempDir;
    use wd_core::Severity;

    fn resolved(user_id: i64, message: &str) -> ResolvedAlert {
        ResolvedAlert {
            kind: "user-inactive".to_string(),
            severity: Severity::Warning,
            message: message.to_string(),
            user_id: UserId::new(user_id),
            user_name: format!("user-{user_id}"),
            timestamp: Utc::now(),
        }
    }

    fn create_actor() -> (StoreActor, broadcast::Receiver<StoreEvent>) {
        create_actor_with(None, None)
    }

    fn create_actor_with(
        persist: Option<LocalStore>,
        notifier: Option<Arc<dyn DesktopNotifier>>,
    ) -> (StoreActor, broadcast::Receiver<StoreEvent>) {
        let (cmd_tx, cmd_rx) = mpsc::channel(16);
        let (event_tx, event_rx) = broadcast::channel(16);
        let actor = StoreActor::new(
            cmd_rx,
            cmd_tx,
            event_tx,
            CancellationToken::new(),
            persist,
            notifier,
        );
        (actor, event_rx)
    }

    #[tokio::test]
    async fn test_add_prepends_most_recent_first() {
        let (mut actor, _) = create_actor();

        actor.handle_add(resolved(1, "first"));
        actor.handle_add(resolved(2, "second"));

        let snapshot = actor.snapshot();
        assert_eq!(snapshot.notifications.len(), 2);
        assert_eq!(snapshot.notifications[0].message, "second");
        assert_eq!(snapshot.notifications[1].message, "first");
    }

    #[tokio::test]
    async fn test_add_counts_unread_and_builds_aggregate() {
        let (mut actor, mut event_rx) = create_actor();

        let id = actor.handle_add(resolved(7, "idle"));

        assert_eq!(actor.unread_count(), 1);
        let snapshot = actor.snapshot();
        let aggregate = snapshot
            .aggregates
            .get(&UserId::new(7))
            .expect("aggregate for user 7");
        assert_eq!(aggregate.count, 1);
        assert_eq!(aggregate.latest.id, id);

        let event = event_rx.try_recv().expect("added event");
        assert!(matches!(event, StoreEvent::Added { unread: 1, .. }));
    }

    #[tokio::test]
    async fn test_repeat_alerts_accumulate_in_aggregate() {
        let (mut actor, _) = create_actor();

        actor.handle_add(resolved(7, "idle once"));
        let latest = actor.handle_add(resolved(7, "idle twice"));

        let snapshot = actor.snapshot();
        let aggregate = snapshot
            .aggregates
            .get(&UserId::new(7))
            .expect("aggregate for user 7");
        assert_eq!(aggregate.count, 2);
        assert_eq!(aggregate.latest.id, latest);
        assert_eq!(aggregate.latest.message, "idle twice");
    }

    #[tokio::test]
    async fn test_mark_read_is_idempotent() {
        let (mut actor, _) = create_actor();

        let id = actor.handle_add(resolved(7, "idle"));
        assert_eq!(actor.unread_count(), 1);

        assert!(actor.handle_mark_read(id));
        assert_eq!(actor.unread_count(), 0);

        // Second mark is a no-op, unread stays at zero.
        assert!(!actor.handle_mark_read(id));
        assert_eq!(actor.unread_count(), 0);
    }

    #[tokio::test]
    async fn test_mark_read_unknown_id_is_noop() {
        let (mut actor, _) = create_actor();

        actor.handle_add(resolved(7, "idle"));
        assert!(!actor.handle_mark_read(NotificationId::new(999)));
        assert_eq!(actor.unread_count(), 1);
    }

    #[tokio::test]
    async fn test_mark_all_read_zeroes_unread_and_drops_aggregates() {
        let (mut actor, _) = create_actor();

        actor.handle_add(resolved(1, "one"));
        actor.handle_add(resolved(2, "two"));
        actor.handle_add(resolved(2, "three"));
        assert_eq!(actor.unread_count(), 3);

        let newly_read = actor.handle_mark_all_read();
        assert_eq!(newly_read, 3);
        assert_eq!(actor.unread_count(), 0);

        let snapshot = actor.snapshot();
        assert!(snapshot.notifications.iter().all(|n| n.read));
        assert!(snapshot.aggregates.is_empty());
        // History is intact.
        assert_eq!(snapshot.notifications.len(), 3);
    }

    #[tokio::test]
    async fn test_clear_all_empties_everything() {
        let (mut actor, _) = create_actor();

        actor.handle_add(resolved(1, "one"));
        actor.handle_add(resolved(2, "two"));

        let removed = actor.handle_clear_all();
        assert_eq!(removed, 2);

        let snapshot = actor.snapshot();
        assert!(snapshot.is_empty());
        assert_eq!(snapshot.unread, 0);
        assert!(snapshot.aggregates.is_empty());
    }

    #[tokio::test]
    async fn test_clear_user_alert_keeps_history() {
        let (mut actor, _) = create_actor();

        actor.handle_add(resolved(7, "idle"));
        actor.handle_add(resolved(8, "also idle"));

        assert!(actor.handle_clear_user_alert(UserId::new(7)));

        let snapshot = actor.snapshot();
        assert!(!snapshot.aggregates.contains_key(&UserId::new(7)));
        assert!(snapshot.aggregates.contains_key(&UserId::new(8)));
        // Both notifications survive, unread untouched.
        assert_eq!(snapshot.notifications.len(), 2);
        assert_eq!(snapshot.unread, 2);
    }

    #[tokio::test]
    async fn test_clear_user_alert_without_aggregate() {
        let (mut actor, _) = create_actor();
        assert!(!actor.handle_clear_user_alert(UserId::new(404)));
    }

    #[tokio::test]
    async fn test_ids_grow_monotonically() {
        let (mut actor, _) = create_actor();

        let first = actor.handle_add(resolved(1, "a"));
        let second = actor.handle_add(resolved(2, "b"));
        actor.handle_clear_all();
        let third = actor.handle_add(resolved(3, "c"));

        assert!(second > first);
        // Clearing does not recycle ids.
        assert!(third > second);
    }

    #[tokio::test]
    async fn test_change_feed_event_order() {
        let (mut actor, mut event_rx) = create_actor();

        let id = actor.handle_add(resolved(7, "idle"));
        actor.handle_mark_read(id);
        actor.handle_clear_user_alert(UserId::new(7));

        assert!(matches!(
            event_rx.try_recv().expect("added"),
            StoreEvent::Added { .. }
        ));
        assert!(matches!(
            event_rx.try_recv().expect("read"),
            StoreEvent::Read { unread: 0, .. }
        ));
        assert!(matches!(
            event_rx.try_recv().expect("aggregate cleared"),
            StoreEvent::AggregateCleared { .. }
        ));
    }

    #[tokio::test]
    async fn test_restore_recomputes_unread_and_continues_ids() {
        let dir = TempDir::new().expect("tempdir");
        let store = LocalStore::open(dir.path()).expect("open store");

        // First run: three notifications, one read.
        {
            let (mut actor, _) = create_actor_with(Some(store.clone()), None);
            actor.handle_add(resolved(1, "one"));
            let id = actor.handle_add(resolved(2, "two"));
            actor.handle_add(resolved(3, "three"));
            actor.handle_mark_read(id);
        }

        // Second run restores the snapshot.
        let (mut actor, _) = create_actor_with(Some(store), None);
        actor.restore();

        assert_eq!(actor.notification_count(), 3);
        assert_eq!(actor.unread_count(), 2);

        let next = actor.handle_add(resolved(4, "four"));
        assert_eq!(next, NotificationId::new(4));
    }

    #[tokio::test]
    async fn test_restore_heals_drifted_unread_count() {
        let dir = TempDir::new().expect("tempdir");
        let store = LocalStore::open(dir.path()).expect("open store");

        let notification = Notification::from_alert(NotificationId::new(1), resolved(7, "idle"));
        let tampered = PersistedStore {
            next_id: 2,
            // Wrong on purpose: the collection has one unread entry.
            unread: 9,
            notifications: vec![notification],
            aggregates: HashMap::new(),
        };
        store.put(NOTIFICATIONS_KEY, &tampered).expect("seed state");

        let (mut actor, _) = create_actor_with(Some(store), None);
        actor.restore();

        assert_eq!(actor.unread_count(), 1);
    }

    #[tokio::test]
    async fn test_restore_tolerates_corrupt_state() {
        let dir = TempDir::new().expect("tempdir");
        let store = LocalStore::open(dir.path()).expect("open store");
        std::fs::write(dir.path().join("notifications.json"), "{not json").expect("write");

        let (mut actor, _) = create_actor_with(Some(store), None);
        actor.restore();

        assert_eq!(actor.notification_count(), 0);
        assert_eq!(actor.unread_count(), 0);
    }

    #[tokio::test]
    async fn test_write_failure_degrades_to_memory_only() {
        let dir = TempDir::new().expect("tempdir");
        let store = LocalStore::open(dir.path()).expect("open store");
        let (mut actor, _) = create_actor_with(Some(store), None);

        // Make the next flush fail by removing the backing directory.
        std::fs::remove_dir_all(dir.path()).expect("remove dir");

        actor.handle_add(resolved(7, "idle"));
        assert_eq!(actor.notification_count(), 1);
        assert!(actor.persist.is_none());

        // Later mutations keep working without a backing store.
        actor.handle_add(resolved(8, "still idle"));
        assert_eq!(actor.notification_count(), 2);
    }

    struct ClickingNotifier;

    #[async_trait]
    impl DesktopNotifier for ClickingNotifier {
        async fn notify(&self, _n: &Notification) -> Result<NotifyOutcome, NotifyError> {
            Ok(NotifyOutcome::Activated)
        }
    }

    #[tokio::test]
    async fn test_toast_click_marks_notification_read() {
        let (mut actor, mut event_rx) = create_actor_with(None, Some(Arc::new(ClickingNotifier)));

        let id = actor.handle_add(resolved(7, "idle"));
        assert_eq!(actor.unread_count(), 1);

        // The spawned toast task reports the click as a command.
        let cmd = actor.receiver.recv().await.expect("activation command");
        assert!(matches!(cmd, StoreCommand::MarkActivated { id: got } if got == id));
        actor.handle_command(cmd);

        assert_eq!(actor.unread_count(), 0);

        assert!(matches!(
            event_rx.try_recv().expect("added"),
            StoreEvent::Added { .. }
        ));
        assert!(matches!(
            event_rx.try_recv().expect("read"),
            StoreEvent::Read { .. }
        ));
        assert!(matches!(
            event_rx.try_recv().expect("activated"),
            StoreEvent::Activated { id: got } if got == id
        ));
    }

    struct FailingNotifier;

    #[async_trait]
    impl DesktopNotifier for FailingNotifier {
        async fn notify(&self, _n: &Notification) -> Result<NotifyOutcome, NotifyError> {
            Err(NotifyError::Unavailable("no display".to_string()))
        }
    }

    #[tokio::test]
    async fn test_toast_failure_never_blocks_add() {
        let (mut actor, _) = create_actor_with(None, Some(Arc::new(FailingNotifier)));

        actor.handle_add(resolved(7, "idle"));
        assert_eq!(actor.notification_count(), 1);
        assert_eq!(actor.unread_count(), 1);
    }
}
