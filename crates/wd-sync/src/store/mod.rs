//! Notification store using the actor pattern.
//!
//! The store is the single source of truth for resolved notifications,
//! the unread count, and per-user alert aggregates. It receives
//! commands via a tokio mpsc channel and announces every mutation on a
//! broadcast change feed.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────┐     ┌─────────────────┐     ┌──────────────────┐
//! │  Sync Engine   │────▶│   StoreActor    │────▶│ Broadcast Channel│
//! │  / CLI / Toast │     └─────────────────┘     └──────────────────┘
//! └────────────────┘             │                        │
//!         │   StoreCommand       │   StoreEvent           │
//!         │   (mpsc channel)     │   (broadcast)          ▼
//!         ▼                      ▼                 Badge counts and
//!    add / markRead        Vec<Notification>       list subscribers
//!    / clears              + unread + aggregates
//! ```
//!
//! Mutations mirror to the durable store on every apply and the
//! persisted snapshot is restored before the actor starts, so
//! notifications survive restarts.

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::notify::DesktopNotifier;
use crate::persist::LocalStore;

mod actor;
mod commands;
mod handle;

pub use actor::StoreActor;
pub use commands::{StoreCommand, StoreError, StoreEvent, StoreSnapshot};
pub use handle::StoreHandle;

/// Channel buffer sizes
const COMMAND_BUFFER: usize = 100;
const EVENT_BUFFER: usize = 100;

/// Wiring for [`spawn_store`].
#[derive(Default)]
pub struct StoreConfig {
    /// Durable backing; `None` keeps the store in memory only.
    pub persist: Option<LocalStore>,

    /// Desktop alert sink; `None` disables toasts.
    pub notifier: Option<Arc<dyn DesktopNotifier>>,
}

/// Spawn the store actor and return a handle plus the actor task.
///
/// Restores any persisted snapshot before the actor accepts commands,
/// so the first read already sees the previous run's notifications.
/// The task exits when `cancel` fires; join it during teardown.
pub fn spawn_store(
    config: StoreConfig,
    cancel: CancellationToken,
) -> (StoreHandle, JoinHandle<()>) {
    let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_BUFFER);
    let (event_tx, _) = broadcast::channel(EVENT_BUFFER);

    let mut actor = StoreActor::new(
        cmd_rx,
        cmd_tx.clone(),
        event_tx.clone(),
        cancel,
        config.persist,
        config.notifier,
    );
    actor.restore();

    let task = tokio::spawn(actor.run());
    let handle = StoreHandle::new(cmd_tx, event_tx);

    (handle, task)
}
