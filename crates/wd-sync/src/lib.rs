//! Watchdesk Sync - Real-time alert synchronization engine
//!
//! This crate keeps an operator console consistent with the tracking
//! backend: it owns the live event channel, the reference directory of
//! tracked users, the alert buffer that absorbs out-of-order startup,
//! and the notification store every other component consults.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        wd-sync                               │
//! ├──────────────────────────────────────────────────────────────┤
//! │                                                              │
//! │  ┌────────────────┐  events   ┌───────────────────────────┐  │
//! │  │ ChannelAdapter │──────────▶│        SyncEngine         │  │
//! │  │ (TCP, backoff, │           │  RosterCache + AlertBuffer│  │
//! │  │  acks by seq)  │           │  + status reconciliation  │  │
//! │  └────────────────┘           └─────────────┬─────────────┘  │
//! │                                             │ add/clear      │
//! │                                             ▼                │
//! │  ┌────────────────┐  commands ┌───────────────────────────┐  │
//! │  │  StoreHandle   │──────────▶│        StoreActor         │  │
//! │  │ (cheap clones) │           │ (notification state owner)│  │
//! │  └────────────────┘           └─────────────┬─────────────┘  │
//! │                                             │ change feed    │
//! │                                             ▼                │
//! │                               broadcast::Sender<StoreEvent>  │
//! │                                                              │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! All tasks respect a shared `CancellationToken` for graceful
//! shutdown.
//!
//! # Panic-Free Guarantees
//!
//! All production code in this crate follows the panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - All fallible operations return `Result` or `Option`
//! - Channel operations handle closure gracefully

pub mod buffer;
pub mod channel;
pub mod config;
pub mod engine;
pub mod notify;
pub mod persist;
pub mod reconcile;
pub mod roster;
pub mod selection;
pub mod store;
pub mod view;

// Re-export commonly used types
pub use buffer::{AlertBuffer, BufferState};
pub use channel::{spawn_channel, ChannelAdapter, ChannelConfig, ChannelError, ChannelEvent, ChannelHandle};
pub use config::{ConfigError, SyncConfig};
pub use engine::{spawn_engine, EngineCommand, EngineConfig, EngineHandle};
pub use notify::{DesktopNotifier, NotifyError, NotifyOutcome, NotifySend};
pub use persist::{LocalStore, PersistError};
pub use roster::{RosterCache, RosterSnapshot};
pub use selection::SelectionSet;
pub use store::{spawn_store, StoreConfig, StoreError, StoreEvent, StoreHandle, StoreSnapshot};
pub use view::{filter_notifications, roster_view, NotificationFilter, ReadFilter};
