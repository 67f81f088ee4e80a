//! The sync engine task.
//!
//! One task owns the roster cache and the alert buffer; everything the
//! rest of the application learns about them comes through the watch
//! snapshot or the notification store. The engine consumes the channel
//! adapter's event pipe, reconciles presence, buffers or records
//! alerts, and keeps the roster fresh with periodic and on-demand
//! reloads.
//!
//! Reloads never block the event loop: each fetch runs in its own task
//! tagged with the issue number the cache handed out, and the cache
//! discards responses that a newer reload has overtaken.
//!
//! **Panic-Free Policy:** This module follows the project's panic-free
//! guidelines. No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`,
//! or `todo!()`.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use wd_api::{ApiResult, RosterSource};
use wd_core::UserRecord;
use wd_protocol::AlertEvent;

use crate::buffer::{resolve_alert, AlertBuffer, Disposition};
use crate::channel::ChannelEvent;
use crate::reconcile;
use crate::roster::{ApplyOutcome, RosterCache, RosterSnapshot};
use crate::store::StoreHandle;

/// Buffer size for the command channel.
const COMMAND_BUFFER: usize = 100;

/// Buffer size for finished-reload results. Small: at most a couple of
/// reloads are ever in flight.
const RELOAD_BUFFER: usize = 4;

/// Default interval between periodic roster reloads.
const DEFAULT_RELOAD_INTERVAL: Duration = Duration::from_secs(300);

// ============================================================================
// Configuration
// ============================================================================

/// Configuration for the sync engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// How often the roster is reloaded from the backend, beyond the
    /// on-demand reloads a reconnect or refresh command triggers.
    pub reload_interval: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            reload_interval: DEFAULT_RELOAD_INTERVAL,
        }
    }
}

// ============================================================================
// Commands
// ============================================================================

/// Commands accepted by the engine from its handles.
#[derive(Debug)]
pub enum EngineCommand {
    /// Ask for an immediate roster reload.
    Refresh,
}

/// A roster fetch that came back, tagged with the issue number the
/// cache assigned when the reload started.
struct FinishedReload {
    issue: u64,
    result: ApiResult<Vec<UserRecord>>,
}

// ============================================================================
// Handle
// ============================================================================

/// Cheap-to-clone handle for talking to the sync engine.
#[derive(Clone)]
pub struct EngineHandle {
    sender: mpsc::Sender<EngineCommand>,
    roster_rx: watch::Receiver<RosterSnapshot>,
}

impl EngineHandle {
    /// Requests an immediate roster reload. Advisory: a no-op once the
    /// engine has shut down.
    pub async fn refresh(&self) {
        let _ = self.sender.send(EngineCommand::Refresh).await;
    }

    /// Returns the most recently published roster snapshot.
    pub fn roster(&self) -> RosterSnapshot {
        self.roster_rx.borrow().clone()
    }

    /// Subscribes to roster snapshot updates.
    pub fn subscribe_roster(&self) -> watch::Receiver<RosterSnapshot> {
        self.roster_rx.clone()
    }
}

// ============================================================================
// Engine
// ============================================================================

/// Task that owns the roster cache and alert buffer.
pub struct SyncEngine {
    config: EngineConfig,

    /// Where roster reloads fetch from.
    source: Arc<dyn RosterSource>,

    /// Notification store the engine records alerts into.
    store: StoreHandle,

    /// Event pipe from the channel adapter.
    events: mpsc::Receiver<ChannelEvent>,

    /// Commands from handles.
    commands: mpsc::Receiver<EngineCommand>,

    /// Results coming back from spawned reload tasks. The engine keeps
    /// a sender so the channel never closes.
    reload_tx: mpsc::Sender<FinishedReload>,
    reload_rx: mpsc::Receiver<FinishedReload>,

    /// Published roster snapshots.
    roster_tx: watch::Sender<RosterSnapshot>,

    /// Cancellation token for graceful shutdown.
    cancel: CancellationToken,

    roster: RosterCache,
    buffer: AlertBuffer,
}

impl SyncEngine {
    /// Main loop. Runs until cancelled or until the channel adapter's
    /// event pipe closes.
    pub async fn run(mut self) {
        info!(
            reload_interval_secs = self.config.reload_interval.as_secs(),
            "Sync engine starting"
        );

        // The first tick completes immediately and doubles as the
        // startup roster load.
        let mut reload_tick = interval(self.config.reload_interval);

        loop {
            tokio::select! {
                biased;

                _ = self.cancel.cancelled() => {
                    info!("Sync engine shutting down");
                    break;
                }

                finished = self.reload_rx.recv() => {
                    // The engine holds a sender, so this never yields None
                    if let Some(finished) = finished {
                        self.handle_reload(finished).await;
                    }
                }

                event = self.events.recv() => {
                    match event {
                        Some(event) => self.handle_channel_event(event).await,
                        None => {
                            info!("Channel event pipe closed");
                            break;
                        }
                    }
                }

                command = self.commands.recv() => {
                    match command {
                        Some(command) => self.handle_command(command),
                        None => {
                            debug!("Engine command channel closed");
                            break;
                        }
                    }
                }

                _ = reload_tick.tick() => {
                    self.start_reload();
                }
            }
        }

        debug!("Sync engine task completed");
    }

    /// Kicks off a roster fetch in its own task, tagged with a fresh
    /// issue number.
    fn start_reload(&mut self) {
        let issue = self.roster.begin_reload();
        let source = Arc::clone(&self.source);
        let reload_tx = self.reload_tx.clone();

        debug!(issue, "Roster reload started");

        tokio::spawn(async move {
            let result = source.fetch_roster().await;
            // Ignore send error - engine may be shutting down
            let _ = reload_tx.send(FinishedReload { issue, result }).await;
        });
    }

    /// Applies a finished reload. A fetch error leaves the previous
    /// roster intact; a stale response is discarded by the cache.
    async fn handle_reload(&mut self, finished: FinishedReload) {
        let records = match finished.result {
            Ok(records) => records,
            Err(err) => {
                warn!(issue = finished.issue, error = %err, "Roster reload failed");
                return;
            }
        };

        match self.roster.apply(finished.issue, records) {
            ApplyOutcome::Applied { users, first_load } => {
                info!(issue = finished.issue, users, first_load, "Roster reload applied");
                self.publish_roster();
                if first_load {
                    self.drain_buffer().await;
                }
            }
            ApplyOutcome::Stale => {
                debug!(issue = finished.issue, "Stale roster response discarded");
            }
        }
    }

    /// Handles one event from the channel adapter.
    async fn handle_channel_event(&mut self, event: ChannelEvent) {
        match event {
            ChannelEvent::Connected { session } => {
                // The outage may have staled presence and membership;
                // refresh rather than trust the old roster.
                info!(session = ?session, "Event channel connected, refreshing roster");
                self.start_reload();
            }
            ChannelEvent::Disconnected => {
                warn!("Event channel lost, presence may be stale until reconnect");
            }
            ChannelEvent::Status(status) => {
                reconcile::apply_status_event(&mut self.roster, &self.store, &status).await;
                self.publish_roster();
            }
            ChannelEvent::Alert(alert) => {
                self.handle_alert(alert).await;
            }
        }
    }

    /// Buffers or records a server alert.
    async fn handle_alert(&mut self, alert: AlertEvent) {
        if !alert.is_actionable() {
            debug!(kind = %alert.kind, "Ignoring alert subtype");
            return;
        }

        match self.buffer.offer(alert) {
            Disposition::Queued => {}
            Disposition::Resolve(alert) => self.record_alert(&alert).await,
        }
    }

    fn handle_command(&mut self, command: EngineCommand) {
        match command {
            EngineCommand::Refresh => {
                debug!("Roster refresh requested");
                self.start_reload();
            }
        }
    }

    /// Releases the held backlog in arrival order, then anything that
    /// queued behind it mid-drain, and goes live.
    async fn drain_buffer(&mut self) {
        let backlog = self.buffer.begin_drain();
        if !backlog.is_empty() {
            info!(count = backlog.len(), "Releasing alerts held for the roster");
        }
        for alert in backlog {
            self.record_alert(&alert).await;
        }
        for alert in self.buffer.finish_drain() {
            self.record_alert(&alert).await;
        }
    }

    /// Resolves an alert against the roster and records it.
    async fn record_alert(&self, alert: &AlertEvent) {
        let resolved = resolve_alert(&self.roster, alert);
        if let Err(err) = self.store.add(resolved).await {
            warn!(user_id = %alert.user_id, error = %err, "Dropping alert, notification store closed");
        }
    }

    fn publish_roster(&self) {
        self.roster_tx.send_replace(self.roster.snapshot());
    }
}

// ============================================================================
// Spawning
// ============================================================================

/// Spawns the sync engine task.
///
/// `events` is the pipe returned by
/// [`spawn_channel`](crate::channel::spawn_channel). Returns the
/// engine handle and the task's join handle for teardown.
pub fn spawn_engine(
    config: EngineConfig,
    source: Arc<dyn RosterSource>,
    store: StoreHandle,
    events: mpsc::Receiver<ChannelEvent>,
    cancel: CancellationToken,
) -> (EngineHandle, JoinHandle<()>) {
    let (command_tx, command_rx) = mpsc::channel(COMMAND_BUFFER);
    let (reload_tx, reload_rx) = mpsc::channel(RELOAD_BUFFER);
    let (roster_tx, roster_rx) = watch::channel(RosterSnapshot::default());

    let engine = SyncEngine {
        config,
        source,
        store,
        events,
        commands: command_rx,
        reload_tx,
        reload_rx,
        roster_tx,
        cancel,
        roster: RosterCache::new(),
        buffer: AlertBuffer::new(),
    };
    let task = tokio::spawn(engine.run());

    (
        EngineHandle {
            sender: command_tx,
            roster_rx,
        },
        task,
    )
}

// ============================================================================
// Tests
// ============================================================================
