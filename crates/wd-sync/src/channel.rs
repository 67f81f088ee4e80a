//! Live event channel adapter.
//!
//! This module provides the `ChannelAdapter` which handles:
//! - Connection to the tracking backend over TCP (newline-delimited JSON)
//! - Automatic reconnection with exponential backoff
//! - The admin hello handshake on every (re)connect
//! - Forwarding server pushes to the sync engine over an event pipe
//!   that survives reconnects
//! - Correlating outbound commands with their acknowledgements by `seq`
//!
//! **Panic-Free Policy:** This module follows the project's panic-free
//! guidelines. No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`,
//! or `todo!()`.

use std::collections::HashMap;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, timeout, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use wd_core::UserId;
use wd_protocol::{AckPayload, AlertEvent, ClientFrame, ServerFrame, StatusEvent, MAX_FRAME_SIZE};

/// Buffer size for the command channel (handle -> adapter).
const COMMAND_BUFFER: usize = 100;

/// Buffer size for the event pipe (adapter -> engine).
const EVENT_BUFFER: usize = 100;

/// How often pending acknowledgements are checked against their deadline.
const ACK_SWEEP_INTERVAL: Duration = Duration::from_millis(500);

/// How long to wait for the welcome frame after sending hello.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

// ============================================================================
// Configuration
// ============================================================================

/// Configuration for the channel adapter.
///
/// Controls connection behavior including the backend address, retry
/// logic, and the acknowledgement deadline for outbound commands.
///
/// # Example
///
/// ```rust
/// use wd_sync::channel::ChannelConfig;
/// use std::time::Duration;
///
/// let config = ChannelConfig {
///     addr: "10.0.0.7:4500".to_string(),
///     ack_timeout: Duration::from_secs(5),
///     ..Default::default()
/// };
/// ```
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Address of the backend event channel, e.g. `host:port`.
    pub addr: String,

    /// Initial delay before first retry after connection failure.
    pub retry_initial_delay: Duration,

    /// Maximum delay between retry attempts.
    pub retry_max_delay: Duration,

    /// Multiplier for exponential backoff (e.g., 2.0 doubles delay each retry).
    pub retry_multiplier: f64,

    /// How long an outbound command may wait for its acknowledgement
    /// before it is failed back to the caller.
    pub ack_timeout: Duration,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:4500".to_string(),
            retry_initial_delay: Duration::from_secs(1),
            retry_max_delay: Duration::from_secs(30),
            retry_multiplier: 2.0,
            ack_timeout: Duration::from_secs(10),
        }
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Errors surfaced by the channel adapter and its handle.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    /// The adapter task has shut down and no longer accepts commands.
    #[error("channel adapter closed")]
    ChannelClosed,

    /// A command was issued while the socket was down; it is not queued.
    #[error("not connected to the event channel")]
    NotConnected,

    /// No acknowledgement arrived before the deadline.
    #[error("no acknowledgement within {0:?}")]
    AckTimeout(Duration),

    /// The server acknowledged the command as failed.
    #[error("rejected by server: {0}")]
    Rejected(String),

    /// The connection dropped while the command was awaiting its ack.
    #[error("connection lost before acknowledgement")]
    ConnectionLost,

    /// The hello/welcome exchange did not complete.
    #[error("handshake failed: {0}")]
    Handshake(String),

    /// An inbound frame exceeded the protocol size cap.
    #[error("frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: usize, max: usize },

    /// Socket-level failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A frame could not be encoded or decoded.
    #[error("invalid frame: {0}")]
    Frame(#[from] serde_json::Error),
}

// ============================================================================
// Events and Commands
// ============================================================================

/// Events the adapter forwards to the sync engine.
///
/// The pipe carrying these survives socket loss: consumers subscribe
/// once and see connection lifecycle events interleaved with server
/// pushes.
#[derive(Debug, Clone)]
pub enum ChannelEvent {
    /// Handshake completed on a fresh connection. Fired on every
    /// reconnect, so consumers can refresh state the outage may have
    /// staled.
    Connected {
        /// Server-assigned session label, when the backend provides one.
        session: Option<String>,
    },
    /// Presence change pushed by the backend.
    Status(StatusEvent),
    /// Server-raised alert.
    Alert(AlertEvent),
    /// The socket dropped; the adapter is backing off before redialing.
    Disconnected,
}

/// Commands accepted by the adapter from its handles.
enum ChannelCommand {
    /// Direct operator message to a user; resolved when the server
    /// acks, nacks, or the deadline passes.
    Notify {
        user_id: UserId,
        name: String,
        message: String,
        respond_to: oneshot::Sender<Result<(), ChannelError>>,
    },
    /// Tracking toggle for a user. The responder is optional: the
    /// fire-and-forget form still carries a seq so the server can ack,
    /// but nobody waits on it.
    Toggle {
        user_id: UserId,
        toggled: bool,
        respond_to: Option<oneshot::Sender<Result<(), ChannelError>>>,
    },
}

/// An outbound command awaiting its acknowledgement.
struct PendingAck {
    /// Present for commands whose caller awaits the outcome; absent
    /// for best-effort commands where the ack is only logged.
    respond_to: Option<oneshot::Sender<Result<(), ChannelError>>>,
    deadline: Instant,
}

// ============================================================================
// Handle
// ============================================================================

/// Cheap-to-clone handle for issuing commands to the channel adapter.
#[derive(Clone)]
pub struct ChannelHandle {
    sender: mpsc::Sender<ChannelCommand>,
}

impl ChannelHandle {
    pub(crate) fn new(sender: mpsc::Sender<ChannelCommand>) -> Self {
        Self { sender }
    }

    /// Sends a direct message to a user and waits for the server's
    /// acknowledgement.
    ///
    /// Fails with `NotConnected` if the socket is down, `Rejected` if
    /// the server nacks, `AckTimeout` if no ack arrives before the
    /// configured deadline, and `ConnectionLost` if the socket drops
    /// while waiting.
    pub async fn notify_user(
        &self,
        user_id: UserId,
        name: &str,
        message: &str,
    ) -> Result<(), ChannelError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(ChannelCommand::Notify {
                user_id,
                name: name.to_string(),
                message: message.to_string(),
                respond_to: tx,
            })
            .await
            .map_err(|_| ChannelError::ChannelClosed)?;
        rx.await.map_err(|_| ChannelError::ChannelClosed)?
    }

    /// Emits a tracking toggle for a user and waits for the server's
    /// acknowledgement. Same failure modes as
    /// [`notify_user`](Self::notify_user).
    pub async fn toggle_user(&self, user_id: UserId, toggled: bool) -> Result<(), ChannelError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(ChannelCommand::Toggle {
                user_id,
                toggled,
                respond_to: Some(tx),
            })
            .await
            .map_err(|_| ChannelError::ChannelClosed)?;
        rx.await.map_err(|_| ChannelError::ChannelClosed)?
    }

    /// Fire-and-forget form of [`toggle_user`](Self::toggle_user):
    /// returns once the command is queued. A nack only shows up in the
    /// adapter's log.
    pub async fn toggle_user_forget(
        &self,
        user_id: UserId,
        toggled: bool,
    ) -> Result<(), ChannelError> {
        self.sender
            .send(ChannelCommand::Toggle {
                user_id,
                toggled,
                respond_to: None,
            })
            .await
            .map_err(|_| ChannelError::ChannelClosed)
    }
}

// ============================================================================
// Adapter
// ============================================================================

/// An established connection after a successful handshake.
struct Connection {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    session: Option<String>,
}

/// Task that owns the backend connection.
///
/// # Connection Lifecycle
///
/// 1. Dial the backend address, retrying with exponential backoff
/// 2. On success, send `hello` and wait for `welcome`
/// 3. A successful handshake resets the backoff delay
/// 4. Read frames and process commands in a loop
/// 5. On disconnect, fail pending acks, notify consumers, and redial
pub struct ChannelAdapter {
    config: ChannelConfig,

    /// Commands from handles.
    command_rx: mpsc::Receiver<ChannelCommand>,

    /// Pipe to the sync engine; survives reconnects.
    event_tx: mpsc::Sender<ChannelEvent>,

    /// Cancellation token for graceful shutdown.
    cancel: CancellationToken,

    /// Next seq to assign; restarts at 1 on every connection.
    next_seq: u64,

    /// Commands awaiting acknowledgement, keyed by seq.
    pending: HashMap<u64, PendingAck>,
}

impl ChannelAdapter {
    fn new(
        config: ChannelConfig,
        command_rx: mpsc::Receiver<ChannelCommand>,
        event_tx: mpsc::Sender<ChannelEvent>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            command_rx,
            event_tx,
            cancel,
            next_seq: 1,
            pending: HashMap::new(),
        }
    }

    /// Main loop that maintains the connection to the backend.
    ///
    /// Runs until the cancellation token fires. Each pass dials with
    /// backoff, drives the connection until it ends, then fails any
    /// commands still awaiting acks and tells consumers the socket
    /// dropped before redialing.
    pub async fn run(mut self) {
        info!(addr = %self.config.addr, "Channel adapter starting");

        loop {
            if self.cancel.is_cancelled() {
                break;
            }

            let connection = match self.connect_with_retry().await {
                Ok(connection) => connection,
                // Only returns Err when cancelled or when every
                // consumer is gone; either way the adapter is done.
                Err(_) => break,
            };

            let handles_gone = match self.drive_connection(connection).await {
                Ok(()) => false,
                Err(ChannelError::ChannelClosed) => {
                    debug!("All channel handles dropped, stopping adapter");
                    true
                }
                Err(e) => {
                    warn!(error = %e, "Connection ended with error");
                    false
                }
            };

            self.fail_pending();

            if self.event_tx.send(ChannelEvent::Disconnected).await.is_err() {
                debug!("Event pipe closed, stopping adapter");
                break;
            }

            if handles_gone {
                break;
            }
        }

        self.fail_pending();
        info!("Channel adapter stopped");
    }

    /// Dials the backend with exponential backoff until a handshake
    /// succeeds.
    ///
    /// Commands arriving while offline are failed immediately with
    /// `NotConnected` rather than queued against a dead socket.
    async fn connect_with_retry(&mut self) -> Result<Connection, ChannelError> {
        let mut delay = self.config.retry_initial_delay;
        let mut attempt = 0u32;

        loop {
            attempt = attempt.saturating_add(1);

            debug!(attempt, addr = %self.config.addr, "Dialing event channel");

            match self.try_connect().await {
                Ok(connection) => {
                    info!(attempt, session = ?connection.session, "Handshake complete");
                    return Ok(connection);
                }
                Err(e) => {
                    if attempt == 1 {
                        warn!(addr = %self.config.addr, error = %e, "Event channel unreachable, will retry");
                    } else {
                        debug!(attempt, error = %e, "Connection attempt failed");
                    }
                }
            }

            // Wait before retry, rejecting offline commands and
            // checking for cancellation
            tokio::select! {
                biased;

                _ = self.cancel.cancelled() => {
                    info!("Connection retry cancelled");
                    return Err(ChannelError::ChannelClosed);
                }

                command = self.command_rx.recv() => {
                    match command {
                        Some(command) => reject_offline(command),
                        None => return Err(ChannelError::ChannelClosed),
                    }
                }

                _ = sleep(delay) => {
                    let next_delay_ms =
                        (delay.as_millis() as f64 * self.config.retry_multiplier) as u64;
                    delay = Duration::from_millis(next_delay_ms).min(self.config.retry_max_delay);
                }
            }
        }
    }

    /// One dial attempt: TCP connect plus the hello/welcome exchange.
    async fn try_connect(&self) -> Result<Connection, ChannelError> {
        let stream = TcpStream::connect(&self.config.addr).await?;
        let (reader, mut writer) = stream.into_split();
        let mut reader = BufReader::new(reader);

        send_frame(&mut writer, &ClientFrame::hello()).await?;

        let session = match timeout(HANDSHAKE_TIMEOUT, read_welcome(&mut reader)).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(ChannelError::Handshake(
                    "no welcome before deadline".to_string(),
                ))
            }
        };

        Ok(Connection {
            reader,
            writer,
            session,
        })
    }

    /// Drives an established connection until it ends.
    ///
    /// Multiplexes socket reads, handle commands, the ack sweep tick,
    /// and cancellation. Returns `Ok(())` on orderly teardown (EOF or
    /// cancellation), `Err(ChannelClosed)` when every handle is gone,
    /// and other errors when the socket or a write fails.
    async fn drive_connection(&mut self, connection: Connection) -> Result<(), ChannelError> {
        let Connection {
            mut reader,
            mut writer,
            session,
        } = connection;

        // Fresh connection, fresh seq space; nothing pending survives
        // a disconnect so acks cannot cross connections.
        self.next_seq = 1;

        if self.event_tx.send(ChannelEvent::Connected { session }).await.is_err() {
            // Every consumer is gone; run() notices on the next
            // Disconnected send and stops.
            return Ok(());
        }

        let mut sweep = interval(ACK_SWEEP_INTERVAL);
        let mut line = String::new();

        loop {
            line.clear();

            tokio::select! {
                biased;

                _ = self.cancel.cancelled() => {
                    debug!("Channel loop cancelled");
                    return Ok(());
                }

                read_result = reader.read_line(&mut line) => {
                    match read_result {
                        Ok(0) => {
                            info!("Server closed connection");
                            return Ok(());
                        }
                        Ok(_) => {
                            if line.len() > MAX_FRAME_SIZE {
                                return Err(ChannelError::FrameTooLarge {
                                    size: line.len(),
                                    max: MAX_FRAME_SIZE,
                                });
                            }
                            if let Err(e) = self.handle_frame(line.trim()).await {
                                warn!(error = %e, "Failed to handle frame");
                                // Continue reading - don't disconnect on single parse error
                            }
                        }
                        Err(e) => {
                            return Err(ChannelError::Io(e));
                        }
                    }
                }

                command = self.command_rx.recv() => {
                    match command {
                        Some(command) => self.handle_command(&mut writer, command).await?,
                        None => {
                            debug!("Command channel closed");
                            return Err(ChannelError::ChannelClosed);
                        }
                    }
                }

                _ = sweep.tick() => {
                    self.sweep_pending();
                }
            }
        }
    }

    /// Assigns a seq, registers the pending ack, and writes the frame.
    async fn handle_command(
        &mut self,
        writer: &mut OwnedWriteHalf,
        command: ChannelCommand,
    ) -> Result<(), ChannelError> {
        let deadline = Instant::now() + self.config.ack_timeout;

        match command {
            ChannelCommand::Notify {
                user_id,
                name,
                message,
                respond_to,
            } => {
                let seq = self.assign_seq();
                self.pending.insert(
                    seq,
                    PendingAck {
                        respond_to: Some(respond_to),
                        deadline,
                    },
                );
                let frame = ClientFrame::notify_user(seq, user_id, &name, &message);
                // A write failure ends the connection; fail_pending
                // then resolves the caller with ConnectionLost.
                send_frame(writer, &frame).await?;
                debug!(seq, user_id = %user_id, "Notification dispatched");
            }
            ChannelCommand::Toggle {
                user_id,
                toggled,
                respond_to,
            } => {
                let seq = self.assign_seq();
                self.pending.insert(seq, PendingAck { respond_to, deadline });
                let frame = ClientFrame::admin_toggle_user(seq, user_id, toggled);
                send_frame(writer, &frame).await?;
                debug!(seq, user_id = %user_id, toggled, "Tracking toggle dispatched");
            }
        }

        Ok(())
    }

    /// Handles a single frame from the server.
    async fn handle_frame(&mut self, line: &str) -> Result<(), ChannelError> {
        let frame: ServerFrame = serde_json::from_str(line)?;

        match frame {
            ServerFrame::UserStatusUpdate(event) => {
                debug!(user_id = %event.user_id, online = event.is_online, "Status update received");
                // Ignore send error - engine may be shutting down
                let _ = self.event_tx.send(ChannelEvent::Status(event)).await;
            }
            ServerFrame::AdminAlert(alert) => {
                debug!(kind = %alert.kind, user_id = %alert.user_id, "Server alert received");
                let _ = self.event_tx.send(ChannelEvent::Alert(alert)).await;
            }
            ServerFrame::Ack(payload) => {
                self.handle_ack(payload);
            }
            ServerFrame::Welcome(_) => {
                // Only expected during handshake
                warn!("Unexpected welcome frame after handshake");
            }
        }

        Ok(())
    }

    /// Resolves the pending command the ack's seq refers to.
    fn handle_ack(&mut self, payload: AckPayload) {
        let Some(pending) = self.pending.remove(&payload.seq) else {
            debug!(seq = payload.seq, "Ack for unknown seq");
            return;
        };

        let result = if payload.success {
            Ok(())
        } else {
            let reason = payload
                .message
                .unwrap_or_else(|| "unspecified".to_string());
            Err(ChannelError::Rejected(reason))
        };

        match pending.respond_to {
            Some(respond_to) => {
                // Ignore send error - caller may have dropped the receiver
                let _ = respond_to.send(result);
            }
            None => {
                if let Err(e) = result {
                    warn!(seq = payload.seq, error = %e, "Best-effort command rejected");
                }
            }
        }
    }

    /// Fails every pending command whose deadline has passed.
    fn sweep_pending(&mut self) {
        let now = Instant::now();
        let expired: Vec<u64> = self
            .pending
            .iter()
            .filter(|(_, pending)| pending.deadline <= now)
            .map(|(seq, _)| *seq)
            .collect();

        for seq in expired {
            if let Some(pending) = self.pending.remove(&seq) {
                warn!(seq, "No acknowledgement before deadline");
                if let Some(respond_to) = pending.respond_to {
                    // Ignore send error - caller may have dropped the receiver
                    let _ = respond_to.send(Err(ChannelError::AckTimeout(self.config.ack_timeout)));
                }
            }
        }
    }

    /// Fails every pending command; called when the connection ends.
    fn fail_pending(&mut self) {
        if self.pending.is_empty() {
            return;
        }

        debug!(count = self.pending.len(), "Failing commands pending at disconnect");

        for (_, pending) in self.pending.drain() {
            if let Some(respond_to) = pending.respond_to {
                // Ignore send error - caller may have dropped the receiver
                let _ = respond_to.send(Err(ChannelError::ConnectionLost));
            }
        }
    }

    fn assign_seq(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq = self.next_seq.wrapping_add(1);
        seq
    }

    /// Test accessor for the pending-ack count.
    #[cfg(test)]
    fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

/// Fails a command issued while the socket is down.
fn reject_offline(command: ChannelCommand) {
    match command {
        ChannelCommand::Notify {
            user_id, respond_to, ..
        } => {
            debug!(user_id = %user_id, "Rejecting notification while offline");
            // Ignore send error - caller may have dropped the receiver
            let _ = respond_to.send(Err(ChannelError::NotConnected));
        }
        ChannelCommand::Toggle {
            user_id, respond_to, ..
        } => match respond_to {
            Some(respond_to) => {
                debug!(user_id = %user_id, "Rejecting tracking toggle while offline");
                // Ignore send error - caller may have dropped the receiver
                let _ = respond_to.send(Err(ChannelError::NotConnected));
            }
            None => {
                debug!(user_id = %user_id, "Dropping tracking toggle while offline");
            }
        },
    }
}

/// Writes one frame followed by the newline delimiter.
async fn send_frame<W>(writer: &mut W, frame: &ClientFrame) -> Result<(), ChannelError>
where
    W: AsyncWriteExt + Unpin,
{
    let json = serde_json::to_string(frame)?;
    writer.write_all(json.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await?;
    Ok(())
}

/// Reads the welcome frame that answers our hello.
async fn read_welcome<R>(reader: &mut R) -> Result<Option<String>, ChannelError>
where
    R: AsyncBufReadExt + Unpin,
{
    let mut line = String::new();
    let bytes_read = reader.read_line(&mut line).await?;

    if bytes_read == 0 {
        return Err(ChannelError::Handshake(
            "connection closed before welcome".to_string(),
        ));
    }
    if line.len() > MAX_FRAME_SIZE {
        return Err(ChannelError::FrameTooLarge {
            size: line.len(),
            max: MAX_FRAME_SIZE,
        });
    }

    let frame: ServerFrame = serde_json::from_str(line.trim())?;
    match frame {
        ServerFrame::Welcome(payload) => Ok(payload.session),
        other => Err(ChannelError::Handshake(format!(
            "unexpected frame: {other:?}"
        ))),
    }
}

// ============================================================================
// Spawning
// ============================================================================

/// Spawns the channel adapter task.
///
/// Returns the command handle, the event pipe the sync engine consumes,
/// and the task's join handle for teardown.
pub fn spawn_channel(
    config: ChannelConfig,
    cancel: CancellationToken,
) -> (ChannelHandle, mpsc::Receiver<ChannelEvent>, JoinHandle<()>) {
    let (command_tx, command_rx) = mpsc::channel(COMMAND_BUFFER);
    let (event_tx, event_rx) = mpsc::channel(EVENT_BUFFER);

    let adapter = ChannelAdapter::new(config, command_rx, event_tx, cancel);
    let task = tokio::spawn(adapter.run());

    (ChannelHandle::new(command_tx), event_rx, task)
}

// ============================================================================
// Tests
// ============================================================================
