//! Watchdesk console - keeps an operator in sync with the tracking backend
//!
//! The default mode runs the full sync stack in the foreground: the
//! event channel adapter, the sync engine with its roster cache, and
//! the notification store with optional desktop alerts and on-disk
//! state. One-shot subcommands cover the operator actions that do not
//! need a long-running console.
//!
//! # Usage
//!
//! ```text
//! wd                             # Run the sync console (foreground)
//! wd roster                      # Print the roster, tracked users first
//! wd roster --date 2024-06-01    # Roster with activity logs for a day
//! wd notify 7 "status meeting"   # Message a user (email when offline)
//! wd track 7                     # Toggle a user in the tracked selection
//! ```

use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use wd_api::ApiClient;
use wd_core::{TrackedUser, UserId};
use wd_sync::{
    roster_view, spawn_channel, spawn_engine, spawn_store, ChannelEvent, DesktopNotifier,
    LocalStore, NotifySend, SelectionSet, StoreConfig, StoreEvent, SyncConfig,
};

/// How long a one-shot command waits for the event channel handshake
/// before giving up on the socket path.
const CONNECT_WAIT: Duration = Duration::from_secs(10);

// ============================================================================
// CLI Arguments
// ============================================================================

/// Watchdesk - operator console for the user tracking backend
#[derive(Parser, Debug)]
#[command(name = "wd")]
#[command(about = "Keep an operator console in sync with the tracking backend")]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Path to the config file (defaults to the per-user config dir)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the sync console in the foreground
    Run,
    /// Print the roster, tracked users first
    Roster {
        /// Include activity logs for this day (YYYY-MM-DD)
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    /// Send a direct message to a user
    Notify {
        /// Backend id of the user
        user_id: i64,
        /// Message text
        message: String,
        /// Deliver by email even when the user is connected
        #[arg(long)]
        email: bool,
    },
    /// Toggle a user in the tracked selection
    Track {
        /// Backend id of the user
        user_id: i64,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();

    match args.command.unwrap_or(Command::Run) {
        Command::Run => run_console(args.config),
        Command::Roster { date } => run_roster(args.config, date),
        Command::Notify {
            user_id,
            message,
            email,
        } => run_notify(args.config, user_id, message, email),
        Command::Track { user_id } => run_track(args.config, user_id),
    }
}

fn init_logging() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("watchdesk=info".parse()?)
                .add_directive("wd_sync=info".parse()?)
                .add_directive("wd_api=info".parse()?),
        )
        .init();
    Ok(())
}

// ============================================================================
// Console (default mode)
// ============================================================================

#[tokio::main]
async fn run_console(config_path: Option<PathBuf>) -> Result<()> {
    init_logging()?;
    let config = SyncConfig::load(config_path.as_deref())?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        pid = process::id(),
        api = %config.api.base_url,
        channel = %config.channel.addr,
        "Watchdesk console starting"
    );

    let api = ApiClient::new(config.api_config()).context("Failed to build the API client")?;
    let cancel = CancellationToken::new();

    let shutdown = cancel.clone();
    tokio::spawn(async move {
        if let Err(e) = wait_for_shutdown_signal().await {
            error!(error = %e, "Error waiting for shutdown signal");
        }
        info!("Shutdown signal received");
        shutdown.cancel();
    });

    let persist = match LocalStore::open(state_dir(&config)) {
        Ok(local) => {
            info!(dir = %local.dir().display(), "Local state enabled");
            Some(local)
        }
        Err(e) => {
            warn!(error = %e, "Local state unavailable, running in memory");
            None
        }
    };

    let notifier = if config.sync.desktop_alerts {
        NotifySend::detect()
            .await
            .map(|n| Arc::new(n) as Arc<dyn DesktopNotifier>)
    } else {
        None
    };

    let (store, store_task) = spawn_store(StoreConfig { persist, notifier }, cancel.clone());
    let (_channel, events, channel_task) = spawn_channel(config.channel_config(), cancel.clone());
    let (_engine, engine_task) = spawn_engine(
        config.engine_config(),
        Arc::new(api),
        store.clone(),
        events,
        cancel.clone(),
    );

    // Surface new alerts on the console log as they land in the store.
    let mut feed = store.subscribe();
    let feed_cancel = cancel.clone();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = feed_cancel.cancelled() => break,
                event = feed.recv() => match event {
                    Ok(StoreEvent::Added { notification, unread }) => {
                        info!(
                            user = %notification.user_name,
                            message = %notification.message,
                            unread,
                            "Alert recorded"
                        );
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Alert feed lagged");
                    }
                    Err(RecvError::Closed) => break,
                },
            }
        }
    });

    cancel.cancelled().await;

    info!("Watchdesk console stopping");
    let _ = tokio::join!(store_task, channel_task, engine_task);
    info!("Watchdesk console stopped");
    Ok(())
}

async fn wait_for_shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;

        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
            }
            _ = sigint.recv() => {
                info!("Received SIGINT");
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        info!("Received Ctrl+C");
    }

    Ok(())
}

// ============================================================================
// One-shot commands
// ============================================================================

#[tokio::main]
async fn run_roster(config_path: Option<PathBuf>, date: Option<NaiveDate>) -> Result<()> {
    init_logging()?;
    let config = SyncConfig::load(config_path.as_deref())?;

    let api = ApiClient::new(config.api_config()).context("Failed to build the API client")?;
    let records = match date {
        Some(day) => api.fetch_users_with_logs(day).await,
        None => api.fetch_users().await,
    }
    .context("Failed to fetch the roster")?;

    let users: Vec<TrackedUser> = records
        .into_iter()
        .map(|record| TrackedUser::from_record(record, None))
        .collect();

    if users.is_empty() {
        println!("No tracked users.");
        return Ok(());
    }

    let selection = load_selection(&config);

    for user in roster_view(&users, &selection) {
        let marker = if selection.is_selected(user.id) {
            '*'
        } else {
            ' '
        };
        let status = if user.active_status {
            "online"
        } else {
            "offline"
        };
        println!(
            "{marker} {:>5}  {:<24} {:<8} {}",
            user.id.as_i64(),
            user.name,
            status,
            user.email.as_deref().unwrap_or("-")
        );
    }

    Ok(())
}

#[tokio::main]
async fn run_notify(
    config_path: Option<PathBuf>,
    user_id: i64,
    message: String,
    email: bool,
) -> Result<()> {
    init_logging()?;
    let config = SyncConfig::load(config_path.as_deref())?;

    let api = ApiClient::new(config.api_config()).context("Failed to build the API client")?;
    let records = api.fetch_users().await.context("Failed to fetch the roster")?;
    let record = records
        .into_iter()
        .find(|record| record.id.as_i64() == user_id)
        .with_context(|| format!("No user with id {user_id}"))?;
    let user = TrackedUser::from_record(record, None);

    // Connected users get the message pushed over the event channel;
    // everyone else gets it by email, same as an explicit --email.
    if email || !user.active_status {
        return send_email(&api, &user, &message).await;
    }

    match notify_over_channel(&config, &user, &message).await {
        Ok(()) => {
            println!("Message delivered to {}.", user.name);
            Ok(())
        }
        Err(e) => {
            warn!(error = %e, "Channel delivery failed, falling back to email");
            send_email(&api, &user, &message).await
        }
    }
}

#[tokio::main]
async fn run_track(config_path: Option<PathBuf>, user_id: i64) -> Result<()> {
    init_logging()?;
    let config = SyncConfig::load(config_path.as_deref())?;

    let local = LocalStore::open(state_dir(&config))
        .context("Failed to open the local state directory")?;
    let mut selection = SelectionSet::load(&local);
    let user_id = UserId::new(user_id);
    let tracked = selection
        .toggle(&local, user_id)
        .context("Failed to persist the selection")?;

    if tracked {
        println!("Tracking user {user_id}.");
    } else {
        println!("Stopped tracking user {user_id}.");
    }

    // Best effort: echo the toggle to the backend so presence events
    // for this user start or stop without waiting for the next reload.
    if let Err(e) = toggle_over_channel(&config, user_id, tracked).await {
        warn!(error = %e, "Could not echo the toggle to the backend");
    }

    Ok(())
}

// ============================================================================
// Helpers
// ============================================================================

fn state_dir(config: &SyncConfig) -> PathBuf {
    config
        .sync
        .state_dir
        .clone()
        .unwrap_or_else(LocalStore::default_dir)
}

fn load_selection(config: &SyncConfig) -> SelectionSet {
    match LocalStore::open(state_dir(config)) {
        Ok(local) => SelectionSet::load(&local),
        Err(e) => {
            warn!(error = %e, "Local state unavailable, selection markers disabled");
            SelectionSet::default()
        }
    }
}

async fn send_email(api: &ApiClient, user: &TrackedUser, message: &str) -> Result<()> {
    api.force_email(user.id, message)
        .await
        .with_context(|| format!("Failed to email {}", user.name))?;
    println!("Email queued for {}.", user.name);
    Ok(())
}

async fn notify_over_channel(
    config: &SyncConfig,
    user: &TrackedUser,
    message: &str,
) -> Result<()> {
    let cancel = CancellationToken::new();
    let (channel, mut events, task) = spawn_channel(config.channel_config(), cancel.clone());

    let connected = wait_for_connect(&mut events, CONNECT_WAIT).await;
    // Keep the event pipe moving so the adapter never blocks on it
    // while the ack is outstanding.
    let drainer = drain_events(events);

    let result = match connected {
        Ok(()) => channel
            .notify_user(user.id, &user.name, message)
            .await
            .map_err(Into::into),
        Err(e) => Err(e),
    };

    cancel.cancel();
    let _ = task.await;
    let _ = drainer.await;
    result
}

async fn toggle_over_channel(config: &SyncConfig, user_id: UserId, tracked: bool) -> Result<()> {
    let cancel = CancellationToken::new();
    let (channel, mut events, task) = spawn_channel(config.channel_config(), cancel.clone());

    let connected = wait_for_connect(&mut events, CONNECT_WAIT).await;
    let drainer = drain_events(events);

    let result = match connected {
        Ok(()) => channel
            .toggle_user(user_id, tracked)
            .await
            .map_err(Into::into),
        Err(e) => Err(e),
    };

    cancel.cancel();
    let _ = task.await;
    let _ = drainer.await;
    result
}

async fn wait_for_connect(events: &mut mpsc::Receiver<ChannelEvent>, wait: Duration) -> Result<()> {
    let deadline = tokio::time::sleep(wait);
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = &mut deadline => bail!("timed out connecting to the event channel"),
            event = events.recv() => match event {
                Some(ChannelEvent::Connected { .. }) => return Ok(()),
                Some(_) => continue,
                None => bail!("event channel adapter stopped"),
            },
        }
    }
}

fn drain_events(mut events: mpsc::Receiver<ChannelEvent>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move { while events.recv().await.is_some() {} })
}
