//! Desktop alert delivery.
//!
//! Notifications reach the operator's desktop through `notify-send`,
//! spawned per alert. The process is started with an activation action
//! and `--wait`, so a click on the toast comes back on stdout and can
//! be turned into a mark-read. A missing or broken notifier degrades
//! the console, never breaks it: delivery failures are logged (loudly
//! once, quietly after) and the notification stays in the store
//! regardless.

use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::info;
use wd_core::{Notification, Severity};

/// How long to keep waiting for the operator to click the toast before
/// giving up on activation. The notification itself may outlive this on
/// screen; we just stop listening.
const ACTIVATION_WAIT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum NotifyError {
    /// The notifier binary could not be spawned.
    #[error("desktop notifier unavailable: {0}")]
    Unavailable(String),

    /// The notifier ran but reported failure.
    #[error("desktop notification failed: {0}")]
    Failed(String),
}

/// What happened to a delivered desktop alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyOutcome {
    /// Shown; the operator did not interact within the wait window.
    Raised,
    /// The operator clicked the toast.
    Activated,
}

/// Sink for desktop alerts. The store actor only sees this trait, so
/// tests substitute a recording stub and headless deployments run with
/// no notifier at all.
#[async_trait]
pub trait DesktopNotifier: Send + Sync {
    async fn notify(&self, notification: &Notification) -> Result<NotifyOutcome, NotifyError>;
}

/// `notify-send` backed notifier.
pub struct NotifySend {
    /// Set after the first delivery failure to drop later failures to
    /// debug level.
    degraded: AtomicBool,
}

impl NotifySend {
    /// Probes for a usable `notify-send` on PATH. Returns `None` when
    /// the probe fails, in which case desktop alerts are simply off.
    pub async fn detect() -> Option<Self> {
        Self::detect_program("notify-send").await
    }

    async fn detect_program(program: &str) -> Option<Self> {
        match Command::new(program).arg("--version").output().await {
            Ok(output) if output.status.success() => {
                info!(program, "Desktop alerts enabled");
                Some(Self {
                    degraded: AtomicBool::new(false),
                })
            }
            Ok(output) => {
                info!(program, status = %output.status, "Notifier probe failed, desktop alerts disabled");
                None
            }
            Err(err) => {
                info!(program, error = %err, "Notifier not found, desktop alerts disabled");
                None
            }
        }
    }

    fn record_failure(&self, err: &NotifyError) {
        if !self.degraded.swap(true, Ordering::Relaxed) {
            tracing::warn!(error = %err, "Desktop alert delivery failing");
        } else {
            tracing::debug!(error = %err, "Desktop alert delivery still failing");
        }
    }
}

/// Toast summary line for a notification.
fn summary_line(notification: &Notification) -> String {
    format!("\u{26a0} {}", notification.user_name)
}

/// Maps severity onto the urgency levels `notify-send` understands.
fn urgency(severity: Severity) -> &'static str {
    match severity {
        Severity::Info => "low",
        Severity::Warning => "normal",
        Severity::Error => "critical",
    }
}

#[async_trait]
impl DesktopNotifier for NotifySend {
    async fn notify(&self, notification: &Notification) -> Result<NotifyOutcome, NotifyError> {
        let mut command = Command::new("notify-send");
        command
            .arg("--app-name=watchdesk")
            .arg(format!("--urgency={}", urgency(notification.severity)))
            .arg("--action=default=Open")
            .arg("--wait")
            .arg(summary_line(notification))
            .arg(&notification.message)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        let child = command.spawn().map_err(|err| {
            let err = NotifyError::Unavailable(err.to_string());
            self.record_failure(&err);
            err
        })?;

        match timeout(ACTIVATION_WAIT, child.wait_with_output()).await {
            // Toast still up; stop waiting for a click. kill_on_drop
            // reaps the waiter process.
            Err(_) => Ok(NotifyOutcome::Raised),
            Ok(Err(err)) => {
                let err = NotifyError::Failed(err.to_string());
                self.record_failure(&err);
                Err(err)
            }
            Ok(Ok(output)) if !output.status.success() => {
                let err = NotifyError::Failed(format!("notify-send exited with {}", output.status));
                self.record_failure(&err);
                Err(err)
            }
            Ok(Ok(output)) => {
                let action = String::from_utf8_lossy(&output.stdout);
                if action.trim() == "default" {
                    Ok(NotifyOutcome::Activated)
                } else {
                    Ok(NotifyOutcome::Raised)
                }
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use wd_core::{NotificationId, UserId};

    fn notification(user_name: &str, severity: Severity) -> Notification {
        Notification {
            id: NotificationId::new(1),
            kind: "user-inactive".to_string(),
            severity,
            message: "idle for 30 minutes".to_string(),
            user_id: UserId::new(7),
            user_name: user_name.to_string(),
            timestamp: Utc::now(),
            read: false,
        }
    }

    #[test]
    fn test_summary_line_prefixes_warning_sign() {
        let summary = summary_line(&notification("Avery", Severity::Warning));
        assert_eq!(summary, "\u{26a0} Avery");
    }

    #[test]
    fn test_urgency_mapping() {
        assert_eq!(urgency(Severity::Info), "low");
        assert_eq!(urgency(Severity::Warning), "normal");
        assert_eq!(urgency(Severity::Error), "critical");
    }

    #[test]
    fn test_record_failure_degrades_once() {
        let notifier = NotifySend {
            degraded: AtomicBool::new(false),
        };
        let err = NotifyError::Failed("boom".to_string());
        notifier.record_failure(&err);
        assert!(notifier.degraded.load(Ordering::Relaxed));
        // Second failure must not flip it back.
        notifier.record_failure(&err);
        assert!(notifier.degraded.load(Ordering::Relaxed));
    }

    #[tokio::test]
    async fn test_detect_missing_binary_disables() {
        let detected = NotifySend::detect_program("watchdesk-no-such-notifier").await;
        assert!(detected.is_none());
    }

    #[tokio::test]
    async fn test_detect_accepts_successful_probe() {
        // `true` ignores --version and exits 0, standing in for a
        // healthy notifier.
        let detected = NotifySend::detect_program("true").await;
        assert!(detected.is_some());
    }
}
