//! Holding pen for alerts that arrive before the roster is usable.
//!
//! The channel can deliver alerts while the directory is still loading,
//! and resolving them at that point would stamp every one "Unknown
//! User". The buffer queues them instead and releases the backlog in
//! arrival order once the first roster load lands. The state machine is
//! explicit so a mid-drain alert cannot jump the queue:
//!
//! ```text
//!   Buffering ──first load──▶ Draining ──backlog empty──▶ Live
//! ```
//!
//! Alerts offered while Draining still queue behind the backlog; only
//! in Live do they resolve immediately.

use std::collections::VecDeque;
use std::mem;

use chrono::Utc;
use tracing::debug;
use wd_core::{ResolvedAlert, UNKNOWN_USER};
use wd_protocol::AlertEvent;

use crate::roster::RosterCache;

/// Buffer lifecycle. Transitions are one-way.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BufferState {
    /// Roster not yet loaded; alerts queue.
    #[default]
    Buffering,
    /// First load landed; backlog is being released in FIFO order.
    /// New arrivals queue behind it.
    Draining,
    /// Backlog flushed; alerts resolve on arrival.
    Live,
}

/// What to do with an offered alert.
#[derive(Debug, PartialEq)]
pub enum Disposition {
    /// Queued behind the backlog; nothing to do now.
    Queued,
    /// Roster is live; resolve and record immediately.
    Resolve(AlertEvent),
}

/// FIFO queue of actionable alerts awaiting the first roster load.
#[derive(Debug, Default)]
pub struct AlertBuffer {
    state: BufferState,
    pending: VecDeque<AlertEvent>,
}

impl AlertBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> BufferState {
        self.state
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Offers an alert. Queues unless the buffer is Live.
    pub fn offer(&mut self, alert: AlertEvent) -> Disposition {
        match self.state {
            BufferState::Buffering | BufferState::Draining => {
                self.pending.push_back(alert);
                debug!(pending = self.pending.len(), "Alert queued until roster loads");
                Disposition::Queued
            }
            BufferState::Live => Disposition::Resolve(alert),
        }
    }

    /// Enters Draining and takes the backlog queued so far. The caller
    /// resolves the returned alerts in order, then calls
    /// [`finish_drain`](Self::finish_drain).
    pub fn begin_drain(&mut self) -> VecDeque<AlertEvent> {
        self.state = BufferState::Draining;
        mem::take(&mut self.pending)
    }

    /// Enters Live. Any alerts offered mid-drain are returned so the
    /// caller can flush them too.
    pub fn finish_drain(&mut self) -> VecDeque<AlertEvent> {
        self.state = BufferState::Live;
        mem::take(&mut self.pending)
    }
}

/// Resolves an alert against the roster. Unknown ids get the
/// [`UNKNOWN_USER`] sentinel name rather than failing; the alert is
/// still worth surfacing.
pub fn resolve_alert(roster: &RosterCache, alert: &AlertEvent) -> ResolvedAlert {
    let user_name = match roster.display_name(alert.user_id) {
        Some(name) => name.to_string(),
        None => {
            debug!(user_id = %alert.user_id, "Alert for user missing from roster");
            UNKNOWN_USER.to_string()
        }
    };
    ResolvedAlert {
        kind: alert.kind.clone(),
        severity: alert.resolved_severity(),
        message: alert.message.clone(),
        user_id: alert.user_id,
        user_name,
        timestamp: alert.timestamp_or(Utc::now()),
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use wd_core::{Severity, UserId, UserRecord};
    use wd_protocol::ALERT_USER_INACTIVE;

    fn alert(user_id: i64, message: &str) -> AlertEvent {
        AlertEvent {
            kind: ALERT_USER_INACTIVE.to_string(),
            user_id: UserId::new(user_id),
            message: message.to_string(),
            severity: None,
            timestamp: None,
        }
    }

    fn loaded_roster(entries: &[(i64, &str)]) -> RosterCache {
        let mut roster = RosterCache::new();
        let issue = roster.begin_reload();
        let records = entries
            .iter()
            .map(|(id, name)| UserRecord {
                id: UserId::new(*id),
                name: name.to_string(),
                email: None,
                active_status: None,
                last_activity: None,
            })
            .collect();
        roster.apply(issue, records);
        roster
    }

    // ------------------------------------------------------------------------
    // State machine
    // ------------------------------------------------------------------------

    #[test]
    fn test_starts_buffering() {
        let buffer = AlertBuffer::new();
        assert_eq!(buffer.state(), BufferState::Buffering);
        assert_eq!(buffer.pending_len(), 0);
    }

    #[test]
    fn test_offers_queue_while_buffering() {
        let mut buffer = AlertBuffer::new();
        assert_eq!(buffer.offer(alert(1, "a")), Disposition::Queued);
        assert_eq!(buffer.offer(alert(2, "b")), Disposition::Queued);
        assert_eq!(buffer.pending_len(), 2);
    }

    #[test]
    fn test_drain_releases_backlog_in_arrival_order() {
        let mut buffer = AlertBuffer::new();
        buffer.offer(alert(1, "first"));
        buffer.offer(alert(2, "second"));
        buffer.offer(alert(3, "third"));

        let backlog = buffer.begin_drain();
        assert_eq!(buffer.state(), BufferState::Draining);
        let messages: Vec<&str> = backlog.iter().map(|a| a.message.as_str()).collect();
        assert_eq!(messages, vec!["first", "second", "third"]);

        assert!(buffer.finish_drain().is_empty());
        assert_eq!(buffer.state(), BufferState::Live);
    }

    #[test]
    fn test_mid_drain_offer_queues_behind_backlog() {
        let mut buffer = AlertBuffer::new();
        buffer.offer(alert(1, "backlog"));

        let backlog = buffer.begin_drain();
        assert_eq!(backlog.len(), 1);

        // Arrives while the backlog is still flushing.
        assert_eq!(buffer.offer(alert(2, "late")), Disposition::Queued);

        let straggler = buffer.finish_drain();
        let messages: Vec<&str> = straggler.iter().map(|a| a.message.as_str()).collect();
        assert_eq!(messages, vec!["late"]);
    }

    #[test]
    fn test_live_offers_resolve_immediately() {
        let mut buffer = AlertBuffer::new();
        buffer.begin_drain();
        buffer.finish_drain();

        match buffer.offer(alert(7, "now")) {
            Disposition::Resolve(event) => assert_eq!(event.message, "now"),
            other => panic!("expected Resolve, got {other:?}"),
        }
        assert_eq!(buffer.pending_len(), 0);
    }

    // ------------------------------------------------------------------------
    // Resolution
    // ------------------------------------------------------------------------

    #[test]
    fn test_resolve_fills_user_name_from_roster() {
        let roster = loaded_roster(&[(42, "Avery")]);
        let resolved = resolve_alert(&roster, &alert(42, "went quiet"));
        assert_eq!(resolved.user_name, "Avery");
        assert_eq!(resolved.user_id, UserId::new(42));
        assert_eq!(resolved.message, "went quiet");
        // No severity on the wire resolves to the info default.
        assert_eq!(resolved.severity, Severity::Info);
    }

    #[test]
    fn test_resolve_unknown_user_gets_sentinel() {
        let roster = loaded_roster(&[(1, "Avery")]);
        let resolved = resolve_alert(&roster, &alert(999, "went quiet"));
        assert_eq!(resolved.user_name, UNKNOWN_USER);
        assert_eq!(resolved.user_id, UserId::new(999));
    }

    #[test]
    fn test_resolve_honors_explicit_severity() {
        let roster = loaded_roster(&[(1, "Avery")]);
        let mut event = alert(1, "down hard");
        event.severity = Some("error".to_string());
        let resolved = resolve_alert(&roster, &event);
        assert_eq!(resolved.severity, Severity::Error);
    }

    #[test]
    fn test_resolve_keeps_event_timestamp_when_present() {
        let roster = loaded_roster(&[(1, "Avery")]);
        let stamp = chrono::DateTime::parse_from_rfc3339("2025-11-02T09:30:00Z")
            .expect("valid timestamp")
            .with_timezone(&Utc);
        let mut event = alert(1, "went quiet");
        event.timestamp = Some(stamp);
        let resolved = resolve_alert(&roster, &event);
        assert_eq!(resolved.timestamp, stamp);
    }
}
