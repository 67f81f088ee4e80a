//! Frame types for the live event channel.
//!
//! Framing: newline-delimited JSON, one frame per line, shaped as
//! `{"event": "<name>", "data": {...}}`. Outbound commands that expect
//! an acknowledgement carry a `seq` the server echoes back in its `ack`
//! frame; correlation and timeout live in the channel adapter, not
//! here.

use crate::event::{AlertEvent, StatusEvent};
use serde::{Deserialize, Serialize};
use wd_core::UserId;

/// Maximum accepted frame size in bytes. Frames beyond this are
/// rejected without being parsed.
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Client type announced in the hello handshake.
pub const USER_TYPE_ADMIN: &str = "admin";

// ============================================================================
// Client -> Server Frames
// ============================================================================

/// Frames sent from the console to the backend channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ClientFrame {
    /// Opening handshake identifying this connection.
    Hello(HelloPayload),
    /// Direct operator message to a user; acknowledged by seq.
    NotifyUser(NotifyUserPayload),
    /// Tracking toggle for a user; acknowledged by seq, best-effort.
    AdminToggleUser(TogglePayload),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HelloPayload {
    pub user_type: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotifyUserPayload {
    pub seq: u64,
    pub user_id: UserId,
    pub name: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TogglePayload {
    pub seq: u64,
    pub user_id: UserId,
    pub toggled: bool,
}

impl ClientFrame {
    /// Admin console handshake.
    pub fn hello() -> Self {
        ClientFrame::Hello(HelloPayload {
            user_type: USER_TYPE_ADMIN.to_string(),
        })
    }

    pub fn notify_user(seq: u64, user_id: UserId, name: &str, message: &str) -> Self {
        ClientFrame::NotifyUser(NotifyUserPayload {
            seq,
            user_id,
            name: name.to_string(),
            message: message.to_string(),
        })
    }

    pub fn admin_toggle_user(seq: u64, user_id: UserId, toggled: bool) -> Self {
        ClientFrame::AdminToggleUser(TogglePayload {
            seq,
            user_id,
            toggled,
        })
    }

    /// Seq carried by this frame, when it expects an acknowledgement.
    pub fn seq(&self) -> Option<u64> {
        match self {
            ClientFrame::Hello(_) => None,
            ClientFrame::NotifyUser(payload) => Some(payload.seq),
            ClientFrame::AdminToggleUser(payload) => Some(payload.seq),
        }
    }
}

// ============================================================================
// Server -> Client Frames
// ============================================================================

/// Frames sent from the backend channel to the console.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ServerFrame {
    /// Handshake confirmation.
    Welcome(WelcomePayload),
    /// Presence change for a tracked user.
    UserStatusUpdate(StatusEvent),
    /// Server-raised alert.
    AdminAlert(AlertEvent),
    /// Acknowledgement for a seq-correlated client frame.
    Ack(AckPayload),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WelcomePayload {
    /// Server-assigned session label, when the backend provides one.
    #[serde(default)]
    pub session: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AckPayload {
    pub seq: u64,
    pub success: bool,
    #[serde(default)]
    pub message: Option<String>,
}

impl ServerFrame {
    pub fn welcome(session: Option<String>) -> Self {
        ServerFrame::Welcome(WelcomePayload { session })
    }

    pub fn ack(seq: u64) -> Self {
        ServerFrame::Ack(AckPayload {
            seq,
            success: true,
            message: None,
        })
    }

    pub fn nack(seq: u64, message: &str) -> Self {
        ServerFrame::Ack(AckPayload {
            seq,
            success: false,
            message: Some(message.to_string()),
        })
    }
}

// ============================================================================
// Tests
// ============================================================================
