//! Watchdesk Protocol - Wire frames for the live event channel
//!
//! This crate provides the frame types exchanged between the console
//! and the tracking backend's event channel: newline-delimited JSON,
//! one frame per line, kebab-case event names with camelCase payload
//! fields per the backend contract.

pub mod event;
pub mod message;

pub use event::{AlertEvent, StatusEvent, ALERT_USER_INACTIVE};
pub use message::{
    AckPayload, ClientFrame, HelloPayload, NotifyUserPayload, ServerFrame, TogglePayload,
    WelcomePayload, MAX_FRAME_SIZE, USER_TYPE_ADMIN,
};
