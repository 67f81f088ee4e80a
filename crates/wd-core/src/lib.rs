//! Watchdesk Core - Shared types for tracked-user monitoring
//!
//! This crate provides the domain types shared between the REST adapter
//! (wd-api), the live-channel protocol (wd-protocol), and the
//! synchronization engine (wd-sync).
//!
//! All code follows the panic-free policy: no `.unwrap()`, `.expect()`,
//! `panic!()`, `unreachable!()`, `todo!()`, or direct indexing `[i]`.

pub mod notification;
pub mod user;

// Re-exports for convenience
pub use notification::{
    Notification, NotificationId, ResolvedAlert, Severity, UserAlertAggregate, UNKNOWN_USER,
};
pub use user::{TrackedUser, UserId, UserRecord};
