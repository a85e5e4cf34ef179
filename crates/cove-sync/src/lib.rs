//! Client-side realtime state synchronization: one generic reconciler fed by
//! change-feed events, optimistic writes with explicit pending-operation
//! tracking, and the presence/unread aggregates derived from the same feed.
//!
//! Everything here is in-memory session state. The backend owns the rows;
//! this crate owns a transient cache of them.

pub mod optimistic;
pub mod presence;
pub mod reconciler;
pub mod store;
pub mod subscriber;
pub mod unread;

/// Failures the sync layer surfaces. Nothing here is fatal: a write failure
/// rolls back one optimistic record, a fetch failure drops one update.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("backend write failed: {0}")]
    Write(String),
    #[error("detail fetch failed: {0}")]
    Fetch(String),
}
