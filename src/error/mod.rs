//! Public error types for the listener and its sessions.
//!
//! Wire-level decode failures live in [`CodecError`] next to the codec;
//! they never escape a session.
//!
//! [`CodecError`]: crate::protocol::io::CodecError

use thiserror::Error;

/// Errors surfaced by [`Listener`](crate::server::Listener).
#[derive(Debug, Error)]
pub enum ServerError {
    /// The UDP socket could not be bound.
    #[error("failed to bind listener socket: {0}")]
    Bind(#[source] std::io::Error),
    /// The listener has not been started, or its tasks have shut down.
    #[error("listener is not running")]
    NotListening,
    /// `start` was called twice.
    #[error("listener already started")]
    AlreadyStarted,
}

/// Errors surfaced by a single session.
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// The session has been closed and no longer accepts packets.
    #[error("connection closed")]
    Closed,
}
