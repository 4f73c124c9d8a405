//! Errors surfaced by the realtime chat layer.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChatError {
    /// No valid credential was presented at connect time.
    #[error("connection is not authenticated")]
    Unauthenticated,

    /// The underlying connection is gone; the session must shut down.
    #[error("chat transport closed")]
    TransportClosed,

    /// A frame could not be serialized for the wire.
    #[error("protocol error: {0}")]
    Protocol(String),
}
