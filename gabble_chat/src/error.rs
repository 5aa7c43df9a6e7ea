// Error types for the chat crate's two fallible seams.
//
// Connection-fatal send failures are deliberately NOT errors — the send path
// reports them as `bool` and the registry reconciles (see `session.rs` and
// `registry.rs`). What remains is the programming-invariant violation on
// registration and the client-side connect/send surface.

use std::io;

use gabble_protocol::types::SessionId;

/// Errors from `SessionRegistry` operations.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// A session with this ID is already registered. Should not occur under
    /// correct accept-loop usage; callers log it loudly and drop the session.
    #[error("session {0} already registered")]
    DuplicateId(SessionId),
}

/// Errors from `ChatClient` operations.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("failed to connect to {addr}: {source}")]
    Connect { addr: String, source: io::Error },

    #[error("not connected")]
    Disconnected,

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}
