// Core ID type for the chat protocol.
//
// `SessionId` is a lightweight newtype used by the server's session
// management (`gabble_chat::registry`) and by anything that needs to name a
// connection in logs or tests. The server assigns IDs from a monotonic
// counter in the accept loop, so an ID is never reused within a process run.

use std::fmt;

/// Server-assigned connection ID (compact u64, unique per live connection).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
