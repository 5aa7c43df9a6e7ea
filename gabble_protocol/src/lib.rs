// gabble_protocol — wire conventions for the gabble chat service.
//
// The chat protocol is deliberately thin: newline-terminated UTF-8 text over
// a raw TCP stream, no length prefix, no serialization layer. What little
// shared vocabulary exists between the server, the CLI client, and the
// integration tests lives here so the three never drift apart:
//
// - `types.rs`:   The `SessionId` newtype the server assigns to each
//                 accepted connection.
// - `framing.rs`: Line handling — terminator stripping on receive and
//                 broadcast formatting on send.
//
// No dependency on the chat crate; this crate sits at the bottom of the
// workspace graph.

pub mod framing;
pub mod types;

/// Default TCP port the chat server listens on.
pub const DEFAULT_PORT: u16 = 8080;

/// Local client command that terminates the CLI session. Never sent to the
/// server; the client signals departure by half-closing its connection.
pub const QUIT_COMMAND: &str = "/quit";
