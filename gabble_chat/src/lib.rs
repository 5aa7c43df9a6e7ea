// gabble_chat — multi-user TCP chat relay.
//
// The server accepts TCP connections, gives each one a dedicated session
// thread, and rebroadcasts every line a session sends to all other live
// sessions. All shared state is two mutex-guarded structures with disjoint
// locks, and no lock is ever held across blocking network I/O.
//
// Module overview:
// - `history.rs`:  Bounded, thread-safe log of recent chat lines. Leaf
//                  module with its own mutex, independent of the registry's.
// - `registry.rs`: Thread-safe map from session ID to live session, plus the
//                  two-phase copy-then-act broadcast algorithm.
// - `session.rs`:  One connection's lifecycle — the blocking read loop and
//                  the partial-write-safe send path.
// - `server.rs`:   TCP listener and accept loop. Constructs sessions,
//                  registers them, and hands each its reader thread.
// - `client.rs`:   CLI-side connection: background receiver thread printing
//                  to stdout, line sender, half-close disconnect.
// - `error.rs`:    Error types for the registry and client seams.
//
// Scheduling is one OS thread per connection (reads and sends block their
// owning thread), plus the accept thread. There is no event loop and no
// cooperative cancellation: a session stops when its own read fails, or when
// deregistration force-closes its socket out from under the blocked read.
//
// Dependencies: `gabble_protocol` (IDs and line framing), `gabble_log`
// (subscriber setup, binaries only), `tracing`, `parking_lot`, `thiserror`.

pub mod client;
pub mod error;
pub mod history;
pub mod registry;
pub mod server;
pub mod session;

pub use server::start_server;

/// Read buffer size for the session and client receive loops. One buffered
/// read is one chat line as far as framing is concerned.
pub(crate) const READ_BUFFER_SIZE: usize = 1024;
