// One live client connection and its dedicated reader thread.
//
// A `Session` is shared between its own read loop (which owns the thread)
// and the broadcast path (which holds `Arc` clones copied out of the
// registry). The socket therefore stays valid for any in-flight send even if
// the session is deregistered mid-broadcast; the last `Arc` holder to drop
// frees it. Teardown logic is NOT left to drop order: the read loop triggers
// deregistration itself, exactly once, on every exit path.
//
// Concurrency notes:
// - Reads happen only on the session's own thread. Sends happen on whichever
//   thread is broadcasting. Two simultaneous broadcasts may target the same
//   recipient, so sends are serialized by a per-session writer mutex —
//   `TcpStream` does not promise anything about interleaved concurrent
//   writers, and a torn chat line is a corrupted protocol stream.
// - `close()` is single-shot, guarded by an atomic flag. The registry calls
//   it during deregistration; shutting the socket down is what unblocks a
//   reader stuck in `read()`, which is the only way to stop a session from
//   the outside.

use std::io::{Read, Write};
use std::net::{Shutdown, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use gabble_protocol::framing;
use gabble_protocol::types::SessionId;

use crate::READ_BUFFER_SIZE;
use crate::history::MessageHistory;
use crate::registry::SessionRegistry;

/// Sleep before retrying a send that reported would-block.
const SEND_RETRY_DELAY: Duration = Duration::from_millis(10);

/// How many recent history entries a newly connected client is sent before
/// its read loop starts.
pub const HISTORY_REPLAY_LINES: usize = 10;

/// Server-side state for one client connection.
pub struct Session {
    id: SessionId,
    username: Mutex<String>,
    // Read handle; also the handle `close()` shuts down.
    stream: TcpStream,
    // Cloned write handle. The mutex serializes sends from concurrent
    // broadcasts to this recipient.
    writer: Mutex<TcpStream>,
    closed: AtomicBool,
    registry: Arc<SessionRegistry>,
    history: Arc<MessageHistory>,
}

impl Session {
    /// Wrap an accepted connection. Fails only if the write handle cannot be
    /// cloned from the stream.
    pub fn new(
        id: SessionId,
        stream: TcpStream,
        registry: Arc<SessionRegistry>,
        history: Arc<MessageHistory>,
    ) -> std::io::Result<Arc<Self>> {
        let writer = stream.try_clone()?;
        debug!("session {id} created");
        Ok(Arc::new(Self {
            id,
            username: Mutex::new(String::new()),
            stream,
            writer: Mutex::new(writer),
            closed: AtomicBool::new(false),
            registry,
            history,
        }))
    }

    /// Launch the read loop on its own thread. The caller may keep the
    /// handle to join in tests; the server drops it — sessions tear
    /// themselves down and are never joined from the outside.
    pub fn start(self: Arc<Self>) -> JoinHandle<()> {
        thread::spawn(move || self.run())
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Current username; empty until set.
    pub fn username(&self) -> String {
        self.username.lock().clone()
    }

    pub fn set_username(&self, name: &str) {
        *self.username.lock() = name.to_string();
    }

    /// True once `close()` has run. A closed session is already out of the
    /// registry or on its way out.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Shut the socket down, once. Later callers no-op, so the registry's
    /// removal path and the read loop's own teardown can race freely.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            debug!("session {}: closing socket", self.id);
            let _ = self.stream.shutdown(Shutdown::Both);
        }
    }

    /// The read loop. Each successful read is one chat line: trailing
    /// terminators stripped, empty lines discarded, everything else handed
    /// to the registry for broadcast. A line split across two reads arrives
    /// as two broadcasts — that is the framing contract, kept as-is.
    fn run(&self) {
        info!("session {} started", self.id);

        if !self.replay_history() {
            info!("session {}: history replay failed, tearing down", self.id);
            self.registry.deregister(self.id);
            return;
        }

        let mut buf = [0u8; READ_BUFFER_SIZE];
        loop {
            match (&self.stream).read(&mut buf) {
                Ok(0) => {
                    info!("session {} disconnected", self.id);
                    break;
                }
                Ok(n) => {
                    let chunk = String::from_utf8_lossy(&buf[..n]);
                    let line = framing::trim_line(&chunk);
                    if line.is_empty() {
                        continue;
                    }
                    debug!("session {}: received {line:?}", self.id);
                    self.registry.broadcast(self.id, line);
                }
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    if self.is_closed() {
                        // Forced shutdown via deregistration; expected.
                        info!("session {} shut down", self.id);
                    } else {
                        error!("session {}: read error: {e}", self.id);
                    }
                    break;
                }
            }
        }

        self.registry.deregister(self.id);
        debug!("session {} finished", self.id);
    }

    /// Send the most recent history entries to this client, one per line.
    /// Returns false if any send failed (dead connection).
    fn replay_history(&self) -> bool {
        for entry in self.history.last_n(HISTORY_REPLAY_LINES) {
            if !self.send_line(&format!("{entry}\n")) {
                return false;
            }
        }
        true
    }

    /// Blocking send of all bytes of `line`, with partial-write handling.
    /// Returns true only if every byte was transmitted; on false the caller
    /// must treat this session as dead.
    ///
    /// Runs on the broadcasting thread, not this session's reader thread.
    /// The writer mutex is held for the whole line so two broadcasts cannot
    /// interleave bytes on the wire.
    pub fn send_line(&self, line: &str) -> bool {
        let bytes = line.as_bytes();
        let mut sent = 0;
        let mut writer = self.writer.lock();
        while sent < bytes.len() {
            match writer.write(&bytes[sent..]) {
                Ok(0) => {
                    debug!("session {}: send returned 0, peer closed", self.id);
                    return false;
                }
                Ok(n) => sent += n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    thread::sleep(SEND_RETRY_DELAY);
                }
                Err(e)
                    if matches!(
                        e.kind(),
                        std::io::ErrorKind::BrokenPipe
                            | std::io::ErrorKind::ConnectionReset
                            | std::io::ErrorKind::ConnectionAborted
                    ) =>
                {
                    info!("session {}: peer gone during send: {e}", self.id);
                    return false;
                }
                Err(e) => {
                    warn!("session {}: send error: {e}", self.id);
                    return false;
                }
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use std::io::Read;
    use std::net::TcpListener;
    use std::time::Instant;

    use super::*;

    /// Create a TCP pair: (client_stream, server_stream) on localhost.
    fn tcp_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).unwrap();
        let (server, _) = listener.accept().unwrap();
        (client, server)
    }

    fn test_registry() -> Arc<SessionRegistry> {
        Arc::new(SessionRegistry::new(Arc::new(MessageHistory::new())))
    }

    /// Build a session over a fresh TCP pair. Returns the session and the
    /// peer (client-side) stream.
    fn make_session(id: u64, registry: &Arc<SessionRegistry>) -> (Arc<Session>, TcpStream) {
        let (peer, server) = tcp_pair();
        let history = Arc::clone(registry.history());
        let session = Session::new(SessionId(id), server, Arc::clone(registry), history).unwrap();
        (session, peer)
    }

    fn read_some(stream: &mut TcpStream) -> String {
        stream
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();
        let mut buf = [0u8; 256];
        let n = stream.read(&mut buf).unwrap();
        String::from_utf8_lossy(&buf[..n]).into_owned()
    }

    /// Poll until `cond` holds or a timeout expires.
    fn wait_until(cond: impl Fn() -> bool) {
        let start = Instant::now();
        while !cond() {
            assert!(start.elapsed() < Duration::from_secs(2), "condition timed out");
            thread::sleep(Duration::from_millis(10));
        }
    }

    #[test]
    fn send_line_delivers_all_bytes() {
        let registry = test_registry();
        let (session, mut peer) = make_session(1, &registry);

        assert!(session.send_line("hello\n"));
        assert_eq!(read_some(&mut peer), "hello\n");
    }

    #[test]
    fn send_line_fails_after_close() {
        let registry = test_registry();
        let (session, _peer) = make_session(1, &registry);

        session.close();
        assert!(!session.send_line("x\n"));
    }

    #[test]
    fn close_is_idempotent() {
        let registry = test_registry();
        let (session, _peer) = make_session(1, &registry);

        assert!(!session.is_closed());
        session.close();
        session.close();
        assert!(session.is_closed());
    }

    #[test]
    fn read_loop_broadcasts_to_other_sessions() {
        let registry = test_registry();
        let (a, mut peer_a) = make_session(1, &registry);
        let (b, mut peer_b) = make_session(2, &registry);
        registry.register(Arc::clone(&a)).unwrap();
        registry.register(Arc::clone(&b)).unwrap();

        Arc::clone(&a).start();
        peer_a.write_all(b"hi\n").unwrap();

        assert_eq!(read_some(&mut peer_b), "Client_1: hi\n");
    }

    #[test]
    fn peer_eof_deregisters_session() {
        let registry = test_registry();
        let (a, peer_a) = make_session(1, &registry);
        registry.register(Arc::clone(&a)).unwrap();

        a.start();
        drop(peer_a);

        let registry_ref = Arc::clone(&registry);
        wait_until(move || registry_ref.active_count() == 0);
    }

    #[test]
    fn deregistration_unblocks_read_loop() {
        let registry = test_registry();
        let (a, _peer_a) = make_session(1, &registry);
        registry.register(Arc::clone(&a)).unwrap();

        let handle = Arc::clone(&a).start();
        // Give the loop time to block in read(), then force it out.
        thread::sleep(Duration::from_millis(50));
        registry.deregister(a.id());

        handle.join().unwrap();
        assert_eq!(registry.active_count(), 0);
    }

    #[test]
    fn new_session_receives_history_replay() {
        let registry = test_registry();
        registry.history().append("Alice", "earlier");

        let (a, mut peer_a) = make_session(1, &registry);
        registry.register(Arc::clone(&a)).unwrap();
        a.start();

        assert_eq!(read_some(&mut peer_a), "[Alice]: earlier\n");
    }
}
