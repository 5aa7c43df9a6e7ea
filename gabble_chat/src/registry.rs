// Thread-safe session registry and the broadcast algorithm.
//
// `SessionRegistry` owns the one critical shared structure: the map from
// session ID to live session, guarded by a single mutex. It is mutated from
// three directions — the accept loop (insert), each session's own teardown
// (remove), and broadcast (remove on send failure) — so every operation
// takes the lock, and double-removal is an expected race, not an error.
//
// Broadcast is the reason the lock discipline matters. Sending to a slow
// peer can block for an arbitrarily long time, and a recipient can be torn
// down by its own reader thread mid-iteration. So broadcast never sends
// under the lock: it snapshots the recipient list (Arc clones keep every
// copied session alive for the duration of its send attempt), releases the
// lock, sends, and only then re-acquires the lock to prune the failures.
// The history buffer has its own independent mutex; the registry lock is
// never held while taking it.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::info;

use gabble_protocol::framing;
use gabble_protocol::types::SessionId;

use crate::error::RegistryError;
use crate::history::MessageHistory;
use crate::session::Session;

/// Username sentinel for `lookup_username` on an unknown ID.
pub const UNKNOWN_USERNAME: &str = "UNKNOWN";

/// Display name for a session that has no username (or is already gone).
fn fallback_name(id: SessionId) -> String {
    format!("Client_{id}")
}

/// Thread-safe map of live sessions, keyed by session ID.
pub struct SessionRegistry {
    sessions: Mutex<BTreeMap<SessionId, Arc<Session>>>,
    history: Arc<MessageHistory>,
}

impl SessionRegistry {
    pub fn new(history: Arc<MessageHistory>) -> Self {
        Self {
            sessions: Mutex::new(BTreeMap::new()),
            history,
        }
    }

    /// Insert a session under its ID. A duplicate ID is a programming error
    /// (the accept loop never reuses one); the map is left untouched and the
    /// caller decides how loudly to fail.
    pub fn register(&self, session: Arc<Session>) -> Result<(), RegistryError> {
        let id = session.id();
        let total = {
            let mut sessions = self.sessions.lock();
            if sessions.contains_key(&id) {
                return Err(RegistryError::DuplicateId(id));
            }
            sessions.insert(id, session);
            sessions.len()
        };
        info!("client {id} registered ({total} active)");
        Ok(())
    }

    /// Remove a session and close its socket. No-op if absent: the broadcast
    /// failure path and the session's own teardown are allowed to race here.
    pub fn deregister(&self, id: SessionId) {
        let removed = {
            let mut sessions = self.sessions.lock();
            sessions.remove(&id).map(|session| (session, sessions.len()))
        };
        if let Some((session, total)) = removed {
            // Close outside the lock; after removal no new path can reach
            // this session through the map.
            session.close();
            info!("client {id} removed ({total} active)");
        }
    }

    /// Deliver `text` to every registered session except the sender.
    ///
    /// Phase 1, under the lock: resolve the sender's display name and copy
    /// the recipient handles. Phase 2, lock released: format the line once
    /// and send to each recipient, collecting the failures. Phase 3:
    /// deregister the failures and record the line in history.
    ///
    /// A failed recipient never aborts delivery to the rest, and a recipient
    /// deregistered concurrently is skipped via its closed flag.
    pub fn broadcast(&self, sender: SessionId, text: &str) {
        let (sender_name, recipients) = {
            let sessions = self.sessions.lock();
            let name = match sessions.get(&sender) {
                Some(session) => {
                    let username = session.username();
                    if username.is_empty() {
                        // Never-set username; same fallback as a sender that
                        // already disconnected.
                        fallback_name(sender)
                    } else {
                        username
                    }
                }
                None => fallback_name(sender),
            };
            let recipients: Vec<Arc<Session>> = sessions
                .values()
                .filter(|session| session.id() != sender)
                .cloned()
                .collect();
            (name, recipients)
        };

        let line = framing::format_broadcast(&sender_name, text);
        let mut failed: Vec<SessionId> = Vec::new();
        for session in recipients {
            if session.is_closed() {
                // Torn down between phases; already out of the map.
                continue;
            }
            if !session.send_line(&line) {
                failed.push(session.id());
            }
        }

        for id in failed {
            info!("client {id}: send failed during broadcast, removing");
            self.deregister(id);
        }
        self.history.append(&sender_name, text);
    }

    /// Username for `id`, or the `UNKNOWN` sentinel if not registered.
    pub fn lookup_username(&self, id: SessionId) -> String {
        self.sessions
            .lock()
            .get(&id)
            .map(|session| session.username())
            .unwrap_or_else(|| UNKNOWN_USERNAME.to_string())
    }

    /// Number of live sessions. Diagnostics only.
    pub fn active_count(&self) -> usize {
        self.sessions.lock().len()
    }

    /// Force every live session out: each deregistration closes the socket,
    /// which fails the blocked read and ends that session's loop. This is
    /// the whole-server shutdown path.
    pub fn shutdown_all(&self) {
        let ids: Vec<SessionId> = self.sessions.lock().keys().copied().collect();
        for id in ids {
            self.deregister(id);
        }
    }

    pub fn history(&self) -> &Arc<MessageHistory> {
        &self.history
    }
}

#[cfg(test)]
mod tests {
    use std::io::Read;
    use std::net::{Shutdown, TcpListener, TcpStream};
    use std::thread;
    use std::time::Duration;

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

    #[test]
    fn register_increments_active_count() {
        let registry = test_registry();
        let (a, _peer) = make_session(1, &registry);
        assert_eq!(registry.active_count(), 0);
        registry.register(a).unwrap();
        assert_eq!(registry.active_count(), 1);
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let registry = test_registry();
        let (first, _peer_1) = make_session(7, &registry);
        let (second, _peer_2) = make_session(7, &registry);

        registry.register(first).unwrap();
        let err = registry.register(second).unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateId(SessionId(7))));
        // The map is untouched by the failed insert.
        assert_eq!(registry.active_count(), 1);
    }

    #[test]
    fn deregister_absent_is_noop() {
        let registry = test_registry();
        registry.deregister(SessionId(99));
        assert_eq!(registry.active_count(), 0);
    }

    #[test]
    fn deregister_closes_the_session() {
        let registry = test_registry();
        let (a, _peer) = make_session(1, &registry);
        registry.register(Arc::clone(&a)).unwrap();

        registry.deregister(a.id());
        assert!(a.is_closed());
        assert_eq!(registry.active_count(), 0);
    }

    #[test]
    fn broadcast_reaches_everyone_but_the_sender() {
        let registry = test_registry();
        let (a, mut peer_a) = make_session(1, &registry);
        let (b, mut peer_b) = make_session(2, &registry);
        let (c, mut peer_c) = make_session(3, &registry);
        a.set_username("A");
        b.set_username("B");
        c.set_username("C");
        registry.register(Arc::clone(&a)).unwrap();
        registry.register(b).unwrap();
        registry.register(c).unwrap();

        registry.broadcast(a.id(), "hi");

        assert_eq!(read_some(&mut peer_b), "A: hi\n");
        assert_eq!(read_some(&mut peer_c), "A: hi\n");
        assert_eq!(registry.history().snapshot(), vec!["[A]: hi"]);

        // The sender received nothing.
        peer_a
            .set_read_timeout(Some(Duration::from_millis(100)))
            .unwrap();
        let mut buf = [0u8; 16];
        assert!(peer_a.read(&mut buf).is_err());
    }

    #[test]
    fn broadcast_from_unknown_sender_uses_fallback_name() {
        let registry = test_registry();
        let (b, mut peer_b) = make_session(2, &registry);
        registry.register(b).unwrap();

        registry.broadcast(SessionId(42), "x");

        assert_eq!(read_some(&mut peer_b), "Client_42: x\n");
        assert_eq!(registry.history().snapshot(), vec!["[Client_42]: x"]);
    }

    #[test]
    fn failed_send_prunes_the_recipient() {
        let registry = test_registry();
        let (a, _peer_a) = make_session(1, &registry);
        a.set_username("A");
        registry.register(Arc::clone(&a)).unwrap();

        // Session over a socket we can break from the outside.
        let (_peer_b, server_b) = tcp_pair();
        let breaker = server_b.try_clone().unwrap();
        let history = Arc::clone(registry.history());
        let b = Session::new(SessionId(2), server_b, Arc::clone(&registry), history).unwrap();
        registry.register(b).unwrap();
        breaker.shutdown(Shutdown::Both).unwrap();

        registry.broadcast(a.id(), "x");

        // The broken recipient is gone; a later broadcast no longer sees it.
        assert_eq!(registry.active_count(), 1);
        assert_eq!(registry.lookup_username(SessionId(2)), UNKNOWN_USERNAME);
        registry.broadcast(a.id(), "again");
        assert_eq!(
            registry.history().snapshot(),
            vec!["[A]: x", "[A]: again"]
        );
    }

    #[test]
    fn lookup_username_sentinel_and_value() {
        let registry = test_registry();
        let (a, _peer) = make_session(1, &registry);
        a.set_username("Alice");
        registry.register(Arc::clone(&a)).unwrap();

        assert_eq!(registry.lookup_username(a.id()), "Alice");
        assert_eq!(registry.lookup_username(SessionId(9)), UNKNOWN_USERNAME);
    }

    #[test]
    fn shutdown_all_empties_the_registry() {
        let registry = test_registry();
        let (a, _peer_a) = make_session(1, &registry);
        let (b, _peer_b) = make_session(2, &registry);
        registry.register(Arc::clone(&a)).unwrap();
        registry.register(Arc::clone(&b)).unwrap();

        registry.shutdown_all();
        assert_eq!(registry.active_count(), 0);
        assert!(a.is_closed());
        assert!(b.is_closed());
    }

    /// Model-based stress: each thread registers and deregisters its own
    /// sessions with unique IDs. Whatever the interleaving, the map must end
    /// empty with nothing lost or duplicated along the way.
    #[test]
    fn concurrent_register_deregister_stays_consistent() {
        let registry = test_registry();
        let mut handles = Vec::new();
        for t in 0..4u64 {
            let registry = Arc::clone(&registry);
            handles.push(thread::spawn(move || {
                for i in 0..20u64 {
                    let (peer, server) = tcp_pair();
                    let id = SessionId(t * 1000 + i);
                    let history = Arc::clone(registry.history());
                    let session =
                        Session::new(id, server, Arc::clone(&registry), history).unwrap();
                    registry.register(session).unwrap();
                    registry.deregister(id);
                    drop(peer);
                }
            }));
        }

        // Broadcasts interleaved with the churn must not panic or corrupt
        // the map.
        let broadcaster = {
            let registry = Arc::clone(&registry);
            thread::spawn(move || {
                for _ in 0..50 {
                    registry.broadcast(SessionId(0), "stress");
                    thread::sleep(Duration::from_millis(1));
                }
            })
        };

        for handle in handles {
            handle.join().unwrap();
        }
        broadcaster.join().unwrap();

        assert_eq!(registry.active_count(), 0);
        assert_eq!(registry.history().len(), 50);
    }
}
