// TCP listener and accept loop for the chat server.
//
// Architecture: thread-per-connection.
//
// - **Accept thread** (`TcpListener::accept()` loop): accepts connections,
//   assigns each the next session ID, constructs and registers a `Session`,
//   and launches its reader thread.
// - **Reader threads** (one per client, owned by `Session::run`): receive
//   lines and hand them to `SessionRegistry::broadcast`.
//
// The listener runs non-blocking with a short sleep so the accept thread can
// observe the shutdown flag; accepted streams are switched back to blocking
// before the session takes them over.
//
// Shutdown: `ServerHandle::stop` clears the flag, joins the accept thread,
// then deregisters every live session — closing a session's socket fails its
// blocked read, which is the only way to end a reader from the outside.

use std::io;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use tracing::{error, info};

use gabble_protocol::DEFAULT_PORT;
use gabble_protocol::types::SessionId;

use crate::history::{DEFAULT_HISTORY_CAPACITY, MessageHistory};
use crate::registry::SessionRegistry;
use crate::session::Session;

/// How long the accept loop sleeps when no connection is pending.
const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Configuration for starting a chat server.
pub struct ServerConfig {
    pub port: u16,
    pub history_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            history_capacity: DEFAULT_HISTORY_CAPACITY,
        }
    }
}

/// Handle returned by `start_server` to control the running server.
pub struct ServerHandle {
    keep_running: Arc<AtomicBool>,
    thread: Option<thread::JoinHandle<()>>,
    registry: Arc<SessionRegistry>,
}

impl ServerHandle {
    /// Signal the server to stop, wait for the accept loop to exit, and
    /// force every live session out.
    pub fn stop(self) {
        self.keep_running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread {
            let _ = handle.join();
        }
        self.registry.shutdown_all();
        info!("server stopped");
    }

    /// The live session registry, for diagnostics and tests.
    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }
}

/// Start the chat server on a background thread. Returns a handle for
/// stopping it and the actual bound address (useful when port 0 is used to
/// let the OS pick a free port).
pub fn start_server(config: ServerConfig) -> io::Result<(ServerHandle, SocketAddr)> {
    let listener = TcpListener::bind(("0.0.0.0", config.port))?;
    let addr = listener.local_addr()?;

    let history = Arc::new(MessageHistory::with_capacity(config.history_capacity));
    let registry = Arc::new(SessionRegistry::new(history));
    let keep_running = Arc::new(AtomicBool::new(true));

    info!("chat server listening on {addr}");

    let thread = {
        let registry = Arc::clone(&registry);
        let keep_running = Arc::clone(&keep_running);
        thread::spawn(move || run_accept_loop(listener, registry, keep_running))
    };

    Ok((
        ServerHandle {
            keep_running,
            thread: Some(thread),
            registry,
        },
        addr,
    ))
}

/// Accept loop. Runs until `keep_running` is cleared.
fn run_accept_loop(
    listener: TcpListener,
    registry: Arc<SessionRegistry>,
    keep_running: Arc<AtomicBool>,
) {
    // Non-blocking so the loop can check keep_running periodically.
    listener.set_nonblocking(true).ok();

    let mut next_id: u64 = 1;
    while keep_running.load(Ordering::SeqCst) {
        match listener.accept() {
            Ok((stream, peer_addr)) => {
                stream.set_nonblocking(false).ok();
                let id = SessionId(next_id);
                next_id += 1;
                info!("accepted connection from {peer_addr} as client {id}");
                accept_session(&registry, id, stream);
            }
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                thread::sleep(ACCEPT_POLL_INTERVAL);
            }
            Err(e) => {
                // One failed accept does not take the server down.
                error!("accept failed: {e}");
                thread::sleep(ACCEPT_POLL_INTERVAL);
            }
        }
    }
}

/// Construct, register, and start one session. Order matters: the session
/// must be in the registry before its read loop can broadcast.
fn accept_session(registry: &Arc<SessionRegistry>, id: SessionId, stream: TcpStream) {
    let history = Arc::clone(registry.history());
    let session = match Session::new(id, stream, Arc::clone(registry), history) {
        Ok(session) => session,
        Err(e) => {
            error!("client {id}: failed to set up session: {e}");
            return;
        }
    };

    if let Err(e) = registry.register(Arc::clone(&session)) {
        error!("client {id}: {e}");
        return;
    }

    // The reader thread detaches; the session deregisters itself on exit.
    let _ = session.start();
}
