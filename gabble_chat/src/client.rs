// TCP client for connecting to the chat server.
//
// Architecture mirrors the server's session split, one level simpler:
// - `connect()` performs the TCP connect on the calling thread, then spawns
//   a background receiver thread.
// - The receiver thread blocks in `read()` and writes whatever arrives
//   straight to stdout — broadcast lines come pre-formatted off the wire.
// - The calling thread keeps the stream for sending lines.
//
// Disconnect is a half-close: shut down the write side to tell the server we
// are done, leave the read side open for a short grace period so in-flight
// broadcasts still get displayed, then close fully and join the receiver.
// The server is never told explicitly — its read loop observes the EOF.

use std::io::{Read, Write};
use std::net::{Shutdown, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::READ_BUFFER_SIZE;
use crate::error::ClientError;

/// How long `disconnect` keeps the read side open to drain in-flight
/// messages after the write-side shutdown.
const DISCONNECT_GRACE: Duration = Duration::from_millis(200);

/// CLI-side chat connection.
pub struct ChatClient {
    stream: TcpStream,
    connected: Arc<AtomicBool>,
    receiver_thread: Option<JoinHandle<()>>,
}

impl ChatClient {
    /// Connect to a chat server and spawn the receiver thread.
    pub fn connect(host: &str, port: u16) -> Result<Self, ClientError> {
        let addr = format!("{host}:{port}");
        let stream = TcpStream::connect(&addr).map_err(|source| ClientError::Connect {
            addr: addr.clone(),
            source,
        })?;
        info!("connected to {addr}");

        let connected = Arc::new(AtomicBool::new(true));
        let reader = stream.try_clone()?;
        let receiver_thread = {
            let connected = Arc::clone(&connected);
            thread::spawn(move || receiver_loop(reader, connected))
        };

        Ok(Self {
            stream,
            connected,
            receiver_thread: Some(receiver_thread),
        })
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Send one chat line; the newline terminator is appended here.
    pub fn send_line(&mut self, text: &str) -> Result<(), ClientError> {
        if !self.is_connected() {
            return Err(ClientError::Disconnected);
        }
        self.stream.write_all(format!("{text}\n").as_bytes())?;
        debug!("sent: {text}");
        Ok(())
    }

    /// Half-close, drain, close, join. Idempotent.
    pub fn disconnect(&mut self) {
        if self.connected.swap(false, Ordering::SeqCst) {
            // Signal the server we are done sending, but keep reading
            // briefly so pending broadcasts still arrive.
            let _ = self.stream.shutdown(Shutdown::Write);
            thread::sleep(DISCONNECT_GRACE);
            let _ = self.stream.shutdown(Shutdown::Both);
            info!("connection closed");
        }
        if let Some(handle) = self.receiver_thread.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for ChatClient {
    fn drop(&mut self) {
        self.disconnect();
    }
}

/// Receiver thread: print everything the server sends until EOF or error.
fn receiver_loop(stream: TcpStream, connected: Arc<AtomicBool>) {
    debug!("receiver thread started");
    let mut buf = [0u8; READ_BUFFER_SIZE];
    let mut stdout = std::io::stdout();
    loop {
        match (&stream).read(&mut buf) {
            Ok(0) => break,
            Ok(n) => {
                let _ = stdout.write_all(&buf[..n]);
                let _ = stdout.flush();
            }
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(_) => break,
        }
    }
    // Only an unexpected termination is worth a warning; a local disconnect
    // already cleared the flag.
    if connected.swap(false, Ordering::SeqCst) {
        warn!("connection to server lost");
    }
}
