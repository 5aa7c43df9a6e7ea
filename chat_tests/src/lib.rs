// Test-only chat client for end-to-end integration tests.
//
// `TestChatClient` speaks the real wire protocol over a real `TcpStream`,
// but instead of printing received text it accumulates it, so tests can make
// assertions about exactly what arrived. The receiver thread mirrors the
// production client's: blocking chunk reads pushed through an `mpsc`
// channel; dropping the sender on EOF is how tests observe the server
// closing the connection.
//
// See `tests/full_pipeline.rs` for the scenarios.

use std::io::{Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Default timeout for blocking poll operations.
pub const POLL_TIMEOUT: Duration = Duration::from_secs(5);

/// Sleep duration between poll attempts.
pub const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// A chat client that records everything the server sends it.
pub struct TestChatClient {
    stream: TcpStream,
    inbox: Receiver<String>,
    _receiver_thread: JoinHandle<()>,
    received: String,
}

impl TestChatClient {
    /// Connect to a running chat server.
    pub fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).expect("TestChatClient::connect failed");
        let reader = stream.try_clone().expect("stream clone failed");
        let (tx, rx) = mpsc::channel();
        let receiver_thread = thread::spawn(move || receiver_loop(reader, &tx));
        Self {
            stream,
            inbox: rx,
            _receiver_thread: receiver_thread,
            received: String::new(),
        }
    }

    /// Send one chat line (newline appended).
    pub fn send_line(&mut self, text: &str) {
        self.stream
            .write_all(format!("{text}\n").as_bytes())
            .expect("send_line failed");
    }

    /// Everything received so far.
    pub fn received(&mut self) -> &str {
        self.drain();
        &self.received
    }

    /// Block until the accumulated text contains `needle`. Panics on
    /// timeout, printing what actually arrived.
    pub fn wait_for(&mut self, needle: &str) {
        let start = Instant::now();
        loop {
            self.drain();
            if self.received.contains(needle) {
                return;
            }
            assert!(
                start.elapsed() < POLL_TIMEOUT,
                "timed out waiting for {needle:?}; received so far: {:?}",
                self.received
            );
            thread::sleep(POLL_INTERVAL);
        }
    }

    /// Block until the server closes the connection (receiver thread hangs
    /// up its channel). Panics on timeout.
    pub fn wait_for_eof(&mut self) {
        let start = Instant::now();
        loop {
            match self.inbox.try_recv() {
                Ok(chunk) => self.received.push_str(&chunk),
                Err(TryRecvError::Disconnected) => return,
                Err(TryRecvError::Empty) => {
                    assert!(
                        start.elapsed() < POLL_TIMEOUT,
                        "timed out waiting for server-side close"
                    );
                    thread::sleep(POLL_INTERVAL);
                }
            }
        }
    }

    /// Half-close the write side, as the production client does on `/quit`.
    pub fn disconnect(&mut self) {
        let _ = self.stream.shutdown(Shutdown::Write);
    }

    fn drain(&mut self) {
        loop {
            match self.inbox.try_recv() {
                Ok(chunk) => self.received.push_str(&chunk),
                Err(TryRecvError::Disconnected | TryRecvError::Empty) => return,
            }
        }
    }
}

/// Reader thread: forward chunks until EOF or error, then hang up.
fn receiver_loop(mut stream: TcpStream, tx: &mpsc::Sender<String>) {
    let mut buf = [0u8; 1024];
    loop {
        match stream.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => {
                let chunk = String::from_utf8_lossy(&buf[..n]).into_owned();
                if tx.send(chunk).is_err() {
                    break;
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(_) => break,
        }
    }
}

/// Poll a predicate until it holds or `POLL_TIMEOUT` expires.
pub fn wait_until(what: &str, cond: impl Fn() -> bool) {
    let start = Instant::now();
    while !cond() {
        assert!(start.elapsed() < POLL_TIMEOUT, "timed out waiting for {what}");
        thread::sleep(POLL_INTERVAL);
    }
}
