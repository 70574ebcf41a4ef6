//! Scripted socket doubles shared by the server test modules.

use std::collections::VecDeque;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use parking_lot::Mutex;

use super::socket::{Acceptor, ClientSocket};

/// What the next write call does.
#[derive(Debug, Clone, Copy)]
pub enum WritePlan {
    /// Take every byte.
    All,
    /// Take at most this many bytes.
    Partial(usize),
    /// Take nothing, report `WouldBlock`.
    WouldBlock,
    /// Fail with this error.
    Fail(io::ErrorKind),
}

#[derive(Default)]
struct SocketState {
    reads: VecDeque<io::Result<Vec<u8>>>,
    writes: VecDeque<WritePlan>,
    written: Vec<u8>,
    closed: bool,
    fail_configure: bool,
}

/// In-memory client socket. Clones share state so tests can inspect a socket
/// the server owns.
#[derive(Clone, Default)]
pub struct MockSocket {
    state: Arc<Mutex<SocketState>>,
}

impl MockSocket {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_read(&self, bytes: &[u8]) {
        self.state.lock().reads.push_back(Ok(bytes.to_vec()));
    }

    pub fn push_eof(&self) {
        self.state.lock().reads.push_back(Ok(Vec::new()));
    }

    pub fn push_read_error(&self, kind: io::ErrorKind) {
        self.state.lock().reads.push_back(Err(io::Error::from(kind)));
    }

    pub fn plan_write(&self, plan: WritePlan) {
        self.state.lock().writes.push_back(plan);
    }

    pub fn fail_configure(&self) {
        self.state.lock().fail_configure = true;
    }

    pub fn written(&self) -> Vec<u8> {
        self.state.lock().written.clone()
    }

    pub fn take_written(&self) -> Vec<u8> {
        std::mem::take(&mut self.state.lock().written)
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }
}

impl ClientSocket for MockSocket {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut state = self.state.lock();
        match state.reads.pop_front() {
            Some(Ok(bytes)) => {
                let n = bytes.len().min(buf.len());
                buf[..n].copy_from_slice(&bytes[..n]);
                if n < bytes.len() {
                    state.reads.push_front(Ok(bytes[n..].to_vec()));
                }
                Ok(n)
            }
            Some(Err(e)) => Err(e),
            None => Err(io::Error::from(io::ErrorKind::WouldBlock)),
        }
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(io::Error::from(io::ErrorKind::BrokenPipe));
        }
        let n = match state.writes.pop_front().unwrap_or(WritePlan::All) {
            WritePlan::All => buf.len(),
            WritePlan::Partial(n) => n.min(buf.len()),
            WritePlan::WouldBlock => return Err(io::Error::from(io::ErrorKind::WouldBlock)),
            WritePlan::Fail(kind) => return Err(io::Error::from(kind)),
        };
        state.written.extend_from_slice(&buf[..n]);
        Ok(n)
    }

    fn configure(&self) -> io::Result<()> {
        if self.state.lock().fail_configure {
            return Err(io::Error::from(io::ErrorKind::InvalidInput));
        }
        Ok(())
    }

    fn shutdown(&mut self) {
        self.state.lock().closed = true;
    }
}

#[derive(Default)]
struct AcceptorState {
    pending: VecDeque<io::Result<(MockSocket, SocketAddr)>>,
    listening: bool,
    fail_listen: bool,
}

/// In-memory listening socket.
#[derive(Clone, Default)]
pub struct MockAcceptor {
    state: Arc<Mutex<AcceptorState>>,
}

impl MockAcceptor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a connection and returns the socket handle the test keeps.
    pub fn connect(&self, peer: &str) -> MockSocket {
        let socket = MockSocket::new();
        let addr = peer.parse().unwrap_or_else(|_| SocketAddr::from(([127, 0, 0, 1], 1)));
        self.state.lock().pending.push_back(Ok((socket.clone(), addr)));
        socket
    }

    pub fn push_accept_error(&self, kind: io::ErrorKind) {
        self.state.lock().pending.push_back(Err(io::Error::from(kind)));
    }

    pub fn fail_listen(&self) {
        self.state.lock().fail_listen = true;
    }

    pub fn is_listening(&self) -> bool {
        self.state.lock().listening
    }
}

impl Acceptor for MockAcceptor {
    type Stream = MockSocket;

    fn listen(&mut self) -> io::Result<()> {
        let mut state = self.state.lock();
        if state.fail_listen {
            return Err(io::Error::from(io::ErrorKind::AddrInUse));
        }
        state.listening = true;
        Ok(())
    }

    fn accept(&mut self) -> io::Result<(MockSocket, SocketAddr)> {
        self.state
            .lock()
            .pending
            .pop_front()
            .unwrap_or_else(|| Err(io::Error::from(io::ErrorKind::WouldBlock)))
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        Ok(SocketAddr::from(([127, 0, 0, 1], 8000)))
    }
}

/// Splits an HTTP response into its head and the bytes after it.
pub fn split_head(bytes: &[u8]) -> (String, &[u8]) {
    let end = bytes
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .map(|i| i + 4)
        .unwrap_or(bytes.len());
    (String::from_utf8_lossy(&bytes[..end]).into_owned(), &bytes[end..])
}

/// Separates an ICY body into audio and metadata blocks.
///
/// Expects a block after every `period` audio bytes, as a client would.
pub fn split_icy(body: &[u8], period: usize) -> (Vec<u8>, Vec<Vec<u8>>) {
    let mut audio = Vec::new();
    let mut blocks = Vec::new();
    let mut rest = body;
    loop {
        let take = period.min(rest.len());
        audio.extend_from_slice(&rest[..take]);
        rest = &rest[take..];
        if take < period || rest.is_empty() {
            break;
        }
        let len = 1 + rest[0] as usize * 16;
        let len = len.min(rest.len());
        blocks.push(rest[..len].to_vec());
        rest = &rest[len..];
    }
    (audio, blocks)
}

/// Deterministic test audio: byte `i` is `i % 251`.
pub fn audio_pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}
