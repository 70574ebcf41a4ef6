//! Socket seams of the server.
//!
//! The server only ever performs non-blocking calls through these traits, so
//! the same state machine runs over tokio sockets in production and scripted
//! doubles in tests.

use std::io;
use std::net::SocketAddr;

/// A connected client socket in non-blocking mode.
pub trait ClientSocket {
    /// Reads available bytes; `WouldBlock` when none are ready, `Ok(0)` on EOF.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Writes as much as the socket takes; `WouldBlock` when it takes nothing.
    fn write(&mut self, buf: &[u8]) -> io::Result<usize>;

    /// Applies per-connection options: no linger on close, keep-alive, no delay.
    fn configure(&self) -> io::Result<()>;

    /// Shuts the connection down. Errors are ignored; the peer may be gone.
    fn shutdown(&mut self);
}

/// The listening socket.
pub trait Acceptor {
    type Stream: ClientSocket;

    /// Switches the bound socket to non-blocking listening mode.
    fn listen(&mut self) -> io::Result<()>;

    /// Accepts one pending connection; `WouldBlock` when none is pending.
    fn accept(&mut self) -> io::Result<(Self::Stream, SocketAddr)>;

    /// Address the socket is bound to.
    fn local_addr(&self) -> io::Result<SocketAddr>;
}

/// Returns true for errors that only mean "try again later".
#[inline]
pub fn is_recoverable(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
    )
}
