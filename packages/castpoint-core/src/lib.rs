//! Castpoint Core - a single-listener Icecast/SHOUTcast compatible audio server.
//!
//! One HTTP client at a time receives a compressed audio stream (MP3-style
//! elementary stream) paced at real-time rate, optionally with ICY inline
//! metadata (`StreamTitle`) spliced in every `icy-metaint` bytes.
//!
//! # Architecture
//!
//! - [`stream`]: audio format, mountpoint settings, pacing, ICY metadata and
//!   the upstream buffer pool
//! - [`server`]: the non-blocking server core (accept, handshake, burst-paced
//!   write loop) and its socket/parser seams
//! - [`runtime`]: tokio glue that drives the server from socket readiness,
//!   timers and upstream notifications
//! - [`error`]: centralized error types
//! - [`protocol_constants`]: protocol and tuning constants
//!
//! # Abstraction Traits
//!
//! - [`ClientSocket`](server::ClientSocket) / [`Acceptor`](server::Acceptor):
//!   non-blocking sockets
//! - [`RequestParser`](server::RequestParser): the HTTP request parser
//! - [`BufferSource`](stream::BufferSource): where audio comes from
//!
//! Each has a production implementation here; tests swap in scripted doubles.

#![warn(clippy::all)]

pub mod error;
pub mod protocol_constants;
pub mod runtime;
pub mod server;
pub mod stream;

// Re-export commonly used types at the crate root
pub use error::{ErrorCode, Rejection, ServerError, ServerResult};
pub use runtime::{Command, EventLoop, ServerHandle, TokioAcceptor};
pub use server::{
    AcceptOutcome, CloseReason, Event, ListenerStats, PassOutcome, Server, Token, LISTENER_TOKEN,
};
pub use stream::{AudioBuffer, AudioFormat, BufferPool, BufferSource, MountpointSettings, Pacing};
