//! Centralized error types for the Castpoint core library.
//!
//! Two families live here:
//! - [`ServerError`]: resource-level failures surfaced to the embedding code
//!   (bind, listen, a closed control channel).
//! - [`Rejection`]: protocol violations by a client. These never escape the
//!   server; they are answered with an HTTP error response and the listener
//!   is torn down.

use http::StatusCode;
use thiserror::Error;

/// Trait for error types that provide machine-readable error codes.
pub trait ErrorCode {
    /// Returns a machine-readable error code for logs.
    fn code(&self) -> &'static str;
}

/// Errors raised while setting up or controlling the server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Failed to create or bind the listening socket.
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: std::net::SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// The bound socket could not be switched to listening mode.
    #[error("Failed to listen: {0}")]
    Listen(#[source] std::io::Error),

    /// An operation needed the listening socket before `start()` succeeded.
    #[error("Server not started")]
    NotStarted,

    /// The event loop owning the server is gone.
    #[error("Server event loop has shut down")]
    Closed,

    /// Any other OS-level failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ErrorCode for ServerError {
    fn code(&self) -> &'static str {
        match self {
            Self::Bind { .. } => "bind_failed",
            Self::Listen(_) => "listen_failed",
            Self::NotStarted => "not_started",
            Self::Closed => "closed",
            Self::Io(_) => "io_error",
        }
    }
}

/// Convenient Result alias for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// A client request the server refuses to serve.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejection {
    /// The request could not be parsed, or the parser did not consume it all.
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// The requested path is not the mountpoint.
    #[error("Unauthorized path: {0}")]
    Unauthorized(String),

    /// Accepting this client would exceed the listener limit.
    #[error("Too many clients (limit {0})")]
    TooManyClients(usize),

    /// Any method other than GET.
    #[error("Method not allowed: {0}")]
    MethodNotAllowed(String),

    /// The server failed to build a response.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Rejection {
    /// Maps the rejection to the HTTP status sent to the client.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::TooManyClients(_) => StatusCode::FORBIDDEN,
            Self::MethodNotAllowed(_) => StatusCode::METHOD_NOT_ALLOWED,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl ErrorCode for Rejection {
    fn code(&self) -> &'static str {
        match self {
            Self::BadRequest(_) => "bad_request",
            Self::Unauthorized(_) => "unauthorized",
            Self::TooManyClients(_) => "too_many_clients",
            Self::MethodNotAllowed(_) => "method_not_allowed",
            Self::Internal(_) => "internal_error",
        }
    }
}
