//! A connected client session and its request/response handshake.
//!
//! A listener starts in [`ListenerState::AwaitingRequest`]. Once a valid
//! `GET /` arrives the ICY response is staged and the listener moves to
//! [`ListenerState::Streaming`]. There is no closed state: a listener that is
//! done is dropped by the server.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use bytes::{Buf, BytesMut};
use http::{Method, StatusCode};

use super::buffer::ListenerBuffer;
use super::connection::Connection;
use super::reactor::Token;
use super::request::RequestParser;
use super::response::{error_response, icy_response};
use super::socket::{is_recoverable, ClientSocket};
use crate::error::Rejection;
use crate::protocol_constants::REQUEST_READ_CHUNK;
use crate::stream::{AudioFormat, MountpointSettings};

/// Protocol state of a listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerState {
    AwaitingRequest,
    Streaming,
}

/// Server settings the handshake is checked against.
pub struct HandshakeContext<'a> {
    pub format: &'a AudioFormat,
    pub mount: &'a MountpointSettings,
    pub active_listeners: usize,
    pub max_clients: usize,
}

/// Result of one attempt to read and answer the request.
#[derive(Debug)]
pub enum RequestOutcome {
    /// Response staged; the listener is streaming.
    Accepted,
    /// More request bytes are needed.
    Pending,
    /// The request is refused with an HTTP error.
    Rejected(Rejection),
    /// The client closed the connection.
    PeerClosed,
    /// Unrecoverable socket error.
    Failed(io::Error),
}

/// Bytes handed to the socket by one write.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Sent {
    /// Bytes the socket took.
    pub written: usize,
    /// Bytes offered to the socket.
    pub requested: usize,
    /// Metadata bytes among `written`.
    pub metadata: usize,
}

impl Sent {
    /// Audio bytes among `written`.
    pub fn audio(&self) -> usize {
        self.written - self.metadata
    }

    /// True if the socket took less than offered.
    pub fn is_partial(&self) -> bool {
        self.written < self.requested
    }
}

/// Result of one write step.
#[derive(Debug)]
pub enum WriteOutcome {
    /// The socket took some bytes.
    Progressed(Sent),
    /// The socket took nothing; wait for write readiness.
    WouldBlock,
    /// Unrecoverable socket error.
    Fatal(io::Error),
    /// There was nothing to write.
    NoMoreData,
}

/// Point-in-time view of the active listener.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenerStats {
    pub peer: SocketAddr,
    pub state: ListenerState,
    pub connected_for: Duration,
    pub bytes_sent_total: u64,
    pub metadata_blocks: u64,
    pub initial_burst_remaining: i64,
    pub wants_metadata: bool,
}

/// A connected client session.
pub struct Listener<S> {
    conn: Connection<S>,
    status: StatusCode,
    parser: Box<dyn RequestParser + Send + Sync>,
    staging: ListenerBuffer,
    response: BytesMut,
    state: ListenerState,
    timer_armed: bool,
    wants_metadata: bool,
}

impl<S: ClientSocket> Listener<S> {
    pub fn new(
        conn: Connection<S>,
        parser: Box<dyn RequestParser + Send + Sync>,
        staging_capacity: usize,
    ) -> Self {
        Self {
            conn,
            status: StatusCode::OK,
            parser,
            staging: ListenerBuffer::with_capacity(staging_capacity),
            response: BytesMut::new(),
            state: ListenerState::AwaitingRequest,
            timer_armed: false,
            wants_metadata: false,
        }
    }

    pub fn token(&self) -> Token {
        self.conn.token()
    }

    pub fn peer(&self) -> SocketAddr {
        self.conn.peer()
    }

    pub fn connection(&self) -> &Connection<S> {
        &self.conn
    }

    pub fn connection_mut(&mut self) -> &mut Connection<S> {
        &mut self.conn
    }

    pub fn state(&self) -> ListenerState {
        self.state
    }

    pub fn is_awaiting_request(&self) -> bool {
        self.state == ListenerState::AwaitingRequest
    }

    /// Status of the last response sent or staged.
    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn wants_metadata(&self) -> bool {
        self.wants_metadata
    }

    pub fn timer_armed(&self) -> bool {
        self.timer_armed
    }

    pub(crate) fn set_timer_armed(&mut self, armed: bool) {
        self.timer_armed = armed;
    }

    pub fn staging(&self) -> &ListenerBuffer {
        &self.staging
    }

    pub(crate) fn staging_mut(&mut self) -> &mut ListenerBuffer {
        &mut self.staging
    }

    /// True while part of the HTTP response is still unsent.
    pub fn has_pending_response(&self) -> bool {
        !self.response.is_empty()
    }

    pub fn stats(&self) -> ListenerStats {
        ListenerStats {
            peer: self.conn.peer(),
            state: self.state,
            connected_for: self.conn.age(),
            bytes_sent_total: self.conn.bytes_sent_total(),
            metadata_blocks: self.conn.metadata_blocks(),
            initial_burst_remaining: self.conn.initial_burst_remaining(),
            wants_metadata: self.wants_metadata,
        }
    }

    /// Reads what the client sent so far and answers it once complete.
    pub fn handle_request(&mut self, ctx: &HandshakeContext<'_>) -> RequestOutcome {
        if ctx.active_listeners > ctx.max_clients {
            return RequestOutcome::Rejected(Rejection::TooManyClients(ctx.max_clients));
        }

        let mut chunk = [0u8; REQUEST_READ_CHUNK];
        let read = match self.conn.socket_mut().read(&mut chunk) {
            Ok(0) => return RequestOutcome::PeerClosed,
            Ok(n) => n.min(chunk.len()),
            Err(e) if is_recoverable(&e) => return RequestOutcome::Pending,
            Err(e) => return RequestOutcome::Failed(e),
        };
        let data = chunk.get(..read).unwrap_or_default();

        match self.parser.feed(data) {
            Ok(parsed) if parsed == read => {}
            Ok(parsed) => {
                return RequestOutcome::Rejected(Rejection::BadRequest(format!(
                    "parsed {} of {} request bytes",
                    parsed, read
                )))
            }
            Err(e) => return RequestOutcome::Rejected(Rejection::BadRequest(e.to_string())),
        }

        if !self.parser.is_complete() {
            return RequestOutcome::Pending;
        }

        let (Some(method), Some(path)) = (self.parser.method(), self.parser.path()) else {
            return RequestOutcome::Rejected(Rejection::Internal(
                "parser completed without a request line".to_string(),
            ));
        };
        if method != Method::GET.as_str() {
            return RequestOutcome::Rejected(Rejection::MethodNotAllowed(method.to_string()));
        }
        if path != "/" {
            return RequestOutcome::Rejected(Rejection::Unauthorized(path.to_string()));
        }

        if self
            .parser
            .header("Icy-MetaData")
            .is_some_and(|v| v.trim() == "1")
        {
            self.wants_metadata = true;
        }

        let metaint = (self.wants_metadata && ctx.mount.metadata_period > 0)
            .then_some(ctx.mount.metadata_period);
        self.response = BytesMut::from(icy_response(ctx.format, ctx.mount, metaint).as_bytes());
        self.status = StatusCode::OK;
        self.state = ListenerState::Streaming;

        log::info!(
            "[Listener {}] Streaming started (metadata={}, metaint={:?})",
            self.conn.peer(),
            self.wants_metadata,
            metaint
        );
        RequestOutcome::Accepted
    }

    /// Sends the error page for a rejection. Best effort: one write, result ignored.
    pub fn send_rejection(&mut self, rejection: &Rejection) {
        self.status = rejection.status_code();
        let body = error_response(self.status, &rejection.to_string());
        if let Err(e) = self.conn.socket_mut().write(body.as_bytes()) {
            log::debug!(
                "[Listener {}] Could not send {} response: {}",
                self.conn.peer(),
                self.status.as_u16(),
                e
            );
        }
    }

    /// Writes whatever is left of the HTTP response.
    pub fn flush_response(&mut self) -> WriteOutcome {
        if self.response.is_empty() {
            return WriteOutcome::NoMoreData;
        }
        let requested = self.response.len();
        let outcome = write_to(self.conn.socket_mut(), &self.response);
        if let WriteOutcome::Progressed(sent) = &outcome {
            self.response.advance(sent.written.min(requested));
        }
        outcome
    }

    /// Writes staged bytes, accounting which of them were metadata.
    pub fn write_staged(&mut self) -> WriteOutcome {
        if self.staging.is_empty() {
            return WriteOutcome::NoMoreData;
        }
        match write_to(self.conn.socket_mut(), self.staging.pending()) {
            WriteOutcome::Progressed(sent) => {
                let consumed = self.staging.consume(sent.written);
                WriteOutcome::Progressed(Sent {
                    metadata: consumed.metadata,
                    ..sent
                })
            }
            other => other,
        }
    }

    /// Writes audio straight from the upstream buffer.
    pub fn write_direct(&mut self, bytes: &[u8]) -> WriteOutcome {
        if bytes.is_empty() {
            return WriteOutcome::NoMoreData;
        }
        write_to(self.conn.socket_mut(), bytes)
    }

    /// Closes the socket.
    pub fn close(&mut self) {
        self.staging.clear();
        self.conn.close();
    }
}

/// One non-blocking write, classified.
fn write_to<S: ClientSocket>(socket: &mut S, bytes: &[u8]) -> WriteOutcome {
    match socket.write(bytes) {
        Ok(0) => WriteOutcome::Fatal(io::Error::from(io::ErrorKind::WriteZero)),
        Ok(n) => WriteOutcome::Progressed(Sent {
            written: n.min(bytes.len()),
            requested: bytes.len(),
            metadata: 0,
        }),
        Err(e) if is_recoverable(&e) => WriteOutcome::WouldBlock,
        Err(e) => WriteOutcome::Fatal(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::request::HttpRequestParser;
    use crate::server::test_support::{MockSocket, WritePlan};

    fn listener(socket: MockSocket) -> Listener<MockSocket> {
        let conn = Connection::new(
            socket,
            "10.0.0.2:40000".parse().expect("addr"),
            Token(1),
            0,
        );
        Listener::new(conn, Box::new(HttpRequestParser::new()), 4096)
    }

    fn handshake(listener: &mut Listener<MockSocket>, mount: &MountpointSettings) -> RequestOutcome {
        let format = AudioFormat::default();
        listener.handle_request(&HandshakeContext {
            format: &format,
            mount,
            active_listeners: 1,
            max_clients: 1,
        })
    }

    #[test]
    fn accepts_get_root_with_metadata() {
        let socket = MockSocket::new();
        socket.push_read(b"GET / HTTP/1.1\r\nIcy-MetaData: 1\r\n\r\n");
        let mut listener = listener(socket.clone());

        let outcome = handshake(&mut listener, &MountpointSettings::default());
        assert!(matches!(outcome, RequestOutcome::Accepted));
        assert_eq!(listener.state(), ListenerState::Streaming);
        assert!(listener.wants_metadata());
        assert!(listener.has_pending_response());

        assert!(matches!(
            listener.flush_response(),
            WriteOutcome::Progressed(_)
        ));
        let written = String::from_utf8(socket.written()).expect("utf8");
        assert!(written.contains("icy-metaint:16000\r\n"));
        assert!(!listener.has_pending_response());
    }

    #[test]
    fn metaint_omitted_when_period_is_zero() {
        let socket = MockSocket::new();
        socket.push_read(b"GET / HTTP/1.1\r\nIcy-MetaData: 1\r\n\r\n");
        let mut listener = listener(socket.clone());
        let mount = MountpointSettings {
            metadata_period: 0,
            ..Default::default()
        };

        assert!(matches!(handshake(&mut listener, &mount), RequestOutcome::Accepted));
        listener.flush_response();
        let written = String::from_utf8(socket.written()).expect("utf8");
        assert!(!written.contains("icy-metaint"));
    }

    #[test]
    fn metaint_omitted_without_request_header() {
        let socket = MockSocket::new();
        socket.push_read(b"GET / HTTP/1.1\r\n\r\n");
        let mut listener = listener(socket.clone());

        assert!(matches!(
            handshake(&mut listener, &MountpointSettings::default()),
            RequestOutcome::Accepted
        ));
        assert!(!listener.wants_metadata());
        listener.flush_response();
        let written = String::from_utf8(socket.written()).expect("utf8");
        assert!(!written.contains("icy-metaint"));
    }

    #[test]
    fn no_data_yet_is_pending() {
        let mut listener = listener(MockSocket::new());
        assert!(matches!(
            handshake(&mut listener, &MountpointSettings::default()),
            RequestOutcome::Pending
        ));
        assert!(listener.is_awaiting_request());
    }

    #[test]
    fn partial_request_is_pending() {
        let socket = MockSocket::new();
        socket.push_read(b"GET / HTTP/1.1\r\n");
        let mut listener = listener(socket);
        assert!(matches!(
            handshake(&mut listener, &MountpointSettings::default()),
            RequestOutcome::Pending
        ));
    }

    #[test]
    fn eof_is_peer_closed() {
        let socket = MockSocket::new();
        socket.push_eof();
        let mut listener = listener(socket);
        assert!(matches!(
            handshake(&mut listener, &MountpointSettings::default()),
            RequestOutcome::PeerClosed
        ));
    }

    #[test]
    fn read_error_is_failure() {
        let socket = MockSocket::new();
        socket.push_read_error(io::ErrorKind::ConnectionReset);
        let mut listener = listener(socket);
        assert!(matches!(
            handshake(&mut listener, &MountpointSettings::default()),
            RequestOutcome::Failed(_)
        ));
    }

    #[test]
    fn rejections_carry_status() {
        let cases: [(&[u8], StatusCode); 4] = [
            (b"POST / HTTP/1.1\r\n\r\n", StatusCode::METHOD_NOT_ALLOWED),
            (b"GET /stream HTTP/1.1\r\n\r\n", StatusCode::UNAUTHORIZED),
            (b"GARBAGE\r\n\r\n", StatusCode::BAD_REQUEST),
            (b"GET / HTTP/1.0\r\n\r\nextra", StatusCode::BAD_REQUEST),
        ];
        for (request, status) in cases {
            let socket = MockSocket::new();
            socket.push_read(request);
            let mut listener = listener(socket);
            match handshake(&mut listener, &MountpointSettings::default()) {
                RequestOutcome::Rejected(rejection) => assert_eq!(rejection.status_code(), status),
                other => panic!("expected rejection for {:?}, got {:?}", request, other),
            }
        }
    }

    #[test]
    fn client_limit_is_enforced_before_reading() {
        let socket = MockSocket::new();
        socket.push_read(b"GET / HTTP/1.1\r\n\r\n");
        let mut listener = listener(socket);
        let format = AudioFormat::default();
        let mount = MountpointSettings::default();
        let outcome = listener.handle_request(&HandshakeContext {
            format: &format,
            mount: &mount,
            active_listeners: 1,
            max_clients: 0,
        });
        assert!(matches!(
            outcome,
            RequestOutcome::Rejected(Rejection::TooManyClients(0))
        ));
    }

    #[test]
    fn send_rejection_writes_error_page() {
        let socket = MockSocket::new();
        let mut listener = listener(socket.clone());
        listener.send_rejection(&Rejection::MethodNotAllowed("POST".into()));
        assert_eq!(listener.status(), StatusCode::METHOD_NOT_ALLOWED);
        let written = String::from_utf8(socket.written()).expect("utf8");
        assert!(written.starts_with("HTTP/1.0 405 Method Not Allowed\r\n"));
    }

    #[test]
    fn partial_response_flush_keeps_remainder() {
        let socket = MockSocket::new();
        socket.push_read(b"GET / HTTP/1.1\r\n\r\n");
        socket.plan_write(WritePlan::Partial(10));
        let mut listener = listener(socket.clone());
        handshake(&mut listener, &MountpointSettings::default());

        match listener.flush_response() {
            WriteOutcome::Progressed(sent) => assert!(sent.is_partial()),
            other => panic!("unexpected {:?}", other),
        }
        assert!(listener.has_pending_response());
        assert!(matches!(
            listener.flush_response(),
            WriteOutcome::Progressed(_)
        ));
        assert!(!listener.has_pending_response());
        assert!(String::from_utf8(socket.written())
            .expect("utf8")
            .starts_with("HTTP/1.0 200 OK"));
    }

    #[test]
    fn staged_writes_report_metadata_bytes() {
        let socket = MockSocket::new();
        socket.plan_write(WritePlan::Partial(3));
        let mut listener = listener(socket);
        listener
            .staging_mut()
            .splice(b"aabb", 2, b"MM")
            .expect("fits");

        match listener.write_staged() {
            WriteOutcome::Progressed(sent) => {
                assert_eq!(sent.written, 3);
                assert_eq!(sent.metadata, 1);
                assert_eq!(sent.audio(), 2);
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
