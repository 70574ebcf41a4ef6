//! Single-listener ICY streaming server.
//!
//! [`Server`] owns the listening socket, at most one [`Listener`], and the
//! upstream buffer currently being drained. It never waits: every entry point
//! does as much non-blocking work as it can, arms exactly the wakeup it needs
//! in [`Watchers`], and returns. A driver (see [`crate::runtime`]) turns those
//! registrations into [`Event`]s and feeds them back through
//! [`Server::dispatch`].

pub mod buffer;
pub mod connection;
pub mod listener;
pub mod reactor;
pub mod request;
pub mod response;
pub mod socket;

#[cfg(test)]
pub(crate) mod test_support;

use std::fmt;
use std::io;
use std::net::SocketAddr;

use http::StatusCode;

pub use buffer::{BufferOverflow, Consumed, ListenerBuffer};
pub use connection::Connection;
pub use listener::{
    HandshakeContext, Listener, ListenerState, ListenerStats, RequestOutcome, Sent, WriteOutcome,
};
pub use reactor::{Event, Interest, Token, Watchers, LISTENER_TOKEN};
pub use request::{HttpRequestParser, ParseError, RequestParser};
pub use socket::{is_recoverable, Acceptor, ClientSocket};

use crate::error::{ServerError, ServerResult};
use crate::protocol_constants::{MAX_METADATA_BLOCK_LEN, TITLE_CHANGE_BURST_PERCENT};
use crate::stream::icy::{plan_splice, IcyFormatter, SpliceRequest};
use crate::stream::{AudioBuffer, AudioFormat, BufferSource, MountpointSettings, Pacing};

/// Builds the request parser for each new listener.
pub type ParserFactory = fn() -> Box<dyn RequestParser + Send + Sync>;

fn default_parser() -> Box<dyn RequestParser + Send + Sync> {
    Box::new(HttpRequestParser::new())
}

/// Why a listener was torn down.
#[derive(Debug)]
pub enum CloseReason {
    /// A new connection replaced it.
    Evicted,
    /// The server was stopped.
    Stopped,
    /// The client closed its end.
    PeerClosed,
    /// Unrecoverable socket error.
    ClientError(io::Error),
    /// The request was refused with this status.
    Rejected(StatusCode),
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Evicted => write!(f, "evicted"),
            Self::Stopped => write!(f, "stopped"),
            Self::PeerClosed => write!(f, "socket closed"),
            Self::ClientError(e) => write!(f, "client error: {}", e),
            Self::Rejected(status) => write!(f, "rejected {}", status.as_u16()),
        }
    }
}

/// Result of one accept attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcceptOutcome {
    /// A listener was registered under this token.
    Accepted(Token),
    /// Nothing was accepted; the server keeps listening.
    NotReady,
}

/// How a write-loop pass ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassOutcome {
    /// Nothing to do.
    Idle,
    /// The handshake is still in progress.
    NotReady,
    /// The upstream had no buffer; resumes on data-available.
    NeedData,
    /// The socket is full; resumes on write readiness.
    Saturated,
    /// The pacing window is used up; resumes on the next tick.
    WindowExhausted,
    /// The listener was torn down.
    Closed,
}

enum Readiness {
    Ready,
    NotReady,
    Closed,
}

/// The streaming server.
pub struct Server<A: Acceptor> {
    acceptor: A,
    local_addr: Option<SocketAddr>,
    started: bool,
    listener: Option<Listener<A::Stream>>,
    next_token: u64,
    parser_factory: ParserFactory,
    source: Box<dyn BufferSource + Send + Sync>,
    held: Option<AudioBuffer>,
    awaiting_data: bool,
    format: AudioFormat,
    pacing: Pacing,
    mount: MountpointSettings,
    stream_title: String,
    watchers: Watchers,
}

impl<A: Acceptor> Server<A> {
    pub fn new(
        acceptor: A,
        source: Box<dyn BufferSource + Send + Sync>,
        format: AudioFormat,
        mount: MountpointSettings,
    ) -> Self {
        Self {
            acceptor,
            local_addr: None,
            started: false,
            listener: None,
            next_token: LISTENER_TOKEN.0,
            parser_factory: default_parser,
            source,
            held: None,
            awaiting_data: false,
            pacing: Pacing::for_format(&format),
            format,
            mount,
            stream_title: String::new(),
            watchers: Watchers::new(),
        }
    }

    /// Replaces the request parser used for listeners accepted from now on.
    pub fn set_parser_factory(&mut self, factory: ParserFactory) {
        self.parser_factory = factory;
    }

    /// Starts listening and arms the accept watcher.
    pub fn start(&mut self) -> ServerResult<SocketAddr> {
        self.acceptor.listen().map_err(ServerError::Listen)?;
        let addr = self.acceptor.local_addr()?;
        self.local_addr = Some(addr);
        self.started = true;
        self.watchers.watch(LISTENER_TOKEN, Interest::Readable);

        log::info!(
            "[Server] Listening on {} ({} kbps, metaint {}, initial burst {} bytes)",
            addr,
            self.format.kbps(),
            self.mount.metadata_period,
            self.mount.initial_burst_size
        );
        Ok(addr)
    }

    /// Stops accepting and tears down the active listener. Idempotent.
    pub fn stop(&mut self) {
        self.watchers.unwatch(LISTENER_TOKEN);
        self.destroy_listener(CloseReason::Stopped);
        self.release_held();
        if self.started {
            self.started = false;
            log::info!("[Server] Stopped");
        }
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    /// Address the server is listening on.
    pub fn local_addr(&self) -> ServerResult<SocketAddr> {
        match self.local_addr {
            Some(addr) if self.started => Ok(addr),
            _ => Err(ServerError::NotStarted),
        }
    }

    pub fn acceptor(&self) -> &A {
        &self.acceptor
    }

    pub fn acceptor_mut(&mut self) -> &mut A {
        &mut self.acceptor
    }

    /// Currently armed wakeups.
    pub fn watchers(&self) -> &Watchers {
        &self.watchers
    }

    pub fn listener(&self) -> Option<&Listener<A::Stream>> {
        self.listener.as_ref()
    }

    pub fn active_token(&self) -> Option<Token> {
        self.listener.as_ref().map(Listener::token)
    }

    /// Socket of the active listener, for the driver to poll readiness on.
    pub fn client_socket(&self) -> Option<&A::Stream> {
        self.listener.as_ref().map(|l| l.connection().socket())
    }

    pub fn listener_stats(&self) -> Option<ListenerStats> {
        self.listener.as_ref().map(Listener::stats)
    }

    pub fn format(&self) -> &AudioFormat {
        &self.format
    }

    pub fn pacing(&self) -> &Pacing {
        &self.pacing
    }

    pub fn mountpoint(&self) -> &MountpointSettings {
        &self.mount
    }

    pub fn stream_title(&self) -> &str {
        &self.stream_title
    }

    /// True if the last pass stopped for lack of upstream data.
    pub fn is_awaiting_data(&self) -> bool {
        self.awaiting_data
    }

    /// Routes one reactor event.
    pub fn dispatch(&mut self, event: Event) {
        log::trace!("[Server] {:?}", event);
        match event {
            Event::Readable(token) | Event::Writable(token) => self.on_io_ready(token),
            Event::TimerFired(token) => {
                self.on_timer(token);
            }
            Event::DataAvailable => {
                self.on_data_available();
            }
        }
    }

    /// A watched socket became ready.
    pub fn on_io_ready(&mut self, token: Token) {
        if token == LISTENER_TOKEN {
            if self.started {
                self.accept_connection();
            }
        } else if self.active_token() == Some(token) {
            self.write_loop();
        } else {
            log::trace!("[Server] Ignoring readiness for stale token {:?}", token);
        }
    }

    /// The pacing timer of `token` expired.
    pub fn on_timer(&mut self, token: Token) -> PassOutcome {
        if self.active_token() != Some(token) {
            return PassOutcome::Idle;
        }
        self.disarm_pacing(token);
        self.write_loop()
    }

    /// The upstream queued more audio.
    ///
    /// Only resumes a pass that stopped for lack of data; an in-progress
    /// pacing window is left alone.
    pub fn on_data_available(&mut self) -> PassOutcome {
        if !self.awaiting_data {
            return PassOutcome::Idle;
        }
        self.awaiting_data = false;
        self.write_loop()
    }

    /// Accepts one pending connection, evicting the current listener.
    pub fn accept_connection(&mut self) -> AcceptOutcome {
        let outcome = match self.acceptor.accept() {
            Ok((socket, peer)) => self.register(socket, peer),
            Err(e) if is_recoverable(&e) => AcceptOutcome::NotReady,
            Err(e) => {
                log::warn!("[Server] Accept failed: {}", e);
                AcceptOutcome::NotReady
            }
        };
        if self.started {
            self.watchers.watch(LISTENER_TOKEN, Interest::Readable);
        }
        outcome
    }

    fn register(&mut self, mut socket: A::Stream, peer: SocketAddr) -> AcceptOutcome {
        if let Err(e) = socket.configure() {
            log::warn!("[Server] Dropping connection from {}: {}", peer, e);
            socket.shutdown();
            return AcceptOutcome::NotReady;
        }

        if self.listener.is_some() {
            self.destroy_listener(CloseReason::Evicted);
        }

        self.next_token += 1;
        let token = Token(self.next_token);
        let conn = Connection::new(socket, peer, token, self.mount.initial_burst_size);
        let staging_capacity = self.pacing.burst_size + MAX_METADATA_BLOCK_LEN;
        self.listener = Some(Listener::new(conn, (self.parser_factory)(), staging_capacity));
        self.watchers.watch(token, Interest::Writable);

        log::info!("[Listener {}] Connected", peer);
        AcceptOutcome::Accepted(token)
    }

    /// Replaces the stream format and recomputes pacing.
    pub fn set_audio_format(&mut self, format: AudioFormat) {
        self.format = format;
        self.pacing = Pacing::for_format(&format);
        log::info!(
            "[Server] Audio format {} kbps, {} ch, {} Hz: {} bytes/frame, tick {:?}",
            format.kbps(),
            format.channels,
            format.sample_rate,
            self.pacing.bytes_per_frame,
            self.pacing.wait_time
        );
        if let Some(token) = self.streaming_token() {
            self.arm_pacing(token);
        }
    }

    /// Replaces the mountpoint settings.
    pub fn set_mountpoint(&mut self, mount: MountpointSettings) {
        log::info!(
            "[Server] Mountpoint {} ({}), metaint {}",
            mount.name,
            mount.station_name,
            mount.metadata_period
        );
        self.mount = mount;
    }

    /// Replaces the stream title and pushes it to the active listener soon.
    pub fn set_stream_title(&mut self, title: &str) {
        self.stream_title = IcyFormatter::sanitize_title(title);
        log::info!("[Server] Stream title: {}", self.stream_title);

        let burst_cap = self.mount.initial_burst_size * TITLE_CHANGE_BURST_PERCENT / 100;
        if let Some(listener) = self.listener.as_mut() {
            let conn = listener.connection_mut();
            conn.reset_metadata();
            conn.cap_initial_burst(burst_cap);
        }
        if let Some(token) = self.streaming_token() {
            self.arm_pacing(token);
        }
    }

    /// Runs one write-loop pass for the active listener.
    pub fn write_loop(&mut self) -> PassOutcome {
        let Some(token) = self.active_token() else {
            return PassOutcome::Idle;
        };
        self.watchers.unwatch(token);

        match self.ensure_ready(token) {
            Readiness::Ready => {}
            Readiness::NotReady => return PassOutcome::NotReady,
            Readiness::Closed => return PassOutcome::Closed,
        }
        if let Some(outcome) = self.flush_response(token) {
            return outcome;
        }

        self.arm_pacing(token);
        if let Some(listener) = self.listener.as_mut() {
            if !listener.connection().in_initial_burst() {
                listener.connection_mut().reset_burst_window();
            }
        }

        loop {
            let staged = self
                .listener
                .as_ref()
                .is_some_and(|l| !l.staging().is_empty());
            if self.held.is_none() && !staged {
                match self.source.acquire() {
                    Some(buffer) => self.held = Some(buffer),
                    None => {
                        self.awaiting_data = true;
                        self.disarm_pacing(token);
                        return PassOutcome::NeedData;
                    }
                }
            }

            let sent = match self.write_step() {
                WriteOutcome::Progressed(sent) => sent,
                WriteOutcome::NoMoreData => {
                    self.release_held();
                    continue;
                }
                WriteOutcome::WouldBlock => {
                    self.back_off(token);
                    return PassOutcome::Saturated;
                }
                WriteOutcome::Fatal(e) => {
                    self.destroy_listener(CloseReason::ClientError(e));
                    return PassOutcome::Closed;
                }
            };

            let Some(listener) = self.listener.as_mut() else {
                return PassOutcome::Closed;
            };
            let conn = listener.connection_mut();
            conn.record_sent(sent.audio());
            let window_exhausted =
                !conn.in_initial_burst() && conn.burst_bytes() >= self.pacing.burst_size;
            let staged = !listener.staging().is_empty();

            if sent.is_partial() {
                self.back_off(token);
                return PassOutcome::Saturated;
            }
            if window_exhausted {
                self.arm_pacing(token);
                return PassOutcome::WindowExhausted;
            }
            if !staged && self.held.as_ref().is_some_and(AudioBuffer::is_drained) {
                self.release_held();
            }
        }
    }

    /// Arranges and writes the next chunk.
    ///
    /// Staged bytes go first. Otherwise the chunk comes from the held
    /// buffer: straight to the socket, or through the staging buffer when a
    /// metadata block has to be spliced in.
    fn write_step(&mut self) -> WriteOutcome {
        let Self {
            listener,
            held,
            pacing,
            mount,
            stream_title,
            ..
        } = self;
        let Some(listener) = listener.as_mut() else {
            return WriteOutcome::NoMoreData;
        };
        if !listener.staging().is_empty() {
            return listener.write_staged();
        }
        let Some(buffer) = held.as_mut() else {
            return WriteOutcome::NoMoreData;
        };

        let conn = listener.connection();
        let window = if conn.in_initial_burst() {
            pacing.burst_size
        } else {
            pacing.burst_size.saturating_sub(conn.burst_bytes())
        };
        let remaining = buffer.remaining();
        if remaining.is_empty() {
            return WriteOutcome::NoMoreData;
        }
        let len = remaining.len().min(window);
        if len == 0 {
            // Window already spent; the caller sees no progress and backs off.
            return WriteOutcome::Progressed(Sent::default());
        }

        let plan = plan_splice(SpliceRequest {
            bytes_sent_total: conn.bytes_sent_total(),
            len,
            burst_size: pacing.burst_size,
            metadata_period: mount.metadata_period,
            wants_metadata: listener.wants_metadata(),
        });
        let carries_title = !conn.metadata_delivered() && !stream_title.is_empty();

        let Some(plan) = plan else {
            let outcome = listener.write_direct(remaining.get(..len).unwrap_or(remaining));
            if let WriteOutcome::Progressed(sent) = &outcome {
                buffer.advance(sent.written);
            }
            return outcome;
        };

        let block = if carries_title {
            IcyFormatter::format_title(stream_title.as_str())
        } else {
            vec![0]
        };
        let audio = remaining.get(..plan.audio_len).unwrap_or(remaining);
        if let Err(e) = listener.staging_mut().splice(audio, plan.offset, &block) {
            return WriteOutcome::Fatal(io::Error::other(e));
        }
        buffer.advance(plan.audio_len);
        listener.connection_mut().record_metadata(carries_title);
        log::debug!(
            "[Listener {}] Metadata block of {} bytes after {} audio bytes",
            listener.peer(),
            block.len(),
            plan.offset
        );
        listener.write_staged()
    }

    /// Drives the handshake until the listener is streaming.
    fn ensure_ready(&mut self, token: Token) -> Readiness {
        let outcome = {
            let Self {
                listener,
                format,
                mount,
                ..
            } = self;
            let Some(listener) = listener.as_mut() else {
                return Readiness::Closed;
            };
            if !listener.is_awaiting_request() {
                return Readiness::Ready;
            }
            let max_clients = mount.max_clients;
            listener.handle_request(&HandshakeContext {
                format,
                mount,
                active_listeners: 1,
                max_clients,
            })
        };

        match outcome {
            RequestOutcome::Accepted => Readiness::Ready,
            RequestOutcome::Pending => {
                self.watchers.watch(token, Interest::Readable);
                Readiness::NotReady
            }
            RequestOutcome::Rejected(rejection) => {
                if let Some(listener) = self.listener.as_mut() {
                    log::warn!("[Listener {}] Rejected: {}", listener.peer(), rejection);
                    listener.send_rejection(&rejection);
                }
                self.destroy_listener(CloseReason::Rejected(rejection.status_code()));
                Readiness::Closed
            }
            RequestOutcome::PeerClosed => {
                self.destroy_listener(CloseReason::PeerClosed);
                Readiness::Closed
            }
            RequestOutcome::Failed(e) => {
                self.destroy_listener(CloseReason::ClientError(e));
                Readiness::Closed
            }
        }
    }

    /// Sends what is left of the HTTP response. `None` once it is all out.
    fn flush_response(&mut self, token: Token) -> Option<PassOutcome> {
        let listener = self.listener.as_mut()?;
        match listener.flush_response() {
            WriteOutcome::NoMoreData => None,
            WriteOutcome::Progressed(sent) if !sent.is_partial() => None,
            WriteOutcome::Progressed(_) | WriteOutcome::WouldBlock => {
                self.back_off(token);
                Some(PassOutcome::Saturated)
            }
            WriteOutcome::Fatal(e) => {
                self.destroy_listener(CloseReason::ClientError(e));
                Some(PassOutcome::Closed)
            }
        }
    }

    fn streaming_token(&self) -> Option<Token> {
        self.listener
            .as_ref()
            .filter(|l| l.state() == ListenerState::Streaming)
            .map(Listener::token)
    }

    /// Waits for write readiness instead of the pacing timer.
    fn back_off(&mut self, token: Token) {
        self.watchers.watch(token, Interest::Writable);
        self.disarm_pacing(token);
    }

    fn arm_pacing(&mut self, token: Token) {
        self.watchers.arm_timer(token, self.pacing.wait_time);
        if let Some(listener) = self.listener.as_mut() {
            listener.set_timer_armed(true);
        }
    }

    fn disarm_pacing(&mut self, token: Token) {
        self.watchers.disarm_timer(token);
        if let Some(listener) = self.listener.as_mut() {
            listener.set_timer_armed(false);
        }
    }

    fn release_held(&mut self) {
        if let Some(buffer) = self.held.take() {
            self.source.release(buffer);
        }
    }

    /// Tears down the active listener, if any.
    fn destroy_listener(&mut self, reason: CloseReason) {
        let Some(mut listener) = self.listener.take() else {
            return;
        };
        self.watchers.forget(listener.token());
        self.release_held();
        self.awaiting_data = false;
        listener.close();

        let stats = listener.stats();
        log::info!(
            "[Listener {}] Closed ({}): {} bytes in {:.1}s, {} metadata blocks",
            stats.peer,
            reason,
            stats.bytes_sent_total,
            stats.connected_for.as_secs_f64(),
            stats.metadata_blocks
        );
    }
}

impl<A: Acceptor> Drop for Server<A> {
    fn drop(&mut self) {
        self.stop();
    }
}
