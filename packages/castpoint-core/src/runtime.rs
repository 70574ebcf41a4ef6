//! Tokio glue that drives a [`Server`].
//!
//! The server core never awaits. [`EventLoop::run`] reads the wakeups the
//! server armed in its [`Watchers`](crate::server::Watchers) table, waits on
//! the matching tokio primitive (accept, socket readiness, a sleep, the pool's
//! notify, or a control command) and dispatches the result as an [`Event`].
//! All server state lives inside the single task running the loop; other
//! tasks talk to it through a [`ServerHandle`].

use std::future::pending;
use std::io;
use std::net::SocketAddr;

use socket2::{Domain, Protocol, SockRef, Socket, Type};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

use crate::error::{ServerError, ServerResult};
use crate::protocol_constants::LISTEN_BACKLOG;
use crate::server::{Acceptor, ClientSocket, Event, Interest, Server, Token, LISTENER_TOKEN};
use crate::stream::{AudioFormat, BufferPool, MountpointSettings};

/// Listening socket backed by tokio.
///
/// Tokio completes accepts asynchronously, so the event loop awaits the
/// accept itself, parks the new stream here and then lets the server pick it
/// up through [`Acceptor::accept`].
pub struct TokioAcceptor {
    socket: Option<Socket>,
    listener: Option<TcpListener>,
    local_addr: SocketAddr,
    parked: Option<(TcpStream, SocketAddr)>,
}

impl TokioAcceptor {
    /// Creates the socket and binds it with `SO_REUSEADDR`.
    pub fn bind(addr: SocketAddr) -> ServerResult<Self> {
        let bind_err = |source| ServerError::Bind { addr, source };

        let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))
            .map_err(bind_err)?;
        socket.set_reuse_address(true).map_err(bind_err)?;
        socket.bind(&addr.into()).map_err(bind_err)?;

        let local_addr = socket
            .local_addr()
            .ok()
            .and_then(|a| a.as_socket())
            .unwrap_or(addr);

        Ok(Self {
            socket: Some(socket),
            listener: None,
            local_addr,
            parked: None,
        })
    }

    /// Waits for the next incoming connection.
    ///
    /// Never resolves before [`Acceptor::listen`] succeeded.
    pub async fn accept_next(&self) -> io::Result<(TcpStream, SocketAddr)> {
        match &self.listener {
            Some(listener) => listener.accept().await,
            None => pending().await,
        }
    }

    /// Hands an accepted stream to the next [`Acceptor::accept`] call.
    pub fn park(&mut self, stream: TcpStream, peer: SocketAddr) {
        if let Some((_, previous)) = self.parked.replace((stream, peer)) {
            log::debug!("[Server] Dropping unclaimed connection from {}", previous);
        }
    }
}

impl Acceptor for TokioAcceptor {
    type Stream = TcpStream;

    /// Must run inside a tokio runtime.
    fn listen(&mut self) -> io::Result<()> {
        let Some(socket) = self.socket.take() else {
            return Ok(());
        };
        socket.listen(LISTEN_BACKLOG)?;
        socket.set_nonblocking(true)?;
        let listener: std::net::TcpListener = socket.into();
        self.listener = Some(TcpListener::from_std(listener)?);
        Ok(())
    }

    fn accept(&mut self) -> io::Result<(TcpStream, SocketAddr)> {
        self.parked
            .take()
            .ok_or_else(|| io::Error::from(io::ErrorKind::WouldBlock))
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        match &self.listener {
            Some(listener) => listener.local_addr(),
            None => Ok(self.local_addr),
        }
    }
}

impl ClientSocket for TcpStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.try_read(buf)
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.try_write(buf)
    }

    fn configure(&self) -> io::Result<()> {
        let sock = SockRef::from(self);
        sock.set_linger(None)?;
        sock.set_keepalive(true)?;
        self.set_nodelay(true)
    }

    fn shutdown(&mut self) {
        let _ = SockRef::from(&*self).shutdown(std::net::Shutdown::Both);
    }
}

/// Control messages for a running [`EventLoop`].
#[derive(Debug, Clone)]
pub enum Command {
    SetStreamTitle(String),
    SetAudioFormat(AudioFormat),
    SetMountpoint(MountpointSettings),
    Shutdown,
}

/// Cloneable control handle for a running [`EventLoop`].
#[derive(Debug, Clone)]
pub struct ServerHandle {
    tx: mpsc::UnboundedSender<Command>,
    local_addr: SocketAddr,
}

impl ServerHandle {
    /// Address the server is listening on.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn set_stream_title(&self, title: impl Into<String>) -> ServerResult<()> {
        self.send(Command::SetStreamTitle(title.into()))
    }

    pub fn set_audio_format(&self, format: AudioFormat) -> ServerResult<()> {
        self.send(Command::SetAudioFormat(format))
    }

    pub fn set_mountpoint(&self, mount: MountpointSettings) -> ServerResult<()> {
        self.send(Command::SetMountpoint(mount))
    }

    /// Stops the server and ends the event loop.
    pub fn shutdown(&self) -> ServerResult<()> {
        self.send(Command::Shutdown)
    }

    fn send(&self, command: Command) -> ServerResult<()> {
        self.tx.send(command).map_err(|_| ServerError::Closed)
    }
}

/// What woke the loop up.
enum Wake {
    Command(Option<Command>),
    Accepted(io::Result<(TcpStream, SocketAddr)>),
    Io(Token, Interest),
    Timer(Token),
    Data,
}

/// Owns a started [`Server`] and drives it from tokio.
pub struct EventLoop {
    server: Server<TokioAcceptor>,
    pool: BufferPool,
    commands: mpsc::UnboundedReceiver<Command>,
}

impl EventLoop {
    /// Binds and starts a server fed from `pool`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn bind(
        addr: SocketAddr,
        pool: BufferPool,
        format: AudioFormat,
        mount: MountpointSettings,
    ) -> ServerResult<(Self, ServerHandle)> {
        let acceptor = TokioAcceptor::bind(addr)?;
        let mut server = Server::new(acceptor, Box::new(pool.clone()), format, mount);
        let local_addr = server.start()?;

        let (tx, commands) = mpsc::unbounded_channel();
        let event_loop = Self {
            server,
            pool,
            commands,
        };
        Ok((event_loop, ServerHandle { tx, local_addr }))
    }

    pub fn server(&self) -> &Server<TokioAcceptor> {
        &self.server
    }

    pub fn server_mut(&mut self) -> &mut Server<TokioAcceptor> {
        &mut self.server
    }

    /// Runs until [`ServerHandle::shutdown`] is called or every handle is dropped.
    pub async fn run(mut self) {
        loop {
            match self.next_wake().await {
                Wake::Command(Some(Command::Shutdown)) | Wake::Command(None) => break,
                Wake::Command(Some(command)) => self.apply(command),
                Wake::Accepted(Ok((stream, peer))) => {
                    self.server.acceptor_mut().park(stream, peer);
                    self.server.dispatch(Event::Readable(LISTENER_TOKEN));
                }
                Wake::Accepted(Err(e)) => {
                    log::warn!("[Server] Accept failed: {}", e);
                }
                Wake::Io(token, Interest::Readable) => self.server.dispatch(Event::Readable(token)),
                Wake::Io(token, Interest::Writable) => self.server.dispatch(Event::Writable(token)),
                Wake::Timer(token) => self.server.dispatch(Event::TimerFired(token)),
                Wake::Data => self.server.dispatch(Event::DataAvailable),
            }
        }

        self.server.stop();
        log::info!("[Server] Event loop finished");
    }

    /// Waits for whichever armed wakeup happens first.
    async fn next_wake(&mut self) -> Wake {
        let server = &self.server;
        let pool = &self.pool;
        let commands = &mut self.commands;

        let watchers = server.watchers();
        let listening = watchers.interest(LISTENER_TOKEN).is_some();
        let client = server
            .active_token()
            .and_then(|token| watchers.interest(token).map(|interest| (token, interest)));
        let timer = server
            .active_token()
            .and_then(|token| watchers.deadline(token).map(|deadline| (token, deadline)));

        let accept = async {
            if listening {
                server.acceptor().accept_next().await
            } else {
                pending().await
            }
        };

        let io_ready = async {
            match (client, server.client_socket()) {
                (Some((token, interest)), Some(socket)) => {
                    let wanted = match interest {
                        Interest::Readable => tokio::io::Interest::READABLE,
                        Interest::Writable => tokio::io::Interest::WRITABLE,
                    };
                    // Errors surface on the next read or write.
                    let _ = socket.ready(wanted).await;
                    (token, interest)
                }
                _ => pending().await,
            }
        };

        let tick = async {
            match timer {
                Some((token, deadline)) => {
                    tokio::time::sleep_until(tokio::time::Instant::from_std(deadline)).await;
                    token
                }
                None => pending().await,
            }
        };

        tokio::select! {
            biased;

            command = commands.recv() => Wake::Command(command),
            accepted = accept => Wake::Accepted(accepted),
            (token, interest) = io_ready => Wake::Io(token, interest),
            token = tick => Wake::Timer(token),
            _ = pool.notified() => Wake::Data,
        }
    }

    fn apply(&mut self, command: Command) {
        match command {
            Command::SetStreamTitle(title) => self.server.set_stream_title(&title),
            Command::SetAudioFormat(format) => self.server.set_audio_format(format),
            Command::SetMountpoint(mount) => self.server.set_mountpoint(mount),
            Command::Shutdown => self.server.stop(),
        }
    }
}
