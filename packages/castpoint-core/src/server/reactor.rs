//! Readiness and timer registrations.
//!
//! The server never waits itself. Whenever it cannot make progress it arms a
//! watcher here (read readiness, write readiness, or the pacing timer) and
//! returns. The driving event loop reads this table, waits for whichever
//! registrations are armed, and feeds the result back as an [`Event`].
//! Cancelling a wakeup is removing its registration.

use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Identifies a socket registered with the reactor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Token(pub u64);

/// Token of the listening socket. Client tokens start above it.
pub const LISTENER_TOKEN: Token = Token(0);

/// Readiness a socket watcher waits for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interest {
    Readable,
    Writable,
}

/// Something the server must react to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    /// The socket behind the token has bytes (or a connection) to take.
    Readable(Token),
    /// The socket behind the token can take more bytes.
    Writable(Token),
    /// The pacing timer of the token expired.
    TimerFired(Token),
    /// The upstream stage queued more audio.
    DataAvailable,
}

/// Armed watchers, at most one socket watcher and one timer per token.
#[derive(Debug, Default)]
pub struct Watchers {
    io: HashMap<Token, Interest>,
    timers: HashMap<Token, Instant>,
}

impl Watchers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arms the socket watcher, replacing any previous interest.
    pub fn watch(&mut self, token: Token, interest: Interest) {
        self.io.insert(token, interest);
    }

    /// Disarms the socket watcher.
    pub fn unwatch(&mut self, token: Token) {
        self.io.remove(&token);
    }

    /// Arms (or re-arms) the timer to fire `after` from now.
    pub fn arm_timer(&mut self, token: Token, after: Duration) {
        self.timers.insert(token, Instant::now() + after);
    }

    /// Disarms the timer.
    pub fn disarm_timer(&mut self, token: Token) {
        self.timers.remove(&token);
    }

    /// Drops every registration of the token.
    pub fn forget(&mut self, token: Token) {
        self.unwatch(token);
        self.disarm_timer(token);
    }

    /// Interest currently armed for the token.
    pub fn interest(&self, token: Token) -> Option<Interest> {
        self.io.get(&token).copied()
    }

    /// Deadline of the token's armed timer.
    pub fn deadline(&self, token: Token) -> Option<Instant> {
        self.timers.get(&token).copied()
    }

    /// Returns true if nothing at all is armed.
    pub fn is_empty(&self) -> bool {
        self.io.is_empty() && self.timers.is_empty()
    }
}
