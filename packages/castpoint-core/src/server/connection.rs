//! Per-socket state of an accepted client.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use super::reactor::Token;
use super::socket::ClientSocket;

/// An accepted client socket with its delivery counters.
///
/// All byte counters count audio only; injected metadata never inflates them.
#[derive(Debug)]
pub struct Connection<S> {
    socket: S,
    peer: SocketAddr,
    token: Token,
    connected_at: Instant,
    bytes_sent_total: u64,
    bytes_sent_last: usize,
    burst_bytes: usize,
    initial_burst_remaining: i64,
    metadata_delivered: bool,
    metadata_blocks: u64,
}

impl<S: ClientSocket> Connection<S> {
    pub fn new(socket: S, peer: SocketAddr, token: Token, initial_burst_size: usize) -> Self {
        Self {
            socket,
            peer,
            token,
            connected_at: Instant::now(),
            bytes_sent_total: 0,
            bytes_sent_last: 0,
            burst_bytes: 0,
            initial_burst_remaining: i64::try_from(initial_burst_size).unwrap_or(i64::MAX),
            metadata_delivered: false,
            metadata_blocks: 0,
        }
    }

    pub fn socket(&self) -> &S {
        &self.socket
    }

    pub fn socket_mut(&mut self) -> &mut S {
        &mut self.socket
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn token(&self) -> Token {
        self.token
    }

    /// Time since the connection was accepted.
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }

    pub fn bytes_sent_total(&self) -> u64 {
        self.bytes_sent_total
    }

    pub fn bytes_sent_last(&self) -> usize {
        self.bytes_sent_last
    }

    /// Audio bytes sent in the current pacing window.
    pub fn burst_bytes(&self) -> usize {
        self.burst_bytes
    }

    pub fn initial_burst_remaining(&self) -> i64 {
        self.initial_burst_remaining
    }

    /// True while the unpaced initial burst still has allowance.
    pub fn in_initial_burst(&self) -> bool {
        self.initial_burst_remaining > 0
    }

    pub fn metadata_delivered(&self) -> bool {
        self.metadata_delivered
    }

    pub fn metadata_blocks(&self) -> u64 {
        self.metadata_blocks
    }

    /// Accounts `audio` delivered bytes.
    pub fn record_sent(&mut self, audio: usize) {
        self.bytes_sent_total += audio as u64;
        self.bytes_sent_last = audio;
        self.burst_bytes += audio;
        if self.initial_burst_remaining > 0 {
            self.initial_burst_remaining -= i64::try_from(audio).unwrap_or(i64::MAX);
        }
    }

    /// Starts a fresh pacing window.
    pub fn reset_burst_window(&mut self) {
        self.burst_bytes = 0;
    }

    /// Lowers the remaining initial burst to at most `limit`.
    ///
    /// Never raises it: once spent, the initial burst stays spent.
    pub fn cap_initial_burst(&mut self, limit: usize) {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        self.initial_burst_remaining = self.initial_burst_remaining.min(limit);
    }

    /// Records that a metadata block was staged.
    pub fn record_metadata(&mut self, carried_title: bool) {
        self.metadata_blocks += 1;
        if carried_title {
            self.metadata_delivered = true;
        }
    }

    /// Makes the next metadata block carry the current title again.
    pub fn reset_metadata(&mut self) {
        self.metadata_delivered = false;
    }

    /// Closes the socket.
    pub fn close(&mut self) {
        self.socket.shutdown();
    }
}
