//! Ping/Pong keep-alive protocol
//!
//! Every ping we send carries a random nonce and must be answered by a pong echoing it within
//! the ping timeout, otherwise the peer is considered dead. Pongs are also used to learn that
//! the peer has processed everything we sent before the ping, which is how a broadcast is
//! acknowledged.

use rand::Rng;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Ping/Pong state tracker
#[derive(Debug)]
pub struct PingPongState {
    /// Map of sent ping nonces to when they were sent
    sent_pings: HashMap<u64, Instant>,
    ping_timeout: Duration,
}

impl PingPongState {
    pub fn new(ping_timeout: Duration) -> Self {
        Self {
            sent_pings: HashMap::new(),
            ping_timeout,
        }
    }

    /// Generate a new, non-zero ping nonce
    pub fn generate_nonce() -> u64 {
        rand::thread_rng().gen_range(1..=u64::MAX)
    }

    /// Record a sent ping
    pub fn record_ping(&mut self, nonce: u64) {
        self.sent_pings.insert(nonce, Instant::now());
    }

    /// Match a received pong against the sent pings, returning the round trip time.
    /// Pongs with an unknown nonce return None.
    pub fn validate_pong(&mut self, nonce: u64) -> Option<Duration> {
        self.sent_pings.remove(&nonce).map(|sent_at| sent_at.elapsed())
    }

    /// Remove and return the nonces of pings that went unanswered for longer than the timeout.
    pub fn check_timeouts(&mut self) -> Vec<u64> {
        let timeout = self.ping_timeout;
        let mut timed_out = Vec::new();
        self.sent_pings.retain(|&nonce, sent_at| {
            if sent_at.elapsed() > timeout {
                timed_out.push(nonce);
                false
            } else {
                true
            }
        });
        timed_out
    }

    pub fn pending_count(&self) -> usize {
        self.sent_pings.len()
    }
}
