//! Per-circuit session bookkeeping.

use crate::message::Message;
use crate::time::Instant;

/// Wire direction of a message, relative to the client end of the circuit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Towards the client.
    In,
    /// Towards the server.
    Out,
}

/// A sent/received counter pair. Both are monotonically non-decreasing
/// within a session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Counters {
    pub sent: u64,
    pub rcv: u64,
}

/// One entry of the append-only session history, used for offline analysis.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HistoryEntry<T: Instant> {
    /// Ingestion or emission time, set by this end, never by the peer.
    pub at: T,
    pub flags: u8,
    pub direction: Direction,
    pub total_len: usize,
    pub payload_len: usize,
}

/// Bookkeeping for one circuit session: counters, timestamps, and the
/// history log. Created on session start and replaced wholesale on the next
/// start, so counters never decrease within a session.
#[derive(Debug, Clone)]
pub struct Session<T: Instant> {
    start: T,
    pub num_messages: Counters,
    pub total_bytes: Counters,
    pub data_bytes: Counters,
    pub data_messages: Counters,
    pub last_snd_downstream: Option<T>,
    pub last_rcv_downstream: Option<T>,
    pub last_snd_data_downstream: Option<T>,
    pub last_rcv_data_downstream: Option<T>,
    /// Consecutive padding messages sent, reset on each real data send.
    pub consec_padding_msgs: u32,
    history: Vec<HistoryEntry<T>>,
    visiting: bool,
}

impl<T: Instant> Session<T> {
    pub fn new(now: T) -> Self {
        Session {
            start: now,
            num_messages: Counters::default(),
            total_bytes: Counters::default(),
            data_bytes: Counters::default(),
            data_messages: Counters::default(),
            last_snd_downstream: None,
            last_rcv_downstream: None,
            last_snd_data_downstream: None,
            last_rcv_data_downstream: None,
            consec_padding_msgs: 0,
            history: Vec::new(),
            visiting: false,
        }
    }

    /// Time since session start.
    pub fn elapsed(&self, now: T) -> T::Duration {
        now.saturating_duration_since(self.start)
    }

    /// Whether the application layer currently has an active browsing visit.
    pub fn is_visiting(&self) -> bool {
        self.visiting
    }

    /// Set by the circuit layer: true once real data starts flowing, false
    /// on the page-load completion signal.
    pub fn set_visiting(&mut self, visiting: bool) {
        self.visiting = visiting;
    }

    pub fn history(&self) -> &[HistoryEntry<T>] {
        &self.history
    }

    /// Account for one message sent downstream.
    pub fn record_outbound(&mut self, msg: &Message, direction: Direction, now: T) {
        self.num_messages.sent += 1;
        self.total_bytes.sent += msg.total_len() as u64;
        self.last_snd_downstream = Some(now);
        if msg.is_data() {
            self.data_bytes.sent += msg.payload.len() as u64;
            self.data_messages.sent += 1;
            self.last_snd_data_downstream = Some(now);
            self.consec_padding_msgs = 0;
        } else if msg.is_padding() {
            self.consec_padding_msgs += 1;
        }
        self.push_history(msg, direction, now);
    }

    /// Account for one message received downstream.
    pub fn record_inbound(&mut self, msg: &Message, direction: Direction, now: T) {
        self.num_messages.rcv += 1;
        self.total_bytes.rcv += msg.total_len() as u64;
        self.last_rcv_downstream = Some(now);
        if msg.is_data() {
            self.data_bytes.rcv += msg.payload.len() as u64;
            self.data_messages.rcv += 1;
            self.last_rcv_data_downstream = Some(now);
        }
        self.push_history(msg, direction, now);
    }

    fn push_history(&mut self, msg: &Message, direction: Direction, now: T) {
        self.history.push(HistoryEntry {
            at: now,
            flags: msg.flags,
            direction,
            total_len: msg.total_len(),
            payload_len: msg.payload.len(),
        });
    }
}
