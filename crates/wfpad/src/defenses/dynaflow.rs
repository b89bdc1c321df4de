//! Dynaflow: constant-size messages at an adaptive constant rate.
//!
//! The send period is re-estimated at configured switch points from the
//! recent arrival history and snapped to a small set of candidate gaps. The
//! session ends at the first rung of a geometric stop-size ladder above the
//! observed message count, so the total volume leaks only the rung.

use log::debug;
use serde::{Deserialize, Serialize};

use crate::constants::{END_SIZE_FACTOR, MAX_END_SIZE, MPU};
use crate::dist::Dist;
use crate::message::Message;
use crate::scheduler::PaddingScheduler;
use crate::time::Instant;
use crate::transport::Role;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DynaflowConfig {
    /// Initial inter-send gap in ms.
    pub first_time_gap_ms: f64,
    /// Candidate gaps (ms) the re-estimated gap is snapped to, in the order
    /// they are scanned.
    pub poss_time_gaps_ms: Vec<f64>,
    /// Sent-message counts at which the gap is re-estimated.
    pub switch_sizes: Vec<u64>,
    /// Lookahead block size (messages) for the gap estimate.
    pub block_size: u64,
    /// Subsequence length coupling the client and server rates: the server
    /// sends `subseq_length - 1` messages per client message.
    pub subseq_length: u64,
    /// Number of most recent arrivals used for the inter-arrival estimate.
    pub memory: usize,
}

impl Default for DynaflowConfig {
    fn default() -> Self {
        DynaflowConfig {
            first_time_gap_ms: 12.0,
            poss_time_gaps_ms: vec![12.0, 5.0],
            switch_sizes: vec![400, 1200, 2000, 2800],
            block_size: 400,
            subseq_length: 4,
            memory: 100,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Dynaflow {
    config: DynaflowConfig,
    /// Stop-size ladder, strictly increasing, precomputed from the config.
    end_sizes: Vec<u64>,
    /// The rung selected at session end; padding stops when the message
    /// count reaches it.
    end_size: u64,
    time_gap: f64,
    /// Messages sent and data messages received downstream this session.
    sent: u64,
    recv: u64,
    /// Estimated upstream arrival times, ms since session start.
    past_times: Vec<f64>,
    /// Arrival times of not-yet-sent upstream data, for queue-time stamps.
    queue_times: Vec<f64>,
    /// Time of the most recent send, ms since session start.
    curr_time: f64,
}

impl Dynaflow {
    pub fn new(config: DynaflowConfig) -> Self {
        let end_sizes = stop_size_ladder(config.subseq_length);
        let end_size = end_sizes.last().copied().unwrap_or(MAX_END_SIZE);
        let time_gap = config.first_time_gap_ms;
        Dynaflow {
            config,
            end_sizes,
            end_size,
            time_gap,
            sent: 0,
            recv: 0,
            past_times: Vec::new(),
            queue_times: Vec::new(),
            curr_time: 0.0,
        }
    }

    pub fn on_session_start<T: Instant>(
        &mut self,
        role: Role,
        scheduler: &mut PaddingScheduler<T>,
        length_dist: &mut Dist,
    ) {
        self.sent = 0;
        self.recv = 0;
        self.past_times.clear();
        self.queue_times.clear();
        self.curr_time = 0.0;
        self.time_gap = self.config.first_time_gap_ms;
        self.end_size = self.end_sizes.last().copied().unwrap_or(MAX_END_SIZE);
        self.configure_period(role, scheduler);
        *length_dist = Dist::fixed(MPU as f64);
    }

    pub fn when_received_upstream(&mut self, now_ms: f64) {
        self.past_times.push(now_ms);
        self.queue_times.push(now_ms);
    }

    pub fn when_received_downstream(&mut self, msg: &Message, now_ms: f64) {
        self.recv += 1;
        // reconstruct the peer-side arrival time from the queue-time stamp
        self.past_times.push(now_ms + f64::from(msg.queue_time));
    }

    /// Count a data send, re-estimate the gap at switch points, and return
    /// the queue time of the oldest buffered payload in ms.
    pub fn on_data_send<T: Instant>(
        &mut self,
        role: Role,
        scheduler: &mut PaddingScheduler<T>,
        now_ms: f64,
    ) -> u32 {
        self.sent += 1;
        self.maybe_switch(role, scheduler);
        self.curr_time = now_ms;

        if self.queue_times.is_empty() {
            0
        } else {
            let queued_at = self.queue_times.remove(0);
            (self.curr_time - queued_at).abs() as u32
        }
    }

    /// Padding counts against the switch points exactly like data.
    pub fn on_padding_send<T: Instant>(
        &mut self,
        role: Role,
        scheduler: &mut PaddingScheduler<T>,
    ) -> bool {
        self.sent += 1;
        self.maybe_switch(role, scheduler);
        true
    }

    pub fn on_session_end(&mut self) {
        let count = self.sent + self.recv;
        self.end_size = self
            .end_sizes
            .iter()
            .copied()
            .find(|&size| count < size)
            .unwrap_or(MAX_END_SIZE);
        debug!(
            "session ended with {count} messages, padding to stop size {}",
            self.end_size
        );
    }

    pub fn stop_condition(&self) -> bool {
        self.end_size <= self.sent + self.recv
    }

    fn maybe_switch<T: Instant>(&mut self, role: Role, scheduler: &mut PaddingScheduler<T>) {
        let subseq = self.config.subseq_length;
        let hit = match role {
            Role::Client => self.config.switch_sizes.contains(&(self.sent * subseq)),
            Role::Server => {
                subseq > 1
                    && self
                        .config
                        .switch_sizes
                        .contains(&((self.sent / (subseq - 1)) * subseq))
            }
        };
        if hit {
            self.find_new_time_gap();
            self.configure_period(role, scheduler);
        }
    }

    /// Snap the expected gap to the candidate list: scan in order and stop
    /// at the first candidate whose distance to the expected gap grows, i.e.
    /// the first local minimum, not the global one.
    fn find_new_time_gap(&mut self) {
        let Some(&last) = self.past_times.last() else {
            return;
        };
        let n = self.past_times.len();
        let memory = self.config.memory;

        let mut avg = if n >= memory && memory > 1 {
            (last - self.past_times[n - memory]) / (memory - 1) as f64
        } else if n > 10 {
            (last - self.past_times[0]) / (n - 1) as f64
        } else {
            self.time_gap
        };
        if !avg.is_finite() || avg <= 0.0 {
            avg = self.time_gap;
        }

        let expected_count = self.config.block_size as f64 + (self.curr_time - last) / avg;
        let expected_gap = self.config.block_size as f64 / expected_count * avg;

        let mut min_diff = f64::MAX;
        for (i, &candidate) in self.config.poss_time_gaps_ms.iter().enumerate() {
            let diff = (expected_gap - candidate).abs();
            if diff < min_diff {
                min_diff = diff;
            } else {
                self.time_gap = self.config.poss_time_gaps_ms[i - 1];
                debug!("switched time gap to {} ms", self.time_gap);
                return;
            }
        }
        if let Some(&lastgap) = self.config.poss_time_gaps_ms.last() {
            self.time_gap = lastgap;
            debug!("switched time gap to {} ms", self.time_gap);
        }
    }

    fn configure_period<T: Instant>(&self, role: Role, scheduler: &mut PaddingScheduler<T>) {
        let subseq = self.config.subseq_length as f64;
        let period = match role {
            Role::Client => self.time_gap * subseq,
            Role::Server if subseq > 1.0 => self.time_gap * subseq / (subseq - 1.0),
            Role::Server => self.time_gap,
        };
        scheduler.set_constant_rate(period);
    }
}

/// The rungs `round(1.2^i * subseq_length)` for i = 0, 1, ..., up to the
/// ladder cap, deduplicated so the ladder is strictly increasing.
fn stop_size_ladder(subseq_length: u64) -> Vec<u64> {
    let mut sizes = Vec::new();
    let mut i = 0;
    loop {
        let rung = END_SIZE_FACTOR.powi(i) * subseq_length as f64;
        if rung > MAX_END_SIZE as f64 {
            break;
        }
        sizes.push(rung.round() as u64);
        i += 1;
    }
    sizes.dedup();
    sizes
}
