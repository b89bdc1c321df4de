//! Timing engine for deferred data flushes and padding bursts.
//!
//! The scheduler owns at most one pending deadline per purpose; arming a
//! purpose always replaces its previous deadline. Deadlines are tagged with
//! a scheduler epoch and [`cancel_all`](PaddingScheduler::cancel_all) bumps
//! the epoch, so a deadline observed by the host before a session reset can
//! never fire into the reset session.

use rand_core::RngCore;

use crate::dist::Dist;
use crate::time::{Duration, Instant};

/// The purpose of a pending deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    /// Flush buffered application data, or send padding if the buffer is
    /// empty.
    DataFlush,
    /// Send a padding burst some interval after receiving a data message.
    BurstPadding,
}

#[derive(Debug, Clone, Copy)]
struct Pending<T: Instant> {
    fire_at: T,
    epoch: u64,
}

/// Arms and cancels the deferred send actions of one transport instance.
#[derive(Debug, Clone)]
pub struct PaddingScheduler<T: Instant> {
    epoch: u64,
    data_flush: Option<Pending<T>>,
    burst_padding: Option<Pending<T>>,
    /// Fixed inter-send period in ms, set by the constant-rate defenses.
    flush_period_ms: Option<f64>,
    /// Flush delay distribution (ms), used when no constant rate is set.
    data_delay: Dist,
    /// Burst padding delay distribution (ms). None disables burst padding.
    burst_delay: Option<Dist>,
}

impl<T: Instant> Default for PaddingScheduler<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Instant> PaddingScheduler<T> {
    pub fn new() -> Self {
        PaddingScheduler {
            epoch: 0,
            data_flush: None,
            burst_padding: None,
            flush_period_ms: None,
            data_delay: Dist::fixed(0.0),
            burst_delay: None,
        }
    }

    /// Reconfigure the data-flush cadence to a fixed inter-send period in
    /// ms. Takes effect when the next flush re-arms; an in-flight deadline
    /// is left alone.
    pub fn set_constant_rate(&mut self, period_ms: f64) {
        self.flush_period_ms = Some(period_ms);
    }

    pub fn constant_rate(&self) -> Option<f64> {
        self.flush_period_ms
    }

    /// Configure the delay distribution used for data flushes when no
    /// constant rate is set.
    pub fn set_data_delay(&mut self, dist: Dist) {
        self.data_delay = dist;
    }

    /// Configure burst padding. None disables it.
    pub fn set_burst_delay(&mut self, dist: Option<Dist>) {
        self.burst_delay = dist;
    }

    /// Schedule exactly one future data flush after `delay`, replacing any
    /// previously armed flush.
    pub fn arm_data_flush(&mut self, now: T, delay: T::Duration) {
        self.data_flush = self.pending(now, delay);
    }

    /// Schedule a data flush at the configured cadence: the constant-rate
    /// period if set, a sample from the flush delay distribution otherwise.
    pub fn rearm_data_flush<R: RngCore>(&mut self, now: T, rng: &mut R) {
        let ms = match self.flush_period_ms {
            Some(period) => period,
            None => self.data_delay.sample(rng),
        };
        self.arm_data_flush(now, ms_duration(ms));
    }

    /// Schedule a padding burst after an interval drawn from the configured
    /// burst delay distribution, replacing any previously armed burst. A
    /// no-op if burst padding is not configured.
    pub fn arm_burst_padding<R: RngCore>(&mut self, now: T, rng: &mut R) {
        if let Some(dist) = self.burst_delay {
            let delay = ms_duration(dist.sample(rng));
            self.burst_padding = self.pending(now, delay);
        }
    }

    pub fn is_armed(&self, kind: TimerKind) -> bool {
        match kind {
            TimerKind::DataFlush => self.data_flush.is_some(),
            TimerKind::BurstPadding => self.burst_padding.is_some(),
        }
    }

    /// Cancel every pending deadline and invalidate any deadline the host
    /// may still be sleeping on.
    pub fn cancel_all(&mut self) {
        self.epoch += 1;
        self.data_flush = None;
        self.burst_padding = None;
    }

    /// The earliest pending deadline, for the host to sleep until.
    pub fn next_deadline(&self) -> Option<T> {
        match (self.data_flush, self.burst_padding) {
            (Some(a), Some(b)) => Some(if a.fire_at <= b.fire_at {
                a.fire_at
            } else {
                b.fire_at
            }),
            (Some(a), None) => Some(a.fire_at),
            (None, Some(b)) => Some(b.fire_at),
            (None, None) => None,
        }
    }

    /// Take the earliest deadline that is due at `now`, if any. Deadlines
    /// armed under an earlier epoch are discarded unfired.
    pub fn pop_expired(&mut self, now: T) -> Option<TimerKind> {
        let due_flush = self.due(self.data_flush, now);
        let due_burst = self.due(self.burst_padding, now);

        match (due_flush, due_burst) {
            (Some(a), Some(b)) => {
                if a <= b {
                    self.data_flush = None;
                    Some(TimerKind::DataFlush)
                } else {
                    self.burst_padding = None;
                    Some(TimerKind::BurstPadding)
                }
            }
            (Some(_), None) => {
                self.data_flush = None;
                Some(TimerKind::DataFlush)
            }
            (None, Some(_)) => {
                self.burst_padding = None;
                Some(TimerKind::BurstPadding)
            }
            (None, None) => None,
        }
    }

    fn pending(&self, now: T, delay: T::Duration) -> Option<Pending<T>> {
        now.checked_add(delay).map(|fire_at| Pending {
            fire_at,
            epoch: self.epoch,
        })
    }

    fn due(&self, p: Option<Pending<T>>, now: T) -> Option<T> {
        match p {
            Some(p) if p.epoch == self.epoch && p.fire_at <= now => Some(p.fire_at),
            _ => None,
        }
    }
}

fn ms_duration<D: Duration>(ms: f64) -> D {
    D::from_micros((ms.max(0.0) * 1000.0).round() as u64)
}
