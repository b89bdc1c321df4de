//! BuFLO: buffered fixed-length obfuscation.
//!
//! Every message leaves at a fixed period with a fixed payload length, data
//! or not, until the visit is over and a minimum session duration has
//! passed.

use serde::{Deserialize, Serialize};

use crate::constants::MPU;
use crate::dist::Dist;
use crate::scheduler::PaddingScheduler;
use crate::session::Session;
use crate::time::{Duration, Instant};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BufloConfig {
    /// Fixed inter-send period in ms.
    pub period_ms: f64,
    /// Fixed payload length in bytes.
    pub psize: usize,
    /// Minimum session duration in ms before padding may stop. Negative
    /// disables the floor.
    pub mintime_ms: f64,
}

impl Default for BufloConfig {
    fn default() -> Self {
        BufloConfig {
            period_ms: 12.0,
            psize: MPU,
            mintime_ms: -1.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Buflo {
    config: BufloConfig,
}

impl Buflo {
    pub fn new(config: BufloConfig) -> Self {
        Buflo { config }
    }

    pub fn on_session_start<T: Instant>(
        &mut self,
        scheduler: &mut PaddingScheduler<T>,
        length_dist: &mut Dist,
    ) {
        scheduler.set_constant_rate(self.config.period_ms);
        *length_dist = Dist::fixed(self.config.psize as f64);
    }

    /// Padding stops once the visit is over and the minimum session duration
    /// has elapsed.
    pub fn stop_condition<T: Instant>(&self, session: &Session<T>, now: T) -> bool {
        session.elapsed(now).as_millis_f64() > self.config.mintime_ms && !session.is_visiting()
    }
}

#[cfg(test)]
mod tests {
    use super::{Buflo, BufloConfig};
    use crate::session::Session;
    use std::time::{Duration, Instant};

    #[test]
    fn stop_waits_for_mintime() {
        let d = Buflo::new(BufloConfig {
            mintime_ms: 100.0,
            ..Default::default()
        });
        let t0 = Instant::now();
        let s: Session<Instant> = Session::new(t0);

        // not visiting, but mintime not yet reached
        assert!(!d.stop_condition(&s, t0 + Duration::from_millis(50)));
        assert!(d.stop_condition(&s, t0 + Duration::from_millis(150)));
    }

    #[test]
    fn stop_waits_for_visit_end() {
        let d = Buflo::new(BufloConfig::default());
        let t0 = Instant::now();
        let mut s: Session<Instant> = Session::new(t0);
        s.set_visiting(true);

        assert!(!d.stop_condition(&s, t0 + Duration::from_millis(10)));
        s.set_visiting(false);
        assert!(d.stop_condition(&s, t0 + Duration::from_millis(10)));
    }
}
