//! Defense strategies deciding when and how much cover traffic to inject.
//!
//! All strategies share one shape: configure the scheduler cadence at
//! session start, react to traffic events, and define a stop condition for
//! padding. They are tagged variants of a single [`Defense`] type; the
//! client/server distinction is the transport's [`Role`](crate::Role) field,
//! not a subtype.

mod buflo;
mod dynaflow;
mod walkietalkie;

pub use buflo::{Buflo, BufloConfig};
pub use dynaflow::{Dynaflow, DynaflowConfig};
pub use walkietalkie::{WalkieTalkie, WalkieTalkieConfig};

use crate::dist::Dist;
use crate::message::Message;
use crate::scheduler::PaddingScheduler;
use crate::session::Session;
use crate::time::Instant;
use crate::transport::Role;

/// A padding defense plugged into the WFPad transport.
#[derive(Debug, Clone)]
pub enum Defense {
    /// Constant rate, constant size, minimum visit duration.
    Buflo(Buflo),
    /// Adaptive constant-size padding with re-estimated send cadence and a
    /// geometric stop-size ladder.
    Dynaflow(Dynaflow),
    /// Half-duplex burst-aligned mold padding from a per-webpage schedule.
    WalkieTalkie(WalkieTalkie),
}

impl Defense {
    pub fn buflo(config: BufloConfig) -> Self {
        Defense::Buflo(Buflo::new(config))
    }

    pub fn dynaflow(config: DynaflowConfig) -> Self {
        Defense::Dynaflow(Dynaflow::new(config))
    }

    pub fn walkie_talkie(config: WalkieTalkieConfig) -> Self {
        Defense::WalkieTalkie(WalkieTalkie::new(config))
    }

    /// Configure scheduler cadence and payload length for a new session and
    /// reset per-session defense state.
    pub fn on_session_start<T: Instant>(
        &mut self,
        role: Role,
        scheduler: &mut PaddingScheduler<T>,
        length_dist: &mut Dist,
    ) {
        match self {
            Defense::Buflo(d) => d.on_session_start(scheduler, length_dist),
            Defense::Dynaflow(d) => d.on_session_start(role, scheduler, length_dist),
            Defense::WalkieTalkie(d) => d.on_session_start(role, length_dist),
        }
    }

    /// Application bytes arrived from upstream. `now_ms` is ms since session
    /// start.
    pub fn when_received_upstream(&mut self, now_ms: f64) {
        match self {
            Defense::Buflo(_) => {}
            Defense::Dynaflow(d) => d.when_received_upstream(now_ms),
            Defense::WalkieTalkie(d) => d.when_received_upstream(),
        }
    }

    /// A data message arrived from downstream.
    pub fn when_received_downstream(&mut self, msg: &Message, now_ms: f64) {
        match self {
            Defense::Buflo(_) => {}
            Defense::Dynaflow(d) => d.when_received_downstream(msg, now_ms),
            Defense::WalkieTalkie(d) => d.when_received_downstream(),
        }
    }

    /// A data message is about to be sent downstream. Returns the queue time
    /// to stamp on the message, in ms.
    pub fn on_data_send<T: Instant>(
        &mut self,
        role: Role,
        scheduler: &mut PaddingScheduler<T>,
        now_ms: f64,
    ) -> u32 {
        match self {
            Defense::Buflo(_) | Defense::WalkieTalkie(_) => 0,
            Defense::Dynaflow(d) => d.on_data_send(role, scheduler, now_ms),
        }
    }

    /// Whether a padding message may be sent right now. Stateful: a granted
    /// send is counted against any per-burst budget.
    pub fn allow_padding<T: Instant>(
        &mut self,
        role: Role,
        scheduler: &mut PaddingScheduler<T>,
    ) -> bool {
        match self {
            Defense::Buflo(_) => true,
            Defense::Dynaflow(d) => d.on_padding_send(role, scheduler),
            Defense::WalkieTalkie(d) => d.allow_padding(role),
        }
    }

    /// Override for flushing an empty buffer: if set, the transport sends
    /// this many padding messages immediately instead of one padding message
    /// at the normal cadence.
    pub fn burst_padding_on_empty(&self, role: Role) -> Option<u64> {
        match self {
            Defense::WalkieTalkie(d) => d.burst_padding_on_empty(role),
            _ => None,
        }
    }

    /// An out-of-band webpage identifier arrived (scheme already stripped).
    pub fn on_page_id(&mut self, id: &str) {
        if let Defense::WalkieTalkie(d) = self {
            d.set_pad_sequence(id);
        }
    }

    /// Whether a received identifier should be relayed to the peer over a
    /// control message (client side only).
    pub fn relays_page_id(&self) -> bool {
        matches!(self, Defense::WalkieTalkie(_))
    }

    /// The session-end signal arrived; derive any tail-padding target.
    pub fn on_session_end(&mut self) {
        if let Defense::Dynaflow(d) = self {
            d.on_session_end();
        }
    }

    /// Whether padding should stop. The base condition is "no active visit";
    /// BuFLO and Dynaflow override it.
    pub fn stop_condition<T: Instant>(&self, session: &Session<T>, now: T) -> bool {
        match self {
            Defense::Buflo(d) => d.stop_condition(session, now),
            Defense::Dynaflow(d) => d.stop_condition(),
            Defense::WalkieTalkie(_) => !session.is_visiting(),
        }
    }
}
