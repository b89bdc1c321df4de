//! The WFPad transport engine.
//!
//! [`WfPadTransport`] sits between an application circuit and the wire. It
//! frames upstream application bytes into fixed-layout messages, injects
//! padding and timing per the configured [`Defense`], and unframes the
//! downstream byte stream back into application data. The engine performs no
//! I/O and reads no clock: the host passes `now` into every entry point,
//! sleeps until [`next_deadline`](WfPadTransport::next_deadline), and then
//! calls [`on_timer`](WfPadTransport::on_timer).

use std::collections::VecDeque;

use log::{debug, error, info, warn};
use rand_core::RngCore;

use crate::constants::{MPU, OP_WT_PAGE_ID};
use crate::defenses::Defense;
use crate::dist::Dist;
use crate::message::{Message, MessageExtractor};
use crate::scheduler::{PaddingScheduler, TimerKind};
use crate::session::{Direction, Session};
use crate::time::{Duration, Instant};
use crate::Error;

/// The sink for bytes leaving the transport. Upstream is the local
/// application side of the circuit, downstream is the wire to the peer.
pub trait Circuit {
    fn write_upstream(&mut self, data: &[u8]);
    fn write_downstream(&mut self, data: &[u8]);
}

/// Which end of the circuit this transport instance is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Client,
    Server,
}

impl Role {
    pub fn is_client(self) -> bool {
        matches!(self, Role::Client)
    }
}

/// The padding state machine. Data always flows; the state only governs
/// whether cover traffic is being generated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    /// No padding. Data passes through framed but unshaped.
    Idle,
    /// A session is in progress and the defense shapes the traffic.
    SessionActive,
    /// The session ended but the defense is still emitting tail padding.
    Ending,
}

/// A WFPad transport endpoint for one circuit.
pub struct WfPadTransport<C, R, T = std::time::Instant>
where
    C: Circuit,
    R: RngCore,
    T: Instant,
{
    role: Role,
    state: TransportState,
    defense: Defense,
    session: Session<T>,
    scheduler: PaddingScheduler<T>,
    extractor: MessageExtractor,
    /// Upstream bytes waiting to be framed and sent downstream.
    buffer: VecDeque<u8>,
    /// Payload length distribution, reconfigured by the defense.
    length_dist: Dist,
    circuit: C,
    rng: R,
}

impl<C, R, T> WfPadTransport<C, R, T>
where
    C: Circuit,
    R: RngCore,
    T: Instant,
{
    pub fn new(role: Role, defense: Defense, circuit: C, rng: R, now: T) -> Self {
        WfPadTransport {
            role,
            state: TransportState::Idle,
            defense,
            session: Session::new(now),
            scheduler: PaddingScheduler::new(),
            extractor: MessageExtractor::new(),
            buffer: VecDeque::new(),
            length_dist: Dist::fixed(MPU as f64),
            circuit,
            rng,
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn state(&self) -> TransportState {
        self.state
    }

    pub fn session(&self) -> &Session<T> {
        &self.session
    }

    pub fn circuit(&self) -> &C {
        &self.circuit
    }

    pub fn circuit_mut(&mut self) -> &mut C {
        &mut self.circuit
    }

    /// The instant the host should next call [`on_timer`](Self::on_timer)
    /// at, if any send action is pending.
    pub fn next_deadline(&self) -> Option<T> {
        self.scheduler.next_deadline()
    }

    /// Signal from the circuit layer that a browsing session begins. Resets
    /// all session state; counters and timers from the previous session
    /// cannot leak into this one.
    pub fn on_session_starts(&mut self, now: T) {
        info!("session starts");
        self.session = Session::new(now);
        self.session.set_visiting(true);
        self.scheduler.cancel_all();
        self.defense
            .on_session_start(self.role, &mut self.scheduler, &mut self.length_dist);
        self.state = TransportState::SessionActive;
        self.scheduler.rearm_data_flush(now, &mut self.rng);
    }

    /// Signal from the circuit layer that the browsing session is over. The
    /// defense may keep emitting tail padding until its stop condition
    /// holds.
    pub fn on_session_ends(&mut self, now: T) {
        info!("session ends");
        self.state = TransportState::Ending;
        self.session.set_visiting(false);
        self.defense.on_session_end();
        if self.stop_condition(now) {
            self.finish_padding();
        } else if !self.scheduler.is_armed(TimerKind::DataFlush) {
            self.scheduler.rearm_data_flush(now, &mut self.rng);
        }
    }

    /// Out-of-band notification of the webpage about to be visited, on the
    /// client. Walkie-Talkie derives its pad schedule from it and relays it
    /// to the server end.
    pub fn on_page_id(&mut self, id: &str, now: T) {
        let id = match id.split_once("://") {
            Some((_, rest)) => rest,
            None => id,
        };
        info!("visiting page {id}");
        self.defense.on_page_id(id);
        if self.role.is_client() && self.defense.relays_page_id() {
            self.send_control(OP_WT_PAGE_ID, id.as_bytes().to_vec(), now);
        }
    }

    /// Session-end notification from the out-of-band listener, equivalent
    /// to the circuit-layer end signal.
    pub fn on_session_end_notification(&mut self, now: T) {
        self.on_session_ends(now);
    }

    /// Whether the defense considers padding finished right now.
    pub fn stop_condition(&self, now: T) -> bool {
        self.defense.stop_condition(&self.session, now)
    }

    /// Page-load start/completion signal from the circuit layer.
    pub fn set_visiting(&mut self, visiting: bool) {
        self.session.set_visiting(visiting);
    }

    /// Configure burst padding: after every received data message, one
    /// padding message is scheduled at a delay drawn from `dist`, so
    /// padding follows data without a fixed-period pattern. None disables
    /// it. Survives session resets until reconfigured.
    pub fn set_burst_delay(&mut self, dist: Option<Dist>) {
        self.scheduler.set_burst_delay(dist);
    }

    /// Application bytes from upstream. They are buffered and leave at the
    /// cadence the defense dictates; if no flush is pending they leave
    /// immediately.
    pub fn recv_upstream(&mut self, data: &[u8], now: T) {
        if data.is_empty() {
            return;
        }
        debug!("buffering {} upstream bytes", data.len());
        self.buffer.extend(data);
        if self.state == TransportState::SessionActive {
            self.session.set_visiting(true);
        }

        let now_ms = self.session.elapsed(now).as_millis_f64();
        self.defense.when_received_upstream(now_ms);

        if !self.scheduler.is_armed(TimerKind::DataFlush) {
            self.flush_buffer(now);
        }
    }

    /// Bytes from the wire. Complete messages are unframed and dispatched;
    /// an unparseable stream is dropped with a warning, messages parsed
    /// before the failure are still processed.
    pub fn recv_downstream(&mut self, data: &[u8], now: T) {
        if data.is_empty() {
            return;
        }
        let msgs = match self.extractor.extract(data) {
            Ok(msgs) => msgs,
            Err(e) => {
                warn!("dropping unparseable downstream bytes: {e}");
                return;
            }
        };
        let direction = if self.role.is_client() {
            Direction::In
        } else {
            Direction::Out
        };
        for msg in msgs {
            self.process_message(&msg, direction, now);
        }
    }

    /// Drive every deadline that is due. Call at or after
    /// [`next_deadline`](Self::next_deadline).
    pub fn on_timer(&mut self, now: T) {
        while let Some(kind) = self.scheduler.pop_expired(now) {
            match kind {
                TimerKind::DataFlush => self.flush_buffer(now),
                TimerKind::BurstPadding => {
                    self.send_ignore(None, now);
                    self.check_stop(now);
                }
            }
        }
    }

    fn process_message(&mut self, msg: &Message, direction: Direction, now: T) {
        let now_ms = self.session.elapsed(now).as_millis_f64();
        self.session.record_inbound(msg, direction, now);

        if msg.is_control() {
            // control messages may piggyback a payload fragment
            if !msg.payload.is_empty() {
                self.circuit.write_upstream(&msg.payload);
            }
            if let Err(e) = self.dispatch_control(msg) {
                warn!("dropping control message: {e}");
            }
        } else if msg.is_padding() {
            debug!("discarding padding message of {} bytes", msg.total_len());
        } else if msg.is_data() {
            self.circuit.write_upstream(&msg.payload);
            self.defense.when_received_downstream(msg, now_ms);
            self.scheduler.arm_burst_padding(now, &mut self.rng);
        } else {
            error!("message with unhandled flags {:#04x} dropped", msg.flags);
        }
    }

    fn dispatch_control(&mut self, msg: &Message) -> Result<(), Error> {
        let opcode = msg.opcode.unwrap_or(0);
        match opcode {
            OP_WT_PAGE_ID => {
                let id = String::from_utf8_lossy(&msg.args).into_owned();
                debug!("peer announced page {id}");
                self.defense.on_page_id(&id);
                Ok(())
            }
            _ => Err(Error::Protocol(format!("unknown control opcode {opcode}"))),
        }
    }

    /// Send at most one message: buffered data padded to the sampled length,
    /// or padding when the buffer is empty. Re-arms the flush timer unless
    /// padding is done.
    fn flush_buffer(&mut self, now: T) {
        if self.buffer.is_empty() {
            if self.state == TransportState::Idle {
                return;
            }
            if let Some(budget) = self.defense.burst_padding_on_empty(self.role) {
                debug!("buffer empty, closing burst with {budget} padding messages");
                for _ in 0..budget {
                    self.send_ignore(None, now);
                }
                self.check_stop(now);
                return;
            }
            self.send_ignore(None, now);
            self.scheduler.rearm_data_flush(now, &mut self.rng);
            self.check_stop(now);
            return;
        }

        let sampled = self.length_dist.sample(&mut self.rng).round() as usize;
        let payload_len = sampled.clamp(1, MPU);
        let data_len = self.buffer.len();

        if data_len >= payload_len {
            let payload: Vec<u8> = self.buffer.drain(..payload_len).collect();
            self.send_data(payload, 0, now);
        } else {
            let padding_len = (payload_len - data_len) as u16;
            let payload: Vec<u8> = self.buffer.drain(..).collect();
            self.send_data(payload, padding_len, now);
        }

        if self.state != TransportState::Idle {
            self.scheduler.rearm_data_flush(now, &mut self.rng);
            self.check_stop(now);
        }
    }

    fn send_data(&mut self, payload: Vec<u8>, padding_len: u16, now: T) {
        let now_ms = self.session.elapsed(now).as_millis_f64();
        let queue_time = self
            .defense
            .on_data_send(self.role, &mut self.scheduler, now_ms);
        let msg = Message::data(payload, padding_len, queue_time);
        debug!(
            "sending data message: {} payload bytes, {} padding bytes",
            msg.payload.len(),
            msg.padding_len
        );
        self.circuit.write_downstream(&msg.serialize());
        self.session.record_outbound(&msg, self.out_direction(), now);
    }

    /// Send one padding message, if the defense allows one right now. A
    /// refused send is dropped silently.
    fn send_ignore(&mut self, length: Option<u16>, now: T) {
        if !self.defense.allow_padding(self.role, &mut self.scheduler) {
            return;
        }
        let len = match length {
            Some(len) => len,
            None => {
                let sampled = self.length_dist.sample(&mut self.rng).round() as usize;
                sampled.clamp(1, MPU) as u16
            }
        };
        let msg = Message::padding(len);
        self.circuit.write_downstream(&msg.serialize());
        self.session.record_outbound(&msg, self.out_direction(), now);
    }

    fn send_control(&mut self, opcode: u8, args: Vec<u8>, now: T) {
        let msg = Message::control(opcode, args);
        self.circuit.write_downstream(&msg.serialize());
        self.session.record_outbound(&msg, self.out_direction(), now);
    }

    fn check_stop(&mut self, now: T) {
        if self.state != TransportState::Idle && self.stop_condition(now) {
            self.finish_padding();
        }
    }

    fn finish_padding(&mut self) {
        info!("padding stopped");
        self.scheduler.cancel_all();
        self.state = TransportState::Idle;
    }

    fn out_direction(&self) -> Direction {
        if self.role.is_client() {
            Direction::Out
        } else {
            Direction::In
        }
    }
}
