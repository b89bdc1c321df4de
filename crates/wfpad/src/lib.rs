//! WFPad-family traffic obfuscation transports against website
//! fingerprinting.
//!
//! A [`WfPadTransport`] wraps one circuit of a circumvention proxy. It
//! frames application bytes into fixed-layout [`Message`]s, injects padding
//! messages, and shapes send timing according to a pluggable [`Defense`]:
//! BuFLO (constant rate, constant size), Dynaflow (adaptive constant rate
//! with a stop-size ladder), or Walkie-Talkie (half-duplex mold padding).
//!
//! The engine does no I/O and never reads a clock. Hosts pass the current
//! time into every entry point, write wire bytes through the [`Circuit`]
//! trait, and drive pending sends by sleeping until
//! [`next_deadline`](WfPadTransport::next_deadline) and calling
//! [`on_timer`](WfPadTransport::on_timer):
//!
//! ```
//! use std::time::Instant;
//!
//! use wfpad::defenses::{BufloConfig, Defense};
//! use wfpad::{Circuit, Role, WfPadTransport};
//!
//! #[derive(Default)]
//! struct Wire {
//!     upstream: Vec<u8>,
//!     downstream: Vec<u8>,
//! }
//!
//! impl Circuit for Wire {
//!     fn write_upstream(&mut self, data: &[u8]) {
//!         self.upstream.extend_from_slice(data);
//!     }
//!     fn write_downstream(&mut self, data: &[u8]) {
//!         self.downstream.extend_from_slice(data);
//!     }
//! }
//!
//! let t0 = Instant::now();
//! let mut client = WfPadTransport::new(
//!     Role::Client,
//!     Defense::buflo(BufloConfig::default()),
//!     Wire::default(),
//!     rand::thread_rng(),
//!     t0,
//! );
//!
//! client.on_session_starts(t0);
//! client.recv_upstream(b"GET / HTTP/1.1\r\n\r\n", t0);
//!
//! // drive the engine at its own pace: one fixed-size message per period,
//! // padding once the buffered request has left
//! let mut now = t0;
//! while let Some(deadline) = client.next_deadline() {
//!     now = deadline;
//!     client.on_timer(now);
//!     if client.session().num_messages.sent >= 5 {
//!         break;
//!     }
//! }
//! client.on_session_ends(now);
//!
//! assert_eq!(client.circuit().downstream.len(), 5 * wfpad::constants::MTU);
//! ```
//!
//! Both ends of a circuit run the same engine; the [`Role`] passed at
//! construction selects the client or server side of the defense.

pub mod constants;
pub mod defenses;
pub mod dist;
mod error;
pub mod message;
pub mod scheduler;
pub mod session;
pub mod time;
mod transport;

pub use crate::defenses::Defense;
pub use crate::dist::{Dist, DistType};
pub use crate::error::Error;
pub use crate::message::{Message, MessageExtractor};
pub use crate::scheduler::{PaddingScheduler, TimerKind};
pub use crate::session::{Counters, Direction, HistoryEntry, Session};
pub use crate::transport::{Circuit, Role, TransportState, WfPadTransport};
