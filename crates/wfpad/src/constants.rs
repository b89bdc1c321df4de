//! Global constants for the WFPad wire protocol.

/// The maximum transmission unit on the wire: no serialized
/// [`Message`](crate::Message) may exceed this many bytes.
pub const MTU: usize = 1448;

/// The length of the fixed message header in bytes: total length (u16),
/// payload length (u16), flags (u8), and queue time in ms (u32).
pub const MIN_HDR_LEN: usize = 9;

/// Extra header bytes carried by control messages: opcode (u8) and args
/// length (u16).
pub const CTRL_HDR_EXTRA: usize = 3;

/// The maximum payload unit: the largest payload the transport places in a
/// single message.
pub const MPU: usize = MTU - MIN_HDR_LEN;

/// Message flag: the message carries application data.
pub const FLAG_DATA: u8 = 1;
/// Message flag: the message is cover traffic and carries no data.
pub const FLAG_PADDING: u8 = 1 << 1;
/// Message flag: the message carries a control opcode and args.
pub const FLAG_CONTROL: u8 = 1 << 2;

/// All flag bits recognized by this version of the protocol.
pub const FLAGS_ALL: u8 = FLAG_DATA | FLAG_PADDING | FLAG_CONTROL;

/// Control opcode relaying a webpage identifier from client to server, so
/// both ends derive the same Walkie-Talkie pad schedule.
pub const OP_WT_PAGE_ID: u8 = 1;

/// Dynaflow stops growing its stop-size ladder once an entry would exceed
/// this packet count.
pub const MAX_END_SIZE: u64 = 10_000_000;

/// Growth factor of the Dynaflow stop-size ladder.
pub const END_SIZE_FACTOR: f64 = 1.2;
