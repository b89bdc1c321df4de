//! Framing and stream extraction of WFPad protocol messages.
//!
//! A message is a fixed header, an optional control extension (opcode and
//! args), a payload, and trailing zero padding. See
//! [`constants`](crate::constants) for the wire layout. The
//! [`MessageExtractor`] reassembles complete messages from a downstream byte
//! stream that may deliver them split arbitrarily across reads.

use byteorder::{BigEndian, ByteOrder};

use crate::constants::{
    CTRL_HDR_EXTRA, FLAG_CONTROL, FLAG_DATA, FLAG_PADDING, FLAGS_ALL, MIN_HDR_LEN, MTU,
};
use crate::Error;

/// One framed protocol message.
///
/// The padding bytes are not stored: only their count. They are all zero on
/// the wire and exist purely to reach a target total length.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Bit-set of FLAG_DATA, FLAG_PADDING, FLAG_CONTROL.
    pub flags: u8,
    /// Control opcode, present iff FLAG_CONTROL is set.
    pub opcode: Option<u8>,
    /// Control args, empty unless FLAG_CONTROL is set.
    pub args: Vec<u8>,
    /// Application payload. Control messages may piggyback a payload
    /// fragment that the receiver must still forward upstream.
    pub payload: Vec<u8>,
    /// Count of trailing zero-padding bytes.
    pub padding_len: u16,
    /// Elapsed time the payload waited before being sent, in ms.
    pub queue_time: u32,
}

impl Message {
    /// A data message with `padding_len` zero bytes appended to the payload.
    pub fn data(payload: Vec<u8>, padding_len: u16, queue_time: u32) -> Self {
        Message {
            flags: FLAG_DATA,
            opcode: None,
            args: Vec::new(),
            payload,
            padding_len,
            queue_time,
        }
    }

    /// A pure padding message carrying `len` zero bytes.
    pub fn padding(len: u16) -> Self {
        Message {
            flags: FLAG_PADDING,
            opcode: None,
            args: Vec::new(),
            payload: Vec::new(),
            padding_len: len,
            queue_time: 0,
        }
    }

    /// A control message with the given opcode and args.
    pub fn control(opcode: u8, args: Vec<u8>) -> Self {
        Message {
            flags: FLAG_CONTROL,
            opcode: Some(opcode),
            args,
            payload: Vec::new(),
            padding_len: 0,
            queue_time: 0,
        }
    }

    pub fn is_data(&self) -> bool {
        self.flags & FLAG_DATA != 0
    }

    pub fn is_padding(&self) -> bool {
        self.flags & FLAG_PADDING != 0
    }

    pub fn is_control(&self) -> bool {
        self.flags & FLAG_CONTROL != 0
    }

    fn header_len(&self) -> usize {
        if self.is_control() {
            MIN_HDR_LEN + CTRL_HDR_EXTRA + self.args.len()
        } else {
            MIN_HDR_LEN
        }
    }

    /// Wire length of the serialized message: header, control extension,
    /// payload, and padding.
    pub fn total_len(&self) -> usize {
        self.header_len() + self.payload.len() + self.padding_len as usize
    }

    /// Serialize the message to its wire format. Panics if the message
    /// exceeds the MTU, since the length fields would not fit on the wire.
    pub fn serialize(&self) -> Vec<u8> {
        let total = self.total_len();
        assert!(total <= MTU, "message exceeds MTU");

        let mut buf = Vec::with_capacity(total);
        buf.extend_from_slice(&(total as u16).to_be_bytes());
        buf.extend_from_slice(&(self.payload.len() as u16).to_be_bytes());
        buf.push(self.flags);
        buf.extend_from_slice(&self.queue_time.to_be_bytes());
        if self.is_control() {
            buf.push(self.opcode.unwrap_or(0));
            buf.extend_from_slice(&(self.args.len() as u16).to_be_bytes());
            buf.extend_from_slice(&self.args);
        }
        buf.extend_from_slice(&self.payload);
        buf.resize(total, 0);
        buf
    }
}

/// Reassembles complete [`Message`]s from a byte stream.
///
/// Call [`extract`](Self::extract) every time new bytes arrive; incomplete
/// trailing data is buffered internally. On a parse failure the poisoned
/// buffer is dropped (the stream cannot be resynced), but messages already
/// fully parsed in that call are retained and returned at the front of the
/// next call.
#[derive(Debug, Default)]
pub struct MessageExtractor {
    buf: Vec<u8>,
    recovered: Vec<Message>,
}

impl MessageExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consume newly arrived bytes and return all fully-parsed messages, in
    /// arrival order.
    pub fn extract(&mut self, data: &[u8]) -> Result<Vec<Message>, Error> {
        self.buf.extend_from_slice(data);

        let mut msgs = std::mem::take(&mut self.recovered);
        loop {
            match self.parse_one() {
                Ok(Some(msg)) => msgs.push(msg),
                Ok(None) => break,
                Err(e) => {
                    self.buf.clear();
                    self.recovered = msgs;
                    return Err(e);
                }
            }
        }
        Ok(msgs)
    }

    fn parse_one(&mut self) -> Result<Option<Message>, Error> {
        if self.buf.len() < MIN_HDR_LEN {
            return Ok(None);
        }

        let total_len = BigEndian::read_u16(&self.buf[0..2]) as usize;
        let payload_len = BigEndian::read_u16(&self.buf[2..4]) as usize;
        let flags = self.buf[4];
        let queue_time = BigEndian::read_u32(&self.buf[5..9]);

        if flags == 0 || flags & !FLAGS_ALL != 0 {
            return Err(Error::Parse(format!("unrecognized flags: {flags:#04x}")));
        }
        if total_len < MIN_HDR_LEN || total_len > MTU {
            return Err(Error::Parse(format!(
                "implausible total length: {total_len}"
            )));
        }
        let is_control = flags & FLAG_CONTROL != 0;
        if is_control && total_len < MIN_HDR_LEN + CTRL_HDR_EXTRA {
            return Err(Error::Parse(format!(
                "control message shorter than its header: {total_len}"
            )));
        }
        if self.buf.len() < total_len {
            return Ok(None);
        }

        let mut off = MIN_HDR_LEN;
        let (opcode, args) = if is_control {
            let opcode = self.buf[off];
            let args_len = BigEndian::read_u16(&self.buf[off + 1..off + 3]) as usize;
            off += CTRL_HDR_EXTRA;
            if off + args_len + payload_len > total_len {
                return Err(Error::Parse(format!(
                    "args ({args_len}) and payload ({payload_len}) exceed total length {total_len}"
                )));
            }
            let args = self.buf[off..off + args_len].to_vec();
            off += args_len;
            (Some(opcode), args)
        } else {
            if off + payload_len > total_len {
                return Err(Error::Parse(format!(
                    "payload length {payload_len} exceeds total length {total_len}"
                )));
            }
            (None, Vec::new())
        };

        let payload = self.buf[off..off + payload_len].to_vec();
        off += payload_len;
        let padding_len = (total_len - off) as u16;
        self.buf.drain(..total_len);

        Ok(Some(Message {
            flags,
            opcode,
            args,
            payload,
            padding_len,
            queue_time,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::MPU;

    #[test]
    fn roundtrip_data() {
        let m = Message::data(vec![1, 2, 3, 4], 10, 250);
        let mut ex = MessageExtractor::new();
        let out = ex.extract(&m.serialize()).unwrap();
        assert_eq!(out, vec![m]);
    }

    #[test]
    fn roundtrip_padding() {
        let m = Message::padding(MPU as u16);
        let mut ex = MessageExtractor::new();
        let out = ex.extract(&m.serialize()).unwrap();
        assert_eq!(out, vec![m]);
        assert_eq!(out[0].total_len(), MTU);
    }

    #[test]
    fn roundtrip_control_with_piggyback() {
        let mut m = Message::control(7, b"example.com".to_vec());
        m.payload = vec![9; 32];
        let mut ex = MessageExtractor::new();
        let out = ex.extract(&m.serialize()).unwrap();
        assert_eq!(out, vec![m]);
    }

    #[test]
    fn fragmentation_invariance() {
        let m1 = Message::data(vec![1; 100], 0, 0);
        let m2 = Message::padding(50);
        let mut wire = m1.serialize();
        wire.extend_from_slice(&m2.serialize());

        // feed at every possible split point, one byte at a time
        for split in 0..wire.len() {
            let mut ex = MessageExtractor::new();
            let mut out = ex.extract(&wire[..split]).unwrap();
            out.extend(ex.extract(&wire[split..]).unwrap());
            assert_eq!(out, vec![m1.clone(), m2.clone()], "split at {split}");
        }
    }

    #[test]
    #[should_panic(expected = "exceeds MTU")]
    fn oversized_message_cannot_serialize() {
        // a payload past the MTU would truncate the u16 length fields
        Message::data(vec![0; 70_000], 0, 0).serialize();
    }

    #[test]
    fn malformed_flags_rejected() {
        let m = Message::data(vec![1, 2, 3], 0, 0);
        let mut wire = m.serialize();
        wire[4] = 0; // no flags set
        let mut ex = MessageExtractor::new();
        assert!(ex.extract(&wire).is_err());
    }

    #[test]
    fn implausible_length_rejected() {
        let m = Message::padding(10);
        let mut wire = m.serialize();
        wire[0] = 0xff;
        wire[1] = 0xff; // total_len way past MTU
        let mut ex = MessageExtractor::new();
        assert!(ex.extract(&wire).is_err());
    }

    #[test]
    fn parsed_messages_survive_later_failure() {
        let good = Message::data(vec![5; 20], 0, 0);
        let mut wire = good.serialize();
        let mut bad = Message::padding(10).serialize();
        bad[4] = 0xf0; // unknown flag bits
        wire.extend_from_slice(&bad);

        let mut ex = MessageExtractor::new();
        // the call fails, but the message parsed before the failure is kept
        assert!(ex.extract(&wire).is_err());
        let out = ex.extract(&good.serialize()).unwrap();
        assert_eq!(out, vec![good.clone(), good]);
    }

    #[test]
    fn incomplete_header_buffers() {
        let m = Message::data(vec![1; 10], 0, 0);
        let wire = m.serialize();
        let mut ex = MessageExtractor::new();
        assert!(ex.extract(&wire[..3]).unwrap().is_empty());
        assert_eq!(ex.extract(&wire[3..]).unwrap(), vec![m]);
    }
}
