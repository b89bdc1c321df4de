use std::fmt;

/// Specific error types for WFPad.
///
/// None of these are fatal to the transport: parse and protocol errors drop
/// the offending unit of work, configuration errors degrade to an empty
/// padding schedule.
#[derive(Debug, Clone)]
pub enum Error {
    /// Malformed message header or length field. The string describes why.
    Parse(String),

    /// A well-formed message that violates the protocol (unrecognized flag
    /// combination or opcode).
    Protocol(String),

    /// Missing or unloadable defense configuration, e.g. a burst-sequence
    /// file.
    Config(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Error::Parse(ref msg) => write!(f, "parse error: {msg}"),
            Error::Protocol(ref msg) => write!(f, "protocol error: {msg}"),
            Error::Config(ref msg) => write!(f, "configuration error: {msg}"),
        }
    }
}

impl std::error::Error for Error {}
