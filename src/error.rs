use std::fmt::{Display, Formatter};
use std::io::Error as IoError;

/// Errors surfaced by the chunk codec, the APDU codecs and the session.
///
/// A failed signature verification is not an error, it is a `false` returned
/// by the verifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    InvalidChunkSize(usize),
    EmptyPayload,
    PayloadTooLarge(usize),
    UnexpectedCommand { expected: u8, got: u8 },
    SequenceError { expected: u8, got: u8 },
    /// Declared total length minus delivered payload bytes; positive means
    /// fragments are still missing, negative means too many bytes arrived.
    LengthMismatch { remaining: i64 },
    InvalidParameterLength { field: &'static str, len: usize },
    MalformedResponse,
    InvalidState { operation: &'static str },
    Link(String),
}

impl From<IoError> for Error {
    fn from(_: IoError) -> Self {
        // Reads come from in-memory cursors, a failure is always a short read.
        Error::MalformedResponse
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::InvalidChunkSize(size) => write!(f, "invalid chunk size {size}, minimum is 8"),
            Error::EmptyPayload => write!(f, "empty payload"),
            Error::PayloadTooLarge(len) => write!(f, "payload of {len} bytes exceeds the 65535 byte limit"),
            Error::UnexpectedCommand { expected, got } => {
                write!(f, "unexpected command byte {got:#04x}, expected {expected:#04x}")
            }
            Error::SequenceError { expected, got } => {
                write!(f, "continuation sequence {got} received, expected {expected}")
            }
            Error::LengthMismatch { remaining } if *remaining > 0 => {
                write!(f, "incomplete payload, {remaining} byte(s) missing")
            }
            Error::LengthMismatch { remaining } => {
                write!(f, "payload overflow, {} byte(s) past the declared length", -remaining)
            }
            Error::InvalidParameterLength { field, len } => {
                write!(f, "invalid {field} length {len}")
            }
            Error::MalformedResponse => write!(f, "malformed response"),
            Error::InvalidState { operation } => write!(f, "{operation} is not valid in the current session state"),
            Error::Link(e) => write!(f, "link error: {e}"),
        }
    }
}

impl std::error::Error for Error {}
