use err_derive::Error;

use crate::wire::Message;

/// Errors surfaced while decoding a single byte stream frame. A
/// superset of the parser's own failure states, so `Engine::process`
/// can return it directly.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ParseError {
    #[error(display = "expected frame start byte 0xAA")]
    FrameBeg,

    #[error(display = "unrecognized command byte")]
    Cmd,

    #[error(display = "checksum mismatch")]
    Crc,

    #[error(display = "expected frame end byte 0xAB")]
    FrameEnd,

    #[error(display = "unknown or unsupported message type")]
    InvalidMsgType,

    #[error(display = "payload rejected by its own decoder")]
    InvalidData,
}

/// The full driver error taxonomy.
#[derive(Debug, Error)]
#[error(no_from)]
pub enum Error {
    #[error(display = "a required argument was missing or invalid")]
    InvalidParam,

    #[error(display = "parser error: {}", _0)]
    Parse(#[error(source)] ParseError),

    #[error(display = "builder was asked to produce a packet for an unknown source")]
    InvalidSrc,

    #[error(display = "reply did not validate against the pending request")]
    InvalidReply,

    #[error(display = "destination buffer too small for the packet")]
    Mem,

    #[error(display = "transport rejected bytes past the configured timeout")]
    SendData,

    #[error(display = "request queue is full")]
    Busy,

    #[error(display = "msg_timeout elapsed while a request was in flight")]
    Timeout,

    #[cfg(feature = "std-serial")]
    #[error(display = "serial port error: {:?}", _0)]
    SerialPort(#[error(source)] serialport::Error),
}

impl From<ParseError> for Error {
    fn from(e: ParseError) -> Self {
        Error::Parse(e)
    }
}

/// Outcome delivered to a request's completion callback: exactly one
/// per enqueued request.
pub type RequestResult = Result<Message, Error>;
