//! Host-side driver for the SDS011-family laser dust sensor protocol.
//!
//! [`wire`] defines the typed message model and wire constants,
//! [`parser`] turns a byte stream into [`wire::Message`]s one byte at
//! a time, [`builder`] does the reverse, and [`validator`] checks a
//! decoded reply against the request that provoked it. [`engine`]
//! ties these together into a single-in-flight-request driver that
//! callers poll explicitly via [`engine::Engine::process`]; it is
//! generic over [`transport::SerialTransport`] and [`transport::Clock`]
//! so it can be exercised without a real serial port.
//!
//! The `std-serial` feature adds [`transport::SerialPortTransport`]
//! and [`transport::SystemClock`], `serialport`-backed implementations
//! of those two traits for use outside of tests.

pub mod builder;
pub mod engine;
pub mod error;
pub mod fifo;
pub mod parser;
pub mod transport;
pub mod validator;
pub mod wire;

pub use engine::{Config, Engine};
pub use error::{Error, ParseError, RequestResult};
pub use wire::{Message, MsgType, Op, OpMode, Payload, ReportingMode, SleepState, Source};

#[cfg(feature = "std-serial")]
pub use transport::{SerialPortTransport, SystemClock};
