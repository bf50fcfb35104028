//! Capability traits the engine is generic over, plus `std` adapters.
//!
//! Keeping these as traits (instead of hard-wiring `serialport` and
//! `std::time::Instant` into [`crate::engine::Engine`]) is what makes
//! the engine testable with an in-memory byte queue and a fake clock.

/// A byte-oriented duplex transport to the sensor.
///
/// Implementations are expected to be non-blocking: `read_byte` is
/// only ever called after `bytes_available` reported at least one
/// byte, and `send_byte` reports whether the byte was accepted rather
/// than blocking until it is.
pub trait SerialTransport {
    /// Number of bytes currently available to read without blocking.
    fn bytes_available(&mut self) -> usize;

    /// Reads one byte. Only called when `bytes_available` is nonzero.
    fn read_byte(&mut self) -> u8;

    /// Attempts to write one byte, returning whether it was accepted.
    fn send_byte(&mut self, byte: u8) -> bool;
}

/// A monotonic millisecond clock.
pub trait Clock {
    /// Milliseconds since some arbitrary fixed epoch. Only differences
    /// between two calls are meaningful.
    fn millis(&self) -> u32;
}

#[cfg(feature = "std-serial")]
mod std_serial {
    use std::collections::VecDeque;
    use std::io::{ErrorKind, Read, Write};
    use std::time::{Duration, Instant};

    use serialport::{
        open_with_settings, DataBits, FlowControl, Parity, SerialPortSettings, StopBits,
    };

    use super::{Clock, SerialTransport};
    use crate::error::Error;

    /// [`Clock`] backed by [`std::time::Instant`], anchored at
    /// construction time.
    pub struct SystemClock {
        epoch: Instant,
    }

    impl SystemClock {
        pub fn new() -> Self {
            SystemClock {
                epoch: Instant::now(),
            }
        }
    }

    impl Default for SystemClock {
        fn default() -> Self {
            Self::new()
        }
    }

    impl Clock for SystemClock {
        fn millis(&self) -> u32 {
            self.epoch.elapsed().as_millis() as u32
        }
    }

    /// [`SerialTransport`] backed by a `serialport`-opened port.
    ///
    /// The port is opened with a short read timeout rather than a
    /// blocking one; `bytes_available` pulls whatever arrived within
    /// that timeout into an internal buffer and reports its length, so
    /// `read_byte` itself never blocks.
    pub struct SerialPortTransport {
        port: Box<dyn serialport::SerialPort>,
        buffered: VecDeque<u8>,
    }

    impl SerialPortTransport {
        pub fn open(device: &str) -> Result<Self, Error> {
            let settings = SerialPortSettings {
                baud_rate: 9600,
                data_bits: DataBits::Eight,
                flow_control: FlowControl::None,
                parity: Parity::None,
                stop_bits: StopBits::One,
                timeout: Duration::from_millis(10),
            };

            let port = open_with_settings(device, &settings).map_err(Error::SerialPort)?;

            log::info!("opened sensor at {:?}", device);

            Ok(SerialPortTransport {
                port,
                buffered: VecDeque::new(),
            })
        }
    }

    impl SerialTransport for SerialPortTransport {
        fn bytes_available(&mut self) -> usize {
            if self.buffered.is_empty() {
                let mut chunk = [0u8; 64];
                match self.port.read(&mut chunk) {
                    Ok(n) => self.buffered.extend(chunk[..n].iter().copied()),
                    Err(e) if e.kind() == ErrorKind::TimedOut => {}
                    Err(e) => log::debug!("read error treated as no data: {:?}", e),
                }
            }
            self.buffered.len()
        }

        fn read_byte(&mut self) -> u8 {
            self.buffered.pop_front().unwrap_or(0)
        }

        fn send_byte(&mut self, byte: u8) -> bool {
            match self.port.write(&[byte]) {
                Ok(n) => n == 1,
                Err(e) if e.kind() == ErrorKind::TimedOut || e.kind() == ErrorKind::WouldBlock => {
                    false
                }
                Err(e) => {
                    log::debug!("write error treated as rejected byte: {:?}", e);
                    false
                }
            }
        }
    }
}

#[cfg(feature = "std-serial")]
pub use std_serial::{SerialPortTransport, SystemClock};
