//! The single-in-flight-request driver loop.
//!
//! [`Engine`] owns one active request at a time plus a bounded queue of
//! pending ones. [`Engine::process`] is the only thing that advances
//! state: feed it bytes via a [`SerialTransport`] and a [`Clock`] and
//! it drains the transport, matches replies against the in-flight
//! request, retries or times it out, and starts the next queued
//! request once the bus goes idle. Nothing here allocates except the
//! once-per-request boxed completion callback.

use crate::builder;
use crate::error::{Error, RequestResult};
use crate::fifo::Fifo;
use crate::parser::{ParseOutcome, Parser};
use crate::transport::{Clock, SerialTransport};
use crate::validator;
use crate::wire::{self, Message, MsgType, Op, Payload, OpMode, ReportingMode, SleepState, Source};

/// Tunables for the retry/timeout behavior of a single request.
#[derive(Debug, Clone, Copy)]
pub struct Config {
    /// Milliseconds to wait for a reply (or for a byte to be accepted
    /// by the transport) before treating the attempt as failed. Zero
    /// disables the timeout entirely.
    pub msg_timeout: u32,

    /// Total attempts made for a non-critical failure (bad checksum,
    /// wrong reply, no reply) before giving up and reporting it to the
    /// caller. A critical failure (buffer too small to build the
    /// packet) is reported immediately, with no retry.
    pub retries: u32,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            msg_timeout: 500,
            retries: 5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RequestStatus {
    Idle,
    Running,
    Success,
    Failure,
}

/// The one allocation in this crate: a boxed completion callback,
/// taken once when a request is enqueued, never on the `process()` hot
/// path.
type CallbackBox = Box<dyn FnMut(RequestResult) + 'static>;

struct PendingRequest {
    msg: Message,
    callback: CallbackBox,
}

/// Drives the request/reply protocol over a byte transport.
///
/// `QUEUE` bounds the number of requests that may be pending (enqueued
/// but not yet sent) at once, not counting the one currently in
/// flight.
pub struct Engine<const QUEUE: usize> {
    config: Config,
    parser: Parser,
    queue: Fifo<PendingRequest, QUEUE>,
    active: Option<PendingRequest>,
    status: RequestStatus,
    critical: bool,
    attempt: u32,
    start_time: u32,
    last_reply: Option<Message>,
    last_err: Option<Error>,
    sample_observer: Option<Box<dyn FnMut(&Message)>>,
}

impl<const QUEUE: usize> Engine<QUEUE> {
    pub fn new(config: Config) -> Self {
        Engine {
            config,
            parser: Parser::new(),
            queue: Fifo::new(),
            active: None,
            status: RequestStatus::Idle,
            critical: false,
            attempt: 0,
            start_time: 0,
            last_reply: None,
            last_err: None,
            sample_observer: None,
        }
    }

    /// Registers (or replaces) the callback fired for every DATA
    /// message the parser decodes, independent of whether it also
    /// completes an in-flight request.
    pub fn set_sample_callback(&mut self, f: impl FnMut(&Message) + 'static) {
        self.sample_observer = Some(Box::new(f));
    }

    /// True while a request is actively waiting on the bus.
    pub fn is_busy(&self) -> bool {
        self.status == RequestStatus::Running
    }

    /// Advances the engine by one poll: drains whatever the transport
    /// has buffered, updates the in-flight request's status, and
    /// starts the next queued request if the bus just went idle.
    ///
    /// Returns the most recent non-fatal parse error observed this
    /// poll, if any; a parse error never aborts `process` itself.
    pub fn process(
        &mut self,
        serial: &mut impl SerialTransport,
        clock: &impl Clock,
    ) -> Option<crate::error::ParseError> {
        let mut parse_err = None;

        let available = serial.bytes_available();
        for _ in 0..available {
            let byte = serial.read_byte();
            match self.parser.feed(byte) {
                ParseOutcome::Running => {}
                ParseOutcome::Ready => {
                    if let Some(msg) = self.parser.message() {
                        self.on_message(&msg);
                    }
                }
                ParseOutcome::Error(e) => {
                    parse_err = Some(e);
                }
            }
        }

        if self.status == RequestStatus::Running && self.config.msg_timeout != 0 {
            let elapsed = clock.millis().wrapping_sub(self.start_time);
            if elapsed > self.config.msg_timeout {
                self.status = RequestStatus::Failure;
                self.last_err = Some(Error::Timeout);
                self.critical = false;
            }
        }

        if self.status == RequestStatus::Success {
            self.complete_success();
        }

        if self.status == RequestStatus::Failure {
            self.handle_failure(serial, clock);
        }

        if self.status == RequestStatus::Idle {
            self.drain_queue(serial, clock);
        }

        parse_err
    }

    fn on_message(&mut self, msg: &Message) {
        if msg.msg_type() == MsgType::Data {
            if let Some(observer) = self.sample_observer.as_mut() {
                observer(msg);
            }
        }

        if self.status != RequestStatus::Running {
            return;
        }
        let active_msg = match &self.active {
            Some(req) => req.msg,
            None => return,
        };

        if msg.msg_type() != active_msg.msg_type() || msg.op != active_msg.op {
            return;
        }
        if !dev_id_matches(&active_msg, msg) {
            return;
        }

        if validator::validate(&active_msg, msg) {
            self.status = RequestStatus::Success;
            self.last_reply = Some(*msg);
        } else {
            self.status = RequestStatus::Failure;
            self.last_err = Some(Error::InvalidReply);
            self.critical = false;
        }
    }

    fn complete_success(&mut self) {
        if let Some(mut req) = self.active.take() {
            let reply = self.last_reply.take();
            (req.callback)(Ok(reply.expect("Success status always carries a reply")));
        }
        self.status = RequestStatus::Idle;
    }

    fn complete_failure(&mut self) {
        if let Some(mut req) = self.active.take() {
            let err = self
                .last_err
                .take()
                .unwrap_or(Error::Timeout);
            (req.callback)(Err(err));
        }
        self.status = RequestStatus::Idle;
    }

    fn handle_failure(&mut self, serial: &mut impl SerialTransport, clock: &impl Clock) {
        if self.critical {
            self.complete_failure();
            return;
        }

        self.attempt += 1;
        if self.attempt >= self.config.retries {
            self.complete_failure();
        } else {
            log::debug!(
                "retrying request, attempt {} of {}",
                self.attempt + 1,
                self.config.retries
            );
            self.send_active(serial, clock);
        }
    }

    fn drain_queue(&mut self, serial: &mut impl SerialTransport, clock: &impl Clock) {
        if let Some(req) = self.queue.pop() {
            self.active = Some(req);
            self.attempt = 0;
            self.send_active(serial, clock);
        }
    }

    fn send_active(&mut self, serial: &mut impl SerialTransport, clock: &impl Clock) {
        self.status = RequestStatus::Running;
        self.critical = false;
        self.start_time = clock.millis();

        let msg = match &self.active {
            Some(req) => req.msg,
            None => return,
        };

        let mut buf = [0u8; wire::QUERY_PACKET_SIZE];
        let n = match builder::build(&msg, &mut buf) {
            Ok(n) => n,
            Err(e) => {
                self.status = RequestStatus::Failure;
                self.last_err = Some(e);
                self.critical = true;
                return;
            }
        };

        for &byte in &buf[..n] {
            let send_start = clock.millis();
            loop {
                if serial.send_byte(byte) {
                    break;
                }
                let elapsed = clock.millis().wrapping_sub(send_start);
                if self.config.msg_timeout != 0 && elapsed > self.config.msg_timeout {
                    self.status = RequestStatus::Failure;
                    self.last_err = Some(Error::SendData);
                    self.critical = false;
                    return;
                }
            }
        }
    }

    fn enqueue(
        &mut self,
        msg: Message,
        callback: impl FnMut(RequestResult) + 'static,
    ) -> Result<(), Error> {
        let req = PendingRequest {
            msg,
            callback: Box::new(callback),
        };
        match self.queue.push(req) {
            Ok(()) => Ok(()),
            Err(mut req) => {
                (req.callback)(Err(Error::Busy));
                Err(Error::Busy)
            }
        }
    }

    /// Queries the sensor's current reporting mode.
    pub fn get_reporting_mode(
        &mut self,
        dev_id: u16,
        callback: impl FnMut(RequestResult) + 'static,
    ) -> Result<(), Error> {
        self.enqueue(
            host_msg(dev_id, Op::Get, Payload::RepMode(ReportingMode::Active)),
            callback,
        )
    }

    /// Sets the sensor's reporting mode.
    fn set_reporting_mode(
        &mut self,
        dev_id: u16,
        mode: ReportingMode,
        callback: impl FnMut(RequestResult) + 'static,
    ) -> Result<(), Error> {
        self.enqueue(host_msg(dev_id, Op::Set, Payload::RepMode(mode)), callback)
    }

    /// Switches the sensor to active reporting: it pushes a sample on
    /// its own schedule without being polled.
    pub fn set_reporting_mode_active(
        &mut self,
        dev_id: u16,
        callback: impl FnMut(RequestResult) + 'static,
    ) -> Result<(), Error> {
        self.set_reporting_mode(dev_id, ReportingMode::Active, callback)
    }

    /// Switches the sensor to query reporting: samples are only sent in
    /// response to [`Engine::query_data`].
    pub fn set_reporting_mode_query(
        &mut self,
        dev_id: u16,
        callback: impl FnMut(RequestResult) + 'static,
    ) -> Result<(), Error> {
        self.set_reporting_mode(dev_id, ReportingMode::Query, callback)
    }

    /// Queries one sample; only meaningful in query reporting mode.
    pub fn query_data(
        &mut self,
        dev_id: u16,
        callback: impl FnMut(RequestResult) + 'static,
    ) -> Result<(), Error> {
        self.enqueue(
            host_msg(
                dev_id,
                Op::Get,
                Payload::Sample { pm2_5: 0, pm10: 0 },
            ),
            callback,
        )
    }

    /// Assigns the sensor a new device id.
    pub fn set_device_id(
        &mut self,
        dev_id: u16,
        new_dev_id: u16,
        callback: impl FnMut(RequestResult) + 'static,
    ) -> Result<(), Error> {
        self.enqueue(
            host_msg(dev_id, Op::Set, Payload::DevId { new_dev_id }),
            callback,
        )
    }

    /// Queries sleep/work state.
    pub fn get_sleep(
        &mut self,
        dev_id: u16,
        callback: impl FnMut(RequestResult) + 'static,
    ) -> Result<(), Error> {
        self.enqueue(
            host_msg(dev_id, Op::Get, Payload::Sleep(SleepState::On)),
            callback,
        )
    }

    /// Sets sleep/work state.
    fn set_sleep(
        &mut self,
        dev_id: u16,
        state: SleepState,
        callback: impl FnMut(RequestResult) + 'static,
    ) -> Result<(), Error> {
        self.enqueue(host_msg(dev_id, Op::Set, Payload::Sleep(state)), callback)
    }

    /// Turns on the sleep mode (stops the fan and laser).
    pub fn set_sleep_on(
        &mut self,
        dev_id: u16,
        callback: impl FnMut(RequestResult) + 'static,
    ) -> Result<(), Error> {
        self.set_sleep(dev_id, SleepState::On, callback)
    }

    /// Turns off the sleep mode, waking the sensor for measurement.
    pub fn set_sleep_off(
        &mut self,
        dev_id: u16,
        callback: impl FnMut(RequestResult) + 'static,
    ) -> Result<(), Error> {
        self.set_sleep(dev_id, SleepState::Off, callback)
    }

    /// Queries the working mode (continuous vs. periodic) and interval.
    pub fn get_op_mode(
        &mut self,
        dev_id: u16,
        callback: impl FnMut(RequestResult) + 'static,
    ) -> Result<(), Error> {
        self.enqueue(
            host_msg(
                dev_id,
                Op::Get,
                Payload::OpMode {
                    mode: OpMode::Continuous,
                    interval: 0,
                },
            ),
            callback,
        )
    }

    /// Sets continuous reporting (interval 0).
    pub fn set_op_mode_continuous(
        &mut self,
        dev_id: u16,
        callback: impl FnMut(RequestResult) + 'static,
    ) -> Result<(), Error> {
        self.enqueue(
            host_msg(
                dev_id,
                Op::Set,
                Payload::OpMode {
                    mode: OpMode::Continuous,
                    interval: 0,
                },
            ),
            callback,
        )
    }

    /// Sets periodic reporting with the given interval, in minutes
    /// (1..=[`wire::MAX_INTERVAL`]).
    pub fn set_op_mode_interval(
        &mut self,
        dev_id: u16,
        interval: u8,
        callback: impl FnMut(RequestResult) + 'static,
    ) -> Result<(), Error> {
        if interval == 0 || interval > wire::MAX_INTERVAL {
            return Err(Error::InvalidParam);
        }
        self.enqueue(
            host_msg(
                dev_id,
                Op::Set,
                Payload::OpMode {
                    mode: OpMode::Interval,
                    interval,
                },
            ),
            callback,
        )
    }

    /// Queries the sensor firmware version.
    pub fn get_fw_ver(
        &mut self,
        dev_id: u16,
        callback: impl FnMut(RequestResult) + 'static,
    ) -> Result<(), Error> {
        self.enqueue(
            host_msg(
                dev_id,
                Op::Get,
                Payload::FwVer {
                    year: 0,
                    month: 0,
                    day: 0,
                },
            ),
            callback,
        )
    }
}

fn host_msg(dev_id: u16, op: Op, payload: Payload) -> Message {
    Message {
        dev_id,
        op,
        source: Source::Host,
        payload,
    }
}

fn dev_id_matches(request: &Message, reply: &Message) -> bool {
    if request.msg_type() == MsgType::DevId {
        return match request.payload {
            Payload::DevId { new_dev_id } => reply.dev_id == new_dev_id,
            _ => false,
        };
    }
    request.dev_id == wire::BROADCAST_ID || request.dev_id == reply.dev_id
}
