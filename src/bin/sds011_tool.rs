#[macro_use]
extern crate log;

use std::cell::RefCell;
use std::path::PathBuf;
use std::rc::Rc;
use std::str::FromStr;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};
use structopt::StructOpt;

use sds011_driver::{
    Config, Engine, Message, ReportingMode, RequestResult, SerialPortTransport, SleepState,
    SystemClock,
};

#[derive(Debug, Clone, Copy)]
struct WorkMode(SleepState);

impl FromStr for WorkMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "work" => Ok(WorkMode(SleepState::Off)),
            "sleep" => Ok(WorkMode(SleepState::On)),
            other => Err(anyhow!("invalid work mode: {} (expected work or sleep)", other)),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct CliReportingMode(ReportingMode);

impl FromStr for CliReportingMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "active" => Ok(CliReportingMode(ReportingMode::Active)),
            "query" => Ok(CliReportingMode(ReportingMode::Query)),
            other => Err(anyhow!("invalid reporting mode: {} (expected active or query)", other)),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct WorkingPeriod(u8);

impl FromStr for WorkingPeriod {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let n: u8 = s.parse()?;
        if n > 30 {
            return Err(anyhow!("working period must be 0..=30 minutes"));
        }
        Ok(WorkingPeriod(n))
    }
}

#[derive(Debug, Clone, StructOpt)]
struct SetWorkModeAction {
    /// if set, retrieves the current mode and does not set anything
    #[structopt(long, short)]
    get: bool,

    /// the working mode, one of: work (on), sleep (off)
    mode: WorkMode,
}

#[derive(Debug, Clone, StructOpt)]
struct SetReportingModeAction {
    /// if set, retrieves the current mode and does not set anything
    #[structopt(long, short)]
    get: bool,

    /// the reporting mode, one of: active, query
    mode: CliReportingMode,
}

#[derive(Debug, Clone, StructOpt)]
struct SetWorkingPeriodAction {
    #[structopt(long, short)]
    get: bool,

    /// the working period in minutes; 0 for continuous
    ///
    /// 0: continuous, actively reports every second{n}
    /// 1-30: actively reports every `n` minutes after 30s of measurement
    working_period: WorkingPeriod,
}

#[derive(Debug, Clone, StructOpt)]
#[structopt(rename_all = "kebab-case")]
enum Action {
    /// Fetches sensor information
    Info,

    /// Displays sensor events
    Watch,

    /// Sets the sensor's working mode (work / sleep)
    SetWorkMode(SetWorkModeAction),

    /// Sets the device reporting mode (active / query)
    SetReportingMode(SetReportingModeAction),

    /// Sets the device working period
    ///
    /// 0: continuous (actively reports every ~1s, never sleeps){n}
    /// 1-30: reports every `n` minutes
    SetWorkingPeriod(SetWorkingPeriodAction),
}

#[derive(Debug, Clone, StructOpt)]
#[structopt(name = "sds011-tool")]
struct Options {
    /// sensor serial device, e.g. /dev/ttyUSB0
    #[structopt(parse(from_os_str))]
    device: PathBuf,

    #[structopt(subcommand)]
    action: Action,
}

const BROADCAST: u16 = sds011_driver::wire::BROADCAST_ID;

/// Pumps `engine.process` until `outcome` is filled or `timeout` elapses.
fn wait_for<T>(
    engine: &mut Engine<4>,
    serial: &mut SerialPortTransport,
    clock: &SystemClock,
    outcome: &Rc<RefCell<Option<T>>>,
    timeout: Duration,
) -> Result<T> {
    let start = Instant::now();
    loop {
        engine.process(serial, clock);

        if let Some(v) = outcome.borrow_mut().take() {
            return Ok(v);
        }

        if start.elapsed() > timeout {
            return Err(anyhow!("did not receive a response in time"));
        }

        thread::sleep(Duration::from_millis(20));
    }
}

fn capture() -> (
    Rc<RefCell<Option<RequestResult>>>,
    impl FnMut(RequestResult) + 'static,
) {
    let slot = Rc::new(RefCell::new(None));
    let slot_clone = slot.clone();
    (slot, move |r| *slot_clone.borrow_mut() = Some(r))
}

fn info(engine: &mut Engine<4>, serial: &mut SerialPortTransport, clock: &SystemClock) -> Result<()> {
    let (fw, fw_cb) = capture();
    engine.get_fw_ver(BROADCAST, fw_cb)?;
    let fw = wait_for(engine, serial, clock, &fw, Duration::from_millis(2000))??;

    let (rep, rep_cb) = capture();
    engine.get_reporting_mode(fw.dev_id, rep_cb)?;
    let rep = wait_for(engine, serial, clock, &rep, Duration::from_millis(2000))??;

    let (sleep, sleep_cb) = capture();
    engine.get_sleep(fw.dev_id, sleep_cb)?;
    let sleep = wait_for(engine, serial, clock, &sleep, Duration::from_millis(2000))??;

    let (op, op_cb) = capture();
    engine.get_op_mode(fw.dev_id, op_cb)?;
    let op = wait_for(engine, serial, clock, &op, Duration::from_millis(2000))??;

    println!("Device ID:        0x{:04x}", fw.dev_id);
    println!("Firmware version: {:?}", fw.payload);
    println!("Reporting mode:   {:?}", rep.payload);
    println!("Working mode:     {:?}", sleep.payload);
    println!("Working period:   {:?}", op.payload);

    Ok(())
}

fn watch(engine: &mut Engine<4>, serial: &mut SerialPortTransport, clock: &SystemClock) -> Result<()> {
    let samples: Rc<RefCell<Vec<Message>>> = Rc::new(RefCell::new(Vec::new()));
    let samples_clone = samples.clone();
    engine.set_sample_callback(move |msg| samples_clone.borrow_mut().push(*msg));

    loop {
        if let Some(err) = engine.process(serial, clock) {
            debug!("parse error: {:?}", err);
        }

        for sample in samples.borrow_mut().drain(..) {
            info!("{:x?}", sample);
        }

        thread::sleep(Duration::from_millis(100));
    }
}

fn set_work_mode(
    engine: &mut Engine<4>,
    serial: &mut SerialPortTransport,
    clock: &SystemClock,
    action: SetWorkModeAction,
) -> Result<()> {
    let (result, cb) = capture();
    if action.get {
        info!("sent working mode query...");
        engine.get_sleep(BROADCAST, cb)?;
    } else {
        info!("attempting to set working mode: {:?}", action.mode.0);
        match action.mode.0 {
            SleepState::On => engine.set_sleep_on(BROADCAST, cb)?,
            SleepState::Off => engine.set_sleep_off(BROADCAST, cb)?,
        }
    }

    let reply = wait_for(engine, serial, clock, &result, Duration::from_millis(1000))??;
    info!("received response: {:?}", reply.payload);
    Ok(())
}

fn set_reporting_mode(
    engine: &mut Engine<4>,
    serial: &mut SerialPortTransport,
    clock: &SystemClock,
    action: SetReportingModeAction,
) -> Result<()> {
    let (result, cb) = capture();
    if action.get {
        info!("sent reporting mode query...");
        engine.get_reporting_mode(BROADCAST, cb)?;
    } else {
        info!("attempting to set reporting mode: {:?}", action.mode.0);
        match action.mode.0 {
            ReportingMode::Active => engine.set_reporting_mode_active(BROADCAST, cb)?,
            ReportingMode::Query => engine.set_reporting_mode_query(BROADCAST, cb)?,
        }
    }

    let reply = wait_for(engine, serial, clock, &result, Duration::from_millis(1000))??;
    info!("received response: {:?}", reply.payload);
    Ok(())
}

fn set_working_period(
    engine: &mut Engine<4>,
    serial: &mut SerialPortTransport,
    clock: &SystemClock,
    action: SetWorkingPeriodAction,
) -> Result<()> {
    let (result, cb) = capture();
    if action.get {
        info!("sent working period query...");
        engine.get_op_mode(BROADCAST, cb)?;
    } else {
        info!("attempting to set working period: {:?}", action.working_period.0);
        if action.working_period.0 == 0 {
            engine.set_op_mode_continuous(BROADCAST, cb)?;
        } else {
            engine.set_op_mode_interval(BROADCAST, action.working_period.0, cb)?;
        }
    }

    let reply = wait_for(engine, serial, clock, &result, Duration::from_millis(1000))??;
    info!("received response: {:?}", reply.payload);
    Ok(())
}

fn main() -> Result<()> {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Debug)
        .target(env_logger::Target::Stderr)
        .init();

    let opts = Options::from_args();

    let mut serial = SerialPortTransport::open(
        opts.device
            .to_str()
            .ok_or_else(|| anyhow!("device path must be valid UTF-8"))?,
    )?;
    let clock = SystemClock::new();
    let mut engine: Engine<4> = Engine::new(Config::default());

    match opts.action {
        Action::Info => info(&mut engine, &mut serial, &clock),
        Action::Watch => watch(&mut engine, &mut serial, &clock),
        Action::SetWorkMode(action) => set_work_mode(&mut engine, &mut serial, &clock, action),
        Action::SetReportingMode(action) => {
            set_reporting_mode(&mut engine, &mut serial, &clock, action)
        }
        Action::SetWorkingPeriod(action) => {
            set_working_period(&mut engine, &mut serial, &clock, action)
        }
    }
}
