//! End-to-end scenarios driving `Engine` through its public API only,
//! against an in-memory transport and a fake clock.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use sds011_driver::{wire, Config, Engine, Error, Payload};

struct ByteQueue {
    inbound: VecDeque<u8>,
    outbound: Vec<u8>,
}

impl ByteQueue {
    fn new() -> Self {
        ByteQueue {
            inbound: VecDeque::new(),
            outbound: Vec::new(),
        }
    }

    fn push_inbound(&mut self, bytes: &[u8]) {
        self.inbound.extend(bytes.iter().copied());
    }
}

impl sds011_driver::transport::SerialTransport for ByteQueue {
    fn bytes_available(&mut self) -> usize {
        self.inbound.len()
    }

    fn read_byte(&mut self) -> u8 {
        self.inbound.pop_front().unwrap_or(0)
    }

    fn send_byte(&mut self, byte: u8) -> bool {
        self.outbound.push(byte);
        true
    }
}

struct FakeClock {
    now: RefCell<u32>,
}

impl FakeClock {
    fn new() -> Self {
        FakeClock {
            now: RefCell::new(0),
        }
    }

    fn advance(&self, ms: u32) {
        *self.now.borrow_mut() += ms;
    }
}

impl sds011_driver::transport::Clock for FakeClock {
    fn millis(&self) -> u32 {
        *self.now.borrow()
    }
}

#[test]
fn query_data_round_trips_exact_wire_bytes_and_notifies_observer() {
    let mut engine: Engine<4> = Engine::new(Config::default());
    let mut bus = ByteQueue::new();
    let clock = FakeClock::new();

    let samples = Rc::new(RefCell::new(Vec::new()));
    let samples_clone = samples.clone();
    engine.set_sample_callback(move |msg| samples_clone.borrow_mut().push(*msg));

    let result = Rc::new(RefCell::new(None));
    let result_clone = result.clone();
    engine
        .query_data(wire::BROADCAST_ID, move |r| {
            *result_clone.borrow_mut() = Some(r)
        })
        .unwrap();

    engine.process(&mut bus, &clock);
    assert_eq!(
        bus.outbound,
        vec![
            0xAA, 0xB4, 0x04, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
            0x00, 0xFF, 0xFF, 0x02, 0xAB,
        ]
    );

    bus.push_inbound(&[0xAA, 0xC0, 0xD4, 0x04, 0x3A, 0x0A, 0xA1, 0x60, 0x1D, 0xAB]);
    engine.process(&mut bus, &clock);

    assert_eq!(samples.borrow().len(), 1);
    let msg = result.borrow_mut().take().unwrap().unwrap();
    assert_eq!(
        msg.payload,
        Payload::Sample {
            pm2_5: 1236,
            pm10: 2618
        }
    );
    assert_eq!(msg.dev_id, 0xA160);
}

#[test]
fn get_fw_ver_decodes_date_fields() {
    let mut engine: Engine<4> = Engine::new(Config::default());
    let mut bus = ByteQueue::new();
    let clock = FakeClock::new();

    let result = Rc::new(RefCell::new(None));
    let result_clone = result.clone();
    engine
        .get_fw_ver(0xA160, move |r| *result_clone.borrow_mut() = Some(r))
        .unwrap();
    engine.process(&mut bus, &clock);
    assert_eq!(
        bus.outbound,
        vec![
            0xAA, 0xB4, 0x07, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
            0x00, 0xA1, 0x60, 0x08, 0xAB,
        ]
    );

    bus.push_inbound(&[0xAA, 0xC5, 0x07, 0x0F, 0x07, 0x0A, 0xA1, 0x60, 0x28, 0xAB]);
    engine.process(&mut bus, &clock);

    let msg = result.borrow_mut().take().unwrap().unwrap();
    assert_eq!(
        msg.payload,
        Payload::FwVer {
            year: 15,
            month: 7,
            day: 10
        }
    );
}

#[test]
fn wrong_interval_reply_retries_then_fails_with_invalid_reply() {
    let mut config = Config::default();
    config.retries = 2;
    let mut engine: Engine<4> = Engine::new(config);
    let mut bus = ByteQueue::new();
    let clock = FakeClock::new();

    let result = Rc::new(RefCell::new(None));
    let result_clone = result.clone();
    engine
        .set_op_mode_interval(0xA160, 1, move |r| *result_clone.borrow_mut() = Some(r))
        .unwrap();

    engine.process(&mut bus, &clock);
    // reply claims interval=2, not the requested 1
    bus.push_inbound(&[0xAA, 0xC5, 0x08, 0x01, 0x02, 0x00, 0xA1, 0x60, 0xCB, 0xAB]);
    engine.process(&mut bus, &clock);
    assert!(result.borrow().is_none(), "first rejection should retry");

    bus.push_inbound(&[0xAA, 0xC5, 0x08, 0x01, 0x02, 0x00, 0xA1, 0x60, 0xCB, 0xAB]);
    engine.process(&mut bus, &clock);

    let err = result.borrow_mut().take().unwrap().unwrap_err();
    assert!(matches!(err, Error::InvalidReply));
}

#[test]
fn broadcast_set_dev_id_matches_new_dev_id_in_reply() {
    let mut engine: Engine<4> = Engine::new(Config::default());
    let mut bus = ByteQueue::new();
    let clock = FakeClock::new();

    let result = Rc::new(RefCell::new(None));
    let result_clone = result.clone();
    engine
        .set_device_id(wire::BROADCAST_ID, 0xA001, move |r| {
            *result_clone.borrow_mut() = Some(r)
        })
        .unwrap();
    engine.process(&mut bus, &clock);
    assert_eq!(&bus.outbound[13..15], &[0xA0, 0x01]);

    bus.push_inbound(&[0xAA, 0xC5, 0x05, 0x00, 0x00, 0x00, 0xA0, 0x01, 0xA6, 0xAB]);
    engine.process(&mut bus, &clock);

    assert!(result.borrow_mut().take().unwrap().is_ok());
}

#[test]
fn crc_error_is_returned_but_does_not_fail_the_in_flight_request() {
    let mut engine: Engine<4> = Engine::new(Config::default());
    let mut bus = ByteQueue::new();
    let clock = FakeClock::new();

    let result = Rc::new(RefCell::new(None));
    let result_clone = result.clone();
    engine
        .query_data(0xA160, move |r| *result_clone.borrow_mut() = Some(r))
        .unwrap();
    engine.process(&mut bus, &clock);

    bus.push_inbound(&[0xAA, 0xC0, 0xD4, 0x04, 0x3A, 0x0A, 0xA1, 0x60, 0x1E, 0xAB]);
    let err = engine.process(&mut bus, &clock);
    assert!(matches!(err, Some(sds011_driver::ParseError::Crc)));
    assert!(result.borrow().is_none());
    assert!(engine.is_busy());
}

#[test]
fn queue_overflow_returns_busy_and_earlier_requests_still_complete_in_order() {
    let mut engine: Engine<2> = Engine::new(Config::default());
    let mut bus = ByteQueue::new();
    let clock = FakeClock::new();

    let order = Rc::new(RefCell::new(Vec::new()));

    let order1 = order.clone();
    engine.query_data(1, move |_| order1.borrow_mut().push(1)).unwrap();
    let order2 = order.clone();
    engine.query_data(2, move |_| order2.borrow_mut().push(2)).unwrap();

    let busy = Rc::new(RefCell::new(None));
    let busy_clone = busy.clone();
    let err = engine
        .query_data(3, move |r| *busy_clone.borrow_mut() = Some(r))
        .unwrap_err();
    assert!(matches!(err, Error::Busy));
    assert!(matches!(
        busy.borrow_mut().take().unwrap().unwrap_err(),
        Error::Busy
    ));

    // request 1 is active; answer it, then request 2 starts sending
    engine.process(&mut bus, &clock);
    bus.push_inbound(&[0xAA, 0xC0, 0x00, 0x00, 0x00, 0x00, 0x00, 0x01, 0x01, 0xAB]);
    engine.process(&mut bus, &clock);
    engine.process(&mut bus, &clock);
    bus.push_inbound(&[0xAA, 0xC0, 0x00, 0x00, 0x00, 0x00, 0x00, 0x02, 0x02, 0xAB]);
    engine.process(&mut bus, &clock);

    assert_eq!(*order.borrow(), vec![1, 2]);
}
