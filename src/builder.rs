//! Serializes a typed [`Message`] into its bit-exact wire layout.
//!
//! Host-originated messages build as 19-byte query packets; sensor-
//! originated messages build as 10-byte reply packets. The caller
//! supplies the destination buffer; nothing here allocates.

use crate::error::Error;
use crate::wire::{self, Message, OpMode, Payload, Source};

/// Serializes `msg` into `buf`, returning the number of bytes written.
///
/// `buf` must be at least [`wire::QUERY_PACKET_SIZE`] bytes for a
/// host-originated message, or [`wire::REPLY_PACKET_SIZE`] for a
/// sensor-originated one.
pub fn build(msg: &Message, buf: &mut [u8]) -> Result<usize, Error> {
    match msg.source {
        Source::Host => build_host(msg, buf),
        Source::Sensor => build_sensor(msg, buf),
    }
}

fn build_host(msg: &Message, buf: &mut [u8]) -> Result<usize, Error> {
    if buf.len() < wire::QUERY_PACKET_SIZE {
        return Err(Error::Mem);
    }
    for b in buf.iter_mut().take(wire::QUERY_PACKET_SIZE) {
        *b = 0;
    }

    buf[0] = wire::FRAME_BEG;
    buf[1] = wire::CMD_QUERY;
    buf[2] = msg_type_byte(msg);

    match msg.payload {
        Payload::RepMode(mode) => {
            buf[3] = op_byte(msg);
            buf[4] = mode.as_byte();
        }
        Payload::Sleep(sleep) => {
            buf[3] = op_byte(msg);
            buf[4] = sleep.as_byte();
        }
        Payload::OpMode { interval, .. } => {
            buf[3] = op_byte(msg);
            buf[4] = interval;
        }
        Payload::DevId { new_dev_id } => {
            buf[13] = msb(new_dev_id);
            buf[14] = lsb(new_dev_id);
        }
        Payload::Sample { .. } | Payload::FwVer { .. } => {}
    }

    buf[15] = msb(msg.dev_id);
    buf[16] = lsb(msg.dev_id);

    let crc = wire::checksum(&buf[2..17]);
    buf[17] = crc;
    buf[18] = wire::FRAME_END;

    Ok(wire::QUERY_PACKET_SIZE)
}

fn build_sensor(msg: &Message, buf: &mut [u8]) -> Result<usize, Error> {
    if buf.len() < wire::REPLY_PACKET_SIZE {
        return Err(Error::Mem);
    }
    for b in buf.iter_mut().take(wire::REPLY_PACKET_SIZE) {
        *b = 0;
    }

    buf[0] = wire::FRAME_BEG;

    match msg.payload {
        Payload::Sample { pm2_5, pm10 } => {
            buf[1] = wire::CMD_DATA_REPLY;
            buf[2] = lsb(pm2_5);
            buf[3] = msb(pm2_5);
            buf[4] = lsb(pm10);
            buf[5] = msb(pm10);
        }
        Payload::RepMode(mode) => {
            buf[1] = wire::CMD_REPLY;
            buf[2] = msg_type_byte(msg);
            buf[3] = op_byte(msg);
            buf[4] = mode.as_byte();
        }
        Payload::Sleep(sleep) => {
            buf[1] = wire::CMD_REPLY;
            buf[2] = msg_type_byte(msg);
            buf[3] = op_byte(msg);
            buf[4] = sleep.as_byte();
        }
        Payload::OpMode { interval, .. } => {
            buf[1] = wire::CMD_REPLY;
            buf[2] = msg_type_byte(msg);
            buf[3] = op_byte(msg);
            buf[4] = interval;
        }
        Payload::FwVer { year, month, day } => {
            buf[1] = wire::CMD_REPLY;
            buf[2] = msg_type_byte(msg);
            buf[3] = year;
            buf[4] = month;
            buf[5] = day;
        }
        Payload::DevId { .. } => {
            buf[1] = wire::CMD_REPLY;
            buf[2] = msg_type_byte(msg);
        }
    }

    buf[6] = msb(msg.dev_id);
    buf[7] = lsb(msg.dev_id);

    let crc = wire::checksum(&buf[2..8]);
    buf[8] = crc;
    buf[9] = wire::FRAME_END;

    Ok(wire::REPLY_PACKET_SIZE)
}

fn msg_type_byte(msg: &Message) -> u8 {
    use crate::wire::MsgType;
    match msg.msg_type() {
        MsgType::RepMode => 2,
        MsgType::Data => 4,
        MsgType::DevId => 5,
        MsgType::Sleep => 6,
        MsgType::FwVer => 7,
        MsgType::OpMode => 8,
    }
}

fn op_byte(msg: &Message) -> u8 {
    use crate::wire::Op;
    match msg.op {
        Op::Get => 0,
        Op::Set => 1,
    }
}

fn msb(v: u16) -> u8 {
    (v >> 8) as u8
}

fn lsb(v: u16) -> u8 {
    (v & 0xFF) as u8
}
