//! Per-type semantic check of a reply against the request that caused
//! it to be sent.

use crate::wire::{Message, Op, Payload};

/// Returns whether `reply` is an acceptable completion for `request`.
pub fn validate(request: &Message, reply: &Message) -> bool {
    if request.msg_type() != reply.msg_type() {
        return false;
    }
    if request.op != reply.op {
        return false;
    }
    if request.op == Op::Get {
        return true;
    }

    match (request.payload, reply.payload) {
        (Payload::RepMode(req_mode), Payload::RepMode(rep_mode)) => req_mode == rep_mode,
        (Payload::DevId { new_dev_id }, _) => reply.dev_id == new_dev_id,
        (Payload::Sleep(req_sleep), Payload::Sleep(rep_sleep)) => req_sleep == rep_sleep,
        (
            Payload::OpMode {
                mode: req_mode,
                interval: req_interval,
            },
            Payload::OpMode {
                mode: rep_mode,
                interval: rep_interval,
            },
        ) => req_mode == rep_mode && req_interval == rep_interval,
        _ => true,
    }
}
