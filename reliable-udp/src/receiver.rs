//! In-order receive cursor.
//!
//! [`Receiver`] decides what to do with an inbound data segment:
//!
//! - Only **in-order** segments are accepted (`seq == rcv_nxt`).
//! - Duplicates (already delivered) and out-of-order segments are discarded
//!   without buffering.
//! - After every data segment, accepted or not, the caller sends a
//!   cumulative ACK carrying [`ack_number`](Receiver::ack_number).
//!
//! The payload itself is copied by the caller into the application buffer.

use crate::sequence::seq_lt;

/// Outcome of offering a data segment to the receiver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Next expected bytes; deliver them.
    Accepted,
    /// Starts before `rcv_nxt`: already delivered.
    Duplicate,
    /// Starts after `rcv_nxt`: a gap precedes it.
    OutOfOrder,
}

/// Receive-side sequence state for one connection.
#[derive(Debug, Clone)]
pub struct Receiver {
    /// Next expected sequence number.
    rcv_nxt: u32,
}

impl Receiver {
    /// `rcv_nxt` is the first data sequence number expected from the peer
    /// (peer ISN + 1 after the handshake).
    pub fn new(rcv_nxt: u32) -> Self {
        Self { rcv_nxt }
    }

    /// Classify a segment of `len` payload bytes starting at `seq`, advancing
    /// `rcv_nxt` when it is accepted.
    pub fn on_segment(&mut self, seq: u32, len: usize) -> Delivery {
        if seq == self.rcv_nxt {
            self.rcv_nxt = self.rcv_nxt.wrapping_add(len as u32);
            Delivery::Accepted
        } else if seq_lt(seq, self.rcv_nxt) {
            Delivery::Duplicate
        } else {
            Delivery::OutOfOrder
        }
    }

    /// Cumulative ACK number for the next outbound acknowledgement.
    pub fn ack_number(&self) -> u32 {
        self.rcv_nxt
    }
}
