//! Segment codec: wire layout, control-segment builders and checksum.
//!
//! Every unit exchanged between peers is a [`Segment`].  This module is
//! responsible for:
//! - Defining the on-wire binary layout of the header.
//! - Building the canonical control segments (SYN, ACK, SYN-ACK, FIN, FIN-ACK).
//! - Computing and verifying the header+payload checksum.
//! - Minting initial sequence numbers from the OS entropy source.
//!
//! No I/O happens here; [`crate::socket`] moves the bytes.
//!
//! # Wire format
//!
//! All multi-byte integers are **big-endian**.  Fields are written one by one
//! at fixed offsets; the in-memory layout of [`Header`] is irrelevant.
//!
//! ```text
//!  0               1               2               3
//!  0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |          Source Port          |       Destination Port        |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                        Sequence Number                        |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                    Acknowledgment Number                      |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! | HLen  | Rsvd  |C E U A P R S F|            Window             |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |           Checksum            |        Urgent Pointer         |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                        Payload Length                         |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```
//!
//! Total header size: [`HEADER_LEN`] = 24 bytes.  The payload follows as a
//! separate datagram.

use std::fmt;

use rand::rngs::OsRng;
use rand::RngCore;
use thiserror::Error;

use crate::error::{Error, Result};

/// Bit values of the flag byte (CWR is the high bit, FIN the low bit).
pub mod flags {
    pub const FIN: u8 = 0b0000_0001;
    pub const SYN: u8 = 0b0000_0010;
    pub const RST: u8 = 0b0000_0100;
    /// Marks the last chunk of a stream.
    pub const PSH: u8 = 0b0000_1000;
    pub const ACK: u8 = 0b0001_0000;
    pub const URG: u8 = 0b0010_0000;
    pub const ECE: u8 = 0b0100_0000;
    pub const CWR: u8 = 0b1000_0000;

    pub const SYN_ACK: u8 = SYN | ACK;
    pub const FIN_ACK: u8 = FIN | ACK;
}

/// Byte length of the fixed-size header on the wire.
pub const HEADER_LEN: usize = 24;

/// Header-length field value: header size in 32-bit words.
pub const DATA_OFFSET_WORDS: u8 = (HEADER_LEN / 4) as u8;

// Byte offsets of each field within the encoded header.
const OFF_SRC_PORT: usize = 0;
const OFF_DST_PORT: usize = 2;
const OFF_SEQ: usize = 4;
const OFF_ACK: usize = 8;
const OFF_DATA_OFFSET: usize = 12;
const OFF_FLAGS: usize = 13;
const OFF_WINDOW: usize = 14;
const OFF_CHECKSUM: usize = 16;
const OFF_URGENT: usize = 18;
const OFF_PAYLOAD_LEN: usize = 20;

/// Errors that can arise when parsing a raw datagram.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SegmentError {
    #[error("datagram of {0} bytes is not a {HEADER_LEN}-byte header")]
    BadHeaderLength(usize),
    #[error("header announces {expected} payload bytes, got {actual}")]
    LengthMismatch { expected: u32, actual: usize },
}

/// Fixed-size segment header, fields in host byte order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Header {
    pub src_port: u16,
    pub dst_port: u16,
    /// Sequence number of the first payload byte.
    pub seq: u32,
    /// Next sequence number expected from the peer.
    pub ack: u32,
    /// Header length in 32-bit words (high nibble on the wire).
    pub data_offset: u8,
    /// Low nibble of the header-length byte; always sent as zero.
    pub reserved: u8,
    /// Bitmask of [`flags`] constants.
    pub flags: u8,
    /// Advertised window, in segments.
    pub window: u16,
    pub checksum: u16,
    pub urgent_ptr: u16,
    /// Payload byte count.  Kept equal to `payload.len()` by the builders.
    pub payload_len: u32,
}

impl Header {
    /// Serialise into the fixed wire layout.
    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let mut buf = [0u8; HEADER_LEN];
        buf[OFF_SRC_PORT..OFF_SRC_PORT + 2].copy_from_slice(&self.src_port.to_be_bytes());
        buf[OFF_DST_PORT..OFF_DST_PORT + 2].copy_from_slice(&self.dst_port.to_be_bytes());
        buf[OFF_SEQ..OFF_SEQ + 4].copy_from_slice(&self.seq.to_be_bytes());
        buf[OFF_ACK..OFF_ACK + 4].copy_from_slice(&self.ack.to_be_bytes());
        buf[OFF_DATA_OFFSET] = (self.data_offset << 4) | (self.reserved & 0x0f);
        buf[OFF_FLAGS] = self.flags;
        buf[OFF_WINDOW..OFF_WINDOW + 2].copy_from_slice(&self.window.to_be_bytes());
        buf[OFF_CHECKSUM..OFF_CHECKSUM + 2].copy_from_slice(&self.checksum.to_be_bytes());
        buf[OFF_URGENT..OFF_URGENT + 2].copy_from_slice(&self.urgent_ptr.to_be_bytes());
        buf[OFF_PAYLOAD_LEN..OFF_PAYLOAD_LEN + 4].copy_from_slice(&self.payload_len.to_be_bytes());
        buf
    }

    /// Parse a header datagram.  The datagram must be exactly [`HEADER_LEN`]
    /// bytes; anything else is a stray payload or garbage.
    pub fn decode(buf: &[u8]) -> std::result::Result<Self, SegmentError> {
        let buf: &[u8; HEADER_LEN] = buf
            .try_into()
            .map_err(|_| SegmentError::BadHeaderLength(buf.len()))?;

        let u16_at = |off: usize| u16::from_be_bytes([buf[off], buf[off + 1]]);
        let u32_at =
            |off: usize| u32::from_be_bytes([buf[off], buf[off + 1], buf[off + 2], buf[off + 3]]);

        Ok(Header {
            src_port: u16_at(OFF_SRC_PORT),
            dst_port: u16_at(OFF_DST_PORT),
            seq: u32_at(OFF_SEQ),
            ack: u32_at(OFF_ACK),
            data_offset: buf[OFF_DATA_OFFSET] >> 4,
            reserved: buf[OFF_DATA_OFFSET] & 0x0f,
            flags: buf[OFF_FLAGS],
            window: u16_at(OFF_WINDOW),
            checksum: u16_at(OFF_CHECKSUM),
            urgent_ptr: u16_at(OFF_URGENT),
            payload_len: u32_at(OFF_PAYLOAD_LEN),
        })
    }

    fn control(seq: u32, ack: u32, flags: u8) -> Self {
        Header {
            seq,
            ack,
            data_offset: DATA_OFFSET_WORDS,
            flags,
            ..Header::default()
        }
    }
}

/// A complete protocol unit: header plus owned payload bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub header: Header,
    pub payload: Vec<u8>,
}

impl Segment {
    /// Data segment carrying `payload` at sequence number `seq`.
    pub fn data(seq: u32, payload: Vec<u8>) -> Self {
        let mut header = Header::control(seq, 0, 0);
        header.payload_len = payload.len() as u32;
        Segment { header, payload }.with_checksum()
    }

    /// Reassemble a received segment, checking the announced payload length.
    ///
    /// The checksum is **not** verified here; see [`Segment::verify`].
    pub fn from_parts(header: Header, payload: Vec<u8>) -> std::result::Result<Self, SegmentError> {
        if header.payload_len as usize != payload.len() {
            return Err(SegmentError::LengthMismatch {
                expected: header.payload_len,
                actual: payload.len(),
            });
        }
        Ok(Segment { header, payload })
    }

    pub fn seq(&self) -> u32 {
        self.header.seq
    }

    pub fn ack_num(&self) -> u32 {
        self.header.ack
    }

    /// First sequence number after this segment's payload.
    pub fn end_seq(&self) -> u32 {
        self.header.seq.wrapping_add(self.payload.len() as u32)
    }

    /// `true` when every bit of `flag` is set.
    pub fn has(&self, flag: u8) -> bool {
        self.header.flags & flag == flag
    }

    /// Copy with the checksum field populated.
    pub fn with_checksum(mut self) -> Self {
        self.header.payload_len = self.payload.len() as u32;
        self.header.checksum = checksum(&self);
        self
    }

    pub fn with_seq(mut self, seq: u32) -> Self {
        self.header.seq = seq;
        self.with_checksum()
    }

    pub fn with_ack_num(mut self, ack: u32) -> Self {
        self.header.ack = ack;
        self.with_checksum()
    }

    /// Set additional flag bits.
    pub fn with_flags(mut self, flags: u8) -> Self {
        self.header.flags |= flags;
        self.with_checksum()
    }

    pub fn with_window(mut self, window: u16) -> Self {
        self.header.window = window;
        self.with_checksum()
    }

    pub fn with_ports(mut self, src_port: u16, dst_port: u16) -> Self {
        self.header.src_port = src_port;
        self.header.dst_port = dst_port;
        self.with_checksum()
    }

    /// `true` when the stored checksum matches the recomputed one.
    pub fn is_valid(&self) -> bool {
        checksum(self) == self.header.checksum
    }

    /// Like [`is_valid`](Self::is_valid) but reports both values on mismatch.
    pub fn verify(&self) -> Result<()> {
        let computed = checksum(self);
        if computed == self.header.checksum {
            Ok(())
        } else {
            Err(Error::ChecksumMismatch {
                stored: self.header.checksum,
                computed,
            })
        }
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[S={}] [A={}] [", self.header.seq, self.header.ack)?;
        let names = [
            (flags::SYN, "SYN"),
            (flags::ACK, "ACK"),
            (flags::FIN, "FIN"),
            (flags::RST, "RST"),
            (flags::PSH, "PSH"),
        ];
        let mut first = true;
        for (bit, name) in names {
            if self.header.flags & bit != 0 {
                if !first {
                    f.write_str("|")?;
                }
                f.write_str(name)?;
                first = false;
            }
        }
        write!(f, "] len={}", self.payload.len())
    }
}

// ---------------------------------------------------------------------------
// Control-segment builders
// ---------------------------------------------------------------------------

/// SYN carrying the sender's initial sequence number.
pub fn syn(seq: u32) -> Segment {
    control(seq, 0, flags::SYN)
}

/// Pure acknowledgement.
pub fn ack(seq: u32, ack: u32) -> Segment {
    control(seq, ack, flags::ACK)
}

/// SYN-ACK; the caller fills in the acknowledgement via
/// [`Segment::with_ack_num`].
pub fn syn_ack(seq: u32) -> Segment {
    control(seq, 0, flags::SYN_ACK)
}

pub fn fin() -> Segment {
    control(0, 0, flags::FIN)
}

pub fn fin_ack() -> Segment {
    control(0, 0, flags::FIN_ACK)
}

fn control(seq: u32, ack: u32, flags: u8) -> Segment {
    Segment {
        header: Header::control(seq, ack, flags),
        payload: Vec::new(),
    }
    .with_checksum()
}

// ---------------------------------------------------------------------------
// Checksum
// ---------------------------------------------------------------------------

/// One's-complement checksum over the encoded header (checksum field zeroed)
/// followed by the payload.
///
/// An odd trailing payload byte is padded with a zero byte on the right.
pub fn checksum(segment: &Segment) -> u16 {
    let mut header = segment.header;
    header.checksum = 0;
    header.payload_len = segment.payload.len() as u32;

    // HEADER_LEN is even, so the payload starts on a word boundary.
    let sum = ones_complement_sum(&header.encode(), 0);
    let sum = ones_complement_sum(&segment.payload, sum);
    !fold(sum)
}

fn ones_complement_sum(data: &[u8], mut sum: u32) -> u32 {
    let mut words = data.chunks_exact(2);
    for w in &mut words {
        sum += u32::from(u16::from_be_bytes([w[0], w[1]]));
        sum = u32::from(fold(sum));
    }
    if let [last] = words.remainder() {
        sum += u32::from(*last) << 8;
    }
    sum
}

fn fold(mut sum: u32) -> u16 {
    while sum >> 16 != 0 {
        sum = (sum & 0xffff) + (sum >> 16);
    }
    sum as u16
}

// ---------------------------------------------------------------------------
// Initial sequence numbers
// ---------------------------------------------------------------------------

/// Unpredictable 32-bit initial sequence number from the OS entropy source.
pub fn generate_initial_sequence_number() -> Result<u32> {
    initial_sequence_number_from(&mut OsRng)
}

/// Draw an initial sequence number from an arbitrary entropy source.
pub fn initial_sequence_number_from<R: RngCore + ?Sized>(rng: &mut R) -> Result<u32> {
    let mut bytes = [0u8; 4];
    rng.try_fill_bytes(&mut bytes)
        .map_err(|e| Error::EntropyUnavailable(e.to_string()))?;
    Ok(u32::from_be_bytes(bytes))
}
