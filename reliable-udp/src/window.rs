//! Sliding-window segment manager (send side).
//!
//! [`WindowManager`] owns an outbound byte stream, slices it into MSS-sized
//! segments and keeps at most `window_size` of them buffered in flight.
//!
//! # Protocol contract
//!
//! - [`fill_window`](WindowManager::fill_window) is the only place outbound
//!   data sequence numbers are minted.
//! - ACKs are **cumulative**: `ack = K` asserts every byte below `K` arrived.
//!   Entries fully covered by `K` are marked acknowledged and released.
//! - On timeout the first expired entry and everything after it is
//!   regenerated from the stream (go-back-N), never a single segment.
//! - Sequence numbers wrap at 2^32; all comparisons use [`crate::sequence`].
//!
//! This module only manages state; all socket I/O is the caller's
//! responsibility.
//!
//! ```text
//!   LAR                          LFS
//!    │                            │
//! ───┼────────────────────────────┼───────────────▶ seq space
//!    │<── buffered (≤ W segs) ───>│<── unsegmented stream ──>
//! ```

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use crate::config::{Config, MSS};
use crate::error::{Error, Result};
use crate::segment::{flags, Segment};
use crate::sequence::{seq_gt, seq_in_range, seq_le};

/// A buffered segment plus its retransmission timer.
#[derive(Debug, Clone)]
pub struct SegmentTimer {
    pub segment: Segment,
    /// Stream offset of the first payload byte.
    offset: usize,
    /// Time of the most recent transmission; `None` until first sent.
    pub sent_at: Option<Instant>,
    /// Set once a cumulative ACK covers the whole payload.
    pub acknowledged: bool,
    /// Transmissions of this copy of the segment.
    pub tx_count: u32,
}

impl SegmentTimer {
    fn expired(&self, now: Instant, timeout: Duration) -> bool {
        !self.acknowledged
            && self
                .sent_at
                .is_some_and(|sent| now.saturating_duration_since(sent) > timeout)
    }
}

/// Go-back-N send window for one connection.
#[derive(Debug)]
pub struct WindowManager {
    window_size: usize,
    mss: usize,
    retransmit_timeout: Duration,
    /// (source, destination) ports stamped on every data segment.
    ports: (u16, u16),

    stream: Vec<u8>,
    /// Offset of the first byte not yet segmented.
    cursor: usize,
    /// Sequence number assigned to the byte at `cursor`.
    next_seq: u32,

    /// Lowest unacknowledged sequence number.
    lar: u32,
    /// One past the last byte placed in flight.
    lfs: u32,

    /// In-flight segments ordered by sequence number (front = oldest).
    window: VecDeque<SegmentTimer>,

    /// Retransmission timeouts since the last ACK that made progress.
    consecutive_timeouts: u32,
}

impl WindowManager {
    /// Create an empty manager whose first data byte will carry `initial_seq`.
    pub fn new(initial_seq: u32, window_size: usize) -> Self {
        let defaults = Config::default();
        Self {
            window_size: window_size.max(1),
            mss: MSS,
            retransmit_timeout: defaults.retransmit_timeout(),
            ports: (0, 0),
            stream: Vec::new(),
            cursor: 0,
            next_seq: initial_seq,
            lar: initial_seq,
            lfs: initial_seq,
            window: VecDeque::with_capacity(window_size),
            consecutive_timeouts: 0,
        }
    }

    /// Manager sized and timed from `config`.
    pub fn from_config(initial_seq: u32, config: &Config) -> Self {
        Self::new(initial_seq, config.window_size)
            .with_mss(config.mss)
            .with_retransmit_timeout(config.retransmit_timeout())
    }

    pub fn with_mss(mut self, mss: usize) -> Self {
        self.mss = mss.max(1);
        self
    }

    pub fn with_retransmit_timeout(mut self, timeout: Duration) -> Self {
        self.retransmit_timeout = timeout;
        self
    }

    pub fn with_ports(mut self, src_port: u16, dst_port: u16) -> Self {
        self.ports = (src_port, dst_port);
        self
    }

    pub fn window_size(&self) -> usize {
        self.window_size
    }

    pub fn lar(&self) -> u32 {
        self.lar
    }

    pub fn lfs(&self) -> u32 {
        self.lfs
    }

    /// Sequence number the next newly segmented byte will receive.
    pub fn next_seq(&self) -> u32 {
        self.next_seq
    }

    /// Number of buffered (unacknowledged) segments.
    pub fn in_flight(&self) -> usize {
        self.window.len()
    }

    pub fn consecutive_timeouts(&self) -> u32 {
        self.consecutive_timeouts
    }

    /// `true` once every byte of the current stream has been acknowledged.
    pub fn is_finished(&self) -> bool {
        self.window.is_empty() && self.cursor >= self.stream.len()
    }

    /// Buffered segments, oldest first.
    pub fn entries(&self) -> impl Iterator<Item = &SegmentTimer> {
        self.window.iter()
    }

    /// Bind a new stream and fill the window from its first byte.
    ///
    /// An empty stream, or a new stream while the previous one still has
    /// segments in flight, is a caller error: it is logged and ignored.
    pub fn set_stream(&mut self, bytes: impl Into<Vec<u8>>) -> Result<()> {
        let bytes = bytes.into();
        if bytes.is_empty() {
            log::error!("[window] refusing empty stream");
            return Err(Error::CallerContract("stream must not be empty"));
        }
        if !self.window.is_empty() {
            log::error!("[window] refusing new stream: {} segment(s) in flight", self.window.len());
            return Err(Error::CallerContract("previous stream still in flight"));
        }
        self.stream = bytes;
        self.cursor = 0;
        self.consecutive_timeouts = 0;
        self.fill_window();
        Ok(())
    }

    /// Segment stream bytes until the window holds `window_size` entries or
    /// the stream is exhausted.
    pub fn fill_window(&mut self) {
        while self.window.len() < self.window_size && self.cursor < self.stream.len() {
            let end = (self.cursor + self.mss).min(self.stream.len());
            let chunk = self.stream[self.cursor..end].to_vec();
            let len = chunk.len() as u32;

            let mut segment = Segment::data(self.next_seq, chunk)
                .with_ports(self.ports.0, self.ports.1)
                .with_window(u16::try_from(self.window_size).unwrap_or(u16::MAX));
            if end == self.stream.len() {
                segment = segment.with_flags(flags::PSH);
            }

            self.window.push_back(SegmentTimer {
                segment,
                offset: self.cursor,
                sent_at: None,
                acknowledged: false,
                tx_count: 0,
            });

            self.cursor = end;
            self.next_seq = self.next_seq.wrapping_add(len);
            if seq_gt(self.next_seq, self.lfs) {
                self.lfs = self.next_seq;
            }
        }
    }

    /// Up to `count` buffered segments that still need (re)transmission, in
    /// sequence order.  Their timers start at `now`.
    ///
    /// Returns `None` when nothing is buffered at all.  An empty `Vec` means
    /// every buffered segment is already in flight awaiting an ACK.
    pub fn take_window(&mut self, count: usize, now: Instant) -> Option<Vec<Segment>> {
        if self.window.is_empty() {
            return None;
        }
        let batch = self
            .window
            .iter_mut()
            .filter(|e| e.sent_at.is_none())
            .take(count)
            .map(|e| {
                e.sent_at = Some(now);
                e.tx_count += 1;
                e.segment.clone()
            })
            .collect();
        Some(batch)
    }

    /// Apply a cumulative ACK.  Returns the number of segments released.
    ///
    /// ACKs at or below `LAR` (duplicates) and ACKs beyond `LFS` (for data
    /// never sent) leave the window untouched.
    pub fn handle_ack(&mut self, ack_num: u32) -> usize {
        if !seq_gt(ack_num, self.lar) {
            return 0;
        }
        if seq_gt(ack_num, self.lfs) {
            log::debug!("[window] ignoring ACK {ack_num} beyond LFS {}", self.lfs);
            return 0;
        }
        self.lar = ack_num;

        for entry in self.window.iter_mut() {
            if seq_le(entry.segment.end_seq(), ack_num) {
                entry.acknowledged = true;
            }
        }
        let mut released = 0;
        while self.window.front().is_some_and(|e| e.acknowledged) {
            self.window.pop_front();
            released += 1;
        }

        self.consecutive_timeouts = 0;
        self.fill_window();
        released
    }

    /// Detect a lost segment and rewind for go-back-N retransmission.
    ///
    /// The first unacknowledged entry older than the retransmit timeout and
    /// every entry after it are discarded; the stream cursor rewinds to that
    /// entry and the window is refilled, so the next
    /// [`take_window`](Self::take_window) resends them.
    pub fn check_timeouts(&mut self, now: Instant) -> bool {
        let timeout = self.retransmit_timeout;
        let Some(idx) = self.window.iter().position(|e| e.expired(now, timeout)) else {
            return false;
        };

        let lost = &self.window[idx];
        log::debug!(
            "[window] timeout {}: going back to S={} ({} segment(s))",
            lost.segment,
            lost.segment.seq(),
            self.window.len() - idx
        );
        self.cursor = lost.offset;
        self.next_seq = lost.segment.seq();
        self.window.truncate(idx);
        self.consecutive_timeouts += 1;
        self.fill_window();
        true
    }

    /// Earliest retransmission deadline among segments in flight.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.window
            .iter()
            .filter(|e| !e.acknowledged)
            .filter_map(|e| e.sent_at)
            .min()
            .map(|sent| sent + self.retransmit_timeout)
    }

    /// `seq` lies in `[LAR, LAR + W * MSS)`.
    pub fn is_in_window(&self, seq: u32) -> bool {
        let span = (self.window_size * self.mss).min(u32::MAX as usize) as u32;
        seq_in_range(seq, self.lar, span)
    }
}
