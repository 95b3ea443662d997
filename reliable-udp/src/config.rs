//! Tunable engine parameters.
//!
//! All protocol deadlines are multiples of a base [`Config::time_unit`]
//! (one second by default).  Tests shrink the unit to keep wall-clock time
//! low without changing the ratios between deadlines.

use std::time::Duration;

/// Maximum segment payload size in bytes.
pub const MSS: usize = 1460;

/// Default number of segments allowed in flight.
pub const DEFAULT_WINDOW_SIZE: usize = 3;

/// Retransmit timeout, in time units.
const RETRANSMIT_UNITS: u32 = 5;
/// Secondary wait for a payload datagram, in time units.
const PAYLOAD_UNITS: u32 = 1;
/// Teardown wait (FIN-ACK / final ACK), in time units.
const TEARDOWN_UNITS: u32 = 5;

/// Connection configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Segments allowed in flight simultaneously (W).
    pub window_size: usize,
    /// Maximum payload bytes per segment.
    pub mss: usize,
    /// Base time unit every deadline is expressed in.
    pub time_unit: Duration,
    /// Consecutive retransmission timeouts tolerated without progress.
    pub max_retransmissions: u32,
    /// SYN transmissions attempted by an active open before giving up.
    pub max_syn_attempts: u32,
    /// How long a passive open waits for a peer; `None` waits forever.
    pub handshake_timeout: Option<Duration>,
    /// Longest silence tolerated while waiting for data; `None` waits forever.
    pub recv_timeout: Option<Duration>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            window_size: DEFAULT_WINDOW_SIZE,
            mss: MSS,
            time_unit: Duration::from_secs(1),
            max_retransmissions: 6,
            max_syn_attempts: 6,
            handshake_timeout: None,
            recv_timeout: None,
        }
    }
}

impl Config {
    pub fn with_window_size(mut self, window_size: usize) -> Self {
        self.window_size = window_size.max(1);
        self
    }

    pub fn with_mss(mut self, mss: usize) -> Self {
        self.mss = mss.max(1);
        self
    }

    pub fn with_time_unit(mut self, time_unit: Duration) -> Self {
        self.time_unit = time_unit;
        self
    }

    pub fn with_max_retransmissions(mut self, max: u32) -> Self {
        self.max_retransmissions = max;
        self
    }

    pub fn with_max_syn_attempts(mut self, max: u32) -> Self {
        self.max_syn_attempts = max.max(1);
        self
    }

    pub fn with_handshake_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    pub fn with_recv_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.recv_timeout = timeout;
        self
    }

    /// Age after which an unacknowledged segment counts as lost.
    pub fn retransmit_timeout(&self) -> Duration {
        self.time_unit * RETRANSMIT_UNITS
    }

    /// Wait for the payload datagram that follows a header.
    pub fn payload_timeout(&self) -> Duration {
        self.time_unit * PAYLOAD_UNITS
    }

    /// Deadline for each teardown wait.
    pub fn teardown_timeout(&self) -> Duration {
        self.time_unit * TEARDOWN_UNITS
    }
}
