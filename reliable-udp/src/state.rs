//! Connection finite-state machine (FSM) states.
//!
//! Transitions live in [`crate::connection`]; this module only names the
//! states and answers simple questions about them.
//!
//! ```text
//!  CLOSED ──listen──▶ LISTEN ──SYN / SYN-ACK──▶ SYN_RECEIVED ──ACK──▶ ESTABLISHED
//!  CLOSED ──SYN────▶ SYN_SENT ──SYN-ACK / ACK──────────────────────▶ ESTABLISHED
//!
//!  ESTABLISHED ──FIN──▶ FIN_WAIT_1 ──FIN-ACK / ACK──▶ TIME_WAIT ──▶ CLOSED
//!                           │ ACK                        ▲
//!                           ▼                            │
//!                       FIN_WAIT_2 ──FIN / ACK───────────┤
//!                           │ FIN / ACK (simultaneous)   │
//!                           ▼                            │
//!                        CLOSING ──ACK───────────────────┘
//!
//!  ESTABLISHED ──peer FIN / FIN-ACK──▶ CLOSE_WAIT ──ACK or timeout──▶ CLOSED
//!  ESTABLISHED ──peer FIN / FIN-ACK──▶ LAST_ACK   ──ACK or timeout──▶ CLOSED
//! ```
//!
//! CLOSE_WAIT is entered by a sending endpoint interrupted by the peer's
//! FIN; LAST_ACK by a receiving endpoint that sees FIN after its data.

use std::fmt;

/// All possible states of the connection FSM.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionState {
    /// No connection; initial and final state.
    #[default]
    Closed,
    /// Bound and waiting for a SYN.
    Listen,
    /// SYN sent; waiting for SYN-ACK.
    SynSent,
    /// SYN received and SYN-ACK sent; waiting for ACK.
    SynReceived,
    /// Handshake complete; data may flow.
    Established,
    /// Local FIN sent; waiting for the peer's FIN-ACK.
    FinWait1,
    /// Local FIN acknowledged; waiting for the peer's FIN.
    FinWait2,
    /// Peer's FIN received and answered; waiting for the final ACK.
    CloseWait,
    /// Both sides sent FIN at once; waiting for the ACK of ours.
    Closing,
    /// FIN-ACK sent after the peer's FIN; waiting for the final ACK.
    LastAck,
    /// Final ACK sent; the connection is about to close.
    TimeWait,
}

impl ConnectionState {
    /// `true` while the active-close sequence is in progress.
    pub fn is_closing(self) -> bool {
        matches!(
            self,
            Self::FinWait1 | Self::FinWait2 | Self::Closing | Self::TimeWait
        )
    }

    /// `true` when the peer has already sent its FIN.
    pub fn peer_closed(self) -> bool {
        matches!(self, Self::CloseWait | Self::LastAck)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Closed => "CLOSED",
            Self::Listen => "LISTEN",
            Self::SynSent => "SYN_SENT",
            Self::SynReceived => "SYN_RECEIVED",
            Self::Established => "ESTABLISHED",
            Self::FinWait1 => "FIN_WAIT_1",
            Self::FinWait2 => "FIN_WAIT_2",
            Self::CloseWait => "CLOSE_WAIT",
            Self::Closing => "CLOSING",
            Self::LastAck => "LAST_ACK",
            Self::TimeWait => "TIME_WAIT",
        };
        f.write_str(name)
    }
}
