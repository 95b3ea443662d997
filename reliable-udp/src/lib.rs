//! `reliable-udp`: a TCP-like reliable, ordered byte stream over UDP.
//!
//! # Architecture
//!
//! ```text
//!  ┌──────────────┐  data segments  ┌──────────────┐
//!  │ WindowManager│────────────────▶│   Receiver   │
//!  │ (go-back-N)  │                 │  (in-order)  │
//!  └──────┬───────┘                 └──────┬───────┘
//!         │       cumulative ACKs          │
//!         │◀───────────────────────────────┘
//!         │
//!  ┌──────▼─────────────────────────────────────┐
//!  │                Connection                   │
//!  │  (handshake, send/recv loops, teardown FSM) │
//!  └──────┬─────────────────────────────────────┘
//!         │ header datagram + payload datagram
//!  ┌──────▼──────┐      ┌────────────────┐
//!  │   Socket    │  or  │ LossyTransport │
//!  └─────────────┘      └────────────────┘
//! ```
//!
//! Modules:
//! - [`segment`]: wire format, flags, checksum, initial sequence numbers
//! - [`sequence`]: wrap-aware sequence-number comparisons
//! - [`window`]: outbound sliding window with go-back-N retransmission
//! - [`receiver`]: inbound in-order cursor and cumulative ACK number
//! - [`state`]: connection FSM states
//! - [`connection`]: the state machine driving everything above
//! - [`socket`]: the datagram [`Transport`] seam and its UDP implementation
//! - [`simulator`]: fault-injecting transport for tests
//! - [`config`] and [`error`]

pub mod config;
pub mod connection;
pub mod error;
pub mod receiver;
pub mod segment;
pub mod sequence;
pub mod simulator;
pub mod socket;
pub mod state;
pub mod window;

pub use config::{Config, MSS};
pub use connection::Connection;
pub use error::{Error, Result};
pub use segment::Segment;
pub use socket::{Socket, Transport};
pub use state::ConnectionState;
pub use window::WindowManager;
