//! Fault-injecting transport for exercising the reliability machinery.
//!
//! [`LossyTransport`] wraps any [`Transport`] and applies a configurable
//! fault model to every outbound datagram:
//!
//! | Fault       | Description                                          |
//! |-------------|------------------------------------------------------|
//! | Scripted    | Drop the datagrams whose send index is listed.       |
//! | Loss        | Drop a datagram with probability `loss_rate`.        |
//! | Duplication | Deliver a datagram twice.                            |
//! | Corruption  | Flip one random bit before delivery.                 |
//!
//! Faults are drawn from a seeded RNG so a failing run can be replayed.
//! Receives pass straight through.

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::socket::Transport;

/// Fault-model parameters.  Probabilities are clamped to `[0.0, 1.0]`.
#[derive(Debug, Clone, Default)]
pub struct SimulatorConfig {
    pub loss_rate: f64,
    pub duplicate_rate: f64,
    pub corrupt_rate: f64,
    /// Zero-based indices of outbound datagrams to drop unconditionally.
    pub drop_sends: Vec<usize>,
    pub seed: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Fate {
    Deliver,
    Drop,
    Duplicate,
    Corrupt { byte: usize, bit: u8 },
}

/// Outbound datagram counters.
#[derive(Debug, Default)]
pub struct SimulatorStats {
    pub sent: AtomicUsize,
    pub dropped: AtomicUsize,
    pub duplicated: AtomicUsize,
    pub corrupted: AtomicUsize,
}

/// A [`Transport`] that loses, duplicates and corrupts outbound datagrams.
#[derive(Debug)]
pub struct LossyTransport<T> {
    inner: T,
    config: SimulatorConfig,
    rng: Mutex<StdRng>,
    pub stats: SimulatorStats,
}

impl<T: Transport> LossyTransport<T> {
    pub fn new(inner: T, config: SimulatorConfig) -> Self {
        let rng = Mutex::new(StdRng::seed_from_u64(config.seed));
        Self {
            inner,
            config,
            rng,
            stats: SimulatorStats::default(),
        }
    }

    pub fn into_inner(self) -> T {
        self.inner
    }

    fn fate(&self, len: usize) -> Fate {
        let index = self.stats.sent.fetch_add(1, Ordering::Relaxed);
        if self.config.drop_sends.contains(&index) {
            return Fate::Drop;
        }

        let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
        if rng.gen_bool(self.config.loss_rate.clamp(0.0, 1.0)) {
            Fate::Drop
        } else if rng.gen_bool(self.config.duplicate_rate.clamp(0.0, 1.0)) {
            Fate::Duplicate
        } else if len > 0 && rng.gen_bool(self.config.corrupt_rate.clamp(0.0, 1.0)) {
            Fate::Corrupt {
                byte: rng.gen_range(0..len),
                bit: rng.gen_range(0..8),
            }
        } else {
            Fate::Deliver
        }
    }
}

impl<T: Transport> Transport for LossyTransport<T> {
    fn local_addr(&self) -> io::Result<SocketAddr> {
        self.inner.local_addr()
    }

    async fn send_to(&self, buf: &[u8], dest: SocketAddr) -> io::Result<usize> {
        match self.fate(buf.len()) {
            Fate::Deliver => self.inner.send_to(buf, dest).await,
            Fate::Drop => {
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                log::trace!("[simulator] dropped {} byte(s) to {dest}", buf.len());
                Ok(buf.len())
            }
            Fate::Duplicate => {
                self.stats.duplicated.fetch_add(1, Ordering::Relaxed);
                self.inner.send_to(buf, dest).await?;
                self.inner.send_to(buf, dest).await
            }
            Fate::Corrupt { byte, bit } => {
                self.stats.corrupted.fetch_add(1, Ordering::Relaxed);
                let mut copy = buf.to_vec();
                copy[byte] ^= 1 << bit;
                self.inner.send_to(&copy, dest).await
            }
        }
    }

    async fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        self.inner.recv_from(buf).await
    }
}
