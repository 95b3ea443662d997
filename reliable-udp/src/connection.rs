//! Connection state machine: handshake, data transfer and teardown.
//!
//! A [`Connection`] owns everything for one logical association with a
//! single peer: the transport handle, the FSM state, the send window and the
//! receive cursor.  One task drives it; the only suspension points are
//! datagram sends and receives.
//!
//! Every phase is a loop over [`Event`]s produced by one receive-with-deadline
//! primitive, [`Connection::next_event`], matched against the current state.
//!
//! ```ignore
//! // Sender (passive open)
//! let mut conn = Connection::bind(addr, Config::default()).await?;
//! conn.listen()?;
//! conn.accept().await?;
//! conn.send(b"hello").await?;
//! conn.close().await?;
//!
//! // Receiver (active open)
//! let mut conn = Connection::bind(addr, Config::default()).await?;
//! conn.connect(peer).await?;
//! let data = conn.read_to_end().await?;
//! conn.close().await?;
//! ```

use std::io;
use std::net::SocketAddr;
use std::time::Instant;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::receiver::{Delivery, Receiver};
use crate::segment::{self, flags, generate_initial_sequence_number, Segment};
use crate::socket::{recv_segment, send_segment, Socket, Transport};
use crate::state::ConnectionState;
use crate::window::WindowManager;

/// Outcome of one bounded receive.
#[derive(Debug)]
enum Event {
    /// A well-formed, checksum-valid segment from an acceptable source.
    Segment(Segment, SocketAddr),
    /// The deadline passed with nothing received.
    Timeout,
    /// Something arrived but was unusable; already logged by the caller.
    Dropped(Error),
}

/// One reliable connection over a datagram transport.
pub struct Connection<T: Transport = Socket> {
    /// `None` once `close` has released the handle.
    transport: Option<T>,
    config: Config,
    state: ConnectionState,
    local_addr: SocketAddr,
    peer: Option<SocketAddr>,

    /// Local initial sequence number.
    iss: u32,
    window: WindowManager,
    receiver: Receiver,

    /// Last handshake segment we sent (SYN-ACK or final ACK), re-sent when
    /// the peer shows it never arrived.
    handshake_reply: Option<Segment>,
    /// FIN-ACK we answered the peer's FIN with.
    fin_reply: Option<Segment>,
}

impl Connection<Socket> {
    /// Bind a UDP socket to `local_addr` and wrap it in a closed connection.
    pub async fn bind(local_addr: SocketAddr, config: Config) -> Result<Self> {
        let socket = Socket::bind(local_addr).await?;
        Self::new(socket, config)
    }
}

impl<T: Transport> Connection<T> {
    /// Wrap `transport` in a connection in the `CLOSED` state.
    pub fn new(transport: T, config: Config) -> Result<Self> {
        let local_addr = transport.local_addr()?;
        let window = WindowManager::from_config(0, &config);
        Ok(Self {
            transport: Some(transport),
            config,
            state: ConnectionState::Closed,
            local_addr,
            peer: None,
            iss: 0,
            window,
            receiver: Receiver::new(0),
            handshake_reply: None,
            fin_reply: None,
        })
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Outbound window state.
    pub fn window(&self) -> &WindowManager {
        &self.window
    }

    /// Next sequence number expected from the peer.
    pub fn ack_number(&self) -> u32 {
        self.receiver.ack_number()
    }

    /// Borrow the underlying transport, if it has not been released.
    pub fn transport(&self) -> Option<&T> {
        self.transport.as_ref()
    }

    // -----------------------------------------------------------------------
    // Handshake
    // -----------------------------------------------------------------------

    /// `CLOSED → LISTEN`.
    pub fn listen(&mut self) -> Result<()> {
        self.io()?;
        if self.state != ConnectionState::Closed {
            return Err(Error::BadState(self.state));
        }
        self.state = ConnectionState::Listen;
        log::info!("[handshake] listening on {}", self.local_addr);
        Ok(())
    }

    /// Open the connection in whichever role the current state implies:
    /// passive from `LISTEN` (the peer is whoever sends a SYN), active
    /// towards `peer` from `CLOSED`.
    pub async fn handshake(&mut self, peer: SocketAddr) -> Result<()> {
        self.io()?;
        match self.state {
            ConnectionState::Listen => self.accept().await.map(|_| ()),
            ConnectionState::Closed => self.connect(peer).await,
            other => Err(Error::BadState(other)),
        }
    }

    /// Passive open: wait for a SYN, answer SYN-ACK, wait for the ACK.
    ///
    /// Returns the peer address once `ESTABLISHED`.  Waits forever unless
    /// [`Config::handshake_timeout`] is set.
    pub async fn accept(&mut self) -> Result<SocketAddr> {
        self.io()?;
        if self.state != ConnectionState::Listen {
            return Err(Error::BadState(self.state));
        }
        let give_up = self.config.handshake_timeout.map(|d| Instant::now() + d);
        let mut resend_at: Option<Instant> = None;
        let mut attempts = 0u32;

        while self.state != ConnectionState::Established {
            let event = self.next_event(earliest(give_up, resend_at)).await?;
            match (self.state, event) {
                (ConnectionState::Listen, Event::Segment(seg, from))
                    if seg.has(flags::SYN) && !seg.has(flags::ACK) =>
                {
                    log::info!("[handshake] ← SYN {seg} from {from}");
                    self.peer = Some(from);
                    self.iss = generate_initial_sequence_number()?;
                    self.receiver = Receiver::new(seg.seq().wrapping_add(1));

                    let reply = self.stamp(
                        segment::syn_ack(self.iss).with_ack_num(seg.seq().wrapping_add(1)),
                    );
                    self.transmit(&reply).await?;
                    log::info!("[handshake] → SYN-ACK {reply} to {from}");
                    self.handshake_reply = Some(reply);
                    self.state = ConnectionState::SynReceived;
                    attempts = 1;
                    resend_at = Some(Instant::now() + self.config.retransmit_timeout());
                }
                (ConnectionState::SynReceived, Event::Segment(seg, _))
                    if seg.has(flags::SYN) && !seg.has(flags::ACK) =>
                {
                    log::debug!("[handshake] ← duplicate SYN {seg}; repeating SYN-ACK");
                    self.resend_handshake_reply().await?;
                }
                (ConnectionState::SynReceived, Event::Segment(seg, from))
                    if seg.has(flags::ACK) && !seg.has(flags::SYN) =>
                {
                    if seg.ack_num() == self.iss.wrapping_add(1) {
                        log::info!("[handshake] ← ACK {seg} from {from}");
                        self.establish();
                    } else {
                        log::warn!(
                            "[handshake] ignoring ACK {} (expected {})",
                            seg.ack_num(),
                            self.iss.wrapping_add(1)
                        );
                    }
                }
                (_, Event::Segment(seg, from)) => {
                    log::debug!("[handshake] ignoring {seg} from {from} in {}", self.state);
                }
                (state, Event::Timeout) => {
                    let now = Instant::now();
                    if give_up.is_some_and(|d| now >= d) {
                        log::warn!("[handshake] no peer within the handshake timeout");
                        self.reset_to_listen();
                        return Err(Error::Timeout);
                    }
                    if state == ConnectionState::SynReceived {
                        if attempts >= self.config.max_syn_attempts {
                            log::warn!("[handshake] peer went silent; back to LISTEN");
                            self.reset_to_listen();
                            resend_at = None;
                        } else {
                            self.resend_handshake_reply().await?;
                            attempts += 1;
                            resend_at = Some(now + self.config.retransmit_timeout());
                        }
                    }
                }
                (_, Event::Dropped(e)) => log::debug!("[handshake] dropped: {e}"),
            }
        }
        self.peer.ok_or(Error::BadState(self.state))
    }

    /// Active open: send SYN, wait for SYN-ACK, answer ACK.
    ///
    /// The SYN is retransmitted every retransmit timeout; after
    /// [`Config::max_syn_attempts`] the open fails with
    /// [`Error::HandshakeFailed`] and the connection is back in `CLOSED`.
    pub async fn connect(&mut self, peer: SocketAddr) -> Result<()> {
        self.io()?;
        if self.state != ConnectionState::Closed {
            return Err(Error::BadState(self.state));
        }
        self.peer = Some(peer);
        self.iss = generate_initial_sequence_number()?;

        let syn = self.stamp(segment::syn(self.iss));
        self.transmit(&syn).await?;
        log::info!("[handshake] → SYN {syn} to {peer}");
        self.state = ConnectionState::SynSent;

        let mut attempts = 1u32;
        let mut deadline = Instant::now() + self.config.retransmit_timeout();

        while self.state != ConnectionState::Established {
            match self.next_event(Some(deadline)).await? {
                Event::Segment(seg, _) if seg.has(flags::SYN_ACK) => {
                    if seg.ack_num() != self.iss.wrapping_add(1) {
                        log::warn!(
                            "[handshake] ignoring SYN-ACK acknowledging {} (expected {})",
                            seg.ack_num(),
                            self.iss.wrapping_add(1)
                        );
                        continue;
                    }
                    log::info!("[handshake] ← SYN-ACK {seg} from {peer}");
                    self.receiver = Receiver::new(seg.seq().wrapping_add(1));
                    let ack = self.stamp(segment::ack(
                        self.iss.wrapping_add(1),
                        self.receiver.ack_number(),
                    ));
                    self.transmit(&ack).await?;
                    log::info!("[handshake] → ACK {ack} to {peer}");
                    self.handshake_reply = Some(ack);
                    self.establish();
                }
                Event::Segment(seg, _) => {
                    log::debug!("[handshake] ignoring {seg} in SYN_SENT");
                }
                Event::Timeout => {
                    if attempts >= self.config.max_syn_attempts {
                        log::warn!("[handshake] no SYN-ACK after {attempts} attempt(s)");
                        self.state = ConnectionState::Closed;
                        self.peer = None;
                        return Err(Error::HandshakeFailed { attempts });
                    }
                    attempts += 1;
                    self.transmit(&syn).await?;
                    log::debug!("[handshake] → SYN {syn} (attempt {attempts})");
                    deadline = Instant::now() + self.config.retransmit_timeout();
                }
                Event::Dropped(e) => log::debug!("[handshake] dropped: {e}"),
            }
        }
        Ok(())
    }

    fn establish(&mut self) {
        let (src, dst) = self.ports();
        self.window = WindowManager::from_config(self.iss.wrapping_add(1), &self.config)
            .with_ports(src, dst);
        self.state = ConnectionState::Established;
        log::info!(
            "[handshake] ESTABLISHED with {} (ISS={}, peer next={})",
            self.peer.map_or_else(|| "?".to_string(), |p| p.to_string()),
            self.iss,
            self.receiver.ack_number()
        );
    }

    fn reset_to_listen(&mut self) {
        self.state = ConnectionState::Listen;
        self.peer = None;
        self.handshake_reply = None;
    }

    // -----------------------------------------------------------------------
    // Data transfer
    // -----------------------------------------------------------------------

    /// Reliably deliver `data` to the peer.
    ///
    /// Returns once every byte is acknowledged.
    ///
    /// # Errors
    ///
    /// - [`Error::PeerClosed`] when the peer's FIN arrives before the last
    ///   byte is acknowledged; the FIN is answered and the connection is in
    ///   `CLOSE_WAIT`.
    /// - [`Error::CallerContract`] for an empty `data` (nothing is sent).
    /// - [`Error::RetriesExceeded`] after too many timeouts without progress.
    /// - [`Error::Transport`] on a socket failure.
    pub async fn send(&mut self, data: &[u8]) -> Result<()> {
        self.io()?;
        if self.state != ConnectionState::Established {
            return Err(Error::BadState(self.state));
        }
        let peer = self.peer()?;
        let start = self.window.next_seq();
        self.window.set_stream(data)?;
        log::info!("[established] sending {} byte(s) to {peer}", data.len());

        let width = self.window.window_size();
        while let Some(batch) = self.window.take_window(width, Instant::now()) {
            for seg in &batch {
                self.transmit(seg).await?;
                log::debug!("[established] → {seg}");
            }

            // One reply per segment in flight, until progress or a deadline.
            let mut replies = self.window.in_flight();
            while replies > 0 {
                match self.next_event(self.window.next_deadline()).await? {
                    Event::Segment(seg, _) if seg.has(flags::FIN) => {
                        log::info!("[closing] ← FIN {seg} while sending");
                        self.answer_fin(&seg).await?;
                        self.state = ConnectionState::CloseWait;
                        let acknowledged = self.window.lar().wrapping_sub(start) as usize;
                        log::warn!(
                            "[closing] peer closed after {acknowledged} of {} byte(s)",
                            data.len()
                        );
                        return Err(Error::PeerClosed { acknowledged });
                    }
                    Event::Segment(seg, _) if seg.has(flags::SYN_ACK) => {
                        self.resend_handshake_reply().await?;
                    }
                    Event::Segment(seg, _) if seg.has(flags::ACK) => {
                        replies -= 1;
                        let released = self.window.handle_ack(seg.ack_num());
                        log::debug!(
                            "[established] ← {seg} released={released} LAR={}",
                            self.window.lar()
                        );
                        if released > 0 {
                            break;
                        }
                    }
                    Event::Segment(seg, _) => {
                        replies -= 1;
                        log::debug!("[established] ignoring {seg} while sending");
                    }
                    Event::Timeout => break,
                    Event::Dropped(e) => log::debug!("[established] dropped: {e}"),
                }
            }

            if self.window.check_timeouts(Instant::now())
                && self.window.consecutive_timeouts() > self.config.max_retransmissions
            {
                log::warn!(
                    "[established] giving up after {} timeouts at LAR={}",
                    self.window.consecutive_timeouts(),
                    self.window.lar()
                );
                return Err(Error::RetriesExceeded);
            }
        }

        log::info!("[established] all {} byte(s) acknowledged", data.len());
        Ok(())
    }

    /// Receive one message (a stream written by one `send` on the peer),
    /// appending at most `length` bytes to `buf`.
    ///
    /// Returns the number of bytes appended, which is less than the message
    /// when `length` runs out first; the next call continues the same
    /// message.  `0` means the peer closed: its FIN was answered and the
    /// connection is in `LAST_ACK`.  A `LISTEN`ing connection completes the
    /// passive open first.
    ///
    /// [`Config::recv_timeout`] bounds the silence between accepted segments.
    pub async fn recv(&mut self, buf: &mut Vec<u8>, length: usize) -> Result<usize> {
        self.io()?;
        if length == 0 {
            return Err(Error::CallerContract("receive length must not be zero"));
        }
        match self.state {
            ConnectionState::Listen => {
                self.accept().await?;
            }
            ConnectionState::Established => {}
            state if state.peer_closed() => return Ok(0),
            state => return Err(Error::BadState(state)),
        }

        let mss = self.config.mss;
        let mut total = 0usize;
        let mut deadline = self.config.recv_timeout.map(|d| Instant::now() + d);
        loop {
            match self.next_event(deadline).await? {
                Event::Segment(seg, _) if !seg.payload.is_empty() => {
                    let len = seg.payload.len();
                    if len > length - total {
                        log::warn!(
                            "[established] {seg} does not fit the {} byte(s) left",
                            length - total
                        );
                        continue;
                    }
                    let delivery = self.receiver.on_segment(seg.seq(), len);
                    let ack = self.stamp(segment::ack(
                        self.window.next_seq(),
                        self.receiver.ack_number(),
                    ));
                    self.transmit(&ack).await?;

                    if delivery != Delivery::Accepted {
                        log::debug!("[established] ← {seg} {delivery:?}; → {ack}");
                        continue;
                    }
                    log::debug!("[established] ← {seg}; → {ack}");
                    buf.extend_from_slice(&seg.payload);
                    total += len;

                    if total == length || seg.has(flags::PSH) || len < mss {
                        break;
                    }
                    deadline = self.config.recv_timeout.map(|d| Instant::now() + d);
                }
                Event::Segment(seg, _) if seg.has(flags::FIN) => {
                    log::info!("[closing] ← FIN {seg}");
                    self.answer_fin(&seg).await?;
                    self.state = ConnectionState::LastAck;
                    break;
                }
                Event::Segment(seg, _) if seg.has(flags::SYN_ACK) => {
                    self.resend_handshake_reply().await?;
                }
                Event::Segment(seg, _) => {
                    log::debug!("[established] ignoring {seg} while receiving");
                }
                Event::Timeout => return Err(Error::Timeout),
                Event::Dropped(e) => log::debug!("[established] dropped: {e}"),
            }
        }
        Ok(total)
    }

    /// Receive messages until the peer closes, returning all bytes.
    pub async fn read_to_end(&mut self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        loop {
            let room = usize::MAX - out.len();
            if self.recv(&mut out, room).await? == 0 {
                return Ok(out);
            }
        }
    }

    // -----------------------------------------------------------------------
    // Teardown
    // -----------------------------------------------------------------------

    /// Close the connection and release the transport.
    ///
    /// From `ESTABLISHED` this is an active close (FIN, wait for FIN-ACK);
    /// from `CLOSE_WAIT`/`LAST_ACK` it waits for the peer's final ACK.  Each
    /// wait is bounded by the teardown timeout.  The state always ends
    /// `CLOSED` and calling again is a no-op.
    ///
    /// An active close whose FIN is never answered is aborted with
    /// [`Error::Timeout`].  A missing final ACK on the passive side is only
    /// logged: the peer has already closed.
    pub async fn close(&mut self) -> Result<()> {
        let outcome = match self.state {
            _ if self.transport.is_none() => Ok(()),
            ConnectionState::Established => self.active_close().await,
            ConnectionState::CloseWait | ConnectionState::LastAck => self.passive_close().await,
            _ => Ok(()),
        };

        if self.transport.take().is_some() {
            log::info!("[closing] connection to {:?} closed", self.peer);
        }
        self.state = ConnectionState::Closed;
        self.window = WindowManager::from_config(self.window.next_seq(), &self.config);
        self.handshake_reply = None;
        self.fin_reply = None;
        outcome
    }

    async fn active_close(&mut self) -> Result<()> {
        let fin_seq = self.window.next_seq();
        let fin = self.stamp(
            segment::fin()
                .with_seq(fin_seq)
                .with_ack_num(self.receiver.ack_number()),
        );
        self.state = ConnectionState::FinWait1;
        self.transmit(&fin).await?;
        log::info!("[closing] → FIN {fin}");

        let give_up = Instant::now() + self.config.teardown_timeout();
        let mut resend_at = Instant::now() + self.config.payload_timeout();

        loop {
            let event = self.next_event(Some(resend_at.min(give_up))).await?;
            match (self.state, event) {
                (ConnectionState::FinWait1, Event::Segment(seg, _)) if seg.has(flags::FIN_ACK) => {
                    log::info!("[closing] ← FIN-ACK {seg}");
                    self.final_ack(fin_seq, &seg).await?;
                    return Ok(());
                }
                (ConnectionState::FinWait1, Event::Segment(seg, _)) if seg.has(flags::FIN) => {
                    log::info!("[closing] ← FIN {seg} (simultaneous close)");
                    let ack = self.stamp(segment::ack(
                        fin_seq.wrapping_add(1),
                        seg.seq().wrapping_add(1),
                    ));
                    self.transmit(&ack).await?;
                    self.state = ConnectionState::Closing;
                }
                (ConnectionState::FinWait1, Event::Segment(seg, _))
                    if acks_fin(&seg, fin_seq) =>
                {
                    log::info!("[closing] ← ACK {seg}; waiting for peer FIN");
                    self.state = ConnectionState::FinWait2;
                }
                (ConnectionState::FinWait2, Event::Segment(seg, _)) if seg.has(flags::FIN) => {
                    log::info!("[closing] ← FIN {seg}");
                    self.final_ack(fin_seq, &seg).await?;
                    return Ok(());
                }
                (ConnectionState::Closing, Event::Segment(seg, _)) if acks_fin(&seg, fin_seq) => {
                    log::info!("[closing] ← ACK {seg}");
                    self.state = ConnectionState::TimeWait;
                    return Ok(());
                }
                (_, Event::Segment(seg, _)) if !seg.payload.is_empty() => {
                    // The peer is still retransmitting; keep its window moving.
                    self.receiver.on_segment(seg.seq(), seg.payload.len());
                    let ack = self.stamp(segment::ack(fin_seq, self.receiver.ack_number()));
                    self.transmit(&ack).await?;
                }
                (_, Event::Segment(seg, _)) => {
                    log::debug!("[closing] ignoring {seg} in {}", self.state);
                }
                (state, Event::Timeout) => {
                    let now = Instant::now();
                    if now >= give_up {
                        log::warn!("[closing] teardown timed out in {state}; aborting");
                        return Err(Error::Timeout);
                    }
                    if matches!(state, ConnectionState::FinWait1 | ConnectionState::Closing) {
                        self.transmit(&fin).await?;
                        log::debug!("[closing] → FIN {fin} (again)");
                    }
                    resend_at = now + self.config.payload_timeout();
                }
                (_, Event::Dropped(e)) => log::debug!("[closing] dropped: {e}"),
            }
        }
    }

    /// Acknowledge the peer's FIN (or FIN-ACK) and pass through `TIME_WAIT`.
    async fn final_ack(&mut self, fin_seq: u32, peer_fin: &Segment) -> Result<()> {
        self.state = ConnectionState::TimeWait;
        let ack = self.stamp(segment::ack(
            fin_seq.wrapping_add(1),
            peer_fin.seq().wrapping_add(1),
        ));
        self.transmit(&ack).await?;
        log::info!("[closing] → ACK {ack}");
        Ok(())
    }

    async fn passive_close(&mut self) -> Result<()> {
        let give_up = Instant::now() + self.config.teardown_timeout();
        loop {
            match self.next_event(Some(give_up)).await? {
                Event::Segment(seg, _) if seg.has(flags::FIN) => {
                    log::debug!("[closing] ← FIN {seg} again; repeating FIN-ACK");
                    if let Some(reply) = self.fin_reply.clone() {
                        self.transmit(&reply).await?;
                    }
                }
                Event::Segment(seg, _) if self.is_final_ack(&seg) => {
                    log::info!("[closing] ← final ACK {seg}");
                    return Ok(());
                }
                Event::Segment(seg, _) => {
                    log::debug!("[closing] ignoring {seg} in {}", self.state);
                }
                Event::Timeout => {
                    log::warn!("[closing] no final ACK in {}; closing anyway", self.state);
                    return Ok(());
                }
                Event::Dropped(e) => log::debug!("[closing] dropped: {e}"),
            }
        }
    }

    fn is_final_ack(&self, seg: &Segment) -> bool {
        match &self.fin_reply {
            Some(reply) => acks_fin(seg, reply.seq()),
            None => seg.has(flags::ACK),
        }
    }

    /// Answer a peer FIN with FIN-ACK and remember it for retransmission.
    async fn answer_fin(&mut self, fin: &Segment) -> Result<()> {
        let reply = self.stamp(
            segment::fin_ack()
                .with_seq(self.window.next_seq())
                .with_ack_num(fin.seq().wrapping_add(1)),
        );
        self.transmit(&reply).await?;
        log::info!("[closing] → FIN-ACK {reply}");
        self.fin_reply = Some(reply);
        Ok(())
    }

    // -----------------------------------------------------------------------
    // I/O helpers
    // -----------------------------------------------------------------------

    fn io(&self) -> Result<&T> {
        self.transport.as_ref().ok_or(Error::Released)
    }

    fn peer(&self) -> Result<SocketAddr> {
        self.peer.ok_or(Error::BadState(self.state))
    }

    fn ports(&self) -> (u16, u16) {
        (self.local_addr.port(), self.peer.map_or(0, |p| p.port()))
    }

    /// Fill in the port fields of a control segment.
    fn stamp(&self, segment: Segment) -> Segment {
        let (src, dst) = self.ports();
        segment
            .with_ports(src, dst)
            .with_window(u16::try_from(self.config.window_size).unwrap_or(u16::MAX))
    }

    async fn transmit(&self, segment: &Segment) -> Result<()> {
        send_segment(self.io()?, segment, self.peer()?).await
    }

    async fn resend_handshake_reply(&self) -> Result<()> {
        if let Some(reply) = &self.handshake_reply {
            self.transmit(reply).await?;
            log::debug!("[handshake] → {reply} (again)");
        }
        Ok(())
    }

    /// Wait for the next segment until `deadline` (`None` waits forever).
    ///
    /// Unusable datagrams become [`Event::Dropped`]; only fatal transport
    /// failures are returned as errors.
    async fn next_event(&self, deadline: Option<Instant>) -> Result<Event> {
        let wait = deadline.map(|d| d.saturating_duration_since(Instant::now()));
        match recv_segment(self.io()?, wait, self.config.payload_timeout()).await {
            Ok((seg, from)) => match self.peer {
                Some(peer) if peer != from && self.state != ConnectionState::Listen => {
                    Ok(Event::Dropped(Error::ProtocolViolation(format!(
                        "segment from {from}, expected {peer}"
                    ))))
                }
                _ => Ok(Event::Segment(seg, from)),
            },
            Err(Error::Timeout) => Ok(Event::Timeout),
            Err(e) if e.is_recoverable() => Ok(Event::Dropped(e)),
            Err(Error::Transport(e)) if is_transient_io_error(&e) => {
                Ok(Event::Dropped(Error::Transport(e)))
            }
            Err(e) => Err(e),
        }
    }
}

/// Bare ACK (no SYN/FIN) acknowledging a FIN sent at `fin_seq`.
fn acks_fin(seg: &Segment, fin_seq: u32) -> bool {
    seg.has(flags::ACK)
        && !seg.has(flags::FIN)
        && !seg.has(flags::SYN)
        && seg.ack_num() == fin_seq.wrapping_add(1)
}

fn earliest(a: Option<Instant>, b: Option<Instant>) -> Option<Instant> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, None) => a,
        (None, b) => b,
    }
}

/// ICMP-induced errors a UDP socket may report for an earlier send.
fn is_transient_io_error(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionRefused
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::Interrupted
    )
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    async fn closed() -> Connection {
        Connection::bind("127.0.0.1:0".parse().unwrap(), Config::default())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn starts_closed() {
        let conn = closed().await;
        assert_eq!(conn.state(), ConnectionState::Closed);
        assert!(conn.peer_addr().is_none());
    }

    #[tokio::test]
    async fn listen_only_from_closed() {
        let mut conn = closed().await;
        conn.listen().unwrap();
        assert_eq!(conn.state(), ConnectionState::Listen);
        assert!(matches!(conn.listen(), Err(Error::BadState(ConnectionState::Listen))));
    }

    #[tokio::test]
    async fn send_requires_established() {
        let mut conn = closed().await;
        assert!(matches!(
            conn.send(b"data").await,
            Err(Error::BadState(ConnectionState::Closed))
        ));
    }

    #[tokio::test]
    async fn recv_requires_a_connection() {
        let mut conn = closed().await;
        let mut buf = Vec::new();
        assert!(matches!(
            conn.recv(&mut buf, 10).await,
            Err(Error::BadState(ConnectionState::Closed))
        ));
    }

    #[tokio::test]
    async fn close_is_idempotent_and_releases() {
        let mut conn = closed().await;
        conn.close().await.unwrap();
        conn.close().await.unwrap();
        assert_eq!(conn.state(), ConnectionState::Closed);
        assert!(conn.transport().is_none());
        assert!(matches!(conn.listen(), Err(Error::Released)));
        assert!(matches!(conn.send(b"late").await, Err(Error::Released)));
        let mut buf = Vec::new();
        assert!(matches!(conn.recv(&mut buf, 10).await, Err(Error::Released)));
    }

    #[tokio::test]
    async fn passive_open_times_out_when_configured() {
        let config = Config::default().with_handshake_timeout(Some(Duration::from_millis(50)));
        let mut conn = Connection::bind("127.0.0.1:0".parse().unwrap(), config)
            .await
            .unwrap();
        conn.listen().unwrap();
        assert!(matches!(conn.accept().await, Err(Error::Timeout)));
        assert_eq!(conn.state(), ConnectionState::Listen);
    }

    #[tokio::test]
    async fn zero_length_recv_is_rejected() {
        let mut conn = closed().await;
        let mut buf = Vec::new();
        assert!(matches!(
            conn.recv(&mut buf, 0).await,
            Err(Error::CallerContract(_))
        ));
    }

    #[tokio::test]
    async fn advertised_window_saturates() {
        let config = Config::default().with_window_size(100_000);
        let conn = Connection::bind("127.0.0.1:0".parse().unwrap(), config)
            .await
            .unwrap();
        assert_eq!(conn.stamp(segment::syn(1)).header.window, u16::MAX);
    }

    #[test]
    fn fin_ack_detection() {
        let ack = segment::ack(1, 101);
        assert!(acks_fin(&ack, 100));
        assert!(!acks_fin(&ack, 99));
        assert!(!acks_fin(&segment::fin_ack().with_ack_num(101), 100));
    }

    #[test]
    fn earliest_deadline() {
        let now = Instant::now();
        let later = now + Duration::from_secs(1);
        assert_eq!(earliest(Some(now), Some(later)), Some(now));
        assert_eq!(earliest(None, Some(later)), Some(later));
        assert_eq!(earliest(None, None), None);
    }
}
