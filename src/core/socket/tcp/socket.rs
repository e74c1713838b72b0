use std::cmp;
use std::rc::Rc;
use std::time::Instant;

use rand;

use crate::{
    Error,
    Result,
};
use crate::core::repr::{
    IpAddress,
    IpProtocol,
    IpRepr,
    Ipv4Repr,
    Ipv6Repr,
    TcpRepr,
};
use crate::core::socket::tcp::{
    SeqNum,
    Tcb,
    TcpState,
    TxKind,
    TxSegment,
    DEFAULT_MSS,
    FIN_WAIT_2_TIMEOUT,
    MAX_RETRIES,
    MAX_RTO,
    PERSIST_INTERVAL,
    TIME_WAIT_TIMEOUT,
};
use crate::core::socket::{
    AddrLease,
    SocketAddr,
};
use crate::core::time::Env;

/// Shared information across a socket's lifetime.
#[derive(Debug)]
pub struct TcpContext {
    pub binding: AddrLease,
    pub interface_mtu: usize,
    pub time_env: Rc<dyn Env>,
}

/// A TCP socket owning one connection's full control block.
///
/// The socket never transmits on its own. The owner drains outgoing
/// segments with send_dequeue, feeds incoming segments with recv_enqueue,
/// and drives every timer by calling tick against the shared clock.
#[derive(Debug)]
pub struct TcpSocket {
    context: TcpContext,
    state: TcpState,
    peer: Option<SocketAddr>,
    tcb: Tcb,
    /// (seq, ack) of a reset queued for one-shot transmission.
    rst_pending: Option<(SeqNum, Option<SeqNum>)>,
    /// Why the connection died, surfaced through subsequent user calls.
    fate: Option<Error>,
    /// The peer's FIN was processed; reads drain to end-of-stream.
    rx_closed: bool,
    nagle_enabled: bool,
}

impl TcpSocket {
    /// Creates a new TCP socket.
    pub fn new<T: 'static + Env>(
        binding: AddrLease,
        interface_mtu: usize,
        time_env: T,
    ) -> TcpSocket {
        let context = TcpContext {
            binding,
            interface_mtu,
            time_env: Rc::new(time_env),
        };
        TcpSocket {
            tcb: Tcb::new(SeqNum(0), DEFAULT_MSS),
            context,
            state: TcpState::Closed,
            peer: None,
            rst_pending: None,
            fate: None,
            rx_closed: false,
            nagle_enabled: true,
        }
    }

    pub fn state(&self) -> TcpState {
        self.state
    }

    /// Checks if the socket is closed. The socket may be closed for reasons
    /// including an explicit close, timeout, reset, etc.
    pub fn is_closed(&self) -> bool {
        self.state == TcpState::Closed
    }

    /// Checks if the socket is in the middle of a handshake.
    pub fn is_establishing(&self) -> bool {
        match self.state {
            TcpState::SynSent | TcpState::SynReceived => true,
            _ => false,
        }
    }

    /// Checks if the socket has connected to an endpoint.
    pub fn is_connected(&self) -> bool {
        self.state == TcpState::Established
    }

    /// Disables or re-enables Nagle send batching.
    pub fn set_nagle(&mut self, enabled: bool) {
        self.nagle_enabled = enabled;
    }

    /// Initiates a connection to a TCP endpoint.
    pub fn connect(&mut self, socket_addr: SocketAddr) -> Result<()> {
        match self.state {
            TcpState::Closed => {}
            _ => return Err(Error::InvalidState),
        }
        if !families_match(&self.context.binding.addr, &socket_addr.addr) {
            return Err(Error::InvalidState);
        }

        let now = self.context.time_env.now_instant();
        let iss = SeqNum(rand::random::<u32>());
        let mut tcb = Tcb::new(iss, cmp::min(DEFAULT_MSS, self.mss_ceiling()));
        tcb.sack_enabled = true;
        tcb.tx_queue.push_back(TxSegment {
            kind: TxKind::Syn,
            seq: iss,
            data_len: 0,
            push: false,
            sent_at: now,
            retries: 0,
            retransmitted: false,
            needs_tx: true,
        });
        tcb.send.nxt = iss + 1;
        tcb.rto_deadline = Some(now + tcb.rtt.rto());

        self.tcb = tcb;
        self.peer = Some(socket_addr);
        self.fate = None;
        self.rx_closed = false;
        self.set_state(TcpState::SynSent);
        Ok(())
    }

    /// Starts accepting a connection request on the bound address.
    pub fn listen(&mut self) -> Result<()> {
        match self.state {
            TcpState::Closed => {}
            _ => return Err(Error::InvalidState),
        }

        self.tcb = Tcb::new(SeqNum(0), DEFAULT_MSS);
        self.peer = None;
        self.fate = None;
        self.rx_closed = false;
        self.set_state(TcpState::Listen);
        Ok(())
    }

    /// Queues bytes for sending, returning how many fit in the send
    /// buffer.
    pub fn send_slice(&mut self, data: &[u8]) -> Result<usize> {
        if let Some(err) = self.fate {
            return Err(err);
        }
        match self.state {
            TcpState::SynSent
            | TcpState::SynReceived
            | TcpState::Established
            | TcpState::CloseWait => {}
            _ => return Err(Error::InvalidState),
        }

        let len = self.tcb.send_queue.enqueue(data);
        if len == 0 && !data.is_empty() {
            Err(Error::Exhausted)
        } else {
            Ok(len)
        }
    }

    /// Reads received bytes in order, returning how many were copied. A
    /// return of 0 bytes signals the peer closed its side of the stream.
    pub fn recv_slice(&mut self, data: &mut [u8]) -> Result<usize> {
        if let Some(err) = self.fate {
            return Err(err);
        }

        let was_closed_window = self.tcb.recv_queue.window_size() == 0;
        let len = self.tcb.recv_queue.read(data);
        if len > 0 {
            if was_closed_window {
                // Reopening a closed receive window deserves an update.
                self.tcb.ack_pending = true;
            }
            Ok(len)
        } else if self.rx_closed {
            Ok(0)
        } else {
            match self.state {
                TcpState::Closed | TcpState::Listen => Err(Error::InvalidState),
                _ => Err(Error::Exhausted),
            }
        }
    }

    /// Closes the sending side of the connection gracefully. Queued data is
    /// still delivered before the FIN.
    pub fn close(&mut self) -> Result<()> {
        match self.state {
            TcpState::SynSent | TcpState::Listen => {
                self.teardown(None);
                Ok(())
            }
            TcpState::SynReceived | TcpState::Established => {
                self.tcb.fin_pending = true;
                self.set_state(TcpState::FinWait1);
                Ok(())
            }
            TcpState::CloseWait => {
                self.tcb.fin_pending = true;
                self.set_state(TcpState::LastAck);
                Ok(())
            }
            _ => Err(Error::InvalidState),
        }
    }

    /// Aborts the connection immediately, sending a reset if the peer ever
    /// synchronized with us.
    pub fn abort(&mut self) {
        if self.state.is_synchronized() {
            self.rst_pending = Some((self.tcb.send.nxt, Some(self.tcb.recv.nxt)));
        }
        self.teardown(None);
    }

    /// Checks if the socket accepts segments with particular (source,
    /// destination) addresses.
    pub fn accepts(&self, src_addr: &SocketAddr, dst_addr: &SocketAddr) -> bool {
        if *self.context.binding != *dst_addr {
            return false;
        }
        match self.state {
            TcpState::Closed => false,
            TcpState::Listen => families_match(&self.context.binding.addr, &src_addr.addr),
            _ => match self.peer {
                Some(ref peer) => peer == src_addr,
                None => false,
            },
        }
    }

    /// Enqueues a segment for receiving.
    pub fn recv_enqueue(
        &mut self,
        ip_repr: &IpRepr,
        tcp_repr: &TcpRepr,
        payload: &[u8],
    ) -> Result<()> {
        let src_addr = SocketAddr {
            addr: ip_repr.src_addr(),
            port: tcp_repr.src_port,
        };
        let dst_addr = SocketAddr {
            addr: ip_repr.dst_addr(),
            port: tcp_repr.dst_port,
        };
        if !self.accepts(&src_addr, &dst_addr) {
            return Err(Error::Ignored);
        }

        match self.state {
            TcpState::Closed => Err(Error::Ignored),
            TcpState::Listen => self.process_listen(&src_addr, tcp_repr),
            TcpState::SynSent => self.process_syn_sent(tcp_repr),
            _ => self.process_segment(tcp_repr, payload),
        }
    }

    /// Dequeues at most one segment enqueued for sending via function f.
    ///
    /// The segment is only dequeued if f does not return an error, so a
    /// send blocked on address resolution is retried on the next poll.
    pub fn send_dequeue<F, R>(&mut self, f: F) -> Result<R>
    where
        F: FnOnce(&IpRepr, &TcpRepr, &[u8]) -> Result<R>,
    {
        let now = self.context.time_env.now_instant();

        // A queued reset goes out first, even after teardown.
        if let Some((seq, ack)) = self.rst_pending {
            if let Some(peer) = self.peer {
                let mut tcp_repr = self.base_tcp_repr(peer, seq);
                tcp_repr.flags[TcpRepr::FLAG_RST] = true;
                match ack {
                    Some(ack) => {
                        tcp_repr.flags[TcpRepr::FLAG_ACK] = true;
                        tcp_repr.ack_num = ack.0;
                    }
                    None => tcp_repr.flags[TcpRepr::FLAG_ACK] = false,
                }
                let ip_repr = self.ip_repr_for(peer, tcp_repr.header_len());
                let res = f(&ip_repr, &tcp_repr, &[]);
                if res.is_ok() {
                    debug!(
                        "{} @ ({}, {}) sent RST (SEQ_NUM {}).",
                        self.state.as_str(),
                        self.context.binding,
                        peer,
                        seq
                    );
                    self.rst_pending = None;
                }
                return res;
            }
            self.rst_pending = None;
        }

        match self.state {
            TcpState::Closed | TcpState::Listen => return Err(Error::Exhausted),
            _ => {}
        }
        let peer = match self.peer {
            Some(peer) => peer,
            None => return Err(Error::Exhausted),
        };

        // Queued segments awaiting (re)transmission, oldest first. The
        // initial SYN and SYN + ACK are queued this way as well.
        if let Some(idx) = self
            .tcb
            .tx_queue
            .iter()
            .position(|segment| segment.needs_tx)
        {
            return self.emit_queued(now, peer, idx, f);
        }

        // New data, as the congestion and peer windows permit.
        let len = self.data_segment_len();
        if len > 0 {
            return self.emit_data(now, peer, len, f);
        }

        // FIN once every queued byte has been carved into a segment.
        if self.fin_ready() {
            return self.emit_fin(now, peer, f);
        }

        // Zero-window probe.
        if self.tcb.probe_pending && self.tcb.unsent_data() > 0 {
            return self.emit_probe(now, peer, f);
        }

        // Pure ACK or window update.
        if self.tcb.ack_pending {
            return self.emit_ack(peer, f);
        }

        Err(Error::Exhausted)
    }

    /// Processes every elapsed timer deadline against the shared clock.
    pub fn tick(&mut self) {
        let now = self.context.time_env.now_instant();

        // Retransmission timeout: resend the oldest unacknowledged
        // segment with backoff, collapsing the congestion window.
        if let Some(deadline) = self.tcb.rto_deadline {
            if now >= deadline && !self.tcb.tx_queue.is_empty() {
                let (seq, retries) = {
                    let front = self.tcb.tx_queue.front_mut().unwrap();
                    front.retries += 1;
                    front.needs_tx = true;
                    front.retransmitted = true;
                    (front.seq, front.retries)
                };
                if retries > MAX_RETRIES {
                    warn!(
                        "{} @ {} exceeded {} retransmissions, connection timed out.",
                        self.state.as_str(),
                        self.context.binding,
                        MAX_RETRIES
                    );
                    self.teardown(Some(Error::Timeout));
                    return;
                }
                self.tcb.ssthresh = cmp::max(self.tcb.in_flight() / 2, 2 * self.tcb.send_mss);
                self.tcb.cwnd = self.tcb.send_mss;
                self.tcb.recover = None;
                self.tcb.dup_acks = 0;
                self.tcb.rtt.backoff();
                self.tcb.rto_deadline = Some(now + self.tcb.rtt.rto());
                debug!(
                    "{} @ {} retransmission timeout, resending SEQ_NUM {} (retry {}).",
                    self.state.as_str(),
                    self.context.binding,
                    seq,
                    retries
                );
            }
        }

        // Persist timer: probe a zero window until it opens.
        if let Some(deadline) = self.tcb.persist_deadline {
            if now >= deadline {
                if self.tcb.persist_retries >= MAX_RETRIES {
                    warn!(
                        "{} @ {} exceeded {} window probes, connection timed out.",
                        self.state.as_str(),
                        self.context.binding,
                        MAX_RETRIES
                    );
                    self.teardown(Some(Error::Timeout));
                    return;
                }
                self.tcb.probe_pending = true;
                self.tcb.persist_deadline = None;
            }
        }
        if self.can_send_data()
            && self.tcb.send.wnd == 0
            && self.tcb.unsent_data() > 0
            && self.tcb.tx_queue.is_empty()
            && self.tcb.persist_deadline.is_none()
            && !self.tcb.probe_pending
            && !self.tcb.probe_in_flight
        {
            self.tcb.persist_deadline = Some(now + self.tcb.persist_interval);
        }

        // TIME_WAIT hold and the FIN_WAIT_2 orphan guard.
        if let Some(deadline) = self.tcb.state_deadline {
            if now >= deadline {
                match self.state {
                    TcpState::TimeWait | TcpState::FinWait2 => {
                        debug!(
                            "{} @ {} hold elapsed, closing.",
                            self.state.as_str(),
                            self.context.binding
                        );
                        self.teardown(None);
                    }
                    _ => self.tcb.state_deadline = None,
                }
            }
        }
    }

    fn process_listen(&mut self, src_addr: &SocketAddr, tcp_repr: &TcpRepr) -> Result<()> {
        let flags = &tcp_repr.flags;
        if flags[TcpRepr::FLAG_RST] {
            return Err(Error::Ignored);
        }
        if flags[TcpRepr::FLAG_ACK] || !flags[TcpRepr::FLAG_SYN] {
            // Not a clean SYN; the service layer answers with a reset.
            return Err(Error::Ignored);
        }

        let now = self.context.time_env.now_instant();
        let iss = SeqNum(rand::random::<u32>());
        let mut tcb = Tcb::new(iss, cmp::min(DEFAULT_MSS, self.mss_ceiling()));
        tcb.recv.init(SeqNum(tcp_repr.seq_num));
        tcb.send.wnd = tcp_repr.window_size as usize;
        tcb.send.wl1 = SeqNum(tcp_repr.seq_num);
        tcb.send.wl2 = SeqNum(tcp_repr.ack_num);
        if let Some(mss) = tcp_repr.max_segment_size {
            tcb.send_mss = cmp::min(mss as usize, self.mss_ceiling());
        }
        tcb.sack_enabled = tcp_repr.sack_permitted;
        tcb.cwnd = 2 * tcb.send_mss;
        tcb.tx_queue.push_back(TxSegment {
            kind: TxKind::Syn,
            seq: iss,
            data_len: 0,
            push: false,
            sent_at: now,
            retries: 0,
            retransmitted: false,
            needs_tx: true,
        });
        tcb.send.nxt = iss + 1;
        tcb.rto_deadline = Some(now + tcb.rtt.rto());

        debug!(
            "LISTEN @ {} accepting connection request from {}.",
            self.context.binding, src_addr
        );
        self.tcb = tcb;
        self.peer = Some(*src_addr);
        self.set_state(TcpState::SynReceived);
        Ok(())
    }

    fn process_syn_sent(&mut self, tcp_repr: &TcpRepr) -> Result<()> {
        let now = self.context.time_env.now_instant();
        let flags = &tcp_repr.flags;
        let has_ack = flags[TcpRepr::FLAG_ACK];
        let ack = SeqNum(tcp_repr.ack_num);

        if has_ack && ack != self.tcb.send.nxt {
            if !flags[TcpRepr::FLAG_RST] {
                self.rst_pending = Some((ack, None));
            }
            return Err(Error::Ignored);
        }

        if flags[TcpRepr::FLAG_RST] {
            if !has_ack {
                return Err(Error::Ignored);
            }
            debug!(
                "SYN_SENT @ ({}, {}) received RST, connection refused.",
                self.context.binding,
                self.peer.unwrap()
            );
            self.teardown(Some(Error::Reset));
            return Ok(());
        }

        if !flags[TcpRepr::FLAG_SYN] {
            return Err(Error::Ignored);
        }

        self.tcb.recv.init(SeqNum(tcp_repr.seq_num));
        if let Some(mss) = tcp_repr.max_segment_size {
            self.tcb.send_mss = cmp::min(mss as usize, self.mss_ceiling());
        }
        self.tcb.sack_enabled = self.tcb.sack_enabled && tcp_repr.sack_permitted;
        self.tcb.cwnd = 2 * self.tcb.send_mss;
        self.tcb.send.wnd = tcp_repr.window_size as usize;
        self.tcb.send.wl1 = SeqNum(tcp_repr.seq_num);
        self.tcb.send.wl2 = ack;
        self.tcb.ack_pending = true;

        if has_ack {
            if let Some(segment) = self.tcb.tx_queue.pop_front() {
                if !segment.retransmitted {
                    self.tcb.rtt.sample(now - segment.sent_at);
                }
            }
            self.tcb.send.una = ack;
            self.tcb.rto_deadline = None;
            self.set_state(TcpState::Established);
        } else {
            // Simultaneous open: our queued SYN goes out again, now
            // carrying an acknowledgment.
            if let Some(front) = self.tcb.tx_queue.front_mut() {
                front.needs_tx = true;
            }
            self.set_state(TcpState::SynReceived);
        }
        Ok(())
    }

    fn process_segment(&mut self, tcp_repr: &TcpRepr, payload: &[u8]) -> Result<()> {
        let now = self.context.time_env.now_instant();
        let flags = &tcp_repr.flags;
        let seq = SeqNum(tcp_repr.seq_num);
        let seg_len = payload.len()
            + (flags[TcpRepr::FLAG_SYN] as usize)
            + (flags[TcpRepr::FLAG_FIN] as usize);

        // A retransmitted SYN means our SYN + ACK was lost.
        if self.state == TcpState::SynReceived
            && flags[TcpRepr::FLAG_SYN]
            && !flags[TcpRepr::FLAG_ACK]
            && seq == self.tcb.recv.irs
        {
            if let Some(front) = self.tcb.tx_queue.front_mut() {
                if front.kind == TxKind::Syn {
                    front.needs_tx = true;
                    front.retransmitted = true;
                }
            }
            debug!(
                "SYN_RECEIVED @ ({}, {}) received duplicate SYN, resending SYN + ACK.",
                self.context.binding,
                self.peer.unwrap()
            );
            return Ok(());
        }

        if !self.segment_acceptable(seq, seg_len) {
            if !flags[TcpRepr::FLAG_RST] {
                self.tcb.ack_pending = true;
                if self.state == TcpState::TimeWait {
                    self.tcb.state_deadline = Some(now + TIME_WAIT_TIMEOUT);
                }
            }
            debug!(
                "{} @ ({}, {}) dropping out-of-window segment (SEQ_NUM {}, LEN {}).",
                self.state.as_str(),
                self.context.binding,
                self.peer.unwrap(),
                seq,
                seg_len
            );
            return Err(Error::Ignored);
        }

        if flags[TcpRepr::FLAG_RST] {
            debug!(
                "{} @ ({}, {}) received RST, connection reset.",
                self.state.as_str(),
                self.context.binding,
                self.peer.unwrap()
            );
            self.teardown(Some(Error::Reset));
            return Ok(());
        }

        if flags[TcpRepr::FLAG_SYN] {
            // An in-window SYN on a synchronized connection is fatal.
            self.rst_pending = Some((self.tcb.send.nxt, Some(self.tcb.recv.nxt)));
            self.teardown(Some(Error::Reset));
            return Ok(());
        }

        if !flags[TcpRepr::FLAG_ACK] {
            return Err(Error::Ignored);
        }

        self.process_ack(now, tcp_repr, payload.len())?;

        if !payload.is_empty() {
            if self.state.can_recv_data() {
                let advance = self.tcb.recv_queue.insert(self.tcb.recv.nxt, seq, payload);
                self.tcb.recv.nxt = self.tcb.recv.nxt + advance;
            }
            self.tcb.ack_pending = true;
        }

        if flags[TcpRepr::FLAG_FIN] {
            self.process_fin(now, seq, payload.len());
        }

        Ok(())
    }

    fn process_ack(&mut self, now: Instant, tcp_repr: &TcpRepr, payload_len: usize) -> Result<()> {
        let seq = SeqNum(tcp_repr.seq_num);
        let ack = SeqNum(tcp_repr.ack_num);
        let wnd = tcp_repr.window_size as usize;

        if self.state == TcpState::SynReceived {
            if ack != self.tcb.send.nxt {
                self.rst_pending = Some((ack, None));
                return Err(Error::Ignored);
            }
            if let Some(segment) = self.tcb.tx_queue.pop_front() {
                if !segment.retransmitted {
                    self.tcb.rtt.sample(now - segment.sent_at);
                }
            }
            self.tcb.send.una = ack;
            self.tcb.send.wnd = wnd;
            self.tcb.send.wl1 = seq;
            self.tcb.send.wl2 = ack;
            self.tcb.rto_deadline = None;
            self.set_state(TcpState::Established);
            return Ok(());
        }

        let nxt = self.tcb.send.nxt;
        let nxt_limit = if self.tcb.probe_in_flight { nxt + 1 } else { nxt };
        if ack > nxt_limit {
            // Acknowledges data we never sent.
            self.tcb.ack_pending = true;
            return Err(Error::Ignored);
        }

        // An accepted window probe consumes its byte.
        if self.tcb.probe_in_flight && ack == nxt + 1 {
            self.tcb.tx_queue.push_back(TxSegment {
                kind: TxKind::Data,
                seq: nxt,
                data_len: 1,
                push: false,
                sent_at: now,
                retries: 0,
                retransmitted: true,
                needs_tx: false,
            });
            self.tcb.send.nxt = nxt + 1;
            self.tcb.probe_in_flight = false;
        }

        if ack == self.tcb.send.una
            && payload_len == 0
            && !tcp_repr.flags[TcpRepr::FLAG_FIN]
            && wnd == self.tcb.send.wnd
            && !self.tcb.tx_queue.is_empty()
        {
            self.process_duplicate_ack();
        } else if ack > self.tcb.send.una {
            self.apply_ack(now, ack);
        }

        // Window update per the WL1/WL2 rules.
        if ack >= self.tcb.send.una {
            let update = self.tcb.send.wl1 < seq
                || (self.tcb.send.wl1 == seq && self.tcb.send.wl2 <= ack);
            if update {
                self.tcb.send.wnd = wnd;
                self.tcb.send.wl1 = seq;
                self.tcb.send.wl2 = ack;
                if wnd > 0 {
                    self.tcb.persist_deadline = None;
                    self.tcb.persist_interval = PERSIST_INTERVAL;
                    self.tcb.persist_retries = 0;
                    self.tcb.probe_pending = false;
                    self.tcb.probe_in_flight = false;
                }
            }
        }

        Ok(())
    }

    fn process_duplicate_ack(&mut self) {
        self.tcb.dup_acks += 1;
        if self.tcb.dup_acks == 3 {
            // Fast retransmit, then recover with an inflated window.
            self.tcb.ssthresh = cmp::max(self.tcb.in_flight() / 2, 2 * self.tcb.send_mss);
            self.tcb.cwnd = self.tcb.ssthresh + 3 * self.tcb.send_mss;
            self.tcb.recover = Some(self.tcb.send.nxt);
            if let Some(front) = self.tcb.tx_queue.front_mut() {
                front.needs_tx = true;
                front.retransmitted = true;
            }
            debug!(
                "{} @ ({}, {}) fast retransmit of SEQ_NUM {} after 3 duplicate ACKs.",
                self.state.as_str(),
                self.context.binding,
                self.peer.unwrap(),
                self.tcb.send.una
            );
        } else if self.tcb.dup_acks > 3 {
            self.tcb.cwnd += self.tcb.send_mss;
        }
    }

    fn apply_ack(&mut self, now: Instant, ack: SeqNum) {
        let acked = ack - self.tcb.send.una;
        let mut fin_acked = false;
        let mut sampled = false;

        while let Some(front) = self.tcb.tx_queue.front() {
            if front.end_seq() <= ack {
                let segment = self.tcb.tx_queue.pop_front().unwrap();
                // Karn's rule: retransmitted segments never produce
                // round trip samples.
                if !sampled && !segment.retransmitted {
                    self.tcb.rtt.sample(now - segment.sent_at);
                    sampled = true;
                }
                if segment.kind == TxKind::Fin {
                    fin_acked = true;
                }
            } else if front.seq < ack {
                let len = ack - front.seq;
                let front = self.tcb.tx_queue.front_mut().unwrap();
                front.seq = ack;
                front.data_len -= len;
                break;
            } else {
                break;
            }
        }

        self.tcb.send.una = ack;
        self.tcb.send_queue.release(ack);
        self.tcb.dup_acks = 0;

        match self.tcb.recover {
            Some(point) => {
                if ack >= point {
                    // Recovery complete, deflate to the slow start
                    // threshold.
                    self.tcb.cwnd = self.tcb.ssthresh;
                    self.tcb.recover = None;
                } else if let Some(front) = self.tcb.tx_queue.front_mut() {
                    // Partial acknowledgment: the next range is missing
                    // too.
                    front.needs_tx = true;
                    front.retransmitted = true;
                }
            }
            None => {
                if self.tcb.cwnd < self.tcb.ssthresh {
                    self.tcb.cwnd += cmp::min(acked, self.tcb.send_mss);
                } else {
                    let growth = self.tcb.send_mss * self.tcb.send_mss / self.tcb.cwnd;
                    self.tcb.cwnd += cmp::max(growth, 1);
                }
            }
        }

        if self.tcb.tx_queue.is_empty() {
            self.tcb.rto_deadline = None;
        } else {
            self.tcb.rto_deadline = Some(now + self.tcb.rtt.rto());
        }

        if fin_acked {
            match self.state {
                TcpState::FinWait1 => {
                    self.tcb.state_deadline = Some(now + FIN_WAIT_2_TIMEOUT);
                    self.set_state(TcpState::FinWait2);
                }
                TcpState::Closing => {
                    self.tcb.state_deadline = Some(now + TIME_WAIT_TIMEOUT);
                    self.set_state(TcpState::TimeWait);
                }
                TcpState::LastAck => {
                    self.teardown(None);
                }
                _ => {}
            }
        }
    }

    fn process_fin(&mut self, now: Instant, seq: SeqNum, payload_len: usize) {
        let fin_seq = seq + payload_len;
        if fin_seq != self.tcb.recv.nxt {
            // The FIN sits beyond a gap; the peer retransmits it after we
            // fill the gap.
            return;
        }

        self.tcb.recv.nxt = self.tcb.recv.nxt + 1;
        self.tcb.ack_pending = true;
        self.rx_closed = true;
        debug!(
            "{} @ ({}, {}) received FIN.",
            self.state.as_str(),
            self.context.binding,
            self.peer.unwrap()
        );

        match self.state {
            TcpState::Established => self.set_state(TcpState::CloseWait),
            TcpState::FinWait1 => self.set_state(TcpState::Closing),
            TcpState::FinWait2 => {
                self.tcb.state_deadline = Some(now + TIME_WAIT_TIMEOUT);
                self.set_state(TcpState::TimeWait);
            }
            _ => {}
        }
    }

    fn segment_acceptable(&self, seq: SeqNum, seg_len: usize) -> bool {
        let nxt = self.tcb.recv.nxt;
        let wnd = self.tcb.recv_queue.window_size();
        if seg_len == 0 {
            if wnd == 0 {
                seq == nxt
            } else {
                seq.is_in_window(nxt, wnd)
            }
        } else if wnd == 0 {
            false
        } else {
            seq.is_in_window(nxt, wnd) || (seq + (seg_len - 1)).is_in_window(nxt, wnd)
        }
    }

    fn emit_queued<F, R>(&mut self, now: Instant, peer: SocketAddr, idx: usize, f: F) -> Result<R>
    where
        F: FnOnce(&IpRepr, &TcpRepr, &[u8]) -> Result<R>,
    {
        let (kind, seq, data_len, push) = {
            let segment = &self.tcb.tx_queue[idx];
            (segment.kind, segment.seq, segment.data_len, segment.push)
        };

        let mut tcp_repr = self.base_tcp_repr(peer, seq);
        match kind {
            TxKind::Syn => {
                tcp_repr.flags[TcpRepr::FLAG_SYN] = true;
                tcp_repr.max_segment_size = Some(self.mss_ceiling() as u16);
                tcp_repr.sack_permitted = self.tcb.sack_enabled;
            }
            TxKind::Data => {
                tcp_repr.flags[TcpRepr::FLAG_PSH] = push;
                self.fill_sack_blocks(&mut tcp_repr);
            }
            TxKind::Fin => tcp_repr.flags[TcpRepr::FLAG_FIN] = true,
        }

        let payload = match kind {
            TxKind::Data => self.tcb.send_queue.slice(seq, data_len),
            _ => &[],
        };
        let ip_repr = self.ip_repr_for(peer, tcp_repr.header_len() + payload.len());

        match f(&ip_repr, &tcp_repr, payload) {
            Ok(res) => {
                debug!(
                    "{} @ ({}, {}) sent {:?} segment (SEQ_NUM {}, LEN {}).",
                    self.state.as_str(),
                    self.context.binding,
                    peer,
                    kind,
                    seq,
                    data_len
                );
                let with_ack = tcp_repr.flags[TcpRepr::FLAG_ACK];
                let segment = &mut self.tcb.tx_queue[idx];
                segment.needs_tx = false;
                segment.sent_at = now;
                if self.tcb.rto_deadline.is_none() {
                    self.tcb.rto_deadline = Some(now + self.tcb.rtt.rto());
                }
                if with_ack {
                    self.tcb.ack_pending = false;
                }
                Ok(res)
            }
            Err(err) => {
                debug!(
                    "{} @ ({}, {}) encountered {:?} when sending a segment.",
                    self.state.as_str(),
                    self.context.binding,
                    peer,
                    err
                );
                Err(err)
            }
        }
    }

    fn emit_data<F, R>(&mut self, now: Instant, peer: SocketAddr, len: usize, f: F) -> Result<R>
    where
        F: FnOnce(&IpRepr, &TcpRepr, &[u8]) -> Result<R>,
    {
        let seq = self.tcb.send.nxt;
        let push = len == self.tcb.unsent_data();

        let mut tcp_repr = self.base_tcp_repr(peer, seq);
        tcp_repr.flags[TcpRepr::FLAG_PSH] = push;
        self.fill_sack_blocks(&mut tcp_repr);

        let payload = self.tcb.send_queue.slice(seq, len);
        let ip_repr = self.ip_repr_for(peer, tcp_repr.header_len() + payload.len());

        match f(&ip_repr, &tcp_repr, payload) {
            Ok(res) => {
                debug!(
                    "{} @ ({}, {}) sent {} data bytes (SEQ_NUM {}).",
                    self.state.as_str(),
                    self.context.binding,
                    peer,
                    len,
                    seq
                );
                self.tcb.tx_queue.push_back(TxSegment {
                    kind: TxKind::Data,
                    seq,
                    data_len: len,
                    push,
                    sent_at: now,
                    retries: 0,
                    retransmitted: false,
                    needs_tx: false,
                });
                self.tcb.send.nxt = seq + len;
                if self.tcb.rto_deadline.is_none() {
                    self.tcb.rto_deadline = Some(now + self.tcb.rtt.rto());
                }
                self.tcb.ack_pending = false;
                Ok(res)
            }
            Err(err) => Err(err),
        }
    }

    fn emit_fin<F, R>(&mut self, now: Instant, peer: SocketAddr, f: F) -> Result<R>
    where
        F: FnOnce(&IpRepr, &TcpRepr, &[u8]) -> Result<R>,
    {
        let seq = self.tcb.send.nxt;
        let mut tcp_repr = self.base_tcp_repr(peer, seq);
        tcp_repr.flags[TcpRepr::FLAG_FIN] = true;
        let ip_repr = self.ip_repr_for(peer, tcp_repr.header_len());

        match f(&ip_repr, &tcp_repr, &[]) {
            Ok(res) => {
                debug!(
                    "{} @ ({}, {}) sent FIN (SEQ_NUM {}).",
                    self.state.as_str(),
                    self.context.binding,
                    peer,
                    seq
                );
                self.tcb.tx_queue.push_back(TxSegment {
                    kind: TxKind::Fin,
                    seq,
                    data_len: 0,
                    push: false,
                    sent_at: now,
                    retries: 0,
                    retransmitted: false,
                    needs_tx: false,
                });
                self.tcb.send.nxt = seq + 1;
                self.tcb.fin_pending = false;
                if self.tcb.rto_deadline.is_none() {
                    self.tcb.rto_deadline = Some(now + self.tcb.rtt.rto());
                }
                self.tcb.ack_pending = false;
                Ok(res)
            }
            Err(err) => Err(err),
        }
    }

    fn emit_probe<F, R>(&mut self, now: Instant, peer: SocketAddr, f: F) -> Result<R>
    where
        F: FnOnce(&IpRepr, &TcpRepr, &[u8]) -> Result<R>,
    {
        let seq = self.tcb.send.nxt;
        let tcp_repr = self.base_tcp_repr(peer, seq);
        let payload = self.tcb.send_queue.slice(seq, 1);
        let ip_repr = self.ip_repr_for(peer, tcp_repr.header_len() + 1);

        match f(&ip_repr, &tcp_repr, payload) {
            Ok(res) => {
                debug!(
                    "{} @ ({}, {}) sent zero-window probe (SEQ_NUM {}).",
                    self.state.as_str(),
                    self.context.binding,
                    peer,
                    seq
                );
                self.tcb.probe_pending = false;
                self.tcb.probe_in_flight = true;
                self.tcb.persist_retries += 1;
                self.tcb.persist_interval = cmp::min(self.tcb.persist_interval * 2, MAX_RTO);
                self.tcb.persist_deadline = Some(now + self.tcb.persist_interval);
                self.tcb.ack_pending = false;
                Ok(res)
            }
            Err(err) => Err(err),
        }
    }

    fn emit_ack<F, R>(&mut self, peer: SocketAddr, f: F) -> Result<R>
    where
        F: FnOnce(&IpRepr, &TcpRepr, &[u8]) -> Result<R>,
    {
        let mut tcp_repr = self.base_tcp_repr(peer, self.tcb.send.nxt);
        self.fill_sack_blocks(&mut tcp_repr);
        let ip_repr = self.ip_repr_for(peer, tcp_repr.header_len());

        match f(&ip_repr, &tcp_repr, &[]) {
            Ok(res) => {
                debug!(
                    "{} @ ({}, {}) sent ACK (ACK_NUM {}).",
                    self.state.as_str(),
                    self.context.binding,
                    peer,
                    self.tcb.recv.nxt
                );
                self.tcb.ack_pending = false;
                Ok(res)
            }
            Err(err) => Err(err),
        }
    }

    fn base_tcp_repr(&self, peer: SocketAddr, seq: SeqNum) -> TcpRepr {
        let mut tcp_repr = TcpRepr::new(self.context.binding.port, peer.port);
        tcp_repr.seq_num = seq.0;
        tcp_repr.window_size = cmp::min(self.tcb.recv_queue.window_size(), 65535) as u16;
        if self.state != TcpState::SynSent {
            tcp_repr.flags[TcpRepr::FLAG_ACK] = true;
            tcp_repr.ack_num = self.tcb.recv.nxt.0;
        }
        tcp_repr
    }

    fn fill_sack_blocks(&self, tcp_repr: &mut TcpRepr) {
        if !self.tcb.sack_enabled {
            return;
        }
        for (i, &(start, end)) in self.tcb.recv_queue.sack_blocks().iter().enumerate() {
            if i >= tcp_repr.sack_blocks.len() {
                break;
            }
            tcp_repr.sack_blocks[i] = Some((start.0, end.0));
        }
    }

    fn ip_repr_for(&self, peer: SocketAddr, payload_len: usize) -> IpRepr {
        match (self.context.binding.addr, peer.addr) {
            (IpAddress::Ipv4(src_addr), IpAddress::Ipv4(dst_addr)) => IpRepr::Ipv4(Ipv4Repr {
                src_addr,
                dst_addr,
                protocol: IpProtocol::Tcp,
                payload_len: payload_len as u16,
            }),
            (IpAddress::Ipv6(src_addr), IpAddress::Ipv6(dst_addr)) => IpRepr::Ipv6(Ipv6Repr {
                src_addr,
                dst_addr,
                next_header: IpProtocol::Tcp,
                payload_len: payload_len as u16,
            }),
            // connect and accepts require matching families.
            _ => unreachable!(),
        }
    }

    fn data_segment_len(&self) -> usize {
        if !self.can_send_data() {
            return 0;
        }
        let unsent = self.tcb.unsent_data();
        if unsent == 0 {
            return 0;
        }
        let window = cmp::min(self.tcb.send.wnd, self.tcb.cwnd);
        let in_flight = self.tcb.in_flight();
        if in_flight >= window {
            return 0;
        }
        let len = cmp::min(cmp::min(unsent, window - in_flight), self.tcb.send_mss);
        if len == 0 {
            return 0;
        }
        // Nagle: a sub-segment amount waits while anything is in flight.
        if self.nagle_enabled && in_flight > 0 && unsent < self.tcb.send_mss {
            return 0;
        }
        len
    }

    fn can_send_data(&self) -> bool {
        match self.state {
            TcpState::Established
            | TcpState::FinWait1
            | TcpState::CloseWait
            | TcpState::Closing
            | TcpState::LastAck => true,
            _ => false,
        }
    }

    fn fin_ready(&self) -> bool {
        if !self.tcb.fin_pending || self.tcb.unsent_data() > 0 {
            return false;
        }
        match self.state {
            TcpState::FinWait1 | TcpState::Closing | TcpState::LastAck => {
                // Not yet carved: nxt still points at the end of the data.
                self.tcb.send.nxt == self.tcb.send_queue.end_seq()
            }
            _ => false,
        }
    }

    fn mss_ceiling(&self) -> usize {
        let ip_header_len = match self.context.binding.addr {
            IpAddress::Ipv4(_) => 20,
            IpAddress::Ipv6(_) => 40,
        };
        self.context.interface_mtu - ip_header_len - 20
    }

    fn teardown(&mut self, fate: Option<Error>) {
        self.fate = fate;
        self.tcb.tx_queue.clear();
        self.tcb.rto_deadline = None;
        self.tcb.persist_deadline = None;
        self.tcb.state_deadline = None;
        self.tcb.ack_pending = false;
        self.tcb.fin_pending = false;
        self.tcb.probe_pending = false;
        self.tcb.probe_in_flight = false;
        self.set_state(TcpState::Closed);
    }

    fn set_state(&mut self, state: TcpState) {
        if state == self.state {
            return;
        }
        match self.peer {
            Some(peer) => debug!(
                "{} @ ({}, {}) transitioning to {}.",
                self.state.as_str(),
                self.context.binding,
                peer,
                state.as_str()
            ),
            None => debug!(
                "{} @ {} transitioning to {}.",
                self.state.as_str(),
                self.context.binding,
                state.as_str()
            ),
        }
        self.state = state;
    }
}

fn families_match(a: &IpAddress, b: &IpAddress) -> bool {
    match (a, b) {
        (&IpAddress::Ipv4(_), &IpAddress::Ipv4(_)) => true,
        (&IpAddress::Ipv6(_), &IpAddress::Ipv6(_)) => true,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use crate::core::repr::Ipv4Address;
    use crate::core::socket::Bindings;
    use crate::core::time::MockEnv;

    use super::*;

    fn local_addr() -> SocketAddr {
        SocketAddr {
            addr: IpAddress::Ipv4(Ipv4Address::new([10, 0, 0, 1])),
            port: 1024,
        }
    }

    fn peer_addr() -> SocketAddr {
        SocketAddr {
            addr: IpAddress::Ipv4(Ipv4Address::new([10, 0, 0, 2])),
            port: 80,
        }
    }

    fn socket(env: &MockEnv) -> TcpSocket {
        let bindings = Bindings::new();
        let binding = bindings.bind(local_addr()).unwrap();
        TcpSocket::new(binding, 1500, env.clone())
    }

    fn ip_repr_in(payload_len: usize) -> IpRepr {
        IpRepr::Ipv4(Ipv4Repr {
            src_addr: Ipv4Address::new([10, 0, 0, 2]),
            dst_addr: Ipv4Address::new([10, 0, 0, 1]),
            protocol: IpProtocol::Tcp,
            payload_len: payload_len as u16,
        })
    }

    fn segment_in(seq: u32, ack: u32, window: u16) -> TcpRepr {
        let mut tcp_repr = TcpRepr::new(80, 1024);
        tcp_repr.seq_num = seq;
        tcp_repr.ack_num = ack;
        tcp_repr.flags[TcpRepr::FLAG_ACK] = true;
        tcp_repr.window_size = window;
        tcp_repr
    }

    fn enqueue(socket: &mut TcpSocket, tcp_repr: &TcpRepr, payload: &[u8]) -> Result<()> {
        let ip_repr = ip_repr_in(tcp_repr.header_len() + payload.len());
        socket.recv_enqueue(&ip_repr, tcp_repr, payload)
    }

    fn dequeue(socket: &mut TcpSocket) -> Result<(TcpRepr, Vec<u8>)> {
        socket.send_dequeue(|_, tcp_repr, payload| Ok((*tcp_repr, payload.to_vec())))
    }

    /// Drives an active open through the handshake; the peer uses sequence
    /// number 300 and advertises the specified window.
    fn established(env: &MockEnv, window: u16) -> (TcpSocket, SeqNum) {
        let mut socket = socket(env);
        socket.connect(peer_addr()).unwrap();

        let (syn, _) = dequeue(&mut socket).unwrap();
        assert!(syn.flags[TcpRepr::FLAG_SYN]);
        assert!(!syn.flags[TcpRepr::FLAG_ACK]);

        let mut syn_ack = segment_in(300, syn.seq_num.wrapping_add(1), window);
        syn_ack.flags[TcpRepr::FLAG_SYN] = true;
        syn_ack.max_segment_size = Some(536);
        syn_ack.sack_permitted = true;
        enqueue(&mut socket, &syn_ack, &[]).unwrap();
        assert!(socket.is_connected());

        let (ack, _) = dequeue(&mut socket).unwrap();
        assert!(ack.flags[TcpRepr::FLAG_ACK]);
        assert_eq!(ack.ack_num, 301);

        (socket, SeqNum(syn.seq_num.wrapping_add(1)))
    }

    #[test]
    fn test_active_open_handshake() {
        let env = MockEnv::new();
        let (socket, una) = established(&env, 4096);
        assert_eq!(socket.tcb.send.una, una);
        assert_eq!(socket.tcb.send.nxt, una);
        assert_eq!(socket.tcb.recv.nxt, SeqNum(301));
        assert_eq!(socket.tcb.send.wnd, 4096);
        assert!(socket.tcb.sack_enabled);
    }

    #[test]
    fn test_passive_open_handshake() {
        let env = MockEnv::new();
        let mut socket = socket(&env);
        socket.listen().unwrap();

        let mut syn = segment_in(100, 0, 4096);
        syn.flags[TcpRepr::FLAG_ACK] = false;
        syn.flags[TcpRepr::FLAG_SYN] = true;
        syn.max_segment_size = Some(1400);
        enqueue(&mut socket, &syn, &[]).unwrap();
        assert_eq!(socket.state(), TcpState::SynReceived);

        let (syn_ack, _) = dequeue(&mut socket).unwrap();
        assert!(syn_ack.flags[TcpRepr::FLAG_SYN]);
        assert!(syn_ack.flags[TcpRepr::FLAG_ACK]);
        assert_eq!(syn_ack.ack_num, 101);
        assert_matches!(syn_ack.max_segment_size, Some(_));

        let ack = segment_in(101, syn_ack.seq_num.wrapping_add(1), 4096);
        enqueue(&mut socket, &ack, &[]).unwrap();
        assert!(socket.is_connected());
        assert_eq!(socket.tcb.send.una, SeqNum(syn_ack.seq_num.wrapping_add(1)));
        assert_eq!(socket.tcb.send_mss, 1400);
    }

    #[test]
    fn test_syn_retransmission_then_timeout() {
        let env = MockEnv::new();
        let mut socket = socket(&env);
        socket.connect(peer_addr()).unwrap();

        let (syn, _) = dequeue(&mut socket).unwrap();
        assert_matches!(dequeue(&mut socket), Err(Error::Exhausted));

        for _ in 0 .. MAX_RETRIES {
            env.advance(Duration::from_secs(60));
            socket.tick();
            let (rtx, _) = dequeue(&mut socket).unwrap();
            assert_eq!(rtx.seq_num, syn.seq_num);
            assert!(rtx.flags[TcpRepr::FLAG_SYN]);
        }

        env.advance(Duration::from_secs(60));
        socket.tick();
        assert!(socket.is_closed());
        assert_matches!(socket.send_slice(b"x"), Err(Error::Timeout));
    }

    #[test]
    fn test_duplicate_syn_resends_syn_ack() {
        let env = MockEnv::new();
        let mut socket = socket(&env);
        socket.listen().unwrap();

        let mut syn = segment_in(100, 0, 4096);
        syn.flags[TcpRepr::FLAG_ACK] = false;
        syn.flags[TcpRepr::FLAG_SYN] = true;
        enqueue(&mut socket, &syn, &[]).unwrap();
        let (first, _) = dequeue(&mut socket).unwrap();

        enqueue(&mut socket, &syn, &[]).unwrap();
        assert_eq!(socket.state(), TcpState::SynReceived);
        let (second, _) = dequeue(&mut socket).unwrap();
        assert_eq!(second.seq_num, first.seq_num);
        assert!(second.flags[TcpRepr::FLAG_SYN]);
        assert!(second.flags[TcpRepr::FLAG_ACK]);
    }

    #[test]
    fn test_send_and_receive_data() {
        let env = MockEnv::new();
        let (mut socket, una) = established(&env, 4096);

        assert_eq!(socket.send_slice(b"hello").unwrap(), 5);
        let (data, payload) = dequeue(&mut socket).unwrap();
        assert_eq!(data.seq_num, una.0);
        assert_eq!(payload, b"hello");
        assert!(data.flags[TcpRepr::FLAG_PSH]);

        let reply = segment_in(301, una.0.wrapping_add(5), 4096);
        enqueue(&mut socket, &reply, b"world").unwrap();
        assert_eq!(socket.tcb.send.una, una + 5);

        let mut buffer = [0; 16];
        assert_eq!(socket.recv_slice(&mut buffer).unwrap(), 5);
        assert_eq!(&buffer[.. 5], b"world");
    }

    #[test]
    fn test_three_duplicate_acks_trigger_one_fast_retransmit() {
        let env = MockEnv::new();
        let (mut socket, una) = established(&env, 4096);
        socket.set_nagle(false);

        socket.send_slice(&[1; 536]).unwrap();
        socket.send_slice(&[2; 100]).unwrap();
        let (first, _) = dequeue(&mut socket).unwrap();
        assert_eq!(first.seq_num, una.0);
        dequeue(&mut socket).unwrap();

        let dup = segment_in(301, una.0, 4096);
        for _ in 0 .. 2 {
            enqueue(&mut socket, &dup, &[]).unwrap();
            assert_matches!(dequeue(&mut socket), Err(Error::Exhausted));
        }

        enqueue(&mut socket, &dup, &[]).unwrap();
        let (rtx, payload) = dequeue(&mut socket).unwrap();
        assert_eq!(rtx.seq_num, una.0);
        assert_eq!(payload, vec![1; 536]);

        // Exactly one retransmission.
        assert_matches!(dequeue(&mut socket), Err(Error::Exhausted));
    }

    #[test]
    fn test_nagle_defers_sub_segment_send() {
        let env = MockEnv::new();
        let (mut socket, una) = established(&env, 4096);

        // Nothing in flight: the small segment goes straight out.
        socket.send_slice(&[1; 50]).unwrap();
        let (_, payload) = dequeue(&mut socket).unwrap();
        assert_eq!(payload.len(), 50);

        // One segment outstanding: 50 more bytes wait for the ACK.
        socket.send_slice(&[2; 50]).unwrap();
        assert_matches!(dequeue(&mut socket), Err(Error::Exhausted));

        let ack = segment_in(301, una.0.wrapping_add(50), 4096);
        enqueue(&mut socket, &ack, &[]).unwrap();
        let (_, payload) = dequeue(&mut socket).unwrap();
        assert_eq!(payload.len(), 50);
    }

    #[test]
    fn test_retransmission_timeout_backoff_and_death() {
        let env = MockEnv::new();
        let (mut socket, una) = established(&env, 4096);

        socket.send_slice(&[1; 100]).unwrap();
        dequeue(&mut socket).unwrap();

        // First expiry after the initial RTO.
        env.advance(Duration::from_millis(1000));
        socket.tick();
        let (rtx, _) = dequeue(&mut socket).unwrap();
        assert_eq!(rtx.seq_num, una.0);
        assert_eq!(socket.tcb.cwnd, socket.tcb.send_mss);

        // Backed off: one more initial interval is not enough.
        env.advance(Duration::from_millis(1000));
        socket.tick();
        assert_matches!(dequeue(&mut socket), Err(Error::Exhausted));

        for _ in 0 .. MAX_RETRIES {
            env.advance(Duration::from_secs(60));
            socket.tick();
            let _ = dequeue(&mut socket);
        }
        assert!(socket.is_closed());
        assert_matches!(socket.recv_slice(&mut [0; 8]), Err(Error::Timeout));
    }

    #[test]
    fn test_out_of_order_receive_with_sack() {
        let env = MockEnv::new();
        let (mut socket, _) = established(&env, 4096);

        let ooo = segment_in(309, socket.tcb.send.nxt.0, 4096);
        enqueue(&mut socket, &ooo, &[2; 8]).unwrap();
        assert_eq!(socket.tcb.recv.nxt, SeqNum(301));

        let (ack, _) = dequeue(&mut socket).unwrap();
        assert_eq!(ack.ack_num, 301);
        assert_eq!(ack.sack_blocks[0], Some((309, 317)));

        let fill = segment_in(301, socket.tcb.send.nxt.0, 4096);
        enqueue(&mut socket, &fill, &[1; 8]).unwrap();
        assert_eq!(socket.tcb.recv.nxt, SeqNum(317));

        let mut buffer = [0; 16];
        assert_eq!(socket.recv_slice(&mut buffer).unwrap(), 16);
        assert_eq!(&buffer[.. 8], &[1; 8]);
        assert_eq!(&buffer[8 ..], &[2; 8]);
    }

    #[test]
    fn test_zero_window_persist_probe() {
        let env = MockEnv::new();
        let (mut socket, una) = established(&env, 4096);

        // The peer closes its window.
        let update = segment_in(301, una.0, 0);
        enqueue(&mut socket, &update, &[]).unwrap();
        socket.send_slice(&[7; 10]).unwrap();
        assert_matches!(dequeue(&mut socket), Err(Error::Exhausted));

        // The persist timer arms, then fires.
        socket.tick();
        env.advance(PERSIST_INTERVAL);
        socket.tick();
        let (probe, payload) = dequeue(&mut socket).unwrap();
        assert_eq!(probe.seq_num, una.0);
        assert_eq!(payload, vec![7]);
        assert_eq!(socket.tcb.send.nxt, una);

        // The probe byte is accepted and the window opens.
        let open = segment_in(301, una.0.wrapping_add(1), 4096);
        enqueue(&mut socket, &open, &[]).unwrap();
        assert_eq!(socket.tcb.send.una, una + 1);

        let (rest, payload) = dequeue(&mut socket).unwrap();
        assert_eq!(rest.seq_num, una.0.wrapping_add(1));
        assert_eq!(payload, vec![7; 9]);
    }

    #[test]
    fn test_rst_aborts_established_connection() {
        let env = MockEnv::new();
        let (mut socket, _) = established(&env, 4096);

        let mut rst = segment_in(301, socket.tcb.send.nxt.0, 4096);
        rst.flags[TcpRepr::FLAG_RST] = true;
        enqueue(&mut socket, &rst, &[]).unwrap();

        assert!(socket.is_closed());
        assert_matches!(socket.recv_slice(&mut [0; 8]), Err(Error::Reset));
        assert_matches!(socket.send_slice(b"x"), Err(Error::Reset));
    }

    #[test]
    fn test_out_of_window_rst_ignored() {
        let env = MockEnv::new();
        let (mut socket, _) = established(&env, 4096);

        let mut rst = segment_in(100, socket.tcb.send.nxt.0, 4096);
        rst.flags[TcpRepr::FLAG_RST] = true;
        assert_matches!(enqueue(&mut socket, &rst, &[]), Err(Error::Ignored));
        assert!(socket.is_connected());
    }

    #[test]
    fn test_graceful_close_to_time_wait() {
        let env = MockEnv::new();
        let (mut socket, una) = established(&env, 4096);

        socket.close().unwrap();
        assert_eq!(socket.state(), TcpState::FinWait1);

        let (fin, _) = dequeue(&mut socket).unwrap();
        assert!(fin.flags[TcpRepr::FLAG_FIN]);
        assert_eq!(fin.seq_num, una.0);

        let ack = segment_in(301, una.0.wrapping_add(1), 4096);
        enqueue(&mut socket, &ack, &[]).unwrap();
        assert_eq!(socket.state(), TcpState::FinWait2);

        let mut peer_fin = segment_in(301, una.0.wrapping_add(1), 4096);
        peer_fin.flags[TcpRepr::FLAG_FIN] = true;
        enqueue(&mut socket, &peer_fin, &[]).unwrap();
        assert_eq!(socket.state(), TcpState::TimeWait);

        let (last_ack, _) = dequeue(&mut socket).unwrap();
        assert_eq!(last_ack.ack_num, 302);

        env.advance(TIME_WAIT_TIMEOUT);
        socket.tick();
        assert!(socket.is_closed());

        // End of stream, not an error.
        assert_eq!(socket.recv_slice(&mut [0; 8]).unwrap(), 0);
    }

    #[test]
    fn test_passive_close_through_last_ack() {
        let env = MockEnv::new();
        let (mut socket, una) = established(&env, 4096);

        let mut peer_fin = segment_in(301, una.0, 4096);
        peer_fin.flags[TcpRepr::FLAG_FIN] = true;
        enqueue(&mut socket, &peer_fin, &[]).unwrap();
        assert_eq!(socket.state(), TcpState::CloseWait);
        assert_eq!(socket.recv_slice(&mut [0; 8]).unwrap(), 0);

        socket.close().unwrap();
        assert_eq!(socket.state(), TcpState::LastAck);
        let (fin, _) = dequeue(&mut socket).unwrap();
        assert!(fin.flags[TcpRepr::FLAG_FIN]);

        let ack = segment_in(302, una.0.wrapping_add(1), 4096);
        enqueue(&mut socket, &ack, &[]).unwrap();
        assert!(socket.is_closed());
    }

    #[test]
    fn test_fin_wait_2_orphan_times_out() {
        let env = MockEnv::new();
        let (mut socket, una) = established(&env, 4096);

        socket.close().unwrap();
        dequeue(&mut socket).unwrap();
        let ack = segment_in(301, una.0.wrapping_add(1), 4096);
        enqueue(&mut socket, &ack, &[]).unwrap();
        assert_eq!(socket.state(), TcpState::FinWait2);

        env.advance(FIN_WAIT_2_TIMEOUT);
        socket.tick();
        assert!(socket.is_closed());
    }

    #[test]
    fn test_abort_emits_rst() {
        let env = MockEnv::new();
        let (mut socket, _) = established(&env, 4096);

        socket.abort();
        assert!(socket.is_closed());

        let (rst, _) = dequeue(&mut socket).unwrap();
        assert!(rst.flags[TcpRepr::FLAG_RST]);
        assert_matches!(dequeue(&mut socket), Err(Error::Exhausted));
    }

    #[test]
    fn test_connect_requires_closed_socket() {
        let env = MockEnv::new();
        let (mut socket, _) = established(&env, 4096);
        assert_matches!(socket.connect(peer_addr()), Err(Error::InvalidState));
    }

    #[test]
    fn test_listen_ignores_stray_segments() {
        let env = MockEnv::new();
        let mut socket = socket(&env);
        socket.listen().unwrap();

        let stray = segment_in(100, 1, 4096);
        assert_matches!(enqueue(&mut socket, &stray, &[]), Err(Error::Ignored));
        assert_eq!(socket.state(), TcpState::Listen);
    }

    #[test]
    fn test_window_update_resumes_send() {
        let env = MockEnv::new();
        let (mut socket, una) = established(&env, 4096);
        socket.set_nagle(false);

        // A window of 8 only admits part of the queued data.
        let update = segment_in(301, una.0, 8);
        enqueue(&mut socket, &update, &[]).unwrap();
        socket.send_slice(&[3; 30]).unwrap();

        let (_, payload) = dequeue(&mut socket).unwrap();
        assert_eq!(payload.len(), 8);
        assert_matches!(dequeue(&mut socket), Err(Error::Exhausted));

        let update = segment_in(301, una.0.wrapping_add(8), 64);
        enqueue(&mut socket, &update, &[]).unwrap();
        let (_, payload) = dequeue(&mut socket).unwrap();
        assert_eq!(payload.len(), 22);
    }
}
