use std::cmp;
use std::collections::VecDeque;
use std::time::{
    Duration,
    Instant,
};

use crate::core::socket::tcp::{
    SeqNum,
    MAX_RTO,
    MAX_SACK_BLOCKS,
    MIN_RTO,
    PERSIST_INTERVAL,
    RX_BUFFER_LEN,
    TX_BUFFER_LEN,
};

/// RFC 793 send sequence variables.
#[derive(Debug)]
pub struct SendSpace {
    /// Oldest unacknowledged sequence number.
    pub una: SeqNum,
    /// Next sequence number to be sent.
    pub nxt: SeqNum,
    /// Send window advertised by the peer.
    pub wnd: usize,
    /// Segment sequence number of the last window update.
    pub wl1: SeqNum,
    /// Segment acknowledgment number of the last window update.
    pub wl2: SeqNum,
    /// Initial send sequence number.
    pub iss: SeqNum,
}

impl SendSpace {
    pub fn new(iss: SeqNum) -> SendSpace {
        SendSpace {
            una: iss,
            nxt: iss,
            wnd: 0,
            wl1: SeqNum(0),
            wl2: SeqNum(0),
            iss,
        }
    }
}

/// RFC 793 receive sequence variables. The receive window is derived from
/// the receive queue rather than stored.
#[derive(Debug)]
pub struct RecvSpace {
    /// Next sequence number expected.
    pub nxt: SeqNum,
    /// Initial receive sequence number.
    pub irs: SeqNum,
}

impl RecvSpace {
    pub fn new() -> RecvSpace {
        RecvSpace {
            nxt: SeqNum(0),
            irs: SeqNum(0),
        }
    }

    /// Records the peer's initial sequence number from its SYN.
    pub fn init(&mut self, irs: SeqNum) {
        self.irs = irs;
        self.nxt = irs + 1;
    }
}

/// What a retransmission queue entry carries besides data bytes.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TxKind {
    Syn,
    Data,
    Fin,
}

/// An unacknowledged sent range. Data bytes live in the send queue, keyed
/// by sequence number.
#[derive(Debug)]
pub struct TxSegment {
    pub kind: TxKind,
    pub seq: SeqNum,
    pub data_len: usize,
    pub push: bool,
    pub sent_at: Instant,
    pub retries: usize,
    pub retransmitted: bool,
    pub needs_tx: bool,
}

impl TxSegment {
    /// Sequence space the segment occupies. SYN and FIN occupy one number
    /// and carry no data.
    pub fn seq_len(&self) -> usize {
        match self.kind {
            TxKind::Syn | TxKind::Fin => 1,
            TxKind::Data => self.data_len,
        }
    }

    pub fn end_seq(&self) -> SeqNum {
        self.seq + self.seq_len()
    }
}

/// The outgoing byte stream, holding every byte from the oldest
/// unacknowledged data byte to the newest the owner has queued.
#[derive(Debug)]
pub struct SendQueue {
    buffer: Vec<u8>,
    capacity: usize,
    start_seq: SeqNum,
}

impl SendQueue {
    pub fn new(capacity: usize, start_seq: SeqNum) -> SendQueue {
        SendQueue {
            buffer: Vec::with_capacity(capacity),
            capacity,
            start_seq,
        }
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn available(&self) -> usize {
        self.capacity - self.buffer.len()
    }

    /// Sequence number one past the newest queued byte.
    pub fn end_seq(&self) -> SeqNum {
        self.start_seq + self.buffer.len()
    }

    /// Appends as much of data as fits, returning the number of bytes
    /// queued.
    pub fn enqueue(&mut self, data: &[u8]) -> usize {
        let len = cmp::min(data.len(), self.available());
        self.buffer.extend_from_slice(&data[.. len]);
        len
    }

    /// Returns the queued bytes covering [seq, seq + len).
    pub fn slice(&self, seq: SeqNum, len: usize) -> &[u8] {
        let offset = seq - self.start_seq;
        &self.buffer[offset .. offset + len]
    }

    /// Discards acknowledged bytes below the specified sequence number.
    pub fn release(&mut self, up_to: SeqNum) {
        if up_to <= self.start_seq {
            return;
        }
        let len = cmp::min(up_to - self.start_seq, self.buffer.len());
        self.buffer.drain(.. len);
        self.start_seq = self.start_seq + len;
    }
}

/// Received-but-not-yet-in-order ranges, newest first (RFC 2018 ordering
/// for reporting), capped at MAX_SACK_BLOCKS with the oldest dropped.
#[derive(Debug)]
pub struct SackList {
    blocks: Vec<(SeqNum, SeqNum)>,
}

impl SackList {
    pub fn new() -> SackList {
        SackList {
            blocks: Vec::with_capacity(MAX_SACK_BLOCKS),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn blocks(&self) -> &[(SeqNum, SeqNum)] {
        &self.blocks
    }

    /// Records [start, end) as received, merging every overlapping or
    /// adjacent block into one placed at the front.
    pub fn insert(&mut self, start: SeqNum, end: SeqNum) {
        let mut merged = (start, end);

        loop {
            let overlap = self
                .blocks
                .iter()
                .position(|&(s, e)| s <= merged.1 && merged.0 <= e);
            match overlap {
                Some(idx) => {
                    let (s, e) = self.blocks.remove(idx);
                    if s < merged.0 {
                        merged.0 = s;
                    }
                    if e > merged.1 {
                        merged.1 = e;
                    }
                }
                None => break,
            }
        }

        self.blocks.insert(0, merged);
        self.blocks.truncate(MAX_SACK_BLOCKS);
    }

    /// Removes and returns the end of the block reaching the specified
    /// sequence number, along with any stale blocks below it.
    pub fn take_reach(&mut self, nxt: SeqNum) -> Option<SeqNum> {
        self.blocks.retain(|&(_, e)| e > nxt);

        let idx = self.blocks.iter().position(|&(s, _)| s <= nxt)?;
        let (_, end) = self.blocks.remove(idx);
        Some(end)
    }
}

/// The incoming byte stream: in-order bytes awaiting the owner plus a
/// staging window holding out-of-order bytes at their future position.
#[derive(Debug)]
pub struct RecvQueue {
    assembled: Vec<u8>,
    window: Vec<u8>,
    capacity: usize,
    sacks: SackList,
}

impl RecvQueue {
    pub fn new(capacity: usize) -> RecvQueue {
        RecvQueue {
            assembled: Vec::with_capacity(capacity),
            window: vec![0; capacity],
            capacity,
            sacks: SackList::new(),
        }
    }

    /// The receive window to advertise, shrinking as assembled bytes wait
    /// to be read.
    pub fn window_size(&self) -> usize {
        self.capacity - self.assembled.len()
    }

    pub fn readable(&self) -> usize {
        self.assembled.len()
    }

    pub fn sack_blocks(&self) -> &[(SeqNum, SeqNum)] {
        self.sacks.blocks()
    }

    /// Stores segment payload arriving with the receive window, assembling
    /// bytes that become contiguous at nxt. Returns how far nxt advances.
    pub fn insert(&mut self, nxt: SeqNum, seq: SeqNum, data: &[u8]) -> usize {
        let win = self.window_size();
        if win == 0 || data.is_empty() {
            return 0;
        }

        let start = if seq < nxt { nxt } else { seq };
        let data_end = seq + data.len();
        let win_end = nxt + win;
        let end = if data_end < win_end { data_end } else { win_end };
        if !(start < end) {
            return 0;
        }

        let offset = start - nxt;
        let from = start - seq;
        let len = end - start;
        self.window[offset .. offset + len].copy_from_slice(&data[from .. from + len]);
        self.sacks.insert(start, end);

        match self.sacks.take_reach(nxt) {
            Some(reach) => {
                let advance = reach - nxt;
                self.assembled.extend_from_slice(&self.window[.. advance]);
                self.window.copy_within(advance .., 0);
                let tail = self.window.len() - advance;
                for byte in &mut self.window[tail ..] {
                    *byte = 0;
                }
                advance
            }
            None => 0,
        }
    }

    /// Copies assembled bytes out in order, returning how many were read.
    pub fn read(&mut self, data: &mut [u8]) -> usize {
        let len = cmp::min(data.len(), self.assembled.len());
        data[.. len].copy_from_slice(&self.assembled[.. len]);
        self.assembled.drain(.. len);
        len
    }
}

/// RFC 6298 retransmission timeout estimation.
#[derive(Debug)]
pub struct RttEstimator {
    srtt: Option<Duration>,
    rttvar: Duration,
    rto: Duration,
}

impl RttEstimator {
    pub fn new() -> RttEstimator {
        RttEstimator {
            srtt: None,
            rttvar: Duration::from_millis(0),
            rto: MIN_RTO,
        }
    }

    pub fn rto(&self) -> Duration {
        self.rto
    }

    /// Folds a round trip measurement into the estimate and recomputes the
    /// timeout.
    pub fn sample(&mut self, rtt: Duration) {
        match self.srtt {
            None => {
                self.srtt = Some(rtt);
                self.rttvar = rtt / 2;
            }
            Some(srtt) => {
                let delta = if srtt > rtt { srtt - rtt } else { rtt - srtt };
                self.rttvar = (self.rttvar * 3 + delta) / 4;
                self.srtt = Some((srtt * 7 + rtt) / 8);
            }
        }

        let rto = self.srtt.unwrap() + self.rttvar * 4;
        self.rto = cmp::max(cmp::min(rto, MAX_RTO), MIN_RTO);
    }

    /// Doubles the timeout after an expiry, up to the cap.
    pub fn backoff(&mut self) {
        self.rto = cmp::min(self.rto * 2, MAX_RTO);
    }
}

/// The per-connection control block.
#[derive(Debug)]
pub struct Tcb {
    pub send: SendSpace,
    pub recv: RecvSpace,
    /// Unacknowledged sent ranges, in order, covering [una, nxt).
    pub tx_queue: VecDeque<TxSegment>,
    pub send_queue: SendQueue,
    pub recv_queue: RecvQueue,
    pub rtt: RttEstimator,
    pub cwnd: usize,
    pub ssthresh: usize,
    pub dup_acks: usize,
    /// Fast-recovery exit point while set.
    pub recover: Option<SeqNum>,
    /// Largest segment we will send, learned from the peer's MSS option.
    pub send_mss: usize,
    pub sack_enabled: bool,
    pub rto_deadline: Option<Instant>,
    pub persist_deadline: Option<Instant>,
    pub persist_interval: Duration,
    pub persist_retries: usize,
    /// TIME_WAIT hold or FIN_WAIT_2 orphan deadline.
    pub state_deadline: Option<Instant>,
    pub ack_pending: bool,
    pub fin_pending: bool,
    pub probe_pending: bool,
    pub probe_in_flight: bool,
}

impl Tcb {
    pub fn new(iss: SeqNum, send_mss: usize) -> Tcb {
        Tcb {
            send: SendSpace::new(iss),
            recv: RecvSpace::new(),
            tx_queue: VecDeque::new(),
            send_queue: SendQueue::new(TX_BUFFER_LEN, iss + 1),
            recv_queue: RecvQueue::new(RX_BUFFER_LEN),
            rtt: RttEstimator::new(),
            cwnd: 2 * send_mss,
            ssthresh: usize::max_value(),
            dup_acks: 0,
            recover: None,
            send_mss,
            sack_enabled: false,
            rto_deadline: None,
            persist_deadline: None,
            persist_interval: PERSIST_INTERVAL,
            persist_retries: 0,
            state_deadline: None,
            ack_pending: false,
            fin_pending: false,
            probe_pending: false,
            probe_in_flight: false,
        }
    }

    /// Sequence space between the oldest unacknowledged number and the
    /// next to send.
    pub fn in_flight(&self) -> usize {
        self.send.nxt - self.send.una
    }

    /// Queued data bytes not yet carved into segments.
    pub fn unsent_data(&self) -> usize {
        let data_end = self.send_queue.end_seq();
        if self.send.nxt < data_end {
            data_end - self.send.nxt
        } else {
            0
        }
    }
}
