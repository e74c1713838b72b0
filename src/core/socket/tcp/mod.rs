//! A TCP implementation: connection state machine, sequence space
//! bookkeeping, retransmission, congestion control, and SACK generation.

use std::time::Duration;

mod seq;
mod socket;
mod state;
mod tcb;

pub use self::seq::SeqNum;
pub use self::socket::{
    TcpContext,
    TcpSocket,
};
pub use self::state::TcpState;
pub use self::tcb::{
    RecvQueue,
    RecvSpace,
    RttEstimator,
    SackList,
    SendQueue,
    SendSpace,
    Tcb,
    TxKind,
    TxSegment,
};

/// Capacity of the send buffer in bytes.
pub const TX_BUFFER_LEN: usize = 2860;

/// Capacity of the receive buffer in bytes.
pub const RX_BUFFER_LEN: usize = 2860;

/// Segment size assumed for peers that send no MSS option.
pub const DEFAULT_MSS: usize = 536;

/// Maximum number of SACK blocks advertised in one segment.
pub const MAX_SACK_BLOCKS: usize = 4;

/// Retransmissions (and window probes) tolerated before a connection is
/// declared dead.
pub const MAX_RETRIES: usize = 5;

/// Floor for the retransmission timeout.
pub const MIN_RTO: Duration = Duration::from_millis(1000);

/// Ceiling for the retransmission timeout and the persist interval.
pub const MAX_RTO: Duration = Duration::from_millis(60_000);

/// How long a connection lingers in TIME_WAIT.
pub const TIME_WAIT_TIMEOUT: Duration = Duration::from_millis(60_000);

/// How long a connection without a peer FIN survives in FIN_WAIT_2.
pub const FIN_WAIT_2_TIMEOUT: Duration = Duration::from_millis(4000);

/// Initial delay before probing a zero window, doubled per probe.
pub const PERSIST_INTERVAL: Duration = Duration::from_millis(1000);
