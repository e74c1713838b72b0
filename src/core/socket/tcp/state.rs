/// One of the RFC 793 connection states.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TcpState {
    Closed,
    Listen,
    SynSent,
    SynReceived,
    Established,
    FinWait1,
    FinWait2,
    CloseWait,
    Closing,
    LastAck,
    TimeWait,
}

impl TcpState {
    /// Returns a string label for the state.
    pub fn as_str(&self) -> &'static str {
        match *self {
            TcpState::Closed => "CLOSED",
            TcpState::Listen => "LISTEN",
            TcpState::SynSent => "SYN_SENT",
            TcpState::SynReceived => "SYN_RECEIVED",
            TcpState::Established => "ESTABLISHED",
            TcpState::FinWait1 => "FIN_WAIT_1",
            TcpState::FinWait2 => "FIN_WAIT_2",
            TcpState::CloseWait => "CLOSE_WAIT",
            TcpState::Closing => "CLOSING",
            TcpState::LastAck => "LAST_ACK",
            TcpState::TimeWait => "TIME_WAIT",
        }
    }

    /// Checks if the connection has completed a handshake, making sequence
    /// numbers on both sides meaningful.
    pub fn is_synchronized(&self) -> bool {
        match *self {
            TcpState::Closed | TcpState::Listen | TcpState::SynSent => false,
            _ => true,
        }
    }

    /// Checks if the state can carry inbound stream data.
    pub fn can_recv_data(&self) -> bool {
        match *self {
            TcpState::Established | TcpState::FinWait1 | TcpState::FinWait2 => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_labels() {
        assert_eq!(TcpState::SynReceived.as_str(), "SYN_RECEIVED");
        assert_eq!(TcpState::TimeWait.as_str(), "TIME_WAIT");
    }

    #[test]
    fn test_synchronized_states() {
        assert!(!TcpState::SynSent.is_synchronized());
        assert!(TcpState::SynReceived.is_synchronized());
        assert!(TcpState::Established.is_synchronized());
        assert!(TcpState::TimeWait.is_synchronized());
    }
}
