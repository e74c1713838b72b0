#[cfg(test)]
#[macro_use]
extern crate assert_matches;
extern crate byteorder;
#[macro_use]
extern crate log;
extern crate rand;

pub mod core;

use crate::core::repr::IpAddress;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Error {
    /// Indicates an error where a buffer, device, queue, or table is full
    /// or empty.
    Exhausted,
    /// Indicates an error where a packet or frame is malformed.
    Malformed,
    /// Indicates an error where a checksum is invalid.
    Checksum,
    /// Indicates that a packet was not destined for or not interesting to
    /// the receiver.
    Ignored,
    /// Indicates an error where a binding is already in use.
    InUse,
    /// Indicates that an address could not be resolved within the retry
    /// budget and the associated packets were dropped.
    Unreachable(IpAddress),
    /// Indicates that a peer did not acknowledge within the retry budget.
    Timeout,
    /// Indicates that a connection was reset by the peer.
    Reset,
    /// Indicates an operation on a socket handle which is not in use.
    InvalidHandle,
    /// Indicates an operation which is not valid in the current state.
    InvalidState,
}

pub type Result<T> = std::result::Result<T, Error>;
