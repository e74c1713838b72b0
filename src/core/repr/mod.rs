//! Serialization and deserialization of network packets.
//!
//! The `repr` module provides abstractions for serialization and deserializing
//! packets and frames at different network layers to/from byte buffers.

pub mod arp;
pub mod ethernet;
pub mod icmpv4;
pub mod ip;
pub mod ipv4;
pub mod ipv6;
pub mod tcp;

pub use self::arp::{
    Arp,
    Op as ArpOp,
};
pub use self::ethernet::{
    eth_types,
    Address as EthernetAddress,
    Frame as EthernetFrame,
};
pub use self::icmpv4::{
    DestinationUnreachable as Icmpv4DestinationUnreachable,
    Packet as Icmpv4Packet,
    Repr as Icmpv4Repr,
    TimeExceeded as Icmpv4TimeExceeded,
};
pub use self::ip::{
    IpAddress,
    IpProtocol,
    IpRepr,
};
pub use self::ipv4::{
    Address as Ipv4Address,
    AddressCidr as Ipv4AddressCidr,
    Packet as Ipv4Packet,
    Repr as Ipv4Repr,
};
pub use self::ipv6::{
    Address as Ipv6Address,
    AddressCidr as Ipv6AddressCidr,
    FragmentHeader as Ipv6FragmentHeader,
    Packet as Ipv6Packet,
    Repr as Ipv6Repr,
};
pub use self::tcp::{
    Packet as TcpPacket,
    Repr as TcpRepr,
};
