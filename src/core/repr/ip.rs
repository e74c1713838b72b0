use std::fmt::{
    Display,
    Formatter,
    Result as FmtResult,
};

use crate::core::repr::{
    Ipv4Address,
    Ipv4Repr,
    Ipv6Address,
    Ipv6Repr,
};

/// Transport protocol carried in an IPv4 or IPv6 header.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IpProtocol {
    Icmp,
    Tcp,
    Ipv6Frag,
    Unknown(u8),
}

impl From<u8> for IpProtocol {
    fn from(protocol: u8) -> IpProtocol {
        match protocol {
            1 => IpProtocol::Icmp,
            6 => IpProtocol::Tcp,
            44 => IpProtocol::Ipv6Frag,
            protocol => IpProtocol::Unknown(protocol),
        }
    }
}

impl From<IpProtocol> for u8 {
    fn from(protocol: IpProtocol) -> u8 {
        match protocol {
            IpProtocol::Icmp => 1,
            IpProtocol::Tcp => 6,
            IpProtocol::Ipv6Frag => 44,
            IpProtocol::Unknown(protocol) => protocol,
        }
    }
}

impl Display for IpProtocol {
    fn fmt(&self, f: &mut Formatter) -> FmtResult {
        match *self {
            IpProtocol::Icmp => write!(f, "ICMP"),
            IpProtocol::Tcp => write!(f, "TCP"),
            IpProtocol::Ipv6Frag => write!(f, "Fragment"),
            IpProtocol::Unknown(protocol) => write!(f, "0x{:02x}", protocol),
        }
    }
}

/// An IPv4 or IPv6 address in network byte order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum IpAddress {
    Ipv4(Ipv4Address),
    Ipv6(Ipv6Address),
}

impl IpAddress {
    /// Checks if this is a unicast address.
    pub fn is_unicast(&self) -> bool {
        match *self {
            IpAddress::Ipv4(addr) => addr.is_unicast(),
            IpAddress::Ipv6(addr) => addr.is_unicast(),
        }
    }
}

impl From<Ipv4Address> for IpAddress {
    fn from(addr: Ipv4Address) -> IpAddress {
        IpAddress::Ipv4(addr)
    }
}

impl From<Ipv6Address> for IpAddress {
    fn from(addr: Ipv6Address) -> IpAddress {
        IpAddress::Ipv6(addr)
    }
}

impl Display for IpAddress {
    fn fmt(&self, f: &mut Formatter) -> FmtResult {
        match *self {
            IpAddress::Ipv4(addr) => write!(f, "{}", addr),
            IpAddress::Ipv6(addr) => write!(f, "{}", addr),
        }
    }
}

/// An IPv4 or IPv6 header.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IpRepr {
    Ipv4(Ipv4Repr),
    Ipv6(Ipv6Repr),
}

impl From<Ipv4Repr> for IpRepr {
    fn from(ipv4_repr: Ipv4Repr) -> IpRepr {
        IpRepr::Ipv4(ipv4_repr)
    }
}

impl From<Ipv6Repr> for IpRepr {
    fn from(ipv6_repr: Ipv6Repr) -> IpRepr {
        IpRepr::Ipv6(ipv6_repr)
    }
}

impl IpRepr {
    pub fn src_addr(&self) -> IpAddress {
        match *self {
            IpRepr::Ipv4(ref repr) => IpAddress::Ipv4(repr.src_addr),
            IpRepr::Ipv6(ref repr) => IpAddress::Ipv6(repr.src_addr),
        }
    }

    pub fn dst_addr(&self) -> IpAddress {
        match *self {
            IpRepr::Ipv4(ref repr) => IpAddress::Ipv4(repr.dst_addr),
            IpRepr::Ipv6(ref repr) => IpAddress::Ipv6(repr.dst_addr),
        }
    }

    pub fn protocol(&self) -> IpProtocol {
        match *self {
            IpRepr::Ipv4(ref repr) => repr.protocol,
            IpRepr::Ipv6(ref repr) => repr.next_header,
        }
    }

    pub fn payload_len(&self) -> u16 {
        match *self {
            IpRepr::Ipv4(ref repr) => repr.payload_len,
            IpRepr::Ipv6(ref repr) => repr.payload_len,
        }
    }

    pub fn set_payload_len(&mut self, payload_len: u16) {
        match *self {
            IpRepr::Ipv4(ref mut repr) => repr.payload_len = payload_len,
            IpRepr::Ipv6(ref mut repr) => repr.payload_len = payload_len,
        }
    }

    /// Returns the length of the serialized header.
    pub fn header_len(&self) -> usize {
        match *self {
            IpRepr::Ipv4(ref repr) => repr.header_len(),
            IpRepr::Ipv6(ref repr) => repr.header_len(),
        }
    }

    /// Returns the length of a packet with this header and payload.
    pub fn buffer_len(&self) -> usize {
        match *self {
            IpRepr::Ipv4(ref repr) => repr.buffer_len(),
            IpRepr::Ipv6(ref repr) => repr.buffer_len(),
        }
    }

    /// Calculates a transport checksum spanning the pseudo header and the
    /// provided buffer.
    pub fn gen_checksum_with_pseudo_header(&self, buffer: &[u8]) -> u16 {
        match *self {
            IpRepr::Ipv4(ref repr) => repr.gen_checksum_with_pseudo_header(buffer),
            IpRepr::Ipv6(ref repr) => repr.gen_checksum_with_pseudo_header(buffer),
        }
    }
}
