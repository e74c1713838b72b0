use std::fmt::{
    Display,
    Formatter,
    Result as FmtResult,
};
use std::io::Write;
use std::ops::Deref;

use byteorder::{
    NetworkEndian,
    ReadBytesExt,
    WriteBytesExt,
};

use crate::{
    Error,
    Result,
};
use crate::core::check::Accumulator;
use crate::core::repr::IpProtocol;

/// [IPv6 address](https://en.wikipedia.org/wiki/IPv6_address) in network byte
/// order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Address([u8; 16]);

impl Address {
    pub const UNSPECIFIED: Address = Address([0; 16]);

    pub const LOOPBACK: Address = Address([
        0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0x01,
    ]);

    /// Creates an IPv6 address from a network byte order buffer.
    pub fn new(addr: [u8; 16]) -> Address {
        Address(addr)
    }

    /// Tries to create an IPv6 address from a network byte order slice.
    pub fn try_new(addr: &[u8]) -> Result<Address> {
        if addr.len() != 16 {
            return Err(Error::Exhausted);
        }

        let mut _addr: [u8; 16] = [0; 16];
        _addr.clone_from_slice(addr);
        Ok(Address(_addr))
    }

    /// Returns a reference to the network byte order representation of the
    /// address.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    // Checks if this is a unicast address.
    pub fn is_unicast(&self) -> bool {
        !(self.is_multicast() || self.is_unspecified())
    }

    // Checks if this is a multicast address.
    pub fn is_multicast(&self) -> bool {
        self.0[0] == 0xFF
    }

    pub fn is_unspecified(&self) -> bool {
        self.0 == [0; 16]
    }

    /// Checks if this is a link local address.
    pub fn is_link_local(&self) -> bool {
        self.0[0] == 0xFE && (self.0[1] & 0xC0) == 0x80
    }

    fn group(&self, idx: usize) -> u16 {
        (&self.0[idx * 2 .. idx * 2 + 2])
            .read_u16::<NetworkEndian>()
            .unwrap()
    }
}

impl Display for Address {
    /// Writes the address with the longest run of zero groups compressed.
    fn fmt(&self, f: &mut Formatter) -> FmtResult {
        let mut best_at = 0;
        let mut best_len = 0;
        let mut at = 0;
        let mut len = 0;

        for i in 0 .. 8 {
            if self.group(i) == 0 {
                if len == 0 {
                    at = i;
                }
                len += 1;
                if len > best_len {
                    best_at = at;
                    best_len = len;
                }
            } else {
                len = 0;
            }
        }

        if best_len < 2 {
            for i in 0 .. 8 {
                if i > 0 {
                    write!(f, ":")?;
                }
                write!(f, "{:x}", self.group(i))?;
            }
        } else {
            for i in 0 .. best_at {
                if i > 0 {
                    write!(f, ":")?;
                }
                write!(f, "{:x}", self.group(i))?;
            }
            write!(f, "::")?;
            for i in best_at + best_len .. 8 {
                if i > best_at + best_len {
                    write!(f, ":")?;
                }
                write!(f, "{:x}", self.group(i))?;
            }
        }

        Ok(())
    }
}

/// An IPv6 address with a subnet prefix length.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AddressCidr {
    address: Address,
    prefix_len: u8,
}

impl AddressCidr {
    /// Tries to create a CIDR style address with the specified prefix length.
    pub fn try_new(address: Address, prefix_len: usize) -> Result<AddressCidr> {
        if prefix_len > 128 {
            return Err(Error::Malformed);
        }

        Ok(AddressCidr {
            address,
            prefix_len: prefix_len as u8,
        })
    }

    /// Checks if an address is a member of the subnet.
    pub fn is_member(&self, address: Address) -> bool {
        let whole_bytes = (self.prefix_len / 8) as usize;
        let spare_bits = self.prefix_len % 8;

        if self.address.0[.. whole_bytes] != address.0[.. whole_bytes] {
            return false;
        }

        if spare_bits == 0 {
            return true;
        }

        let mask = !0u8 << (8 - spare_bits);
        (self.address.0[whole_bytes] & mask) == (address.0[whole_bytes] & mask)
    }
}

impl Deref for AddressCidr {
    type Target = Address;

    fn deref(&self) -> &Address {
        &self.address
    }
}

impl Display for AddressCidr {
    fn fmt(&self, f: &mut Formatter) -> FmtResult {
        write!(f, "{}/{}", self.address, self.prefix_len)
    }
}

/// [https://en.wikipedia.org/wiki/IPv6_packet](https://en.wikipedia.org/wiki/IPv6_packet)
mod fields {
    use std::ops::Range;

    pub const VERSION_TC_FLOW: Range<usize> = 0 .. 4;

    pub const PAYLOAD_LEN: Range<usize> = 4 .. 6;

    pub const NEXT_HEADER: Range<usize> = 6 .. 7;

    pub const HOP_LIMIT: Range<usize> = 7 .. 8;

    pub const SRC_ADDR: Range<usize> = 8 .. 24;

    pub const DST_ADDR: Range<usize> = 24 .. 40;

    pub const FRAG_NEXT_HEADER: Range<usize> = 0 .. 1;

    pub const FRAG_OFFSET_AND_FLAGS: Range<usize> = 2 .. 4;

    pub const FRAG_IDENT: Range<usize> = 4 .. 8;
}

/// View of a byte buffer as an IPv6 packet.
#[derive(Debug)]
pub struct Packet<T: AsRef<[u8]>> {
    buffer: T,
}

impl<T: AsRef<[u8]>> AsRef<[u8]> for Packet<T> {
    fn as_ref(&self) -> &[u8] {
        self.buffer.as_ref()
    }
}

impl<T: AsRef<[u8]> + AsMut<[u8]>> AsMut<[u8]> for Packet<T> {
    fn as_mut(&mut self) -> &mut [u8] {
        self.buffer.as_mut()
    }
}

impl<T: AsRef<[u8]>> Packet<T> {
    pub const HEADER_LEN: usize = 40;

    /// Tries to create an IPv6 packet view over a byte buffer.
    ///
    /// NOTE: Use check_encoding() before operating on the packet if
    /// constructing a packet via a buffer originating from an untrusted source
    /// like a link.
    pub fn try_new(buffer: T) -> Result<Packet<T>> {
        if buffer.as_ref().len() < Self::HEADER_LEN {
            Err(Error::Exhausted)
        } else {
            Ok(Packet { buffer })
        }
    }

    /// Returns the length of an IPv6 packet with the specified payload size.
    pub fn buffer_len(payload_len: usize) -> usize {
        Self::HEADER_LEN + payload_len
    }

    /// Checks if the packet has a valid encoding.
    pub fn check_encoding(&self) -> Result<()> {
        if self.version() != 6 {
            Err(Error::Malformed)
        } else if Self::HEADER_LEN + self.payload_len() > self.buffer.as_ref().len() {
            Err(Error::Malformed)
        } else {
            Ok(())
        }
    }

    pub fn version(&self) -> u8 {
        self.buffer.as_ref()[fields::VERSION_TC_FLOW][0] >> 4
    }

    pub fn traffic_class(&self) -> u8 {
        let word = (&self.buffer.as_ref()[fields::VERSION_TC_FLOW])
            .read_u32::<NetworkEndian>()
            .unwrap();
        ((word >> 20) & 0xFF) as u8
    }

    pub fn flow_label(&self) -> u32 {
        let word = (&self.buffer.as_ref()[fields::VERSION_TC_FLOW])
            .read_u32::<NetworkEndian>()
            .unwrap();
        word & 0x000F_FFFF
    }

    /// Returns the payload length, covering any extension headers.
    pub fn payload_len(&self) -> usize {
        (&self.buffer.as_ref()[fields::PAYLOAD_LEN])
            .read_u16::<NetworkEndian>()
            .unwrap() as usize
    }

    pub fn next_header(&self) -> u8 {
        self.buffer.as_ref()[fields::NEXT_HEADER][0]
    }

    pub fn hop_limit(&self) -> u8 {
        self.buffer.as_ref()[fields::HOP_LIMIT][0]
    }

    pub fn src_addr(&self) -> Address {
        Address::try_new(&self.buffer.as_ref()[fields::SRC_ADDR]).unwrap()
    }

    pub fn dst_addr(&self) -> Address {
        Address::try_new(&self.buffer.as_ref()[fields::DST_ADDR]).unwrap()
    }

    pub fn payload(&self) -> &[u8] {
        let payload_len = self.payload_len();
        &self.buffer.as_ref()[Self::HEADER_LEN .. Self::HEADER_LEN + payload_len]
    }
}

impl<T: AsRef<[u8]> + AsMut<[u8]>> Packet<T> {
    pub fn set_version(&mut self, version: u8) {
        let byte = &mut self.buffer.as_mut()[fields::VERSION_TC_FLOW][0];
        *byte &= 0x0F;
        *byte |= version << 4;
    }

    pub fn set_traffic_class(&mut self, traffic_class: u8) {
        let bytes = &mut self.buffer.as_mut()[fields::VERSION_TC_FLOW];
        bytes[0] &= 0xF0;
        bytes[0] |= traffic_class >> 4;
        bytes[1] &= 0x0F;
        bytes[1] |= traffic_class << 4;
    }

    pub fn set_flow_label(&mut self, flow_label: u32) {
        let bytes = &mut self.buffer.as_mut()[fields::VERSION_TC_FLOW];
        bytes[1] &= 0xF0;
        bytes[1] |= ((flow_label >> 16) & 0x0F) as u8;
        bytes[2] = (flow_label >> 8) as u8;
        bytes[3] = flow_label as u8;
    }

    pub fn set_payload_len(&mut self, payload_len: usize) {
        (&mut self.buffer.as_mut()[fields::PAYLOAD_LEN])
            .write_u16::<NetworkEndian>(payload_len as u16)
            .unwrap()
    }

    pub fn set_next_header(&mut self, next_header: u8) {
        self.buffer.as_mut()[fields::NEXT_HEADER][0] = next_header;
    }

    pub fn set_hop_limit(&mut self, hop_limit: u8) {
        self.buffer.as_mut()[fields::HOP_LIMIT][0] = hop_limit;
    }

    pub fn set_src_addr(&mut self, addr: Address) {
        (&mut self.buffer.as_mut()[fields::SRC_ADDR])
            .write(addr.as_bytes())
            .unwrap();
    }

    pub fn set_dst_addr(&mut self, addr: Address) {
        (&mut self.buffer.as_mut()[fields::DST_ADDR])
            .write(addr.as_bytes())
            .unwrap();
    }

    pub fn payload_mut(&mut self) -> &mut [u8] {
        let payload_len = self.payload_len();
        &mut self.buffer.as_mut()[Self::HEADER_LEN .. Self::HEADER_LEN + payload_len]
    }
}

/// View of a byte buffer as an IPv6 fragment extension header.
#[derive(Debug)]
pub struct FragmentHeader<T: AsRef<[u8]>> {
    buffer: T,
}

impl<T: AsRef<[u8]>> AsRef<[u8]> for FragmentHeader<T> {
    fn as_ref(&self) -> &[u8] {
        self.buffer.as_ref()
    }
}

impl<T: AsRef<[u8]>> FragmentHeader<T> {
    pub const HEADER_LEN: usize = 8;

    /// Tries to create a fragment header view over a byte buffer.
    pub fn try_new(buffer: T) -> Result<FragmentHeader<T>> {
        if buffer.as_ref().len() < Self::HEADER_LEN {
            Err(Error::Exhausted)
        } else {
            Ok(FragmentHeader { buffer })
        }
    }

    /// Returns the length of a fragment header with the specified payload
    /// size.
    pub fn buffer_len(payload_len: usize) -> usize {
        Self::HEADER_LEN + payload_len
    }

    pub fn next_header(&self) -> u8 {
        self.buffer.as_ref()[fields::FRAG_NEXT_HEADER][0]
    }

    /// Returns the fragment offset in bytes.
    pub fn frag_offset(&self) -> usize {
        let raw = (&self.buffer.as_ref()[fields::FRAG_OFFSET_AND_FLAGS])
            .read_u16::<NetworkEndian>()
            .unwrap();
        ((raw >> 3) as usize) * 8
    }

    pub fn more_frags(&self) -> bool {
        let raw = (&self.buffer.as_ref()[fields::FRAG_OFFSET_AND_FLAGS])
            .read_u16::<NetworkEndian>()
            .unwrap();
        (raw & 0x0001) != 0
    }

    pub fn ident(&self) -> u32 {
        (&self.buffer.as_ref()[fields::FRAG_IDENT])
            .read_u32::<NetworkEndian>()
            .unwrap()
    }

    pub fn payload(&self) -> &[u8] {
        &self.buffer.as_ref()[Self::HEADER_LEN ..]
    }
}

impl<T: AsRef<[u8]> + AsMut<[u8]>> FragmentHeader<T> {
    pub fn set_next_header(&mut self, next_header: u8) {
        self.buffer.as_mut()[fields::FRAG_NEXT_HEADER][0] = next_header;
    }

    pub fn set_reserved(&mut self) {
        self.buffer.as_mut()[1] = 0;
    }

    /// Sets the fragment offset, specified in bytes. The offset must be a
    /// multiple of 8 bytes.
    pub fn set_frag_offset(&mut self, frag_offset: usize) {
        let raw = (&self.buffer.as_ref()[fields::FRAG_OFFSET_AND_FLAGS])
            .read_u16::<NetworkEndian>()
            .unwrap();
        let raw = (raw & 0x0007) | ((frag_offset as u16 / 8) << 3);
        (&mut self.buffer.as_mut()[fields::FRAG_OFFSET_AND_FLAGS])
            .write_u16::<NetworkEndian>(raw)
            .unwrap()
    }

    pub fn set_more_frags(&mut self, more_frags: bool) {
        let byte = &mut self.buffer.as_mut()[fields::FRAG_OFFSET_AND_FLAGS][1];
        *byte &= !0x01;
        if more_frags {
            *byte |= 0x01;
        }
    }

    pub fn set_ident(&mut self, ident: u32) {
        (&mut self.buffer.as_mut()[fields::FRAG_IDENT])
            .write_u32::<NetworkEndian>(ident)
            .unwrap()
    }

    pub fn payload_mut(&mut self) -> &mut [u8] {
        &mut self.buffer.as_mut()[Self::HEADER_LEN ..]
    }
}

/// An IPv6 header.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Repr {
    pub src_addr: Address,
    pub dst_addr: Address,
    pub next_header: IpProtocol,
    pub payload_len: u16,
}

impl Repr {
    pub const DEFAULT_HOP_LIMIT: u8 = 64;

    /// Returns the length of the IPv6 header when serialized to a buffer.
    pub fn header_len(&self) -> usize {
        40
    }

    /// Returns the length of the IPv6 packet when serialized to a buffer.
    pub fn buffer_len(&self) -> usize {
        self.header_len() + (self.payload_len as usize)
    }

    /// Deserializes a packet into an IPv6 header.
    pub fn deserialize<T>(packet: &Packet<T>) -> Result<Repr>
    where
        T: AsRef<[u8]>,
    {
        if Packet::<T>::HEADER_LEN + packet.payload_len() > packet.as_ref().len() {
            return Err(Error::Malformed);
        }

        Ok(Repr {
            src_addr: packet.src_addr(),
            dst_addr: packet.dst_addr(),
            next_header: IpProtocol::from(packet.next_header()),
            payload_len: packet.payload_len() as u16,
        })
    }

    /// Serializes the IPv6 header into a packet.
    pub fn serialize<T>(&self, packet: &mut Packet<T>)
    where
        T: AsRef<[u8]> + AsMut<[u8]>,
    {
        packet.set_version(6);
        packet.set_traffic_class(0);
        packet.set_flow_label(0);
        packet.set_payload_len(self.payload_len as usize);
        packet.set_next_header(u8::from(self.next_header));
        packet.set_hop_limit(Self::DEFAULT_HOP_LIMIT);
        packet.set_src_addr(self.src_addr);
        packet.set_dst_addr(self.dst_addr);
    }

    /// Calculates a checksum spanning the IPv6 pseudo header and the provided
    /// buffer, typically an entire transport segment.
    pub fn gen_checksum_with_pseudo_header(&self, buffer: &[u8]) -> u16 {
        let mut pseudo_header = [0; 40];
        pseudo_header[0 .. 16].copy_from_slice(self.src_addr.as_bytes());
        pseudo_header[16 .. 32].copy_from_slice(self.dst_addr.as_bytes());
        (&mut pseudo_header[32 .. 36])
            .write_u32::<NetworkEndian>(u32::from(self.payload_len))
            .unwrap();
        pseudo_header[39] = u8::from(self.next_header);

        let mut acc = Accumulator::new();
        acc.add(&pseudo_header);
        acc.add(buffer);
        acc.checksum()
    }
}
