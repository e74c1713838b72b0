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
use crate::core::check::{
    internet_checksum,
    Accumulator,
};
use crate::core::repr::IpProtocol;

/// [IPv4 address](https://en.wikipedia.org/wiki/IPv4) in network byte order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Address([u8; 4]);

impl Address {
    pub const BROADCAST: Address = Address([0xFF; 4]);

    /// Creates an IPv4 address from a network byte order buffer.
    pub fn new(addr: [u8; 4]) -> Address {
        Address(addr)
    }

    /// Tries to create an IPv4 address from a network byte order slice.
    pub fn try_new(addr: &[u8]) -> Result<Address> {
        if addr.len() != 4 {
            return Err(Error::Exhausted);
        }

        let mut _addr: [u8; 4] = [0; 4];
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
        !(self.is_multicast() || self.is_broadcast() || self.is_unspecified())
    }

    // Checks if this is a multicast address.
    pub fn is_multicast(&self) -> bool {
        (self.0[0] & 0xF0) == 0xE0
    }

    /// Checks if this is the limited broadcast address.
    pub fn is_broadcast(&self) -> bool {
        self.0 == [0xFF; 4]
    }

    pub fn is_unspecified(&self) -> bool {
        self.0 == [0; 4]
    }

    fn as_u32(&self) -> u32 {
        (&self.0[..]).read_u32::<NetworkEndian>().unwrap()
    }

    fn from_u32(addr: u32) -> Address {
        let mut bytes = [0; 4];
        (&mut bytes[..]).write_u32::<NetworkEndian>(addr).unwrap();
        Address(bytes)
    }
}

impl Display for Address {
    fn fmt(&self, f: &mut Formatter) -> FmtResult {
        write!(f, "{}.{}.{}.{}", self.0[0], self.0[1], self.0[2], self.0[3])
    }
}

/// An IPv4 address with a subnet prefix length.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AddressCidr {
    address: Address,
    prefix_len: u8,
}

impl AddressCidr {
    /// Tries to create a CIDR style address with the specified prefix length.
    pub fn try_new(address: Address, prefix_len: usize) -> Result<AddressCidr> {
        if prefix_len > 32 {
            return Err(Error::Malformed);
        }

        Ok(AddressCidr {
            address,
            prefix_len: prefix_len as u8,
        })
    }

    /// Checks if an address is a member of the subnet.
    pub fn is_member(&self, address: Address) -> bool {
        (address.as_u32() & self.mask()) == (self.address.as_u32() & self.mask())
    }

    /// Returns the directed broadcast address of the subnet.
    pub fn broadcast(&self) -> Address {
        Address::from_u32(self.address.as_u32() | !self.mask())
    }

    fn mask(&self) -> u32 {
        if self.prefix_len == 0 {
            0
        } else {
            !0 << (32 - u32::from(self.prefix_len))
        }
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

/// [https://en.wikipedia.org/wiki/IPv4#Header](https://en.wikipedia.org/wiki/IPv4#Header)
mod fields {
    use std::ops::Range;

    pub const VERSION_AND_IHL: Range<usize> = 0 .. 1;

    pub const DSCP_AND_ECN: Range<usize> = 1 .. 2;

    pub const TOTAL_LEN: Range<usize> = 2 .. 4;

    pub const IDENT: Range<usize> = 4 .. 6;

    pub const FLAGS_AND_FRAG_OFFSET: Range<usize> = 6 .. 8;

    pub const TTL: Range<usize> = 8 .. 9;

    pub const PROTOCOL: Range<usize> = 9 .. 10;

    pub const CHECKSUM: Range<usize> = 10 .. 12;

    pub const SRC_ADDR: Range<usize> = 12 .. 16;

    pub const DST_ADDR: Range<usize> = 16 .. 20;
}

/// View of a byte buffer as an IPv4 packet.
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
    pub const MIN_HEADER_LEN: usize = 20;

    pub const MAX_HEADER_LEN: usize = 60;

    /// Tries to create an IPv4 packet view over a byte buffer.
    ///
    /// NOTE: Use check_encoding() before operating on the packet if
    /// constructing a packet via a buffer originating from an untrusted source
    /// like a link.
    pub fn try_new(buffer: T) -> Result<Packet<T>> {
        if buffer.as_ref().len() < Self::MIN_HEADER_LEN {
            Err(Error::Exhausted)
        } else {
            Ok(Packet { buffer })
        }
    }

    /// Returns the length of an IPv4 packet with no options and the specified
    /// payload size.
    pub fn buffer_len(payload_len: usize) -> usize {
        Self::MIN_HEADER_LEN + payload_len
    }

    /// Checks if the packet has a valid encoding. This may include checksum,
    /// field consistency, etc. checks.
    pub fn check_encoding(&self) -> Result<()> {
        if self.gen_header_checksum() != 0 {
            Err(Error::Checksum)
        } else if self.version() != 4 {
            Err(Error::Malformed)
        } else if self.header_len() < Self::MIN_HEADER_LEN
            || self.header_len() > self.total_len()
            || self.total_len() > self.buffer.as_ref().len()
        {
            Err(Error::Malformed)
        } else {
            Ok(())
        }
    }

    /// Calculates the header checksum.
    pub fn gen_header_checksum(&self) -> u16 {
        let header_len = std::cmp::min(self.header_len(), self.buffer.as_ref().len());
        internet_checksum(&self.buffer.as_ref()[.. header_len])
    }

    pub fn version(&self) -> u8 {
        self.buffer.as_ref()[fields::VERSION_AND_IHL][0] >> 4
    }

    /// Returns the length of the header in bytes.
    pub fn header_len(&self) -> usize {
        ((self.buffer.as_ref()[fields::VERSION_AND_IHL][0] & 0x0F) as usize) * 4
    }

    pub fn dscp_and_ecn(&self) -> u8 {
        self.buffer.as_ref()[fields::DSCP_AND_ECN][0]
    }

    pub fn total_len(&self) -> usize {
        (&self.buffer.as_ref()[fields::TOTAL_LEN])
            .read_u16::<NetworkEndian>()
            .unwrap() as usize
    }

    pub fn ident(&self) -> u16 {
        (&self.buffer.as_ref()[fields::IDENT])
            .read_u16::<NetworkEndian>()
            .unwrap()
    }

    pub fn dont_frag(&self) -> bool {
        (self.buffer.as_ref()[fields::FLAGS_AND_FRAG_OFFSET][0] & 0x40) != 0
    }

    pub fn more_frags(&self) -> bool {
        (self.buffer.as_ref()[fields::FLAGS_AND_FRAG_OFFSET][0] & 0x20) != 0
    }

    /// Returns the fragment offset in bytes.
    pub fn frag_offset(&self) -> usize {
        let units = (&self.buffer.as_ref()[fields::FLAGS_AND_FRAG_OFFSET])
            .read_u16::<NetworkEndian>()
            .unwrap() & 0x1FFF;
        (units as usize) * 8
    }

    pub fn ttl(&self) -> u8 {
        self.buffer.as_ref()[fields::TTL][0]
    }

    pub fn protocol(&self) -> u8 {
        self.buffer.as_ref()[fields::PROTOCOL][0]
    }

    pub fn checksum(&self) -> u16 {
        (&self.buffer.as_ref()[fields::CHECKSUM])
            .read_u16::<NetworkEndian>()
            .unwrap()
    }

    pub fn src_addr(&self) -> Address {
        Address::try_new(&self.buffer.as_ref()[fields::SRC_ADDR]).unwrap()
    }

    pub fn dst_addr(&self) -> Address {
        Address::try_new(&self.buffer.as_ref()[fields::DST_ADDR]).unwrap()
    }

    pub fn payload(&self) -> &[u8] {
        let (header_len, total_len) = (self.header_len(), self.total_len());
        &self.buffer.as_ref()[header_len .. total_len]
    }
}

impl<T: AsRef<[u8]> + AsMut<[u8]>> Packet<T> {
    pub fn set_version(&mut self, version: u8) {
        let byte = &mut self.buffer.as_mut()[fields::VERSION_AND_IHL][0];
        *byte &= 0x0F;
        *byte |= version << 4;
    }

    /// Sets the length of the header, specified in bytes.
    pub fn set_header_len(&mut self, header_len: usize) {
        let byte = &mut self.buffer.as_mut()[fields::VERSION_AND_IHL][0];
        *byte &= 0xF0;
        *byte |= ((header_len / 4) as u8) & 0x0F;
    }

    pub fn set_dscp_and_ecn(&mut self, dscp_and_ecn: u8) {
        self.buffer.as_mut()[fields::DSCP_AND_ECN][0] = dscp_and_ecn;
    }

    pub fn set_total_len(&mut self, total_len: usize) {
        (&mut self.buffer.as_mut()[fields::TOTAL_LEN])
            .write_u16::<NetworkEndian>(total_len as u16)
            .unwrap()
    }

    pub fn set_ident(&mut self, ident: u16) {
        (&mut self.buffer.as_mut()[fields::IDENT])
            .write_u16::<NetworkEndian>(ident)
            .unwrap()
    }

    pub fn set_dont_frag(&mut self, dont_frag: bool) {
        let byte = &mut self.buffer.as_mut()[fields::FLAGS_AND_FRAG_OFFSET][0];
        *byte &= !0x40;
        if dont_frag {
            *byte |= 0x40;
        }
    }

    pub fn set_more_frags(&mut self, more_frags: bool) {
        let byte = &mut self.buffer.as_mut()[fields::FLAGS_AND_FRAG_OFFSET][0];
        *byte &= !0x20;
        if more_frags {
            *byte |= 0x20;
        }
    }

    /// Sets the fragment offset, specified in bytes. The offset must be a
    /// multiple of 8 bytes.
    pub fn set_frag_offset(&mut self, frag_offset: usize) {
        let flags = self.buffer.as_ref()[fields::FLAGS_AND_FRAG_OFFSET][0] & 0xE0;
        let units = ((frag_offset / 8) as u16) & 0x1FFF;
        (&mut self.buffer.as_mut()[fields::FLAGS_AND_FRAG_OFFSET])
            .write_u16::<NetworkEndian>(units)
            .unwrap();
        self.buffer.as_mut()[fields::FLAGS_AND_FRAG_OFFSET][0] |= flags;
    }

    pub fn set_ttl(&mut self, ttl: u8) {
        self.buffer.as_mut()[fields::TTL][0] = ttl;
    }

    pub fn set_protocol(&mut self, protocol: u8) {
        self.buffer.as_mut()[fields::PROTOCOL][0] = protocol;
    }

    pub fn set_checksum(&mut self, checksum: u16) {
        (&mut self.buffer.as_mut()[fields::CHECKSUM])
            .write_u16::<NetworkEndian>(checksum)
            .unwrap()
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

    /// Updates the header checksum field to match the header contents.
    pub fn fill_checksum(&mut self) {
        self.set_checksum(0);
        let checksum = self.gen_header_checksum();
        self.set_checksum(checksum);
    }

    pub fn payload_mut(&mut self) -> &mut [u8] {
        let (header_len, total_len) = (self.header_len(), self.total_len());
        &mut self.buffer.as_mut()[header_len .. total_len]
    }
}

/// An IPv4 header.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Repr {
    pub src_addr: Address,
    pub dst_addr: Address,
    pub protocol: IpProtocol,
    pub payload_len: u16,
}

impl Repr {
    pub const DEFAULT_TTL: u8 = 64;

    /// Returns the length of the IPv4 header when serialized to a buffer.
    pub fn header_len(&self) -> usize {
        20
    }

    /// Returns the length of the IPv4 packet when serialized to a buffer.
    pub fn buffer_len(&self) -> usize {
        self.header_len() + (self.payload_len as usize)
    }

    /// Deserializes a packet into an IPv4 header.
    pub fn deserialize<T>(packet: &Packet<T>) -> Result<Repr>
    where
        T: AsRef<[u8]>,
    {
        if packet.total_len() < packet.header_len() {
            return Err(Error::Malformed);
        }

        Ok(Repr {
            src_addr: packet.src_addr(),
            dst_addr: packet.dst_addr(),
            protocol: IpProtocol::from(packet.protocol()),
            payload_len: (packet.total_len() - packet.header_len()) as u16,
        })
    }

    /// Serializes the IPv4 header into a packet and performs a checksum
    /// update.
    pub fn serialize<T>(&self, packet: &mut Packet<T>)
    where
        T: AsRef<[u8]> + AsMut<[u8]>,
    {
        packet.set_version(4);
        packet.set_header_len(self.header_len());
        packet.set_dscp_and_ecn(0);
        packet.set_total_len(self.buffer_len());
        packet.set_ident(0);
        packet.set_dont_frag(false);
        packet.set_more_frags(false);
        packet.set_frag_offset(0);
        packet.set_ttl(Self::DEFAULT_TTL);
        packet.set_protocol(u8::from(self.protocol));
        packet.set_src_addr(self.src_addr);
        packet.set_dst_addr(self.dst_addr);
        packet.fill_checksum();
    }

    /// Calculates a checksum spanning the IPv4 pseudo header and the provided
    /// buffer, typically an entire transport segment.
    pub fn gen_checksum_with_pseudo_header(&self, buffer: &[u8]) -> u16 {
        let mut pseudo_header = [0; 12];
        pseudo_header[0 .. 4].copy_from_slice(self.src_addr.as_bytes());
        pseudo_header[4 .. 8].copy_from_slice(self.dst_addr.as_bytes());
        pseudo_header[9] = u8::from(self.protocol);
        (&mut pseudo_header[10 .. 12])
            .write_u16::<NetworkEndian>(self.payload_len)
            .unwrap();

        let mut acc = Accumulator::new();
        acc.add(&pseudo_header);
        acc.add(buffer);
        acc.checksum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_types() {
        assert!(Address::new([10, 0, 0, 1]).is_unicast());
        assert!(Address::new([224, 0, 0, 1]).is_multicast());
        assert!(Address::new([255, 255, 255, 255]).is_broadcast());
        assert!(Address::new([0, 0, 0, 0]).is_unspecified());
    }

    #[test]
    fn test_cidr_membership() {
        let cidr = AddressCidr::try_new(Address::new([192, 168, 1, 1]), 24).unwrap();
        assert!(cidr.is_member(Address::new([192, 168, 1, 254])));
        assert!(!cidr.is_member(Address::new([192, 168, 2, 1])));
        assert_eq!(cidr.broadcast(), Address::new([192, 168, 1, 255]));
        assert_eq!(*cidr, Address::new([192, 168, 1, 1]));
    }

    #[test]
    fn test_cidr_with_invalid_prefix() {
        assert_matches!(
            AddressCidr::try_new(Address::new([192, 168, 1, 1]), 33),
            Err(Error::Malformed)
        );
    }

    #[test]
    fn test_packet_with_buffer_less_than_min_header() {
        let buffer: [u8; 19] = [0; 19];
        let packet = Packet::try_new(&buffer[..]);
        assert_matches!(packet, Err(Error::Exhausted));
    }

    #[test]
    fn test_packet_with_invalid_checksum() {
        let buffer: [u8; 28] = [
            0x45, 0x00, 0x00, 0x1C, 0x12, 0x34, 0x40, 0x00, 0x40, 0x06, 0xA5, 0x55, 0xC0, 0xA8,
            0x01, 0x01, 0xC0, 0xA8, 0x01, 0x02, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
        ];
        let packet = Packet::try_new(&buffer[..]).unwrap();
        assert_matches!(packet.check_encoding(), Err(Error::Checksum));
    }

    #[test]
    fn test_packet_getters() {
        let buffer: [u8; 28] = [
            0x45, 0x00, 0x00, 0x1C, 0x12, 0x34, 0x40, 0x00, 0x40, 0x06, 0xA5, 0x54, 0xC0, 0xA8,
            0x01, 0x01, 0xC0, 0xA8, 0x01, 0x02, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
        ];
        let packet = Packet::try_new(&buffer[..]).unwrap();

        assert_matches!(packet.check_encoding(), Ok(_));
        assert_eq!(4, packet.version());
        assert_eq!(20, packet.header_len());
        assert_eq!(28, packet.total_len());
        assert_eq!(0x1234, packet.ident());
        assert!(packet.dont_frag());
        assert!(!packet.more_frags());
        assert_eq!(0, packet.frag_offset());
        assert_eq!(64, packet.ttl());
        assert_eq!(6, packet.protocol());
        assert_eq!(0xA554, packet.checksum());
        assert_eq!(Address::new([192, 168, 1, 1]), packet.src_addr());
        assert_eq!(Address::new([192, 168, 1, 2]), packet.dst_addr());
        assert_eq!(8, packet.payload().len());
    }

    #[test]
    fn test_packet_fragment_fields() {
        let buffer: [u8; 28] = [
            0x45, 0x00, 0x00, 0x1C, 0xBE, 0xEF, 0x20, 0x40, 0x40, 0x06, 0x18, 0x59, 0xC0, 0xA8,
            0x01, 0x01, 0xC0, 0xA8, 0x01, 0x02, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
        ];
        let packet = Packet::try_new(&buffer[..]).unwrap();

        assert_matches!(packet.check_encoding(), Ok(_));
        assert_eq!(0xBEEF, packet.ident());
        assert!(!packet.dont_frag());
        assert!(packet.more_frags());
        assert_eq!(512, packet.frag_offset());
    }

    #[test]
    fn test_packet_setters() {
        let mut buffer: [u8; 28] = [0; 28];

        {
            let mut packet = Packet::try_new(&mut buffer[..]).unwrap();
            packet.set_version(4);
            packet.set_header_len(20);
            packet.set_dscp_and_ecn(0);
            packet.set_total_len(28);
            packet.set_ident(0xBEEF);
            packet.set_dont_frag(false);
            packet.set_more_frags(true);
            packet.set_frag_offset(512);
            packet.set_ttl(64);
            packet.set_protocol(6);
            packet.set_src_addr(Address::new([192, 168, 1, 1]));
            packet.set_dst_addr(Address::new([192, 168, 1, 2]));
            packet.fill_checksum();
        }

        assert_eq!(
            &buffer[..],
            &[
                0x45, 0x00, 0x00, 0x1C, 0xBE, 0xEF, 0x20, 0x40, 0x40, 0x06, 0x18, 0x59, 0xC0,
                0xA8, 0x01, 0x01, 0xC0, 0xA8, 0x01, 0x02, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
                0x00, 0x00,
            ][..]
        );
    }

    #[test]
    fn test_repr_roundtrip() {
        let repr = Repr {
            src_addr: Address::new([10, 0, 0, 1]),
            dst_addr: Address::new([10, 0, 0, 2]),
            protocol: IpProtocol::Tcp,
            payload_len: 8,
        };

        let mut buffer = vec![0; repr.buffer_len()];
        let mut packet = Packet::try_new(&mut buffer[..]).unwrap();
        repr.serialize(&mut packet);

        assert_matches!(packet.check_encoding(), Ok(_));
        assert_eq!(Repr::deserialize(&packet), Ok(repr));
    }
}
