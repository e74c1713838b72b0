use std::fmt::{
    Display,
    Formatter,
    Result as FmtResult,
};
use std::io::Write;

use byteorder::{
    NetworkEndian,
    ReadBytesExt,
    WriteBytesExt,
};

use crate::{
    Error,
    Result,
};

/// [MAC address](https://en.wikipedia.org/wiki/MAC_address), stored in
/// network byte order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Address([u8; 6]);

impl Address {
    pub const BROADCAST: Address = Address([0xFF; 6]);

    /// Wraps a network byte order buffer as a MAC address.
    pub fn new(addr: [u8; 6]) -> Address {
        Address(addr)
    }

    /// Tries to read a MAC address out of a network byte order slice.
    pub fn try_new(addr: &[u8]) -> Result<Address> {
        if addr.len() != 6 {
            return Err(Error::Exhausted);
        }

        let mut bytes = [0; 6];
        bytes.copy_from_slice(addr);
        Ok(Address(bytes))
    }

    /// Views the address as a network byte order slice.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn is_unicast(&self) -> bool {
        !(self.is_multicast() || self.is_broadcast())
    }

    /// Checks the group bit, which broadcast addresses also carry.
    pub fn is_multicast(&self) -> bool {
        (self.0[0] & 0b00000001) > 0
    }

    pub fn is_broadcast(&self) -> bool {
        self.0 == [0xFF; 6]
    }
}

impl Display for Address {
    fn fmt(&self, f: &mut Formatter) -> FmtResult {
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            self.0[0], self.0[1], self.0[2], self.0[3], self.0[4], self.0[5],
        )
    }
}

/// [https://en.wikipedia.org/wiki/EtherType](https://en.wikipedia.org/wiki/EtherType)
pub mod eth_types {
    pub const IPV4: u16 = 0x800;

    pub const ARP: u16 = 0x806;

    pub const IPV6: u16 = 0x86DD;
}

mod fields {
    use std::ops::{
        Range,
        RangeFrom,
    };

    pub const DST_ADDR: Range<usize> = 0 .. 6;

    pub const SRC_ADDR: Range<usize> = 6 .. 12;

    pub const PAYLOAD_TYPE: Range<usize> = 12 .. 14;

    pub const PAYLOAD: RangeFrom<usize> = 14 ..;
}

/// View of a byte buffer as an Ethernet frame.
#[derive(Debug)]
pub struct Frame<T: AsRef<[u8]>> {
    buffer: T,
}

impl<T: AsRef<[u8]>> AsRef<[u8]> for Frame<T> {
    fn as_ref(&self) -> &[u8] {
        self.buffer.as_ref()
    }
}

impl<T: AsRef<[u8]> + AsMut<[u8]>> AsMut<[u8]> for Frame<T> {
    fn as_mut(&mut self) -> &mut [u8] {
        self.buffer.as_mut()
    }
}

impl<T: AsRef<[u8]>> Frame<T> {
    pub const HEADER_LEN: usize = 14;

    pub const MAX_FRAME_LEN: usize = 1518;

    /// Tries to create an Ethernet frame view over a byte buffer.
    pub fn try_new(buffer: T) -> Result<Frame<T>> {
        let buffer_len = buffer.as_ref().len();
        if buffer_len < Self::HEADER_LEN || buffer_len > Self::MAX_FRAME_LEN {
            Err(Error::Exhausted)
        } else {
            Ok(Frame { buffer })
        }
    }

    /// Returns the length of an Ethernet frame with the specified payload size.
    pub fn buffer_len(payload_len: usize) -> usize {
        Self::HEADER_LEN + payload_len
    }

    pub fn dst_addr(&self) -> Address {
        Address::try_new(&self.buffer.as_ref()[fields::DST_ADDR]).unwrap()
    }

    pub fn src_addr(&self) -> Address {
        Address::try_new(&self.buffer.as_ref()[fields::SRC_ADDR]).unwrap()
    }

    pub fn payload_type(&self) -> u16 {
        (&self.buffer.as_ref()[fields::PAYLOAD_TYPE])
            .read_u16::<NetworkEndian>()
            .unwrap()
    }

    pub fn payload(&self) -> &[u8] {
        &self.buffer.as_ref()[fields::PAYLOAD]
    }
}

impl<T: AsRef<[u8]> + AsMut<[u8]>> Frame<T> {
    pub fn set_dst_addr(&mut self, addr: Address) {
        (&mut self.buffer.as_mut()[fields::DST_ADDR])
            .write(addr.as_bytes())
            .unwrap();
    }

    pub fn set_src_addr(&mut self, addr: Address) {
        (&mut self.buffer.as_mut()[fields::SRC_ADDR])
            .write(addr.as_bytes())
            .unwrap();
    }

    pub fn set_payload_type(&mut self, payload_type: u16) {
        (&mut self.buffer.as_mut()[fields::PAYLOAD_TYPE])
            .write_u16::<NetworkEndian>(payload_type)
            .unwrap();
    }

    pub fn payload_mut(&mut self) -> &mut [u8] {
        &mut self.buffer.as_mut()[fields::PAYLOAD]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_unicast() {
        let addr = Address::new([0x00, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF]);
        assert!(addr.is_unicast());
    }

    #[test]
    fn test_is_multicast() {
        let addr = Address::new([0x01, 0x00, 0x5E, 0x00, 0x00, 0x01]);
        assert!(addr.is_multicast());
    }

    #[test]
    fn test_is_broadcast() {
        let addr = Address::new([0xFF; 6]);
        assert!(addr.is_broadcast());
    }

    #[test]
    fn test_frame_accessors() {
        let mut bytes = vec![0; Frame::<&[u8]>::buffer_len(4)];
        {
            let mut frame = Frame::try_new(&mut bytes[..]).unwrap();
            frame.set_dst_addr(Address::new([0x00, 0x01, 0x02, 0x03, 0x04, 0x05]));
            frame.set_src_addr(Address::new([0x06, 0x07, 0x08, 0x09, 0x0A, 0x0B]));
            frame.set_payload_type(eth_types::IPV4);
            frame.payload_mut().copy_from_slice(&[1, 2, 3, 4]);
        }

        let frame = Frame::try_new(&bytes[..]).unwrap();
        assert_eq!(frame.dst_addr(), Address::new([0x00, 0x01, 0x02, 0x03, 0x04, 0x05]));
        assert_eq!(frame.src_addr(), Address::new([0x06, 0x07, 0x08, 0x09, 0x0A, 0x0B]));
        assert_eq!(frame.payload_type(), eth_types::IPV4);
        assert_eq!(frame.payload(), &[1, 2, 3, 4]);
    }
}
