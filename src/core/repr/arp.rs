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
use crate::core::repr::{
    EthernetAddress,
    Ipv4Address,
};

#[repr(u16)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
// https://www.iana.org/assignments/arp-parameters/arp-parameters.xhtml#arp-parameters-1
pub enum Op {
    Request = 0x0001,
    Reply = 0x0002,
}

#[repr(u16)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
// https://www.iana.org/assignments/arp-parameters/arp-parameters.xhtml#arp-parameters-2
pub enum HwType {
    Ethernet = 0x0001,
}

#[repr(u16)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
// https://www.iana.org/assignments/arp-parameters/arp-parameters.xhtml#arp-parameters-3
pub enum ProtoType {
    Ipv4 = 0x0800,
}

/// An Ethernet + IPv4 ARP packet.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Arp {
    pub op: Op,
    pub source_hw_addr: EthernetAddress,
    pub source_proto_addr: Ipv4Address,
    pub target_hw_addr: EthernetAddress,
    pub target_proto_addr: Ipv4Address,
}

impl Arp {
    /// Returns the size of the ARP packet when serialized to a buffer.
    pub fn buffer_len(&self) -> usize {
        28
    }

    /// Deserializes a buffer into an ARP packet.
    pub fn deserialize(buffer: &[u8]) -> Result<Arp> {
        if buffer.len() < 28 {
            return Err(Error::Exhausted);
        }

        let mut reader = std::io::Cursor::new(buffer);
        let hw_type = reader.read_u16::<NetworkEndian>().unwrap();
        let proto_type = reader.read_u16::<NetworkEndian>().unwrap();
        let hw_len = reader.read_u8().unwrap();
        let proto_len = reader.read_u8().unwrap();
        let op = reader.read_u16::<NetworkEndian>().unwrap();

        if hw_type != HwType::Ethernet as u16
            || proto_type != ProtoType::Ipv4 as u16
            || hw_len != 6
            || proto_len != 4
        {
            return Err(Error::Malformed);
        }

        let op = match op {
            op if op == Op::Request as u16 => Op::Request,
            op if op == Op::Reply as u16 => Op::Reply,
            _ => return Err(Error::Malformed),
        };

        Ok(Arp {
            op,
            source_hw_addr: EthernetAddress::try_new(&buffer[8 .. 14]).unwrap(),
            source_proto_addr: Ipv4Address::try_new(&buffer[14 .. 18]).unwrap(),
            target_hw_addr: EthernetAddress::try_new(&buffer[18 .. 24]).unwrap(),
            target_proto_addr: Ipv4Address::try_new(&buffer[24 .. 28]).unwrap(),
        })
    }

    /// Serializes the ARP packet into a buffer.
    ///
    /// You should ensure buffer has at least buffer_len() bytes to avoid errors.
    pub fn serialize(&self, buffer: &mut [u8]) -> Result<()> {
        if self.buffer_len() > buffer.len() {
            return Err(Error::Exhausted);
        }

        let mut writer = std::io::Cursor::new(buffer);
        writer
            .write_u16::<NetworkEndian>(HwType::Ethernet as u16)
            .unwrap();
        writer
            .write_u16::<NetworkEndian>(ProtoType::Ipv4 as u16)
            .unwrap();
        writer.write_u8(6).unwrap();
        writer.write_u8(4).unwrap();
        writer.write_u16::<NetworkEndian>(self.op as u16).unwrap();
        writer.write(self.source_hw_addr.as_bytes()).unwrap();
        writer.write(self.source_proto_addr.as_bytes()).unwrap();
        writer.write(self.target_hw_addr.as_bytes()).unwrap();
        writer.write(self.target_proto_addr.as_bytes()).unwrap();

        Ok(())
    }
}
