use byteorder::{
    NetworkEndian,
    ReadBytesExt,
    WriteBytesExt,
};

use crate::{
    Error,
    Result,
};
use crate::core::check::internet_checksum;

/// Safe representation of the ICMP messages the stack sends and answers.
///
/// Error messages carry the offender's IP header plus the leading payload
/// bytes, so their size depends on that header's length.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Repr {
    EchoReply {
        id: u16,
        seq: u16,
    },
    EchoRequest {
        id: u16,
        seq: u16,
    },
    DestinationUnreachable {
        reason: DestinationUnreachable,
        ipv4_header_len: usize,
    },
    TimeExceeded {
        reason: TimeExceeded,
        ipv4_header_len: usize,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DestinationUnreachable {
    ProtocolUnreachable,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TimeExceeded {
    TTLExpired,
    FragmentReassembly,
}

impl Repr {
    /// Returns the ICMP packet size needed to serialize this
    /// representation.
    pub fn buffer_len(&self) -> usize {
        match *self {
            Repr::DestinationUnreachable { ipv4_header_len, .. }
            | Repr::TimeExceeded { ipv4_header_len, .. } => {
                // Offending IP header + 8 bytes of its payload.
                Packet::<&[u8]>::HEADER_LEN + ipv4_header_len + 8
            }
            Repr::EchoReply { .. } | Repr::EchoRequest { .. } => Packet::<&[u8]>::HEADER_LEN,
        }
    }

    /// Tries to deserialize a packet into an ICMP representation,
    /// rejecting messages the stack does not model.
    pub fn deserialize<T>(packet: &Packet<T>) -> Result<Repr>
    where
        T: AsRef<[u8]>,
    {
        fn embedded_header_len<T>(packet: &Packet<T>) -> Result<usize>
        where
            T: AsRef<[u8]>,
        {
            // The echoed datagram must cover at least a minimal IP header
            // and 8 payload bytes.
            if packet.payload().len() < 28 {
                Err(Error::Malformed)
            } else {
                Ok(packet.payload().len() - 8)
            }
        }

        let id = (&packet.header()[0 .. 2])
            .read_u16::<NetworkEndian>()
            .unwrap();
        let seq = (&packet.header()[2 .. 4])
            .read_u16::<NetworkEndian>()
            .unwrap();

        match (packet._type(), packet.code()) {
            (0, 0) => Ok(Repr::EchoReply { id, seq }),
            (8, 0) => Ok(Repr::EchoRequest { id, seq }),
            (3, 2) => Ok(Repr::DestinationUnreachable {
                reason: DestinationUnreachable::ProtocolUnreachable,
                ipv4_header_len: embedded_header_len(packet)?,
            }),
            (11, 0) => Ok(Repr::TimeExceeded {
                reason: TimeExceeded::TTLExpired,
                ipv4_header_len: embedded_header_len(packet)?,
            }),
            (11, 1) => Ok(Repr::TimeExceeded {
                reason: TimeExceeded::FragmentReassembly,
                ipv4_header_len: embedded_header_len(packet)?,
            }),
            _ => Err(Error::Malformed),
        }
    }

    /// Serializes the ICMP representation into a packet.
    ///
    /// The payload must already be in place and sized to match, the
    /// checksum written here spans the entire packet.
    pub fn serialize<T>(&self, packet: &mut Packet<T>) -> Result<()>
    where
        T: AsRef<[u8]> + AsMut<[u8]>,
    {
        let (type_of, code) = match *self {
            Repr::EchoReply { .. } => (0, 0),
            Repr::EchoRequest { .. } => (8, 0),
            Repr::DestinationUnreachable { reason, .. } => match reason {
                DestinationUnreachable::ProtocolUnreachable => (3, 2),
            },
            Repr::TimeExceeded { reason, .. } => match reason {
                TimeExceeded::TTLExpired => (11, 0),
                TimeExceeded::FragmentReassembly => (11, 1),
            },
        };

        match *self {
            Repr::EchoReply { id, seq } | Repr::EchoRequest { id, seq } => {
                (&mut packet.header_mut()[0 .. 2])
                    .write_u16::<NetworkEndian>(id)
                    .unwrap();
                (&mut packet.header_mut()[2 .. 4])
                    .write_u16::<NetworkEndian>(seq)
                    .unwrap();
            }
            Repr::DestinationUnreachable { ipv4_header_len, .. }
            | Repr::TimeExceeded { ipv4_header_len, .. } => {
                // The echoed datagram dictates the packet size exactly.
                if packet.payload().len() != ipv4_header_len + 8 {
                    return Err(Error::Malformed);
                }
                // The rest of the header is unused in error messages.
                for byte in packet.header_mut() {
                    *byte = 0;
                }
            }
        }

        packet.set_type(type_of);
        packet.set_code(code);

        packet.set_checksum(0);
        let checksum = packet.gen_packet_checksum();
        packet.set_checksum(checksum);

        Ok(())
    }
}

/// [https://en.wikipedia.org/wiki/Internet_Control_Message_Protocol](https://en.wikipedia.org/wiki/Internet_Control_Message_Protocol)
mod fields {
    use std::ops::{
        Range,
        RangeFrom,
    };

    pub const TYPE: usize = 0;

    pub const CODE: usize = 1;

    pub const CHECKSUM: Range<usize> = 2 .. 4;

    pub const HEADER: Range<usize> = 4 .. 8;

    pub const PAYLOAD: RangeFrom<usize> = 8 ..;
}

/// View of a byte buffer as an ICMP packet.
#[derive(Debug)]
pub struct Packet<T: AsRef<[u8]>> {
    buffer: T,
}

impl<T: AsRef<[u8]>> Packet<T> {
    pub const HEADER_LEN: usize = 8;

    pub const MAX_PACKET_LEN: usize = 65535;

    /// Tries to create an ICMP packet view over a byte buffer.
    pub fn try_new(buffer: T) -> Result<Packet<T>> {
        let buffer_len = buffer.as_ref().len();
        if buffer_len < Self::HEADER_LEN || buffer_len > Self::MAX_PACKET_LEN {
            Err(Error::Exhausted)
        } else {
            Ok(Packet { buffer })
        }
    }

    /// Returns the length of an ICMP packet with the specified payload size.
    pub fn buffer_len(payload_len: usize) -> usize {
        Self::HEADER_LEN + payload_len
    }

    /// Checks that the checksum over the entire packet is valid.
    pub fn check_encoding(&self) -> Result<()> {
        if self.gen_packet_checksum() != 0 {
            Err(Error::Checksum)
        } else {
            Ok(())
        }
    }

    /// Calculates the packet checksum.
    pub fn gen_packet_checksum(&self) -> u16 {
        internet_checksum(self.buffer.as_ref())
    }

    pub fn _type(&self) -> u8 {
        self.buffer.as_ref()[fields::TYPE]
    }

    pub fn code(&self) -> u8 {
        self.buffer.as_ref()[fields::CODE]
    }

    pub fn checksum(&self) -> u16 {
        (&self.buffer.as_ref()[fields::CHECKSUM])
            .read_u16::<NetworkEndian>()
            .unwrap()
    }

    /// Returns the 4 header bytes whose meaning depends on the message
    /// type.
    pub fn header(&self) -> &[u8] {
        &self.buffer.as_ref()[fields::HEADER]
    }

    pub fn payload(&self) -> &[u8] {
        &self.buffer.as_ref()[fields::PAYLOAD]
    }
}

impl<T: AsRef<[u8]> + AsMut<[u8]>> Packet<T> {
    pub fn set_type(&mut self, type_of: u8) {
        self.buffer.as_mut()[fields::TYPE] = type_of
    }

    pub fn set_code(&mut self, code: u8) {
        self.buffer.as_mut()[fields::CODE] = code;
    }

    pub fn set_checksum(&mut self, checksum: u16) {
        (&mut self.buffer.as_mut()[fields::CHECKSUM])
            .write_u16::<NetworkEndian>(checksum)
            .unwrap()
    }

    pub fn header_mut(&mut self) -> &mut [u8] {
        &mut self.buffer.as_mut()[fields::HEADER]
    }

    pub fn payload_mut(&mut self) -> &mut [u8] {
        &mut self.buffer.as_mut()[fields::PAYLOAD]
    }
}
