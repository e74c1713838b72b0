use byteorder::{
    NetworkEndian,
    ReadBytesExt,
    WriteBytesExt,
};

use crate::{
    Error,
    Result,
};
use crate::core::repr::IpRepr;

/// A TCP header.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Repr {
    pub src_port: u16,
    pub dst_port: u16,
    pub seq_num: u32,
    pub ack_num: u32,
    /// Access using the provided FLAG constants.
    pub flags: [bool; 9],
    pub window_size: u16,
    pub urgent_pointer: u16,
    pub max_segment_size: Option<u16>,
    pub sack_permitted: bool,
    /// Selective acknowledgment blocks, [first, last) sequence number pairs.
    pub sack_blocks: [Option<(u32, u32)>; 4],
}

impl Repr {
    pub const FLAG_NS: usize = 0;

    pub const FLAG_CWR: usize = 1;

    pub const FLAG_ECE: usize = 2;

    pub const FLAG_URG: usize = 3;

    pub const FLAG_ACK: usize = 4;

    pub const FLAG_PSH: usize = 5;

    pub const FLAG_RST: usize = 6;

    pub const FLAG_SYN: usize = 7;

    pub const FLAG_FIN: usize = 8;

    /// Creates a header with the specified ports and every other field
    /// cleared.
    pub fn new(src_port: u16, dst_port: u16) -> Repr {
        Repr {
            src_port,
            dst_port,
            seq_num: 0,
            ack_num: 0,
            flags: [false; 9],
            window_size: 0,
            urgent_pointer: 0,
            max_segment_size: None,
            sack_permitted: false,
            sack_blocks: [None; 4],
        }
    }

    /// Returns the length of the TCP header, including options, when
    /// serialized to a buffer.
    pub fn header_len(&self) -> usize {
        let mut options_len = 0;
        if self.max_segment_size.is_some() {
            options_len += 4;
        }
        if self.sack_permitted {
            options_len += 2;
        }
        let sack_count = self.sack_blocks.iter().filter(|block| block.is_some()).count();
        if sack_count > 0 {
            options_len += 2 + 8 * sack_count;
        }

        20 + ((options_len + 3) / 4) * 4
    }

    /// Deserializes a packet into a TCP header.
    pub fn deserialize<T>(packet: &Packet<T>) -> Repr
    where
        T: AsRef<[u8]>,
    {
        let mut repr = Repr {
            src_port: packet.src_port(),
            dst_port: packet.dst_port(),
            seq_num: packet.seq_num(),
            ack_num: packet.ack_num(),
            flags: [
                packet.ns(),
                packet.cwr(),
                packet.ece(),
                packet.urg(),
                packet.ack(),
                packet.psh(),
                packet.rst(),
                packet.syn(),
                packet.fin(),
            ],
            window_size: packet.window_size(),
            urgent_pointer: packet.urgent_pointer(),
            max_segment_size: None,
            sack_permitted: false,
            sack_blocks: [None; 4],
        };

        let buffer = packet.as_ref();
        let data_offset = (packet.data_offset() as usize) * 4;
        let options_end = std::cmp::min(data_offset, buffer.len());
        let mut idx = 20;

        // Walks the options, stopping at the first malformed one.
        while idx < options_end {
            match buffer[idx] {
                options::END => break,
                options::NOP => idx += 1,
                kind => {
                    if idx + 1 >= options_end {
                        break;
                    }
                    let len = buffer[idx + 1] as usize;
                    if len < 2 || idx + len > options_end {
                        break;
                    }

                    match kind {
                        options::MAX_SEGMENT_SIZE if len == 4 => {
                            repr.max_segment_size = Some(
                                (&buffer[idx + 2 .. idx + 4])
                                    .read_u16::<NetworkEndian>()
                                    .unwrap(),
                            );
                        }
                        options::SACK_PERMITTED if len == 2 => {
                            repr.sack_permitted = true;
                        }
                        options::SACK => {
                            let count = (len - 2) / 8;
                            for i in 0 .. std::cmp::min(count, repr.sack_blocks.len()) {
                                let at = idx + 2 + i * 8;
                                let first = (&buffer[at .. at + 4])
                                    .read_u32::<NetworkEndian>()
                                    .unwrap();
                                let last = (&buffer[at + 4 .. at + 8])
                                    .read_u32::<NetworkEndian>()
                                    .unwrap();
                                repr.sack_blocks[i] = Some((first, last));
                            }
                        }
                        _ => {}
                    }

                    idx += len;
                }
            }
        }

        repr
    }

    /// Serializes the TCP header and options into a packet, zeroing the
    /// checksum field.
    ///
    /// Use Packet::fill_checksum() once the payload is written.
    pub fn serialize<T>(&self, packet: &mut Packet<T>) -> Result<()>
    where
        T: AsRef<[u8]> + AsMut<[u8]>,
    {
        let header_len = self.header_len();
        if header_len > packet.as_ref().len() {
            return Err(Error::Exhausted);
        }

        packet.set_src_port(self.src_port);
        packet.set_dst_port(self.dst_port);
        packet.set_seq_num(self.seq_num);
        packet.set_ack_num(self.ack_num);
        packet.set_data_offset((header_len / 4) as u8);
        packet.set_ns(self.flags[Self::FLAG_NS]);
        packet.set_cwr(self.flags[Self::FLAG_CWR]);
        packet.set_ece(self.flags[Self::FLAG_ECE]);
        packet.set_urg(self.flags[Self::FLAG_URG]);
        packet.set_ack(self.flags[Self::FLAG_ACK]);
        packet.set_psh(self.flags[Self::FLAG_PSH]);
        packet.set_rst(self.flags[Self::FLAG_RST]);
        packet.set_syn(self.flags[Self::FLAG_SYN]);
        packet.set_fin(self.flags[Self::FLAG_FIN]);
        packet.set_window_size(self.window_size);
        packet.set_checksum(0);
        packet.set_urgent_pointer(self.urgent_pointer);
        self.serialize_options(&mut packet.as_mut()[20 .. header_len]);

        Ok(())
    }

    fn serialize_options(&self, buffer: &mut [u8]) {
        for byte in buffer.iter_mut() {
            *byte = 0;
        }

        let mut writer = std::io::Cursor::new(buffer);
        if let Some(max_segment_size) = self.max_segment_size {
            writer.write_u8(options::MAX_SEGMENT_SIZE).unwrap();
            writer.write_u8(4).unwrap();
            writer
                .write_u16::<NetworkEndian>(max_segment_size)
                .unwrap();
        }
        if self.sack_permitted {
            writer.write_u8(options::SACK_PERMITTED).unwrap();
            writer.write_u8(2).unwrap();
        }
        let sack_count = self.sack_blocks.iter().filter(|block| block.is_some()).count();
        if sack_count > 0 {
            writer.write_u8(options::SACK).unwrap();
            writer.write_u8((2 + 8 * sack_count) as u8).unwrap();
            for &(first, last) in self.sack_blocks.iter().filter_map(|block| block.as_ref()) {
                writer.write_u32::<NetworkEndian>(first).unwrap();
                writer.write_u32::<NetworkEndian>(last).unwrap();
            }
        }
    }
}

/// [https://en.wikipedia.org/wiki/Transmission_Control_Protocol#TCP_segment_structure](https://en.wikipedia.org/wiki/Transmission_Control_Protocol#TCP_segment_structure)
mod fields {
    use std::ops::Range;

    pub const SRC_PORT: Range<usize> = 0 .. 2;

    pub const DST_PORT: Range<usize> = 2 .. 4;

    pub const SEQ_NUM: Range<usize> = 4 .. 8;

    pub const ACK_NUM: Range<usize> = 8 .. 12;

    pub const DATA_OFFSET_AND_FLAGS: Range<usize> = 12 .. 14;

    pub const WINDOW_SIZE: Range<usize> = 14 .. 16;

    pub const CHECKSUM: Range<usize> = 16 .. 18;

    pub const URGENT_POINTER: Range<usize> = 18 .. 20;
}

mod options {
    pub const END: u8 = 0;

    pub const NOP: u8 = 1;

    pub const MAX_SEGMENT_SIZE: u8 = 2;

    pub const SACK_PERMITTED: u8 = 4;

    pub const SACK: u8 = 5;
}

/// View of a byte buffer as a TCP packet.
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

    /// Tries to create an TCP packet from a byte buffer.
    ///
    /// NOTE: Use check_encoding() before operating on the packet if constructing
    /// a packet via a buffer originating from an untrusted source like a link.
    pub fn try_new(buffer: T) -> Result<Packet<T>> {
        if buffer.as_ref().len() < Self::MIN_HEADER_LEN {
            Err(Error::Exhausted)
        } else {
            Ok(Packet { buffer })
        }
    }

    /// Returns the length of a TCP packet with no options and the specified
    /// payload size.
    pub fn buffer_len(payload_len: usize) -> usize {
        20 + payload_len
    }

    /// Checks if the packet has a valid encoding. This may include checksum, field
    /// consistency, etc. checks.
    pub fn check_encoding(&self, ip_repr: &IpRepr) -> Result<()> {
        let data_offset = (self.data_offset() as usize) * 4;
        if self.gen_packet_checksum(ip_repr) != 0 {
            Err(Error::Checksum)
        } else if data_offset < Self::MIN_HEADER_LEN || data_offset > self.buffer.as_ref().len() {
            Err(Error::Malformed)
        } else {
            Ok(())
        }
    }

    /// Calculates the packet checksum.
    pub fn gen_packet_checksum(&self, ip_repr: &IpRepr) -> u16 {
        ip_repr.gen_checksum_with_pseudo_header(self.buffer.as_ref())
    }

    pub fn src_port(&self) -> u16 {
        (&self.buffer.as_ref()[fields::SRC_PORT])
            .read_u16::<NetworkEndian>()
            .unwrap()
    }

    pub fn dst_port(&self) -> u16 {
        (&self.buffer.as_ref()[fields::DST_PORT])
            .read_u16::<NetworkEndian>()
            .unwrap()
    }

    pub fn seq_num(&self) -> u32 {
        (&self.buffer.as_ref()[fields::SEQ_NUM])
            .read_u32::<NetworkEndian>()
            .unwrap()
    }

    pub fn ack_num(&self) -> u32 {
        (&self.buffer.as_ref()[fields::ACK_NUM])
            .read_u32::<NetworkEndian>()
            .unwrap()
    }

    pub fn data_offset(&self) -> u8 {
        &self.buffer.as_ref()[fields::DATA_OFFSET_AND_FLAGS][0] >> 4
    }

    pub fn ns(&self) -> bool {
        (&self.buffer.as_ref()[fields::DATA_OFFSET_AND_FLAGS][0] & 1) != 0
    }

    pub fn cwr(&self) -> bool {
        (&self.buffer.as_ref()[fields::DATA_OFFSET_AND_FLAGS][1] & 128) != 0
    }

    pub fn ece(&self) -> bool {
        (&self.buffer.as_ref()[fields::DATA_OFFSET_AND_FLAGS][1] & 64) != 0
    }

    pub fn urg(&self) -> bool {
        (&self.buffer.as_ref()[fields::DATA_OFFSET_AND_FLAGS][1] & 32) != 0
    }

    pub fn ack(&self) -> bool {
        (&self.buffer.as_ref()[fields::DATA_OFFSET_AND_FLAGS][1] & 16) != 0
    }

    pub fn psh(&self) -> bool {
        (&self.buffer.as_ref()[fields::DATA_OFFSET_AND_FLAGS][1] & 8) != 0
    }

    pub fn rst(&self) -> bool {
        (&self.buffer.as_ref()[fields::DATA_OFFSET_AND_FLAGS][1] & 4) != 0
    }

    pub fn syn(&self) -> bool {
        (&self.buffer.as_ref()[fields::DATA_OFFSET_AND_FLAGS][1] & 2) != 0
    }

    pub fn fin(&self) -> bool {
        (&self.buffer.as_ref()[fields::DATA_OFFSET_AND_FLAGS][1] & 1) != 0
    }

    pub fn window_size(&self) -> u16 {
        (&self.buffer.as_ref()[fields::WINDOW_SIZE])
            .read_u16::<NetworkEndian>()
            .unwrap()
    }

    pub fn checksum(&self) -> u16 {
        (&self.buffer.as_ref()[fields::CHECKSUM])
            .read_u16::<NetworkEndian>()
            .unwrap()
    }

    pub fn urgent_pointer(&self) -> u16 {
        (&self.buffer.as_ref()[fields::URGENT_POINTER])
            .read_u16::<NetworkEndian>()
            .unwrap()
    }

    pub fn payload(&self) -> &[u8] {
        let data_offset = (self.data_offset() * 4) as usize;
        &self.buffer.as_ref()[data_offset ..]
    }
}

impl<T: AsRef<[u8]> + AsMut<[u8]>> Packet<T> {
    pub fn set_src_port(&mut self, port: u16) {
        (&mut self.buffer.as_mut()[fields::SRC_PORT])
            .write_u16::<NetworkEndian>(port)
            .unwrap()
    }

    pub fn set_dst_port(&mut self, port: u16) {
        (&mut self.buffer.as_mut()[fields::DST_PORT])
            .write_u16::<NetworkEndian>(port)
            .unwrap()
    }

    pub fn set_seq_num(&mut self, seq_num: u32) {
        (&mut self.buffer.as_mut()[fields::SEQ_NUM])
            .write_u32::<NetworkEndian>(seq_num)
            .unwrap()
    }

    pub fn set_ack_num(&mut self, ack_num: u32) {
        (&mut self.buffer.as_mut()[fields::ACK_NUM])
            .write_u32::<NetworkEndian>(ack_num)
            .unwrap()
    }

    pub fn set_data_offset(&mut self, data_offset: u8) {
        let byte = &mut self.buffer.as_mut()[fields::DATA_OFFSET_AND_FLAGS][0];
        *byte &= 0b00001111;
        *byte |= data_offset << 4;
    }

    pub fn set_ns(&mut self, ns: bool) {
        self.set_flag(0, ns)
    }

    pub fn set_cwr(&mut self, cwr: bool) {
        self.set_flag(1, cwr)
    }

    pub fn set_ece(&mut self, ece: bool) {
        self.set_flag(2, ece)
    }

    pub fn set_urg(&mut self, urg: bool) {
        self.set_flag(3, urg)
    }

    pub fn set_ack(&mut self, ack: bool) {
        self.set_flag(4, ack)
    }

    pub fn set_psh(&mut self, psh: bool) {
        self.set_flag(5, psh)
    }

    pub fn set_rst(&mut self, rst: bool) {
        self.set_flag(6, rst)
    }

    pub fn set_syn(&mut self, syn: bool) {
        self.set_flag(7, syn)
    }

    pub fn set_fin(&mut self, fin: bool) {
        self.set_flag(8, fin)
    }

    fn set_flag(&mut self, flag_idx: usize, flag_val: bool) {
        let (byte_idx, bit_idx) = if flag_idx == 0 {
            (0, 0)
        } else {
            (1, 8 - flag_idx)
        };

        // (1) retrieve a reference to the byte containing the flag, (2) clear the
        // appropriate bit, and (3) set the flag bit accordingly.
        let byte = &mut self.buffer.as_mut()[fields::DATA_OFFSET_AND_FLAGS][byte_idx];
        *byte &= !(1 << bit_idx);
        if flag_val {
            *byte |= 1 << bit_idx;
        }
    }

    pub fn set_window_size(&mut self, window_size: u16) {
        (&mut self.buffer.as_mut()[fields::WINDOW_SIZE])
            .write_u16::<NetworkEndian>(window_size)
            .unwrap()
    }

    pub fn set_checksum(&mut self, checksum: u16) {
        (&mut self.buffer.as_mut()[fields::CHECKSUM])
            .write_u16::<NetworkEndian>(checksum)
            .unwrap()
    }

    pub fn set_urgent_pointer(&mut self, urgent_pointer: u16) {
        (&mut self.buffer.as_mut()[fields::URGENT_POINTER])
            .write_u16::<NetworkEndian>(urgent_pointer)
            .unwrap()
    }

    /// Updates the checksum field to match the packet contents.
    pub fn fill_checksum(&mut self, ip_repr: &IpRepr) {
        self.set_checksum(0);
        let checksum = self.gen_packet_checksum(ip_repr);
        self.set_checksum(checksum);
    }

    pub fn payload_mut(&mut self) -> &mut [u8] {
        let data_offset = (self.data_offset() * 4) as usize;
        &mut self.buffer.as_mut()[data_offset ..]
    }
}

#[cfg(test)]
mod tests {
    use crate::core::repr::{
        IpProtocol,
        Ipv4Address,
        Ipv4Repr,
    };

    use super::*;

    fn ip_repr(payload_len: usize) -> IpRepr {
        IpRepr::Ipv4(Ipv4Repr {
            src_addr: Ipv4Address::new([0, 1, 2, 3]),
            dst_addr: Ipv4Address::new([4, 5, 6, 7]),
            protocol: IpProtocol::Tcp,
            payload_len: payload_len as u16,
        })
    }

    #[test]
    fn test_packet_with_buffer_less_than_min_header() {
        let buffer: [u8; 19] = [0; 19];
        let packet = Packet::try_new(&buffer[..]);
        assert_matches!(packet, Err(Error::Exhausted));
    }

    #[test]
    fn test_packet_with_invalid_checksum() {
        let buffer: [u8; 36] = [
            0x45, 0x00, 0x00, 0x14, 0x00, 0x00, 0x12, 0x34, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x9C, 0x90, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
        ];
        let packet = Packet::try_new(&buffer[..]).unwrap();
        assert_matches!(packet.check_encoding(&ip_repr(36)), Err(Error::Checksum));
    }

    #[test]
    fn test_packet_with_invalid_data_offset() {
        let buffer: [u8; 36] = [
            0x45, 0x00, 0x00, 0x14, 0x00, 0x00, 0x12, 0x34, 0x00, 0x00, 0x00, 0x00, 0x10, 0x00,
            0x00, 0x00, 0x8C, 0x91, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
        ];
        let packet = Packet::try_new(&buffer[..]).unwrap();
        assert_matches!(packet.check_encoding(&ip_repr(36)), Err(Error::Malformed));
    }

    #[test]
    fn test_packet_getters() {
        let buffer: [u8; 36] = [
            0x45, 0x00, 0x00, 0x14, 0x00, 0x00, 0xB0, 0x12, 0x00, 0x00, 0x00, 0x34, 0x51, 0xFF,
            0x43, 0x21, 0x4E, 0x2A, 0x12, 0x34, 0x09, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
        ];

        let packet = Packet::try_new(&buffer[..]).unwrap();

        assert_matches!(packet.check_encoding(&ip_repr(36)), Ok(_));
        assert_eq!(17664, packet.src_port());
        assert_eq!(20, packet.dst_port());
        assert_eq!(45074, packet.seq_num());
        assert_eq!(52, packet.ack_num());
        assert_eq!(5, packet.data_offset());
        assert_eq!(17185, packet.window_size());
        assert_eq!(true, packet.ns());
        assert_eq!(true, packet.cwr());
        assert_eq!(true, packet.ece());
        assert_eq!(true, packet.urg());
        assert_eq!(true, packet.ack());
        assert_eq!(true, packet.psh());
        assert_eq!(true, packet.rst());
        assert_eq!(true, packet.syn());
        assert_eq!(true, packet.fin());
        assert_eq!(20010, packet.checksum());
        assert_eq!(4660, packet.urgent_pointer());
    }

    #[test]
    fn test_packet_setters() {
        let mut buffer: [u8; 36] = [0; 36];

        let mut packet = Packet::try_new(&mut buffer[..]).unwrap();
        packet.set_src_port(17664);
        packet.set_dst_port(20);
        packet.set_seq_num(45074);
        packet.set_ack_num(52);
        packet.set_data_offset(5);
        packet.set_ns(true);
        packet.set_cwr(true);
        packet.set_ece(true);
        packet.set_urg(true);
        packet.set_ack(true);
        packet.set_psh(true);
        packet.set_rst(true);
        packet.set_syn(true);
        packet.set_fin(true);
        packet.set_window_size(17185);
        packet.set_checksum(20010);
        packet.set_urgent_pointer(4660);
        packet.payload_mut()[0] = 9;

        assert_eq!(
            packet.as_ref(),
            &[
                0x45, 0x00, 0x00, 0x14, 0x00, 0x00, 0xB0, 0x12, 0x00, 0x00, 0x00, 0x34, 0x51, 0xFF,
                0x43, 0x21, 0x4E, 0x2A, 0x12, 0x34, 0x09, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
                0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
            ][..]
        );
    }

    #[test]
    fn test_header_len_with_options() {
        let mut repr = Repr::new(80, 8080);
        assert_eq!(repr.header_len(), 20);

        repr.max_segment_size = Some(1430);
        assert_eq!(repr.header_len(), 24);

        repr.sack_permitted = true;
        assert_eq!(repr.header_len(), 28);

        repr.max_segment_size = None;
        repr.sack_permitted = false;
        repr.sack_blocks[0] = Some((100, 200));
        assert_eq!(repr.header_len(), 32);
    }

    #[test]
    fn test_repr_with_options_roundtrip() {
        let mut repr = Repr::new(80, 8080);
        repr.seq_num = 100;
        repr.ack_num = 301;
        repr.flags[Repr::FLAG_ACK] = true;
        repr.window_size = 2860;
        repr.max_segment_size = Some(1430);
        repr.sack_permitted = true;
        repr.sack_blocks[0] = Some((301, 401));
        repr.sack_blocks[1] = Some((501, 601));
        assert_eq!(repr.header_len(), 44);

        let mut buffer = vec![0; repr.header_len() + 4];
        {
            let mut packet = Packet::try_new(&mut buffer[..]).unwrap();
            assert_matches!(repr.serialize(&mut packet), Ok(_));
            packet.payload_mut().copy_from_slice(&[1, 2, 3, 4]);
            packet.fill_checksum(&ip_repr(48));
        }

        let packet = Packet::try_new(&buffer[..]).unwrap();
        assert_matches!(packet.check_encoding(&ip_repr(48)), Ok(_));
        assert_eq!(packet.data_offset(), 11);
        assert_eq!(packet.payload(), &[1, 2, 3, 4]);

        let parsed = Repr::deserialize(&packet);
        assert_eq!(parsed, repr);
    }

    #[test]
    fn test_deserialize_skips_unknown_options() {
        let mut buffer: [u8; 28] = [0; 28];
        buffer[12] = 0x70;
        buffer[20 .. 28].copy_from_slice(&[0x03, 0x03, 0x07, 0x02, 0x04, 0x05, 0x98, 0x00]);

        let packet = Packet::try_new(&buffer[..]).unwrap();
        let repr = Repr::deserialize(&packet);

        assert_eq!(repr.max_segment_size, Some(1432));
        assert!(!repr.sack_permitted);
        assert_eq!(repr.sack_blocks, [None; 4]);
    }

    #[test]
    fn test_serialize_with_short_buffer() {
        let mut repr = Repr::new(80, 8080);
        repr.max_segment_size = Some(1430);

        let mut buffer = [0; 20];
        let mut packet = Packet::try_new(&mut buffer[..]).unwrap();
        assert_matches!(repr.serialize(&mut packet), Err(Error::Exhausted));
    }
}
