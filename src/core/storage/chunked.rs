use std::collections::vec_deque::{
    Iter as VecDequeIter,
    VecDeque,
};

use crate::{
    Error,
    Result,
};
use crate::core::check::Accumulator;
use crate::core::storage::Slice;

/// Capacity of the chunks a packet buffer allocates when appending.
pub const CHUNK_SIZE: usize = 128;

/// A packet represented as a chain of byte chunks.
///
/// Prepending and appending never touch bytes already in the buffer, only
/// add chunks around them, so headers can be pushed in front of a payload
/// without shifting it. The logical packet is the concatenation of the
/// chunks in order. Buffers have a single owner at any pipeline stage and
/// move along with the packet.
#[derive(Clone, Debug)]
pub struct PacketBuf {
    chunks: VecDeque<Slice<u8>>,
    len: usize,
}

impl From<Vec<u8>> for PacketBuf {
    /// Adopts an existing buffer as a single chunk without copying.
    fn from(buffer: Vec<u8>) -> PacketBuf {
        let len = buffer.len();
        let mut chunks = VecDeque::new();
        if len > 0 {
            chunks.push_back(Slice::from(buffer));
        }
        PacketBuf { chunks, len }
    }
}

impl<'a> From<&'a [u8]> for PacketBuf {
    fn from(buffer: &'a [u8]) -> PacketBuf {
        let mut packet_buf = PacketBuf::new();
        packet_buf.append(buffer);
        packet_buf
    }
}

impl PacketBuf {
    /// Creates an empty packet buffer.
    pub fn new() -> PacketBuf {
        PacketBuf {
            chunks: VecDeque::new(),
            len: 0,
        }
    }

    /// Returns the total number of bytes in the buffer.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Adds bytes in front of the existing content.
    pub fn prepend(&mut self, data: &[u8]) {
        for chunk in data.chunks(CHUNK_SIZE).rev() {
            self.chunks.push_front(Slice::from(chunk.to_vec()));
        }
        self.len += data.len();
    }

    /// Adds bytes behind the existing content, filling the spare capacity
    /// of the last chunk before allocating new ones.
    pub fn append(&mut self, data: &[u8]) {
        let mut data = data;
        self.len += data.len();

        if let Some(back) = self.chunks.back_mut() {
            let used = back.len();
            let take = std::cmp::min(back.capacity() - used, data.len());
            if take > 0 && back.try_resize(used + take, 0).is_ok() {
                back[used .. used + take].copy_from_slice(&data[.. take]);
                data = &data[take ..];
            }
        }

        for chunk in data.chunks(CHUNK_SIZE) {
            let mut slice = Slice::from(vec![0; CHUNK_SIZE]);
            if slice.try_resize(chunk.len(), 0).is_ok() {
                slice.copy_from_slice(chunk);
            }
            self.chunks.push_back(slice);
        }
    }

    /// Returns an iterator over the chunk slices in order.
    pub fn slices(&self) -> Slices {
        Slices {
            chunks: self.chunks.iter(),
            skip: 0,
            remaining: self.len,
        }
    }

    /// Returns a copy free view of a sub-range of the buffer.
    pub fn view(&self, offset: usize, len: usize) -> Result<View> {
        if offset + len > self.len {
            return Err(Error::Exhausted);
        }

        Ok(View {
            buf: self,
            offset,
            len,
        })
    }

    /// Copies bytes starting at an offset into the provided buffer,
    /// returning the number of bytes copied.
    pub fn read(&self, offset: usize, buffer: &mut [u8]) -> usize {
        let len = std::cmp::min(buffer.len(), self.len.saturating_sub(offset));
        let mut copied = 0;

        if let Ok(view) = self.view(offset, len) {
            for slice in view.slices() {
                buffer[copied .. copied + slice.len()].copy_from_slice(slice);
                copied += slice.len();
            }
        }

        copied
    }

    /// Calculates the Internet Checksum over a sub-range of the buffer.
    pub fn checksum(&self, offset: usize, len: usize) -> Result<u16> {
        Ok(self.view(offset, len)?.checksum())
    }
}

/// A borrowed view of a sub-range of a packet buffer.
#[derive(Clone, Copy, Debug)]
pub struct View<'a> {
    buf: &'a PacketBuf,
    offset: usize,
    len: usize,
}

impl<'a> View<'a> {
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns an iterator over the slices covering the view.
    pub fn slices(&self) -> Slices<'a> {
        Slices {
            chunks: self.buf.chunks.iter(),
            skip: self.offset,
            remaining: self.len,
        }
    }

    /// Calculates the Internet Checksum over the view.
    pub fn checksum(&self) -> u16 {
        let mut acc = Accumulator::new();
        for slice in self.slices() {
            acc.add(slice);
        }
        acc.checksum()
    }
}

/// Iterator over the byte slices of a packet buffer or view.
pub struct Slices<'a> {
    chunks: VecDequeIter<'a, Slice<u8>>,
    skip: usize,
    remaining: usize,
}

impl<'a> Iterator for Slices<'a> {
    type Item = &'a [u8];

    fn next(&mut self) -> Option<&'a [u8]> {
        while self.remaining > 0 {
            match self.chunks.next() {
                Some(chunk) => {
                    if self.skip >= chunk.len() {
                        self.skip -= chunk.len();
                        continue;
                    }
                    let begin = self.skip;
                    self.skip = 0;
                    let take = std::cmp::min(chunk.len() - begin, self.remaining);
                    self.remaining -= take;
                    return Some(&chunk[begin .. begin + take]);
                }
                None => return None,
            }
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use crate::core::check::internet_checksum;

    use super::*;

    fn flatten(packet_buf: &PacketBuf) -> Vec<u8> {
        let mut bytes = vec![];
        for slice in packet_buf.slices() {
            bytes.extend_from_slice(slice);
        }
        bytes
    }

    #[test]
    fn test_append_and_prepend_ordering() {
        let mut packet_buf = PacketBuf::new();
        packet_buf.append(&[4, 5, 6]);
        packet_buf.prepend(&[1, 2, 3]);
        packet_buf.append(&[7, 8]);

        assert_eq!(packet_buf.len(), 8);
        assert_eq!(flatten(&packet_buf), vec![1, 2, 3, 4, 5, 6, 7, 8]);
    }

    #[test]
    fn test_append_spans_chunks() {
        let bytes: Vec<u8> = (0 .. 255).cycle().take(CHUNK_SIZE * 2 + 9).collect();
        let mut packet_buf = PacketBuf::new();
        packet_buf.append(&bytes);

        assert_eq!(packet_buf.len(), bytes.len());
        assert_eq!(flatten(&packet_buf), bytes);
        assert_eq!(packet_buf.slices().count(), 3);
    }

    #[test]
    fn test_append_fills_last_chunk() {
        let mut packet_buf = PacketBuf::new();
        packet_buf.append(&[1, 2, 3]);
        assert_eq!(packet_buf.slices().count(), 1);

        packet_buf.append(&[4, 5, 6]);
        assert_eq!(packet_buf.slices().count(), 1);
        assert_eq!(flatten(&packet_buf), vec![1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn test_prepend_keeps_existing_chunks() {
        let mut packet_buf = PacketBuf::from(vec![10, 20, 30]);
        packet_buf.prepend(&[1, 2]);

        assert_eq!(packet_buf.slices().count(), 2);
        assert_eq!(flatten(&packet_buf), vec![1, 2, 10, 20, 30]);
    }

    #[test]
    fn test_read_at_offset() {
        let mut packet_buf = PacketBuf::new();
        packet_buf.append(&[1, 2, 3, 4, 5, 6, 7, 8]);
        packet_buf.prepend(&[0]);

        let mut bytes = [0; 4];
        assert_eq!(packet_buf.read(3, &mut bytes), 4);
        assert_eq!(bytes, [3, 4, 5, 6]);

        let mut bytes = [0; 4];
        assert_eq!(packet_buf.read(7, &mut bytes), 2);
        assert_eq!(bytes, [7, 8, 0, 0]);
    }

    #[test]
    fn test_view_bounds() {
        let packet_buf = PacketBuf::from(&[1, 2, 3, 4][..]);
        assert_matches!(packet_buf.view(2, 3), Err(Error::Exhausted));
        assert_matches!(packet_buf.view(0, 4), Ok(_));
    }

    #[test]
    fn test_view_checksum_matches_flat() {
        let bytes: Vec<u8> = (1 ..= 255).cycle().take(300).collect();
        let mut packet_buf = PacketBuf::new();
        packet_buf.append(&bytes[100 ..]);
        packet_buf.prepend(&bytes[.. 100]);

        let view = packet_buf.view(13, 217).unwrap();
        assert_eq!(view.checksum(), internet_checksum(&bytes[13 .. 13 + 217]));
    }
}
