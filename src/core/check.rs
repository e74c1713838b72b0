use byteorder::{
    NetworkEndian,
    ReadBytesExt,
};

/// Calculates the Internet Checksum from [RFC1071](https://tools.ietf.org/html/rfc1071).
///
/// See [IPv4 header checksum](https://en.wikipedia.org/wiki/IPv4_header_checksum) for an example.
pub fn internet_checksum(buffer: &[u8]) -> u16 {
    let mut acc = 0 as u32;

    for i in 0..(buffer.len() / 2) {
        let x = (&buffer[i * 2..i * 2 + 2])
            .read_u16::<NetworkEndian>()
            .unwrap();
        acc += x as u32;
    }

    if buffer.len() % 2 == 1 {
        let x = buffer[buffer.len() - 1];
        acc += (x as u32) << 8;
    }

    while acc > 0xFFFF {
        acc -= 0xFFFF;
    }

    !acc as u16
}

/// Incremental Internet Checksum over a sequence of byte slices.
///
/// Feeding slices one after another produces the same sum as checksumming
/// their concatenation, including across odd length boundaries. Used for
/// pseudo header sums and for checksums over chunked packet buffers.
#[derive(Clone, Copy, Debug)]
pub struct Accumulator {
    acc: u32,
    high: bool,
}

impl Accumulator {
    pub fn new() -> Accumulator {
        Accumulator {
            acc: 0,
            high: true,
        }
    }

    /// Feeds bytes into the running sum.
    pub fn add(&mut self, buffer: &[u8]) {
        for byte in buffer {
            if self.high {
                self.acc += (*byte as u32) << 8;
            } else {
                self.acc += *byte as u32;
            }
            self.high = !self.high;
        }
    }

    /// Folds the sum and returns the one's complement checksum.
    pub fn checksum(&self) -> u16 {
        let mut acc = self.acc;

        while acc > 0xFFFF {
            acc -= 0xFFFF;
        }

        !acc as u16
    }
}
