//! In-memory devices for sending and receiving raw Ethernet frames.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use crate::{
    Error,
    Result,
};

/// A device for sending and receiving raw Ethernet frames.
///
/// Devices are polled, a recv() with nothing buffered returns
/// Error::Exhausted instead of blocking.
pub trait Device {
    /// Transmits a single frame.
    fn send(&mut self, frame: &[u8]) -> Result<()>;

    /// Receives a single frame into the buffer, returning its length.
    fn recv(&mut self, buffer: &mut [u8]) -> Result<usize>;

    /// Returns the maximum frame length the device can carry.
    fn max_transmission_unit(&self) -> usize;
}

/// A device which hands every sent frame straight back to its receive side.
#[derive(Debug)]
pub struct Loopback {
    queue: VecDeque<Vec<u8>>,
    mtu: usize,
}

impl Loopback {
    pub fn new(mtu: usize) -> Loopback {
        Loopback {
            queue: VecDeque::new(),
            mtu,
        }
    }
}

impl Device for Loopback {
    fn send(&mut self, frame: &[u8]) -> Result<()> {
        if frame.len() > self.mtu {
            return Err(Error::Exhausted);
        }
        self.queue.push_back(frame.to_vec());
        Ok(())
    }

    fn recv(&mut self, buffer: &mut [u8]) -> Result<usize> {
        let frame = match self.queue.pop_front() {
            Some(frame) => frame,
            None => return Err(Error::Exhausted),
        };
        if frame.len() > buffer.len() {
            self.queue.push_front(frame);
            return Err(Error::Exhausted);
        }
        buffer[.. frame.len()].copy_from_slice(&frame);
        Ok(frame.len())
    }

    fn max_transmission_unit(&self) -> usize {
        self.mtu
    }
}

/// One port of a point to point Ethernet segment.
///
/// Frames sent on one port of a pair arrive on the other, in order.
#[derive(Debug)]
pub struct EthernetChannel {
    tx: Rc<RefCell<VecDeque<Vec<u8>>>>,
    rx: Rc<RefCell<VecDeque<Vec<u8>>>>,
    mtu: usize,
}

impl EthernetChannel {
    /// Creates two ports connected to each other.
    pub fn pair(mtu: usize) -> (EthernetChannel, EthernetChannel) {
        let ab = Rc::new(RefCell::new(VecDeque::new()));
        let ba = Rc::new(RefCell::new(VecDeque::new()));

        (
            EthernetChannel {
                tx: ab.clone(),
                rx: ba.clone(),
                mtu,
            },
            EthernetChannel {
                tx: ba,
                rx: ab,
                mtu,
            },
        )
    }
}

impl Device for EthernetChannel {
    fn send(&mut self, frame: &[u8]) -> Result<()> {
        if frame.len() > self.mtu {
            return Err(Error::Exhausted);
        }
        self.tx.borrow_mut().push_back(frame.to_vec());
        Ok(())
    }

    fn recv(&mut self, buffer: &mut [u8]) -> Result<usize> {
        let frame = match self.rx.borrow_mut().pop_front() {
            Some(frame) => frame,
            None => return Err(Error::Exhausted),
        };
        if frame.len() > buffer.len() {
            self.rx.borrow_mut().push_front(frame);
            return Err(Error::Exhausted);
        }
        buffer[.. frame.len()].copy_from_slice(&frame);
        Ok(frame.len())
    }

    fn max_transmission_unit(&self) -> usize {
        self.mtu
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_loopback_returns_frames_in_order() {
        let mut dev = Loopback::new(1514);
        let mut buffer = [0; 1514];

        dev.send(&[1, 2, 3]).unwrap();
        dev.send(&[4, 5]).unwrap();

        assert_eq!(dev.recv(&mut buffer), Ok(3));
        assert_eq!(&buffer[.. 3], &[1, 2, 3]);
        assert_eq!(dev.recv(&mut buffer), Ok(2));
        assert_eq!(&buffer[.. 2], &[4, 5]);
        assert_matches!(dev.recv(&mut buffer), Err(Error::Exhausted));
    }

    #[test]
    fn test_loopback_rejects_oversized_frame() {
        let mut dev = Loopback::new(16);
        let mut buffer = [0; 16];

        assert_matches!(dev.send(&[0; 17]), Err(Error::Exhausted));
        assert_matches!(dev.recv(&mut buffer), Err(Error::Exhausted));
    }

    #[test]
    fn test_channel_crosses_frames_between_ports() {
        let (mut a, mut b) = EthernetChannel::pair(1514);
        let mut buffer = [0; 1514];

        a.send(&[1, 2, 3]).unwrap();
        assert_matches!(a.recv(&mut buffer), Err(Error::Exhausted));
        assert_eq!(b.recv(&mut buffer), Ok(3));
        assert_eq!(&buffer[.. 3], &[1, 2, 3]);

        b.send(&[9, 8]).unwrap();
        assert_eq!(a.recv(&mut buffer), Ok(2));
        assert_eq!(&buffer[.. 2], &[9, 8]);
        assert_matches!(b.recv(&mut buffer), Err(Error::Exhausted));
    }

    #[test]
    fn test_recv_keeps_frame_on_short_buffer() {
        let mut dev = Loopback::new(1514);
        let mut short = [0; 2];
        let mut full = [0; 4];

        dev.send(&[1, 2, 3, 4]).unwrap();
        assert_matches!(dev.recv(&mut short), Err(Error::Exhausted));
        assert_eq!(dev.recv(&mut full), Ok(4));
        assert_eq!(&full[..], &[1, 2, 3, 4]);
    }
}
