//! Fragmentation and reassembly of IP datagrams.
//!
//! The `frag` module provides per-family engines that split outgoing
//! datagrams into fragments and rebuild incoming fragments into whole
//! datagrams, tracking the missing ranges of each reassembly with a
//! hole list.

use std::cmp;
use std::time::Duration;

use crate::{
    Error,
    Result,
};

pub mod ipv4;
pub mod ipv6;

pub use self::ipv4::Engine as Ipv4FragEngine;
pub use self::ipv6::Engine as Ipv6FragEngine;

/// Cadence the owner should call tick() at.
pub const FRAG_TICK_INTERVAL: Duration = Duration::from_millis(1000);

/// Maximum number of datagrams being reassembled at once, per family.
pub const MAX_FRAG_DATAGRAMS: usize = 4;

/// Maximum size of a reassembled datagram payload.
pub const MAX_FRAG_DATAGRAM_SIZE: usize = 8192;

/// Maximum time a reassembly can spend waiting for fragments.
pub const FRAG_TIME_TO_LIVE: Duration = Duration::from_millis(15_000);

/// Marks the open upper bound of a reassembly whose final fragment has
/// not arrived.
const INFINITY: u16 = 0xFFFF;

/// Marks the end of the hole chain and an empty free list.
const NIL: u16 = 0xFFFF;

/// How a reassembly treats fragment data that overlaps bytes it already
/// holds.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OverlapPolicy {
    /// Data already received wins, overlapping bytes of later fragments
    /// are trimmed away.
    FirstWins,
    /// Any overlap discards the whole reassembly.
    Reject,
}

#[derive(Clone, Copy, Debug)]
struct Hole {
    first: u16,
    last: u16,
    next: u16,
}

/// Tracks the missing byte ranges of one reassembly as a chain of
/// [first, last) holes, ordered by offset, over an index arena.
///
/// A new list holds the single hole [0, INFINITY): nothing has arrived
/// and the total length is unknown until the final fragment fixes it.
#[derive(Debug)]
pub struct HoleList {
    holes: Vec<Hole>,
    head: u16,
    free: u16,
}

impl HoleList {
    pub fn new() -> HoleList {
        HoleList {
            holes: vec![Hole {
                first: 0,
                last: INFINITY,
                next: NIL,
            }],
            head: 0,
            free: NIL,
        }
    }

    /// Checks if every byte of the datagram has arrived.
    pub fn is_complete(&self) -> bool {
        self.head == NIL
    }

    /// Covers [first, last) with fragment data, reporting each newly
    /// covered sub-range through f. A final fragment fixes the total
    /// length at `last` and closes the open-ended hole.
    ///
    /// Under OverlapPolicy::Reject, fails if any byte of the range was
    /// already covered; the caller is expected to drop the reassembly,
    /// which may by then hold a partial copy of the fragment.
    pub fn fill<F>(
        &mut self,
        first: u16,
        last: u16,
        is_final: bool,
        policy: OverlapPolicy,
        mut f: F,
    ) -> Result<()>
    where
        F: FnMut(u16, u16),
    {
        let mut covered: u32 = 0;
        let mut prev = NIL;
        let mut idx = self.head;

        while idx != NIL {
            let mut hole = self.holes[idx as usize];
            let next = hole.next;

            if is_final && hole.last > last {
                hole.last = last;
            }

            if hole.first >= hole.last {
                // The fixed end left nothing of this hole.
                self.unlink(prev, idx);
                self.release(idx);
                idx = next;
                continue;
            }

            if hole.first >= last && !is_final {
                break;
            }

            let lo = cmp::max(hole.first, first);
            let hi = cmp::min(hole.last, last);

            if lo >= hi {
                self.holes[idx as usize] = hole;
                prev = idx;
                idx = next;
                continue;
            }

            f(lo, hi);
            covered += u32::from(hi - lo);

            match (hole.first < lo, hi < hole.last) {
                (true, true) => {
                    let right = self.alloc(Hole {
                        first: hi,
                        last: hole.last,
                        next,
                    });
                    self.holes[idx as usize] = Hole {
                        first: hole.first,
                        last: lo,
                        next: right,
                    };
                    prev = right;
                }
                (true, false) => {
                    self.holes[idx as usize] = Hole {
                        first: hole.first,
                        last: lo,
                        next,
                    };
                    prev = idx;
                }
                (false, true) => {
                    self.holes[idx as usize] = Hole {
                        first: hi,
                        last: hole.last,
                        next,
                    };
                    prev = idx;
                }
                (false, false) => {
                    self.unlink(prev, idx);
                    self.release(idx);
                }
            }

            idx = next;
        }

        if policy == OverlapPolicy::Reject && covered < u32::from(last - first) {
            return Err(Error::Malformed);
        }

        Ok(())
    }

    fn unlink(&mut self, prev: u16, idx: u16) {
        let next = self.holes[idx as usize].next;
        if prev == NIL {
            self.head = next;
        } else {
            self.holes[prev as usize].next = next;
        }
    }

    fn release(&mut self, idx: u16) {
        self.holes[idx as usize].next = self.free;
        self.free = idx;
    }

    fn alloc(&mut self, hole: Hole) -> u16 {
        if self.free != NIL {
            let idx = self.free;
            self.free = self.holes[idx as usize].next;
            self.holes[idx as usize] = hole;
            idx
        } else {
            self.holes.push(hole);
            (self.holes.len() - 1) as u16
        }
    }
}
