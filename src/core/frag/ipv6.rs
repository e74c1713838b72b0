use std::cmp;
use std::time::Instant;

use crate::{
    Error,
    Result,
};
use crate::core::frag::{
    HoleList,
    OverlapPolicy,
    FRAG_TIME_TO_LIVE,
    MAX_FRAG_DATAGRAMS,
    MAX_FRAG_DATAGRAM_SIZE,
};
use crate::core::repr::{
    IpProtocol,
    Ipv6Address,
    Ipv6FragmentHeader,
    Ipv6Packet,
    Ipv6Repr,
};
use crate::core::storage::PacketBuf;
use crate::core::time::{
    Env,
    SystemEnv,
};

/// Overlapping fragment data poisons the reassembly on IPv6, per RFC 5722.
pub const DEFAULT_OVERLAP_POLICY: OverlapPolicy = OverlapPolicy::Reject;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Key {
    src_addr: Ipv6Address,
    dst_addr: Ipv6Address,
    ident: u32,
}

struct FragDesc {
    key: Key,
    since: Instant,
    holes: HoleList,
    buffer: Vec<u8>,
    /// Next header of the first fragment, carried into the reassembled
    /// datagram.
    next_header: Option<IpProtocol>,
    total_len: Option<u16>,
    filled_max: u16,
}

/// One wire fragment of a datagram split for transmission.
#[derive(Debug)]
pub struct Fragment<'a> {
    pub ident: u32,
    /// Byte offset of this fragment's payload within the datagram payload.
    pub offset: usize,
    pub more_frags: bool,
    pub payload: &'a [u8],
}

/// Reassembles fragmented IPv6 datagrams and splits outgoing datagrams
/// into fragments.
pub struct Engine<T = SystemEnv>
where
    T: Env,
{
    descriptors: Vec<FragDesc>,
    policy: OverlapPolicy,
    ident: u32,
    time_env: T,
}

impl<T: Env> Engine<T> {
    pub fn new(policy: OverlapPolicy, time_env: T) -> Engine<T> {
        Engine {
            descriptors: Vec::with_capacity(MAX_FRAG_DATAGRAMS),
            policy,
            ident: rand::random::<u32>(),
            time_env,
        }
    }

    /// Folds a fragment into its reassembly, returning the whole datagram
    /// (header + payload) once every byte has arrived. The fragment header
    /// view spans the payload of the enclosing IPv6 packet.
    ///
    /// The reassembly is discarded when a fragment pushes it past the
    /// maximum datagram size, contradicts an established total length, or
    /// overlaps under OverlapPolicy::Reject.
    pub fn reassemble<U>(
        &mut self,
        src_addr: Ipv6Address,
        dst_addr: Ipv6Address,
        frag_header: &Ipv6FragmentHeader<U>,
    ) -> Result<Option<PacketBuf>>
    where
        U: AsRef<[u8]>,
    {
        let now = self.time_env.now_instant();
        let offset = frag_header.frag_offset();
        let is_final = !frag_header.more_frags();
        let payload = frag_header.payload();

        // Every fragment but the last covers a whole number of 8-byte units.
        if !is_final && (payload.is_empty() || payload.len() % 8 != 0) {
            return Err(Error::Malformed);
        }

        let key = Key {
            src_addr,
            dst_addr,
            ident: frag_header.ident(),
        };

        let end = offset + payload.len();
        if end > MAX_FRAG_DATAGRAM_SIZE {
            self.drop_reassembly(&key);
            return Err(Error::Exhausted);
        }

        let didx = match self.descriptors.iter().position(|desc| desc.key == key) {
            Some(didx) => didx,
            None => {
                if self.descriptors.len() >= MAX_FRAG_DATAGRAMS {
                    self.evict_oldest();
                }
                self.descriptors.push(FragDesc {
                    key,
                    since: now,
                    holes: HoleList::new(),
                    buffer: Vec::new(),
                    next_header: None,
                    total_len: None,
                    filled_max: 0,
                });
                self.descriptors.len() - 1
            }
        };

        if offset == 0 {
            self.descriptors[didx].next_header =
                Some(IpProtocol::from(frag_header.next_header()));
        }

        if is_final {
            let conflict = match self.descriptors[didx].total_len {
                Some(total) => (total as usize) != end,
                None => (self.descriptors[didx].filled_max as usize) > end,
            };
            if conflict {
                self.descriptors.swap_remove(didx);
                return Err(Error::Malformed);
            }
            self.descriptors[didx].total_len = Some(end as u16);
        }

        let policy = self.policy;
        let desc = &mut self.descriptors[didx];
        if desc.buffer.len() < end {
            desc.buffer.resize(end, 0);
        }

        let FragDesc {
            holes,
            buffer,
            filled_max,
            ..
        } = desc;
        let filled = holes.fill(offset as u16, end as u16, is_final, policy, |lo, hi| {
            let (lo, hi) = (lo as usize, hi as usize);
            buffer[lo .. hi].copy_from_slice(&payload[lo - offset .. hi - offset]);
            *filled_max = cmp::max(*filled_max, hi as u16);
        });
        if filled.is_err() {
            self.descriptors.swap_remove(didx);
            return Err(Error::Malformed);
        }

        let desc = &self.descriptors[didx];
        if !desc.holes.is_complete() {
            return Ok(None);
        }

        match (desc.next_header, desc.total_len) {
            (Some(next_header), Some(total)) => {
                let repr = Ipv6Repr {
                    src_addr: key.src_addr,
                    dst_addr: key.dst_addr,
                    next_header,
                    payload_len: total,
                };

                let mut datagram = vec![0; repr.buffer_len()];
                {
                    let mut dgram_packet = Ipv6Packet::try_new(&mut datagram[..]).unwrap();
                    repr.serialize(&mut dgram_packet);
                    dgram_packet
                        .payload_mut()
                        .copy_from_slice(&desc.buffer[.. total as usize]);
                }

                self.descriptors.swap_remove(didx);
                Ok(Some(PacketBuf::from(datagram)))
            }
            // A complete hole list implies byte 0 arrived, so the next
            // header and total length are both known.
            _ => Ok(None),
        }
    }

    /// Splits a datagram payload into fragments whose serialized packets
    /// (IPv6 header + fragment header + chunk) stay within mtu bytes each,
    /// reporting every fragment through f.
    pub fn fragment<F>(&mut self, payload: &[u8], mtu: usize, mut f: F) -> Result<()>
    where
        F: FnMut(Fragment) -> Result<()>,
    {
        let overhead =
            Ipv6Packet::<&[u8]>::HEADER_LEN + Ipv6FragmentHeader::<&[u8]>::HEADER_LEN;
        if mtu < overhead + 8 {
            return Err(Error::Exhausted);
        }
        if payload.len() > u16::max_value() as usize {
            return Err(Error::Exhausted);
        }

        let ident = self.next_ident();
        let max_chunk = ((mtu - overhead) / 8) * 8;
        let mut offset = 0;

        loop {
            let chunk = cmp::min(max_chunk, payload.len() - offset);
            let more_frags = offset + chunk < payload.len();

            f(Fragment {
                ident,
                offset,
                more_frags,
                payload: &payload[offset .. offset + chunk],
            })?;

            offset += chunk;
            if !more_frags {
                return Ok(());
            }
        }
    }

    /// Discards reassemblies older than the time-to-live.
    pub fn tick(&mut self) {
        let now = self.time_env.now_instant();

        let mut idx = 0;
        while idx < self.descriptors.len() {
            if now >= self.descriptors[idx].since + FRAG_TIME_TO_LIVE {
                let desc = self.descriptors.swap_remove(idx);
                debug!(
                    "discarding expired reassembly from {} (ident {})",
                    desc.key.src_addr, desc.key.ident
                );
            } else {
                idx += 1;
            }
        }
    }

    fn drop_reassembly(&mut self, key: &Key) {
        if let Some(didx) = self.descriptors.iter().position(|desc| desc.key == *key) {
            self.descriptors.swap_remove(didx);
        }
    }

    fn evict_oldest(&mut self) {
        let oldest = self
            .descriptors
            .iter()
            .enumerate()
            .min_by_key(|(_, desc)| desc.since)
            .map(|(idx, _)| idx);

        if let Some(idx) = oldest {
            let desc = self.descriptors.swap_remove(idx);
            debug!(
                "evicting in-progress reassembly from {} (ident {})",
                desc.key.src_addr, desc.key.ident
            );
        }
    }

    fn next_ident(&mut self) -> u32 {
        let ident = self.ident;
        self.ident = self.ident.wrapping_add(1);
        ident
    }

    #[cfg(test)]
    fn reassembly_count(&self) -> usize {
        self.descriptors.len()
    }
}
