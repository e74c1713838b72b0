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
    Ipv4Address,
    Ipv4Packet,
    Ipv4Repr,
};
use crate::core::storage::PacketBuf;
use crate::core::time::{
    Env,
    SystemEnv,
};

/// Overlapping fragment data is tolerated on IPv4, first arrival wins.
pub const DEFAULT_OVERLAP_POLICY: OverlapPolicy = OverlapPolicy::FirstWins;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Key {
    src_addr: Ipv4Address,
    dst_addr: Ipv4Address,
    protocol: IpProtocol,
    ident: u16,
}

struct FragDesc {
    key: Key,
    since: Instant,
    holes: HoleList,
    buffer: Vec<u8>,
    header: Option<Ipv4Repr>,
    /// First fragment header + leading payload bytes, kept for
    /// time-exceeded reporting.
    echo: Vec<u8>,
    total_len: Option<u16>,
    filled_max: u16,
}

/// One wire fragment of a datagram split for transmission.
#[derive(Debug)]
pub struct Fragment<'a> {
    pub ident: u16,
    /// Byte offset of this fragment's payload within the datagram payload.
    pub offset: usize,
    pub more_frags: bool,
    pub payload: &'a [u8],
}

/// Reassembles fragmented IPv4 datagrams and splits outgoing datagrams
/// into fragments.
pub struct Engine<T = SystemEnv>
where
    T: Env,
{
    descriptors: Vec<FragDesc>,
    policy: OverlapPolicy,
    ident: u16,
    time_env: T,
}

impl<T: Env> Engine<T> {
    pub fn new(policy: OverlapPolicy, time_env: T) -> Engine<T> {
        Engine {
            descriptors: Vec::with_capacity(MAX_FRAG_DATAGRAMS),
            policy,
            ident: rand::random::<u16>(),
            time_env,
        }
    }

    /// Folds a fragment into its reassembly, returning the whole datagram
    /// (header + payload) once every byte has arrived.
    ///
    /// The reassembly is discarded when a fragment pushes it past the
    /// maximum datagram size, contradicts an established total length, or
    /// overlaps under OverlapPolicy::Reject.
    pub fn reassemble<U>(&mut self, packet: &Ipv4Packet<U>) -> Result<Option<PacketBuf>>
    where
        U: AsRef<[u8]>,
    {
        let now = self.time_env.now_instant();
        let offset = packet.frag_offset();
        let is_final = !packet.more_frags();
        let payload = packet.payload();

        // Every fragment but the last covers a whole number of 8-byte units.
        if !is_final && (payload.is_empty() || payload.len() % 8 != 0) {
            return Err(Error::Malformed);
        }

        let key = Key {
            src_addr: packet.src_addr(),
            dst_addr: packet.dst_addr(),
            protocol: IpProtocol::from(packet.protocol()),
            ident: packet.ident(),
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
                    header: None,
                    echo: Vec::new(),
                    total_len: None,
                    filled_max: 0,
                });
                self.descriptors.len() - 1
            }
        };

        if offset == 0 {
            let echo_len = cmp::min(packet.header_len() + 8, packet.total_len());
            self.descriptors[didx].echo = packet.as_ref()[.. echo_len].to_vec();
            self.descriptors[didx].header = Some(Ipv4Repr {
                src_addr: key.src_addr,
                dst_addr: key.dst_addr,
                protocol: key.protocol,
                payload_len: 0,
            });
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

        match (desc.header, desc.total_len) {
            (Some(header), Some(total)) => {
                let mut repr = header;
                repr.payload_len = total;

                let mut datagram = vec![0; repr.buffer_len()];
                {
                    let mut dgram_packet = Ipv4Packet::try_new(&mut datagram[..]).unwrap();
                    repr.serialize(&mut dgram_packet);
                    dgram_packet
                        .payload_mut()
                        .copy_from_slice(&desc.buffer[.. total as usize]);
                }

                self.descriptors.swap_remove(didx);
                Ok(Some(PacketBuf::from(datagram)))
            }
            // A complete hole list implies byte 0 arrived, so the header
            // and total length are both known.
            _ => Ok(None),
        }
    }

    /// Splits a datagram payload into fragments whose serialized packets
    /// stay within mtu bytes each, reporting every fragment through f.
    pub fn fragment<F>(&mut self, payload: &[u8], mtu: usize, mut f: F) -> Result<()>
    where
        F: FnMut(Fragment) -> Result<()>,
    {
        let header_len = Ipv4Packet::<&[u8]>::MIN_HEADER_LEN;
        if mtu < header_len + 8 {
            return Err(Error::Exhausted);
        }
        if payload.len() > (u16::max_value() as usize) - header_len {
            return Err(Error::Exhausted);
        }

        let ident = self.next_ident();
        let max_chunk = ((mtu - header_len) / 8) * 8;
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

    /// Discards reassemblies older than the time-to-live, reporting the
    /// source address and echo material (first fragment header + leading
    /// payload bytes) of each one whose first fragment arrived.
    pub fn tick<F>(&mut self, mut f: F)
    where
        F: FnMut(Ipv4Address, &[u8]),
    {
        let now = self.time_env.now_instant();

        let mut idx = 0;
        while idx < self.descriptors.len() {
            if now >= self.descriptors[idx].since + FRAG_TIME_TO_LIVE {
                let desc = self.descriptors.swap_remove(idx);
                debug!(
                    "discarding expired reassembly from {} (ident {})",
                    desc.key.src_addr, desc.key.ident
                );
                if desc.header.is_some() {
                    f(desc.key.src_addr, &desc.echo);
                }
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

    fn next_ident(&mut self) -> u16 {
        let ident = self.ident;
        self.ident = self.ident.wrapping_add(1);
        ident
    }

    #[cfg(test)]
    fn reassembly_count(&self) -> usize {
        self.descriptors.len()
    }
}
