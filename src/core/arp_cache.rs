use std::collections::VecDeque;
use std::time::{
    Duration,
    Instant,
};

use crate::{
    Error,
    Result,
};
use crate::core::repr::{
    EthernetAddress,
    IpAddress,
};
use crate::core::storage::PacketBuf;
use crate::core::time::{
    Env,
    SystemEnv,
};

/// Configuration knobs for an ArpCache.
#[derive(Clone, Copy, Debug)]
pub struct Config {
    /// Cadence the owner should call tick() at.
    pub tick_interval: Duration,
    /// Maximum number of cache entries.
    pub capacity: usize,
    /// Maximum number of frames queued per unresolved entry.
    pub pending_cap: usize,
    /// Total number of requests transmitted before an unresolved entry fails.
    pub max_requests: usize,
    /// Interval between request transmissions.
    pub request_timeout: Duration,
    /// Total number of probes transmitted before a suspect entry is dropped.
    pub max_probes: usize,
    /// Interval between probe transmissions.
    pub probe_timeout: Duration,
    /// How long a confirmed mapping stays reachable without fresh evidence.
    pub reachable_time: Duration,
    /// Delay between first use of a stale mapping and the first probe.
    pub delay_first_probe: Duration,
    /// Create entries from replies that were never solicited.
    pub accept_unsolicited: bool,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            tick_interval: Duration::from_millis(200),
            capacity: 8,
            pending_cap: 2,
            max_requests: 3,
            request_timeout: Duration::from_millis(1000),
            max_probes: 2,
            probe_timeout: Duration::from_millis(60_000),
            reachable_time: Duration::from_millis(60_000),
            delay_first_probe: Duration::from_millis(5000),
            accept_unsolicited: false,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum State {
    /// Resolution in progress, no link address known yet.
    Incomplete,
    /// Mapping confirmed recently.
    Reachable,
    /// Mapping unconfirmed for a while, still usable.
    Stale,
    /// Mapping in use, first probe pending.
    Delay,
    /// Actively confirming the mapping.
    Probe,
    /// Statically configured mapping, never aged or evicted.
    Permanent,
}

struct Entry {
    state: State,
    proto_addr: IpAddress,
    eth_addr: EthernetAddress,
    state_since: Instant,
    retries: usize,
    queue: VecDeque<PacketBuf>,
}

/// Outcome of queuing a frame behind address resolution.
#[derive(Debug)]
pub struct Pending {
    /// A new resolution cycle started and a request should be transmitted.
    pub new_entry: bool,
    /// Frames dropped from a full pending queue or an evicted entry.
    pub dropped: Vec<PacketBuf>,
}

/// Work the cache asks its owner to perform during a tick.
#[derive(Debug)]
pub enum TickAction {
    /// Broadcast a resolution request for the target.
    SendRequest { target: IpAddress },
    /// Confirm a cached mapping with a unicast request.
    SendProbe {
        target: IpAddress,
        eth_addr: EthernetAddress,
    },
    /// Resolution failed, a queued frame is undeliverable.
    Unreachable { target: IpAddress, frame: PacketBuf },
}

/// Maintains a bounded set of protocol address to ethernet address mappings,
/// tracking the reachability of each mapping and queuing frames that wait on
/// resolution.
pub struct ArpCache<T = SystemEnv>
where
    T: Env,
{
    entries: Vec<Entry>,
    config: Config,
    time_env: T,
}

impl<T: Env> ArpCache<T> {
    pub fn new(config: Config, time_env: T) -> ArpCache<T> {
        ArpCache {
            entries: Vec::with_capacity(config.capacity),
            config,
            time_env,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Looks up the ethernet address for a protocol address.
    ///
    /// Returns the mapping for any resolved entry. Using a stale mapping
    /// schedules a reachability probe.
    pub fn lookup(&mut self, proto_addr: &IpAddress) -> Option<EthernetAddress> {
        let now = self.time_env.now_instant();

        let entry = self
            .entries
            .iter_mut()
            .find(|entry| entry.proto_addr == *proto_addr)?;

        match entry.state {
            State::Incomplete => None,
            State::Stale => {
                entry.state = State::Delay;
                entry.state_since = now;
                Some(entry.eth_addr)
            }
            _ => Some(entry.eth_addr),
        }
    }

    /// Queues a frame until the protocol address resolves, starting a
    /// resolution cycle if none is in progress.
    ///
    /// When the pending queue is full the oldest frame is dropped and
    /// returned. Fails with Error::Exhausted when the cache is full and no
    /// entry can be evicted.
    pub fn enqueue_pending(&mut self, proto_addr: IpAddress, frame: PacketBuf) -> Result<Pending> {
        let now = self.time_env.now_instant();
        let mut dropped = Vec::new();

        if let Some(entry) = self
            .entries
            .iter_mut()
            .find(|entry| entry.proto_addr == proto_addr)
        {
            let new_entry = match entry.state {
                State::Incomplete => false,
                // A resolved entry only ends up here if the owner raced a
                // lookup, restart resolution rather than strand the frame.
                _ => {
                    entry.state = State::Incomplete;
                    entry.retries = 1;
                    entry.state_since = now;
                    true
                }
            };

            if entry.queue.len() >= self.config.pending_cap {
                if let Some(oldest) = entry.queue.pop_front() {
                    dropped.push(oldest);
                }
            }
            entry.queue.push_back(frame);

            return Ok(Pending { new_entry, dropped });
        }

        if self.entries.len() >= self.config.capacity {
            match self.evict_oldest() {
                Some(evicted) => dropped.extend(evicted.queue),
                None => return Err(Error::Exhausted),
            }
        }

        let mut queue = VecDeque::with_capacity(self.config.pending_cap);
        queue.push_back(frame);
        self.entries.push(Entry {
            state: State::Incomplete,
            proto_addr,
            eth_addr: EthernetAddress::new([0; 6]),
            state_since: now,
            retries: 1,
            queue,
        });

        Ok(Pending {
            new_entry: true,
            dropped,
        })
    }

    /// Updates the cache with a mapping learned from the network and flushes
    /// any frames queued behind it, in FIFO order, through f.
    ///
    /// Evidence for an existing entry always refreshes it. A reply for an
    /// unknown address creates an entry only if it answers one of our
    /// requests or if the cache accepts unsolicited replies.
    pub fn process_reply<F>(
        &mut self,
        proto_addr: IpAddress,
        eth_addr: EthernetAddress,
        solicited: bool,
        mut f: F,
    ) where
        F: FnMut(PacketBuf),
    {
        let now = self.time_env.now_instant();

        if let Some(entry) = self
            .entries
            .iter_mut()
            .find(|entry| entry.proto_addr == proto_addr)
        {
            if entry.state == State::Permanent {
                return;
            }

            entry.eth_addr = eth_addr;
            entry.state = State::Reachable;
            entry.state_since = now;
            entry.retries = 0;

            for frame in entry.queue.drain(..) {
                f(frame);
            }

            return;
        }

        // Opportunistic entries never evict, they only use free capacity.
        if (solicited || self.config.accept_unsolicited)
            && self.entries.len() < self.config.capacity
        {
            self.entries.push(Entry {
                state: State::Reachable,
                proto_addr,
                eth_addr,
                state_since: now,
                retries: 0,
                queue: VecDeque::new(),
            });
        }
    }

    /// Installs a static mapping which is never aged, probed, or evicted.
    pub fn set_permanent(&mut self, proto_addr: IpAddress, eth_addr: EthernetAddress) -> Result<()> {
        let now = self.time_env.now_instant();

        if let Some(entry) = self
            .entries
            .iter_mut()
            .find(|entry| entry.proto_addr == proto_addr)
        {
            entry.state = State::Permanent;
            entry.eth_addr = eth_addr;
            entry.state_since = now;
            entry.queue.clear();
            return Ok(());
        }

        if self.entries.len() >= self.config.capacity && self.evict_oldest().is_none() {
            return Err(Error::Exhausted);
        }

        self.entries.push(Entry {
            state: State::Permanent,
            proto_addr,
            eth_addr,
            state_since: now,
            retries: 0,
            queue: VecDeque::new(),
        });

        Ok(())
    }

    /// Purges every dynamic entry.
    pub fn flush(&mut self) {
        self.entries.retain(|entry| entry.state == State::Permanent);
    }

    /// Advances entry lifetimes, asking the owner through f to transmit
    /// requests and probes and to dispose of undeliverable frames.
    pub fn tick<F>(&mut self, mut f: F)
    where
        F: FnMut(TickAction),
    {
        let now = self.time_env.now_instant();
        let config = self.config;

        let mut idx = 0;
        while idx < self.entries.len() {
            let remove = {
                let entry = &mut self.entries[idx];
                match entry.state {
                    State::Incomplete if now >= entry.state_since + config.request_timeout => {
                        if entry.retries < config.max_requests {
                            entry.retries += 1;
                            entry.state_since = now;
                            f(TickAction::SendRequest {
                                target: entry.proto_addr,
                            });
                            false
                        } else {
                            for frame in entry.queue.drain(..) {
                                f(TickAction::Unreachable {
                                    target: entry.proto_addr,
                                    frame,
                                });
                            }
                            true
                        }
                    }
                    State::Reachable if now >= entry.state_since + config.reachable_time => {
                        entry.state = State::Stale;
                        entry.state_since = now;
                        false
                    }
                    State::Delay if now >= entry.state_since + config.delay_first_probe => {
                        entry.state = State::Probe;
                        entry.state_since = now;
                        entry.retries = 1;
                        f(TickAction::SendProbe {
                            target: entry.proto_addr,
                            eth_addr: entry.eth_addr,
                        });
                        false
                    }
                    State::Probe if now >= entry.state_since + config.probe_timeout => {
                        if entry.retries < config.max_probes {
                            entry.retries += 1;
                            entry.state_since = now;
                            f(TickAction::SendProbe {
                                target: entry.proto_addr,
                                eth_addr: entry.eth_addr,
                            });
                            false
                        } else {
                            true
                        }
                    }
                    _ => false,
                }
            };

            if remove {
                self.entries.swap_remove(idx);
            } else {
                idx += 1;
            }
        }
    }

    fn evict_oldest(&mut self) -> Option<Entry> {
        let oldest = self
            .entries
            .iter()
            .enumerate()
            .filter(|(_, entry)| entry.state != State::Permanent)
            .min_by_key(|(_, entry)| entry.state_since)
            .map(|(idx, _)| idx)?;

        Some(self.entries.swap_remove(oldest))
    }

    #[cfg(test)]
    fn state_of(&self, proto_addr: &IpAddress) -> Option<State> {
        self.entries
            .iter()
            .find(|entry| entry.proto_addr == *proto_addr)
            .map(|entry| entry.state)
    }
}
