//! Packet processing services for different network layers.
//!
//! The `service` module glues the device, the address resolution cache, the
//! fragmentation engines, and the sockets together, moving packets up and
//! down the network stack.

pub mod arp;
pub mod ethernet;
pub mod icmpv4;
pub mod ipv4;
pub mod ipv6;
pub mod socket;
pub mod tcp;

use std::rc::Rc;

use crate::core::arp_cache::ArpCache;
use crate::core::dev::Device;
use crate::core::frag::{
    Ipv4FragEngine,
    Ipv6FragEngine,
};
use crate::core::repr::{
    EthernetAddress,
    EthernetFrame,
    Ipv4Address,
    Ipv4AddressCidr,
    Ipv6AddressCidr,
};
use crate::core::socket::SocketSet;
use crate::core::time::Env;

/// An interface for sending and receiving network packets.
pub struct Interface {
    /// Device for sending and receiving raw Ethernet frames.
    pub dev: Box<dyn Device>,
    /// Translations from IP to Ethernet addresses, shared by both families.
    pub arp_cache: ArpCache<Rc<dyn Env>>,
    /// Reassembly and fragmentation state for IPv4 datagrams.
    pub ipv4_frag: Ipv4FragEngine<Rc<dyn Env>>,
    /// Reassembly and fragmentation state for IPv6 datagrams.
    pub ipv6_frag: Ipv6FragEngine<Rc<dyn Env>>,
    /// Ethernet address of the interface.
    pub ethernet_addr: EthernetAddress,
    /// IPv4 address of the interface.
    pub ipv4_addr: Ipv4AddressCidr,
    /// IPv6 address of the interface.
    pub ipv6_addr: Ipv6AddressCidr,
    /// Default gateway for IPv4 packets not on the interface subnet. This
    /// should be on the same subnet as ipv4_addr!
    pub default_gateway: Ipv4Address,
}

impl Interface {
    /// Returns the largest IP packet the device can carry in a single frame.
    pub fn ip_mtu(&self) -> usize {
        self.dev.max_transmission_unit() - EthernetFrame::<&[u8]>::HEADER_LEN
    }
}

/// Moves frames between the device and the sockets, once.
pub fn poll(interface: &mut Interface, sockets: &mut SocketSet) {
    socket::recv(interface, sockets);
    socket::send(interface, sockets);
}

/// Advances every timer driven component against the shared clock.
///
/// Segments a socket schedules here leave the device on the next poll().
pub fn tick(interface: &mut Interface, sockets: &mut SocketSet) {
    let mut actions = Vec::new();
    interface.arp_cache.tick(|action| actions.push(action));
    for action in actions {
        arp::process_tick_action(interface, action);
    }

    // An expired IPv4 reassembly which saw its first fragment is reported
    // back to the source.
    let mut expired = Vec::new();
    interface
        .ipv4_frag
        .tick(|src_addr, echo| expired.push((src_addr, echo.to_vec())));
    for (src_addr, echo) in expired {
        if let Err(err) = icmpv4::send_time_exceeded(interface, src_addr, &echo) {
            debug!(
                "Error reporting reassembly expiry to {} with {:?}.",
                src_addr, err
            );
        }
    }
    interface.ipv6_frag.tick();

    for socket in sockets.iter_mut() {
        socket.tick();
    }
}
