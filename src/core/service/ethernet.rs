use crate::{
    Error,
    Result,
};
use crate::core::repr::{
    eth_types,
    EthernetFrame,
};
use crate::core::service::{
    arp,
    ipv4,
    ipv6,
    Interface,
};
use crate::core::socket::SocketSet;

/// Sends an Ethernet frame via an interface.
///
/// The source address is filled in by the interface, the caller provides
/// the rest of the frame.
pub fn send_frame<F>(interface: &mut Interface, eth_frame_len: usize, f: F) -> Result<()>
where
    F: FnOnce(&mut EthernetFrame<&mut [u8]>),
{
    let mut eth_buffer = vec![0; eth_frame_len];
    let mut eth_frame = EthernetFrame::try_new(&mut eth_buffer[..])?;
    f(&mut eth_frame);
    eth_frame.set_src_addr(interface.ethernet_addr);

    interface.dev.send(eth_frame.as_ref())?;

    Ok(())
}

/// Receives an Ethernet frame from an interface.
///
/// The Ethernet frame is parsed and propagated up the network stack.
pub fn recv_frame(
    interface: &mut Interface,
    eth_buffer: &[u8],
    sockets: &mut SocketSet,
) -> Result<()> {
    let eth_frame = EthernetFrame::try_new(eth_buffer)?;

    // Multicast frames stay accepted, IPv6 runs over group addresses.
    if eth_frame.dst_addr() != interface.ethernet_addr
        && !eth_frame.dst_addr().is_broadcast()
        && !eth_frame.dst_addr().is_multicast()
    {
        debug!(
            "Ignoring ethernet frame with destination {}.",
            eth_frame.dst_addr()
        );
        return Err(Error::Ignored);
    }

    match eth_frame.payload_type() {
        eth_types::ARP => arp::recv_packet(interface, &eth_frame),
        eth_types::IPV4 => ipv4::recv_packet(interface, &eth_frame, sockets),
        eth_types::IPV6 => ipv6::recv_packet(interface, &eth_frame, sockets),
        i => {
            debug!("Ignoring ethernet frame with type {}.", i);
            Err(Error::Ignored)
        }
    }
}
