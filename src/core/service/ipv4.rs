use crate::{
    Error,
    Result,
};
use crate::core::repr::{
    eth_types,
    EthernetAddress,
    EthernetFrame,
    IpAddress,
    IpProtocol,
    IpRepr,
    Ipv4Address,
    Ipv4Packet,
    Ipv4Repr,
};
use crate::core::service::{
    arp,
    ethernet,
    icmpv4,
    tcp,
    Interface,
};
use crate::core::socket::SocketSet;

/// Sends a raw IPv4 packet via an interface.
///
/// The Ethernet destination is inferred by the network stack, but the
/// caller is responsible for writing an entire well formatted IPv4 packet
/// to the provided buffer, NOT just the payload!
pub fn send_packet_raw<F>(
    interface: &mut Interface,
    dst_addr: Ipv4Address,
    ipv4_packet_len: usize,
    f: F,
) -> Result<()>
where
    F: FnOnce(&mut [u8]),
{
    if dst_addr.is_broadcast() || dst_addr == interface.ipv4_addr.broadcast() {
        let eth_frame_len = EthernetFrame::<&[u8]>::buffer_len(ipv4_packet_len);
        return ethernet::send_frame(interface, eth_frame_len, |eth_frame| {
            eth_frame.set_dst_addr(EthernetAddress::BROADCAST);
            eth_frame.set_payload_type(eth_types::IPV4);
            f(eth_frame.payload_mut());
        });
    }

    let next_hop = ipv4_addr_route(interface, dst_addr);

    arp::resolve_and_send(
        interface,
        IpAddress::Ipv4(next_hop),
        eth_types::IPV4,
        ipv4_packet_len,
        f,
    )
}

/// Sends an IPv4 packet via an interface.
///
/// This is a "safe" version of send_packet_raw(...) which takes care of
/// serializing a header, calculating a checksum, etc. so the caller needs
/// to write **only** the payload to the provided buffer.
pub fn send_packet_with_repr<F>(interface: &mut Interface, ipv4_repr: &Ipv4Repr, f: F) -> Result<()>
where
    F: FnOnce(&mut [u8]),
{
    let (dst_addr, ipv4_packet_len) = (ipv4_repr.dst_addr, ipv4_repr.buffer_len());

    send_packet_raw(interface, dst_addr, ipv4_packet_len, |ipv4_buffer| {
        let mut ipv4_packet = Ipv4Packet::try_new(ipv4_buffer).unwrap();
        // NOTE: It's important to serialize the Ipv4Repr prior to calling
        // payload_mut() to ensure the header length is written and used when
        // finding where the payload is located in the packet!
        ipv4_repr.serialize(&mut ipv4_packet);
        f(ipv4_packet.payload_mut());
    })
}

/// Sends an IPv4 datagram via an interface, splitting it into fragments
/// when it does not fit into a single frame.
pub fn send_datagram<F>(interface: &mut Interface, ipv4_repr: &Ipv4Repr, f: F) -> Result<()>
where
    F: FnOnce(&mut [u8]),
{
    let ip_mtu = interface.ip_mtu();
    if ipv4_repr.buffer_len() <= ip_mtu {
        return send_packet_with_repr(interface, ipv4_repr, f);
    }

    let mut payload = vec![0; ipv4_repr.payload_len as usize];
    f(&mut payload);

    // The engine only borrows each chunk out of the payload, so the
    // fragments are collected first and sent afterwards.
    let mut frags = Vec::new();
    interface.ipv4_frag.fragment(&payload, ip_mtu, |frag| {
        frags.push((frag.ident, frag.offset, frag.more_frags, frag.payload.to_vec()));
        Ok(())
    })?;

    debug!(
        "Splitting {} byte datagram to {} into {} fragments.",
        ipv4_repr.buffer_len(),
        ipv4_repr.dst_addr,
        frags.len()
    );

    for (ident, offset, more_frags, chunk) in frags {
        send_fragment(interface, ipv4_repr, ident, offset, more_frags, &chunk)?;
    }

    Ok(())
}

fn send_fragment(
    interface: &mut Interface,
    ipv4_repr: &Ipv4Repr,
    ident: u16,
    offset: usize,
    more_frags: bool,
    chunk: &[u8],
) -> Result<()> {
    let mut frag_repr = *ipv4_repr;
    frag_repr.payload_len = chunk.len() as u16;

    let (dst_addr, frag_packet_len) = (frag_repr.dst_addr, frag_repr.buffer_len());

    send_packet_raw(interface, dst_addr, frag_packet_len, |ipv4_buffer| {
        let mut ipv4_packet = Ipv4Packet::try_new(ipv4_buffer).unwrap();
        // Repr serialization clears the fragmentation fields, so they get
        // written after it and the checksum refilled last.
        frag_repr.serialize(&mut ipv4_packet);
        ipv4_packet.set_ident(ident);
        ipv4_packet.set_more_frags(more_frags);
        ipv4_packet.set_frag_offset(offset);
        ipv4_packet.payload_mut().copy_from_slice(chunk);
        ipv4_packet.fill_checksum();
    })
}

/// Receives an IPv4 packet from an interface.
///
/// Fragments are fed through reassembly, complete datagrams are propagated
/// up the network stack.
pub fn recv_packet(
    interface: &mut Interface,
    eth_frame: &EthernetFrame<&[u8]>,
    sockets: &mut SocketSet,
) -> Result<()> {
    recv_datagram(interface, eth_frame.payload(), sockets)
}

fn recv_datagram(
    interface: &mut Interface,
    ipv4_buffer: &[u8],
    sockets: &mut SocketSet,
) -> Result<()> {
    let ipv4_packet = Ipv4Packet::try_new(ipv4_buffer)?;
    ipv4_packet.check_encoding()?;

    let dst_addr = ipv4_packet.dst_addr();
    if dst_addr != *interface.ipv4_addr
        && dst_addr != interface.ipv4_addr.broadcast()
        && !dst_addr.is_broadcast()
    {
        debug!("Ignoring IPv4 packet with destination {}.", dst_addr);
        return Err(Error::Ignored);
    }

    if ipv4_packet.frag_offset() > 0 || ipv4_packet.more_frags() {
        return match interface.ipv4_frag.reassemble(&ipv4_packet)? {
            Some(datagram) => {
                let mut buffer = vec![0; datagram.len()];
                datagram.read(0, &mut buffer);
                recv_datagram(interface, &buffer, sockets)
            }
            None => Ok(()),
        };
    }

    let ipv4_repr = Ipv4Repr::deserialize(&ipv4_packet)?;

    match ipv4_repr.protocol {
        IpProtocol::Tcp => tcp::recv_packet(
            interface,
            &IpRepr::Ipv4(ipv4_repr),
            ipv4_packet.payload(),
            sockets,
        ),
        IpProtocol::Icmp => icmpv4::recv_packet(interface, &ipv4_repr, ipv4_packet.payload()),
        protocol => {
            debug!("Ignoring IPv4 packet with protocol {}.", protocol);
            if dst_addr.is_unicast() {
                icmpv4::send_protocol_unreachable(interface, &ipv4_repr, ipv4_buffer)?;
            }
            Err(Error::Ignored)
        }
    }
}

/// Returns the next hop for a packet destined to a specified address.
pub fn ipv4_addr_route(interface: &Interface, address: Ipv4Address) -> Ipv4Address {
    if interface.ipv4_addr.is_member(address) {
        debug!("{} will be routed through the link.", address);
        address
    } else {
        debug!("{} will be routed through the default gateway.", address);
        interface.default_gateway
    }
}
