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
    Ipv6Address,
    Ipv6FragmentHeader,
    Ipv6Packet,
    Ipv6Repr,
};
use crate::core::service::{
    arp,
    ethernet,
    tcp,
    Interface,
};
use crate::core::socket::SocketSet;

/// Returns the Ethernet address an IPv6 multicast address maps to.
pub fn multicast_eth_addr(addr: Ipv6Address) -> EthernetAddress {
    let bytes = addr.as_bytes();
    EthernetAddress::new([0x33, 0x33, bytes[12], bytes[13], bytes[14], bytes[15]])
}

/// Sends a raw IPv6 packet via an interface.
///
/// The Ethernet destination is inferred by the network stack, but the
/// caller is responsible for writing an entire well formatted IPv6 packet
/// to the provided buffer, NOT just the payload!
pub fn send_packet_raw<F>(
    interface: &mut Interface,
    dst_addr: Ipv6Address,
    ipv6_packet_len: usize,
    f: F,
) -> Result<()>
where
    F: FnOnce(&mut [u8]),
{
    if dst_addr.is_multicast() {
        let eth_frame_len = EthernetFrame::<&[u8]>::buffer_len(ipv6_packet_len);
        let eth_dst_addr = multicast_eth_addr(dst_addr);
        return ethernet::send_frame(interface, eth_frame_len, |eth_frame| {
            eth_frame.set_dst_addr(eth_dst_addr);
            eth_frame.set_payload_type(eth_types::IPV6);
            f(eth_frame.payload_mut());
        });
    }

    // Without a neighbor discovery protocol every unicast destination
    // resolves directly. Off link destinations need a static neighbor in
    // the cache.
    arp::resolve_and_send(
        interface,
        IpAddress::Ipv6(dst_addr),
        eth_types::IPV6,
        ipv6_packet_len,
        f,
    )
}

/// Sends an IPv6 packet via an interface, the caller writes **only** the
/// payload to the provided buffer.
pub fn send_packet_with_repr<F>(interface: &mut Interface, ipv6_repr: &Ipv6Repr, f: F) -> Result<()>
where
    F: FnOnce(&mut [u8]),
{
    let (dst_addr, ipv6_packet_len) = (ipv6_repr.dst_addr, ipv6_repr.buffer_len());

    send_packet_raw(interface, dst_addr, ipv6_packet_len, |ipv6_buffer| {
        let mut ipv6_packet = Ipv6Packet::try_new(ipv6_buffer).unwrap();
        ipv6_repr.serialize(&mut ipv6_packet);
        f(ipv6_packet.payload_mut());
    })
}

/// Sends an IPv6 datagram via an interface, splitting it into fragments
/// carrying a fragment extension header when it does not fit into a single
/// frame.
pub fn send_datagram<F>(interface: &mut Interface, ipv6_repr: &Ipv6Repr, f: F) -> Result<()>
where
    F: FnOnce(&mut [u8]),
{
    let ip_mtu = interface.ip_mtu();
    if ipv6_repr.buffer_len() <= ip_mtu {
        return send_packet_with_repr(interface, ipv6_repr, f);
    }

    let mut payload = vec![0; ipv6_repr.payload_len as usize];
    f(&mut payload);

    let mut frags = Vec::new();
    interface.ipv6_frag.fragment(&payload, ip_mtu, |frag| {
        frags.push((frag.ident, frag.offset, frag.more_frags, frag.payload.to_vec()));
        Ok(())
    })?;

    debug!(
        "Splitting {} byte datagram to {} into {} fragments.",
        ipv6_repr.buffer_len(),
        ipv6_repr.dst_addr,
        frags.len()
    );

    for (ident, offset, more_frags, chunk) in frags {
        send_fragment(interface, ipv6_repr, ident, offset, more_frags, &chunk)?;
    }

    Ok(())
}

fn send_fragment(
    interface: &mut Interface,
    ipv6_repr: &Ipv6Repr,
    ident: u32,
    offset: usize,
    more_frags: bool,
    chunk: &[u8],
) -> Result<()> {
    let mut frag_repr = *ipv6_repr;
    frag_repr.next_header = IpProtocol::Ipv6Frag;
    frag_repr.payload_len = Ipv6FragmentHeader::<&[u8]>::buffer_len(chunk.len()) as u16;

    send_packet_with_repr(interface, &frag_repr, |frag_buffer| {
        let mut frag_header = Ipv6FragmentHeader::try_new(frag_buffer).unwrap();
        frag_header.set_next_header(u8::from(ipv6_repr.next_header));
        frag_header.set_reserved();
        frag_header.set_frag_offset(offset);
        frag_header.set_more_frags(more_frags);
        frag_header.set_ident(ident);
        frag_header.payload_mut().copy_from_slice(chunk);
    })
}

/// Receives an IPv6 packet from an interface.
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
    ipv6_buffer: &[u8],
    sockets: &mut SocketSet,
) -> Result<()> {
    let ipv6_packet = Ipv6Packet::try_new(ipv6_buffer)?;
    ipv6_packet.check_encoding()?;

    let dst_addr = ipv6_packet.dst_addr();
    if dst_addr != *interface.ipv6_addr && !dst_addr.is_multicast() {
        debug!("Ignoring IPv6 packet with destination {}.", dst_addr);
        return Err(Error::Ignored);
    }

    let ipv6_repr = Ipv6Repr::deserialize(&ipv6_packet)?;

    match ipv6_repr.next_header {
        IpProtocol::Ipv6Frag => {
            let frag_header = Ipv6FragmentHeader::try_new(ipv6_packet.payload())?;
            match interface
                .ipv6_frag
                .reassemble(ipv6_repr.src_addr, ipv6_repr.dst_addr, &frag_header)?
            {
                Some(datagram) => {
                    let mut buffer = vec![0; datagram.len()];
                    datagram.read(0, &mut buffer);
                    recv_datagram(interface, &buffer, sockets)
                }
                None => Ok(()),
            }
        }
        IpProtocol::Tcp => tcp::recv_packet(
            interface,
            &IpRepr::Ipv6(ipv6_repr),
            ipv6_packet.payload(),
            sockets,
        ),
        next_header => {
            debug!("Ignoring IPv6 packet with next header {}.", next_header);
            Err(Error::Ignored)
        }
    }
}
