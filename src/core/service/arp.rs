use crate::{
    Error,
    Result,
};
use crate::core::arp_cache::TickAction;
use crate::core::repr::{
    eth_types,
    Arp,
    ArpOp,
    EthernetAddress,
    EthernetFrame,
    IpAddress,
    Ipv4Address,
};
use crate::core::service::{
    ethernet,
    Interface,
};
use crate::core::storage::PacketBuf;

/// Sends an ARP packet via an interface.
pub fn send_packet(
    interface: &mut Interface,
    arp_repr: &Arp,
    dst_addr: EthernetAddress,
) -> Result<()> {
    let eth_frame_len = EthernetFrame::<&[u8]>::buffer_len(arp_repr.buffer_len());

    ethernet::send_frame(interface, eth_frame_len, |eth_frame| {
        eth_frame.set_dst_addr(dst_addr);
        eth_frame.set_payload_type(eth_types::ARP);
        arp_repr.serialize(eth_frame.payload_mut()).unwrap();
    })
}

/// Broadcasts a request for the Ethernet address of an IPv4 neighbor.
pub fn send_request(interface: &mut Interface, target: Ipv4Address) -> Result<()> {
    let arp_repr = Arp {
        op: ArpOp::Request,
        source_hw_addr: interface.ethernet_addr,
        source_proto_addr: *interface.ipv4_addr,
        target_hw_addr: EthernetAddress::BROADCAST,
        target_proto_addr: target,
    };

    debug!("Sending ARP request for {}.", target);

    send_packet(interface, &arp_repr, EthernetAddress::BROADCAST)
}

/// Receives an ARP packet from an interface.
///
/// This may result in (1) a response to ARP requests, (2) an update of the
/// ARP cache, and (3) the transmission of frames queued behind the
/// completed resolution.
pub fn recv_packet(interface: &mut Interface, eth_frame: &EthernetFrame<&[u8]>) -> Result<()> {
    let arp_repr = Arp::deserialize(eth_frame.payload())?;

    if arp_repr.target_proto_addr != *interface.ipv4_addr {
        debug!(
            "Ignoring ARP with target IPv4 address {}.",
            arp_repr.target_proto_addr
        );
        return Err(Error::Ignored);
    }

    // A reply unicast to us answers one of our own requests. Requests and
    // broadcast announcements only prove the sender is alive, so existing
    // mappings get refreshed but no new entry is created for them unless
    // the cache opts in.
    let solicited =
        arp_repr.op == ArpOp::Reply && eth_frame.dst_addr() == interface.ethernet_addr;
    update_cache(
        interface,
        IpAddress::Ipv4(arp_repr.source_proto_addr),
        arp_repr.source_hw_addr,
        solicited,
    );

    match arp_repr.op {
        ArpOp::Request => {
            let arp_reply = Arp {
                op: ArpOp::Reply,
                source_hw_addr: interface.ethernet_addr,
                source_proto_addr: *interface.ipv4_addr,
                target_hw_addr: arp_repr.source_hw_addr,
                target_proto_addr: arp_repr.source_proto_addr,
            };

            debug!(
                "Sending ARP reply to {}/{}.",
                arp_reply.target_proto_addr, arp_reply.target_hw_addr
            );

            send_packet(interface, &arp_reply, arp_reply.target_hw_addr)
        }
        _ => Ok(()),
    }
}

/// Tries to retrieve the Ethernet address for a next hop IP address.
///
/// A stale mapping is still returned, the cache schedules a reachability
/// probe for it on its own. A missing mapping is not requested here, sends
/// go through resolve_and_send so the frame can wait on the resolution.
pub fn eth_addr_for_ip(interface: &mut Interface, next_hop: &IpAddress) -> Option<EthernetAddress> {
    interface.arp_cache.lookup(next_hop)
}

/// Sends an IP packet in an Ethernet frame to a next hop, parking the frame
/// behind an address resolution when no mapping is cached yet.
///
/// A parked frame counts as sent. Should the resolution fail the frame is
/// dropped, and it is on the transport layer to retransmit.
pub fn resolve_and_send<F>(
    interface: &mut Interface,
    next_hop: IpAddress,
    payload_type: u16,
    ip_packet_len: usize,
    f: F,
) -> Result<()>
where
    F: FnOnce(&mut [u8]),
{
    let eth_frame_len = EthernetFrame::<&[u8]>::buffer_len(ip_packet_len);

    if let Some(eth_addr) = eth_addr_for_ip(interface, &next_hop) {
        return ethernet::send_frame(interface, eth_frame_len, |eth_frame| {
            eth_frame.set_dst_addr(eth_addr);
            eth_frame.set_payload_type(payload_type);
            f(eth_frame.payload_mut());
        });
    }

    // Serialize the frame now with the destination zeroed, it gets patched
    // in when the resolution completes.
    let mut eth_buffer = vec![0; eth_frame_len];
    {
        let mut eth_frame = EthernetFrame::try_new(&mut eth_buffer[..])?;
        eth_frame.set_src_addr(interface.ethernet_addr);
        eth_frame.set_payload_type(payload_type);
        f(eth_frame.payload_mut());
    }

    let pending = interface
        .arp_cache
        .enqueue_pending(next_hop, PacketBuf::from(eth_buffer))?;

    for frame in pending.dropped {
        debug!(
            "Dropping {} byte frame queued behind {}.",
            frame.len(),
            next_hop
        );
    }

    if pending.new_entry {
        match next_hop {
            IpAddress::Ipv4(target) => send_request(interface, target)?,
            IpAddress::Ipv6(target) => warn!(
                "No resolution protocol for {}, install a static neighbor.",
                target
            ),
        }
    }

    debug!("Parked frame awaiting resolution of {}.", next_hop);

    Ok(())
}

/// Performs one piece of resolution upkeep requested by the cache.
pub fn process_tick_action(interface: &mut Interface, action: TickAction) {
    match action {
        TickAction::SendRequest {
            target: IpAddress::Ipv4(target),
        } => {
            if let Err(err) = send_request(interface, target) {
                debug!("Error sending ARP request for {} with {:?}.", target, err);
            }
        }
        TickAction::SendRequest { target } => warn!(
            "No resolution protocol for {}, install a static neighbor.",
            target
        ),
        TickAction::SendProbe {
            target: IpAddress::Ipv4(target),
            eth_addr,
        } => {
            let arp_repr = Arp {
                op: ArpOp::Request,
                source_hw_addr: interface.ethernet_addr,
                source_proto_addr: *interface.ipv4_addr,
                target_hw_addr: eth_addr,
                target_proto_addr: target,
            };

            debug!("Probing reachability of {}/{}.", target, eth_addr);

            if let Err(err) = send_packet(interface, &arp_repr, eth_addr) {
                debug!("Error sending ARP probe for {} with {:?}.", target, err);
            }
        }
        TickAction::SendProbe { .. } => {}
        TickAction::Unreachable { target, frame } => debug!(
            "Dropping {} byte frame, {} is unreachable.",
            frame.len(),
            target
        ),
    }
}

/// Refreshes the cache with an observed mapping, sending any frames that
/// were parked behind its resolution.
fn update_cache(
    interface: &mut Interface,
    proto_addr: IpAddress,
    eth_addr: EthernetAddress,
    solicited: bool,
) {
    debug!(
        "Received ARP, adding mapping from {} to {}.",
        proto_addr, eth_addr
    );

    let Interface { arp_cache, dev, .. } = interface;

    arp_cache.process_reply(proto_addr, eth_addr, solicited, |frame| {
        let mut eth_buffer = vec![0; frame.len()];
        frame.read(0, &mut eth_buffer);

        if let Ok(mut eth_frame) = EthernetFrame::try_new(&mut eth_buffer[..]) {
            eth_frame.set_dst_addr(eth_addr);
        }

        if let Err(err) = dev.send(&eth_buffer) {
            debug!("Error sending parked frame with {:?}.", err);
        }
    });
}
