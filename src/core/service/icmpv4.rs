use std::cmp;
use std::mem;

use crate::{
    Error,
    Result,
};
use crate::core::repr::{
    Icmpv4DestinationUnreachable,
    Icmpv4Packet,
    Icmpv4Repr,
    Icmpv4TimeExceeded,
    IpProtocol,
    Ipv4Address,
    Ipv4Packet,
    Ipv4Repr,
};
use crate::core::service::{
    ipv4,
    Interface,
};

/// Sends an ICMP packet via an interface.
///
/// This function takes care of serializing the header, calculating the
/// checksum, etc. so the caller writes **only** the ICMP payload to the
/// provided buffer.
pub fn send_packet<F>(
    interface: &mut Interface,
    ipv4_repr: &Ipv4Repr,
    icmpv4_repr: &Icmpv4Repr,
    f: F,
) -> Result<()>
where
    F: FnOnce(&mut [u8]),
{
    ipv4::send_datagram(interface, ipv4_repr, |ipv4_payload| {
        let mut icmp_packet = Icmpv4Packet::try_new(ipv4_payload).unwrap();
        // The checksum spans the entire packet, so the payload has to be in
        // place before the header is serialized.
        f(icmp_packet.payload_mut());
        icmpv4_repr.serialize(&mut icmp_packet).unwrap();
    })
}

/// Receives an ICMP packet from an interface, answering pings.
pub fn recv_packet(
    interface: &mut Interface,
    ipv4_repr: &Ipv4Repr,
    icmp_buffer: &[u8],
) -> Result<()> {
    let icmp_recv_packet = Icmpv4Packet::try_new(icmp_buffer)?;
    icmp_recv_packet.check_encoding()?;

    let icmp_recv_repr = Icmpv4Repr::deserialize(&icmp_recv_packet)?;

    match icmp_recv_repr {
        Icmpv4Repr::EchoRequest { id, seq } => {
            debug!("Echoing ping from {}.", ipv4_repr.src_addr);

            let mut ipv4_send_repr = *ipv4_repr;
            mem::swap(&mut ipv4_send_repr.src_addr, &mut ipv4_send_repr.dst_addr);

            let icmp_send_repr = Icmpv4Repr::EchoReply { id, seq };

            send_packet(interface, &ipv4_send_repr, &icmp_send_repr, |payload| {
                payload.copy_from_slice(icmp_recv_packet.payload());
            })
        }
        _ => Err(Error::Ignored),
    }
}

/// Reports an expired reassembly to the datagram source.
///
/// The echo is the first fragment's header along with its leading payload
/// bytes, the source needs them to match the report to the datagram.
pub fn send_time_exceeded(
    interface: &mut Interface,
    dst_addr: Ipv4Address,
    echo: &[u8],
) -> Result<()> {
    if !dst_addr.is_unicast() {
        return Err(Error::Ignored);
    }

    let ipv4_header_len = Ipv4Packet::try_new(echo)?.header_len();

    let icmp_repr = Icmpv4Repr::TimeExceeded {
        reason: Icmpv4TimeExceeded::FragmentReassembly,
        ipv4_header_len,
    };
    let ipv4_repr = Ipv4Repr {
        src_addr: *interface.ipv4_addr,
        dst_addr,
        protocol: IpProtocol::Icmp,
        payload_len: icmp_repr.buffer_len() as u16,
    };

    debug!("Reporting expired reassembly to {}.", dst_addr);

    send_packet(interface, &ipv4_repr, &icmp_repr, |payload| {
        let copy_len = cmp::min(echo.len(), payload.len());
        payload[.. copy_len].copy_from_slice(&echo[.. copy_len]);
    })
}

/// Reports an unhandled transport protocol to the datagram source.
pub fn send_protocol_unreachable(
    interface: &mut Interface,
    ipv4_repr: &Ipv4Repr,
    ipv4_buffer: &[u8],
) -> Result<()> {
    if !ipv4_repr.src_addr.is_unicast() {
        return Err(Error::Ignored);
    }

    let ipv4_header_len = Ipv4Packet::try_new(ipv4_buffer)?.header_len();

    let icmp_repr = Icmpv4Repr::DestinationUnreachable {
        reason: Icmpv4DestinationUnreachable::ProtocolUnreachable,
        ipv4_header_len,
    };
    let ipv4_send_repr = Ipv4Repr {
        src_addr: *interface.ipv4_addr,
        dst_addr: ipv4_repr.src_addr,
        protocol: IpProtocol::Icmp,
        payload_len: icmp_repr.buffer_len() as u16,
    };

    debug!(
        "Reporting unreachable protocol {} to {}.",
        ipv4_repr.protocol, ipv4_repr.src_addr
    );

    send_packet(interface, &ipv4_send_repr, &icmp_repr, |payload| {
        let copy_len = cmp::min(ipv4_buffer.len(), payload.len());
        payload[.. copy_len].copy_from_slice(&ipv4_buffer[.. copy_len]);
    })
}
