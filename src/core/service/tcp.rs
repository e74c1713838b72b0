use crate::{
    Error,
    Result,
};
use crate::core::repr::{
    IpRepr,
    Ipv4Repr,
    Ipv6Repr,
    TcpPacket,
    TcpRepr,
};
use crate::core::service::{
    ipv4,
    ipv6,
    Interface,
};
use crate::core::socket::{
    SocketAddr,
    SocketSet,
    TcpState,
};

/// Sends a TCP segment via an interface.
///
/// This function takes care of serializing the header, calculating the
/// checksum, etc. so the caller provides **only** the segment payload.
pub fn send_packet(
    interface: &mut Interface,
    ip_repr: &IpRepr,
    tcp_repr: &TcpRepr,
    payload: &[u8],
) -> Result<()> {
    match *ip_repr {
        IpRepr::Ipv4(ref ipv4_repr) => ipv4::send_datagram(interface, ipv4_repr, |ip_payload| {
            serialize_segment(ip_repr, tcp_repr, payload, ip_payload)
        }),
        IpRepr::Ipv6(ref ipv6_repr) => ipv6::send_datagram(interface, ipv6_repr, |ip_payload| {
            serialize_segment(ip_repr, tcp_repr, payload, ip_payload)
        }),
    }
}

fn serialize_segment(ip_repr: &IpRepr, tcp_repr: &TcpRepr, payload: &[u8], ip_payload: &mut [u8]) {
    let mut tcp_packet = TcpPacket::try_new(ip_payload).unwrap();
    tcp_repr.serialize(&mut tcp_packet).unwrap();
    tcp_packet.payload_mut().copy_from_slice(payload);
    tcp_packet.fill_checksum(ip_repr);
}

/// Receives a TCP segment from an interface.
///
/// The segment is dispatched to the connection or listener it belongs to.
/// A segment no socket claims is answered with a reset, unless it carries
/// a reset itself.
pub fn recv_packet(
    interface: &mut Interface,
    ip_repr: &IpRepr,
    tcp_buffer: &[u8],
    sockets: &mut SocketSet,
) -> Result<()> {
    let tcp_packet = TcpPacket::try_new(tcp_buffer)?;
    tcp_packet.check_encoding(ip_repr)?;

    let tcp_repr = TcpRepr::deserialize(&tcp_packet);
    let payload = tcp_packet.payload();

    let src_addr = SocketAddr {
        addr: ip_repr.src_addr(),
        port: tcp_repr.src_port,
    };
    let dst_addr = SocketAddr {
        addr: ip_repr.dst_addr(),
        port: tcp_repr.dst_port,
    };

    // A connection with the exact peer outranks any listener on the port.
    // Whatever the connection makes of the segment is final, a connection
    // answers unacceptable segments itself.
    for socket in sockets.iter_mut() {
        if socket.state() != TcpState::Listen && socket.accepts(&src_addr, &dst_addr) {
            return socket.recv_enqueue(ip_repr, &tcp_repr, payload);
        }
    }

    for socket in sockets.iter_mut() {
        if socket.state() == TcpState::Listen && socket.accepts(&src_addr, &dst_addr) {
            return match socket.recv_enqueue(ip_repr, &tcp_repr, payload) {
                Err(Error::Ignored) if !tcp_repr.flags[TcpRepr::FLAG_RST] => {
                    send_rst(interface, ip_repr, &tcp_repr, payload.len())
                }
                res => res,
            };
        }
    }

    debug!("No socket for segment from {} to {}.", src_addr, dst_addr);

    if tcp_repr.flags[TcpRepr::FLAG_RST] {
        return Err(Error::Ignored);
    }
    send_rst(interface, ip_repr, &tcp_repr, payload.len())
}

/// Answers a segment addressed at no connection with a reset, keeping the
/// sequence numbers acceptable for the offender.
fn send_rst(
    interface: &mut Interface,
    ip_repr: &IpRepr,
    tcp_repr: &TcpRepr,
    payload_len: usize,
) -> Result<()> {
    let mut rst_repr = TcpRepr::new(tcp_repr.dst_port, tcp_repr.src_port);
    rst_repr.flags[TcpRepr::FLAG_RST] = true;

    if tcp_repr.flags[TcpRepr::FLAG_ACK] {
        rst_repr.seq_num = tcp_repr.ack_num;
    } else {
        let seg_len = payload_len
            + (tcp_repr.flags[TcpRepr::FLAG_SYN] as usize)
            + (tcp_repr.flags[TcpRepr::FLAG_FIN] as usize);
        rst_repr.flags[TcpRepr::FLAG_ACK] = true;
        rst_repr.ack_num = tcp_repr.seq_num.wrapping_add(seg_len as u32);
    }

    let payload_len = rst_repr.header_len() as u16;
    let ip_send_repr = match *ip_repr {
        IpRepr::Ipv4(ref ipv4_repr) => IpRepr::Ipv4(Ipv4Repr {
            src_addr: ipv4_repr.dst_addr,
            dst_addr: ipv4_repr.src_addr,
            protocol: ipv4_repr.protocol,
            payload_len,
        }),
        IpRepr::Ipv6(ref ipv6_repr) => IpRepr::Ipv6(Ipv6Repr {
            src_addr: ipv6_repr.dst_addr,
            dst_addr: ipv6_repr.src_addr,
            next_header: ipv6_repr.next_header,
            payload_len,
        }),
    };

    debug!(
        "Sending RST to {}:{}.",
        ip_repr.src_addr(),
        tcp_repr.src_port
    );

    send_packet(interface, &ip_send_repr, &rst_repr, &[])
}
