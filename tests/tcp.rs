//! TCP over the wire: connection setup and teardown between two stations,
//! and segment-level behavior against a hand-crafted peer.

#[macro_use]
extern crate assert_matches;
extern crate embnet;
extern crate env_logger;
#[macro_use]
extern crate lazy_static;

mod context;

use std::time::Duration;

use embnet::Error;
use embnet::core::dev::{
    Device,
    EthernetChannel,
};
use embnet::core::repr::{
    eth_types,
    EthernetFrame,
    IpAddress,
    IpProtocol,
    IpRepr,
    Ipv4Packet,
    Ipv4Repr,
    TcpPacket,
    TcpRepr,
};
use embnet::core::socket::{
    SocketAddr,
    TcpState,
};

use context::Station;

#[test]
fn test_handshake_and_echo() {
    let (mut a, mut b, clock) = context::station_pair();

    let server = b.add_tcp_socket(IpAddress::Ipv4(context::ipv4_addr(2)), 80);
    b.sockets.socket(server).listen().unwrap();

    let client = a.add_tcp_socket(IpAddress::Ipv4(context::ipv4_addr(1)), 7000);
    a.sockets
        .socket(client)
        .connect(SocketAddr {
            addr: IpAddress::Ipv4(context::ipv4_addr(2)),
            port: 80,
        })
        .unwrap();

    context::propagate(&mut a, &mut b, &clock, 20);
    assert!(a.sockets.socket(client).is_connected());
    assert!(b.sockets.socket(server).is_connected());

    assert_eq!(
        a.sockets.socket(client).send_slice(b"hello from a").unwrap(),
        12
    );
    context::propagate(&mut a, &mut b, &clock, 20);

    let mut buffer = [0; 32];
    let len = b.sockets.socket(server).recv_slice(&mut buffer).unwrap();
    assert_eq!(&buffer[.. len], b"hello from a");

    assert_eq!(
        b.sockets.socket(server).send_slice(b"hello from b").unwrap(),
        12
    );
    context::propagate(&mut a, &mut b, &clock, 20);

    let len = a.sockets.socket(client).recv_slice(&mut buffer).unwrap();
    assert_eq!(&buffer[.. len], b"hello from b");
}

#[test]
fn test_connect_to_closed_port_is_reset() {
    let (mut a, mut b, clock) = context::station_pair();

    let client = a.add_tcp_socket(IpAddress::Ipv4(context::ipv4_addr(1)), 7000);
    a.sockets
        .socket(client)
        .connect(SocketAddr {
            addr: IpAddress::Ipv4(context::ipv4_addr(2)),
            port: 81,
        })
        .unwrap();

    context::propagate(&mut a, &mut b, &clock, 20);

    assert!(a.sockets.socket(client).is_closed());
    assert_matches!(
        a.sockets.socket(client).send_slice(b"hello"),
        Err(Error::Reset)
    );
}

#[test]
fn test_handshake_over_ipv6() {
    let (mut a, mut b, clock) = context::station_pair();

    // No neighbor discovery protocol runs for IPv6, so both stations get
    // static neighbors.
    a.interface
        .arp_cache
        .set_permanent(
            IpAddress::Ipv6(context::ipv6_addr(2)),
            context::eth_addr(2),
        )
        .unwrap();
    b.interface
        .arp_cache
        .set_permanent(
            IpAddress::Ipv6(context::ipv6_addr(1)),
            context::eth_addr(1),
        )
        .unwrap();

    let server = b.add_tcp_socket(IpAddress::Ipv6(context::ipv6_addr(2)), 80);
    b.sockets.socket(server).listen().unwrap();

    let client = a.add_tcp_socket(IpAddress::Ipv6(context::ipv6_addr(1)), 7000);
    a.sockets
        .socket(client)
        .connect(SocketAddr {
            addr: IpAddress::Ipv6(context::ipv6_addr(2)),
            port: 80,
        })
        .unwrap();

    context::propagate(&mut a, &mut b, &clock, 20);
    assert!(a.sockets.socket(client).is_connected());
    assert!(b.sockets.socket(server).is_connected());

    a.sockets.socket(client).send_slice(b"over ipv6").unwrap();
    context::propagate(&mut a, &mut b, &clock, 20);

    let mut buffer = [0; 32];
    let len = b.sockets.socket(server).recv_slice(&mut buffer).unwrap();
    assert_eq!(&buffer[.. len], b"over ipv6");
}

#[test]
fn test_graceful_close_lingers_in_time_wait() {
    let (mut a, mut b, clock) = context::station_pair();

    let server = b.add_tcp_socket(IpAddress::Ipv4(context::ipv4_addr(2)), 80);
    b.sockets.socket(server).listen().unwrap();

    let client = a.add_tcp_socket(IpAddress::Ipv4(context::ipv4_addr(1)), 7000);
    a.sockets
        .socket(client)
        .connect(SocketAddr {
            addr: IpAddress::Ipv4(context::ipv4_addr(2)),
            port: 80,
        })
        .unwrap();
    context::propagate(&mut a, &mut b, &clock, 20);

    a.sockets.socket(client).close().unwrap();
    context::propagate(&mut a, &mut b, &clock, 20);

    // The initiator's FIN drains the server side to end-of-stream.
    let mut buffer = [0; 32];
    assert_eq!(b.sockets.socket(server).recv_slice(&mut buffer).unwrap(), 0);

    b.sockets.socket(server).close().unwrap();
    context::propagate(&mut a, &mut b, &clock, 20);

    assert!(b.sockets.socket(server).is_closed());
    assert_eq!(a.sockets.socket(client).state(), TcpState::TimeWait);

    // The initiator holds the pair reserved for a whole segment lifetime.
    clock.advance(Duration::from_secs(60));
    context::drive(&mut a);
    assert!(a.sockets.socket(client).is_closed());
}

fn send_segment(raw: &mut EthernetChannel, tcp_repr: &TcpRepr, payload: &[u8]) {
    let ip_repr = Ipv4Repr {
        src_addr: context::ipv4_addr(2),
        dst_addr: context::ipv4_addr(1),
        protocol: IpProtocol::Tcp,
        payload_len: (tcp_repr.header_len() + payload.len()) as u16,
    };

    let mut ipv4_buffer = vec![0; ip_repr.buffer_len()];
    {
        let mut ipv4_packet = Ipv4Packet::try_new(&mut ipv4_buffer[..]).unwrap();
        ip_repr.serialize(&mut ipv4_packet);
        let mut tcp_packet = TcpPacket::try_new(ipv4_packet.payload_mut()).unwrap();
        tcp_repr.serialize(&mut tcp_packet).unwrap();
        tcp_packet.payload_mut().copy_from_slice(payload);
        tcp_packet.fill_checksum(&IpRepr::Ipv4(ip_repr));
    }

    let mut eth_buffer = vec![0; EthernetFrame::<&[u8]>::buffer_len(ipv4_buffer.len())];
    {
        let mut eth_frame = EthernetFrame::try_new(&mut eth_buffer[..]).unwrap();
        eth_frame.set_dst_addr(context::eth_addr(1));
        eth_frame.set_src_addr(context::eth_addr(2));
        eth_frame.set_payload_type(eth_types::IPV4);
        eth_frame.payload_mut().copy_from_slice(&ipv4_buffer);
    }
    raw.send(&eth_buffer).unwrap();
}

fn recv_segments(raw: &mut EthernetChannel) -> Vec<(TcpRepr, Vec<u8>)> {
    let mut segments = Vec::new();
    for frame in context::drain(raw) {
        let eth_frame = EthernetFrame::try_new(&frame[..]).unwrap();
        assert_eq!(eth_frame.payload_type(), eth_types::IPV4);

        let ipv4_packet = Ipv4Packet::try_new(eth_frame.payload()).unwrap();
        ipv4_packet.check_encoding().unwrap();
        let ipv4_repr = Ipv4Repr::deserialize(&ipv4_packet).unwrap();
        assert_eq!(ipv4_repr.protocol, IpProtocol::Tcp);

        let tcp_packet = TcpPacket::try_new(ipv4_packet.payload()).unwrap();
        tcp_packet.check_encoding(&IpRepr::Ipv4(ipv4_repr)).unwrap();
        segments.push((
            TcpRepr::deserialize(&tcp_packet),
            tcp_packet.payload().to_vec(),
        ));
    }
    segments
}

/// Walks a station through a handshake against a crafted peer with initial
/// sequence number 300, returning the connected socket handle and the
/// station's initial sequence number.
fn handshake(station: &mut Station, raw: &mut EthernetChannel) -> (usize, u32) {
    station
        .interface
        .arp_cache
        .set_permanent(
            IpAddress::Ipv4(context::ipv4_addr(2)),
            context::eth_addr(2),
        )
        .unwrap();

    let handle = station.add_tcp_socket(IpAddress::Ipv4(context::ipv4_addr(1)), 7000);
    station
        .sockets
        .socket(handle)
        .connect(SocketAddr {
            addr: IpAddress::Ipv4(context::ipv4_addr(2)),
            port: 80,
        })
        .unwrap();
    context::drive(station);

    let segments = recv_segments(raw);
    assert_eq!(segments.len(), 1);
    let (ref syn, ref payload) = segments[0];
    assert!(payload.is_empty());
    assert!(syn.flags[TcpRepr::FLAG_SYN]);
    assert!(!syn.flags[TcpRepr::FLAG_ACK]);
    assert_eq!(syn.max_segment_size, Some(1460));
    assert!(syn.sack_permitted);
    let iss = syn.seq_num;

    let mut syn_ack = TcpRepr::new(80, 7000);
    syn_ack.seq_num = 300;
    syn_ack.ack_num = iss.wrapping_add(1);
    syn_ack.flags[TcpRepr::FLAG_SYN] = true;
    syn_ack.flags[TcpRepr::FLAG_ACK] = true;
    syn_ack.window_size = 8192;
    syn_ack.max_segment_size = Some(1460);
    syn_ack.sack_permitted = true;
    send_segment(raw, &syn_ack, &[]);
    context::drive(station);

    let segments = recv_segments(raw);
    assert_eq!(segments.len(), 1);
    let (ref ack, ref payload) = segments[0];
    assert!(payload.is_empty());
    assert!(ack.flags[TcpRepr::FLAG_ACK]);
    assert!(!ack.flags[TcpRepr::FLAG_SYN]);
    assert_eq!(ack.seq_num, iss.wrapping_add(1));
    assert_eq!(ack.ack_num, 301);
    assert!(station.sockets.socket(handle).is_connected());

    (handle, iss)
}

/// A pure acknowledgment from the crafted peer.
fn peer_ack(ack_num: u32) -> TcpRepr {
    let mut tcp_repr = TcpRepr::new(80, 7000);
    tcp_repr.seq_num = 301;
    tcp_repr.ack_num = ack_num;
    tcp_repr.flags[TcpRepr::FLAG_ACK] = true;
    tcp_repr.window_size = 8192;
    tcp_repr
}

#[test]
fn test_handshake_against_crafted_peer() {
    let (mut station, mut raw, _clock) = context::station_with_raw_peer();
    handshake(&mut station, &mut raw);
}

#[test]
fn test_nagle_holds_second_small_segment() {
    let (mut station, mut raw, _clock) = context::station_with_raw_peer();
    let (handle, iss) = handshake(&mut station, &mut raw);

    assert_eq!(
        station.sockets.socket(handle).send_slice(&[1; 50]).unwrap(),
        50
    );
    context::drive(&mut station);
    let segments = recv_segments(&mut raw);
    assert_eq!(segments.len(), 1);
    assert_eq!(segments[0].0.seq_num, iss.wrapping_add(1));
    assert_eq!(segments[0].1, vec![1; 50]);

    // A second sub-segment write waits until the first is acknowledged.
    assert_eq!(
        station.sockets.socket(handle).send_slice(&[2; 50]).unwrap(),
        50
    );
    for _ in 0 .. 4 {
        context::drive(&mut station);
    }
    assert!(recv_segments(&mut raw).is_empty());

    send_segment(&mut raw, &peer_ack(iss.wrapping_add(51)), &[]);
    context::drive(&mut station);

    let segments = recv_segments(&mut raw);
    assert_eq!(segments.len(), 1);
    assert_eq!(segments[0].0.seq_num, iss.wrapping_add(51));
    assert_eq!(segments[0].1, vec![2; 50]);
}

#[test]
fn test_nagle_disabled_sends_without_waiting() {
    let (mut station, mut raw, _clock) = context::station_with_raw_peer();
    let (handle, iss) = handshake(&mut station, &mut raw);
    station.sockets.socket(handle).set_nagle(false);

    station.sockets.socket(handle).send_slice(&[1; 50]).unwrap();
    context::drive(&mut station);
    let segments = recv_segments(&mut raw);
    assert_eq!(segments.len(), 1);
    assert_eq!(segments[0].0.seq_num, iss.wrapping_add(1));

    station.sockets.socket(handle).send_slice(&[2; 50]).unwrap();
    context::drive(&mut station);
    let segments = recv_segments(&mut raw);
    assert_eq!(segments.len(), 1);
    assert_eq!(segments[0].0.seq_num, iss.wrapping_add(51));
    assert_eq!(segments[0].1, vec![2; 50]);
}

#[test]
fn test_three_duplicate_acks_trigger_fast_retransmit() {
    let (mut station, mut raw, _clock) = context::station_with_raw_peer();
    let (handle, iss) = handshake(&mut station, &mut raw);

    station.sockets.socket(handle).send_slice(&[7; 100]).unwrap();
    context::drive(&mut station);
    let segments = recv_segments(&mut raw);
    assert_eq!(segments.len(), 1);
    assert_eq!(segments[0].0.seq_num, iss.wrapping_add(1));
    assert_eq!(segments[0].1.len(), 100);

    // Two duplicates only count.
    for _ in 0 .. 2 {
        send_segment(&mut raw, &peer_ack(iss.wrapping_add(1)), &[]);
        context::drive(&mut station);
        assert!(recv_segments(&mut raw).is_empty());
    }

    // The third triggers exactly one retransmission of the lost segment.
    send_segment(&mut raw, &peer_ack(iss.wrapping_add(1)), &[]);
    context::drive(&mut station);
    let segments = recv_segments(&mut raw);
    assert_eq!(segments.len(), 1);
    assert_eq!(segments[0].0.seq_num, iss.wrapping_add(1));
    assert_eq!(segments[0].1, vec![7; 100]);

    // Further duplicates inflate the window without resending.
    send_segment(&mut raw, &peer_ack(iss.wrapping_add(1)), &[]);
    context::drive(&mut station);
    assert!(recv_segments(&mut raw).is_empty());
}

#[test]
fn test_retransmission_after_timeout() {
    let (mut station, mut raw, clock) = context::station_with_raw_peer();
    let (handle, iss) = handshake(&mut station, &mut raw);

    station.sockets.socket(handle).send_slice(&[9; 100]).unwrap();
    context::drive(&mut station);
    let segments = recv_segments(&mut raw);
    assert_eq!(segments.len(), 1);
    assert_eq!(segments[0].0.seq_num, iss.wrapping_add(1));

    // No acknowledgment ever arrives.
    for _ in 0 .. 6 {
        clock.advance(Duration::from_millis(200));
        context::drive(&mut station);
    }

    let segments = recv_segments(&mut raw);
    assert_eq!(segments.len(), 1);
    assert_eq!(segments[0].0.seq_num, iss.wrapping_add(1));
    assert_eq!(segments[0].1, vec![9; 100]);
}
