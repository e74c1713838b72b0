//! An in-memory two station network for exercising the stack end to end.

use std::rc::Rc;
use std::time::Duration;

use embnet::core::arp_cache::{
    ArpCache,
    Config as ArpCacheConfig,
};
use embnet::core::dev::{
    Device,
    EthernetChannel,
};
use embnet::core::frag;
use embnet::core::frag::{
    Ipv4FragEngine,
    Ipv6FragEngine,
};
use embnet::core::repr::{
    EthernetAddress,
    IpAddress,
    Ipv4Address,
    Ipv4AddressCidr,
    Ipv6Address,
    Ipv6AddressCidr,
};
use embnet::core::service::{
    self,
    Interface,
};
use embnet::core::socket::{
    Bindings,
    SocketAddr,
    SocketSet,
    TcpSocket,
};
use embnet::core::storage::Slice;
use embnet::core::time::{
    Env,
    MockEnv,
};

lazy_static! {
    static ref LOG_INIT: () = env_logger::init();
}

/// Frame level MTU of the test network, leaving 1500 bytes for IP packets.
pub const MTU: usize = 1514;

pub fn eth_addr(host: u8) -> EthernetAddress {
    EthernetAddress::new([0x00, 0x16, 0x3E, 0x00, 0x00, host])
}

pub fn ipv4_addr(host: u8) -> Ipv4Address {
    Ipv4Address::new([10, 0, 0, host])
}

pub fn ipv6_addr(host: u8) -> Ipv6Address {
    let mut bytes = [0; 16];
    bytes[0] = 0xFD;
    bytes[15] = host;
    Ipv6Address::new(bytes)
}

/// One network endpoint, an interface with its sockets and port bindings.
pub struct Station {
    pub clock: MockEnv,
    pub interface: Interface,
    pub sockets: SocketSet,
    pub bindings: Bindings,
}

impl Station {
    /// Adds a TCP socket bound to an address, returning its handle.
    pub fn add_tcp_socket(&mut self, addr: IpAddress, port: u16) -> usize {
        let binding = self.bindings.bind(SocketAddr { addr, port }).unwrap();
        let socket = TcpSocket::new(binding, self.interface.ip_mtu(), self.clock.clone());
        self.sockets.add_socket(socket).unwrap()
    }
}

pub fn station(dev: EthernetChannel, clock: &MockEnv, host: u8) -> Station {
    *LOG_INIT;

    let env: Rc<dyn Env> = Rc::new(clock.clone());

    let interface = Interface {
        dev: Box::new(dev),
        arp_cache: ArpCache::new(ArpCacheConfig::default(), Rc::clone(&env)),
        ipv4_frag: Ipv4FragEngine::new(frag::ipv4::DEFAULT_OVERLAP_POLICY, Rc::clone(&env)),
        ipv6_frag: Ipv6FragEngine::new(frag::ipv6::DEFAULT_OVERLAP_POLICY, Rc::clone(&env)),
        ethernet_addr: eth_addr(host),
        ipv4_addr: Ipv4AddressCidr::try_new(ipv4_addr(host), 24).unwrap(),
        ipv6_addr: Ipv6AddressCidr::try_new(ipv6_addr(host), 64).unwrap(),
        default_gateway: ipv4_addr(1),
    };

    let sockets: Vec<Option<TcpSocket>> = (0 .. 4).map(|_| None).collect();

    Station {
        clock: clock.clone(),
        interface,
        sockets: SocketSet::new(Slice::from(sockets)),
        bindings: Bindings::new(),
    }
}

/// Two stations wired back to back, sharing a mock clock.
pub fn station_pair() -> (Station, Station, MockEnv) {
    let clock = MockEnv::new();
    let (dev_a, dev_b) = EthernetChannel::pair(MTU);
    (
        station(dev_a, &clock, 1),
        station(dev_b, &clock, 2),
        clock,
    )
}

/// A station whose peer stays a bare channel endpoint, letting a test craft
/// and inspect raw frames.
pub fn station_with_raw_peer() -> (Station, EthernetChannel, MockEnv) {
    let clock = MockEnv::new();
    let (dev_a, dev_b) = EthernetChannel::pair(MTU);
    (station(dev_a, &clock, 1), dev_b, clock)
}

/// Runs one receive and transmit pass over a station.
pub fn drive(station: &mut Station) {
    service::tick(&mut station.interface, &mut station.sockets);
    service::poll(&mut station.interface, &mut station.sockets);
}

/// Shuttles frames between two stations across a stretch of simulated time,
/// advancing the shared clock in small steps.
pub fn propagate(a: &mut Station, b: &mut Station, clock: &MockEnv, millis: u64) {
    let mut elapsed = 0;
    loop {
        // Enough passes for multi-step exchanges, resolutions included, to
        // settle within a single step.
        for _ in 0 .. 8 {
            drive(a);
            drive(b);
        }
        if elapsed >= millis {
            break;
        }
        clock.advance(Duration::from_millis(10));
        elapsed += 10;
    }
}

/// Pops every frame queued at a raw channel endpoint.
pub fn drain(dev: &mut EthernetChannel) -> Vec<Vec<u8>> {
    let mut frames = Vec::new();
    let mut eth_buffer = vec![0; MTU];
    while let Ok(buffer_len) = dev.recv(&mut eth_buffer) {
        frames.push(eth_buffer[.. buffer_len].to_vec());
    }
    frames
}
