use crate::core::service::{
    ethernet,
    tcp,
    Interface,
};
use crate::core::socket::SocketSet;
use crate::Error;

/// Sends out any segments enqueued in a set of sockets via an interface.
pub fn send(interface: &mut Interface, sockets: &mut SocketSet) {
    for socket in sockets.iter_mut() {
        loop {
            let ok_or_err = socket.send_dequeue(|ip_repr, tcp_repr, payload| {
                tcp::send_packet(interface, ip_repr, tcp_repr, payload)
            });

            match ok_or_err {
                Ok(_) => continue,
                Err(Error::Exhausted) => break,
                Err(err) => {
                    debug!("Error sending segment with {:?}.", err);
                    break;
                }
            }
        }
    }
}

/// Reads frames from an interface, forwarding packets to the socket they
/// belong to.
pub fn recv(interface: &mut Interface, sockets: &mut SocketSet) {
    let mut eth_buffer = vec![0; interface.dev.max_transmission_unit()];

    loop {
        match interface.dev.recv(&mut eth_buffer) {
            Ok(buffer_len) => {
                match ethernet::recv_frame(interface, &eth_buffer[.. buffer_len], sockets) {
                    Ok(_) => continue,
                    Err(Error::Ignored) => continue,
                    Err(err) => warn!("Error processing ethernet frame with {:?}.", err),
                }
            }
            Err(Error::Exhausted) => break,
            Err(err) => {
                warn!("Error receiving ethernet frame with {:?}.", err);
                break;
            }
        }
    }
}
