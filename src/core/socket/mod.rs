//! Communication between endpoints.
//!
//! The `socket` module provides abstractions for buffering, sending, and
//! receiving data between TCP endpoints.

pub mod bindings;
pub mod set;
pub mod tcp;

pub use self::bindings::{
    AddrLease,
    Bindings,
    SocketAddr,
};
pub use self::set::SocketSet;
pub use self::tcp::{
    TcpContext,
    TcpSocket,
    TcpState,
};
