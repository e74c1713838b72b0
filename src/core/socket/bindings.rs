use std::cell::RefCell;
use std::collections::HashSet;
use std::fmt::{
    Display,
    Formatter,
    Result as FmtResult,
};
use std::ops::Deref;
use std::rc::Rc;

use crate::{
    Error,
    Result,
};
use crate::core::repr::IpAddress;

/// An IP address + port socket address.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct SocketAddr {
    pub addr: IpAddress,
    pub port: u16,
}

impl Display for SocketAddr {
    fn fmt(&self, f: &mut Formatter) -> FmtResult {
        write!(f, "{}:{}", self.addr, self.port)
    }
}

/// A socket address which has been reserved, and is freed for reallocation by
/// the owning Bindings instance once dropped.
#[derive(Debug)]
pub struct AddrLease {
    socket_addr: SocketAddr,
    socket_addrs: Rc<RefCell<HashSet<SocketAddr>>>,
}

impl Deref for AddrLease {
    type Target = SocketAddr;

    fn deref(&self) -> &SocketAddr {
        &self.socket_addr
    }
}

impl Display for AddrLease {
    fn fmt(&self, f: &mut Formatter) -> FmtResult {
        write!(f, "{}", self.socket_addr)
    }
}

impl Drop for AddrLease {
    fn drop(&mut self) {
        self.socket_addrs.borrow_mut().remove(&self.socket_addr);
    }
}

/// An allocator for socket address leases.
#[derive(Debug)]
pub struct Bindings {
    socket_addrs: Rc<RefCell<HashSet<SocketAddr>>>,
}

impl Bindings {
    /// Creates a set of socket bindings.
    pub fn new() -> Bindings {
        Bindings {
            socket_addrs: Rc::new(RefCell::new(HashSet::new())),
        }
    }

    /// Tries to reserve the specified socket address, returning an
    /// Error::InUse if the socket address is already in use.
    pub fn bind(&self, socket_addr: SocketAddr) -> Result<AddrLease> {
        if self.socket_addrs.borrow_mut().insert(socket_addr) {
            Ok(AddrLease {
                socket_addr,
                socket_addrs: self.socket_addrs.clone(),
            })
        } else {
            Err(Error::InUse)
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::core::repr::Ipv4Address;

    use super::*;

    fn socket_addr() -> SocketAddr {
        SocketAddr {
            addr: IpAddress::Ipv4(Ipv4Address::new([0, 1, 2, 3])),
            port: 1024,
        }
    }

    #[test]
    fn test_bind_ok() {
        let bindings = Bindings::new();
        assert_eq!(*bindings.bind(socket_addr()).unwrap(), socket_addr());
    }

    #[test]
    fn test_bind_err() {
        let bindings = Bindings::new();
        let _addr_lease = bindings.bind(socket_addr()).unwrap();
        assert_matches!(bindings.bind(socket_addr()), Err(Error::InUse));
    }

    #[test]
    fn test_bind_after_lease_dropped() {
        let bindings = Bindings::new();
        {
            let _addr_lease = bindings.bind(socket_addr()).unwrap();
        }
        assert_matches!(bindings.bind(socket_addr()), Ok(_));
    }
}
