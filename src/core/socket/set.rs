use std::slice::IterMut as SliceIterMut;

use crate::{
    Error,
    Result,
};
use crate::core::socket::TcpSocket;
use crate::core::storage::Slice;

/// A set of sockets with stable integral handles.
pub struct SocketSet {
    sockets: Slice<Option<TcpSocket>>,
}

impl SocketSet {
    /// Creates a socket set.
    pub fn new(sockets: Slice<Option<TcpSocket>>) -> SocketSet {
        SocketSet { sockets }
    }

    /// Adds a socket and returns a stable handle.
    pub fn add_socket(&mut self, socket: TcpSocket) -> Result<usize> {
        let handle = (0 .. self.sockets.len()).find(|i| self.sockets[*i].is_none());

        match handle {
            Some(i) => {
                self.sockets[i] = Some(socket);
                Ok(i)
            }
            _ => Err(Error::Exhausted),
        }
    }

    /// Removes the socket with the specified handle, freeing the slot.
    pub fn remove_socket(&mut self, socket_handle: usize) -> Option<TcpSocket> {
        if socket_handle >= self.sockets.len() {
            None
        } else {
            self.sockets[socket_handle].take()
        }
    }

    /// Returns a reference to a socket with the specified handle. Causes a
    /// panic if the handle is not in use.
    pub fn socket(&mut self, socket_handle: usize) -> &mut TcpSocket {
        match self.try_socket(socket_handle) {
            Ok(socket) => socket,
            _ => panic!("Socket handle is not in use."),
        }
    }

    /// Returns a reference to a socket with the specified handle, or
    /// Error::InvalidHandle if the handle is not in use.
    pub fn try_socket(&mut self, socket_handle: usize) -> Result<&mut TcpSocket> {
        if socket_handle >= self.sockets.len() {
            Err(Error::InvalidHandle)
        } else {
            match self.sockets[socket_handle] {
                Some(ref mut socket) => Ok(socket),
                _ => Err(Error::InvalidHandle),
            }
        }
    }

    /// Returns an iterator over all of the sockets in the set.
    pub fn iter_mut(&mut self) -> SocketIter {
        SocketIter {
            slice_iter: self.sockets.iter_mut(),
        }
    }
}

pub struct SocketIter<'a> {
    slice_iter: SliceIterMut<'a, Option<TcpSocket>>,
}

impl<'a> Iterator for SocketIter<'a> {
    type Item = &'a mut TcpSocket;

    fn next(&mut self) -> Option<&'a mut TcpSocket> {
        while let Some(socket_option) = self.slice_iter.next() {
            if let Some(ref mut socket) = *socket_option {
                return Some(socket);
            }
        }

        None
    }
}
