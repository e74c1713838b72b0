use std::ops::{
    Deref,
    DerefMut,
};

use crate::{
    Error,
    Result,
};

/// A fixed-capacity buffer exposing only a prefix of its storage.
///
/// Packet chunks and socket slots are allocated once at their maximum size
/// and then grow or shrink within that allocation.
#[derive(Clone, Debug)]
pub struct Slice<T> {
    buffer: Vec<T>,
    len: usize,
}

impl<T> From<Vec<T>> for Slice<T> {
    /// Adopts a buffer, with the entire buffer visible.
    fn from(buffer: Vec<T>) -> Self {
        let len = buffer.len();
        Slice { buffer, len }
    }
}

impl<T> Slice<T> {
    /// Returns the size of the backing allocation, the limit for
    /// try_resize().
    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }
}

impl<T: Clone> Slice<T> {
    /// Grows or shrinks the visible prefix without reallocating. Elements
    /// uncovered by growth are overwritten with the provided value, while
    /// shrinking leaves the hidden tail untouched.
    pub fn try_resize(&mut self, len: usize, value: T) -> Result<()> {
        if len > self.buffer.len() {
            return Err(Error::Exhausted);
        }

        for slot in &mut self.buffer[self.len .. len] {
            *slot = value.clone();
        }
        self.len = len;
        Ok(())
    }
}

impl<T> Deref for Slice<T> {
    type Target = [T];

    fn deref(&self) -> &[T] {
        &self.buffer[.. self.len]
    }
}

impl<T> DerefMut for Slice<T> {
    fn deref_mut(&mut self) -> &mut [T] {
        &mut self.buffer[.. self.len]
    }
}
