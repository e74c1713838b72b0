//! Storage primitives backing sockets, caches, and packet processing.

mod chunked;
mod slice;

pub use self::chunked::{
    PacketBuf,
    Slices,
    View,
    CHUNK_SIZE,
};
pub use self::slice::Slice;
