//! Core, platform independent networking code.

pub mod arp_cache;
pub mod check;
pub mod dev;
pub mod frag;
pub mod repr;
pub mod service;
pub mod socket;
pub mod storage;
pub mod time;
