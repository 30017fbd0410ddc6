//! Frame buffers are the unit of ownership that moves between links, the I/O service, the data
//!  transports and the streamers.
//!
//! Their salient points are:
//!
//! * backed by a fixed-length, pre-allocated region that is reused for the lifetime of a link
//! * carry a 'packet size', i.e. the number of bytes of the region that hold the current packet
//! * are moved, never copied or shared - there is no `Clone`
//! * implement `BufMut` to fit into the `bytes` ecosystem
//!

use std::borrow::Borrow;
use std::fmt::{Debug, Formatter};
use bytes::buf::UninitSlice;

/// A fixed-capacity frame holding at most one packet.
#[must_use = "frame buffers must be handed back to the link they came from"]
#[derive(Eq)]
pub struct FrameBuff {
    buf: Vec<u8>,
    packet_size: usize,
}
impl FrameBuff {
    /// create a new frame with the given capacity and an empty packet
    pub fn new(capacity: usize) -> FrameBuff {
        FrameBuff {
            // frames are allocated once per link and recycled, so the up-front initialization
            //  is paid only once
            buf: vec![0; capacity],
            packet_size: 0,
        }
    }

    /// number of bytes holding the current packet
    pub fn packet_size(&self) -> usize {
        self.packet_size
    }

    pub fn set_packet_size(&mut self, packet_size: usize) {
        assert!(packet_size <= self.capacity(), "packet size {} exceeds frame capacity {}", packet_size, self.capacity());
        self.packet_size = packet_size;
    }

    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    pub fn clear(&mut self) {
        self.packet_size = 0;
    }

    /// The entire frame, regardless of packet size
    pub fn data(&self) -> &[u8] {
        &self.buf
    }

    /// The entire frame, regardless of packet size. Writers are expected to call
    ///  `set_packet_size()` when they are done.
    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.buf
    }

    /// This is a convenience function for test code. It creates a frame holding a copy of
    ///  `data` as its packet.
    #[cfg(test)]
    pub fn from_slice(capacity: usize, data: &[u8]) -> FrameBuff {
        let mut result = FrameBuff::new(capacity);
        bytes::BufMut::put_slice(&mut result, data);
        result
    }
}

impl PartialEq for FrameBuff {
    fn eq(&self, other: &Self) -> bool {
        self.as_ref().eq(other.as_ref())
    }
}

impl Debug for FrameBuff {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "FrameBuff({}/{}) ", self.packet_size, self.capacity())?;
        self.as_ref().fmt(f)
    }
}

impl Borrow<[u8]> for FrameBuff {
    fn borrow(&self) -> &[u8] {
        self.as_ref()
    }
}

impl AsRef<[u8]> for FrameBuff {
    fn as_ref(&self) -> &[u8] {
        &self.buf[..self.packet_size]
    }
}
impl AsMut<[u8]> for FrameBuff {
    fn as_mut(&mut self) -> &mut [u8] {
        &mut self.buf[..self.packet_size]
    }
}

unsafe impl bytes::BufMut for FrameBuff {
    fn remaining_mut(&self) -> usize {
        self.buf.len() - self.packet_size
    }

    unsafe fn advance_mut(&mut self, cnt: usize) {
        assert!(self.packet_size + cnt <= self.capacity());
        self.packet_size += cnt;
    }

    fn chunk_mut(&mut self) -> &mut UninitSlice {
        UninitSlice::new(&mut self.buf[self.packet_size..])
    }
}
