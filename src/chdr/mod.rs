//! CHDR is the packet format of the data plane. Every packet starts with a 64-bit header word,
//!  padded to the configured bus width, followed by an optional timestamp, metadata lines and
//!  the payload. See the crate documentation for the bit layouts.

use bytes::{Buf, BufMut};
use crate::error::{Result, TransportError};

pub mod control_messages;
pub mod header;
pub mod packet;

/// Width of the CHDR bus. Packet lengths are accounted in multiples of this width by both peers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum ChdrWidth {
    #[default]
    W64,
    W128,
    W256,
    W512,
}

impl ChdrWidth {
    pub fn from_bits(bits: usize) -> anyhow::Result<ChdrWidth> {
        match bits {
            64 => Ok(ChdrWidth::W64),
            128 => Ok(ChdrWidth::W128),
            256 => Ok(ChdrWidth::W256),
            512 => Ok(ChdrWidth::W512),
            _ => anyhow::bail!("unsupported CHDR width of {} bits", bits),
        }
    }

    pub fn bits(self) -> usize {
        self.bytes() * 8
    }

    pub fn bytes(self) -> usize {
        match self {
            ChdrWidth::W64 => 8,
            ChdrWidth::W128 => 16,
            ChdrWidth::W256 => 32,
            ChdrWidth::W512 => 64,
        }
    }

    /// Rounds a packet length up to a whole number of bus lines
    pub fn round_up(self, len: usize) -> usize {
        len.div_ceil(self.bytes()) * self.bytes()
    }
}

/// Byte order of the 64-bit words on the wire
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum Endianness {
    #[default]
    Big,
    Little,
}

impl Endianness {
    pub fn put_u64(self, buf: &mut impl BufMut, value: u64) {
        match self {
            Endianness::Big => buf.put_u64(value),
            Endianness::Little => buf.put_u64_le(value),
        }
    }

    pub fn try_get_u64(self, buf: &mut impl Buf) -> Result<u64> {
        if buf.remaining() < size_of::<u64>() {
            return Err(TransportError::MalformedPacket(format!("expected a 64-bit word, found {} bytes", buf.remaining())));
        }
        Ok(match self {
            Endianness::Big => buf.get_u64(),
            Endianness::Little => buf.get_u64_le(),
        })
    }

    pub fn put_i16(self, buf: &mut impl BufMut, value: i16) {
        match self {
            Endianness::Big => buf.put_i16(value),
            Endianness::Little => buf.put_i16_le(value),
        }
    }

    pub fn get_i16(self, buf: &mut impl Buf) -> i16 {
        match self {
            Endianness::Big => buf.get_i16(),
            Endianness::Little => buf.get_i16_le(),
        }
    }
}

/// The two endpoints of a stream. The source sends data packets addressed to the destination,
///  the destination sends flow control status back to the source.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct EpidPair {
    pub src: u16,
    pub dst: u16,
}

impl EpidPair {
    pub fn new(src: u16, dst: u16) -> EpidPair {
        EpidPair { src, dst }
    }
}
