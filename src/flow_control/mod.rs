//! Credit-based flow control. The receiving end of a stream declares a buffer capacity, the
//!  sending end never has more than that capacity in flight, and the receiving end reports the
//!  cumulative amount it has consumed in status packets.
//!
//! Both ends account in bytes and packets, with packet sizes rounded up to whole bus lines. The
//!  counters are cumulative and wrap around, so all arithmetic on them is wrapping.

use std::ops::{Add, AddAssign, Sub};

pub mod rx_state;
pub mod tx_state;

/// A pair of byte and packet counts, used both for capacities and for cumulative transfer counts
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash)]
pub struct StreamBuffParams {
    pub bytes: u64,
    pub packets: u32,
}

impl StreamBuffParams {
    pub const ZERO: StreamBuffParams = StreamBuffParams { bytes: 0, packets: 0 };

    pub fn new(bytes: u64, packets: u32) -> StreamBuffParams {
        StreamBuffParams { bytes, packets }
    }

    /// true if both counts fit into `limit`
    pub fn fits_into(&self, limit: &StreamBuffParams) -> bool {
        self.bytes <= limit.bytes && self.packets <= limit.packets
    }

    pub fn saturating_sub(self, rhs: StreamBuffParams) -> StreamBuffParams {
        StreamBuffParams {
            bytes: self.bytes.saturating_sub(rhs.bytes),
            packets: self.packets.saturating_sub(rhs.packets),
        }
    }
}

impl Add for StreamBuffParams {
    type Output = StreamBuffParams;

    fn add(self, rhs: Self) -> Self::Output {
        StreamBuffParams {
            bytes: self.bytes.wrapping_add(rhs.bytes),
            packets: self.packets.wrapping_add(rhs.packets),
        }
    }
}

impl AddAssign for StreamBuffParams {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

impl Sub for StreamBuffParams {
    type Output = StreamBuffParams;

    fn sub(self, rhs: Self) -> Self::Output {
        StreamBuffParams {
            bytes: self.bytes.wrapping_sub(rhs.bytes),
            packets: self.packets.wrapping_sub(rhs.packets),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::simple(StreamBuffParams::new(10, 2), StreamBuffParams::new(3, 1), StreamBuffParams::new(7, 1))]
    #[case::wrapping(StreamBuffParams::new(1, 0), StreamBuffParams::new(2, 1), StreamBuffParams::new(u64::MAX, u32::MAX))]
    fn test_sub(#[case] a: StreamBuffParams, #[case] b: StreamBuffParams, #[case] expected: StreamBuffParams) {
        assert_eq!(a - b, expected);
        assert_eq!(expected + b, a);
    }

    #[rstest]
    #[case::both_fit(StreamBuffParams::new(10, 2), true)]
    #[case::exact(StreamBuffParams::new(100, 4), true)]
    #[case::bytes_exceed(StreamBuffParams::new(101, 2), false)]
    #[case::packets_exceed(StreamBuffParams::new(10, 5), false)]
    fn test_fits_into(#[case] counts: StreamBuffParams, #[case] expected: bool) {
        assert_eq!(counts.fits_into(&StreamBuffParams::new(100, 4)), expected);
    }
}
