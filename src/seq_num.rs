//! Sequence numbers on the wire are free-running counters that wrap around. Ordering them means
//!  looking at the distance between two values on the circle rather than comparing them as
//!  plain integers: `a` is newer than `b` if walking forward from `b` reaches `a` in less than
//!  half a turn.

use std::fmt::{Display, Formatter};

/// An unsigned counter that wraps around and is ordered on the circle
pub trait WrappingCounter: Copy + Eq {
    /// true iff `self` follows `other` by at least one and less than half the counter range
    fn is_newer(self, other: Self) -> bool;
}

macro_rules! impl_wrapping_counter {
    ($($t:ty),*) => {
        $(
            impl WrappingCounter for $t {
                fn is_newer(self, other: Self) -> bool {
                    let half: $t = 1 << (<$t>::BITS - 1);
                    self != other && (self.wrapping_sub(other) & half) == 0
                }
            }
        )*
    };
}

impl_wrapping_counter!(u8, u16, u32, u64);

pub fn is_newer<T: WrappingCounter>(a: T, b: T) -> bool {
    a.is_newer(b)
}


/// The 16-bit sequence number carried in every CHDR header
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, Default)]
pub struct SeqNum(u16);

impl Display for SeqNum {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl SeqNum {
    pub const ZERO: SeqNum = SeqNum(0);

    pub fn from_raw(value: u16) -> Self {
        Self(value)
    }

    pub fn to_raw(&self) -> u16 {
        self.0
    }

    pub fn next(&self) -> SeqNum {
        SeqNum(self.0.wrapping_add(1))
    }

    pub fn is_newer(&self, other: SeqNum) -> bool {
        is_newer(self.0, other.0)
    }
}
