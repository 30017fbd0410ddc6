use std::fmt::{Display, Formatter};
use std::ops::{Add, AddAssign};

/// A point in device time, split into whole and fractional seconds so that long uptimes do not
///  cost precision. `frac_secs` is always in `[0, 1)`.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct TimeSpec {
    full_secs: i64,
    frac_secs: f64,
}

impl TimeSpec {
    pub const ZERO: TimeSpec = TimeSpec { full_secs: 0, frac_secs: 0.0 };

    pub fn new(full_secs: i64, frac_secs: f64) -> TimeSpec {
        let carry = frac_secs.floor();
        TimeSpec {
            full_secs: full_secs + carry as i64,
            frac_secs: frac_secs - carry,
        }
    }

    pub fn from_secs(secs: f64) -> TimeSpec {
        TimeSpec::new(0, secs)
    }

    pub fn from_ticks(ticks: i64, tick_rate: f64) -> TimeSpec {
        let rate = tick_rate.round() as i64;
        if rate > 0 && rate as f64 == tick_rate {
            // integer rates divide exactly, keeping precision for large tick counts
            TimeSpec::new(ticks.div_euclid(rate), ticks.rem_euclid(rate) as f64 / tick_rate)
        }
        else {
            TimeSpec::from_secs(ticks as f64 / tick_rate)
        }
    }

    pub fn full_secs(&self) -> i64 {
        self.full_secs
    }

    pub fn frac_secs(&self) -> f64 {
        self.frac_secs
    }

    pub fn as_secs(&self) -> f64 {
        self.full_secs as f64 + self.frac_secs
    }

    pub fn to_ticks(&self, tick_rate: f64) -> i64 {
        self.full_secs * tick_rate.round() as i64 + (self.frac_secs * tick_rate).round() as i64
    }
}

impl Add for TimeSpec {
    type Output = TimeSpec;

    fn add(self, rhs: Self) -> Self::Output {
        TimeSpec::new(self.full_secs + rhs.full_secs, self.frac_secs + rhs.frac_secs)
    }
}

impl AddAssign for TimeSpec {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

impl Display for TimeSpec {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.9}s", self.as_secs())
    }
}
