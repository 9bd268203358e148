//! Exact-precision packet timestamps.
//!
//! The duplicate-record output format needs a 9-decimal-digit (nanosecond)
//! time difference between two packets. The original C uses `long double` for
//! this; Rust has no portable extended float, and `f64` loses precision at
//! Unix-epoch magnitudes well before the 9th decimal digit. So timestamps
//! are stored as an exact `(seconds, nanoseconds)` pair and differenced
//! with plain integer arithmetic.

use std::fmt;
use std::ops::Sub;

/// A packet timestamp, exact to the nanosecond.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub struct Timestamp {
    secs: i64,
    nanos: u32,
}

impl Timestamp {
    pub fn new(secs: i64, nanos: u32) -> Self {
        debug_assert!(nanos < 1_000_000_000);
        Timestamp { secs, nanos }
    }

    pub fn from_micros(secs: i64, micros: u32) -> Self {
        Timestamp::new(secs, micros * 1_000)
    }

    pub fn from_nanos(secs: i64, nanos: u32) -> Self {
        Timestamp::new(secs, nanos)
    }

    pub fn secs(&self) -> i64 {
        self.secs
    }

    /// Milliseconds since the epoch, used by the `series` bucketizer.
    pub fn as_millis(&self) -> i64 {
        self.secs * 1000 + i64::from(self.nanos / 1_000_000)
    }

    /// Signed difference in seconds as a float, used only for the
    /// window-by-elapsed-time cutoff check, where losing precision far
    /// past the decisecond mark does not matter.
    pub fn diff_secs_f64(&self, earlier: &Timestamp) -> f64 {
        let d = *self - *earlier;
        d.secs as f64 + d.nanos as f64 / 1_000_000_000.0
    }
}

/// A signed duration with exact nanosecond precision, the result of
/// subtracting two [`Timestamp`]s.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct SignedDuration {
    negative: bool,
    secs: i64,
    nanos: u32,
}

impl Sub for Timestamp {
    type Output = SignedDuration;

    fn sub(self, rhs: Timestamp) -> SignedDuration {
        let lhs_ns = self.secs as i128 * 1_000_000_000 + self.nanos as i128;
        let rhs_ns = rhs.secs as i128 * 1_000_000_000 + rhs.nanos as i128;
        let mut diff = lhs_ns - rhs_ns;
        let negative = diff < 0;
        if negative {
            diff = -diff;
        }
        SignedDuration {
            negative,
            secs: (diff / 1_000_000_000) as i64,
            nanos: (diff % 1_000_000_000) as u32,
        }
    }
}

impl fmt::Display for SignedDuration {
    /// Formats like `%.9f` from the original: a sign, whole seconds, a
    /// decimal point, and exactly nine fractional digits.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.negative {
            write!(f, "-")?;
        }
        write!(f, "{}.{:09}", self.secs, self.nanos)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fifty_millis_formats_exactly() {
        let a = Timestamp::from_micros(1_000, 0);
        let b = Timestamp::from_micros(1_000, 50_000);
        assert_eq!(format!("{}", b - a), "0.050000000");
        assert_eq!(format!("{}", a - b), "-0.050000000");
    }

    #[test]
    fn large_epoch_seconds_stay_exact() {
        // f64 cannot represent this many significant digits; i128
        // nanosecond arithmetic can.
        let a = Timestamp::from_nanos(1_753_000_000, 1);
        let b = Timestamp::from_nanos(1_753_000_000, 2);
        assert_eq!(format!("{}", b - a), "0.000000001");
    }

    #[test]
    fn window_elapsed_check_is_monotone() {
        let a = Timestamp::from_micros(10, 0);
        let b = Timestamp::from_micros(10, 200_000);
        assert!((b.diff_secs_f64(&a) - 0.2).abs() < 1e-9);
    }
}
