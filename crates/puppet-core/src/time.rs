use std::fmt;
use std::ops::Sub;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// TimeStamp
// ---------------------------------------------------------------------------

/// Integer-nanosecond timestamp.
///
/// Avoids floating-point accumulation errors by tracking time as a
/// monotonically increasing `u64` nanosecond count. A count of zero is the
/// null timestamp: it marks state that has never been updated, and is the
/// sole trigger of the `NotUpdated` error kind.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct TimeStamp {
    nanos: u64,
}

impl TimeStamp {
    /// The null timestamp ("never updated").
    #[must_use]
    pub const fn null() -> Self {
        Self { nanos: 0 }
    }

    /// Create a timestamp from a raw nanosecond count.
    #[must_use]
    pub const fn from_nanos(nanos: u64) -> Self {
        Self { nanos }
    }

    /// Create a timestamp from seconds (as `f64`).
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn from_secs(secs: f64) -> Self {
        Self {
            nanos: (secs * 1_000_000_000.0) as u64,
        }
    }

    /// Current wall-clock time.
    #[must_use]
    pub fn now() -> Self {
        let since_epoch = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::ZERO);
        Self {
            // Saturates in the year 2554.
            nanos: u64::try_from(since_epoch.as_nanos()).unwrap_or(u64::MAX),
        }
    }

    /// Whether this is the null timestamp.
    #[must_use]
    pub const fn is_null(&self) -> bool {
        self.nanos == 0
    }

    /// Raw nanosecond count.
    #[must_use]
    pub const fn nanos(&self) -> u64 {
        self.nanos
    }

    /// Elapsed seconds as `f64`.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn secs_f64(&self) -> f64 {
        self.nanos as f64 / 1_000_000_000.0
    }
}

impl Sub for TimeStamp {
    type Output = Duration;

    /// Saturating difference between two timestamps.
    fn sub(self, rhs: Self) -> Duration {
        Duration::from_nanos(self.nanos.saturating_sub(rhs.nanos))
    }
}

impl fmt::Display for TimeStamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            write!(f, "null")
        } else {
            write!(f, "{:.9}s", self.secs_f64())
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_is_default() {
        assert!(TimeStamp::default().is_null());
        assert!(TimeStamp::null().is_null());
        assert!(!TimeStamp::from_secs(1.0).is_null());
    }

    #[test]
    fn from_secs_roundtrip() {
        let t = TimeStamp::from_secs(1.5);
        assert_eq!(t.nanos(), 1_500_000_000);
        approx::assert_relative_eq!(t.secs_f64(), 1.5, epsilon = 1e-12);
    }

    #[test]
    fn ordering_is_by_nanos() {
        assert!(TimeStamp::from_secs(1.0) < TimeStamp::from_secs(2.0));
        assert!(TimeStamp::null() < TimeStamp::from_nanos(1));
    }

    #[test]
    fn subtraction_saturates() {
        let a = TimeStamp::from_secs(1.0);
        let b = TimeStamp::from_secs(3.0);
        assert_eq!(b - a, Duration::from_secs(2));
        assert_eq!(a - b, Duration::ZERO);
    }

    #[test]
    fn now_is_not_null() {
        assert!(!TimeStamp::now().is_null());
    }

    #[test]
    fn display_formats() {
        assert_eq!(TimeStamp::null().to_string(), "null");
        assert_eq!(TimeStamp::from_secs(2.0).to_string(), "2.000000000s");
    }
}
