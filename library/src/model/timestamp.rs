//! Logical clock used to decide staleness.

use std::sync::atomic::{AtomicU64, Ordering};

static CLOCK: AtomicU64 = AtomicU64::new(0);

/// A monotonically increasing marker. Not wall-clock time.
///
/// Values are only comparable within one process run. [`Timestamp::INVALID`]
/// orders before every timestamp returned by [`Timestamp::now`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp(u64);

impl Timestamp {
    pub const INVALID: Timestamp = Timestamp(0);

    /// Issue a timestamp strictly greater than any previously issued one.
    pub fn now() -> Self {
        Timestamp(CLOCK.fetch_add(1, Ordering::Relaxed) + 1)
    }

    pub fn is_valid(self) -> bool {
        self != Self::INVALID
    }

    pub fn value(self) -> u64 {
        self.0
    }

    /// True when something stamped `other` is newer than what `self` observed.
    pub fn is_older_than(self, other: Timestamp) -> bool {
        self < other
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_now_is_strictly_increasing() {
        let a = Timestamp::now();
        let b = Timestamp::now();
        assert!(a < b);
        assert!(Timestamp::INVALID < a);
        assert!(!Timestamp::INVALID.is_valid());
        assert!(a.is_older_than(b));
        assert!(!b.is_older_than(b));
    }
}
