use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Wall-clock milliseconds since the UNIX epoch.
///
/// Wall-clock time is only used for ordering *within* the `timestamp` merge
/// strategy, staleness checks and audit records. Causality is always decided
/// by vector clocks.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(u64);

impl Timestamp {
    /// Create a timestamp from explicit milliseconds.
    pub const fn from_millis(ms: u64) -> Self {
        Self(ms)
    }

    /// The zero timestamp.
    pub const fn zero() -> Self {
        Self(0)
    }

    /// The current wall-clock time.
    pub fn now() -> Self {
        let ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;
        Self(ms)
    }

    /// Milliseconds since the UNIX epoch.
    pub fn as_millis(&self) -> u64 {
        self.0
    }

    /// This timestamp shifted forward by `duration`, saturating at `u64::MAX`.
    pub fn saturating_add(&self, duration: Duration) -> Self {
        let ms = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
        Self(self.0.saturating_add(ms))
    }

    /// Time elapsed from `earlier` to `self`; zero if `earlier` is later.
    pub fn since(&self, earlier: Timestamp) -> Duration {
        Duration::from_millis(self.0.saturating_sub(earlier.0))
    }
}

impl fmt::Debug for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Timestamp({}ms)", self.0)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Source of wall-clock time for request handlers.
pub trait TimeSource: Send + Sync {
    /// The current time.
    fn now(&self) -> Timestamp;
}

/// [`TimeSource`] backed by the system clock.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemTimeSource;

impl TimeSource for SystemTimeSource {
    fn now(&self) -> Timestamp {
        Timestamp::now()
    }
}

/// Manually driven [`TimeSource`] for tests and deterministic replays.
#[derive(Debug, Default)]
pub struct ManualTimeSource {
    ms: AtomicU64,
}

impl ManualTimeSource {
    /// Create a source frozen at `start`.
    pub fn new(start: Timestamp) -> Self {
        Self {
            ms: AtomicU64::new(start.as_millis()),
        }
    }

    /// Jump to an absolute time.
    pub fn set(&self, at: Timestamp) {
        self.ms.store(at.as_millis(), Ordering::SeqCst);
    }

    /// Move forward by `by` and return the new time.
    pub fn advance(&self, by: Duration) -> Timestamp {
        let ms = u64::try_from(by.as_millis()).unwrap_or(u64::MAX);
        let prev = self.ms.fetch_add(ms, Ordering::SeqCst);
        Timestamp::from_millis(prev.saturating_add(ms))
    }
}

impl TimeSource for ManualTimeSource {
    fn now(&self) -> Timestamp {
        Timestamp::from_millis(self.ms.load(Ordering::SeqCst))
    }
}
