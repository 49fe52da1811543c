use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Causal relationship between two vector clocks.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClockOrdering {
    /// Every entry of the left clock is `<=` the right one, at least one `<`.
    Before,
    /// Every entry of the left clock is `>=` the right one, at least one `>`.
    After,
    /// Neither clock dominates the other.
    Concurrent,
    /// All entries are equal.
    Equal,
}

impl ClockOrdering {
    /// The ordering seen from the other side of the comparison.
    pub fn reverse(self) -> Self {
        match self {
            Self::Before => Self::After,
            Self::After => Self::Before,
            other => other,
        }
    }

    /// Returns `true` if the left clock causally follows the right one.
    pub fn is_after(self) -> bool {
        matches!(self, Self::After)
    }

    /// Returns `true` if neither side dominates.
    pub fn is_concurrent(self) -> bool {
        matches!(self, Self::Concurrent)
    }
}

impl fmt::Display for ClockOrdering {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Before => write!(f, "BEFORE"),
            Self::After => write!(f, "AFTER"),
            Self::Concurrent => write!(f, "CONCURRENT"),
            Self::Equal => write!(f, "EQUAL"),
        }
    }
}

/// Per-contributor logical clock for a single entity.
///
/// Entries that are absent are treated as `0`, so a clock with an explicit
/// zero entry compares [`ClockOrdering::Equal`] to one without it. Counters
/// only move forward: [`increment`] bumps one contributor, [`merge`] takes
/// the entrywise maximum.
///
/// [`increment`]: VectorClock::increment
/// [`merge`]: VectorClock::merge
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VectorClock {
    entries: BTreeMap<String, u64>,
}

impl VectorClock {
    /// Create an empty clock.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a clock from explicit `(contributor, counter)` pairs.
    pub fn from_entries<I, K>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, u64)>,
        K: Into<String>,
    {
        let mut clock = Self::new();
        for (contributor, counter) in entries {
            let slot = clock.entries.entry(contributor.into()).or_insert(0);
            *slot = (*slot).max(counter);
        }
        clock
    }

    /// Counter for a contributor; missing entries read as `0`.
    pub fn get(&self, contributor: &str) -> u64 {
        self.entries.get(contributor).copied().unwrap_or(0)
    }

    /// Returns `true` if no contributor has a non-zero counter.
    pub fn is_empty(&self) -> bool {
        self.entries.values().all(|&c| c == 0)
    }

    /// Iterate `(contributor, counter)` pairs in contributor order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, u64)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), *v))
    }

    /// Sum of all counters; the number of recorded edits.
    pub fn total(&self) -> u64 {
        self.entries.values().sum()
    }

    /// Advance `contributor`'s counter by one and return the new value.
    pub fn increment(&mut self, contributor: &str) -> u64 {
        let slot = self.entries.entry(contributor.to_string()).or_insert(0);
        *slot += 1;
        *slot
    }

    /// Compare `self` against `other`.
    pub fn compare(&self, other: &Self) -> ClockOrdering {
        let mut less = false;
        let mut greater = false;

        let keys = self.entries.keys().chain(other.entries.keys());
        for key in keys {
            match self.get(key).cmp(&other.get(key)) {
                Ordering::Less => less = true,
                Ordering::Greater => greater = true,
                Ordering::Equal => {}
            }
            if less && greater {
                return ClockOrdering::Concurrent;
            }
        }

        match (less, greater) {
            (false, false) => ClockOrdering::Equal,
            (true, false) => ClockOrdering::Before,
            (false, true) => ClockOrdering::After,
            (true, true) => ClockOrdering::Concurrent,
        }
    }

    /// Fold `other` into `self` by taking the entrywise maximum.
    pub fn merge(&mut self, other: &Self) {
        for (contributor, &counter) in &other.entries {
            let slot = self.entries.entry(contributor.clone()).or_insert(0);
            *slot = (*slot).max(counter);
        }
    }

    /// Entrywise maximum of `self` and `other` as a new clock.
    pub fn merged(&self, other: &Self) -> Self {
        let mut out = self.clone();
        out.merge(other);
        out
    }

    /// Returns `true` if every entry of `self` is `>=` the entry in `other`.
    pub fn dominates(&self, other: &Self) -> bool {
        matches!(
            self.compare(other),
            ClockOrdering::After | ClockOrdering::Equal
        )
    }
}

impl fmt::Display for VectorClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, (contributor, counter)) in self.entries.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{contributor}:{counter}")?;
        }
        write!(f, "}}")
    }
}

impl<K: Into<String>> FromIterator<(K, u64)> for VectorClock {
    fn from_iter<T: IntoIterator<Item = (K, u64)>>(iter: T) -> Self {
        Self::from_entries(iter)
    }
}
