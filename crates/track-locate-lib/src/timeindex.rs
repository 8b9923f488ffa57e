//! Time interval and instant containers
//!
//! This module provides the sorted containers backing the temporal index:
//! `TimeIntervalSlice` answers "which files could contain this instant?" and
//! `TimeSlice` answers "which stored instants fall within the tolerance
//! window?". Both keep their elements in a contiguous sorted `Vec` and use
//! binary search for insertion and lookup.

use std::fmt;

use time::format_description::well_known::Rfc3339;
use time::{Duration, OffsetDateTime};

use crate::{Error, Result};

/// Render an instant as RFC-3339, falling back to the debug form for
/// instants outside the formattable range.
pub fn format_instant(t: OffsetDateTime) -> String {
    t.format(&Rfc3339).unwrap_or_else(|_| format!("{t:?}"))
}

/// Parse an RFC-3339 instant, with optional fractional seconds up to
/// nanosecond resolution.
pub fn parse_instant(raw: &str) -> Result<OffsetDateTime> {
    OffsetDateTime::parse(raw, &Rfc3339).map_err(|_| Error::InvalidTimestamp(raw.to_string()))
}

/// An inclusive `[start, stop]` pair of instants with `start <= stop`.
///
/// Equality is structural; ordering is lexicographic on `(start, stop)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimeInterval {
    /// Earliest instant covered by the interval
    pub start: OffsetDateTime,
    /// Latest instant covered by the interval
    pub stop: OffsetDateTime,
}

impl TimeInterval {
    /// Create an interval. `start` must not be after `stop`.
    pub fn new(start: OffsetDateTime, stop: OffsetDateTime) -> Self {
        debug_assert!(start <= stop, "interval start must not be after stop");
        Self { start, stop }
    }

    /// Whether `t` lies within the interval, endpoints included.
    #[inline]
    pub fn contains(&self, t: OffsetDateTime) -> bool {
        self.start <= t && t <= self.stop
    }

    /// Length of the interval.
    #[inline]
    pub fn span(&self) -> Duration {
        self.stop - self.start
    }
}

impl fmt::Display for TimeInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{} .. {}]",
            format_instant(self.start),
            format_instant(self.stop)
        )
    }
}

/// An ordered sequence of intervals, sorted by `(start, stop)`.
///
/// Insertion keeps the order and is idempotent for equal intervals, so two
/// files covering the identical range occupy one slot.
#[derive(Debug, Clone, Default)]
pub struct TimeIntervalSlice {
    intervals: Vec<TimeInterval>,
}

#[cfg_attr(feature = "profiling", profiling::all_functions)]
impl TimeIntervalSlice {
    /// Create an empty slice
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `interval` at its sorted position; duplicates are dropped.
    pub fn add(&mut self, interval: TimeInterval) {
        if let Err(pos) = self.intervals.binary_search(&interval) {
            self.intervals.insert(pos, interval);
        }
    }

    /// Invoke `f` for every stored interval containing `q`, in ascending
    /// `(start, stop)` order. The callback may abort the enumeration by
    /// returning an error, which propagates out.
    ///
    /// Starts are sorted but stops are not monotonic, so every interval
    /// whose start is at or before `q` is a candidate.
    pub fn search<F>(&self, q: OffsetDateTime, mut f: F) -> Result<()>
    where
        F: FnMut(&TimeInterval) -> Result<()>,
    {
        let upper = self.intervals.partition_point(|iv| iv.start <= q);
        for interval in &self.intervals[..upper] {
            if interval.stop >= q {
                f(interval)?;
            }
        }
        Ok(())
    }

    /// Number of stored intervals
    #[inline]
    pub fn len(&self) -> usize {
        self.intervals.len()
    }

    /// Whether no intervals are stored
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.intervals.is_empty()
    }

    /// The stored intervals in sorted order
    #[inline]
    pub fn as_slice(&self) -> &[TimeInterval] {
        &self.intervals
    }
}

/// An ordered sequence of instants, sorted ascending and deduplicated.
#[derive(Debug, Clone, Default)]
pub struct TimeSlice {
    times: Vec<OffsetDateTime>,
}

#[cfg_attr(feature = "profiling", profiling::all_functions)]
impl TimeSlice {
    /// Create an empty slice
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `t` at its sorted position; an instant already present is
    /// dropped.
    pub fn add(&mut self, t: OffsetDateTime) {
        if let Err(pos) = self.times.binary_search(&t) {
            self.times.insert(pos, t);
        }
    }

    /// Invoke `f` for every stored instant `t` with `|t - q| <= tolerance`,
    /// in ascending order of `t`. The callback may abort the enumeration by
    /// returning an error, which propagates out.
    pub fn search_nearest<F>(&self, q: OffsetDateTime, tolerance: Duration, mut f: F) -> Result<()>
    where
        F: FnMut(OffsetDateTime) -> Result<()>,
    {
        let earliest = q - tolerance;
        let latest = q + tolerance;

        let from = self.times.partition_point(|t| *t < earliest);
        for &t in &self.times[from..] {
            if t > latest {
                break;
            }
            f(t)?;
        }
        Ok(())
    }

    /// Number of stored instants
    #[inline]
    pub fn len(&self) -> usize {
        self.times.len()
    }

    /// Whether no instants are stored
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    /// The stored instants in ascending order
    #[inline]
    pub fn as_slice(&self) -> &[OffsetDateTime] {
        &self.times
    }
}
