//! Per-file summary and point enumeration
//!
//! Thin uses of the GPX decoder: a one-pass summary (earliest timestamp,
//! latest timestamp, timestamped-point count) and a callback-driven
//! enumeration that yields each decoded point in document order with bounded
//! memory.

use std::fmt;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use time::OffsetDateTime;

use crate::gpx::{GpxParser, GpxVisitor, TrackPoint};
use crate::timeindex::{TimeInterval, format_instant};
use crate::{Error, Result};

/// Temporal summary of one GPX stream.
///
/// `count` covers only points that carried a timestamp; `start` and `stop`
/// are the earliest and latest of those.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackSummary {
    pub start: OffsetDateTime,
    pub stop: OffsetDateTime,
    pub count: usize,
}

impl TrackSummary {
    /// The `[start, stop]` interval covered by the stream.
    #[inline]
    pub fn interval(&self) -> TimeInterval {
        TimeInterval::new(self.start, self.stop)
    }
}

impl fmt::Display for TrackSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "TrackSummary<START=[{}] STOP=[{}] COUNT=({})>",
            format_instant(self.start),
            format_instant(self.stop),
            self.count
        )
    }
}

/// Summarise a GPX stream in a single pass.
///
/// Points without a timestamp do not contribute to the summary. A stream
/// with no points at all fails with [`Error::EmptyFile`]; a stream whose
/// points all lack timestamps fails with [`Error::NoTimestamps`].
#[cfg_attr(feature = "profiling", profiling::function)]
pub fn summarize<R: BufRead>(reader: R) -> Result<TrackSummary> {
    let mut start: Option<OffsetDateTime> = None;
    let mut stop: Option<OffsetDateTime> = None;
    let mut count = 0usize;
    let mut untimed = false;

    enumerate_track_points(reader, |point| {
        let Some(t) = point.time else {
            untimed = true;
            return Ok(());
        };

        count += 1;
        if start.is_none_or(|s| t < s) {
            start = Some(t);
        }
        if stop.is_none_or(|s| t > s) {
            stop = Some(t);
        }
        Ok(())
    })?;

    match (start, stop) {
        (Some(start), Some(stop)) => Ok(TrackSummary { start, stop, count }),
        _ if untimed => Err(Error::NoTimestamps),
        _ => Err(Error::EmptyFile),
    }
}

/// Summarise a GPX file on disk.
pub fn summarize_file<P: AsRef<Path>>(path: P) -> Result<TrackSummary> {
    let file = File::open(path)?;
    summarize(BufReader::new(file))
}

/// Invoke `callback` once per decoded track point, in document order.
///
/// Memory stays bounded regardless of stream size. The callback may abort
/// the enumeration by returning an error, which propagates out.
#[cfg_attr(feature = "profiling", profiling::function)]
pub fn enumerate_track_points<R, F>(reader: R, callback: F) -> Result<()>
where
    R: BufRead,
    F: FnMut(&TrackPoint) -> Result<()>,
{
    let mut parser = GpxParser::new(reader, PointCallback { callback });
    parser.parse()
}

/// Decode every track point of a stream into a vector.
pub fn collect_track_points<R: BufRead>(reader: R) -> Result<Vec<TrackPoint>> {
    let mut points = Vec::new();
    enumerate_track_points(reader, |point| {
        points.push(point.clone());
        Ok(())
    })?;
    Ok(points)
}

/// Adapter turning a point callback into a [`GpxVisitor`].
struct PointCallback<F> {
    callback: F,
}

impl<F: FnMut(&TrackPoint) -> Result<()>> GpxVisitor for PointCallback<F> {
    fn track_point_close(&mut self, point: &TrackPoint) -> Result<()> {
        (self.callback)(point)
    }
}
