//! Temporal multi-file index
//!
//! Registers GPX files by label, derives each file's covered time interval
//! with a single summary pass, and answers "where was the tracked object at
//! time T?" by loading per-file point indexes on demand under an LRU budget.
//!
//! A query walks the interval slice for files whose range contains the
//! query instant, loads only those files (possibly evicting the
//! least-recently-used resident file), and merges the per-file nearest-time
//! matches into one sorted result set.

use std::collections::HashMap;
use std::fmt;
use std::num::NonZeroUsize;

use geo::Point;
use lru::LruCache;
use time::{Duration, OffsetDateTime};

use crate::accessor::TrackDataAccessor;
use crate::summary::{enumerate_track_points, summarize};
use crate::timeindex::{TimeInterval, TimeIntervalSlice, TimeSlice, format_instant};
use crate::{Error, Result};

/// One registered GPX file.
///
/// The point data is resident only while `is_loaded` reports true; eviction
/// releases it so memory stays bounded by the configured cap.
#[derive(Debug)]
pub struct FileInfo {
    label: String,
    interval: TimeInterval,
    count: usize,
    data: Option<PointData>,
}

impl FileInfo {
    /// The label as given at registration
    #[inline]
    pub fn label(&self) -> &str {
        &self.label
    }

    /// The `[start, stop]` interval covered by the file
    #[inline]
    pub fn interval(&self) -> TimeInterval {
        self.interval
    }

    /// Number of timestamped points in the file
    #[inline]
    pub fn count(&self) -> usize {
        self.count
    }

    /// Whether the point data is currently resident
    #[inline]
    pub fn is_loaded(&self) -> bool {
        self.data.is_some()
    }
}

/// Resident point data for one file: the sorted instants and the instant to
/// location mapping.
#[derive(Debug)]
struct PointData {
    times: TimeSlice,
    points: HashMap<OffsetDateTime, Point<f64>>,
}

/// A single search match.
///
/// `point` follows the geographic x/y convention: x is longitude, y is
/// latitude.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexHit {
    pub time: OffsetDateTime,
    pub point: Point<f64>,
    pub label: String,
}

impl fmt::Display for IndexHit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "MATCH: [{}] ({:.6}, {:.6}) IN [{}]",
            format_instant(self.time),
            self.point.y(),
            self.point.x(),
            self.label
        )
    }
}

/// Temporal index over a collection of GPX files.
///
/// Labels are matched case-insensitively; the accessor always receives the
/// label exactly as given at registration.
pub struct GpxIndex<A: TrackDataAccessor> {
    accessor: A,
    /// Sorted intervals of every registered file
    file_times: TimeIntervalSlice,
    /// Folded labels of the files sharing each interval
    files: HashMap<TimeInterval, Vec<String>>,
    /// All registered files, keyed by folded label
    members: HashMap<String, FileInfo>,
    tolerance: Duration,
    max_loaded_files: usize,
    /// Present only when `max_loaded_files > 0`; keys are folded labels
    lru: Option<LruCache<String, ()>>,
}

#[cfg_attr(feature = "profiling", profiling::all_functions)]
impl<A: TrackDataAccessor> GpxIndex<A> {
    /// Create an index.
    ///
    /// `tolerance` is the symmetric window within which a stored instant
    /// matches a query. `max_loaded_files` caps how many files keep their
    /// point data resident at once; zero means unlimited with no LRU
    /// maintained.
    pub fn new(accessor: A, tolerance: Duration, max_loaded_files: usize) -> Self {
        Self {
            accessor,
            file_times: TimeIntervalSlice::new(),
            files: HashMap::new(),
            members: HashMap::new(),
            tolerance,
            max_loaded_files,
            lru: NonZeroUsize::new(max_loaded_files).map(LruCache::new),
        }
    }

    /// Register the file behind `label` and return its covered interval.
    ///
    /// Reads the stream once to establish the time range; the points
    /// themselves are loaded lazily by [`GpxIndex::search`]. A failed
    /// registration leaves the index unchanged.
    pub fn add(&mut self, label: &str) -> Result<TimeInterval> {
        #[cfg(feature = "profiling")]
        profiling::scope!("index::add");

        let stream = self.accessor.open(label)?;

        let folded = label.to_lowercase();
        if self.members.contains_key(&folded) {
            return Err(Error::AlreadyAdded(label.to_string()));
        }

        let summary = summarize(stream)?;
        let interval = summary.interval();

        self.file_times.add(interval);
        self.members.insert(
            folded.clone(),
            FileInfo {
                label: label.to_string(),
                interval,
                count: summary.count,
                data: None,
            },
        );
        self.files.entry(interval).or_default().push(folded);

        tracing::debug!(
            "Registered [{}] covering {} with {} points",
            label,
            interval,
            summary.count
        );
        Ok(interval)
    }

    /// Find every indexed point within the tolerance of `t`.
    ///
    /// Hits come back sorted by instant, then by label; an empty result is
    /// success. Fails with [`Error::NotFound`] only when no files are
    /// registered at all.
    pub fn search(&mut self, t: OffsetDateTime) -> Result<Vec<IndexHit>> {
        #[cfg(feature = "profiling")]
        profiling::scope!("index::search");

        if self.file_times.is_empty() {
            return Err(Error::NotFound);
        }

        let mut candidates = Vec::new();
        self.file_times.search(t, |interval| {
            candidates.push(*interval);
            Ok(())
        })?;

        let mut hits: Vec<IndexHit> = Vec::new();
        for interval in candidates {
            self.search_interval(&mut hits, interval, t)?;
        }

        tracing::debug!("Search at {} produced {} hits", format_instant(t), hits.len());
        Ok(hits)
    }

    /// Number of registered files
    #[inline]
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Whether no files are registered
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Whether `label` is registered (case-insensitive)
    pub fn contains(&self, label: &str) -> bool {
        self.members.contains_key(&label.to_lowercase())
    }

    /// Details of a registered file (case-insensitive lookup)
    pub fn file_info(&self, label: &str) -> Option<&FileInfo> {
        self.members.get(&label.to_lowercase())
    }

    /// Folded labels of the files whose point data is currently resident.
    ///
    /// Most-recently-used first when an LRU is maintained; unspecified
    /// order when the cap is zero.
    pub fn loaded_labels(&self) -> Vec<String> {
        match &self.lru {
            Some(lru) => lru.iter().map(|(label, ())| label.clone()).collect(),
            None => self
                .members
                .iter()
                .filter(|(_, info)| info.is_loaded())
                .map(|(folded, _)| folded.clone())
                .collect(),
        }
    }

    /// Search one interval's bucket of files, appending into `hits`.
    fn search_interval(
        &mut self,
        hits: &mut Vec<IndexHit>,
        interval: TimeInterval,
        t: OffsetDateTime,
    ) -> Result<()> {
        let labels = self.files.get(&interval).cloned().unwrap_or_default();
        let tolerance = self.tolerance;

        for folded in labels {
            self.ensure_loaded(&folded)?;

            let info = self.members.get(&folded).ok_or_else(|| {
                Error::Inconsistency(format!("no file info under [{folded}]"))
            })?;
            let data = info.data.as_ref().ok_or_else(|| {
                Error::Inconsistency(format!("file [{folded}] not resident after load"))
            })?;

            data.times.search_nearest(t, tolerance, |found| {
                let point = data.points.get(&found).copied().ok_or_else(|| {
                    Error::Inconsistency(format!(
                        "instant {} indexed but unmapped in [{folded}]",
                        format_instant(found)
                    ))
                })?;
                insert_hit(
                    hits,
                    IndexHit {
                        time: found,
                        point,
                        label: info.label.clone(),
                    },
                );
                Ok(())
            })?;
        }
        Ok(())
    }

    /// Make the file's point data resident, evicting the least-recently-used
    /// file first when the cap is reached.
    fn ensure_loaded(&mut self, folded: &str) -> Result<()> {
        #[cfg(feature = "profiling")]
        profiling::scope!("index::ensure_loaded");

        let loaded = self
            .members
            .get(folded)
            .is_some_and(|info| info.is_loaded());

        if loaded {
            if let Some(lru) = self.lru.as_mut() {
                // Promote to most-recently-used
                if lru.get(folded).is_none() {
                    return Err(Error::Inconsistency(format!(
                        "loaded file missing from LRU: [{folded}]"
                    )));
                }
                return Ok(());
            }
            // No cap configured: a resident file is re-read on every call.
        }

        let victim = match self.lru.as_mut() {
            Some(lru) if lru.len() >= self.max_loaded_files => {
                lru.pop_lru().map(|(label, ())| label)
            }
            _ => None,
        };
        if let Some(victim) = victim {
            let evicted = self.members.get_mut(&victim).ok_or_else(|| {
                Error::Inconsistency(format!("LRU victim has no file info: [{victim}]"))
            })?;
            evicted.data = None;
            tracing::debug!("Evicted [{}] to make room", victim);
        }

        let info = self.members.get(folded).ok_or_else(|| {
            Error::Inconsistency(format!("no file info under [{folded}]"))
        })?;
        let stream = self.accessor.open(&info.label)?;

        // Build the point data aside and commit only on success, so a failed
        // load leaves the file cleanly unloaded.
        let mut data = PointData {
            times: TimeSlice::new(),
            points: HashMap::new(),
        };
        enumerate_track_points(stream, |point| {
            let Some(time) = point.time else {
                return Ok(());
            };
            data.times.add(time);
            data.points
                .insert(time, Point::new(point.longitude, point.latitude));
            Ok(())
        })?;

        tracing::debug!("Loaded [{}] with {} instants", folded, data.times.len());

        let info = self.members.get_mut(folded).ok_or_else(|| {
            Error::Inconsistency(format!("no file info under [{folded}]"))
        })?;
        info.data = Some(data);
        if let Some(lru) = self.lru.as_mut() {
            lru.put(folded.to_string(), ());
        }
        Ok(())
    }
}

/// Insert `hit` at its sorted `(instant, label)` position, dropping exact
/// duplicates.
fn insert_hit(hits: &mut Vec<IndexHit>, hit: IndexHit) {
    let key = (hit.time, hit.label.as_str());
    match hits.binary_search_by(|h| (h.time, h.label.as_str()).cmp(&key)) {
        Ok(_) => {}
        Err(pos) => hits.insert(pos, hit),
    }
}
