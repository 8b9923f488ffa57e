//! Track Locate Library - Temporal Indexing for GPX Track Files
//!
//! This library answers "where was the tracked object at a given moment?"
//! against a potentially large collection of GPX track files. Files are
//! registered by label and summarised in one streaming pass; their point
//! data is loaded lazily at query time and evicted under an LRU budget, so
//! memory stays bounded no matter how many files are indexed.
//!
//! # Architecture
//!
//! - **[`XmlParser`]**: streaming XML events with a path-aware node stack
//! - **[`GpxParser`]**: GPX dialect decoder emitting balanced open/close events
//! - **[`summarize`] / [`enumerate_track_points`]**: one-pass per-file digests
//! - **[`GpxIndex`]**: temporal multi-file index with on-demand LRU loading
//! - **[`GpxWriter`]**: indented GPX 1.1 emission
//!
//! # Performance Characteristics
//!
//! - **Decode**: single forward pass, bounded memory regardless of file size
//! - **Query**: O(log N) interval pruning, then loads only overlapping files
//! - **Memory**: resident point data capped by the configured loaded-files limit

mod accessor;
mod gpx;
mod index;
mod summary;
mod timeindex;
mod writer;
mod xml;

// Public API exports
pub use accessor::{BufferedDataAccessor, FileDataAccessor, TrackDataAccessor};
pub use gpx::{Gpx, GpxParser, GpxVisitor, Track, TrackPoint, TrackSegment};
pub use index::{FileInfo, GpxIndex, IndexHit};
pub use summary::{
    TrackSummary, collect_track_points, enumerate_track_points, summarize, summarize_file,
};
pub use timeindex::{
    TimeInterval, TimeIntervalSlice, TimeSlice, format_instant, parse_instant,
};
pub use writer::GpxWriter;
pub use xml::{NodeStack, XmlContext, XmlParser, XmlPart, XmlVisitor};

/// Error types for decoding, registration and lookup
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("file already added: [{0}]")]
    AlreadyAdded(String),

    #[error("file empty")]
    EmptyFile,

    #[error("no points had timestamps")]
    NoTimestamps,

    #[error("not found")]
    NotFound,

    #[error("label not found: [{0}]")]
    UnknownLabel(String),

    #[error("XML decode error: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("malformed attribute: {0}")]
    Attr(#[from] quick_xml::events::attributes::AttrError),

    #[error("invalid numeric literal: [{0}]")]
    InvalidNumber(String),

    #[error("invalid timestamp: [{0}]")]
    InvalidTimestamp(String),

    #[error("visitor failed: {0}")]
    Visitor(String),

    #[error("index inconsistency: {0}")]
    Inconsistency(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
