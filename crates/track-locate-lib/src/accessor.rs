//! Track data accessors
//!
//! An accessor resolves an opaque label to a fresh readable byte stream.
//! The index never touches the filesystem directly; everything flows
//! through this seam, which keeps the index testable against in-memory
//! fixtures. Streams are closed by dropping them.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader, Cursor};

use crate::{Error, Result};

/// Resolves a label to a readable byte stream.
///
/// Every call must return an independent stream positioned at the start of
/// the data; the index re-opens files on every load.
pub trait TrackDataAccessor {
    fn open(&self, label: &str) -> Result<Box<dyn BufRead>>;
}

/// Filesystem-backed accessor; the label is a file path.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileDataAccessor;

impl TrackDataAccessor for FileDataAccessor {
    fn open(&self, label: &str) -> Result<Box<dyn BufRead>> {
        let file = File::open(label)?;
        Ok(Box::new(BufReader::new(file)))
    }
}

/// In-memory accessor mapping pre-registered labels to byte contents.
#[derive(Debug, Clone, Default)]
pub struct BufferedDataAccessor {
    sources: HashMap<String, Vec<u8>>,
}

impl BufferedDataAccessor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `data` under `label`. Fails if the label is already present.
    pub fn add(&mut self, label: &str, data: impl Into<Vec<u8>>) -> Result<()> {
        if self.sources.contains_key(label) {
            return Err(Error::AlreadyAdded(label.to_string()));
        }
        self.sources.insert(label.to_string(), data.into());
        Ok(())
    }
}

impl TrackDataAccessor for BufferedDataAccessor {
    fn open(&self, label: &str) -> Result<Box<dyn BufRead>> {
        let data = self
            .sources
            .get(label)
            .ok_or_else(|| Error::UnknownLabel(label.to_string()))?;
        Ok(Box::new(Cursor::new(data.clone())))
    }
}
