//! Estimated traces.
//!
//! A [`ProcessedTrace`] couples a [`TraceReader`] with an [`Estimator`] so
//! the curve-fitting code sees only `(arrival_ns, work)` pairs.

use crate::{Estimator, Result, TraceReader};
use std::path::Path;

/// One trace record with its size mapped to work units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProcessedEntry {
    /// Arrival time in nanoseconds from the start of the trace.
    pub arrival_ns: u64,
    /// Estimated work for this request.
    pub work: f64,
    /// Whether this was a read request.
    pub is_read: bool,
}

/// A trace viewed through a work estimator.
pub struct ProcessedTrace {
    reader: TraceReader,
    estimator: Estimator,
}

impl ProcessedTrace {
    /// Opens a trace file with the given estimator.
    pub fn open(path: impl AsRef<Path>, estimator: Estimator) -> Result<Self> {
        Ok(Self {
            reader: TraceReader::open(path)?,
            estimator,
        })
    }

    /// Wraps an already-open reader.
    pub fn new(reader: TraceReader, estimator: Estimator) -> Self {
        Self { reader, estimator }
    }

    /// Path of the underlying trace file.
    pub fn path(&self) -> &std::path::Path {
        self.reader.path()
    }

    /// Returns the next estimated record, or `None` at end of trace.
    pub fn next_entry(&mut self) -> Result<Option<ProcessedEntry>> {
        let Some(entry) = self.reader.next_entry()? else {
            return Ok(None);
        };
        let work = self
            .estimator
            .estimate_work(entry.request_size, entry.is_read)?;
        Ok(Some(ProcessedEntry {
            arrival_ns: entry.arrival_ns,
            work,
            is_read: entry.is_read,
        }))
    }

    /// Rewinds to the start of the trace.
    pub fn reset(&mut self) -> Result<()> {
        self.reader.reset()
    }
}
