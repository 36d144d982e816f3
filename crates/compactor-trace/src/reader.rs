//! Raw trace file parsing.
//!
//! Trace files are CSV with one request per line:
//! `<arrival_ns_decimal>,<size_hex>,<DiskRead|DiskWrite>`.

use crate::{Result, TraceError};
use std::fs::File;
use std::io::{BufRead, BufReader, Seek, SeekFrom};
use std::path::{Path, PathBuf};

/// One raw trace record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TraceEntry {
    /// Arrival time in nanoseconds from the start of the trace.
    pub arrival_ns: u64,
    /// Request size in bytes.
    pub request_size: u32,
    /// Whether this is a read request.
    pub is_read: bool,
}

/// Streaming reader over a trace file.
///
/// Entries are yielded in file order; [`TraceReader::reset`] rewinds to the
/// beginning so the same trace can be swept multiple times without
/// re-opening it.
pub struct TraceReader {
    path: PathBuf,
    file: BufReader<File>,
    line: usize,
}

impl TraceReader {
    /// Opens a trace file.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path).map_err(|source| TraceError::Io {
            path: path.clone(),
            source,
        })?;
        Ok(Self {
            path,
            file: BufReader::new(file),
            line: 0,
        })
    }

    /// Path of the underlying trace file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the next record, or `None` at end of trace.
    ///
    /// Blank lines are skipped; anything else that fails to parse is an
    /// error rather than being dropped on the floor.
    pub fn next_entry(&mut self) -> Result<Option<TraceEntry>> {
        let mut text = String::new();
        loop {
            text.clear();
            let n = self.file.read_line(&mut text).map_err(|source| TraceError::Io {
                path: self.path.clone(),
                source,
            })?;
            if n == 0 {
                return Ok(None);
            }
            self.line += 1;
            let trimmed = text.trim();
            if trimmed.is_empty() {
                continue;
            }
            return self.parse_line(trimmed).map(Some);
        }
    }

    /// Rewinds the reader to the start of the trace.
    pub fn reset(&mut self) -> Result<()> {
        self.file
            .seek(SeekFrom::Start(0))
            .map_err(|source| TraceError::Io {
                path: self.path.clone(),
                source,
            })?;
        self.line = 0;
        Ok(())
    }

    fn parse_line(&self, text: &str) -> Result<TraceEntry> {
        let malformed = || TraceError::MalformedRecord {
            path: self.path.clone(),
            line: self.line,
            text: text.to_string(),
        };
        let mut fields = text.split(',');
        let arrival = fields.next().ok_or_else(malformed)?.trim();
        let size = fields.next().ok_or_else(malformed)?.trim();
        let op = fields.next().ok_or_else(malformed)?.trim();
        if fields.next().is_some() {
            return Err(malformed());
        }
        let arrival_ns: u64 = arrival.parse().map_err(|_| malformed())?;
        let size = size.strip_prefix("0x").unwrap_or(size);
        let request_size = u32::from_str_radix(size, 16).map_err(|_| malformed())?;
        let is_read = match op {
            "DiskRead" => true,
            "DiskWrite" => false,
            _ => return Err(malformed()),
        };
        Ok(TraceEntry {
            arrival_ns,
            request_size,
            is_read,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_trace(lines: &str) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(lines.as_bytes()).unwrap();
        f.flush().unwrap();
        f
    }

    #[test]
    fn test_read_and_reset() {
        let f = write_trace("0,400,DiskRead\n1000,0,DiskWrite\n10000,1000,DiskRead\n20000,200,DiskWrite\n");
        let mut reader = TraceReader::open(f.path()).unwrap();
        for _ in 0..3 {
            let e = reader.next_entry().unwrap().unwrap();
            assert_eq!(e.arrival_ns, 0);
            assert_eq!(e.request_size, 1024);
            assert!(e.is_read);
            let e = reader.next_entry().unwrap().unwrap();
            assert_eq!(e.arrival_ns, 1000);
            assert_eq!(e.request_size, 0);
            assert!(!e.is_read);
            let e = reader.next_entry().unwrap().unwrap();
            assert_eq!(e.arrival_ns, 10000);
            assert_eq!(e.request_size, 4096);
            assert!(e.is_read);
            let e = reader.next_entry().unwrap().unwrap();
            assert_eq!(e.arrival_ns, 20000);
            assert_eq!(e.request_size, 512);
            assert!(!e.is_read);
            assert!(reader.next_entry().unwrap().is_none());
            reader.reset().unwrap();
        }
    }

    #[test]
    fn test_hex_prefix_accepted() {
        let f = write_trace("5,0x400,DiskRead\n");
        let mut reader = TraceReader::open(f.path()).unwrap();
        let e = reader.next_entry().unwrap().unwrap();
        assert_eq!(e.request_size, 1024);
    }

    #[test]
    fn test_blank_lines_skipped() {
        let f = write_trace("\n0,1,DiskRead\n\n1,2,DiskWrite\n\n");
        let mut reader = TraceReader::open(f.path()).unwrap();
        assert!(reader.next_entry().unwrap().is_some());
        assert!(reader.next_entry().unwrap().is_some());
        assert!(reader.next_entry().unwrap().is_none());
    }

    #[test]
    fn test_malformed_line_rejected() {
        let f = write_trace("0,400\n");
        let mut reader = TraceReader::open(f.path()).unwrap();
        assert!(matches!(
            reader.next_entry(),
            Err(TraceError::MalformedRecord { line: 1, .. })
        ));

        let f = write_trace("0,400,DiskErase\n");
        let mut reader = TraceReader::open(f.path()).unwrap();
        assert!(reader.next_entry().is_err());
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(
            TraceReader::open("/nonexistent/trace.csv"),
            Err(TraceError::Io { .. })
        ));
    }
}
