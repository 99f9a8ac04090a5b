// src/history/source.rs

//! Read-only access to a package-manager history log
//!
//! The whole log is acquired once as an immutable byte region: plain logs
//! are memory-mapped, gzip-rotated logs (`history.log.1.gz`) are inflated
//! into an owned buffer. The region lives exactly as long as the
//! [`LogSource`], so it is released on every exit path of a run.

use crate::error::{Error, Result};
use flate2::read::GzDecoder;
use memmap2::Mmap;
use std::borrow::Cow;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Gzip magic bytes
const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Backing storage of the log contents
enum Region {
    /// Zero-length file; nothing to map
    Empty,
    Mapped(Mmap),
    Inflated(Vec<u8>),
}

/// An opened history log
pub struct LogSource {
    path: PathBuf,
    region: Region,
}

impl LogSource {
    /// Acquire the full contents of the log at `path`
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if path.as_os_str().is_empty() {
            return Err(Error::LogUnavailable("history path not set".to_string()));
        }

        let file = File::open(path).map_err(|e| {
            Error::LogUnavailable(format!("opening '{}' failed: {}", path.display(), e))
        })?;
        let len = file
            .metadata()
            .map_err(|e| {
                Error::LogUnavailable(format!("reading '{}' failed: {}", path.display(), e))
            })?
            .len();

        let region = if len == 0 {
            Region::Empty
        } else {
            // SAFETY: the map is read-only and the history log is only ever
            // appended to by the package manager while we hold it.
            let mmap = unsafe { Mmap::map(&file) }.map_err(|e| {
                Error::LogUnavailable(format!("mapping '{}' failed: {}", path.display(), e))
            })?;

            if mmap.starts_with(&GZIP_MAGIC) {
                Region::Inflated(Self::inflate(path, &mmap)?)
            } else {
                Region::Mapped(mmap)
            }
        };

        let source = Self {
            path: path.to_path_buf(),
            region,
        };
        debug!(
            "Opened history log {} ({} bytes)",
            source.path.display(),
            source.len()
        );
        Ok(source)
    }

    /// Decompress a gzip-rotated log
    fn inflate(path: &Path, compressed: &[u8]) -> Result<Vec<u8>> {
        let mut content = Vec::new();
        GzDecoder::new(compressed)
            .read_to_end(&mut content)
            .map_err(|e| {
                Error::LogUnavailable(format!(
                    "decompressing '{}' failed: {}",
                    path.display(),
                    e
                ))
            })?;
        Ok(content)
    }

    /// Path the log was opened from
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Raw log contents
    pub fn bytes(&self) -> &[u8] {
        match &self.region {
            Region::Empty => &[],
            Region::Mapped(mmap) => &mmap[..],
            Region::Inflated(buffer) => buffer.as_slice(),
        }
    }

    pub fn len(&self) -> usize {
        self.bytes().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Iterate over the lines of the log, numbered from 1
    pub fn lines(&self) -> Lines<'_> {
        Lines {
            rest: self.bytes(),
            line_no: 0,
        }
    }
}

/// Lazy line iterator over a log region
///
/// Yields `(line_number, line)` with the terminator (`\n` or `\r\n`) removed.
pub struct Lines<'a> {
    rest: &'a [u8],
    line_no: usize,
}

impl<'a> Iterator for Lines<'a> {
    type Item = (usize, Cow<'a, str>);

    fn next(&mut self) -> Option<Self::Item> {
        if self.rest.is_empty() {
            return None;
        }

        let (mut line, rest) = match self.rest.iter().position(|&b| b == b'\n') {
            Some(pos) => (&self.rest[..pos], &self.rest[pos + 1..]),
            None => (self.rest, &self.rest[self.rest.len()..]),
        };
        self.rest = rest;
        self.line_no += 1;

        if let Some(stripped) = line.strip_suffix(b"\r") {
            line = stripped;
        }

        Some((self.line_no, String::from_utf8_lossy(line)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::Compression;
    use flate2::write::GzEncoder;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_log(content: &[u8]) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn test_lines_are_numbered_and_stripped() {
        let file = write_log(b"Start-Date: x\r\n\nEnd-Date: y");
        let source = LogSource::open(file.path()).unwrap();

        let lines: Vec<(usize, String)> = source
            .lines()
            .map(|(n, l)| (n, l.into_owned()))
            .collect();
        assert_eq!(
            lines,
            vec![
                (1, "Start-Date: x".to_string()),
                (2, String::new()),
                (3, "End-Date: y".to_string()),
            ]
        );
    }

    #[test]
    fn test_trailing_newline_adds_no_line() {
        let file = write_log(b"a: 1\nb: 2\n");
        let source = LogSource::open(file.path()).unwrap();
        assert_eq!(source.lines().count(), 2);
    }

    #[test]
    fn test_empty_log() {
        let file = write_log(b"");
        let source = LogSource::open(file.path()).unwrap();
        assert!(source.is_empty());
        assert_eq!(source.lines().count(), 0);
    }

    #[test]
    fn test_gzip_log_is_inflated() {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(b"Start-Date: 2024-01-01  01:00:00\n").unwrap();
        let file = write_log(&encoder.finish().unwrap());

        let source = LogSource::open(file.path()).unwrap();
        let first = source.lines().next().unwrap();
        assert_eq!(first.1, "Start-Date: 2024-01-01  01:00:00");
    }

    #[test]
    fn test_missing_log() {
        let result = LogSource::open("/nonexistent/history.log");
        assert!(matches!(result, Err(Error::LogUnavailable(_))));
    }

    #[test]
    fn test_unset_path() {
        let result = LogSource::open("");
        assert!(matches!(result, Err(Error::LogUnavailable(_))));
    }
}
