//! Transcript file readers.
//!
//! [`IncrementalReader`] tails an append-only line file from a byte offset.
//! [`WholeFileReader`] re-parses a rewritten document when its
//! (mtime, size) fingerprint changes.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use ccrelay_core::{EngineError, read_complete_lines};
use tracing::debug;

use crate::provider::DocumentParse;

// ─── Incremental ─────────────────────────────────────────────────

/// Byte-offset tail of one line-delimited transcript.
#[derive(Debug)]
pub struct IncrementalReader {
    path: PathBuf,
    offset: u64,
    /// Inode number (for rotation detection).
    inode: u64,
}

impl IncrementalReader {
    /// Start at EOF, skipping history.
    pub fn at_end(path: PathBuf) -> Self {
        let (size, inode) = file_metadata(&path).unwrap_or((0, 0));
        Self {
            path,
            offset: size,
            inode,
        }
    }

    /// Resume from a stored offset.
    pub fn at_offset(path: PathBuf, offset: u64) -> Self {
        let inode = file_metadata(&path).map(|(_, ino)| ino).unwrap_or(0);
        Self {
            path,
            offset,
            inode,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// New complete lines since the last poll.
    pub fn poll(&mut self) -> Result<Vec<String>, EngineError> {
        if let Some((_, inode)) = file_metadata(&self.path) {
            if self.inode != 0 && inode != self.inode {
                debug!(path = %self.path.display(), "transcript replaced, reading from start");
                self.offset = 0;
            }
            self.inode = inode;
        }

        let batch = read_complete_lines(&self.path, self.offset)
            .map_err(|e| EngineError::transient(format!("read {}", self.path.display()), e))?;
        if batch.truncated {
            debug!(
                path = %self.path.display(),
                offset = self.offset,
                "transcript truncated, offset reset"
            );
        }
        self.offset = batch.offset;
        Ok(batch.lines)
    }
}

/// Get file size and inode for rotation detection.
fn file_metadata(path: &Path) -> Option<(u64, u64)> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::MetadataExt;
        fs::metadata(path).ok().map(|m| (m.len(), m.ino()))
    }
    #[cfg(not(unix))]
    {
        fs::metadata(path).ok().map(|m| (m.len(), 0))
    }
}

// ─── Whole file ──────────────────────────────────────────────────

type Fingerprint = (SystemTime, u64);

/// Message-count tail of one rewritten JSON document.
#[derive(Debug)]
pub struct WholeFileReader {
    path: PathBuf,
    fingerprint: Option<Fingerprint>,
    message_count: usize,
}

impl WholeFileReader {
    pub fn new(path: PathBuf, message_count: usize) -> Self {
        Self {
            path,
            fingerprint: None,
            message_count,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn message_count(&self) -> usize {
        self.message_count
    }

    /// Parse the document if it changed and return events for messages past
    /// the known count. Unchanged files cost one `stat`.
    ///
    /// On error the count is left alone.
    pub fn poll<F>(&mut self, parse: F) -> Result<DocumentParse, EngineError>
    where
        F: FnOnce(&str, usize) -> Result<DocumentParse, EngineError>,
    {
        let meta = fs::metadata(&self.path)
            .map_err(|e| EngineError::transient(format!("stat {}", self.path.display()), e))?;
        let fingerprint = (
            meta.modified()
                .map_err(|e| EngineError::transient("mtime", e))?,
            meta.len(),
        );
        if self.fingerprint == Some(fingerprint) {
            return Ok(DocumentParse {
                events: Vec::new(),
                message_count: self.message_count,
            });
        }

        let content = fs::read_to_string(&self.path)
            .map_err(|e| EngineError::transient(format!("read {}", self.path.display()), e))?;
        // Remember the fingerprint even if parsing fails: the same bytes will
        // not parse any better next cycle.
        self.fingerprint = Some(fingerprint);
        let parsed = parse(&content, self.message_count)?;

        if parsed.message_count < self.message_count {
            debug!(
                path = %self.path.display(),
                known = self.message_count,
                now = parsed.message_count,
                "session document shrank, recounting"
            );
            self.message_count = parsed.message_count;
            return Ok(DocumentParse {
                events: Vec::new(),
                message_count: self.message_count,
            });
        }
        self.message_count = parsed.message_count;
        Ok(parsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn append(path: &Path, text: &str) {
        let mut f = fs::OpenOptions::new()
            .append(true)
            .create(true)
            .open(path)
            .expect("open");
        f.write_all(text.as_bytes()).expect("write");
    }

    // ─── Incremental ─────────────────────────────────────────────

    #[test]
    fn appended_line_read_from_stored_offset() {
        let tmp = TempDir::new().expect("tempdir");
        let path = tmp.path().join("t.jsonl");
        // Five 24-byte lines: L1..L5 occupy exactly 120 bytes.
        for i in 1..=5 {
            append(&path, &format!("L{i}:{}\n", "x".repeat(20)));
        }
        assert_eq!(fs::metadata(&path).expect("meta").len(), 120);

        let mut reader = IncrementalReader::at_offset(path.clone(), 120);
        append(&path, "L6\n");
        let lines = reader.poll().expect("poll");
        assert_eq!(lines, vec!["L6".to_string()]);
        assert_eq!(reader.offset(), fs::metadata(&path).expect("meta").len());
    }

    #[test]
    fn unchanged_file_yields_nothing_twice() {
        let tmp = TempDir::new().expect("tempdir");
        let path = tmp.path().join("t.jsonl");
        append(&path, "a\nb\n");
        let mut reader = IncrementalReader::at_offset(path, 0);
        assert_eq!(reader.poll().expect("poll").len(), 2);
        assert!(reader.poll().expect("poll").is_empty());
        assert!(reader.poll().expect("poll").is_empty());
    }

    #[test]
    fn partial_line_not_consumed() {
        let tmp = TempDir::new().expect("tempdir");
        let path = tmp.path().join("t.jsonl");
        append(&path, "{\"a\":1}\n{\"b\":");
        let mut reader = IncrementalReader::at_offset(path.clone(), 0);
        assert_eq!(reader.poll().expect("poll"), vec!["{\"a\":1}".to_string()]);
        assert_eq!(reader.offset(), 8);

        append(&path, "2}\n");
        assert_eq!(reader.poll().expect("poll"), vec!["{\"b\":2}".to_string()]);
        assert_eq!(reader.offset(), fs::metadata(&path).expect("meta").len());
    }

    #[test]
    fn at_end_skips_history() {
        let tmp = TempDir::new().expect("tempdir");
        let path = tmp.path().join("t.jsonl");
        append(&path, "old\n");
        let mut reader = IncrementalReader::at_end(path.clone());
        assert!(reader.poll().expect("poll").is_empty());
        append(&path, "new\n");
        assert_eq!(reader.poll().expect("poll"), vec!["new".to_string()]);
    }

    #[test]
    fn truncation_resets_to_start() {
        let tmp = TempDir::new().expect("tempdir");
        let path = tmp.path().join("t.jsonl");
        append(&path, "one\ntwo\nthree\n");
        let mut reader = IncrementalReader::at_offset(path.clone(), 0);
        reader.poll().expect("poll");
        fs::write(&path, "fresh\n").expect("truncate");
        assert_eq!(reader.poll().expect("poll"), vec!["fresh".to_string()]);
    }

    #[test]
    fn missing_file_is_transient() {
        let tmp = TempDir::new().expect("tempdir");
        let mut reader = IncrementalReader::at_offset(tmp.path().join("gone.jsonl"), 0);
        let err = reader.poll().expect_err("missing");
        assert!(err.is_transient());
        assert_eq!(reader.offset(), 0);
    }

    // ─── Whole file ──────────────────────────────────────────────

    fn count_lines(content: &str, known: usize) -> Result<DocumentParse, EngineError> {
        let lines: Vec<&str> = content.lines().collect();
        let events = lines
            .iter()
            .skip(known)
            .map(|l| ccrelay_core::AgentEvent::UserMessage { text: l.to_string() })
            .collect();
        Ok(DocumentParse {
            events,
            message_count: lines.len(),
        })
    }

    #[test]
    fn whole_file_returns_suffix_and_skips_unchanged() {
        let tmp = TempDir::new().expect("tempdir");
        let path = tmp.path().join("s.json");
        fs::write(&path, "m1\nm2\n").expect("write");
        let mut reader = WholeFileReader::new(path.clone(), 0);
        assert_eq!(reader.poll(count_lines).expect("poll").events.len(), 2);

        let mut parses = 0;
        let second = reader
            .poll(|c, k| {
                parses += 1;
                count_lines(c, k)
            })
            .expect("poll");
        assert!(second.events.is_empty());
        assert_eq!(parses, 0, "unchanged fingerprint skips the parse");

        fs::write(&path, "m1\nm2\nm3 longer\n").expect("write");
        let third = reader.poll(count_lines).expect("poll");
        assert_eq!(third.events.len(), 1);
        assert_eq!(reader.message_count(), 3);
    }

    #[test]
    fn whole_file_parse_error_keeps_count() {
        let tmp = TempDir::new().expect("tempdir");
        let path = tmp.path().join("s.json");
        fs::write(&path, "m1\n").expect("write");
        let mut reader = WholeFileReader::new(path, 4);
        let err = reader
            .poll(|_, _| {
                Err(EngineError::CorruptRecord {
                    location: "test".into(),
                    detail: "bad".into(),
                })
            })
            .expect_err("corrupt");
        assert!(matches!(err, EngineError::CorruptRecord { .. }));
        assert_eq!(reader.message_count(), 4);
    }
}
