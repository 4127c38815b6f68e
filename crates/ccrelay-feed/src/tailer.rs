//! Crash-safe tail of the event feed.
//!
//! Two positions are tracked: `read_pos` (how far this process has read) and
//! `committed` (how far delivery is confirmed, persisted in the cursor file).
//! A restart resumes from `committed`.

use std::io;
use std::path::{Path, PathBuf};

use ccrelay_core::{EngineError, load_json, read_complete_lines, write_json_atomic};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::record::FeedRecord;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct FeedCursor {
    offset: u64,
    #[serde(default)]
    updated_at: Option<DateTime<Utc>>,
}

/// Records from one read plus the offset to commit once they are delivered.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeedBatch {
    pub records: Vec<FeedRecord>,
    pub offset: u64,
    /// Malformed lines passed over.
    pub skipped: usize,
}

#[derive(Debug)]
pub struct FeedTailer {
    feed_path: PathBuf,
    cursor_path: PathBuf,
    committed: u64,
    read_pos: u64,
}

impl FeedTailer {
    /// Open the tail from the persisted cursor.
    ///
    /// Without a usable cursor the tail starts at the current end of the
    /// feed, so records written before the first run are not replayed.
    pub fn open(feed_path: PathBuf, cursor_path: PathBuf) -> Self {
        let exists = cursor_path.exists();
        let cursor = match load_json::<FeedCursor>(&cursor_path) {
            Ok(c) if exists => Some(c),
            Ok(_) => None,
            Err(e) => {
                warn!(path = %cursor_path.display(), error = %e, "feed cursor unreadable, starting at end");
                None
            }
        };
        let offset = cursor.map_or_else(
            || std::fs::metadata(&feed_path).map(|m| m.len()).unwrap_or(0),
            |c| c.offset,
        );
        Self {
            feed_path,
            cursor_path,
            committed: offset,
            read_pos: offset,
        }
    }

    pub fn feed_path(&self) -> &Path {
        &self.feed_path
    }

    pub fn committed(&self) -> u64 {
        self.committed
    }

    /// Read complete records past the read position. A missing feed file is
    /// an empty batch.
    pub fn read_batch(&mut self) -> Result<FeedBatch, EngineError> {
        let batch = match read_complete_lines(&self.feed_path, self.read_pos) {
            Ok(b) => b,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Ok(FeedBatch {
                    offset: self.read_pos,
                    ..FeedBatch::default()
                });
            }
            Err(e) => {
                return Err(EngineError::transient(
                    format!("read {}", self.feed_path.display()),
                    e,
                ));
            }
        };
        if batch.truncated {
            debug!(
                path = %self.feed_path.display(),
                offset = self.read_pos,
                "event feed truncated, reading from start"
            );
            self.committed = 0;
        }

        let mut records = Vec::with_capacity(batch.lines.len());
        let mut skipped = 0;
        for line in &batch.lines {
            match serde_json::from_str::<FeedRecord>(line) {
                Ok(r) => records.push(r),
                Err(e) => {
                    skipped += 1;
                    debug!(error = %e, "skipping malformed feed line");
                }
            }
        }
        self.read_pos = batch.offset;
        Ok(FeedBatch {
            records,
            offset: batch.offset,
            skipped,
        })
    }

    /// Persist `offset` as delivered. Offsets at or behind the committed
    /// position are ignored.
    pub fn commit(&mut self, offset: u64) -> Result<(), EngineError> {
        if offset <= self.committed {
            return Ok(());
        }
        let cursor = FeedCursor {
            offset,
            updated_at: Some(Utc::now()),
        };
        write_json_atomic(&self.cursor_path, &cursor)?;
        self.committed = offset;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::writer::FeedWriter;
    use serde_json::json;
    use std::fs;
    use std::io::Write;
    use tempfile::TempDir;

    fn rec(n: u32) -> FeedRecord {
        FeedRecord {
            ts: f64::from(n),
            event_type: "Stop".into(),
            window_key: "ccrelay:@1".into(),
            session_id: format!("s{n}"),
            data: json!({}),
        }
    }

    fn paths(tmp: &TempDir) -> (PathBuf, PathBuf) {
        (
            tmp.path().join("events.jsonl"),
            tmp.path().join("feed_offset.json"),
        )
    }

    fn ids(batch: &FeedBatch) -> Vec<String> {
        batch.records.iter().map(|r| r.session_id.clone()).collect()
    }

    #[test]
    fn each_record_delivered_once_across_growth_and_restart() {
        let tmp = TempDir::new().expect("tempdir");
        let (feed, cursor) = paths(&tmp);
        let writer = FeedWriter::new(feed.clone());
        fs::write(&feed, "").expect("create");
        fs::write(&cursor, r#"{"offset":0}"#).expect("cursor");

        let mut tailer = FeedTailer::open(feed.clone(), cursor.clone());
        let mut seen = Vec::new();

        writer.append(&rec(1)).expect("append");
        let b = tailer.read_batch().expect("read");
        seen.extend(ids(&b));
        tailer.commit(b.offset).expect("commit");

        // Half-written record: must not be consumed yet.
        let line = serde_json::to_string(&rec(2)).expect("json");
        let (head, tail) = line.split_at(10);
        let mut f = fs::OpenOptions::new().append(true).open(&feed).expect("open");
        f.write_all(head.as_bytes()).expect("write");
        let b = tailer.read_batch().expect("read");
        assert!(b.records.is_empty());
        tailer.commit(b.offset).expect("commit");

        f.write_all(tail.as_bytes()).expect("write");
        f.write_all(b"\n").expect("write");
        drop(f);
        writer.append(&rec(3)).expect("append");
        let b = tailer.read_batch().expect("read");
        seen.extend(ids(&b));
        tailer.commit(b.offset).expect("commit");

        // Restart from the persisted cursor.
        let mut tailer = FeedTailer::open(feed.clone(), cursor.clone());
        assert!(tailer.read_batch().expect("read").records.is_empty());
        writer.append(&rec(4)).expect("append");
        let b = tailer.read_batch().expect("read");
        seen.extend(ids(&b));

        assert_eq!(seen, vec!["s1", "s2", "s3", "s4"]);
    }

    #[test]
    fn uncommitted_records_redelivered_after_restart() {
        let tmp = TempDir::new().expect("tempdir");
        let (feed, cursor) = paths(&tmp);
        fs::write(&cursor, r#"{"offset":0}"#).expect("cursor");
        let writer = FeedWriter::new(feed.clone());
        writer.append(&rec(1)).expect("append");

        let mut tailer = FeedTailer::open(feed.clone(), cursor.clone());
        assert_eq!(tailer.read_batch().expect("read").records.len(), 1);

        let mut tailer = FeedTailer::open(feed, cursor);
        assert_eq!(tailer.read_batch().expect("read").records.len(), 1);
    }

    #[test]
    fn malformed_lines_skipped_and_passed() {
        let tmp = TempDir::new().expect("tempdir");
        let (feed, cursor) = paths(&tmp);
        fs::write(&cursor, r#"{"offset":0}"#).expect("cursor");
        let good = serde_json::to_string(&rec(7)).expect("json");
        fs::write(&feed, format!("{{broken\n{good}\n")).expect("write");

        let mut tailer = FeedTailer::open(feed.clone(), cursor);
        let b = tailer.read_batch().expect("read");
        assert_eq!(b.skipped, 1);
        assert_eq!(ids(&b), vec!["s7"]);
        assert_eq!(b.offset, fs::metadata(&feed).expect("meta").len());
    }

    #[test]
    fn first_run_starts_at_end() {
        let tmp = TempDir::new().expect("tempdir");
        let (feed, cursor) = paths(&tmp);
        let writer = FeedWriter::new(feed.clone());
        writer.append(&rec(1)).expect("append");

        let mut tailer = FeedTailer::open(feed, cursor);
        assert!(tailer.read_batch().expect("read").records.is_empty());
        writer.append(&rec(2)).expect("append");
        assert_eq!(ids(&tailer.read_batch().expect("read")), vec!["s2"]);
    }

    #[test]
    fn commit_never_moves_backwards() {
        let tmp = TempDir::new().expect("tempdir");
        let (feed, cursor) = paths(&tmp);
        let mut tailer = FeedTailer::open(feed, cursor.clone());
        tailer.commit(50).expect("commit");
        tailer.commit(20).expect("commit");
        assert_eq!(tailer.committed(), 50);
        let stored: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&cursor).expect("read")).expect("json");
        assert_eq!(stored["offset"], 50);
    }

    #[test]
    fn truncated_feed_restarts_from_zero() {
        let tmp = TempDir::new().expect("tempdir");
        let (feed, cursor) = paths(&tmp);
        fs::write(&cursor, r#"{"offset":0}"#).expect("cursor");
        let writer = FeedWriter::new(feed.clone());
        for n in 1..=3 {
            writer.append(&rec(n)).expect("append");
        }
        let mut tailer = FeedTailer::open(feed.clone(), cursor);
        let b = tailer.read_batch().expect("read");
        tailer.commit(b.offset).expect("commit");

        fs::write(&feed, "").expect("truncate");
        writer.append(&rec(9)).expect("append");
        let b = tailer.read_batch().expect("read");
        assert_eq!(ids(&b), vec!["s9"]);
        tailer.commit(b.offset).expect("commit");
        assert_eq!(tailer.committed(), b.offset);
    }

    #[test]
    fn missing_feed_is_empty() {
        let tmp = TempDir::new().expect("tempdir");
        let (feed, cursor) = paths(&tmp);
        let mut tailer = FeedTailer::open(feed, cursor);
        let b = tailer.read_batch().expect("read");
        assert!(b.records.is_empty());
        assert_eq!(b.offset, 0);
    }
}
