use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use crate::record::FeedRecord;

/// Append side of the event feed, used by hook processes.
#[derive(Debug, Clone)]
pub struct FeedWriter {
    path: PathBuf,
}

impl FeedWriter {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one record as a single line.
    ///
    /// The line is written with one `write_all` on an `O_APPEND` handle so
    /// concurrent writers never interleave within a record.
    pub fn append(&self, record: &FeedRecord) -> io::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(&line)
    }
}
