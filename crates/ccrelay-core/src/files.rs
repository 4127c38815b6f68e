//! File helpers shared by the transcript reader, the event feed and state
//! persistence.

use std::fs::{self, File};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::EngineError;

// ─── Append-only line files ──────────────────────────────────────

/// Complete lines read past an offset.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LineBatch {
    pub lines: Vec<String>,
    /// Byte offset just past the last complete line.
    pub offset: u64,
    /// The stored offset was beyond EOF and reading restarted at 0.
    pub truncated: bool,
}

/// Read newline-terminated lines starting at `offset`.
///
/// An unterminated trailing line is left for the next call; the returned
/// offset never moves past it. Blank lines are consumed silently.
pub fn read_complete_lines(path: &Path, offset: u64) -> io::Result<LineBatch> {
    let mut file = File::open(path)?;
    let len = file.metadata()?.len();
    let (start, truncated) = if offset > len {
        (0, true)
    } else {
        (offset, false)
    };
    if start == len {
        return Ok(LineBatch {
            lines: Vec::new(),
            offset: start,
            truncated,
        });
    }

    file.seek(SeekFrom::Start(start))?;
    let mut buf = Vec::new();
    file.take(len - start).read_to_end(&mut buf)?;

    let Some(last_newline) = buf.iter().rposition(|&b| b == b'\n') else {
        return Ok(LineBatch {
            lines: Vec::new(),
            offset: start,
            truncated,
        });
    };
    let lines = buf[..last_newline]
        .split(|&b| b == b'\n')
        .map(|raw| raw.strip_suffix(b"\r").unwrap_or(raw))
        .filter(|raw| !raw.iter().all(u8::is_ascii_whitespace))
        .map(|raw| String::from_utf8_lossy(raw).into_owned())
        .collect();
    Ok(LineBatch {
        lines,
        offset: start + last_newline as u64 + 1,
        truncated,
    })
}

// ─── JSON state files ────────────────────────────────────────────

/// Write `value` as pretty JSON via a temp file in the same directory and a
/// rename, so readers never observe a partial file.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), EngineError> {
    let context = || format!("persist {}", path.display());
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir).map_err(|e| EngineError::transient(context(), e))?;

    let json = serde_json::to_vec_pretty(value).map_err(|e| EngineError::transient(context(), e))?;
    let mut tmp =
        tempfile::NamedTempFile::new_in(dir).map_err(|e| EngineError::transient(context(), e))?;
    tmp.write_all(&json)
        .and_then(|()| tmp.write_all(b"\n"))
        .and_then(|()| tmp.as_file().sync_all())
        .map_err(|e| EngineError::transient(context(), e))?;
    tmp.persist(path)
        .map_err(|e| EngineError::transient(context(), e.error))?;
    Ok(())
}

/// Load a JSON state file. A missing file yields `T::default()`.
pub fn load_json<T: DeserializeOwned + Default>(path: &Path) -> Result<T, EngineError> {
    let content = match fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(T::default()),
        Err(e) => return Err(EngineError::transient(format!("read {}", path.display()), e)),
    };
    serde_json::from_str(&content).map_err(|e| EngineError::CorruptRecord {
        location: path.display().to_string(),
        detail: e.to_string(),
    })
}
