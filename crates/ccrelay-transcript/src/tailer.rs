//! Per-window transcript tail: the reader a provider needs plus tool pairing.

use std::path::{Path, PathBuf};

use ccrelay_core::{AgentEvent, Capability, EngineError, ProviderKind};
use tracing::debug;

use crate::pairing::ToolPairing;
use crate::provider::{ProviderAdapter, adapter_for};
use crate::reader::{IncrementalReader, WholeFileReader};

#[derive(Debug)]
enum Reader {
    Incremental(IncrementalReader),
    WholeFile(WholeFileReader),
}

/// Events from one poll plus the position to persist.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TailBatch {
    pub events: Vec<AgentEvent>,
    /// Byte offset (incremental) or message count (whole-file).
    pub offset: u64,
    /// Records that failed to parse and were skipped.
    pub skipped: usize,
}

#[derive(Debug)]
pub struct TranscriptTailer {
    adapter: &'static dyn ProviderAdapter,
    reader: Reader,
    pairing: ToolPairing,
}

impl TranscriptTailer {
    /// Attach to a transcript.
    ///
    /// With no stored position the tail starts at the current end, so
    /// history already in the file is never emitted.
    pub fn attach(provider: ProviderKind, path: PathBuf, stored: Option<u64>) -> Self {
        let adapter = adapter_for(provider);
        let reader = if adapter.policy().permits(Capability::IncrementalRead) {
            Reader::Incremental(match stored {
                Some(offset) => IncrementalReader::at_offset(path, offset),
                None => IncrementalReader::at_end(path),
            })
        } else {
            let known = stored.and_then(|n| usize::try_from(n).ok());
            let mut reader = WholeFileReader::new(path, known.unwrap_or(0));
            if known.is_none() {
                // Count what is already there without emitting it.
                if let Err(e) = reader.poll(|content, k| adapter.parse_document(content, k)) {
                    debug!(error = %e, "initial document count failed");
                }
            }
            Reader::WholeFile(reader)
        };
        Self {
            adapter,
            reader,
            pairing: ToolPairing::new(),
        }
    }

    pub fn provider(&self) -> ProviderKind {
        self.adapter.kind()
    }

    pub fn path(&self) -> &Path {
        match &self.reader {
            Reader::Incremental(r) => r.path(),
            Reader::WholeFile(r) => r.path(),
        }
    }

    pub fn offset(&self) -> u64 {
        match &self.reader {
            Reader::Incremental(r) => r.offset(),
            Reader::WholeFile(r) => r.message_count() as u64,
        }
    }

    pub fn pending_tools(&self) -> usize {
        self.pairing.pending_count()
    }

    /// Read whatever is new. Corrupt records are skipped; I/O failures are
    /// returned as transient errors with the position unchanged.
    pub fn poll(&mut self) -> Result<TailBatch, EngineError> {
        let adapter = self.adapter;
        let mut skipped = 0;
        let events = match &mut self.reader {
            Reader::Incremental(reader) => {
                let mut events = Vec::new();
                for line in reader.poll()? {
                    match adapter.parse_line(&line) {
                        Ok(mut parsed) => events.append(&mut parsed),
                        Err(e) => {
                            skipped += 1;
                            debug!(provider = %adapter.kind(), error = %e, "skipping transcript line");
                        }
                    }
                }
                events
            }
            Reader::WholeFile(reader) => {
                match reader.poll(|content, known| adapter.parse_document(content, known)) {
                    Ok(doc) => doc.events,
                    Err(e) if e.is_transient() => return Err(e),
                    Err(e) => {
                        skipped += 1;
                        debug!(provider = %adapter.kind(), error = %e, "skipping session document");
                        Vec::new()
                    }
                }
            }
        };
        Ok(TailBatch {
            events: self.pairing.apply(events),
            offset: self.offset(),
            skipped,
        })
    }

    /// Stop tailing. Returns how many invocations never saw an outcome.
    pub fn detach(mut self) -> usize {
        let orphaned = self.pairing.clear();
        if orphaned > 0 {
            debug!(path = %self.path().display(), orphaned, "discarding pending tool invocations");
        }
        orphaned
    }
}
