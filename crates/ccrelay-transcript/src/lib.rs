//! ccrelay-transcript: transcript tailing for Claude, Codex and Gemini.
//!
//! Adapters normalise each backend's log into [`ccrelay_core::AgentEvent`]s.
//! Readers are chosen by capability: byte-offset tailing for append-only
//! JSONL, fingerprinted whole-file parsing for rewritten documents.

pub mod claude;
pub mod codex;
pub mod discovery;
pub mod gemini;
pub mod pairing;
pub mod provider;
pub mod reader;
pub mod tailer;

pub use discovery::{ResumeCandidate, TranscriptRoots, canonical_dir, encode_path};
pub use pairing::ToolPairing;
pub use provider::{
    DocumentParse, ProviderAdapter, adapter_for, detect_provider_from_command, validate_session_id,
};
pub use reader::{IncrementalReader, WholeFileReader};
pub use tailer::{TailBatch, TranscriptTailer};
