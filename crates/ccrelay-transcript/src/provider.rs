//! Closed set of agent backends behind one adapter interface.
//!
//! Every optional behaviour is gated through [`CapabilityPolicy`] before an
//! adapter is asked to do it.

use std::path::{Path, PathBuf};

use ccrelay_core::{
    AgentEvent, CapabilityPolicy, EngineError, ProviderCapabilities, ProviderKind,
    RecoveryStrategy, StrategyKind,
};
use serde_json::Value;

use crate::claude::ClaudeAdapter;
use crate::codex::CodexAdapter;
use crate::discovery::{ResumeCandidate, TranscriptRoots};
use crate::gemini::GeminiAdapter;

/// Events parsed from a whole document, plus how many messages it holds.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DocumentParse {
    pub events: Vec<AgentEvent>,
    pub message_count: usize,
}

pub trait ProviderAdapter: Send + Sync + std::fmt::Debug {
    fn kind(&self) -> ProviderKind;

    fn capabilities(&self) -> ProviderCapabilities {
        self.kind().capabilities()
    }

    fn policy(&self) -> CapabilityPolicy {
        CapabilityPolicy::for_provider(self.kind())
    }

    /// Executable used when no override is configured.
    fn default_command(&self) -> &'static str;

    /// Extra arguments for a strategy. Only called once the strategy passed
    /// the capability gate and any session id was validated.
    fn strategy_args(&self, strategy: &RecoveryStrategy) -> Vec<String>;

    /// Full command line for `base` (e.g. `claude --model opus`).
    fn launch_command(
        &self,
        base: &str,
        strategy: &RecoveryStrategy,
    ) -> Result<String, EngineError> {
        self.policy().check_strategy(strategy.kind())?;
        if let RecoveryStrategy::Resume { session_id } = strategy {
            validate_session_id(session_id)?;
        }
        let mut parts = vec![base.trim().to_string()];
        parts.extend(self.strategy_args(strategy));
        Ok(parts.join(" "))
    }

    /// One transcript line to events. Skipped entries yield an empty vec;
    /// unparseable ones yield [`EngineError::CorruptRecord`].
    fn parse_line(&self, line: &str) -> Result<Vec<AgentEvent>, EngineError>;

    /// Whole document to events for messages past `known_messages`.
    ///
    /// Line-delimited formats count one message per non-blank line.
    fn parse_document(
        &self,
        content: &str,
        known_messages: usize,
    ) -> Result<DocumentParse, EngineError> {
        let lines: Vec<&str> = content.lines().filter(|l| !l.trim().is_empty()).collect();
        let mut events = Vec::new();
        for line in lines.iter().skip(known_messages) {
            match self.parse_line(line) {
                Ok(mut parsed) => events.append(&mut parsed),
                Err(e) => tracing::debug!(provider = %self.kind(), error = %e, "skipping record"),
            }
        }
        Ok(DocumentParse {
            events,
            message_count: lines.len(),
        })
    }

    /// Where the transcript for `session_id` in `cwd` is expected to live.
    /// Returns `None` when nothing exists there.
    fn canonical_transcript_path(
        &self,
        roots: &TranscriptRoots,
        cwd: &Path,
        session_id: &str,
    ) -> Option<PathBuf>;

    /// Search the whole store for a session. Expensive.
    fn scan_for_session(&self, roots: &TranscriptRoots, session_id: &str) -> Option<PathBuf>;

    /// Prior sessions started in `cwd`, newest first.
    fn resume_candidates(&self, roots: &TranscriptRoots, cwd: &Path) -> Vec<ResumeCandidate>;
}

static CLAUDE: ClaudeAdapter = ClaudeAdapter;
static CODEX: CodexAdapter = CodexAdapter;
static GEMINI: GeminiAdapter = GeminiAdapter;

pub fn adapter_for(kind: ProviderKind) -> &'static dyn ProviderAdapter {
    match kind {
        ProviderKind::Claude => &CLAUDE,
        ProviderKind::Codex => &CODEX,
        ProviderKind::Gemini => &GEMINI,
    }
}

/// Session ids are spliced into a shell command line.
pub fn validate_session_id(session_id: &str) -> Result<(), EngineError> {
    let valid = !session_id.is_empty()
        && session_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(EngineError::RecoveryFailure {
            strategy: StrategyKind::Resume,
            reason: format!("invalid session id {session_id:?}"),
        })
    }
}

/// Provider whose CLI is running as `pane_current_command`.
///
/// Only the basename of the first token counts, either exactly or as a
/// `name-` prefix (`claude-beta`).
pub fn detect_provider_from_command(cmd: &str) -> Option<ProviderKind> {
    let first = cmd.split_whitespace().next()?;
    let base = first.rsplit('/').next().unwrap_or(first);
    ProviderKind::ALL.into_iter().find(|kind| {
        let name = kind.as_str();
        base == name
            || base
                .strip_prefix(name)
                .is_some_and(|rest| rest.starts_with('-'))
    })
}

// ─── Shared parsing helpers ──────────────────────────────────────

const SUMMARY_MAX_CHARS: usize = 200;

/// Short rendering of a tool's input for display next to its name.
pub(crate) fn summarize_tool_input(input: &Value) -> String {
    const KEYS: &[&str] = &[
        "command",
        "cmd",
        "file_path",
        "path",
        "pattern",
        "url",
        "query",
        "description",
        "prompt",
    ];
    let picked = match input {
        Value::Object(map) => KEYS
            .iter()
            .find_map(|k| map.get(*k))
            .map(render_value)
            .or_else(|| map.values().find_map(|v| v.as_str().map(str::to_string))),
        Value::String(s) => Some(s.clone()),
        Value::Null => None,
        other => Some(other.to_string()),
    };
    truncate_chars(picked.unwrap_or_default().trim(), SUMMARY_MAX_CHARS)
}

fn render_value(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        Value::Array(items) => items
            .iter()
            .map(|i| i.as_str().map_or_else(|| i.to_string(), str::to_string))
            .collect::<Vec<_>>()
            .join(" "),
        other => other.to_string(),
    }
}

pub(crate) fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let mut out: String = s.chars().take(max.saturating_sub(1)).collect();
    out.push('…');
    out
}

pub(crate) fn parse_object(line: &str, location: &str) -> Result<serde_json::Map<String, Value>, EngineError> {
    match serde_json::from_str::<Value>(line) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(EngineError::CorruptRecord {
            location: location.to_string(),
            detail: "not a JSON object".to_string(),
        }),
        Err(e) => Err(EngineError::CorruptRecord {
            location: location.to_string(),
            detail: e.to_string(),
        }),
    }
}
