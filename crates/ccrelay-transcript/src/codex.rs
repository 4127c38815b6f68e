//! Codex CLI rollout transcripts.
//!
//! Lines are `{timestamp, type, payload}`. Conversation content lives in
//! `response_item` payloads; turn lifecycle in `event_msg`.

use std::path::{Path, PathBuf};

use ccrelay_core::{
    AgentEvent, EngineError, ProviderKind, RecoveryStrategy, ToolInvocation, ToolOutcome,
    TurnOutcome,
};
use serde_json::Value;

use crate::discovery::{
    ResumeCandidate, TranscriptRoots, codex_find_session, codex_sessions, into_candidates,
};
use crate::provider::{ProviderAdapter, parse_object, summarize_tool_input};

/// Context blocks Codex sends as user-role messages.
const INJECTED_PREFIXES: &[&str] = &[
    "<permissions",
    "<environment_context",
    "<user_instructions",
];

#[derive(Debug, Clone, Copy, Default)]
pub struct CodexAdapter;

impl ProviderAdapter for CodexAdapter {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Codex
    }

    fn default_command(&self) -> &'static str {
        "codex"
    }

    fn strategy_args(&self, strategy: &RecoveryStrategy) -> Vec<String> {
        match strategy {
            RecoveryStrategy::Fresh => Vec::new(),
            RecoveryStrategy::Continue => vec!["resume".to_string(), "--last".to_string()],
            RecoveryStrategy::Resume { session_id } => {
                vec!["resume".to_string(), session_id.clone()]
            }
        }
    }

    fn parse_line(&self, line: &str) -> Result<Vec<AgentEvent>, EngineError> {
        let entry = parse_object(line, "codex transcript")?;
        let Some(payload) = entry.get("payload") else {
            return Ok(Vec::new());
        };
        let events = match entry.get("type").and_then(Value::as_str) {
            Some("response_item") => response_item(payload),
            Some("input_item") => input_item(payload),
            Some("event_msg") => event_msg(payload).into_iter().collect(),
            _ => Vec::new(),
        };
        Ok(events)
    }

    /// Rollout file names are date-stamped, so there is no derivable path.
    fn canonical_transcript_path(
        &self,
        _roots: &TranscriptRoots,
        _cwd: &Path,
        _session_id: &str,
    ) -> Option<PathBuf> {
        None
    }

    fn scan_for_session(&self, roots: &TranscriptRoots, session_id: &str) -> Option<PathBuf> {
        codex_find_session(&roots.codex_sessions, session_id)
    }

    fn resume_candidates(&self, roots: &TranscriptRoots, cwd: &Path) -> Vec<ResumeCandidate> {
        into_candidates(self, codex_sessions(&roots.codex_sessions, cwd))
    }
}

fn response_item(payload: &Value) -> Vec<AgentEvent> {
    match payload.get("type").and_then(Value::as_str) {
        Some("message") => message(payload),
        Some("function_call") | Some("custom_tool_call") => {
            let Some(call_id) = payload.get("call_id").and_then(Value::as_str) else {
                return Vec::new();
            };
            let name = payload
                .get("name")
                .and_then(Value::as_str)
                .unwrap_or("unknown");
            vec![AgentEvent::ToolInvocation(ToolInvocation {
                invocation_id: call_id.to_string(),
                name: name.to_string(),
                summary: call_arguments(payload),
            })]
        }
        Some("function_call_output") | Some("custom_tool_call_output") => {
            let Some(call_id) = payload.get("call_id").and_then(Value::as_str) else {
                return Vec::new();
            };
            let (text, is_error) = call_output(payload.get("output"));
            vec![AgentEvent::ToolOutcome(ToolOutcome {
                invocation_id: call_id.to_string(),
                tool_name: None,
                text,
                is_error,
            })]
        }
        Some("reasoning") => payload
            .get("summary")
            .and_then(Value::as_array)
            .map(|parts| {
                parts
                    .iter()
                    .filter_map(|p| p.get("text").and_then(Value::as_str))
                    .collect::<Vec<_>>()
                    .join("\n")
            })
            .filter(|t| !t.trim().is_empty())
            .map(|text| AgentEvent::AssistantMessage {
                text,
                thinking: true,
            })
            .into_iter()
            .collect(),
        _ => Vec::new(),
    }
}

fn message(payload: &Value) -> Vec<AgentEvent> {
    let role = payload.get("role").and_then(Value::as_str);
    let text = message_text(payload.get("content"));
    if text.trim().is_empty() {
        return Vec::new();
    }
    match role {
        Some("assistant") => vec![AgentEvent::AssistantMessage {
            text,
            thinking: false,
        }],
        Some("user") if !INJECTED_PREFIXES.iter().any(|p| text.trim_start().starts_with(p)) => {
            vec![AgentEvent::UserMessage { text }]
        }
        _ => Vec::new(),
    }
}

fn input_item(payload: &Value) -> Vec<AgentEvent> {
    if payload.get("role").and_then(Value::as_str) != Some("user") {
        return Vec::new();
    }
    let text = message_text(payload.get("content"));
    if text.trim().is_empty() {
        return Vec::new();
    }
    vec![AgentEvent::UserMessage { text }]
}

fn event_msg(payload: &Value) -> Option<AgentEvent> {
    let outcome = match payload.get("type").and_then(Value::as_str)? {
        "task_complete" => TurnOutcome::Completed,
        "turn_aborted" => TurnOutcome::Cancelled,
        _ => return None,
    };
    Some(AgentEvent::TurnEnd { outcome })
}

/// `input_text` / `output_text` blocks, or a plain string.
fn message_text(content: Option<&Value>) -> String {
    match content {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Array(blocks)) => blocks
            .iter()
            .filter(|b| {
                matches!(
                    b.get("type").and_then(Value::as_str),
                    Some("input_text") | Some("output_text")
                )
            })
            .filter_map(|b| b.get("text").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join(""),
        _ => String::new(),
    }
}

/// `arguments` is JSON encoded as a string; `input` is free text.
fn call_arguments(payload: &Value) -> String {
    if let Some(raw) = payload.get("arguments").and_then(Value::as_str) {
        return match serde_json::from_str::<Value>(raw) {
            Ok(args) => summarize_tool_input(&args),
            Err(_) => summarize_tool_input(&Value::String(raw.to_string())),
        };
    }
    payload.get("input").map(summarize_tool_input).unwrap_or_default()
}

/// Output is either plain text or a JSON string with `output` and
/// `metadata.exit_code`.
fn call_output(output: Option<&Value>) -> (String, bool) {
    let Some(raw) = output.and_then(Value::as_str) else {
        return (String::new(), false);
    };
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(obj)) => {
            let text = obj
                .get("output")
                .and_then(Value::as_str)
                .unwrap_or(raw)
                .to_string();
            let exit_code = obj
                .get("metadata")
                .and_then(|m| m.get("exit_code"))
                .and_then(Value::as_i64);
            (text, exit_code.is_some_and(|c| c != 0))
        }
        _ => (raw.to_string(), false),
    }
}
