//! Claude Code JSONL transcripts.
//!
//! One JSON object per line. `user` and `assistant` lines carry a
//! `message.content` that is either a string or an array of blocks
//! (`text`, `thinking`, `tool_use`, `tool_result`).

use std::path::{Path, PathBuf};

use ccrelay_core::{AgentEvent, EngineError, ProviderKind, RecoveryStrategy, ToolInvocation, ToolOutcome};
use serde_json::Value;

use crate::discovery::{
    ResumeCandidate, TranscriptRoots, claude_find_session, claude_project_dir, claude_sessions,
    into_candidates,
};
use crate::provider::{ProviderAdapter, parse_object, summarize_tool_input};

/// User-side text Claude Code injects itself (slash command echoes, hooks).
const INJECTED_PREFIXES: &[&str] = &[
    "<command-name>",
    "<command-message>",
    "<local-command-",
    "<system-reminder>",
    "Caveat: The messages below",
];

#[derive(Debug, Clone, Copy, Default)]
pub struct ClaudeAdapter;

impl ProviderAdapter for ClaudeAdapter {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Claude
    }

    fn default_command(&self) -> &'static str {
        "claude"
    }

    fn strategy_args(&self, strategy: &RecoveryStrategy) -> Vec<String> {
        match strategy {
            RecoveryStrategy::Fresh => Vec::new(),
            RecoveryStrategy::Continue => vec!["--continue".to_string()],
            RecoveryStrategy::Resume { session_id } => {
                vec!["--resume".to_string(), session_id.clone()]
            }
        }
    }

    fn parse_line(&self, line: &str) -> Result<Vec<AgentEvent>, EngineError> {
        let entry = parse_object(line, "claude transcript")?;
        if entry.get("isMeta").and_then(Value::as_bool) == Some(true)
            || entry.get("isSidechain").and_then(Value::as_bool) == Some(true)
        {
            return Ok(Vec::new());
        }
        let content = entry.get("message").and_then(|m| m.get("content"));
        match (entry.get("type").and_then(Value::as_str), content) {
            (Some("assistant"), Some(content)) => Ok(assistant_events(content)),
            (Some("user"), Some(content)) => Ok(user_events(content)),
            _ => Ok(Vec::new()),
        }
    }

    fn canonical_transcript_path(
        &self,
        roots: &TranscriptRoots,
        cwd: &Path,
        session_id: &str,
    ) -> Option<PathBuf> {
        let path = claude_project_dir(&roots.claude_projects, cwd).join(format!("{session_id}.jsonl"));
        path.exists().then_some(path)
    }

    fn scan_for_session(&self, roots: &TranscriptRoots, session_id: &str) -> Option<PathBuf> {
        claude_find_session(&roots.claude_projects, session_id)
    }

    fn resume_candidates(&self, roots: &TranscriptRoots, cwd: &Path) -> Vec<ResumeCandidate> {
        into_candidates(self, claude_sessions(&roots.claude_projects, cwd))
    }
}

fn assistant_events(content: &Value) -> Vec<AgentEvent> {
    let Some(blocks) = content.as_array() else {
        return content
            .as_str()
            .filter(|t| !t.trim().is_empty())
            .map(|t| AgentEvent::AssistantMessage {
                text: t.to_string(),
                thinking: false,
            })
            .into_iter()
            .collect();
    };

    let mut events = Vec::new();
    for block in blocks {
        match block.get("type").and_then(Value::as_str) {
            Some("text") => {
                if let Some(text) = block_str(block, "text") {
                    events.push(AgentEvent::AssistantMessage {
                        text,
                        thinking: false,
                    });
                }
            }
            Some("thinking") => {
                if let Some(text) = block_str(block, "thinking") {
                    events.push(AgentEvent::AssistantMessage {
                        text,
                        thinking: true,
                    });
                }
            }
            Some("tool_use") => {
                let Some(id) = block.get("id").and_then(Value::as_str) else {
                    continue;
                };
                let name = block
                    .get("name")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown");
                events.push(AgentEvent::ToolInvocation(ToolInvocation {
                    invocation_id: id.to_string(),
                    name: name.to_string(),
                    summary: block.get("input").map(summarize_tool_input).unwrap_or_default(),
                }));
            }
            _ => {}
        }
    }
    events
}

fn user_events(content: &Value) -> Vec<AgentEvent> {
    if let Some(text) = content.as_str() {
        return user_text(text).into_iter().collect();
    }
    let Some(blocks) = content.as_array() else {
        return Vec::new();
    };

    let mut events = Vec::new();
    for block in blocks {
        match block.get("type").and_then(Value::as_str) {
            Some("text") => {
                if let Some(event) = block.get("text").and_then(Value::as_str).and_then(user_text) {
                    events.push(event);
                }
            }
            Some("tool_result") => {
                let Some(id) = block.get("tool_use_id").and_then(Value::as_str) else {
                    continue;
                };
                events.push(AgentEvent::ToolOutcome(ToolOutcome {
                    invocation_id: id.to_string(),
                    tool_name: None,
                    text: block.get("content").map(result_text).unwrap_or_default(),
                    is_error: block.get("is_error").and_then(Value::as_bool).unwrap_or(false),
                }));
            }
            _ => {}
        }
    }
    events
}

fn user_text(text: &str) -> Option<AgentEvent> {
    let trimmed = text.trim_start();
    if trimmed.is_empty() || INJECTED_PREFIXES.iter().any(|p| trimmed.starts_with(p)) {
        return None;
    }
    Some(AgentEvent::UserMessage {
        text: text.to_string(),
    })
}

fn block_str(block: &Value, key: &str) -> Option<String> {
    block
        .get(key)
        .and_then(Value::as_str)
        .filter(|t| !t.trim().is_empty())
        .map(str::to_string)
}

/// `tool_result.content` is a string or an array of text blocks.
fn result_text(content: &Value) -> String {
    match content {
        Value::String(s) => s.clone(),
        Value::Array(blocks) => blocks
            .iter()
            .filter_map(|b| b.get("text").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join("\n"),
        _ => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse(v: Value) -> Vec<AgentEvent> {
        ClaudeAdapter.parse_line(&v.to_string()).expect("parse")
    }

    #[test]
    fn assistant_blocks() {
        let events = parse(json!({
            "type": "assistant",
            "message": {"role": "assistant", "content": [
                {"type": "thinking", "thinking": "check the tests first"},
                {"type": "text", "text": "Running the suite."},
                {"type": "tool_use", "id": "tu-1", "name": "Bash", "input": {"command": "cargo test"}}
            ]}
        }));
        assert_eq!(events.len(), 3);
        assert!(matches!(&events[0], AgentEvent::AssistantMessage { thinking: true, .. }));
        assert!(matches!(&events[1], AgentEvent::AssistantMessage { thinking: false, text } if text == "Running the suite."));
        match &events[2] {
            AgentEvent::ToolInvocation(inv) => {
                assert_eq!(inv.invocation_id, "tu-1");
                assert_eq!(inv.name, "Bash");
                assert_eq!(inv.summary, "cargo test");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn tool_result_with_error_flag() {
        let events = parse(json!({
            "type": "user",
            "message": {"role": "user", "content": [
                {"type": "tool_result", "tool_use_id": "tu-1", "is_error": true,
                 "content": [{"type": "text", "text": "exit 101"}]}
            ]}
        }));
        match &events[..] {
            [AgentEvent::ToolOutcome(out)] => {
                assert_eq!(out.invocation_id, "tu-1");
                assert!(out.is_error);
                assert_eq!(out.text, "exit 101");
                assert_eq!(out.tool_name, None);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn user_text_and_injected_text() {
        let events = parse(json!({
            "type": "user",
            "message": {"role": "user", "content": "add a retry"}
        }));
        assert_eq!(
            events,
            vec![AgentEvent::UserMessage {
                text: "add a retry".into()
            }]
        );
        let events = parse(json!({
            "type": "user",
            "message": {"role": "user", "content": "<command-name>/clear</command-name>"}
        }));
        assert!(events.is_empty());
    }

    #[test]
    fn meta_sidechain_and_other_types_skipped() {
        assert!(parse(json!({"type": "user", "isMeta": true, "message": {"content": "x"}})).is_empty());
        assert!(parse(json!({"type": "assistant", "isSidechain": true,
            "message": {"content": [{"type": "text", "text": "sub"}]}})).is_empty());
        assert!(parse(json!({"type": "summary", "summary": "Fix bug"})).is_empty());
        assert!(parse(json!({"type": "file-history-snapshot"})).is_empty());
    }

    #[test]
    fn malformed_line_is_corrupt_record() {
        let err = ClaudeAdapter.parse_line("{\"type\":\"user\",").expect_err("corrupt");
        assert!(matches!(err, EngineError::CorruptRecord { .. }));
        let err = ClaudeAdapter.parse_line("[1,2]").expect_err("not an object");
        assert!(matches!(err, EngineError::CorruptRecord { .. }));
    }
}
