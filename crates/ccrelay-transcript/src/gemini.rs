//! Gemini CLI chat sessions.
//!
//! Each session is one JSON document rewritten in place:
//! `{sessionId, messages: [{type: "user" | "gemini", content, toolCalls?}]}`.
//! There is no append-only log, so reads are whole-file and the offset is a
//! message count.

use std::path::{Path, PathBuf};

use ccrelay_core::{
    AgentEvent, Capability, EngineError, ProviderKind, RecoveryStrategy, ToolInvocation,
    ToolOutcome,
};
use serde_json::Value;

use crate::discovery::{
    ResumeCandidate, TranscriptRoots, gemini_chats_dir, gemini_find_session, gemini_session_in,
    gemini_sessions, into_candidates,
};
use crate::provider::{DocumentParse, ProviderAdapter, parse_object, summarize_tool_input};

#[derive(Debug, Clone, Copy, Default)]
pub struct GeminiAdapter;

impl ProviderAdapter for GeminiAdapter {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Gemini
    }

    fn default_command(&self) -> &'static str {
        "gemini"
    }

    fn strategy_args(&self, strategy: &RecoveryStrategy) -> Vec<String> {
        match strategy {
            RecoveryStrategy::Resume { session_id } => {
                vec!["--resume".to_string(), session_id.clone()]
            }
            _ => Vec::new(),
        }
    }

    fn parse_line(&self, _line: &str) -> Result<Vec<AgentEvent>, EngineError> {
        self.policy().check(Capability::IncrementalRead)?;
        Ok(Vec::new())
    }

    fn parse_document(
        &self,
        content: &str,
        known_messages: usize,
    ) -> Result<DocumentParse, EngineError> {
        let doc = parse_object(content, "gemini session")?;
        let Some(messages) = doc.get("messages").and_then(Value::as_array) else {
            return Err(EngineError::CorruptRecord {
                location: "gemini session".to_string(),
                detail: "missing messages array".to_string(),
            });
        };
        let events = messages
            .iter()
            .skip(known_messages)
            .filter(|m| m.is_object())
            .flat_map(message_events)
            .collect();
        Ok(DocumentParse {
            events,
            message_count: messages.len(),
        })
    }

    fn canonical_transcript_path(
        &self,
        roots: &TranscriptRoots,
        cwd: &Path,
        session_id: &str,
    ) -> Option<PathBuf> {
        gemini_session_in(&gemini_chats_dir(&roots.gemini_tmp, cwd), session_id)
    }

    fn scan_for_session(&self, roots: &TranscriptRoots, session_id: &str) -> Option<PathBuf> {
        gemini_find_session(&roots.gemini_tmp, session_id)
    }

    fn resume_candidates(&self, roots: &TranscriptRoots, cwd: &Path) -> Vec<ResumeCandidate> {
        into_candidates(self, gemini_sessions(&roots.gemini_tmp, cwd))
    }
}

fn message_events(message: &Value) -> Vec<AgentEvent> {
    let text = message
        .get("content")
        .map(content_text)
        .unwrap_or_default();
    let mut events = Vec::new();
    match message.get("type").and_then(Value::as_str) {
        Some("user") if !text.trim().is_empty() => {
            events.push(AgentEvent::UserMessage { text });
        }
        Some("gemini") => {
            if !text.trim().is_empty() {
                events.push(AgentEvent::AssistantMessage {
                    text,
                    thinking: false,
                });
            }
            for call in message
                .get("toolCalls")
                .and_then(Value::as_array)
                .into_iter()
                .flatten()
            {
                events.extend(tool_call_events(call));
            }
        }
        _ => {}
    }
    events
}

/// A finished call carries its result inline, so both halves come out
/// together.
fn tool_call_events(call: &Value) -> Vec<AgentEvent> {
    let Some(id) = call.get("id").and_then(Value::as_str) else {
        return Vec::new();
    };
    let name = call
        .get("displayName")
        .or_else(|| call.get("name"))
        .and_then(Value::as_str)
        .unwrap_or("unknown");
    let mut events = vec![AgentEvent::ToolInvocation(ToolInvocation {
        invocation_id: id.to_string(),
        name: name.to_string(),
        summary: call.get("args").map(summarize_tool_input).unwrap_or_default(),
    })];
    let status = call.get("status").and_then(Value::as_str);
    if matches!(status, Some("success") | Some("error") | Some("cancelled")) {
        let text = call
            .get("resultDisplay")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        events.push(AgentEvent::ToolOutcome(ToolOutcome {
            invocation_id: id.to_string(),
            tool_name: Some(name.to_string()),
            text,
            is_error: status != Some("success"),
        }));
    }
    events
}

fn content_text(content: &Value) -> String {
    match content {
        Value::String(s) => s.clone(),
        Value::Array(parts) => parts
            .iter()
            .filter_map(|p| p.get("text").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join(""),
        _ => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(messages: Value) -> String {
        json!({"sessionId": "s-1", "messages": messages}).to_string()
    }

    #[test]
    fn suffix_beyond_known_count() {
        let content = doc(json!([
            {"type": "user", "content": "list files"},
            {"type": "gemini", "content": "Sure."},
            {"type": "user", "content": "now delete tmp"}
        ]));
        let all = GeminiAdapter.parse_document(&content, 0).expect("parse");
        assert_eq!(all.message_count, 3);
        assert_eq!(all.events.len(), 3);

        let suffix = GeminiAdapter.parse_document(&content, 2).expect("parse");
        assert_eq!(suffix.message_count, 3);
        assert_eq!(
            suffix.events,
            vec![AgentEvent::UserMessage {
                text: "now delete tmp".into()
            }]
        );
    }

    #[test]
    fn non_object_messages_counted_but_skipped() {
        let content = doc(json!(["garbage", 7, {"type": "user", "content": "hi"}]));
        let parsed = GeminiAdapter.parse_document(&content, 0).expect("parse");
        assert_eq!(parsed.message_count, 3);
        assert_eq!(parsed.events.len(), 1);
    }

    #[test]
    fn tool_calls_emit_invocation_and_outcome() {
        let content = doc(json!([
            {"type": "gemini", "content": "", "toolCalls": [
                {"id": "run_shell-1", "name": "run_shell_command", "displayName": "Shell",
                 "args": {"command": "ls"}, "status": "error", "resultDisplay": "denied"},
                {"id": "read-2", "name": "read_file", "args": {"path": "a.rs"}}
            ]}
        ]));
        let parsed = GeminiAdapter.parse_document(&content, 0).expect("parse");
        assert_eq!(parsed.events.len(), 3);
        match &parsed.events[1] {
            AgentEvent::ToolOutcome(o) => {
                assert_eq!(o.invocation_id, "run_shell-1");
                assert!(o.is_error);
                assert_eq!(o.tool_name.as_deref(), Some("Shell"));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(&parsed.events[2], AgentEvent::ToolInvocation(i) if i.summary == "a.rs"));
    }

    #[test]
    fn invalid_document_is_corrupt() {
        assert!(matches!(
            GeminiAdapter.parse_document("{\"messages\": [", 0),
            Err(EngineError::CorruptRecord { .. })
        ));
        assert!(matches!(
            GeminiAdapter.parse_document("{\"sessionId\": \"x\"}", 0),
            Err(EngineError::CorruptRecord { .. })
        ));
    }

    #[test]
    fn line_reads_unsupported() {
        assert!(matches!(
            GeminiAdapter.parse_line("{}"),
            Err(EngineError::CapabilityUnsupported { .. })
        ));
    }
}
