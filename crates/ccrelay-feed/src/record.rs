//! Feed record model and its translation into [`AgentEvent`]s.
//!
//! One record per line:
//! `{"ts": 1712.5, "event": "Stop", "window_key": "ccrelay:@3", "session_id": "...", "data": {...}}`

use std::path::PathBuf;

use ccrelay_core::{AgentEvent, TurnOutcome, is_window_id};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use thiserror::Error;

/// Hook events the feed carries. Anything else in the file is ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookEvent {
    SessionStart,
    Notification,
    Stop,
    SubagentStart,
    SubagentStop,
    TaskCompleted,
    TeammateIdle,
}

impl HookEvent {
    pub const ALL: [Self; 7] = [
        Self::SessionStart,
        Self::Notification,
        Self::Stop,
        Self::SubagentStart,
        Self::SubagentStop,
        Self::TaskCompleted,
        Self::TeammateIdle,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::SessionStart => "SessionStart",
            Self::Notification => "Notification",
            Self::Stop => "Stop",
            Self::SubagentStart => "SubagentStart",
            Self::SubagentStop => "SubagentStop",
            Self::TaskCompleted => "TaskCompleted",
            Self::TeammateIdle => "TeammateIdle",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|e| e.as_str() == name)
    }
}

/// Binding information carried by a `SessionStart` record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionStart {
    pub session_id: String,
    pub cwd: PathBuf,
    pub transcript_path: Option<PathBuf>,
    pub window_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedRecord {
    /// Unix seconds with fractional part.
    #[serde(default)]
    pub ts: f64,
    #[serde(rename = "event")]
    pub event_type: String,
    /// `tmux_session:window_id`, e.g. `ccrelay:@3`.
    pub window_key: String,
    #[serde(default)]
    pub session_id: String,
    #[serde(default)]
    pub data: Value,
}

impl FeedRecord {
    pub fn new(
        event: HookEvent,
        window_key: impl Into<String>,
        session_id: impl Into<String>,
        data: Value,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            ts: at.timestamp_millis() as f64 / 1000.0,
            event_type: event.as_str().to_string(),
            window_key: window_key.into(),
            session_id: session_id.into(),
            data,
        }
    }

    pub fn hook_event(&self) -> Option<HookEvent> {
        HookEvent::from_name(&self.event_type)
    }

    /// Window id part of the key, if it has the `@N` shape.
    pub fn window_id(&self) -> Option<&str> {
        let id = self
            .window_key
            .rsplit_once(':')
            .map_or(self.window_key.as_str(), |(_, id)| id);
        is_window_id(id).then_some(id)
    }

    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis((self.ts * 1000.0) as i64)
    }

    fn text(&self, key: &str) -> Option<&str> {
        self.data
            .get(key)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
    }

    pub fn session_start(&self) -> Option<SessionStart> {
        if self.hook_event() != Some(HookEvent::SessionStart) || self.session_id.is_empty() {
            return None;
        }
        Some(SessionStart {
            session_id: self.session_id.clone(),
            cwd: PathBuf::from(self.text("cwd")?),
            transcript_path: self.text("transcript_path").map(PathBuf::from),
            window_name: self.text("window_name").map(str::to_string),
        })
    }

    /// Translate into an engine event. `SessionStart` and unknown types
    /// yield `None`.
    pub fn to_event(&self) -> Option<AgentEvent> {
        let event = match self.hook_event()? {
            HookEvent::SessionStart => return None,
            HookEvent::Notification => AgentEvent::InteractivePrompt {
                name: self.text("tool_name").unwrap_or("Notification").to_string(),
                content: self.text("message").unwrap_or_default().to_string(),
                pane_id: None,
            },
            HookEvent::Stop => AgentEvent::TurnEnd {
                outcome: stop_outcome(self.text("stop_reason").unwrap_or_default()),
            },
            HookEvent::SubagentStart => AgentEvent::SubagentStart {
                subagent_id: self.text("subagent_id")?.to_string(),
                name: self.text("name").map(str::to_string),
                description: self.text("description").map(str::to_string),
            },
            HookEvent::SubagentStop => AgentEvent::SubagentStop {
                subagent_id: self.text("subagent_id")?.to_string(),
            },
            HookEvent::TaskCompleted => AgentEvent::TaskCompleted {
                subject: self.text("task_subject").unwrap_or_default().to_string(),
                completed_by: self.text("teammate_name").map(str::to_string),
            },
            HookEvent::TeammateIdle => {
                let name = self.text("teammate_name").unwrap_or("unknown");
                AgentEvent::StatusChange {
                    status: Some(format!("Teammate '{name}' went idle")),
                    label: Some("teammate idle".to_string()),
                }
            }
        };
        Some(event)
    }
}

fn stop_outcome(reason: &str) -> TurnOutcome {
    let reason = reason.to_ascii_lowercase();
    if ["interrupt", "cancel", "abort"]
        .iter()
        .any(|k| reason.contains(k))
    {
        TurnOutcome::Cancelled
    } else {
        TurnOutcome::Completed
    }
}

// ─── Hook payloads ───────────────────────────────────────────────

#[derive(Debug, Error, PartialEq, Eq)]
pub enum HookPayloadError {
    #[error("payload is not a JSON object")]
    NotAnObject,
    #[error("missing {0}")]
    Missing(&'static str),
    #[error("unhandled hook event: {0}")]
    Unhandled(String),
    #[error("invalid session id: {0}")]
    InvalidSessionId(String),
    #[error("cwd is not absolute: {0}")]
    RelativeCwd(String),
}

/// Build a feed record from a Claude hook stdin payload.
///
/// Only the fields the engine reads are copied into `data`.
pub fn from_hook_payload(
    payload: &Value,
    window_key: &str,
    window_name: &str,
    at: DateTime<Utc>,
) -> Result<FeedRecord, HookPayloadError> {
    let obj = payload.as_object().ok_or(HookPayloadError::NotAnObject)?;
    let field = |key: &str| obj.get(key).and_then(Value::as_str).unwrap_or_default();

    let name = field("hook_event_name");
    if name.is_empty() {
        return Err(HookPayloadError::Missing("hook_event_name"));
    }
    let session_id = field("session_id");
    if session_id.is_empty() {
        return Err(HookPayloadError::Missing("session_id"));
    }
    if !session_id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(HookPayloadError::InvalidSessionId(session_id.to_string()));
    }
    let event =
        HookEvent::from_name(name).ok_or_else(|| HookPayloadError::Unhandled(name.to_string()))?;

    let data = match event {
        HookEvent::SessionStart => {
            let cwd = field("cwd");
            if cwd.is_empty() {
                return Err(HookPayloadError::Missing("cwd"));
            }
            if !cwd.starts_with('/') {
                return Err(HookPayloadError::RelativeCwd(cwd.to_string()));
            }
            json!({
                "cwd": cwd,
                "transcript_path": field("transcript_path"),
                "window_name": window_name,
                "source": field("source"),
            })
        }
        HookEvent::Notification => pick(obj, &["tool_name", "message"]),
        HookEvent::Stop => {
            let mut data = pick(obj, &["stop_reason"]);
            data["num_turns"] = obj.get("num_turns").cloned().unwrap_or(json!(0));
            data
        }
        HookEvent::SubagentStart | HookEvent::SubagentStop => {
            pick(obj, &["subagent_id", "description", "name"])
        }
        HookEvent::TaskCompleted => pick(obj, &["task_subject", "teammate_name"]),
        HookEvent::TeammateIdle => pick(obj, &["teammate_name"]),
    };
    Ok(FeedRecord::new(event, window_key, session_id, data, at))
}

fn pick(obj: &Map<String, Value>, keys: &[&str]) -> Value {
    let map = keys
        .iter()
        .map(|k| {
            let v = obj.get(*k).and_then(Value::as_str).unwrap_or_default();
            ((*k).to_string(), Value::String(v.to_string()))
        })
        .collect();
    Value::Object(map)
}
