use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::UnknownProvider;

// ─── Provider & Capabilities ──────────────────────────────────────

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    #[default]
    Claude,
    Codex,
    Gemini,
}

impl ProviderKind {
    pub const ALL: [Self; 3] = [Self::Claude, Self::Codex, Self::Gemini];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Claude => "claude",
            Self::Codex => "codex",
            Self::Gemini => "gemini",
        }
    }

    /// Fixed capability profile of this backend.
    pub fn capabilities(self) -> ProviderCapabilities {
        match self {
            Self::Claude => CLAUDE_CAPABILITIES,
            Self::Codex => CODEX_CAPABILITIES,
            Self::Gemini => GEMINI_CAPABILITIES,
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = UnknownProvider;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "claude" => Ok(Self::Claude),
            "codex" => Ok(Self::Codex),
            "gemini" => Ok(Self::Gemini),
            _ => Err(UnknownProvider(s.to_string())),
        }
    }
}

/// Immutable per-backend feature flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProviderCapabilities {
    pub supports_incremental_read: bool,
    pub supports_hook_feed: bool,
    pub supports_resume: bool,
    pub supports_continue: bool,
}

pub const CLAUDE_CAPABILITIES: ProviderCapabilities = ProviderCapabilities {
    supports_incremental_read: true,
    supports_hook_feed: true,
    supports_resume: true,
    supports_continue: true,
};

pub const CODEX_CAPABILITIES: ProviderCapabilities = ProviderCapabilities {
    supports_incremental_read: true,
    supports_hook_feed: false,
    supports_resume: true,
    supports_continue: true,
};

pub const GEMINI_CAPABILITIES: ProviderCapabilities = ProviderCapabilities {
    supports_incremental_read: false,
    supports_hook_feed: false,
    supports_resume: true,
    supports_continue: false,
};

/// Optional behaviors gated by [`ProviderCapabilities`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    IncrementalRead,
    HookFeed,
    Resume,
    Continue,
}

impl Capability {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::IncrementalRead => "incremental_read",
            Self::HookFeed => "hook_feed",
            Self::Resume => "resume",
            Self::Continue => "continue",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─── Recovery Strategy ────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StrategyKind {
    Fresh,
    Continue,
    Resume,
}

impl StrategyKind {
    pub const ALL: [Self; 3] = [Self::Fresh, Self::Continue, Self::Resume];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Fresh => "fresh",
            Self::Continue => "continue",
            Self::Resume => "resume",
        }
    }

    /// Capability a provider needs before this strategy may be offered.
    /// Fresh needs none.
    pub fn required_capability(self) -> Option<Capability> {
        match self {
            Self::Fresh => None,
            Self::Continue => Some(Capability::Continue),
            Self::Resume => Some(Capability::Resume),
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "lowercase")]
pub enum RecoveryStrategy {
    Fresh,
    Continue,
    Resume { session_id: String },
}

impl RecoveryStrategy {
    pub fn kind(&self) -> StrategyKind {
        match self {
            Self::Fresh => StrategyKind::Fresh,
            Self::Continue => StrategyKind::Continue,
            Self::Resume { .. } => StrategyKind::Resume,
        }
    }
}

// ─── Events ───────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolInvocation {
    pub invocation_id: String,
    pub name: String,
    /// Short human-readable rendering of the tool input.
    pub summary: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolOutcome {
    /// Id of the single [`ToolInvocation`] this outcome answers.
    pub invocation_id: String,
    pub tool_name: Option<String>,
    pub text: String,
    pub is_error: bool,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnOutcome {
    Completed,
    Failed,
    Cancelled,
    /// Heuristics could not tell. Never coerced into one of the others.
    #[default]
    Unknown,
}

/// Normalized event produced by transcripts, the terminal and the event feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    AssistantMessage {
        text: String,
        #[serde(default)]
        thinking: bool,
    },
    UserMessage {
        text: String,
    },
    ToolInvocation(ToolInvocation),
    ToolOutcome(ToolOutcome),
    StatusChange {
        status: Option<String>,
        label: Option<String>,
    },
    InteractivePrompt {
        name: String,
        content: String,
        pane_id: Option<String>,
    },
    SubagentStart {
        subagent_id: String,
        name: Option<String>,
        description: Option<String>,
    },
    SubagentStop {
        subagent_id: String,
    },
    TaskCompleted {
        subject: String,
        completed_by: Option<String>,
    },
    TurnEnd {
        outcome: TurnOutcome,
    },
}

impl AgentEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::AssistantMessage { .. } => "assistant_message",
            Self::UserMessage { .. } => "user_message",
            Self::ToolInvocation(_) => "tool_invocation",
            Self::ToolOutcome(_) => "tool_outcome",
            Self::StatusChange { .. } => "status_change",
            Self::InteractivePrompt { .. } => "interactive_prompt",
            Self::SubagentStart { .. } => "subagent_start",
            Self::SubagentStop { .. } => "subagent_stop",
            Self::TaskCompleted { .. } => "task_completed",
            Self::TurnEnd { .. } => "turn_end",
        }
    }
}

// ─── Bindings ─────────────────────────────────────────────────────

/// One agent conversation bound to a window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionReference {
    pub session_id: String,
    pub working_directory: PathBuf,
    #[serde(default)]
    pub provider: ProviderKind,
    #[serde(default)]
    pub transcript_path: Option<PathBuf>,
}

/// Persisted per-window metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowState {
    pub window_id: String,
    pub working_directory: PathBuf,
    #[serde(default)]
    pub provider: ProviderKind,
    #[serde(default)]
    pub display_name: String,
    /// Byte offset for incremental providers, message count otherwise.
    #[serde(default)]
    pub read_offset: u64,
    #[serde(default)]
    pub bound_at: Option<DateTime<Utc>>,
}

impl WindowState {
    pub fn new(
        window_id: impl Into<String>,
        working_directory: impl Into<PathBuf>,
        provider: ProviderKind,
        display_name: impl Into<String>,
    ) -> Self {
        Self {
            window_id: window_id.into(),
            working_directory: working_directory.into(),
            provider,
            display_name: display_name.into(),
            read_offset: 0,
            bound_at: None,
        }
    }
}

/// tmux window ids look like `@12`.
pub fn is_window_id(key: &str) -> bool {
    key.strip_prefix('@')
        .is_some_and(|rest| !rest.is_empty() && rest.bytes().all(|b| b.is_ascii_digit()))
}

// ─── Tests ────────────────────────────────────────────────────────
