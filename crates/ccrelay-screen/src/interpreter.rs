//! Per-provider reading of a rendered frame.

use ccrelay_core::{ProviderKind, TurnOutcome};

use crate::buffer::TerminalFrame;
use crate::prompt::{PromptContent, extract_interactive_prompt};
use crate::status::{classify_turn_outcome, extract_status_line, format_status_label};

/// Gemini sets the pane title to reflect activity.
const GEMINI_WORKING_GLYPH: char = '✦';
const GEMINI_ACTION_GLYPH: char = '✋';

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusLine {
    pub raw: String,
    pub label: &'static str,
}

/// What one frame says about the agent.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TerminalSignal {
    pub status: Option<StatusLine>,
    pub prompt: Option<PromptContent>,
}

impl TerminalSignal {
    /// The agent is busy or waiting on the user.
    pub fn is_active(&self) -> bool {
        self.status.is_some() || self.prompt.is_some()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct TerminalInterpreter {
    provider: ProviderKind,
}

impl TerminalInterpreter {
    pub fn new(provider: ProviderKind) -> Self {
        Self { provider }
    }

    pub fn provider(&self) -> ProviderKind {
        self.provider
    }

    pub fn interpret(&self, frame: &TerminalFrame, pane_title: &str) -> TerminalSignal {
        let prompt = extract_interactive_prompt(frame, self.provider);
        let status = extract_status_line(&frame.lines).map(|raw| StatusLine {
            label: format_status_label(&raw),
            raw,
        });

        match self.provider {
            ProviderKind::Gemini => self.apply_gemini_title(pane_title, status, prompt),
            _ => TerminalSignal { status, prompt },
        }
    }

    /// Outcome guess for a turn that just went idle.
    pub fn turn_outcome(&self, frame: &TerminalFrame) -> TurnOutcome {
        classify_turn_outcome(&frame.lines)
    }

    /// Gemini titles read `Working: ✦`, `Action Required: ✋` or `Ready: ◇`.
    fn apply_gemini_title(
        &self,
        pane_title: &str,
        status: Option<StatusLine>,
        prompt: Option<PromptContent>,
    ) -> TerminalSignal {
        if pane_title.contains(GEMINI_WORKING_GLYPH) {
            let status = status.unwrap_or_else(|| StatusLine {
                raw: "working".to_string(),
                label: "…working",
            });
            return TerminalSignal {
                status: Some(status),
                prompt: None,
            };
        }
        if prompt.is_none() && pane_title.contains(GEMINI_ACTION_GLYPH) {
            // The dialog may be scrolled off or drawn without markers.
            return TerminalSignal {
                status: None,
                prompt: Some(PromptContent {
                    name: "PermissionPrompt",
                    content: "Action Required".to_string(),
                }),
            };
        }
        TerminalSignal { status, prompt }
    }
}
