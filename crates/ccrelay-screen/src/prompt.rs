//! Interactive prompt detection (permission dialogs, selection menus).
//!
//! Each [`UiPattern`] brackets a screen region between a top and a bottom
//! marker line. Patterns are tried in table order; first match wins.

use ccrelay_core::ProviderKind;

use crate::buffer::TerminalFrame;

// ─── Markers ─────────────────────────────────────────────────────

/// One line test. Leading whitespace is ignored by every variant except
/// [`Marker::Contains`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Marker {
    /// Line starts with the text.
    Prefix(&'static str),
    /// Text appears anywhere on the line.
    Contains(&'static str),
    /// Line starts with the first text, then (after spaces) any of the rest.
    PrefixThen(&'static str, &'static [&'static str]),
    /// A numbered option such as `3. No`.
    NumberedOption(&'static str),
}

impl Marker {
    pub fn matches(&self, line: &str) -> bool {
        let trimmed = line.trim_start();
        match *self {
            Self::Prefix(p) => trimmed.starts_with(p),
            Self::Contains(p) => line.contains(p),
            Self::PrefixThen(head, tails) => trimmed
                .strip_prefix(head)
                .filter(|rest| rest.starts_with(char::is_whitespace))
                .map(str::trim_start)
                .filter(|rest| !rest.is_empty())
                .is_some_and(|rest| tails.iter().any(|t| rest.starts_with(t))),
            Self::NumberedOption(word) => {
                let digits = trimmed.bytes().take_while(u8::is_ascii_digit).count();
                if digits == 0 {
                    return false;
                }
                let Some(rest) = trimmed[digits..].strip_prefix('.') else {
                    return false;
                };
                if !rest.starts_with(char::is_whitespace) {
                    return false;
                }
                let rest = rest.trim_start();
                rest.strip_prefix(word)
                    .is_some_and(|after| after.chars().next().is_none_or(|c| !c.is_alphanumeric()))
            }
        }
    }
}

// ─── Patterns ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
pub struct UiPattern {
    pub name: &'static str,
    pub top: &'static [Marker],
    /// Empty means the region runs to the last non-blank line.
    pub bottom: &'static [Marker],
    /// Minimum distance in lines from top to bottom.
    pub min_gap: usize,
    /// Non-blank lines above the top marker to include as context.
    pub context_above: usize,
}

const CHECKBOXES: &[&str] = &["☐", "✔", "☒"];

/// Claude Code dialogs. The structural catch-all must stay last.
pub const CLAUDE_PATTERNS: &[UiPattern] = &[
    UiPattern {
        name: "ExitPlanMode",
        top: &[
            Marker::Prefix("Would you like to proceed?"),
            Marker::Prefix("Claude has written up a plan"),
        ],
        bottom: &[
            Marker::Prefix("ctrl-g to edit in "),
            Marker::Prefix("Esc to cancel"),
            Marker::Prefix("Esc to exit"),
        ],
        min_gap: 2,
        context_above: 0,
    },
    UiPattern {
        name: "AskUserQuestion",
        top: &[Marker::PrefixThen("←", CHECKBOXES)],
        bottom: &[],
        min_gap: 1,
        context_above: 0,
    },
    UiPattern {
        name: "AskUserQuestion",
        top: &[
            Marker::Prefix("☐"),
            Marker::Prefix("✔"),
            Marker::Prefix("☒"),
        ],
        bottom: &[Marker::Prefix("Enter to select")],
        min_gap: 1,
        context_above: 0,
    },
    UiPattern {
        name: "PermissionPrompt",
        top: &[Marker::Prefix("Do you want to proceed?")],
        bottom: &[Marker::Prefix("Esc to cancel")],
        min_gap: 2,
        context_above: 0,
    },
    UiPattern {
        name: "RestoreCheckpoint",
        top: &[Marker::Prefix("Restore the code")],
        bottom: &[Marker::Prefix("Enter to continue")],
        min_gap: 2,
        context_above: 0,
    },
    UiPattern {
        name: "Settings",
        top: &[Marker::Prefix("Settings:")],
        bottom: &[Marker::Contains("Esc to cancel"), Marker::Prefix("Type to filter")],
        min_gap: 2,
        context_above: 0,
    },
    UiPattern {
        name: "SelectModel",
        top: &[Marker::Prefix("Select model")],
        bottom: &[Marker::Contains("Enter to confirm")],
        min_gap: 2,
        context_above: 0,
    },
    UiPattern {
        name: "SelectionUI",
        top: &[Marker::PrefixThen("❯", &[""])],
        bottom: &[
            Marker::Prefix("Esc to cancel"),
            Marker::Prefix("Esc to exit"),
            Marker::Prefix("Enter to select"),
            Marker::Prefix("Enter to confirm"),
            Marker::Prefix("Enter to continue"),
            Marker::Prefix("ctrl-g to edit"),
        ],
        min_gap: 1,
        context_above: 10,
    },
];

/// Gemini CLI tool confirmation. The last option always ends in `(esc`.
pub const GEMINI_PATTERNS: &[UiPattern] = &[UiPattern {
    name: "PermissionPrompt",
    top: &[Marker::Prefix("Action Required")],
    bottom: &[Marker::Contains("(esc"), Marker::NumberedOption("No")],
    min_gap: 2,
    context_above: 0,
}];

/// Codex draws approvals inline with no stable markers; it reuses the
/// structural selection pattern.
pub const CODEX_PATTERNS: &[UiPattern] = &[UiPattern {
    name: "SelectionUI",
    top: &[Marker::PrefixThen("›", &[""]), Marker::PrefixThen("❯", &[""])],
    bottom: &[Marker::Contains("esc to cancel"), Marker::Contains("Esc to cancel")],
    min_gap: 1,
    context_above: 10,
}];

pub fn patterns_for(provider: ProviderKind) -> &'static [UiPattern] {
    match provider {
        ProviderKind::Claude => CLAUDE_PATTERNS,
        ProviderKind::Codex => CODEX_PATTERNS,
        ProviderKind::Gemini => GEMINI_PATTERNS,
    }
}

// ─── Extraction ──────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptContent {
    pub name: &'static str,
    pub content: String,
}

/// Find the first pattern whose region appears in `lines`.
pub fn extract_from_lines<S: AsRef<str>>(
    lines: &[S],
    patterns: &[UiPattern],
) -> Option<PromptContent> {
    let lines: Vec<&str> = lines.iter().map(|l| l.as_ref()).collect();
    if lines.is_empty() {
        return None;
    }
    patterns.iter().find_map(|p| try_extract(&lines, p))
}

/// Prompt detection on a rendered frame.
///
/// Trailing blank rows are dropped, but never above the cursor row.
pub fn extract_interactive_prompt(
    frame: &TerminalFrame,
    provider: ProviderKind,
) -> Option<PromptContent> {
    let cursor = usize::from(frame.cursor_row);
    let last_content = frame.lines.iter().rposition(|l| !l.trim().is_empty());
    let end = match last_content {
        Some(i) if i > cursor => i + 1,
        _ => (cursor + 1).min(frame.lines.len()),
    };
    extract_from_lines(&frame.lines[..end], patterns_for(provider))
}

fn try_extract(lines: &[&str], pattern: &UiPattern) -> Option<PromptContent> {
    let top_idx = lines
        .iter()
        .position(|l| pattern.top.iter().any(|m| m.matches(l)))?;

    let bottom_idx = if pattern.bottom.is_empty() {
        (top_idx + 1..lines.len())
            .rev()
            .find(|&i| !lines[i].trim().is_empty())?
    } else {
        (top_idx + 1..lines.len()).find(|&i| pattern.bottom.iter().any(|m| m.matches(lines[i])))?
    };

    if bottom_idx - top_idx < pattern.min_gap {
        return None;
    }

    let start = context_start(lines, top_idx, pattern.context_above);
    let content = lines[start..=bottom_idx].join("\n");
    Some(PromptContent {
        name: pattern.name,
        content: shorten_separators(content.trim_end()),
    })
}

/// First non-blank line within `context_above` rows above `top_idx`.
fn context_start(lines: &[&str], top_idx: usize, context_above: usize) -> usize {
    if context_above == 0 {
        return top_idx;
    }
    (top_idx.saturating_sub(context_above)..top_idx)
        .find(|&k| !lines[k].trim().is_empty())
        .unwrap_or(top_idx)
}

/// Collapse long `─` rules so the prompt reads well at any width.
fn shorten_separators(text: &str) -> String {
    text.split('\n')
        .map(|line| {
            if line.chars().count() >= 5 && line.chars().all(|c| c == '─') {
                "─────"
            } else {
                line
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}
