//! Status line extraction, display labels and turn outcome heuristics.

use ccrelay_core::TurnOutcome;

use crate::chrome::{find_chrome_boundary, is_separator, strip_chrome};
use crate::glyph::classify_spinner_glyph;

// ─── Status Line ─────────────────────────────────────────────────

/// Text after the spinner glyph sitting just above the chrome separators.
///
/// Only separators inside the bottom chrome block are considered, so a
/// symbol-led line in agent output is never mistaken for a status.
pub fn extract_status_line<S: AsRef<str>>(lines: &[S]) -> Option<String> {
    let lines: Vec<&str> = lines.iter().map(|l| l.as_ref()).collect();
    let start = find_chrome_boundary(&lines)?;

    for i in (start..lines.len()).rev() {
        if !is_separator(lines[i]) {
            continue;
        }
        // Up to two rows above, skipping one blank.
        for offset in 1..=2 {
            let Some(j) = i.checked_sub(offset) else {
                break;
            };
            let candidate = lines[j].trim();
            if candidate.is_empty() {
                continue;
            }
            let mut chars = candidate.chars();
            let first = chars.next()?;
            if classify_spinner_glyph(first) {
                let rest = chars.as_str().trim();
                if !rest.is_empty() {
                    return Some(rest.to_string());
                }
            }
            break;
        }
    }
    None
}

// ─── Display Labels ──────────────────────────────────────────────

/// First keyword match wins: against the first word, then the whole text.
const STATUS_KEYWORDS: &[(&str, &str)] = &[
    ("think", "…thinking"),
    ("reason", "…thinking"),
    ("test", "…testing"),
    ("read", "…reading"),
    ("edit", "…editing"),
    ("writ", "…writing"),
    ("search", "…searching"),
    ("grep", "…searching"),
    ("glob", "…searching"),
    ("install", "…installing"),
    ("runn", "…running"),
    ("bash", "…running"),
    ("execut", "…running"),
    ("compil", "…building"),
    ("build", "…building"),
    ("compact", "…compacting"),
    ("lint", "…linting"),
    ("format", "…formatting"),
    ("fetch", "…fetching"),
    ("commit", "…committing"),
    ("debug", "…debugging"),
    ("creat", "…creating"),
    ("check", "…checking"),
    ("updat", "…updating"),
    ("analyz", "…analyzing"),
    ("pars", "…parsing"),
    ("verif", "…verifying"),
];

pub fn format_status_label(raw: &str) -> &'static str {
    let lower = raw.to_lowercase();
    let first_word = lower.split_whitespace().next().unwrap_or("");
    STATUS_KEYWORDS
        .iter()
        .find(|(kw, _)| first_word.contains(kw))
        .or_else(|| STATUS_KEYWORDS.iter().find(|(kw, _)| lower.contains(kw)))
        .map_or("…working", |&(_, label)| label)
}

// ─── Turn Outcome ────────────────────────────────────────────────

const CANCEL_MARKERS: &[&str] = &[
    "interrupted by user",
    "⎿  interrupted",
    "request interrupted",
    "conversation interrupted",
];

const FAILURE_MARKERS: &[&str] = &[
    "api error",
    "error:",
    "request failed",
    "rate limit",
    "✕",
];

/// Leading glyphs of a finished assistant reply (Claude, Codex, Gemini).
const REPLY_GLYPHS: &[char] = &['⏺', '•', '✦'];

/// How many rows above the chrome to inspect.
const OUTCOME_WINDOW: usize = 12;

/// Best-effort outcome of the turn that just went idle.
///
/// Returns [`TurnOutcome::Unknown`] whenever the tail is ambiguous.
pub fn classify_turn_outcome<S: AsRef<str>>(lines: &[S]) -> TurnOutcome {
    let lines: Vec<&str> = lines.iter().map(|l| l.as_ref()).collect();
    let body = strip_chrome(&lines);
    let tail: Vec<&str> = body
        .iter()
        .rev()
        .map(|l| l.trim())
        .filter(|l| !l.is_empty())
        .take(OUTCOME_WINDOW)
        .collect();
    if tail.is_empty() {
        return TurnOutcome::Unknown;
    }

    let lower: Vec<String> = tail.iter().map(|l| l.to_lowercase()).collect();
    if lower
        .iter()
        .any(|l| CANCEL_MARKERS.iter().any(|m| l.contains(m)))
    {
        return TurnOutcome::Cancelled;
    }
    // Failures only count near the bottom; older errors may have been retried.
    if lower
        .iter()
        .take(3)
        .any(|l| FAILURE_MARKERS.iter().any(|m| l.starts_with(m) || l.contains(&format!("⎿  {m}"))))
    {
        return TurnOutcome::Failed;
    }
    if tail
        .iter()
        .any(|l| l.chars().next().is_some_and(|c| REPLY_GLYPHS.contains(&c)))
    {
        return TurnOutcome::Completed;
    }
    TurnOutcome::Unknown
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sep() -> String {
        "─".repeat(50)
    }

    fn screen(body: &[&str], status: Option<&str>) -> Vec<String> {
        let mut lines: Vec<String> = body.iter().map(|s| s.to_string()).collect();
        if let Some(s) = status {
            lines.push(s.to_string());
            lines.push(String::new());
        }
        lines.push(sep());
        lines.push("❯ ".to_string());
        lines.push(sep());
        lines.push("  ⏵⏵ accept edits on".to_string());
        lines
    }

    #[test]
    fn status_above_chrome() {
        let lines = screen(&["⏺ Reading files"], Some("✻ Thinking… (esc to interrupt)"));
        assert_eq!(
            extract_status_line(&lines).as_deref(),
            Some("Thinking… (esc to interrupt)")
        );
    }

    #[test]
    fn braille_spinner_recognized() {
        let lines = screen(&["output"], Some("⠋ Running tests"));
        assert_eq!(extract_status_line(&lines).as_deref(), Some("Running tests"));
    }

    #[test]
    fn idle_screen_has_no_status() {
        let lines = screen(&["⏺ Done."], None);
        assert_eq!(extract_status_line(&lines), None);
    }

    #[test]
    fn symbol_in_body_is_not_status() {
        // ⏺ is a symbol but sits far above the chrome with content between.
        let lines = screen(&["⏺ Wrote 3 files", "long explanation follows here"], None);
        assert_eq!(extract_status_line(&lines), None);
    }

    #[test]
    fn no_chrome_degrades_to_none() {
        let lines = vec!["✻ looks like status", "$ "];
        assert_eq!(extract_status_line(&lines), None);
        let empty: Vec<String> = Vec::new();
        assert_eq!(extract_status_line(&empty), None);
    }

    #[test]
    fn labels_prefer_first_word() {
        assert_eq!(format_status_label("Writing tests"), "…writing");
        assert_eq!(format_status_label("Thinking… (esc to interrupt)"), "…thinking");
        assert_eq!(format_status_label("Pondering the build"), "…building");
        assert_eq!(format_status_label("Flibbertigibbeting"), "…working");
        assert_eq!(format_status_label(""), "…working");
    }

    #[test]
    fn outcome_cancelled() {
        let lines = screen(&["⏺ Let me check", "  ⎿  Interrupted by user"], None);
        assert_eq!(classify_turn_outcome(&lines), TurnOutcome::Cancelled);
    }

    #[test]
    fn outcome_failed() {
        let lines = screen(&["⏺ Working on it", "API Error: 529 overloaded"], None);
        assert_eq!(classify_turn_outcome(&lines), TurnOutcome::Failed);
    }

    #[test]
    fn outcome_completed() {
        let lines = screen(&["> fix the bug", "⏺ Fixed the off-by-one in parser.rs."], None);
        assert_eq!(classify_turn_outcome(&lines), TurnOutcome::Completed);
    }

    #[test]
    fn outcome_unknown_when_ambiguous() {
        let lines = screen(&["some text without markers"], None);
        assert_eq!(classify_turn_outcome(&lines), TurnOutcome::Unknown);
        let empty: Vec<String> = Vec::new();
        assert_eq!(classify_turn_outcome(&empty), TurnOutcome::Unknown);
    }
}
