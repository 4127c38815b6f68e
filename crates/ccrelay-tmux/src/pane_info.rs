//! Pane and window metadata, `-F` format strings and their parsers.

use serde::{Deserialize, Serialize};

use crate::error::TmuxError;

/// Tab-delimited format string for `tmux list-panes -F`.
pub const LIST_PANES_FORMAT: &str = "#{window_id}\t#{window_name}\t#{pane_id}\t#{pane_current_command}\t#{pane_current_path}\t#{pane_title}\t#{pane_width}\t#{pane_height}\t#{pane_active}";

/// Tab-delimited format string for `tmux list-windows -F`.
pub const LIST_WINDOWS_FORMAT: &str =
    "#{window_id}\t#{window_name}\t#{pane_current_path}\t#{pane_current_command}";

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PaneInfo {
    pub window_id: String,
    pub window_name: String,
    pub pane_id: String,
    pub current_cmd: String,
    pub current_path: String,
    pub pane_title: String,
    pub width: u16,
    pub height: u16,
    pub active: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct WindowInfo {
    pub window_id: String,
    pub window_name: String,
    /// Working directory of the window's active pane.
    pub current_path: String,
    pub current_cmd: String,
}

/// Known interactive shells. A window whose pane runs one of these has no
/// live agent process.
const SHELL_CMDS: &[&str] = &[
    "zsh", "bash", "fish", "sh", "csh", "tcsh", "ksh", "dash", "nu", "pwsh",
];

pub fn is_shell_command(current_cmd: &str) -> bool {
    let lower = current_cmd.trim().to_ascii_lowercase();
    let lower = lower.trim_start_matches('-');
    SHELL_CMDS.iter().any(|&s| lower == s)
}

pub fn parse_list_panes_output(output: &str) -> Result<Vec<PaneInfo>, TmuxError> {
    parse_lines(output, parse_pane_line)
}

pub fn parse_list_windows_output(output: &str) -> Result<Vec<WindowInfo>, TmuxError> {
    parse_lines(output, parse_window_line)
}

fn parse_lines<T>(
    output: &str,
    parse: fn(&str, usize) -> Result<T, TmuxError>,
) -> Result<Vec<T>, TmuxError> {
    let mut items = Vec::new();
    for (idx, line) in output.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        items.push(parse(line, idx + 1)?);
    }
    Ok(items)
}

fn parse_pane_line(line: &str, line_num: usize) -> Result<PaneInfo, TmuxError> {
    let parts: Vec<&str> = line.split('\t').collect();
    if parts.len() < 9 {
        return Err(TmuxError::ParseError {
            line_num,
            detail: format!("expected 9 tab-separated fields, got {}", parts.len()),
        });
    }

    Ok(PaneInfo {
        window_id: parts[0].to_string(),
        window_name: parts[1].to_string(),
        pane_id: parts[2].to_string(),
        current_cmd: parts[3].to_string(),
        current_path: parts[4].to_string(),
        pane_title: parts[5].to_string(),
        width: parts[6].trim().parse::<u16>().unwrap_or(80),
        height: parts[7].trim().parse::<u16>().unwrap_or(24),
        active: parse_bool(parts[8]),
    })
}

fn parse_window_line(line: &str, line_num: usize) -> Result<WindowInfo, TmuxError> {
    let parts: Vec<&str> = line.split('\t').collect();
    if parts.len() < 2 {
        return Err(TmuxError::ParseError {
            line_num,
            detail: format!("expected at least 2 tab-separated fields, got {}", parts.len()),
        });
    }
    let field = |i: usize| parts.get(i).map(|s| s.to_string()).unwrap_or_default();

    Ok(WindowInfo {
        window_id: field(0),
        window_name: field(1),
        current_path: field(2),
        current_cmd: field(3),
    })
}

fn parse_bool(s: &str) -> bool {
    matches!(s.trim(), "1" | "true")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_single_pane() {
        let line = "@0\tproject-x\t%0\tclaude\t/home/user/p\tclaude code\t200\t50\t1";
        let pane = parse_pane_line(line, 1).expect("should parse");
        assert_eq!(pane.window_id, "@0");
        assert_eq!(pane.window_name, "project-x");
        assert_eq!(pane.pane_id, "%0");
        assert_eq!(pane.current_cmd, "claude");
        assert_eq!(pane.current_path, "/home/user/p");
        assert_eq!(pane.width, 200);
        assert_eq!(pane.height, 50);
        assert!(pane.active);
    }

    #[test]
    fn parse_multiple_panes_skips_blank_lines() {
        let output = [
            "@0\tdev\t%0\tzsh\t/home\ttitle0\t200\t50\t1",
            "",
            "@0\tdev\t%1\tclaude\t/home\tclaude\t200\t50\t0",
        ]
        .join("\n");
        let panes = parse_list_panes_output(&output).expect("should parse");
        assert_eq!(panes.len(), 2);
        assert!(!panes[1].active);
    }

    #[test]
    fn parse_too_few_fields_error() {
        let err = parse_list_panes_output("@0\tdev\t%0").expect_err("too short");
        assert!(matches!(err, TmuxError::ParseError { line_num: 1, .. }));
    }

    #[test]
    fn parse_invalid_dimensions_default() {
        let line = "@0\tdev\t%0\tzsh\t/home\ttitle\tXX\tYY\t1";
        let pane = parse_pane_line(line, 1).expect("should parse");
        assert_eq!((pane.width, pane.height), (80, 24));
    }

    #[test]
    fn parse_windows() {
        let output = "@1\tproject-x\t/work/x\tclaude\n@4\tnotes\t/work/n\tzsh\n";
        let windows = parse_list_windows_output(output).expect("should parse");
        assert_eq!(windows.len(), 2);
        assert_eq!(windows[0].window_name, "project-x");
        assert_eq!(windows[1].current_cmd, "zsh");
    }

    #[test]
    fn parse_window_with_missing_trailing_fields() {
        let windows = parse_list_windows_output("@2\tbare").expect("should parse");
        assert_eq!(windows[0].current_path, "");
    }

    #[test]
    fn shell_detection() {
        for shell in ["zsh", "bash", "-zsh", "fish"] {
            assert!(is_shell_command(shell), "{shell} should be a shell");
        }
        assert!(!is_shell_command("claude"));
        assert!(!is_shell_command("node"));
    }
}
