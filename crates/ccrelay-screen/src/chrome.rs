//! Bottom chrome detection (prompt box, status bar) by separator rows.

/// Minimum run of `─` for a row to count as a separator.
pub const MIN_SEPARATOR_WIDTH: usize = 20;

/// Chrome rows between separators (prompt, mode bar) are short. Longer rows
/// are agent output.
pub const MAX_CHROME_LINE_WIDTH: usize = 80;

pub fn is_separator(line: &str) -> bool {
    let trimmed = line.trim();
    trimmed.chars().count() >= MIN_SEPARATOR_WIDTH && trimmed.chars().all(|c| c == '─')
}

/// Index of the topmost separator of the bottom chrome block.
///
/// Separators are walked bottom-up; the block grows upward while every row
/// between two separators is blank or short enough to be chrome. Only the
/// content itself is inspected, never the row count, so the result is the same
/// on a 24-row and a 200-row terminal.
pub fn find_chrome_boundary<S: AsRef<str>>(lines: &[S]) -> Option<usize> {
    let lines: Vec<&str> = lines.iter().map(|l| l.as_ref()).collect();
    let mut separators = lines
        .iter()
        .enumerate()
        .rev()
        .filter(|(_, l)| is_separator(l))
        .map(|(i, _)| i);

    let mut boundary = separators.next()?;
    for idx in separators {
        let gap_is_chrome = lines[idx + 1..boundary].iter().all(|l| {
            let t = l.trim();
            t.is_empty() || t.chars().count() <= MAX_CHROME_LINE_WIDTH
        });
        if !gap_is_chrome {
            break;
        }
        boundary = idx;
    }
    Some(boundary)
}

/// Rows above the chrome block. Returns all rows when there is no chrome.
pub fn strip_chrome<S: AsRef<str>>(lines: &[S]) -> &[S] {
    match find_chrome_boundary(lines) {
        Some(boundary) => &lines[..boundary],
        None => lines,
    }
}
