//! Pane capture with escape sequences preserved.

use crate::error::TmuxError;
use crate::executor::TmuxCommandRunner;

/// Raw pane content plus the dimensions it was rendered at.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Capture {
    pub bytes: Vec<u8>,
    pub rows: u16,
    pub cols: u16,
}

/// Capture the visible screen of a pane, including SGR escape codes.
///
/// Fails with [`TmuxError::NotFound`] when the pane no longer exists.
pub fn capture_pane(runner: &impl TmuxCommandRunner, pane_id: &str) -> Result<Capture, TmuxError> {
    let dims = runner.run(&[
        "display-message",
        "-p",
        "-t",
        pane_id,
        "#{pane_height}\t#{pane_width}",
    ])?;
    let (rows, cols) = parse_dimensions(&dims);
    let output = runner.run(&["capture-pane", "-e", "-p", "-t", pane_id])?;
    Ok(Capture {
        bytes: output.into_bytes(),
        rows,
        cols,
    })
}

fn parse_dimensions(output: &str) -> (u16, u16) {
    let mut parts = output.trim().split('\t');
    let rows = parts.next().and_then(|s| s.parse().ok()).unwrap_or(24);
    let cols = parts.next().and_then(|s| s.parse().ok()).unwrap_or(80);
    (rows, cols)
}
