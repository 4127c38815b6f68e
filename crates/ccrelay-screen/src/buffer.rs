//! Terminal screen emulation over `vt100`.
//!
//! Captured pane bytes carry SGR escapes and bare `\n` line breaks. The buffer
//! replays them on a fresh screen and exposes escape-free rows plus the cursor.

use vt100::Parser;

/// Rendered snapshot of one capture. Recomputed every cycle.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TerminalFrame {
    pub lines: Vec<String>,
    pub cursor_row: u16,
    pub cursor_col: u16,
    pub rows: u16,
    pub cols: u16,
}

impl TerminalFrame {
    /// Frame built from already-rendered text. The cursor sits after the
    /// last non-blank line.
    pub fn from_lines<S: AsRef<str>>(lines: &[S]) -> Self {
        let lines: Vec<String> = lines.iter().map(|l| l.as_ref().to_string()).collect();
        let cursor_row = lines
            .iter()
            .rposition(|l| !l.trim().is_empty())
            .unwrap_or(0);
        let cols = lines.iter().map(|l| l.chars().count()).max().unwrap_or(0);
        Self {
            cursor_row: clamp_u16(cursor_row),
            cursor_col: 0,
            rows: clamp_u16(lines.len()),
            cols: clamp_u16(cols),
            lines,
        }
    }

    pub fn from_text(text: &str) -> Self {
        let lines: Vec<&str> = text.lines().collect();
        Self::from_lines(&lines)
    }
}

fn clamp_u16(n: usize) -> u16 {
    u16::try_from(n).unwrap_or(u16::MAX)
}

/// Terminal screen state for one pane.
pub struct ScreenBuffer {
    parser: Parser,
    rows: u16,
    cols: u16,
}

impl ScreenBuffer {
    pub fn new(rows: u16, cols: u16) -> Self {
        let rows = rows.max(1);
        let cols = cols.max(1);
        Self {
            parser: Parser::new(rows, cols, 0),
            rows,
            cols,
        }
    }

    pub fn size(&self) -> (u16, u16) {
        (self.rows, self.cols)
    }

    pub fn resize(&mut self, rows: u16, cols: u16) {
        let rows = rows.max(1);
        let cols = cols.max(1);
        if rows == self.rows && cols == self.cols {
            return;
        }
        self.rows = rows;
        self.cols = cols;
        self.parser.set_size(rows, cols);
    }

    /// Replace the screen with one full capture.
    pub fn feed(&mut self, raw: &[u8]) {
        // Clear screen and home the cursor; each capture is a whole frame.
        self.parser.process(b"\x1b[0m\x1b[H\x1b[2J");
        self.parser.process(&normalize_newlines(raw));
    }

    /// Escape-free rows, trailing whitespace removed.
    pub fn rendered_lines(&self) -> Vec<String> {
        self.parser
            .screen()
            .rows(0, self.cols)
            .take(self.rows as usize)
            .map(|row| row.trim_end().to_string())
            .collect()
    }

    /// `(row, col)`, zero-based.
    pub fn cursor_position(&self) -> (u16, u16) {
        self.parser.screen().cursor_position()
    }

    pub fn frame(&self) -> TerminalFrame {
        let (cursor_row, cursor_col) = self.cursor_position();
        TerminalFrame {
            lines: self.rendered_lines(),
            cursor_row,
            cursor_col,
            rows: self.rows,
            cols: self.cols,
        }
    }
}

impl std::fmt::Debug for ScreenBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScreenBuffer")
            .field("rows", &self.rows)
            .field("cols", &self.cols)
            .finish_non_exhaustive()
    }
}

/// tmux separates captured rows with bare `\n`. The emulator needs `\r\n`,
/// and the final separator would scroll the top row away.
fn normalize_newlines(raw: &[u8]) -> Vec<u8> {
    let raw = raw.strip_suffix(b"\n").unwrap_or(raw);
    let mut out = Vec::with_capacity(raw.len() + raw.len() / 16);
    let mut prev = 0u8;
    for &b in raw {
        if b == b'\n' && prev != b'\r' {
            out.push(b'\r');
        }
        out.push(b);
        prev = b;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_escape_codes() {
        let mut screen = ScreenBuffer::new(5, 40);
        screen.feed(b"\x1b[1;32mhello\x1b[0m world\n\x1b[31msecond\x1b[0m\n");
        let lines = screen.rendered_lines();
        assert_eq!(lines[0], "hello world");
        assert_eq!(lines[1], "second");
        assert_eq!(lines.len(), 5);
    }

    #[test]
    fn full_height_capture_keeps_first_row() {
        let mut screen = ScreenBuffer::new(3, 10);
        screen.feed(b"one\ntwo\nthree\n");
        assert_eq!(screen.rendered_lines(), vec!["one", "two", "three"]);
    }

    #[test]
    fn feed_replaces_previous_frame() {
        let mut screen = ScreenBuffer::new(4, 20);
        screen.feed(b"first frame\nmore text\n");
        screen.feed(b"second\n");
        let lines = screen.rendered_lines();
        assert_eq!(lines[0], "second");
        assert_eq!(lines[1], "");
    }

    #[test]
    fn cursor_follows_last_write() {
        let mut screen = ScreenBuffer::new(6, 20);
        screen.feed(b"a\nb\n> typed");
        assert_eq!(screen.cursor_position(), (2, 7));
        let frame = screen.frame();
        assert_eq!(frame.cursor_row, 2);
        assert_eq!(frame.rows, 6);
        assert_eq!(frame.cols, 20);
    }

    #[test]
    fn resize_changes_frame_dimensions() {
        let mut screen = ScreenBuffer::new(4, 10);
        screen.resize(8, 30);
        screen.feed(b"x\n");
        assert_eq!(screen.size(), (8, 30));
        assert_eq!(screen.rendered_lines().len(), 8);
    }

    #[test]
    fn frame_from_text_places_cursor_on_last_content() {
        let frame = TerminalFrame::from_text("a\nb\n\n");
        assert_eq!(frame.cursor_row, 1);
        assert_eq!(frame.lines.len(), 3);
    }

    #[test]
    fn normalize_keeps_existing_crlf() {
        assert_eq!(normalize_newlines(b"a\r\nb\nc\n"), b"a\r\nb\r\nc".to_vec());
    }
}
