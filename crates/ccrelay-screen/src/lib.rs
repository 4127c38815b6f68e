//! ccrelay-screen: terminal emulation and screen heuristics.
//!
//! Turns captured pane bytes into rendered rows, then reads agent status,
//! interactive prompts and turn outcomes from them. Everything here is pure
//! over a frame; no I/O.

pub mod buffer;
pub mod chrome;
pub mod glyph;
pub mod interpreter;
pub mod prompt;
pub mod status;

pub use buffer::{ScreenBuffer, TerminalFrame};
pub use chrome::{find_chrome_boundary, is_separator, strip_chrome};
pub use glyph::classify_spinner_glyph;
pub use interpreter::{StatusLine, TerminalInterpreter, TerminalSignal};
pub use prompt::{PromptContent, extract_interactive_prompt};
pub use status::{classify_turn_outcome, extract_status_line, format_status_label};
