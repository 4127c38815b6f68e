//! ccrelay-tmux: tmux backend IO boundary.
//! Subprocess execution, window/pane listing, capture and key injection.
//! No business logic.

pub mod capture;
pub mod controller;
pub mod error;
pub mod executor;
pub mod pane_info;

pub use capture::{Capture, capture_pane};
pub use controller::{TerminalSource, TmuxController, WindowController};
pub use error::TmuxError;
pub use executor::{TmuxCommandRunner, TmuxExecutor, TmuxSocket};
pub use pane_info::{PaneInfo, WindowInfo, is_shell_command};
