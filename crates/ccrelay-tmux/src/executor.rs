//! Blocking tmux subprocess runner.

use std::process::Command;
use std::sync::Arc;

use tracing::trace;

use crate::error::{TmuxError, stderr_indicates_missing};

/// Runs one tmux command and returns its stdout. Faked in tests.
pub trait TmuxCommandRunner: Send + Sync {
    fn run(&self, args: &[&str]) -> Result<String, TmuxError>;
}

impl<T: TmuxCommandRunner + ?Sized> TmuxCommandRunner for &T {
    fn run(&self, args: &[&str]) -> Result<String, TmuxError> {
        (**self).run(args)
    }
}

impl<T: TmuxCommandRunner + ?Sized> TmuxCommandRunner for Arc<T> {
    fn run(&self, args: &[&str]) -> Result<String, TmuxError> {
        (**self).run(args)
    }
}

/// Which tmux server to talk to.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum TmuxSocket {
    #[default]
    Default,
    /// `-S <path>`
    Path(String),
    /// `-L <name>`
    Name(String),
}

#[derive(Debug, Clone)]
pub struct TmuxExecutor {
    tmux_bin: String,
    socket: TmuxSocket,
}

impl TmuxExecutor {
    pub fn new(tmux_bin: impl Into<String>) -> Self {
        Self {
            tmux_bin: tmux_bin.into(),
            socket: TmuxSocket::Default,
        }
    }

    #[must_use]
    pub fn with_socket_path(mut self, path: impl Into<String>) -> Self {
        self.socket = TmuxSocket::Path(path.into());
        self
    }

    #[must_use]
    pub fn with_socket_name(mut self, name: impl Into<String>) -> Self {
        self.socket = TmuxSocket::Name(name.into());
        self
    }

    pub fn socket(&self) -> &TmuxSocket {
        &self.socket
    }

    fn command(&self, args: &[&str]) -> Command {
        let mut cmd = Command::new(&self.tmux_bin);
        match &self.socket {
            TmuxSocket::Default => {}
            TmuxSocket::Path(path) => {
                cmd.args(["-S", path]);
            }
            TmuxSocket::Name(name) => {
                cmd.args(["-L", name]);
            }
        }
        cmd.args(args);
        cmd
    }
}

impl Default for TmuxExecutor {
    fn default() -> Self {
        Self::new("tmux")
    }
}

impl TmuxCommandRunner for TmuxExecutor {
    fn run(&self, args: &[&str]) -> Result<String, TmuxError> {
        trace!(args = ?args, "tmux");
        let output = self.command(args).output()?;
        if output.status.success() {
            return Ok(String::from_utf8_lossy(&output.stdout).into_owned());
        }
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        if stderr_indicates_missing(&stderr) {
            return Err(TmuxError::NotFound(stderr));
        }
        let code = output
            .status
            .code()
            .map_or_else(|| "signal".to_string(), |c| c.to_string());
        let verb = args.first().copied().unwrap_or_default();
        Err(TmuxError::CommandFailed(format!("{verb} (exit {code}): {stderr}")))
    }
}
