//! CLI definition using clap derive.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "ccrelay", about = "Relay terminal coding agents to a chat client")]
pub struct Cli {
    /// State directory (default: ~/.ccrelay)
    #[arg(long, env = "CCRELAY_DIR", global = true)]
    pub state_dir: Option<PathBuf>,

    /// tmux session that holds the agent windows
    #[arg(long, env = "CCRELAY_TMUX_SESSION", default_value = "ccrelay", global = true)]
    pub tmux_session: String,

    /// tmux server socket: a path, or a name as for `tmux -L`
    #[arg(long, env = "CCRELAY_TMUX_SOCKET", global = true)]
    pub tmux_socket: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the engine until interrupted
    Daemon(DaemonOpts),
    /// Append a hook payload from stdin to the event feed
    Hook,
    /// Print persisted window bindings as JSON
    Status,
}

#[derive(Debug, Clone, Args)]
pub struct DaemonOpts {
    /// Poll interval in milliseconds
    #[arg(long, env = "CCRELAY_POLL_INTERVAL_MS", default_value_t = 1500)]
    pub poll_interval_ms: u64,

    /// Provider assumed for windows bound from the event feed
    #[arg(long, env = "CCRELAY_PROVIDER", default_value = "claude")]
    pub provider: String,

    /// Claude transcript root (default: ~/.claude/projects)
    #[arg(long, env = "CCRELAY_CLAUDE_PROJECTS")]
    pub claude_projects: Option<PathBuf>,

    /// Codex transcript root (default: ~/.codex/sessions)
    #[arg(long, env = "CCRELAY_CODEX_SESSIONS")]
    pub codex_sessions: Option<PathBuf>,

    /// Gemini transcript root (default: ~/.gemini/tmp)
    #[arg(long, env = "CCRELAY_GEMINI_TMP")]
    pub gemini_tmp: Option<PathBuf>,
}
