//! Runtime configuration resolved from CLI flags and the environment.
//!
//! This is the only place that reads the environment; engine constructors
//! receive plain config structs.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use ccrelay_core::ProviderKind;
use ccrelay_engine::{AlertConfig, DispatcherConfig, RecoveryConfig, ScanConfig};
use ccrelay_tmux::TmuxExecutor;
use ccrelay_transcript::TranscriptRoots;

use crate::cli::{Cli, DaemonOpts};

pub const STATE_FILE: &str = "state.json";
pub const FEED_FILE: &str = "events.jsonl";
pub const FEED_CURSOR_FILE: &str = "feed_offset.json";

/// Paths shared by every subcommand.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatePaths {
    pub dir: PathBuf,
}

impl StatePaths {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    pub fn state_file(&self) -> PathBuf {
        self.dir.join(STATE_FILE)
    }

    pub fn feed_file(&self) -> PathBuf {
        self.dir.join(FEED_FILE)
    }

    pub fn feed_cursor(&self) -> PathBuf {
        self.dir.join(FEED_CURSOR_FILE)
    }
}

#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub paths: StatePaths,
    pub tmux_session: String,
    pub tmux_socket: Option<String>,
    pub poll_interval: Duration,
    /// Provider for windows first seen through the event feed.
    pub feed_provider: ProviderKind,
    pub roots: TranscriptRoots,
    pub recovery: RecoveryConfig,
    pub dispatcher: DispatcherConfig,
    pub alerts: AlertConfig,
    pub scan: ScanConfig,
}

impl RuntimeConfig {
    pub fn from_cli(cli: &Cli, opts: &DaemonOpts) -> anyhow::Result<Self> {
        let home = home_dir()?;
        let feed_provider = opts
            .provider
            .parse::<ProviderKind>()
            .with_context(|| format!("invalid --provider {:?}", opts.provider))?;
        let defaults = TranscriptRoots::under_home(&home);
        let roots = TranscriptRoots {
            claude_projects: opts.claude_projects.clone().unwrap_or(defaults.claude_projects),
            codex_sessions: opts.codex_sessions.clone().unwrap_or(defaults.codex_sessions),
            gemini_tmp: opts.gemini_tmp.clone().unwrap_or(defaults.gemini_tmp),
        };
        Ok(Self {
            paths: state_paths(cli, &home),
            tmux_session: cli.tmux_session.clone(),
            tmux_socket: cli.tmux_socket.clone(),
            poll_interval: Duration::from_millis(opts.poll_interval_ms.max(100)),
            feed_provider,
            roots,
            recovery: RecoveryConfig {
                commands: command_overrides(|k| std::env::var(k).ok()),
                ..RecoveryConfig::default()
            },
            dispatcher: DispatcherConfig::default(),
            alerts: AlertConfig::default(),
            scan: ScanConfig::default(),
        })
    }
}

pub fn home_dir() -> anyhow::Result<PathBuf> {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .context("HOME is not set")
}

pub fn state_paths(cli: &Cli, home: &Path) -> StatePaths {
    StatePaths::new(
        cli.state_dir
            .clone()
            .unwrap_or_else(|| home.join(".ccrelay")),
    )
}

/// A socket containing `/` is a path (`-S`), anything else a name (`-L`).
pub fn build_executor(socket: Option<&str>) -> TmuxExecutor {
    match socket {
        Some(path) if path.contains('/') => TmuxExecutor::default().with_socket_path(path),
        Some(name) => TmuxExecutor::default().with_socket_name(name),
        None => TmuxExecutor::default(),
    }
}

/// `CCRELAY_<PROVIDER>_COMMAND` overrides, e.g. `CCRELAY_CLAUDE_COMMAND`.
pub fn command_overrides(lookup: impl Fn(&str) -> Option<String>) -> HashMap<ProviderKind, String> {
    ProviderKind::ALL
        .into_iter()
        .filter_map(|kind| {
            let key = format!("CCRELAY_{}_COMMAND", kind.as_str().to_ascii_uppercase());
            lookup(&key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .map(|v| (kind, v))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn overrides_read_per_provider() {
        let env: HashMap<&str, &str> = [
            ("CCRELAY_CLAUDE_COMMAND", "claude --model opus"),
            ("CCRELAY_GEMINI_COMMAND", "  "),
        ]
        .into_iter()
        .collect();
        let overrides = command_overrides(|k| env.get(k).map(|v| v.to_string()));
        assert_eq!(overrides.len(), 1);
        assert_eq!(
            overrides.get(&ProviderKind::Claude).map(String::as_str),
            Some("claude --model opus")
        );
    }

    #[test]
    fn socket_path_or_name() {
        use ccrelay_tmux::TmuxSocket;
        assert_eq!(
            build_executor(Some("/tmp/relay.sock")).socket(),
            &TmuxSocket::Path("/tmp/relay.sock".into())
        );
        assert_eq!(
            build_executor(Some("relay")).socket(),
            &TmuxSocket::Name("relay".into())
        );
        assert_eq!(build_executor(None).socket(), &TmuxSocket::Default);
    }

    #[test]
    fn state_files_live_in_state_dir() {
        let cli = Cli::try_parse_from(["ccrelay", "status", "--state-dir", "/srv/relay"])
            .expect("parse");
        let paths = state_paths(&cli, Path::new("/home/u"));
        assert_eq!(paths.state_file(), PathBuf::from("/srv/relay/state.json"));
        assert_eq!(paths.feed_file(), PathBuf::from("/srv/relay/events.jsonl"));
        assert_eq!(paths.feed_cursor(), PathBuf::from("/srv/relay/feed_offset.json"));
    }
}
