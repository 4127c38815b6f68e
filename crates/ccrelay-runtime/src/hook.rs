//! `ccrelay hook`: turn a hook payload on stdin into a feed record.
//!
//! Runs inside the agent's pane. Payloads for other tmux sessions and hook
//! events the engine does not read are skipped silently.

use std::io::Read;

use anyhow::Context;
use ccrelay_feed::{FeedWriter, HookPayloadError, from_hook_payload};
use ccrelay_tmux::TmuxCommandRunner;
use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::cli::Cli;
use crate::config::{build_executor, home_dir, state_paths};

pub fn run_hook(cli: &Cli) -> anyhow::Result<()> {
    let Ok(pane) = std::env::var("TMUX_PANE") else {
        return Ok(());
    };
    let mut raw = String::new();
    std::io::stdin()
        .read_to_string(&mut raw)
        .context("reading hook payload")?;
    let payload: Value = serde_json::from_str(&raw).context("hook payload is not JSON")?;

    let paths = state_paths(cli, &home_dir()?);
    let runner = build_executor(cli.tmux_socket.as_deref());
    let writer = FeedWriter::new(paths.feed_file());
    record_hook(&runner, &pane, &cli.tmux_session, &payload, &writer, Utc::now())?;
    Ok(())
}

/// Append a record for `payload` if the pane belongs to `session`.
/// Returns whether a record was written.
pub fn record_hook(
    runner: &dyn TmuxCommandRunner,
    pane: &str,
    session: &str,
    payload: &Value,
    writer: &FeedWriter,
    at: DateTime<Utc>,
) -> anyhow::Result<bool> {
    let out = runner
        .run(&[
            "display-message",
            "-p",
            "-t",
            pane,
            "#{session_name}\t#{window_id}\t#{window_name}",
        ])
        .with_context(|| format!("resolving pane {pane}"))?;
    let mut fields = out.trim_end_matches('\n').splitn(3, '\t');
    let (Some(pane_session), Some(window_id), name) = (fields.next(), fields.next(), fields.next())
    else {
        anyhow::bail!("unexpected display-message output: {out:?}");
    };
    if pane_session != session {
        return Ok(false);
    }

    let key = format!("{session}:{window_id}");
    let record = match from_hook_payload(payload, &key, name.unwrap_or_default(), at) {
        Ok(record) => record,
        Err(HookPayloadError::Unhandled(_)) => return Ok(false),
        Err(e) => return Err(e.into()),
    };
    writer
        .append(&record)
        .with_context(|| format!("appending to {}", writer.path().display()))?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ccrelay_feed::FeedRecord;
    use ccrelay_tmux::TmuxError;
    use serde_json::json;
    use std::sync::Mutex;
    use tempfile::TempDir;

    struct FakeRunner {
        output: &'static str,
        calls: Mutex<Vec<Vec<String>>>,
    }

    impl FakeRunner {
        fn new(output: &'static str) -> Self {
            Self {
                output,
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    impl TmuxCommandRunner for FakeRunner {
        fn run(&self, args: &[&str]) -> Result<String, TmuxError> {
            self.calls
                .lock()
                .expect("lock")
                .push(args.iter().map(|a| a.to_string()).collect());
            Ok(self.output.to_string())
        }
    }

    fn feed_lines(writer: &FeedWriter) -> Vec<FeedRecord> {
        std::fs::read_to_string(writer.path())
            .unwrap_or_default()
            .lines()
            .map(|l| serde_json::from_str(l).expect("record"))
            .collect()
    }

    #[test]
    fn session_start_is_keyed_by_window() {
        let tmp = TempDir::new().expect("tempdir");
        let writer = FeedWriter::new(tmp.path().join("events.jsonl"));
        let runner = FakeRunner::new("ccrelay\t@4\tapi\n");
        let payload = json!({
            "hook_event_name": "SessionStart",
            "session_id": "abc-123",
            "cwd": "/work/api",
            "transcript_path": "/home/u/.claude/projects/-work-api/abc-123.jsonl",
        });

        let written = record_hook(&runner, "%7", "ccrelay", &payload, &writer, Utc::now())
            .expect("record");

        assert!(written);
        assert_eq!(runner.calls.lock().expect("lock")[0][3], "%7");
        let records = feed_lines(&writer);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].window_key, "ccrelay:@4");
        let start = records[0].session_start().expect("session start");
        assert_eq!(start.session_id, "abc-123");
        assert_eq!(start.window_name.as_deref(), Some("api"));
    }

    #[test]
    fn other_sessions_and_unknown_events_are_skipped() {
        let tmp = TempDir::new().expect("tempdir");
        let writer = FeedWriter::new(tmp.path().join("events.jsonl"));
        let stop = json!({"hook_event_name": "Stop", "session_id": "abc"});

        let foreign = FakeRunner::new("scratch\t@1\tmisc\n");
        assert!(!record_hook(&foreign, "%1", "ccrelay", &stop, &writer, Utc::now()).expect("ok"));

        let ours = FakeRunner::new("ccrelay\t@1\tmisc\n");
        let unknown = json!({"hook_event_name": "PreCompact", "session_id": "abc"});
        assert!(!record_hook(&ours, "%1", "ccrelay", &unknown, &writer, Utc::now()).expect("ok"));

        assert!(feed_lines(&writer).is_empty());
    }

    #[test]
    fn malformed_payload_is_an_error() {
        let tmp = TempDir::new().expect("tempdir");
        let writer = FeedWriter::new(tmp.path().join("events.jsonl"));
        let runner = FakeRunner::new("ccrelay\t@1\tmisc\n");
        let payload = json!({"hook_event_name": "Stop", "session_id": "../../etc"});
        assert!(record_hook(&runner, "%1", "ccrelay", &payload, &writer, Utc::now()).is_err());
    }
}
