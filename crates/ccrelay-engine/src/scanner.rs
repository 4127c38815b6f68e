//! One poll cycle for one window: capture, interpret, alert.
//!
//! A [`WindowScanner`] is owned by exactly one scan task at a time. It turns
//! consecutive frames into change events and never touches the registry;
//! the coordinator applies its [`ScanReport`].

use ccrelay_core::{AgentEvent, Capability, CapabilityPolicy, EngineError, ProviderKind};
use ccrelay_screen::{ScreenBuffer, TerminalFrame, TerminalInterpreter};
use ccrelay_tmux::{PaneInfo, TerminalSource, is_shell_command};
use tracing::{debug, warn};

use crate::alerts::{AlertAction, PaneAlertTracker, agent_pane, prompt_hash};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanConfig {
    /// Consecutive transient failures before one is reported.
    pub failure_threshold: u32,
    /// A transcript written this recently means the turn is still running.
    pub activity_threshold_ms: u64,
    /// Grace period for the agent to replace the shell after launch.
    pub startup_timeout_ms: u64,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            activity_threshold_ms: 10_000,
            startup_timeout_ms: 30_000,
        }
    }
}

// ─── Failure Streak ──────────────────────────────────────────────

/// Counts consecutive transient failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FailureStreak {
    threshold: u32,
    count: u32,
}

impl FailureStreak {
    pub fn new(threshold: u32) -> Self {
        Self {
            threshold: threshold.max(1),
            count: 0,
        }
    }

    /// Record one failure. True exactly once, when the streak reaches the
    /// threshold.
    pub fn record(&mut self) -> bool {
        self.count = self.count.saturating_add(1);
        self.count == self.threshold
    }

    pub fn reset(&mut self) {
        self.count = 0;
    }

    pub fn count(&self) -> u32 {
        self.count
    }
}

// ─── Report ──────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct ScanReport {
    pub window_id: String,
    pub events: Vec<AgentEvent>,
    pub alerts: Vec<AlertAction>,
    /// The agent's pane is back at a shell prompt.
    pub agent_exited: bool,
    /// Stale references always; transient errors only once surfaced.
    pub failure: Option<EngineError>,
}

impl ScanReport {
    fn new(window_id: &str) -> Self {
        Self {
            window_id: window_id.to_string(),
            ..Self::default()
        }
    }

    pub fn is_stale(&self) -> bool {
        self.failure.as_ref().is_some_and(EngineError::is_stale)
    }
}

// ─── Scanner ─────────────────────────────────────────────────────

pub struct WindowScanner {
    window_id: String,
    provider: ProviderKind,
    config: ScanConfig,
    buffer: ScreenBuffer,
    interpreter: TerminalInterpreter,
    alerts: PaneAlertTracker,
    failures: FailureStreak,
    /// Pane the agent was last seen running in.
    agent_pane: Option<String>,
    last_status: Option<String>,
    last_prompt: Option<String>,
    idle_pending: bool,
    seen_agent: bool,
    started_at_ms: u64,
    transcript_activity_ms: Option<u64>,
}

impl WindowScanner {
    pub fn new(window_id: &str, provider: ProviderKind, config: ScanConfig, now_ms: u64) -> Self {
        Self {
            window_id: window_id.to_string(),
            provider,
            config,
            buffer: ScreenBuffer::new(24, 80),
            interpreter: TerminalInterpreter::new(provider),
            alerts: PaneAlertTracker::new(provider),
            failures: FailureStreak::new(config.failure_threshold),
            agent_pane: None,
            last_status: None,
            last_prompt: None,
            idle_pending: false,
            seen_agent: false,
            started_at_ms: now_ms,
            transcript_activity_ms: None,
        }
    }

    pub fn window_id(&self) -> &str {
        &self.window_id
    }

    pub fn provider(&self) -> ProviderKind {
        self.provider
    }

    /// Follow a rebind without losing screen or alert state.
    pub fn rename(&mut self, window_id: &str) {
        self.window_id = window_id.to_string();
    }

    pub fn agent_pane_id(&self) -> Option<&str> {
        self.agent_pane.as_deref()
    }

    pub fn alerts_mut(&mut self) -> &mut PaneAlertTracker {
        &mut self.alerts
    }

    /// The transcript produced events at `now_ms`.
    pub fn note_transcript_activity(&mut self, now_ms: u64) {
        self.transcript_activity_ms = Some(now_ms);
    }

    pub fn scan(&mut self, panes: &[PaneInfo], source: &dyn TerminalSource, now_ms: u64) -> ScanReport {
        let mut report = ScanReport::new(&self.window_id);
        let Some(primary) = agent_pane(panes, self.agent_pane.as_deref()) else {
            report.failure = Some(EngineError::stale(&self.window_id));
            return report;
        };

        if is_shell_command(&primary.current_cmd) {
            let grace_over = now_ms.saturating_sub(self.started_at_ms) >= self.config.startup_timeout_ms;
            if self.seen_agent || grace_over {
                debug!(window = %self.window_id, cmd = %primary.current_cmd, "agent process exited");
                report.agent_exited = true;
            }
            return report;
        }
        self.seen_agent = true;
        if self.agent_pane.as_deref() != Some(primary.pane_id.as_str()) {
            self.agent_pane = Some(primary.pane_id.clone());
        }

        let capture = match source.capture(&primary.pane_id) {
            Ok(capture) => capture,
            Err(e) if e.is_not_found() => {
                report.failure = Some(EngineError::stale(&primary.pane_id));
                return report;
            }
            Err(e) => {
                let surfaced = self.failures.record();
                if surfaced {
                    warn!(window = %self.window_id, failures = self.failures.count(), error = %e, "terminal capture keeps failing");
                    report.events.push(AgentEvent::StatusChange {
                        status: Some(format!("terminal unreachable: {e}")),
                        label: Some("…unreachable".to_string()),
                    });
                    report.failure = Some(e.into());
                } else {
                    debug!(window = %self.window_id, error = %e, "capture failed");
                }
                return report;
            }
        };
        self.failures.reset();

        self.buffer.resize(capture.rows, capture.cols);
        self.buffer.feed(&capture.bytes);
        let frame = self.buffer.frame();
        let signal = self.interpreter.interpret(&frame, &primary.pane_title);

        let status = signal.status.as_ref().map(|s| s.raw.clone());
        if status != self.last_status {
            report.events.push(AgentEvent::StatusChange {
                status: status.clone(),
                label: signal.status.as_ref().map(|s| s.label.to_string()),
            });
            self.last_status = status;
        }

        match &signal.prompt {
            Some(prompt) => {
                let hash = prompt_hash(prompt);
                if self.last_prompt.as_deref() != Some(hash.as_str()) {
                    report.events.push(AgentEvent::InteractivePrompt {
                        name: prompt.name.to_string(),
                        content: prompt.content.clone(),
                        pane_id: Some(primary.pane_id.clone()),
                    });
                    self.last_prompt = Some(hash);
                }
            }
            None => self.last_prompt = None,
        }

        self.track_turn(signal.is_active(), &frame, now_ms, &mut report);
        report.alerts = self.alerts.scan(panes, self.agent_pane.as_deref(), source, now_ms);
        report
    }

    /// Heuristic turn end for providers whose feed does not report it.
    fn track_turn(
        &mut self,
        active: bool,
        frame: &TerminalFrame,
        now_ms: u64,
        report: &mut ScanReport,
    ) {
        if CapabilityPolicy::for_provider(self.provider).permits(Capability::HookFeed) {
            return;
        }
        if active {
            self.idle_pending = true;
            return;
        }
        if !self.idle_pending {
            return;
        }
        let transcript_busy = self
            .transcript_activity_ms
            .is_some_and(|at| now_ms.saturating_sub(at) < self.config.activity_threshold_ms);
        if transcript_busy {
            return;
        }
        self.idle_pending = false;
        report.events.push(AgentEvent::TurnEnd {
            outcome: self.interpreter.turn_outcome(frame),
        });
    }

    /// Drop alert state; returns the removals to deliver.
    pub fn teardown(&mut self) -> Vec<AlertAction> {
        self.alerts.teardown()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ccrelay_core::TurnOutcome;
    use ccrelay_tmux::{Capture, TmuxError};
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Screens {
        text: Mutex<HashMap<String, String>>,
        broken: Mutex<bool>,
    }

    impl Screens {
        fn set(&self, pane: &str, text: &str) {
            self.text.lock().expect("lock").insert(pane.into(), text.into());
        }
    }

    impl TerminalSource for Screens {
        fn capture(&self, pane_id: &str) -> Result<Capture, TmuxError> {
            if *self.broken.lock().expect("lock") {
                return Err(TmuxError::CommandFailed("server busy".into()));
            }
            let text = self.text.lock().expect("lock");
            let text = text
                .get(pane_id)
                .ok_or_else(|| TmuxError::NotFound(pane_id.into()))?;
            Ok(Capture {
                bytes: text.clone().into_bytes(),
                rows: 24,
                cols: 80,
            })
        }
    }

    fn pane(cmd: &str) -> PaneInfo {
        PaneInfo {
            window_id: "@1".into(),
            pane_id: "%1".into(),
            current_cmd: cmd.into(),
            active: true,
            ..PaneInfo::default()
        }
    }

    fn screen(status: Option<&str>, body: &str) -> String {
        let sep = "─".repeat(40);
        let mut s = format!("{body}\n");
        if let Some(st) = status {
            s.push_str(st);
            s.push('\n');
        }
        s.push_str(&format!("{sep}\n❯\n{sep}\n"));
        s
    }

    fn statuses(report: &ScanReport) -> Vec<Option<String>> {
        report
            .events
            .iter()
            .filter_map(|e| match e {
                AgentEvent::StatusChange { status, .. } => Some(status.clone()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn status_reported_only_on_change() {
        let screens = Screens::default();
        let mut scanner = WindowScanner::new("@1", ProviderKind::Claude, ScanConfig::default(), 0);
        let panes = [pane("claude")];

        screens.set("%1", &screen(Some("✻ Thinking…"), "⏺ hi"));
        let first = scanner.scan(&panes, &screens, 0);
        assert_eq!(statuses(&first), vec![Some("Thinking…".to_string())]);
        let second = scanner.scan(&panes, &screens, 1_000);
        assert!(second.events.is_empty());

        screens.set("%1", &screen(None, "⏺ done\nAll tests pass."));
        let third = scanner.scan(&panes, &screens, 2_000);
        assert_eq!(statuses(&third), vec![None]);
        // Claude turn ends come from the hook feed.
        assert!(!third.events.iter().any(|e| matches!(e, AgentEvent::TurnEnd { .. })));
    }

    #[test]
    fn heuristic_turn_end_waits_for_quiet_transcript() {
        let screens = Screens::default();
        let mut scanner = WindowScanner::new("@1", ProviderKind::Codex, ScanConfig::default(), 0);
        let panes = [pane("codex")];

        screens.set("%1", &screen(Some("✻ Working"), "• reading"));
        scanner.scan(&panes, &screens, 0);

        scanner.note_transcript_activity(1_000);
        screens.set("%1", &screen(None, "• All tests pass."));
        let busy = scanner.scan(&panes, &screens, 2_000);
        assert!(!busy.events.iter().any(|e| matches!(e, AgentEvent::TurnEnd { .. })));

        let quiet = scanner.scan(&panes, &screens, 12_000);
        let ends: Vec<&AgentEvent> = quiet
            .events
            .iter()
            .filter(|e| matches!(e, AgentEvent::TurnEnd { .. }))
            .collect();
        assert_eq!(
            ends,
            vec![&AgentEvent::TurnEnd {
                outcome: TurnOutcome::Completed
            }]
        );
        let again = scanner.scan(&panes, &screens, 13_000);
        assert!(again.events.is_empty());
    }

    #[test]
    fn shell_means_exit_only_after_agent_seen() {
        let screens = Screens::default();
        screens.set("%1", &screen(None, "⏺ hi"));
        let mut scanner = WindowScanner::new("@1", ProviderKind::Claude, ScanConfig::default(), 0);

        assert!(!scanner.scan(&[pane("zsh")], &screens, 1_000).agent_exited);
        scanner.scan(&[pane("claude")], &screens, 2_000);
        assert!(scanner.scan(&[pane("zsh")], &screens, 3_000).agent_exited);

        let mut late = WindowScanner::new("@2", ProviderKind::Claude, ScanConfig::default(), 0);
        assert!(late.scan(&[pane("bash")], &screens, 30_000).agent_exited);
    }

    #[test]
    fn focusing_a_shell_split_is_not_an_exit() {
        let screens = Screens::default();
        screens.set("%1", &screen(None, "⏺ hi"));
        screens.set("%2", "$ ");
        let mut scanner = WindowScanner::new("@1", ProviderKind::Claude, ScanConfig::default(), 0);
        let split = |agent_focused: bool, agent_cmd: &str| {
            [
                PaneInfo {
                    active: agent_focused,
                    ..pane(agent_cmd)
                },
                PaneInfo {
                    pane_id: "%2".into(),
                    active: !agent_focused,
                    ..pane("zsh")
                },
            ]
        };

        assert!(!scanner.scan(&split(true, "claude"), &screens, 1_000).agent_exited);
        let focused = scanner.scan(&split(false, "claude"), &screens, 2_000);
        assert!(!focused.agent_exited);
        assert!(focused.failure.is_none());
        assert_eq!(scanner.agent_pane_id(), Some("%1"));

        assert!(scanner.scan(&split(false, "zsh"), &screens, 3_000).agent_exited);
    }

    #[test]
    fn primary_prompt_reported_once() {
        let screens = Screens::default();
        let prompt = format!(
            "{}\n Bash command\n   rm -rf target\n Do you want to proceed?\n ❯ 1. Yes\n   2. No\n Esc to cancel\n",
            "─".repeat(40)
        );
        screens.set("%1", &prompt);
        let mut scanner = WindowScanner::new("@1", ProviderKind::Claude, ScanConfig::default(), 0);
        let panes = [pane("claude")];
        let first = scanner.scan(&panes, &screens, 0);
        let prompts = first
            .events
            .iter()
            .filter(|e| matches!(e, AgentEvent::InteractivePrompt { .. }))
            .count();
        assert_eq!(prompts, 1);
        let second = scanner.scan(&panes, &screens, 1_000);
        assert!(
            !second
                .events
                .iter()
                .any(|e| matches!(e, AgentEvent::InteractivePrompt { .. }))
        );
    }

    #[test]
    fn failures_surface_once_at_threshold() {
        let screens = Screens::default();
        screens.set("%1", &screen(None, "⏺ hi"));
        *screens.broken.lock().expect("lock") = true;
        let config = ScanConfig {
            failure_threshold: 3,
            ..ScanConfig::default()
        };
        let mut scanner = WindowScanner::new("@1", ProviderKind::Claude, config, 0);
        let panes = [pane("claude")];
        let surfaced: Vec<bool> = (0..5)
            .map(|i| scanner.scan(&panes, &screens, i * 1_000).failure.is_some())
            .collect();
        assert_eq!(surfaced, [false, false, true, false, false]);

        *screens.broken.lock().expect("lock") = false;
        scanner.scan(&panes, &screens, 6_000);
        assert_eq!(scanner.failures.count(), 0);
    }

    #[test]
    fn missing_window_or_pane_is_stale() {
        let screens = Screens::default();
        let mut scanner = WindowScanner::new("@1", ProviderKind::Claude, ScanConfig::default(), 0);
        assert!(scanner.scan(&[], &screens, 0).is_stale());
        assert!(scanner.scan(&[pane("claude")], &screens, 0).is_stale());
    }
}
