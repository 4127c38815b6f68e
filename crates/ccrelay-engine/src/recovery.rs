//! Dead-session recovery: Fresh, Continue and Resume with fallback.
//!
//! Recovery runs in three steps so the blocking launch can leave the
//! coordinator's thread: [`RecoveryCoordinator::plan`] checks capabilities
//! and builds the command lines, [`launch`] drives tmux, and
//! [`RecoveryCoordinator::finish`] rebinds the registry. [`recover`]
//! chains them for callers that may block.
//!
//! [`recover`]: RecoveryCoordinator::recover

use std::collections::HashMap;
use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use ccrelay_core::{
    CapabilityPolicy, EngineError, ProviderKind, RecoveryStrategy, SessionReference, StrategyKind,
    WindowState,
};
use ccrelay_tmux::{WindowController, is_shell_command};
use ccrelay_transcript::{ProviderAdapter, ResumeCandidate, TranscriptRoots};
use tracing::{debug, info, warn};

use crate::alerts::agent_pane;
use crate::registry::SessionRegistry;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveryConfig {
    /// Wait after launching before checking the agent is still running.
    pub settle_delay: Duration,
    /// Launch command per provider; missing entries use the adapter default.
    pub commands: HashMap<ProviderKind, String>,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            settle_delay: Duration::from_secs(3),
            commands: HashMap::new(),
        }
    }
}

// ─── State ───────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BindingState {
    Bound,
    Dead { since_ms: u64 },
    Recovering { strategy: StrategyKind },
    Failed { reason: String },
}

/// One request to bring a dead window back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveryRequest {
    pub window_id: String,
    pub working_directory: PathBuf,
    /// Text the user sent while the window was dead; replayed once.
    pub pending_input: Option<String>,
    pub strategy: RecoveryStrategy,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryOutcome {
    Rebound {
        new_window: String,
        strategy: StrategyKind,
        replayed: bool,
    },
    /// The working directory is gone; the user must pick another.
    NeedsDirectory {
        window_id: String,
        pending_input: Option<String>,
    },
    /// Resume did not come up. Never retried automatically.
    ResumeFailed {
        reason: String,
        offered: Vec<StrategyKind>,
    },
    Failed {
        reason: String,
    },
}

/// Commands to try in order, produced by [`RecoveryCoordinator::plan`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchPlan {
    pub window_id: String,
    pub working_directory: PathBuf,
    pub window_name: String,
    pub provider: ProviderKind,
    pub attempts: Vec<(RecoveryStrategy, String)>,
    pub pending_input: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Planned {
    Launch(LaunchPlan),
    NeedsDirectory,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LaunchResult {
    Started {
        window_id: String,
        strategy: RecoveryStrategy,
        replayed: bool,
    },
    Failed {
        strategy: StrategyKind,
        reason: String,
    },
}

// ─── Coordinator ─────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct RecoveryCoordinator {
    config: RecoveryConfig,
    states: HashMap<String, BindingState>,
}

impl RecoveryCoordinator {
    pub fn new(config: RecoveryConfig) -> Self {
        Self {
            config,
            states: HashMap::new(),
        }
    }

    pub fn config(&self) -> &RecoveryConfig {
        &self.config
    }

    pub fn state(&self, window_id: &str) -> BindingState {
        self.states
            .get(window_id)
            .cloned()
            .unwrap_or(BindingState::Bound)
    }

    pub fn is_dead(&self, window_id: &str) -> bool {
        matches!(
            self.states.get(window_id),
            Some(BindingState::Dead { .. } | BindingState::Failed { .. })
        )
    }

    pub fn is_recovering(&self, window_id: &str) -> bool {
        matches!(
            self.states.get(window_id),
            Some(BindingState::Recovering { .. })
        )
    }

    /// Returns false if the window was already dead or recovering.
    pub fn mark_dead(&mut self, window_id: &str, now_ms: u64) -> bool {
        match self.states.get(window_id) {
            Some(BindingState::Dead { .. } | BindingState::Recovering { .. }) => false,
            _ => {
                info!(window = %window_id, "window marked dead");
                self.states
                    .insert(window_id.to_string(), BindingState::Dead { since_ms: now_ms });
                true
            }
        }
    }

    pub fn forget(&mut self, window_id: &str) {
        self.states.remove(window_id);
    }

    /// Strategies the user may be shown for this provider.
    pub fn offered_strategies(&self, provider: ProviderKind) -> Vec<StrategyKind> {
        CapabilityPolicy::for_provider(provider).offered_strategies()
    }

    /// Prior sessions in the window's directory, newest first. Empty when the
    /// provider cannot resume.
    pub fn resume_candidates(
        &self,
        window: &WindowState,
        adapter: &dyn ProviderAdapter,
        roots: &TranscriptRoots,
    ) -> Vec<ResumeCandidate> {
        if adapter.policy().check_strategy(StrategyKind::Resume).is_err() {
            return Vec::new();
        }
        adapter.resume_candidates(roots, &window.working_directory)
    }

    fn base_command(&self, adapter: &dyn ProviderAdapter) -> String {
        self.config
            .commands
            .get(&adapter.kind())
            .cloned()
            .unwrap_or_else(|| adapter.default_command().to_string())
    }

    /// Validate the request and build the launch attempts.
    ///
    /// Unsupported strategies and bad session ids are rejected here, before
    /// anything is launched. Continue with no prior session in the directory
    /// goes straight to Fresh.
    pub fn plan(
        &mut self,
        request: &RecoveryRequest,
        adapter: &dyn ProviderAdapter,
        registry: &SessionRegistry,
    ) -> Result<Planned, EngineError> {
        let base = self.base_command(adapter);
        let primary = adapter.launch_command(&base, &request.strategy)?;

        if !request.working_directory.is_dir() {
            debug!(window = %request.window_id, dir = %request.working_directory.display(), "working directory missing");
            return Ok(Planned::NeedsDirectory);
        }

        let mut attempts = Vec::new();
        match &request.strategy {
            RecoveryStrategy::Continue => {
                let has_prior = !adapter
                    .resume_candidates(registry.roots(), &request.working_directory)
                    .is_empty();
                if has_prior {
                    attempts.push((RecoveryStrategy::Continue, primary));
                } else {
                    debug!(window = %request.window_id, "no prior session, continuing as fresh");
                }
                attempts.push((
                    RecoveryStrategy::Fresh,
                    adapter.launch_command(&base, &RecoveryStrategy::Fresh)?,
                ));
            }
            strategy => attempts.push((strategy.clone(), primary)),
        }

        let window_name = registry
            .display_name(&request.window_id)
            .map(str::to_string)
            .or_else(|| {
                request
                    .working_directory
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
            })
            .unwrap_or_else(|| adapter.kind().to_string());

        self.states.insert(
            request.window_id.clone(),
            BindingState::Recovering {
                strategy: request.strategy.kind(),
            },
        );
        Ok(Planned::Launch(LaunchPlan {
            window_id: request.window_id.clone(),
            working_directory: request.working_directory.clone(),
            window_name,
            provider: adapter.kind(),
            attempts,
            pending_input: request.pending_input.clone(),
        }))
    }

    /// Apply a launch result to the registry.
    pub fn finish(
        &mut self,
        plan: &LaunchPlan,
        result: LaunchResult,
        registry: &mut SessionRegistry,
    ) -> RecoveryOutcome {
        match result {
            LaunchResult::Started {
                window_id,
                strategy,
                replayed,
            } => {
                if registry.window(&plan.window_id).is_some() {
                    if let Err(e) = registry.rebind(&plan.window_id, &window_id) {
                        warn!(window = %plan.window_id, error = %e, "rebind after recovery failed");
                    }
                } else {
                    registry.bind_window(WindowState::new(
                        window_id.clone(),
                        plan.working_directory.clone(),
                        plan.provider,
                        plan.window_name.clone(),
                    ));
                }
                registry.clear_session(&window_id);
                if let RecoveryStrategy::Resume { session_id } = &strategy {
                    let session = SessionReference {
                        session_id: session_id.clone(),
                        working_directory: plan.working_directory.clone(),
                        provider: plan.provider,
                        transcript_path: None,
                    };
                    if let Err(e) = registry.bind_session(&window_id, session) {
                        warn!(window = %window_id, error = %e, "binding resumed session failed");
                    }
                }
                self.states.remove(&plan.window_id);
                self.states.insert(window_id.clone(), BindingState::Bound);
                info!(
                    from = %plan.window_id,
                    to = %window_id,
                    strategy = %strategy.kind(),
                    replayed,
                    "window recovered"
                );
                RecoveryOutcome::Rebound {
                    new_window: window_id,
                    strategy: strategy.kind(),
                    replayed,
                }
            }
            LaunchResult::Failed {
                strategy: StrategyKind::Resume,
                reason,
            } => {
                warn!(window = %plan.window_id, reason = %reason, "resume failed");
                self.states.insert(
                    plan.window_id.clone(),
                    BindingState::Dead { since_ms: 0 },
                );
                let offered = self
                    .offered_strategies(plan.provider)
                    .into_iter()
                    .filter(|s| *s != StrategyKind::Resume)
                    .collect();
                RecoveryOutcome::ResumeFailed { reason, offered }
            }
            LaunchResult::Failed { strategy, reason } => {
                warn!(window = %plan.window_id, strategy = %strategy, reason = %reason, "recovery failed");
                self.states.insert(
                    plan.window_id.clone(),
                    BindingState::Failed {
                        reason: reason.clone(),
                    },
                );
                RecoveryOutcome::Failed { reason }
            }
        }
    }

    /// Plan, launch and finish in one blocking call.
    pub fn recover(
        &mut self,
        request: &RecoveryRequest,
        controller: &dyn WindowController,
        registry: &mut SessionRegistry,
        adapter: &dyn ProviderAdapter,
    ) -> Result<RecoveryOutcome, EngineError> {
        let plan = match self.plan(request, adapter, registry)? {
            Planned::Launch(plan) => plan,
            Planned::NeedsDirectory => {
                return Ok(RecoveryOutcome::NeedsDirectory {
                    window_id: request.window_id.clone(),
                    pending_input: request.pending_input.clone(),
                });
            }
        };
        let result = launch(&plan, controller, self.config.settle_delay);
        Ok(self.finish(&plan, result, registry))
    }
}

// ─── Launch ──────────────────────────────────────────────────────

/// Try each attempt in order until an agent stays up. Blocks for the settle
/// delay per attempt.
pub fn launch(plan: &LaunchPlan, controller: &dyn WindowController, settle: Duration) -> LaunchResult {
    let mut last = LaunchResult::Failed {
        strategy: StrategyKind::Fresh,
        reason: "no launch attempts".to_string(),
    };
    for (strategy, command) in &plan.attempts {
        match try_launch(plan, controller, command, settle) {
            Ok(window_id) => {
                let replayed = plan
                    .pending_input
                    .as_deref()
                    .is_some_and(|text| replay(controller, &window_id, text));
                return LaunchResult::Started {
                    window_id,
                    strategy: strategy.clone(),
                    replayed,
                };
            }
            Err(reason) => {
                debug!(window = %plan.window_id, strategy = %strategy.kind(), reason = %reason, "launch attempt failed");
                last = LaunchResult::Failed {
                    strategy: strategy.kind(),
                    reason,
                };
            }
        }
    }
    last
}

fn try_launch(
    plan: &LaunchPlan,
    controller: &dyn WindowController,
    command: &str,
    settle: Duration,
) -> Result<String, String> {
    let window_id = controller
        .create(&plan.working_directory, &plan.window_name, command)
        .map_err(|e| e.to_string())?;
    if !settle.is_zero() {
        thread::sleep(settle);
    }
    let alive = match controller.list_panes(&window_id) {
        Ok(panes) => agent_pane(&panes, None).is_some_and(|p| !is_shell_command(&p.current_cmd)),
        Err(e) if e.is_not_found() => false,
        Err(e) => return Err(e.to_string()),
    };
    if alive {
        return Ok(window_id);
    }
    if let Err(e) = controller.kill(&window_id) {
        debug!(window = %window_id, error = %e, "cleanup of failed launch window failed");
    }
    Err(format!("agent exited right after `{command}`"))
}

fn replay(controller: &dyn WindowController, window_id: &str, text: &str) -> bool {
    match controller.send_keys(window_id, text) {
        Ok(sent) => sent,
        Err(e) => {
            warn!(window = %window_id, error = %e, "replaying pending input failed");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ccrelay_tmux::{PaneInfo, TmuxError, WindowInfo};
    use ccrelay_transcript::adapter_for;
    use std::fs;
    use std::path::Path;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Windows whose agent dies when the command contains a listed fragment.
    #[derive(Default)]
    struct FakeController {
        dying: Vec<&'static str>,
        created: Mutex<Vec<(String, String)>>,
        commands: Mutex<HashMap<String, String>>,
        killed: Mutex<Vec<String>>,
        sent: Mutex<Vec<(String, String)>>,
    }

    impl FakeController {
        fn dying(fragments: &[&'static str]) -> Self {
            Self {
                dying: fragments.to_vec(),
                ..Self::default()
            }
        }

        fn created_commands(&self) -> Vec<String> {
            self.created
                .lock()
                .expect("lock")
                .iter()
                .map(|(_, c)| c.clone())
                .collect()
        }
    }

    impl WindowController for FakeController {
        fn create(&self, _: &Path, _: &str, cmd: &str) -> Result<String, TmuxError> {
            let mut created = self.created.lock().expect("lock");
            let id = format!("@{}", 20 + created.len());
            created.push((id.clone(), cmd.to_string()));
            self.commands
                .lock()
                .expect("lock")
                .insert(id.clone(), cmd.to_string());
            Ok(id)
        }
        fn list(&self) -> Result<Vec<WindowInfo>, TmuxError> {
            Ok(Vec::new())
        }
        fn exists(&self, _: &str) -> Result<bool, TmuxError> {
            Ok(true)
        }
        fn kill(&self, id: &str) -> Result<(), TmuxError> {
            self.killed.lock().expect("lock").push(id.to_string());
            Ok(())
        }
        fn list_panes(&self, id: &str) -> Result<Vec<PaneInfo>, TmuxError> {
            let cmd = self
                .commands
                .lock()
                .expect("lock")
                .get(id)
                .cloned()
                .unwrap_or_default();
            let dies = self.dying.iter().any(|f| cmd.contains(f));
            Ok(vec![PaneInfo {
                window_id: id.to_string(),
                pane_id: format!("%{id}"),
                current_cmd: if dies { "zsh".into() } else { "node".into() },
                active: true,
                ..PaneInfo::default()
            }])
        }
        fn list_all_panes(&self) -> Result<Vec<PaneInfo>, TmuxError> {
            Ok(Vec::new())
        }
        fn send_keys(&self, pane: &str, text: &str) -> Result<bool, TmuxError> {
            self.sent
                .lock()
                .expect("lock")
                .push((pane.to_string(), text.to_string()));
            Ok(true)
        }
    }

    struct Fixture {
        _tmp: TempDir,
        cwd: PathBuf,
        registry: SessionRegistry,
        coordinator: RecoveryCoordinator,
    }

    fn fixture(provider: ProviderKind) -> Fixture {
        let tmp = TempDir::new().expect("tempdir");
        let cwd = tmp.path().join("proj");
        fs::create_dir_all(&cwd).expect("cwd");
        let mut registry = SessionRegistry::load(
            tmp.path().join("state.json"),
            TranscriptRoots::under_home(tmp.path()),
        )
        .expect("load");
        registry.bind_window(WindowState::new("@3", &cwd, provider, "proj"));
        let coordinator = RecoveryCoordinator::new(RecoveryConfig {
            settle_delay: Duration::ZERO,
            commands: HashMap::new(),
        });
        Fixture {
            _tmp: tmp,
            cwd,
            registry,
            coordinator,
        }
    }

    fn request(f: &Fixture, strategy: RecoveryStrategy, input: Option<&str>) -> RecoveryRequest {
        RecoveryRequest {
            window_id: "@3".into(),
            working_directory: f.cwd.clone(),
            pending_input: input.map(str::to_string),
            strategy,
        }
    }

    fn write_prior_claude_session(f: &Fixture) {
        let dir = f.registry.roots().claude_projects.join(ccrelay_transcript::encode_path(
            &ccrelay_transcript::canonical_dir(&f.cwd).to_string_lossy(),
        ));
        fs::create_dir_all(&dir).expect("dir");
        let line = serde_json::json!({
            "type": "user",
            "cwd": f.cwd.to_string_lossy(),
            "sessionId": "old-1",
            "message": {"role": "user", "content": "hello"},
        });
        fs::write(dir.join("old-1.jsonl"), format!("{line}\n")).expect("write");
    }

    #[test]
    fn fresh_rebinds_and_replays_once() {
        let mut f = fixture(ProviderKind::Claude);
        let controller = FakeController::default();
        let req = request(&f, RecoveryStrategy::Fresh, Some("run the tests"));
        let outcome = f
            .coordinator
            .recover(&req, &controller, &mut f.registry, adapter_for(ProviderKind::Claude))
            .expect("recover");
        assert_eq!(
            outcome,
            RecoveryOutcome::Rebound {
                new_window: "@20".into(),
                strategy: StrategyKind::Fresh,
                replayed: true
            }
        );
        assert_eq!(controller.sent.lock().expect("lock").len(), 1);
        assert!(f.registry.window("@3").is_none());
        assert_eq!(f.registry.display_name("@20"), Some("proj"));
        assert_eq!(f.coordinator.state("@20"), BindingState::Bound);
    }

    #[test]
    fn continue_without_prior_session_is_fresh() {
        let mut f = fixture(ProviderKind::Claude);
        let controller = FakeController::default();
        let req = request(&f, RecoveryStrategy::Continue, None);
        let outcome = f
            .coordinator
            .recover(&req, &controller, &mut f.registry, adapter_for(ProviderKind::Claude))
            .expect("recover");
        assert!(matches!(
            outcome,
            RecoveryOutcome::Rebound {
                strategy: StrategyKind::Fresh,
                replayed: false,
                ..
            }
        ));
        assert_eq!(controller.created_commands(), vec!["claude".to_string()]);
    }

    #[test]
    fn continue_launch_failure_falls_back_to_fresh() {
        let mut f = fixture(ProviderKind::Claude);
        write_prior_claude_session(&f);
        let controller = FakeController::dying(&["--continue"]);
        let req = request(&f, RecoveryStrategy::Continue, Some("hi"));
        let outcome = f
            .coordinator
            .recover(&req, &controller, &mut f.registry, adapter_for(ProviderKind::Claude))
            .expect("recover");
        assert_eq!(
            outcome,
            RecoveryOutcome::Rebound {
                new_window: "@21".into(),
                strategy: StrategyKind::Fresh,
                replayed: true
            }
        );
        assert_eq!(
            controller.created_commands(),
            vec!["claude --continue".to_string(), "claude".to_string()]
        );
        assert_eq!(*controller.killed.lock().expect("lock"), vec!["@20".to_string()]);
        // Replayed into the surviving window only.
        assert_eq!(
            *controller.sent.lock().expect("lock"),
            vec![("@21".to_string(), "hi".to_string())]
        );
    }

    #[test]
    fn resume_failure_is_not_retried() {
        let mut f = fixture(ProviderKind::Claude);
        let controller = FakeController::dying(&["--resume"]);
        let req = request(
            &f,
            RecoveryStrategy::Resume {
                session_id: "abc-123".into(),
            },
            Some("keep going"),
        );
        let outcome = f
            .coordinator
            .recover(&req, &controller, &mut f.registry, adapter_for(ProviderKind::Claude))
            .expect("recover");
        match outcome {
            RecoveryOutcome::ResumeFailed { offered, .. } => {
                assert_eq!(offered, vec![StrategyKind::Fresh, StrategyKind::Continue]);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(controller.created_commands().len(), 1);
        assert!(controller.sent.lock().expect("lock").is_empty());
        assert!(f.coordinator.is_dead("@3"));
        assert!(f.registry.window("@3").is_some());
    }

    #[test]
    fn resume_binds_the_chosen_session() {
        let mut f = fixture(ProviderKind::Codex);
        let controller = FakeController::default();
        let req = request(
            &f,
            RecoveryStrategy::Resume {
                session_id: "0199-aa".into(),
            },
            None,
        );
        f.coordinator
            .recover(&req, &controller, &mut f.registry, adapter_for(ProviderKind::Codex))
            .expect("recover");
        assert_eq!(controller.created_commands(), vec!["codex resume 0199-aa".to_string()]);
        assert_eq!(
            f.registry.session("@20").map(|s| s.session_id.as_str()),
            Some("0199-aa")
        );
    }

    #[test]
    fn unsupported_strategy_rejected_before_launch() {
        let mut f = fixture(ProviderKind::Gemini);
        let controller = FakeController::default();
        let req = request(&f, RecoveryStrategy::Continue, None);
        let err = f
            .coordinator
            .recover(&req, &controller, &mut f.registry, adapter_for(ProviderKind::Gemini))
            .expect_err("unsupported");
        assert!(matches!(err, EngineError::CapabilityUnsupported { .. }));
        assert!(controller.created_commands().is_empty());
        assert_eq!(
            f.coordinator.offered_strategies(ProviderKind::Gemini),
            vec![StrategyKind::Fresh, StrategyKind::Resume]
        );
    }

    #[test]
    fn missing_directory_asks_for_one() {
        let mut f = fixture(ProviderKind::Claude);
        let controller = FakeController::default();
        let mut req = request(&f, RecoveryStrategy::Fresh, Some("hi"));
        req.working_directory = f.cwd.join("deleted");
        let outcome = f
            .coordinator
            .recover(&req, &controller, &mut f.registry, adapter_for(ProviderKind::Claude))
            .expect("recover");
        assert_eq!(
            outcome,
            RecoveryOutcome::NeedsDirectory {
                window_id: "@3".into(),
                pending_input: Some("hi".into())
            }
        );
        assert!(controller.created_commands().is_empty());
    }

    #[test]
    fn configured_command_and_dead_marking() {
        let mut f = fixture(ProviderKind::Claude);
        f.coordinator
            .config
            .commands
            .insert(ProviderKind::Claude, "claude --model opus".into());
        assert!(f.coordinator.mark_dead("@3", 10));
        assert!(!f.coordinator.mark_dead("@3", 20));
        let controller = FakeController::default();
        let req = request(&f, RecoveryStrategy::Fresh, None);
        f.coordinator
            .recover(&req, &controller, &mut f.registry, adapter_for(ProviderKind::Claude))
            .expect("recover");
        assert_eq!(controller.created_commands(), vec!["claude --model opus".to_string()]);
    }
}
