//! Coordinator task: owns every piece of engine state and is its only writer.
//!
//! Scans run on the blocking pool, one per window at a time, and report
//! back over a channel. Feed batches, control messages and finished
//! recoveries arrive the same way. Outbound updates are queued with
//! `try_send` into a bounded channel; when it is full they wait in a local
//! backlog so the loop never blocks on delivery.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use chrono::Utc;
use ccrelay_core::{
    AgentEvent, CapabilityPolicy, EngineError, RecoveryStrategy, SessionReference, StrategyKind,
    WindowState,
};
use ccrelay_engine::{
    AlertAction, EventDispatcher, InFlightScans, LaunchPlan, LaunchResult, Origin, Planned,
    RecoveryCoordinator, RecoveryOutcome, RecoveryRequest, ScanReport, ScanTicket,
    SessionRegistry, TopologyCache, WindowScanner, agent_pane, launch,
};
use ccrelay_feed::{FeedBatch, SessionStart};
use ccrelay_tmux::{TerminalSource, WindowController};
use ccrelay_transcript::{TailBatch, TranscriptTailer, adapter_for, detect_provider_from_command};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::RuntimeConfig;
use crate::notifier::Delivery;

pub fn now_ms() -> u64 {
    u64::try_from(Utc::now().timestamp_millis()).unwrap_or(0)
}

// ─── Messages ────────────────────────────────────────────────────

pub type Reply<T> = oneshot::Sender<Result<T, EngineError>>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputOutcome {
    Sent,
    /// The window was dead; the text rides along with the recovery.
    Recovered(RecoveryOutcome),
}

#[derive(Debug)]
pub enum ControlMessage {
    SendInput {
        window_id: String,
        text: String,
        reply: Reply<InputOutcome>,
    },
    Recover {
        request: RecoveryRequest,
        reply: Reply<RecoveryOutcome>,
    },
    Kill {
        window_id: String,
        reply: Reply<()>,
    },
    Unbind {
        window_id: String,
        reply: Reply<()>,
    },
}

/// A batch from the feed tailer. The tailer commits the offset once `ack`
/// fires, i.e. after the records were queued for delivery.
#[derive(Debug)]
pub struct FeedMessage {
    pub batch: FeedBatch,
    pub ack: oneshot::Sender<()>,
}

enum RecoveryReply {
    Recover(Reply<RecoveryOutcome>),
    Input(Reply<InputOutcome>),
}

impl RecoveryReply {
    fn send(self, result: Result<RecoveryOutcome, EngineError>) {
        // The requester may have gone away.
        match self {
            Self::Recover(tx) => {
                let _ = tx.send(result);
            }
            Self::Input(tx) => {
                let _ = tx.send(result.map(InputOutcome::Recovered));
            }
        }
    }
}

struct RecoveryDone {
    plan: LaunchPlan,
    result: LaunchResult,
    reply: RecoveryReply,
}

struct ScanResult {
    ticket: ScanTicket,
    outcome: Option<(WindowWorker, ScanReport, Option<Result<TailBatch, EngineError>>)>,
}

/// Per-window state moved into the scan task and back.
struct WindowWorker {
    scanner: WindowScanner,
    tailer: Option<TranscriptTailer>,
    session_id: Option<String>,
}

impl WindowWorker {
    fn detach_tailer(&mut self) {
        if let Some(tailer) = self.tailer.take() {
            let orphans = tailer.detach();
            if orphans > 0 {
                debug!(window = %self.scanner.window_id(), orphans, "discarded unanswered tool calls");
            }
        }
        self.session_id = None;
    }
}

enum Wake {
    Tick,
    Scan(ScanResult),
    Feed(FeedMessage),
    Control(ControlMessage),
    Recovered(RecoveryDone),
    ControlClosed,
    FeedClosed,
    Shutdown,
}

// ─── Coordinator ─────────────────────────────────────────────────

pub struct Coordinator<C> {
    controller: Arc<C>,
    config: RuntimeConfig,
    registry: SessionRegistry,
    recovery: RecoveryCoordinator,
    dispatcher: EventDispatcher,
    inflight: InFlightScans,
    topology: TopologyCache,
    workers: HashMap<String, WindowWorker>,
    outbound: mpsc::Sender<Delivery>,
    backlog: VecDeque<Delivery>,
    scan_tx: mpsc::Sender<ScanResult>,
    scan_rx: mpsc::Receiver<ScanResult>,
    recovery_tx: mpsc::Sender<RecoveryDone>,
    recovery_rx: mpsc::Receiver<RecoveryDone>,
}

impl<C> Coordinator<C>
where
    C: WindowController + TerminalSource + 'static,
{
    pub fn new(
        controller: Arc<C>,
        config: RuntimeConfig,
        registry: SessionRegistry,
        outbound: mpsc::Sender<Delivery>,
    ) -> Self {
        let (scan_tx, scan_rx) = mpsc::channel(64);
        let (recovery_tx, recovery_rx) = mpsc::channel(8);
        Self {
            controller,
            recovery: RecoveryCoordinator::new(config.recovery.clone()),
            dispatcher: EventDispatcher::new(config.dispatcher),
            inflight: InFlightScans::new(),
            topology: TopologyCache::new(&config.alerts),
            workers: HashMap::new(),
            backlog: VecDeque::new(),
            config,
            registry,
            outbound,
            scan_tx,
            scan_rx,
            recovery_tx,
            recovery_rx,
        }
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn backlog_len(&self) -> usize {
        self.backlog.len()
    }

    /// Rebuild window ids after a tmux restart. Must run before any lookup.
    pub async fn reconcile(&mut self) -> Result<(), EngineError> {
        let controller = Arc::clone(&self.controller);
        let live = tokio::task::spawn_blocking(move || controller.list())
            .await
            .map_err(|e| EngineError::transient("list-windows", e))??;
        let report = self.registry.reconcile(&live);
        if !report.is_noop() {
            info!(
                kept = report.kept.len(),
                remapped = report.remapped.len(),
                dropped = report.dropped.len(),
                "bindings reconciled"
            );
        }
        self.flush_registry();
        Ok(())
    }

    pub async fn run(
        mut self,
        mut control_rx: mpsc::Receiver<ControlMessage>,
        mut feed_rx: mpsc::Receiver<FeedMessage>,
        cancel: CancellationToken,
    ) {
        if let Err(e) = self.reconcile().await {
            warn!(error = %e, "startup reconciliation failed");
        }
        let mut ticker = interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut control_open = true;
        let mut feed_open = true;

        loop {
            let wake = tokio::select! {
                () = cancel.cancelled() => Wake::Shutdown,
                _ = ticker.tick() => Wake::Tick,
                Some(result) = self.scan_rx.recv() => Wake::Scan(result),
                Some(done) = self.recovery_rx.recv() => Wake::Recovered(done),
                msg = feed_rx.recv(), if feed_open => match msg {
                    Some(msg) => Wake::Feed(msg),
                    None => Wake::FeedClosed,
                },
                msg = control_rx.recv(), if control_open => match msg {
                    Some(msg) => Wake::Control(msg),
                    None => Wake::ControlClosed,
                },
            };
            match wake {
                Wake::Shutdown => break,
                Wake::Tick => self.tick().await,
                Wake::Scan(result) => self.apply_scan(result),
                Wake::Recovered(done) => self.apply_recovery(done),
                Wake::Feed(msg) => self.apply_feed(msg),
                Wake::Control(msg) => self.apply_control(msg).await,
                Wake::FeedClosed => {
                    warn!("feed tailer stopped");
                    feed_open = false;
                }
                Wake::ControlClosed => {
                    debug!("control channel closed");
                    control_open = false;
                }
            }
        }
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.inflight.teardown();
        self.pump_outbound();
        if !self.backlog.is_empty() {
            warn!(undelivered = self.backlog.len(), "dropping queued updates at shutdown");
        }
        if let Err(e) = self.registry.flush() {
            warn!(error = %e, "final state flush failed");
        }
        info!("coordinator stopped");
    }

    // ─── Tick ────────────────────────────────────────────────────

    async fn tick(&mut self) {
        let now = now_ms();
        if self.topology.is_stale(now) {
            self.refresh_topology(now).await;
        }
        let ids: Vec<String> = self.registry.window_ids().map(str::to_string).collect();
        for id in ids {
            self.schedule_scan(&id, now);
        }
        self.flush_registry();
        self.pump_outbound();
    }

    async fn refresh_topology(&mut self, now: u64) {
        let controller = Arc::clone(&self.controller);
        let panes = match tokio::task::spawn_blocking(move || controller.list_all_panes()).await {
            Ok(Ok(panes)) => panes,
            Ok(Err(e)) => {
                debug!(error = %e, "pane listing failed");
                return;
            }
            Err(e) => {
                error!(error = %e, "pane listing task failed");
                return;
            }
        };
        self.topology.replace(panes, now);
        self.adopt_agent_windows();

        let vanished: Vec<String> = self
            .registry
            .window_ids()
            .filter(|id| !self.topology.contains(id))
            .map(str::to_string)
            .collect();
        for id in vanished {
            self.mark_dead(&id, "window closed", now);
        }
    }

    /// Bind windows already running a known agent.
    fn adopt_agent_windows(&mut self) {
        let adopted: Vec<WindowState> = self
            .topology
            .windows()
            .filter(|(id, _)| self.registry.window(id).is_none())
            .filter_map(|(id, panes)| {
                let primary = agent_pane(panes, None)?;
                let provider = detect_provider_from_command(&primary.current_cmd)?;
                Some(WindowState::new(
                    id,
                    primary.current_path.clone(),
                    provider,
                    primary.window_name.clone(),
                ))
            })
            .collect();
        for window in adopted {
            info!(window = %window.window_id, provider = %window.provider, "adopting agent window");
            self.registry.bind_window(window);
        }
    }

    fn schedule_scan(&mut self, window_id: &str, now: u64) {
        if self.recovery.is_dead(window_id)
            || self.recovery.is_recovering(window_id)
            || self.inflight.is_running(window_id)
            || !self.topology.contains(window_id)
        {
            return;
        }
        let Some(window) = self.registry.window(window_id).cloned() else {
            return;
        };
        let panes = self.topology.panes(window_id).to_vec();
        let mut worker = self.workers.remove(window_id).unwrap_or_else(|| WindowWorker {
            scanner: WindowScanner::new(window_id, window.provider, self.config.scan, now),
            tailer: None,
            session_id: None,
        });
        self.attach_transcript(&window, &mut worker);

        let ticket = self.inflight.begin(window_id);
        let controller = Arc::clone(&self.controller);
        let tx = self.scan_tx.clone();
        tokio::spawn(async move {
            let task_ticket = ticket.clone();
            let joined = tokio::task::spawn_blocking(move || {
                let report = worker.scanner.scan(&panes, controller.as_ref(), now);
                let tail = if task_ticket.is_cancelled() {
                    None
                } else {
                    worker.tailer.as_mut().map(TranscriptTailer::poll)
                };
                (worker, report, tail)
            })
            .await;
            let outcome = match joined {
                Ok(outcome) => Some(outcome),
                Err(e) => {
                    error!(window = %ticket.key, error = %e, "scan task failed");
                    None
                }
            };
            if tx.send(ScanResult { ticket, outcome }).await.is_err() {
                debug!("coordinator gone before scan result");
            }
        });
    }

    /// Point the worker's tailer at the window's current session.
    fn attach_transcript(&mut self, window: &WindowState, worker: &mut WindowWorker) {
        let session = match self.registry.resolve(&window.window_id) {
            Ok(session) => session,
            Err(e) => {
                debug!(window = %window.window_id, error = %e, "session lookup failed");
                None
            }
        };
        let current = session.as_ref().map(|s| s.session_id.clone());
        if worker.session_id != current {
            worker.detach_tailer();
        }
        if worker.tailer.is_some() {
            return;
        }
        let Some(SessionReference {
            session_id,
            transcript_path: Some(path),
            ..
        }) = session
        else {
            return;
        };
        // Zero means nothing was read yet: start at the end, not the start.
        let stored = (window.read_offset > 0).then_some(window.read_offset);
        debug!(window = %window.window_id, session = %session_id, path = %path.display(), "tailing transcript");
        worker.tailer = Some(TranscriptTailer::attach(window.provider, path, stored));
        worker.session_id = Some(session_id);
    }

    fn apply_scan(&mut self, result: ScanResult) {
        if !self.inflight.finish(&result.ticket) {
            debug!(window = %result.ticket.key, "discarding superseded scan");
            // Alerts it raised would otherwise be orphaned.
            if let Some((mut worker, _, _)) = result.outcome {
                let removals = worker.scanner.teardown();
                self.push_alerts(&result.ticket.key, removals);
                self.pump_outbound();
            }
            return;
        }
        let Some((mut worker, report, tail)) = result.outcome else {
            return;
        };
        let window_id = result.ticket.key;
        let now = now_ms();
        let dead_reason = if report.agent_exited {
            Some("agent exited")
        } else if report.is_stale() {
            Some("window closed")
        } else {
            None
        };

        match tail {
            Some(Ok(batch)) => {
                if !batch.events.is_empty() {
                    worker.scanner.note_transcript_activity(now);
                }
                for event in batch.events {
                    self.dispatcher.submit(&window_id, Origin::Poll, event, now);
                }
                if let Err(e) = self.registry.advance_read_offset(&window_id, batch.offset) {
                    debug!(window = %window_id, error = %e, "offset not recorded");
                }
            }
            Some(Err(e)) if e.is_transient() => {
                debug!(window = %window_id, error = %e, "transcript read failed");
            }
            Some(Err(e)) => {
                debug!(window = %window_id, error = %e, "dropping transcript tailer");
                worker.detach_tailer();
            }
            None => {}
        }

        for event in report.events {
            self.dispatcher.submit(&window_id, Origin::Poll, event, now);
        }
        self.enqueue_updates();
        self.push_alerts(&window_id, report.alerts);

        self.workers.insert(window_id.clone(), worker);
        if let Some(reason) = dead_reason {
            self.mark_dead(&window_id, reason, now);
        }
        self.pump_outbound();
    }

    /// Stop scanning a window and report it dead. The binding stays so it can
    /// be recovered.
    fn mark_dead(&mut self, window_id: &str, reason: &str, now: u64) {
        if !self.recovery.mark_dead(window_id, now) {
            return;
        }
        self.inflight.cancel(window_id);
        self.drop_worker(window_id);
        self.dispatcher.submit(
            window_id,
            Origin::Poll,
            AgentEvent::StatusChange {
                status: Some(reason.to_string()),
                label: Some("dead".to_string()),
            },
            now,
        );
        self.enqueue_updates();
    }

    fn drop_worker(&mut self, window_id: &str) {
        if let Some(mut worker) = self.workers.remove(window_id) {
            let removals = worker.scanner.teardown();
            self.push_alerts(window_id, removals);
            worker.detach_tailer();
        }
    }

    // ─── Feed ────────────────────────────────────────────────────

    fn apply_feed(&mut self, msg: FeedMessage) {
        let now = now_ms();
        for record in &msg.batch.records {
            let Some(window_id) = record.window_id() else {
                debug!(key = %record.window_key, event = %record.event_type, "feed record without window id");
                continue;
            };
            if let Some(start) = record.session_start() {
                self.bind_feed_session(window_id, start);
                continue;
            }
            if self.registry.window(window_id).is_none() {
                debug!(window = %window_id, event = %record.event_type, "feed record for unbound window");
                continue;
            }
            if let Some(event) = record.to_event() {
                self.dispatcher.submit(window_id, Origin::Feed, event, now);
            }
        }
        self.pump_outbound();
        if msg.ack.send(()).is_err() {
            debug!("feed tailer gone before ack");
        }
    }

    fn bind_feed_session(&mut self, window_id: &str, start: SessionStart) {
        // A fresh session in a window we considered dead means it came back.
        if self.recovery.is_dead(window_id) {
            info!(window = %window_id, "agent restarted in place");
            self.recovery.forget(window_id);
        }
        let provider = match self.registry.window(window_id) {
            Some(window) => window.provider,
            None => {
                let name = start.window_name.clone().unwrap_or_else(|| {
                    start
                        .cwd
                        .file_name()
                        .map(|n| n.to_string_lossy().into_owned())
                        .unwrap_or_default()
                });
                let provider = self.config.feed_provider;
                self.registry
                    .bind_window(WindowState::new(window_id, start.cwd.clone(), provider, name));
                provider
            }
        };
        let session = SessionReference {
            session_id: start.session_id,
            working_directory: start.cwd,
            provider,
            transcript_path: start.transcript_path,
        };
        if let Err(e) = self.registry.bind_session(window_id, session) {
            warn!(window = %window_id, error = %e, "binding session from feed failed");
        }
    }

    // ─── Control ─────────────────────────────────────────────────

    async fn apply_control(&mut self, msg: ControlMessage) {
        match msg {
            ControlMessage::SendInput {
                window_id,
                text,
                reply,
            } => self.send_input(window_id, text, reply).await,
            ControlMessage::Recover { request, reply } => {
                self.start_recovery(request, RecoveryReply::Recover(reply));
            }
            ControlMessage::Kill { window_id, reply } => {
                self.forget_window(&window_id);
                let controller = Arc::clone(&self.controller);
                let killed = tokio::task::spawn_blocking(move || controller.kill(&window_id))
                    .await
                    .map_err(|e| EngineError::transient("kill-window", e))
                    .and_then(|r| r.map_err(EngineError::from));
                let _ = reply.send(killed);
            }
            ControlMessage::Unbind { window_id, reply } => {
                let known = self.registry.window(&window_id).is_some();
                self.forget_window(&window_id);
                let result = if known {
                    Ok(())
                } else {
                    Err(EngineError::stale(&window_id))
                };
                let _ = reply.send(result);
            }
        }
    }

    async fn send_input(&mut self, window_id: String, text: String, reply: Reply<InputOutcome>) {
        if self.registry.window(&window_id).is_none() {
            let _ = reply.send(Err(EngineError::stale(&window_id)));
            return;
        }
        if self.recovery.is_recovering(&window_id) {
            let _ = reply.send(Err(EngineError::transient("send-input", "recovery in progress")));
            return;
        }
        if self.recovery.is_dead(&window_id) {
            self.recover_with_input(&window_id, text, reply);
            return;
        }

        let pinned = self
            .workers
            .get(&window_id)
            .and_then(|w| w.scanner.agent_pane_id());
        let target = agent_pane(self.topology.panes(&window_id), pinned)
            .map_or_else(|| window_id.clone(), |p| p.pane_id.clone());
        let controller = Arc::clone(&self.controller);
        let keys = text.clone();
        let sent = tokio::task::spawn_blocking(move || controller.send_keys(&target, &keys)).await;
        match sent {
            Ok(Ok(true)) => {
                let _ = reply.send(Ok(InputOutcome::Sent));
            }
            Ok(Ok(false)) => self.input_to_dead_window(&window_id, text, reply),
            Ok(Err(e)) if e.is_not_found() => self.input_to_dead_window(&window_id, text, reply),
            Ok(Err(e)) => {
                let _ = reply.send(Err(e.into()));
            }
            Err(e) => {
                let _ = reply.send(Err(EngineError::transient("send-keys", e)));
            }
        }
    }

    fn input_to_dead_window(&mut self, window_id: &str, text: String, reply: Reply<InputOutcome>) {
        self.mark_dead(window_id, "window closed", now_ms());
        self.pump_outbound();
        self.recover_with_input(window_id, text, reply);
    }

    /// Revive a dead window with the provider's default strategy and replay
    /// the text once it is up.
    fn recover_with_input(&mut self, window_id: &str, text: String, reply: Reply<InputOutcome>) {
        let Some(window) = self.registry.window(window_id) else {
            let _ = reply.send(Err(EngineError::stale(window_id)));
            return;
        };
        let strategy = match CapabilityPolicy::for_provider(window.provider).default_strategy() {
            StrategyKind::Continue => RecoveryStrategy::Continue,
            _ => RecoveryStrategy::Fresh,
        };
        let request = RecoveryRequest {
            window_id: window_id.to_string(),
            working_directory: window.working_directory.clone(),
            pending_input: Some(text),
            strategy,
        };
        self.start_recovery(request, RecoveryReply::Input(reply));
    }

    fn start_recovery(&mut self, request: RecoveryRequest, reply: RecoveryReply) {
        let Some(window) = self.registry.window(&request.window_id) else {
            reply.send(Err(EngineError::stale(&request.window_id)));
            return;
        };
        if self.recovery.is_recovering(&request.window_id) {
            reply.send(Err(EngineError::transient("recover", "recovery in progress")));
            return;
        }
        let adapter = adapter_for(window.provider);
        let plan = match self.recovery.plan(&request, adapter, &self.registry) {
            Ok(Planned::Launch(plan)) => plan,
            Ok(Planned::NeedsDirectory) => {
                reply.send(Ok(RecoveryOutcome::NeedsDirectory {
                    window_id: request.window_id,
                    pending_input: request.pending_input,
                }));
                return;
            }
            Err(e) => {
                reply.send(Err(e));
                return;
            }
        };

        self.inflight.cancel(&request.window_id);
        self.drop_worker(&request.window_id);
        self.pump_outbound();
        info!(window = %plan.window_id, strategy = %request.strategy.kind(), "recovering window");

        let controller = Arc::clone(&self.controller);
        let settle = self.recovery.config().settle_delay;
        let tx = self.recovery_tx.clone();
        tokio::spawn(async move {
            let task_plan = plan.clone();
            let joined = tokio::task::spawn_blocking(move || {
                // The old window may still be alive when resuming elsewhere.
                if let Err(e) = controller.kill(&task_plan.window_id) {
                    debug!(window = %task_plan.window_id, error = %e, "old window not killed");
                }
                launch(&task_plan, controller.as_ref(), settle)
            })
            .await;
            let result = joined.unwrap_or_else(|e| LaunchResult::Failed {
                strategy: plan
                    .attempts
                    .first()
                    .map_or(StrategyKind::Fresh, |(s, _)| s.kind()),
                reason: format!("launch task failed: {e}"),
            });
            if tx.send(RecoveryDone { plan, result, reply }).await.is_err() {
                debug!("coordinator gone before recovery finished");
            }
        });
    }

    fn apply_recovery(&mut self, done: RecoveryDone) {
        let outcome = self.recovery.finish(&done.plan, done.result, &mut self.registry);
        if let RecoveryOutcome::Rebound { new_window, .. } = &outcome {
            self.dispatcher.rename_window(&done.plan.window_id, new_window);
            self.topology.invalidate();
        }
        self.flush_registry();
        self.pump_outbound();
        done.reply.send(Ok(outcome));
    }

    fn forget_window(&mut self, window_id: &str) {
        self.inflight.cancel(window_id);
        self.drop_worker(window_id);
        self.dispatcher.remove_window(window_id);
        self.recovery.forget(window_id);
        self.registry.unbind(window_id);
        self.flush_registry();
        self.pump_outbound();
    }

    // ─── Output ──────────────────────────────────────────────────

    fn flush_registry(&mut self) {
        if let Err(e) = self.registry.flush() {
            warn!(path = %self.registry.path().display(), error = %e, "state flush failed");
        }
    }

    fn push_alerts(&mut self, window_id: &str, actions: Vec<AlertAction>) {
        self.backlog.extend(actions.into_iter().map(|action| Delivery::Alert {
            window_id: window_id.to_string(),
            action,
        }));
    }

    fn enqueue_updates(&mut self) {
        self.backlog
            .extend(self.dispatcher.drain_all().into_iter().map(Delivery::Update));
    }

    fn pump_outbound(&mut self) {
        self.enqueue_updates();
        while let Some(delivery) = self.backlog.pop_front() {
            match self.outbound.try_send(delivery) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(delivery)) => {
                    self.backlog.push_front(delivery);
                    break;
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    debug!(dropped = self.backlog.len() + 1, "delivery channel closed");
                    self.backlog.clear();
                    break;
                }
            }
        }
    }
}
