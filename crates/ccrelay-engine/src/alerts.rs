//! Interactive prompts in a window's secondary panes.
//!
//! One [`PaneAlertTracker`] per window owns that window's alert state. A
//! single-pane window returns before touching tmux. Pane topology comes
//! from a [`TopologyCache`] shared by the coordinator.

use std::collections::HashMap;

use ccrelay_core::ProviderKind;
use ccrelay_screen::{PromptContent, ScreenBuffer, extract_interactive_prompt};
use ccrelay_tmux::{PaneInfo, TerminalSource, TmuxError, WindowController, is_shell_command};
use sha2::{Digest, Sha256};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlertConfig {
    /// How long a pane listing stays fresh.
    pub topology_refresh_ms: u64,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            topology_refresh_ms: 5_000,
        }
    }
}

// ─── Alert State ─────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlertState {
    pub pane_id: String,
    pub prompt_hash: String,
    /// Reference to the delivered notification, once the notifier has one.
    pub notification_ref: Option<String>,
    pub last_seen_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AlertAction {
    /// A prompt appeared (or changed) in a pane.
    Raise {
        pane_id: String,
        prompt: PromptContent,
        prompt_hash: String,
    },
    /// The prompt was answered; the pane is still there.
    Dismiss {
        pane_id: String,
        notification_ref: Option<String>,
    },
    /// The pane is gone.
    Remove {
        pane_id: String,
        notification_ref: Option<String>,
    },
}

impl AlertAction {
    pub fn pane_id(&self) -> &str {
        match self {
            Self::Raise { pane_id, .. }
            | Self::Dismiss { pane_id, .. }
            | Self::Remove { pane_id, .. } => pane_id,
        }
    }
}

pub fn prompt_hash(prompt: &PromptContent) -> String {
    let mut hasher = Sha256::new();
    hasher.update(prompt.name.as_bytes());
    hasher.update([0u8]);
    hasher.update(prompt.content.as_bytes());
    let digest = hasher.finalize();
    format!("{digest:x}")[..16].to_string()
}

/// Pane that hosts the agent. A pinned pane wins while it is listed, then
/// the first pane running something other than a shell, then the active
/// pane, then the first listed. Moving focus never moves the agent.
pub fn agent_pane<'a>(panes: &'a [PaneInfo], pinned: Option<&str>) -> Option<&'a PaneInfo> {
    pinned
        .and_then(|id| panes.iter().find(|p| p.pane_id == id))
        .or_else(|| panes.iter().find(|p| !is_shell_command(&p.current_cmd)))
        .or_else(|| panes.iter().find(|p| p.active))
        .or_else(|| panes.first())
}

// ─── Tracker ─────────────────────────────────────────────────────

pub struct PaneAlertTracker {
    provider: ProviderKind,
    alerts: HashMap<String, AlertState>,
    buffer: ScreenBuffer,
}

impl PaneAlertTracker {
    pub fn new(provider: ProviderKind) -> Self {
        Self {
            provider,
            alerts: HashMap::new(),
            buffer: ScreenBuffer::new(24, 80),
        }
    }

    pub fn alert(&self, pane_id: &str) -> Option<&AlertState> {
        self.alerts.get(pane_id)
    }

    pub fn active_alerts(&self) -> usize {
        self.alerts.len()
    }

    /// Attach the notifier's message reference to a raised alert.
    pub fn set_notification_ref(&mut self, pane_id: &str, notification_ref: String) -> bool {
        match self.alerts.get_mut(pane_id) {
            Some(alert) => {
                alert.notification_ref = Some(notification_ref);
                true
            }
            None => false,
        }
    }

    /// Check every pane except the agent's for a prompt. `agent` is the
    /// caller's pinned agent pane, if it has one.
    pub fn scan(
        &mut self,
        panes: &[PaneInfo],
        agent: Option<&str>,
        source: &dyn TerminalSource,
        now_ms: u64,
    ) -> Vec<AlertAction> {
        let mut actions = Vec::new();
        if panes.len() <= 1 {
            if !self.alerts.is_empty() {
                let keep = panes.first().map(|p| p.pane_id.as_str());
                self.remove_missing(|id| Some(id) == keep, &mut actions);
            }
            return actions;
        }

        let primary = agent_pane(panes, agent).map(|p| p.pane_id.clone());
        self.remove_missing(
            |id| panes.iter().any(|p| p.pane_id == id) && Some(id) != primary.as_deref(),
            &mut actions,
        );

        for pane in panes {
            if Some(&pane.pane_id) == primary.as_ref() {
                continue;
            }
            match self.detect(pane, source) {
                Ok(prompt) => self.update(&pane.pane_id, prompt, now_ms, &mut actions),
                Err(e) if e.is_not_found() => {
                    if let Some(alert) = self.alerts.remove(&pane.pane_id) {
                        actions.push(AlertAction::Remove {
                            pane_id: alert.pane_id,
                            notification_ref: alert.notification_ref,
                        });
                    }
                }
                Err(e) => {
                    debug!(pane = %pane.pane_id, error = %e, "pane capture failed, keeping alert state");
                }
            }
        }
        actions
    }

    /// Drop every alert, e.g. when the window is unbound.
    pub fn teardown(&mut self) -> Vec<AlertAction> {
        let mut actions = Vec::new();
        self.remove_missing(|_| false, &mut actions);
        actions
    }

    fn detect(
        &mut self,
        pane: &PaneInfo,
        source: &dyn TerminalSource,
    ) -> Result<Option<PromptContent>, TmuxError> {
        let capture = source.capture(&pane.pane_id)?;
        self.buffer.resize(capture.rows, capture.cols);
        self.buffer.feed(&capture.bytes);
        Ok(extract_interactive_prompt(&self.buffer.frame(), self.provider))
    }

    fn update(
        &mut self,
        pane_id: &str,
        prompt: Option<PromptContent>,
        now_ms: u64,
        actions: &mut Vec<AlertAction>,
    ) {
        let Some(prompt) = prompt else {
            if let Some(alert) = self.alerts.remove(pane_id) {
                actions.push(AlertAction::Dismiss {
                    pane_id: alert.pane_id,
                    notification_ref: alert.notification_ref,
                });
            }
            return;
        };

        let hash = prompt_hash(&prompt);
        if let Some(alert) = self.alerts.get_mut(pane_id) {
            if alert.prompt_hash == hash {
                alert.last_seen_ms = now_ms;
                return;
            }
            // Different prompt in the same pane: retire the old alert first.
            actions.push(AlertAction::Dismiss {
                pane_id: pane_id.to_string(),
                notification_ref: alert.notification_ref.take(),
            });
        }
        self.alerts.insert(
            pane_id.to_string(),
            AlertState {
                pane_id: pane_id.to_string(),
                prompt_hash: hash.clone(),
                notification_ref: None,
                last_seen_ms: now_ms,
            },
        );
        actions.push(AlertAction::Raise {
            pane_id: pane_id.to_string(),
            prompt,
            prompt_hash: hash,
        });
    }

    fn remove_missing(&mut self, keep: impl Fn(&str) -> bool, actions: &mut Vec<AlertAction>) {
        let gone: Vec<String> = self
            .alerts
            .keys()
            .filter(|id| !keep(id.as_str()))
            .cloned()
            .collect();
        for id in gone {
            if let Some(alert) = self.alerts.remove(&id) {
                actions.push(AlertAction::Remove {
                    pane_id: alert.pane_id,
                    notification_ref: alert.notification_ref,
                });
            }
        }
    }
}

// ─── Topology Cache ──────────────────────────────────────────────

/// Pane listing for every managed window, refreshed at most once per
/// interval.
#[derive(Debug)]
pub struct TopologyCache {
    refresh_ms: u64,
    fetched_at_ms: Option<u64>,
    panes: HashMap<String, Vec<PaneInfo>>,
}

impl TopologyCache {
    pub fn new(config: &AlertConfig) -> Self {
        Self {
            refresh_ms: config.topology_refresh_ms,
            fetched_at_ms: None,
            panes: HashMap::new(),
        }
    }

    pub fn is_stale(&self, now_ms: u64) -> bool {
        self.fetched_at_ms
            .is_none_or(|at| now_ms.saturating_sub(at) >= self.refresh_ms)
    }

    /// Refresh from the controller when stale. Returns whether it refreshed.
    pub fn refresh(
        &mut self,
        controller: &dyn WindowController,
        now_ms: u64,
    ) -> Result<bool, TmuxError> {
        if !self.is_stale(now_ms) {
            return Ok(false);
        }
        self.replace(controller.list_all_panes()?, now_ms);
        Ok(true)
    }

    pub fn replace(&mut self, panes: Vec<PaneInfo>, now_ms: u64) {
        self.panes.clear();
        for pane in panes {
            self.panes
                .entry(pane.window_id.clone())
                .or_default()
                .push(pane);
        }
        self.fetched_at_ms = Some(now_ms);
    }

    pub fn panes(&self, window_id: &str) -> &[PaneInfo] {
        self.panes.get(window_id).map_or(&[], Vec::as_slice)
    }

    pub fn contains(&self, window_id: &str) -> bool {
        self.panes.contains_key(window_id)
    }

    pub fn windows(&self) -> impl Iterator<Item = (&str, &[PaneInfo])> {
        self.panes.iter().map(|(id, panes)| (id.as_str(), panes.as_slice()))
    }

    /// Force the next [`refresh`](Self::refresh) to hit tmux.
    pub fn invalidate(&mut self) {
        self.fetched_at_ms = None;
    }
}
