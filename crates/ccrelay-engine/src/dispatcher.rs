//! Merges feed-pushed and poll-derived events into one ordered stream per
//! window.
//!
//! Pure state machine: callers pass the clock in and drain outbound updates
//! when they are ready to deliver them.

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

use ccrelay_core::{AgentEvent, ToolInvocation, ToolOutcome};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Completed invocation ids remembered per window for duplicate outcomes.
const COMPLETED_MEMORY: usize = 512;
/// Unanswered tool calls kept per window; the oldest is forgotten first.
const PENDING_TOOL_LIMIT: usize = 512;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatcherConfig {
    /// Same event from the other channel within this window is dropped.
    pub suppression_window_ms: u64,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            suppression_window_ms: 3_000,
        }
    }
}

/// Channel an event arrived through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Origin {
    Feed,
    Poll,
}

// ─── Outbound ────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "update", rename_all = "snake_case")]
pub enum Update {
    Event(AgentEvent),
    /// An invocation and its outcome, rendered as one message.
    ToolCompleted {
        invocation: ToolInvocation,
        outcome: ToolOutcome,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum DeliveryAction {
    Send,
    /// Replace the message previously delivered as `target`.
    Edit { target: u64 },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Outbound {
    pub window_id: String,
    pub delivery_id: u64,
    pub action: DeliveryAction,
    pub update: Update,
}

// ─── Dispatcher ──────────────────────────────────────────────────

#[derive(Debug, Default)]
struct WindowStream {
    queue: VecDeque<Outbound>,
    recent: VecDeque<(String, Origin, u64)>,
    pending_tools: HashMap<String, (u64, ToolInvocation)>,
    pending_order: VecDeque<String>,
    completed: VecDeque<String>,
    completed_set: HashSet<String>,
    subagents: BTreeSet<String>,
}

impl WindowStream {
    fn prune(&mut self, now_ms: u64, window_ms: u64) {
        while self
            .recent
            .front()
            .is_some_and(|(_, _, at)| now_ms.saturating_sub(*at) > window_ms)
        {
            self.recent.pop_front();
        }
    }

    fn remember_pending(&mut self, delivery_id: u64, invocation: ToolInvocation) {
        let id = invocation.invocation_id.clone();
        if self
            .pending_tools
            .insert(id.clone(), (delivery_id, invocation))
            .is_none()
        {
            self.pending_order.push_back(id);
        }
        while self.pending_tools.len() > PENDING_TOOL_LIMIT {
            let Some(old) = self.pending_order.pop_front() else {
                break;
            };
            self.pending_tools.remove(&old);
        }
    }

    fn take_pending(&mut self, id: &str) -> Option<(u64, ToolInvocation)> {
        let found = self.pending_tools.remove(id)?;
        self.pending_order.retain(|pending| pending != id);
        Some(found)
    }

    fn remember_completed(&mut self, id: String) {
        if self.completed_set.insert(id.clone()) {
            self.completed.push_back(id);
        }
        while self.completed.len() > COMPLETED_MEMORY {
            if let Some(old) = self.completed.pop_front() {
                self.completed_set.remove(&old);
            }
        }
    }
}

#[derive(Debug, Default)]
pub struct EventDispatcher {
    config: DispatcherConfig,
    next_delivery: u64,
    windows: HashMap<String, WindowStream>,
}

impl EventDispatcher {
    pub fn new(config: DispatcherConfig) -> Self {
        Self {
            config,
            next_delivery: 0,
            windows: HashMap::new(),
        }
    }

    /// Queue one event. Returns false if it was suppressed as a duplicate.
    pub fn submit(&mut self, window_id: &str, origin: Origin, event: AgentEvent, now_ms: u64) -> bool {
        let window_ms = self.config.suppression_window_ms;
        let stream = self.windows.entry(window_id.to_string()).or_default();
        stream.prune(now_ms, window_ms);

        let fp = fingerprint(&event);
        if stream
            .recent
            .iter()
            .any(|(f, o, _)| *f == fp && *o != origin)
        {
            debug!(window = %window_id, kind = event.kind(), ?origin, "suppressed duplicate event");
            return false;
        }
        stream.recent.push_back((fp, origin, now_ms));

        match &event {
            AgentEvent::SubagentStart { subagent_id, .. } => {
                stream.subagents.insert(subagent_id.clone());
            }
            AgentEvent::SubagentStop { subagent_id } => {
                stream.subagents.remove(subagent_id);
            }
            _ => {}
        }

        let (action, update) = match event {
            AgentEvent::ToolOutcome(outcome) => {
                if stream.completed_set.contains(&outcome.invocation_id) {
                    debug!(window = %window_id, id = %outcome.invocation_id, "dropping second outcome");
                    return false;
                }
                stream.remember_completed(outcome.invocation_id.clone());
                match stream.take_pending(&outcome.invocation_id) {
                    Some((target, invocation)) => (
                        DeliveryAction::Edit { target },
                        Update::ToolCompleted { invocation, outcome },
                    ),
                    None => (
                        DeliveryAction::Send,
                        Update::Event(AgentEvent::ToolOutcome(outcome)),
                    ),
                }
            }
            other => (DeliveryAction::Send, Update::Event(other)),
        };

        self.next_delivery += 1;
        let delivery_id = self.next_delivery;
        if let Update::Event(AgentEvent::ToolInvocation(inv)) = &update {
            stream.remember_pending(delivery_id, inv.clone());
        }
        stream.queue.push_back(Outbound {
            window_id: window_id.to_string(),
            delivery_id,
            action,
            update,
        });
        true
    }

    /// Everything queued for one window, in submission order.
    pub fn drain(&mut self, window_id: &str) -> Vec<Outbound> {
        self.windows
            .get_mut(window_id)
            .map(|s| s.queue.drain(..).collect())
            .unwrap_or_default()
    }

    /// Everything queued, grouped by window.
    pub fn drain_all(&mut self) -> Vec<Outbound> {
        let mut ids: Vec<String> = self.windows.keys().cloned().collect();
        ids.sort();
        ids.iter().flat_map(|id| self.drain(id)).collect()
    }

    pub fn pending(&self) -> usize {
        self.windows.values().map(|s| s.queue.len()).sum()
    }

    pub fn active_subagents(&self, window_id: &str) -> usize {
        self.windows.get(window_id).map_or(0, |s| s.subagents.len())
    }

    /// Move a window's stream to a new id after a rebind.
    pub fn rename_window(&mut self, old: &str, new: &str) {
        if let Some(mut stream) = self.windows.remove(old) {
            for out in &mut stream.queue {
                out.window_id = new.to_string();
            }
            self.windows.insert(new.to_string(), stream);
        }
    }

    /// Drop all state for a window, including undelivered updates and
    /// unanswered tool invocations.
    pub fn remove_window(&mut self, window_id: &str) -> usize {
        match self.windows.remove(window_id) {
            Some(stream) => {
                if !stream.pending_tools.is_empty() {
                    debug!(window = %window_id, orphans = stream.pending_tools.len(), "discarding unanswered tool calls");
                }
                stream.queue.len()
            }
            None => 0,
        }
    }
}

/// Identity used to recognise the same event arriving through both channels.
fn fingerprint(event: &AgentEvent) -> String {
    match event {
        AgentEvent::AssistantMessage { text, thinking } => format!("assistant:{thinking}:{text}"),
        AgentEvent::UserMessage { text } => format!("user:{text}"),
        AgentEvent::ToolInvocation(inv) => format!("tool:{}", inv.invocation_id),
        AgentEvent::ToolOutcome(out) => format!("outcome:{}", out.invocation_id),
        AgentEvent::StatusChange { status, .. } => {
            format!("status:{}", status.as_deref().unwrap_or(""))
        }
        // Pane ids are only known to the poll side.
        AgentEvent::InteractivePrompt { name, content, .. } => format!("prompt:{name}:{content}"),
        AgentEvent::SubagentStart { subagent_id, .. } => format!("subagent+:{subagent_id}"),
        AgentEvent::SubagentStop { subagent_id } => format!("subagent-:{subagent_id}"),
        AgentEvent::TaskCompleted { subject, .. } => format!("task:{subject}"),
        // Heuristic and hook outcomes may disagree; one turn end is enough.
        AgentEvent::TurnEnd { .. } => "turn_end".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ccrelay_core::TurnOutcome;

    fn invocation(id: &str) -> AgentEvent {
        AgentEvent::ToolInvocation(ToolInvocation {
            invocation_id: id.into(),
            name: "Bash".into(),
            summary: "cargo fmt".into(),
        })
    }

    fn outcome(id: &str) -> AgentEvent {
        AgentEvent::ToolOutcome(ToolOutcome {
            invocation_id: id.into(),
            tool_name: Some("Bash".into()),
            text: "ok".into(),
            is_error: false,
        })
    }

    fn text(t: &str) -> AgentEvent {
        AgentEvent::AssistantMessage {
            text: t.into(),
            thinking: false,
        }
    }

    // ─── Tool pairing ────────────────────────────────────────────

    #[test]
    fn tool_outcome_edits_its_invocation() {
        let mut d = EventDispatcher::default();
        assert!(d.submit("@1", Origin::Poll, invocation("tu-1"), 0));
        assert!(d.submit("@1", Origin::Poll, outcome("tu-1"), 2_000));
        let out = d.drain("@1");
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].action, DeliveryAction::Send);
        assert_eq!(
            out[1].action,
            DeliveryAction::Edit {
                target: out[0].delivery_id
            }
        );
        match &out[1].update {
            Update::ToolCompleted { invocation, outcome } => {
                assert_eq!(invocation.invocation_id, "tu-1");
                assert_eq!(outcome.invocation_id, "tu-1");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn second_outcome_for_same_invocation_is_dropped() {
        let mut d = EventDispatcher::default();
        d.submit("@1", Origin::Poll, invocation("tu-1"), 0);
        d.submit("@1", Origin::Poll, outcome("tu-1"), 10);
        assert!(!d.submit("@1", Origin::Poll, outcome("tu-1"), 20_000));
        assert_eq!(d.drain("@1").len(), 2);
    }

    #[test]
    fn unpaired_outcome_is_sent_alone() {
        let mut d = EventDispatcher::default();
        d.submit("@1", Origin::Poll, outcome("tu-9"), 0);
        let out = d.drain("@1");
        assert_eq!(out[0].action, DeliveryAction::Send);
        assert!(matches!(out[0].update, Update::Event(AgentEvent::ToolOutcome(_))));
    }

    // ─── Suppression ─────────────────────────────────────────────

    #[test]
    fn cross_channel_duplicate_is_collapsed() {
        let mut d = EventDispatcher::default();
        let end = AgentEvent::TurnEnd {
            outcome: TurnOutcome::Completed,
        };
        let heuristic = AgentEvent::TurnEnd {
            outcome: TurnOutcome::Unknown,
        };
        assert!(d.submit("@1", Origin::Feed, end, 1_000));
        assert!(!d.submit("@1", Origin::Poll, heuristic, 2_500));
        assert_eq!(d.drain("@1").len(), 1);
    }

    #[test]
    fn same_channel_repeats_are_kept() {
        let mut d = EventDispatcher::default();
        assert!(d.submit("@1", Origin::Poll, text("done"), 0));
        assert!(d.submit("@1", Origin::Poll, text("done"), 100));
        assert_eq!(d.drain("@1").len(), 2);
    }

    #[test]
    fn suppression_expires_after_window() {
        let mut d = EventDispatcher::new(DispatcherConfig {
            suppression_window_ms: 3_000,
        });
        let prompt = |pane: Option<&str>| AgentEvent::InteractivePrompt {
            name: "PermissionPrompt".into(),
            content: "Do you want to proceed?".into(),
            pane_id: pane.map(str::to_string),
        };
        assert!(d.submit("@1", Origin::Feed, prompt(None), 0));
        assert!(!d.submit("@1", Origin::Poll, prompt(Some("%3")), 2_000));
        assert!(d.submit("@1", Origin::Poll, prompt(Some("%3")), 6_000));
    }

    // ─── Ordering ────────────────────────────────────────────────

    #[test]
    fn per_window_order_is_preserved() {
        let mut d = EventDispatcher::default();
        for (i, t) in ["a", "b", "c"].iter().enumerate() {
            d.submit("@1", Origin::Poll, text(t), i as u64);
            d.submit("@2", Origin::Poll, text(t), i as u64);
        }
        let texts: Vec<String> = d
            .drain("@1")
            .into_iter()
            .map(|o| match o.update {
                Update::Event(AgentEvent::AssistantMessage { text, .. }) => text,
                other => panic!("unexpected {other:?}"),
            })
            .collect();
        assert_eq!(texts, ["a", "b", "c"]);
        assert_eq!(d.pending(), 3);
        assert_eq!(d.drain_all().len(), 3);
        assert_eq!(d.pending(), 0);
    }

    // ─── Sub-tasks and teardown ──────────────────────────────────

    #[test]
    fn subagents_tracked_and_torn_down() {
        let mut d = EventDispatcher::default();
        let start = |id: &str| AgentEvent::SubagentStart {
            subagent_id: id.into(),
            name: None,
            description: None,
        };
        d.submit("@1", Origin::Feed, start("a"), 0);
        d.submit("@1", Origin::Feed, start("b"), 0);
        d.submit(
            "@1",
            Origin::Feed,
            AgentEvent::SubagentStop {
                subagent_id: "a".into(),
            },
            0,
        );
        assert_eq!(d.active_subagents("@1"), 1);
        d.submit("@1", Origin::Poll, invocation("tu-2"), 0);
        assert_eq!(d.remove_window("@1"), 4);
        assert_eq!(d.active_subagents("@1"), 0);
        assert!(d.drain("@1").is_empty());
    }

    #[test]
    fn unanswered_tool_calls_are_bounded() {
        let mut d = EventDispatcher::default();
        for i in 0..=PENDING_TOOL_LIMIT {
            d.submit("@1", Origin::Poll, invocation(&format!("tu-{i}")), 0);
        }
        d.drain("@1");
        let stream = &d.windows["@1"];
        assert_eq!(stream.pending_tools.len(), PENDING_TOOL_LIMIT);
        assert_eq!(stream.pending_order.len(), PENDING_TOOL_LIMIT);

        // The oldest call was forgotten, so its result arrives as a new message.
        d.submit("@1", Origin::Poll, outcome("tu-0"), 10);
        d.submit("@1", Origin::Poll, outcome(&format!("tu-{PENDING_TOOL_LIMIT}")), 10);
        let out = d.drain("@1");
        assert!(matches!(out[0].action, DeliveryAction::Send));
        assert!(matches!(out[1].action, DeliveryAction::Edit { .. }));
        assert_eq!(d.windows["@1"].pending_order.len(), PENDING_TOOL_LIMIT - 1);
    }

    #[test]
    fn rename_moves_queue_and_pending_tools() {
        let mut d = EventDispatcher::default();
        d.submit("@1", Origin::Poll, invocation("tu-1"), 0);
        d.rename_window("@1", "@7");
        d.submit("@7", Origin::Poll, outcome("tu-1"), 10);
        let out = d.drain("@7");
        assert_eq!(out.len(), 2);
        assert!(out.iter().all(|o| o.window_id == "@7"));
        assert!(matches!(out[1].action, DeliveryAction::Edit { .. }));
    }
}
