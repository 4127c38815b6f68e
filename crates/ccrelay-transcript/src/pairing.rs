//! Tool invocation / outcome pairing.

use std::collections::HashMap;

use ccrelay_core::AgentEvent;
use tracing::debug;

/// Invocations waiting for their outcome, keyed by invocation id.
///
/// An outcome passes only if it answers a pending invocation, which removes
/// it; so each invocation gets at most one outcome.
#[derive(Debug, Default)]
pub struct ToolPairing {
    pending: HashMap<String, String>,
}

impl ToolPairing {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply(&mut self, events: Vec<AgentEvent>) -> Vec<AgentEvent> {
        let mut out = Vec::with_capacity(events.len());
        for event in events {
            match event {
                AgentEvent::ToolInvocation(inv) => {
                    if self.pending.contains_key(&inv.invocation_id) {
                        debug!(id = %inv.invocation_id, "duplicate tool invocation dropped");
                        continue;
                    }
                    self.pending.insert(inv.invocation_id.clone(), inv.name.clone());
                    out.push(AgentEvent::ToolInvocation(inv));
                }
                AgentEvent::ToolOutcome(mut outcome) => {
                    let Some(name) = self.pending.remove(&outcome.invocation_id) else {
                        debug!(id = %outcome.invocation_id, "tool outcome without pending invocation");
                        continue;
                    };
                    outcome.tool_name.get_or_insert(name);
                    out.push(AgentEvent::ToolOutcome(outcome));
                }
                other => out.push(other),
            }
        }
        out
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Drop orphaned invocations. Returns how many were discarded.
    pub fn clear(&mut self) -> usize {
        let n = self.pending.len();
        self.pending.clear();
        n
    }
}
