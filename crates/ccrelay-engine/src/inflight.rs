//! At most one live scan per key.
//!
//! Starting a scan for a key cancels whatever scan was running for it. A
//! finished scan's result is only applied if its ticket is still current, so
//! a slow scan can never overwrite a newer one.

use std::collections::HashMap;

use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Handle given to one scan. Check [`token`](Self::token) between blocking
/// steps and stop early once it is cancelled.
#[derive(Debug, Clone)]
pub struct ScanTicket {
    pub key: String,
    pub generation: u64,
    pub token: CancellationToken,
}

impl ScanTicket {
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

#[derive(Debug, Default)]
pub struct InFlightScans {
    entries: HashMap<String, (u64, CancellationToken)>,
    next_generation: u64,
}

impl InFlightScans {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin(&mut self, key: &str) -> ScanTicket {
        self.next_generation += 1;
        let generation = self.next_generation;
        let token = CancellationToken::new();
        if let Some((old_gen, old)) = self
            .entries
            .insert(key.to_string(), (generation, token.clone()))
        {
            debug!(key, superseded = old_gen, "cancelling in-flight scan");
            old.cancel();
        }
        ScanTicket {
            key: key.to_string(),
            generation,
            token,
        }
    }

    /// Whether the ticket's result should be applied. Clears the entry when
    /// the ticket is current.
    pub fn finish(&mut self, ticket: &ScanTicket) -> bool {
        let current = self
            .entries
            .get(&ticket.key)
            .is_some_and(|(g, _)| *g == ticket.generation);
        if current {
            self.entries.remove(&ticket.key);
        }
        current && !ticket.is_cancelled()
    }

    pub fn cancel(&mut self, key: &str) {
        if let Some((_, token)) = self.entries.remove(key) {
            token.cancel();
        }
    }

    pub fn is_running(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Cancel everything; used on shutdown.
    pub fn teardown(&mut self) {
        for (_, (_, token)) in self.entries.drain() {
            token.cancel();
        }
    }
}
