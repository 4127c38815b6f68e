//! Window ↔ session ↔ working-directory bindings.
//!
//! The registry is the only owner of [`WindowState`] and
//! [`SessionReference`]. Everything else looks them up by window id.
//! Mutations mark the state dirty; [`SessionRegistry::flush`] writes it
//! atomically, so a burst of changes in one tick costs one write.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use ccrelay_core::{
    Capability, CapabilityPolicy, EngineError, SessionReference, WindowState, is_window_id,
    load_json, write_json_atomic,
};
use ccrelay_tmux::WindowInfo;
use ccrelay_transcript::{TranscriptRoots, adapter_for};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Current state file schema. Version 1 had no `version`, `sessions` or
/// `display_names` fields.
pub const STATE_VERSION: u32 = 2;

/// On-disk registry state. Fields added after v1 all default.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RegistryState {
    #[serde(default = "legacy_version")]
    pub version: u32,
    /// Keyed by window id; v1 files may still use display names as keys.
    #[serde(default)]
    pub windows: BTreeMap<String, WindowState>,
    #[serde(default)]
    pub sessions: BTreeMap<String, SessionReference>,
    #[serde(default)]
    pub display_names: BTreeMap<String, String>,
}

fn legacy_version() -> u32 {
    1
}

/// Outcome of matching persisted windows against the live list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub kept: Vec<String>,
    /// `(old key, new window id)`
    pub remapped: Vec<(String, String)>,
    pub dropped: Vec<String>,
}

impl ReconcileReport {
    pub fn is_noop(&self) -> bool {
        self.remapped.is_empty() && self.dropped.is_empty()
    }
}

pub struct SessionRegistry {
    path: PathBuf,
    roots: TranscriptRoots,
    state: RegistryState,
    dirty: bool,
    scans_performed: usize,
}

impl SessionRegistry {
    /// Load from `path`. A missing file is an empty registry; an unreadable
    /// one is logged and replaced on the next flush.
    pub fn load(path: PathBuf, roots: TranscriptRoots) -> Result<Self, EngineError> {
        let state = match load_json::<RegistryState>(&path) {
            Ok(state) => state,
            Err(EngineError::CorruptRecord { location, detail }) => {
                warn!(path = %location, error = %detail, "registry state unreadable, starting empty");
                RegistryState::default()
            }
            Err(e) => return Err(e),
        };
        let dirty = state.version != STATE_VERSION && !state.windows.is_empty();
        Ok(Self {
            path,
            roots,
            state,
            dirty,
            scans_performed: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn roots(&self) -> &TranscriptRoots {
        &self.roots
    }

    pub fn state(&self) -> &RegistryState {
        &self.state
    }

    pub fn window(&self, window_id: &str) -> Option<&WindowState> {
        self.state.windows.get(window_id)
    }

    pub fn session(&self, window_id: &str) -> Option<&SessionReference> {
        self.state.sessions.get(window_id)
    }

    pub fn window_ids(&self) -> impl Iterator<Item = &str> {
        self.state.windows.keys().map(String::as_str)
    }

    pub fn display_name(&self, window_id: &str) -> Option<&str> {
        self.state.display_names.get(window_id).map(String::as_str)
    }

    /// Window currently bound to `session_id`, if any.
    pub fn window_for_session(&self, session_id: &str) -> Option<&str> {
        self.state
            .sessions
            .iter()
            .find(|(_, s)| s.session_id == session_id)
            .map(|(w, _)| w.as_str())
    }

    /// Expensive store scans done by [`resolve`](Self::resolve) so far.
    pub fn scans_performed(&self) -> usize {
        self.scans_performed
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    // ─── Mutations ───────────────────────────────────────────────

    pub fn bind_window(&mut self, mut window: WindowState) {
        window.bound_at.get_or_insert_with(Utc::now);
        let id = window.window_id.clone();
        if !window.display_name.is_empty() {
            self.state
                .display_names
                .insert(id.clone(), window.display_name.clone());
        }
        info!(window = %id, dir = %window.working_directory.display(), provider = %window.provider, "window bound");
        self.state.windows.insert(id, window);
        self.dirty = true;
    }

    /// Replace the session bound to a window as a whole. A different session
    /// id also resets the read offset, since it names a different transcript.
    pub fn bind_session(
        &mut self,
        window_id: &str,
        session: SessionReference,
    ) -> Result<(), EngineError> {
        let window = self
            .state
            .windows
            .get_mut(window_id)
            .ok_or_else(|| EngineError::stale(window_id))?;
        let previous = self.state.sessions.get(window_id);
        if previous == Some(&session) {
            return Ok(());
        }
        if previous.is_none_or(|p| p.session_id != session.session_id) {
            window.read_offset = 0;
        }
        debug!(window = %window_id, session = %session.session_id, "session bound");
        self.state.sessions.insert(window_id.to_string(), session);
        self.dirty = true;
        Ok(())
    }

    pub fn clear_session(&mut self, window_id: &str) {
        if self.state.sessions.remove(window_id).is_some() {
            if let Some(w) = self.state.windows.get_mut(window_id) {
                w.read_offset = 0;
            }
            self.dirty = true;
        }
    }

    pub fn unbind(&mut self, window_id: &str) -> Option<WindowState> {
        let removed = self.state.windows.remove(window_id)?;
        self.state.sessions.remove(window_id);
        self.state.display_names.remove(window_id);
        self.dirty = true;
        info!(window = %window_id, "window unbound");
        Some(removed)
    }

    /// Move everything bound to `old` onto `new`.
    pub fn rebind(&mut self, old: &str, new: &str) -> Result<(), EngineError> {
        let mut window = self
            .state
            .windows
            .remove(old)
            .ok_or_else(|| EngineError::stale(old))?;
        window.window_id = new.to_string();
        window.bound_at = Some(Utc::now());
        self.state.windows.insert(new.to_string(), window);
        if let Some(session) = self.state.sessions.remove(old) {
            self.state.sessions.insert(new.to_string(), session);
        }
        if let Some(name) = self.state.display_names.remove(old) {
            self.state.display_names.insert(new.to_string(), name);
        }
        self.dirty = true;
        info!(from = %old, to = %new, "window rebound");
        Ok(())
    }

    /// Record read progress. Incremental offsets never move backwards here;
    /// use [`reset_read_offset`](Self::reset_read_offset) after truncation.
    /// Returns whether the stored offset changed.
    pub fn advance_read_offset(&mut self, window_id: &str, offset: u64) -> Result<bool, EngineError> {
        let window = self
            .state
            .windows
            .get_mut(window_id)
            .ok_or_else(|| EngineError::stale(window_id))?;
        if offset == window.read_offset {
            return Ok(false);
        }
        let incremental =
            CapabilityPolicy::for_provider(window.provider).permits(Capability::IncrementalRead);
        if incremental && offset < window.read_offset {
            debug!(window = %window_id, stored = window.read_offset, offset, "ignoring backwards offset");
            return Ok(false);
        }
        window.read_offset = offset;
        self.dirty = true;
        Ok(true)
    }

    pub fn reset_read_offset(&mut self, window_id: &str, offset: u64) -> Result<(), EngineError> {
        let window = self
            .state
            .windows
            .get_mut(window_id)
            .ok_or_else(|| EngineError::stale(window_id))?;
        window.read_offset = offset;
        self.dirty = true;
        Ok(())
    }

    // ─── Resolution ──────────────────────────────────────────────

    /// Session bound to `window_id`, with its transcript located.
    ///
    /// Tries the stored path, then the provider's canonical path, then a
    /// full scan of the store. Whatever is found is stored so the scan is
    /// not repeated. `Ok(None)` means the window has no session yet.
    pub fn resolve(&mut self, window_id: &str) -> Result<Option<SessionReference>, EngineError> {
        if !self.state.windows.contains_key(window_id) {
            return Err(EngineError::stale(window_id));
        }
        let Some(session) = self.state.sessions.get(window_id).cloned() else {
            return Ok(None);
        };
        if session.transcript_path.as_deref().is_some_and(Path::exists) {
            return Ok(Some(session));
        }

        let adapter = adapter_for(session.provider);
        let found = match adapter.canonical_transcript_path(
            &self.roots,
            &session.working_directory,
            &session.session_id,
        ) {
            Some(path) => Some(path),
            None => {
                self.scans_performed += 1;
                let hit = adapter.scan_for_session(&self.roots, &session.session_id);
                match &hit {
                    Some(path) => info!(
                        window = %window_id,
                        session = %session.session_id,
                        path = %path.display(),
                        "transcript located by scan"
                    ),
                    None => debug!(window = %window_id, session = %session.session_id, "transcript not found"),
                }
                hit
            }
        };

        let Some(path) = found else {
            return Ok(Some(session));
        };
        let updated = SessionReference {
            transcript_path: Some(path),
            ..session
        };
        self.state
            .sessions
            .insert(window_id.to_string(), updated.clone());
        self.dirty = true;
        Ok(Some(updated))
    }

    // ─── Reconciliation ──────────────────────────────────────────

    /// Match persisted windows against the live window list after the
    /// controller restarted and reassigned ids.
    ///
    /// - a live id keeps its entry only while the live window still carries
    ///   the persisted display name;
    /// - any other id moves to the live window carrying its display name;
    /// - a legacy key (a bare display name) migrates the same way;
    /// - anything else is dropped.
    pub fn reconcile(&mut self, live: &[WindowInfo]) -> ReconcileReport {
        let live_names: HashMap<&str, &str> = live
            .iter()
            .map(|w| (w.window_id.as_str(), w.window_name.as_str()))
            .collect();
        let mut live_by_name: HashMap<&str, &str> = HashMap::new();
        for w in live {
            live_by_name
                .entry(w.window_name.as_str())
                .or_insert(w.window_id.as_str());
        }

        let old_windows = std::mem::take(&mut self.state.windows);
        let mut old_sessions = std::mem::take(&mut self.state.sessions);
        let mut old_names = std::mem::take(&mut self.state.display_names);
        let mut report = ReconcileReport::default();

        // Ids are reused across controller restarts, so a live id only
        // counts when the name matches too. Kept entries go first so a remap
        // never overwrites one.
        let mut kept = Vec::new();
        let mut moved = Vec::new();
        for (key, window) in old_windows {
            let label = if is_window_id(&key) {
                old_names
                    .remove(&key)
                    .unwrap_or_else(|| window.display_name.clone())
            } else {
                key.clone()
            };
            if live_names.get(key.as_str()) == Some(&label.as_str()) {
                kept.push((key, window, label));
            } else {
                moved.push((key, window, label));
            }
        }

        for (key, window, label) in kept {
            self.restore(&key, &key, window, &label, &mut old_sessions);
            report.kept.push(key);
        }

        for (key, window, label) in moved {
            let target = live_by_name
                .get(label.as_str())
                .filter(|id| !self.state.windows.contains_key(**id));
            match target {
                Some(&new_id) => {
                    debug!(from = %key, to = %new_id, name = %label, "window id remapped");
                    self.restore(&key, new_id, window, &label, &mut old_sessions);
                    report.remapped.push((key, new_id.to_string()));
                }
                None => {
                    debug!(key = %key, name = %label, "dropping stale window");
                    old_sessions.remove(&key);
                    report.dropped.push(key);
                }
            }
        }

        if !report.is_noop() || self.state.version != STATE_VERSION {
            self.dirty = true;
        }
        self.state.version = STATE_VERSION;
        info!(
            kept = report.kept.len(),
            remapped = report.remapped.len(),
            dropped = report.dropped.len(),
            "registry reconciled"
        );
        report
    }

    fn restore(
        &mut self,
        old_key: &str,
        new_id: &str,
        mut window: WindowState,
        name: &str,
        sessions: &mut BTreeMap<String, SessionReference>,
    ) {
        window.window_id = new_id.to_string();
        if !name.is_empty() {
            window.display_name = name.to_string();
            self.state
                .display_names
                .insert(new_id.to_string(), name.to_string());
        }
        self.state.windows.insert(new_id.to_string(), window);
        if let Some(session) = sessions.remove(old_key) {
            self.state.sessions.insert(new_id.to_string(), session);
        }
    }

    // ─── Persistence ─────────────────────────────────────────────

    /// Write the state if anything changed. Returns whether a write happened.
    pub fn flush(&mut self) -> Result<bool, EngineError> {
        if !self.dirty {
            return Ok(false);
        }
        self.state.version = STATE_VERSION;
        write_json_atomic(&self.path, &self.state)?;
        self.dirty = false;
        Ok(true)
    }
}
