//! Transcript store discovery.
//!
//! Maps a working directory to the session files each backend keeps for it:
//! - Claude: `projects/<encoded cwd>/` with `sessions-index.json` and bare
//!   `<session>.jsonl` files
//! - Codex: `sessions/YYYY/MM/DD/rollout-*.jsonl`, first line `session_meta`
//! - Gemini: `tmp/<sha256(cwd)>/chats/session-*.json`
//!
//! The store is read-only from here.

use std::collections::HashSet;
use std::fs;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use ccrelay_core::AgentEvent;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::provider::{ProviderAdapter, truncate_chars};

/// Lines read from the head of a JSONL file when looking for metadata.
const HEAD_LINES: usize = 20;
/// Codex nests files by date; stop walking below this depth.
const MAX_WALK_DEPTH: usize = 5;
const SUMMARY_MAX_CHARS: usize = 60;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscriptRoots {
    pub claude_projects: PathBuf,
    pub codex_sessions: PathBuf,
    pub gemini_tmp: PathBuf,
}

impl TranscriptRoots {
    pub fn under_home(home: &Path) -> Self {
        Self {
            claude_projects: home.join(".claude").join("projects"),
            codex_sessions: home.join(".codex").join("sessions"),
            gemini_tmp: home.join(".gemini").join("tmp"),
        }
    }
}

/// A prior session offered for resume.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResumeCandidate {
    pub session_id: String,
    pub transcript_path: PathBuf,
    pub modified: DateTime<Utc>,
    /// First user message, truncated.
    pub summary: String,
}

/// A session file located for a working directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SessionFile {
    pub session_id: String,
    pub path: PathBuf,
    pub modified: DateTime<Utc>,
}

/// Encode a path the way Claude Code names project directories.
/// Example: `/Users/vm/project` -> `-Users-vm-project`
pub fn encode_path(path: &str) -> String {
    path.replace('/', "-")
}

/// Resolve symlinks when the directory still exists.
pub fn canonical_dir(path: &Path) -> PathBuf {
    fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

fn same_dir(a: &Path, b: &Path) -> bool {
    a == b || canonical_dir(a) == canonical_dir(b)
}

pub(crate) fn file_modified(path: &Path) -> Option<DateTime<Utc>> {
    let modified = fs::metadata(path).and_then(|m| m.modified()).ok()?;
    Some(DateTime::<Utc>::from(modified))
}

/// Newest first, each with a one-line summary.
pub(crate) fn into_candidates(
    adapter: &dyn ProviderAdapter,
    mut files: Vec<SessionFile>,
) -> Vec<ResumeCandidate> {
    files.sort_by(|a, b| b.modified.cmp(&a.modified));
    files
        .into_iter()
        .map(|f| ResumeCandidate {
            summary: session_summary(adapter, &f.path),
            session_id: f.session_id,
            transcript_path: f.path,
            modified: f.modified,
        })
        .collect()
}

/// First user message of a transcript.
fn session_summary(adapter: &dyn ProviderAdapter, path: &Path) -> String {
    let events = if adapter.capabilities().supports_incremental_read {
        head_lines(path, HEAD_LINES * 5)
            .iter()
            .filter_map(|l| adapter.parse_line(l).ok())
            .flatten()
            .collect()
    } else {
        fs::read_to_string(path)
            .ok()
            .and_then(|content| adapter.parse_document(&content, 0).ok())
            .map(|doc| doc.events)
            .unwrap_or_default()
    };
    events
        .into_iter()
        .find_map(|e| match e {
            AgentEvent::UserMessage { text } => Some(text),
            _ => None,
        })
        .map(|text| {
            let first_line = text.lines().next().unwrap_or_default().trim().to_string();
            truncate_chars(&first_line, SUMMARY_MAX_CHARS)
        })
        .unwrap_or_default()
}

fn head_lines(path: &Path, limit: usize) -> Vec<String> {
    let Ok(file) = fs::File::open(path) else {
        return Vec::new();
    };
    BufReader::new(file)
        .lines()
        .take(limit)
        .map_while(Result::ok)
        .collect()
}

// ─── Claude ──────────────────────────────────────────────────────

/// Entry in the `sessions-index.json` file.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionIndexEntry {
    pub session_id: String,
    pub full_path: String,
    #[serde(default)]
    pub project_path: String,
    pub modified: DateTime<Utc>,
    #[serde(default)]
    pub is_sidechain: bool,
}

/// The `sessions-index.json` file structure.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionsIndex {
    #[serde(default)]
    pub original_path: String,
    #[serde(default)]
    pub entries: Vec<SessionIndexEntry>,
}

fn read_sessions_index(path: &Path) -> Result<SessionsIndex, String> {
    let content = fs::read_to_string(path).map_err(|e| format!("read error: {e}"))?;
    serde_json::from_str(&content).map_err(|e| format!("parse error: {e}"))
}

fn load_index(project_dir: &Path) -> Option<SessionsIndex> {
    let index_path = project_dir.join("sessions-index.json");
    if !index_path.exists() {
        return None;
    }
    match read_sessions_index(&index_path) {
        Ok(index) => Some(index),
        Err(e) => {
            warn!(
                path = %index_path.display(),
                error = %e,
                "failed to read sessions-index.json"
            );
            None
        }
    }
}

/// `cwd` recorded in the first lines of a Claude JSONL transcript.
pub fn read_cwd_from_jsonl(path: &Path) -> Option<PathBuf> {
    head_lines(path, HEAD_LINES).iter().find_map(|line| {
        serde_json::from_str::<Value>(line)
            .ok()?
            .get("cwd")?
            .as_str()
            .filter(|s| !s.is_empty())
            .map(PathBuf::from)
    })
}

pub(crate) fn claude_project_dir(root: &Path, cwd: &Path) -> PathBuf {
    root.join(encode_path(&canonical_dir(cwd).to_string_lossy()))
}

/// Sessions recorded for `cwd`: indexed entries plus un-indexed files.
pub(crate) fn claude_sessions(root: &Path, cwd: &Path) -> Vec<SessionFile> {
    let dir = claude_project_dir(root, cwd);
    let mut sessions = Vec::new();
    let mut indexed: HashSet<String> = HashSet::new();

    let index = load_index(&dir);
    let original_path = index
        .as_ref()
        .map(|i| i.original_path.clone())
        .filter(|p| !p.is_empty());

    if let Some(index) = &index {
        let original_matches = original_path
            .as_deref()
            .is_some_and(|p| same_dir(Path::new(p), cwd));
        for entry in &index.entries {
            indexed.insert(entry.session_id.clone());
            if entry.is_sidechain {
                continue;
            }
            let matches = original_matches
                || (!entry.project_path.is_empty()
                    && same_dir(Path::new(&entry.project_path), cwd));
            if !matches {
                continue;
            }
            let path = PathBuf::from(&entry.full_path);
            if path.exists() {
                sessions.push(SessionFile {
                    session_id: entry.session_id.clone(),
                    path,
                    modified: entry.modified,
                });
            }
        }
    }

    let Ok(entries) = fs::read_dir(&dir) else {
        return sessions;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("jsonl") {
            continue;
        }
        let Some(session_id) = path.file_stem().and_then(|s| s.to_str()).map(str::to_string)
        else {
            continue;
        };
        if indexed.contains(&session_id) {
            continue;
        }
        // The encoding is lossy (`/a-b` and `/a/b` collide); confirm the cwd.
        let file_cwd = original_path
            .as_ref()
            .map(PathBuf::from)
            .or_else(|| read_cwd_from_jsonl(&path));
        if !file_cwd.is_some_and(|c| same_dir(&c, cwd)) {
            continue;
        }
        let Some(modified) = file_modified(&path) else {
            continue;
        };
        sessions.push(SessionFile {
            session_id,
            path,
            modified,
        });
    }
    sessions
}

/// Search every project directory for `session_id`.
pub(crate) fn claude_find_session(root: &Path, session_id: &str) -> Option<PathBuf> {
    let entries = match fs::read_dir(root) {
        Ok(entries) => entries,
        Err(e) => {
            debug!(root = %root.display(), error = %e, "claude projects root unreadable");
            return None;
        }
    };
    let file_name = format!("{session_id}.jsonl");
    for entry in entries.flatten() {
        let dir = entry.path();
        if !dir.is_dir() {
            continue;
        }
        let candidate = dir.join(&file_name);
        if candidate.exists() {
            return Some(candidate);
        }
        if let Some(index) = load_index(&dir) {
            let hit = index
                .entries
                .iter()
                .find(|e| e.session_id == session_id)
                .map(|e| PathBuf::from(&e.full_path))
                .filter(|p| p.exists());
            if hit.is_some() {
                return hit;
            }
        }
    }
    None
}

// ─── Codex ───────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct CodexMeta {
    pub session_id: String,
    pub cwd: PathBuf,
    pub started: Option<DateTime<Utc>>,
}

fn collect_files(dir: &Path, ext: &str, depth: usize, out: &mut Vec<PathBuf>) {
    if depth > MAX_WALK_DEPTH {
        return;
    }
    let Ok(entries) = fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            collect_files(&path, ext, depth + 1, out);
        } else if path.extension().and_then(|e| e.to_str()) == Some(ext) {
            out.push(path);
        }
    }
}

pub(crate) fn read_codex_meta(path: &Path) -> Option<CodexMeta> {
    head_lines(path, HEAD_LINES).iter().find_map(|line| {
        let value: Value = serde_json::from_str(line).ok()?;
        if value.get("type")?.as_str()? != "session_meta" {
            return None;
        }
        let payload = value.get("payload")?;
        Some(CodexMeta {
            session_id: payload.get("id")?.as_str()?.to_string(),
            cwd: PathBuf::from(payload.get("cwd")?.as_str()?),
            started: payload
                .get("timestamp")
                .and_then(Value::as_str)
                .and_then(|s| s.parse().ok()),
        })
    })
}

pub(crate) fn codex_sessions(root: &Path, cwd: &Path) -> Vec<SessionFile> {
    let mut files = Vec::new();
    collect_files(root, "jsonl", 0, &mut files);
    files
        .into_iter()
        .filter_map(|path| {
            let meta = read_codex_meta(&path)?;
            if !same_dir(&meta.cwd, cwd) {
                return None;
            }
            let modified = file_modified(&path).or(meta.started)?;
            Some(SessionFile {
                session_id: meta.session_id,
                path,
                modified,
            })
        })
        .collect()
}

pub(crate) fn codex_find_session(root: &Path, session_id: &str) -> Option<PathBuf> {
    let mut files = Vec::new();
    collect_files(root, "jsonl", 0, &mut files);
    // Rollout file names end in the session id; check those first.
    let (named, rest): (Vec<PathBuf>, Vec<PathBuf>) = files.into_iter().partition(|p| {
        p.file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.contains(session_id))
    });
    named
        .into_iter()
        .chain(rest)
        .find(|p| read_codex_meta(p).is_some_and(|m| m.session_id == session_id))
}

// ─── Gemini ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiSessionHeader {
    session_id: String,
    #[serde(default)]
    last_updated: Option<DateTime<Utc>>,
}

/// Directory name Gemini CLI uses for a project: hex SHA-256 of the path.
pub fn gemini_project_hash(cwd: &Path) -> String {
    let digest = Sha256::digest(canonical_dir(cwd).to_string_lossy().as_bytes());
    format!("{digest:x}")
}

fn gemini_chat_files(chats_dir: &Path) -> Vec<PathBuf> {
    let Ok(entries) = fs::read_dir(chats_dir) else {
        return Vec::new();
    };
    entries
        .flatten()
        .map(|e| e.path())
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with("session-") && n.ends_with(".json"))
        })
        .collect()
}

fn read_gemini_header(path: &Path) -> Option<GeminiSessionHeader> {
    let content = fs::read_to_string(path).ok()?;
    serde_json::from_str(&content).ok()
}

pub(crate) fn gemini_chats_dir(root: &Path, cwd: &Path) -> PathBuf {
    root.join(gemini_project_hash(cwd)).join("chats")
}

pub(crate) fn gemini_sessions(root: &Path, cwd: &Path) -> Vec<SessionFile> {
    gemini_chat_files(&gemini_chats_dir(root, cwd))
        .into_iter()
        .filter_map(|path| {
            let header = read_gemini_header(&path)?;
            let modified = header.last_updated.or_else(|| file_modified(&path))?;
            Some(SessionFile {
                session_id: header.session_id,
                path,
                modified,
            })
        })
        .collect()
}

/// File for `session_id` within one chats directory. File names carry the
/// first eight characters of the id, so those are parsed first.
pub(crate) fn gemini_session_in(chats_dir: &Path, session_id: &str) -> Option<PathBuf> {
    let short: String = session_id.chars().take(8).collect();
    let (named, rest): (Vec<PathBuf>, Vec<PathBuf>) = gemini_chat_files(chats_dir)
        .into_iter()
        .partition(|p| p.to_string_lossy().contains(&short));
    named
        .into_iter()
        .chain(rest)
        .find(|p| read_gemini_header(p).is_some_and(|h| h.session_id == session_id))
}

pub(crate) fn gemini_find_session(root: &Path, session_id: &str) -> Option<PathBuf> {
    let entries = fs::read_dir(root).ok()?;
    entries
        .flatten()
        .map(|e| e.path().join("chats"))
        .filter(|d| d.is_dir())
        .find_map(|d| gemini_session_in(&d, session_id))
}
