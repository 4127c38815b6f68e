//! ccrelay-feed: the append-only hook event feed.
//!
//! Hook processes append [`FeedRecord`]s through [`FeedWriter`]; the daemon
//! reads them with [`FeedTailer`], whose cursor survives restarts.

pub mod record;
pub mod tailer;
pub mod writer;

pub use record::{FeedRecord, HookEvent, HookPayloadError, SessionStart, from_hook_payload};
pub use tailer::{FeedBatch, FeedTailer};
pub use writer::FeedWriter;
