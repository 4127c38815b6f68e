//! ccrelay runtime: the daemon, its tasks and the subcommands.
//!
//! The coordinator owns all engine state. Scans, the feed tailer and the
//! notifier run as separate tasks and talk to it over channels;
//! [`EngineHandle`] is the entry point for chat-side commands.

pub mod cli;
pub mod config;
pub mod coordinator;
pub mod daemon;
pub mod feed_task;
pub mod handle;
pub mod hook;
pub mod notifier;
pub mod status;

pub use coordinator::{ControlMessage, Coordinator, FeedMessage, InputOutcome};
pub use handle::EngineHandle;
pub use notifier::{Delivery, Notifier, StdoutNotifier};
