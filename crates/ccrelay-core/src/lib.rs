//! ccrelay-core: shared types, the engine error taxonomy and the capability gate.
//! The only IO is in [`files`]: atomic JSON state and append-only line reads.

pub mod error;
pub mod files;
pub mod policy;
pub mod types;

pub use error::{EngineError, UnknownProvider};
pub use files::{LineBatch, load_json, read_complete_lines, write_json_atomic};
pub use policy::CapabilityPolicy;
pub use types::{
    AgentEvent, Capability, ProviderCapabilities, ProviderKind, RecoveryStrategy,
    SessionReference, StrategyKind, ToolInvocation, ToolOutcome, TurnOutcome, WindowState,
    is_window_id,
};
