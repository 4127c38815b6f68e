//! ccrelay-engine: the session and terminal state engine.
//!
//! Bindings and their persistence, per-window scanning, pane alerts,
//! dead-session recovery and the outbound event stream. Everything here is a
//! state machine driven with an explicit clock; blocking tmux and filesystem
//! calls go through the traits in `ccrelay-tmux` so the runtime decides which
//! thread runs them.

pub mod alerts;
pub mod dispatcher;
pub mod inflight;
pub mod recovery;
pub mod registry;
pub mod scanner;

pub use alerts::{
    AlertAction, AlertConfig, AlertState, PaneAlertTracker, TopologyCache, agent_pane,
    prompt_hash,
};
pub use dispatcher::{DeliveryAction, DispatcherConfig, EventDispatcher, Origin, Outbound, Update};
pub use inflight::{InFlightScans, ScanTicket};
pub use recovery::{
    BindingState, LaunchPlan, LaunchResult, Planned, RecoveryConfig, RecoveryCoordinator,
    RecoveryOutcome, RecoveryRequest, launch,
};
pub use registry::{ReconcileReport, RegistryState, STATE_VERSION, SessionRegistry};
pub use scanner::{FailureStreak, ScanConfig, ScanReport, WindowScanner};
