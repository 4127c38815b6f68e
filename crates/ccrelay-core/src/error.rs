//! Engine error taxonomy.
//!
//! Each variant maps to one handling rule: transient failures are retried on
//! the next cycle, corrupt records are skipped, stale references mark a
//! binding dead, unsupported capabilities are rejected before any action and
//! recovery failures drive the fallback chain.

use thiserror::Error;

use crate::types::{Capability, ProviderKind, StrategyKind};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("transient io failure ({context}): {detail}")]
    TransientIo { context: String, detail: String },

    #[error("corrupt record at {location}: {detail}")]
    CorruptRecord { location: String, detail: String },

    #[error("stale reference: {key}")]
    StaleReference { key: String },

    #[error("{provider} does not support {capability}")]
    CapabilityUnsupported {
        provider: ProviderKind,
        capability: Capability,
    },

    #[error("{strategy} recovery failed: {reason}")]
    RecoveryFailure {
        strategy: StrategyKind,
        reason: String,
    },
}

impl EngineError {
    pub fn transient(context: impl Into<String>, detail: impl std::fmt::Display) -> Self {
        Self::TransientIo {
            context: context.into(),
            detail: detail.to_string(),
        }
    }

    pub fn stale(key: impl Into<String>) -> Self {
        Self::StaleReference { key: key.into() }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::TransientIo { .. })
    }

    pub fn is_stale(&self) -> bool {
        matches!(self, Self::StaleReference { .. })
    }
}

impl From<std::io::Error> for EngineError {
    fn from(e: std::io::Error) -> Self {
        Self::transient("io", e)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown provider: {0}")]
pub struct UnknownProvider(pub String);
