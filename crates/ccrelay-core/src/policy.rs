//! Central capability gate.
//!
//! Every optional behavior is checked here before it is offered or attempted.
//! Call sites never inspect [`ProviderCapabilities`] fields directly.

use crate::error::EngineError;
use crate::types::{Capability, ProviderCapabilities, ProviderKind, StrategyKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapabilityPolicy {
    provider: ProviderKind,
    capabilities: ProviderCapabilities,
}

impl CapabilityPolicy {
    pub fn for_provider(provider: ProviderKind) -> Self {
        Self {
            provider,
            capabilities: provider.capabilities(),
        }
    }

    pub fn provider(&self) -> ProviderKind {
        self.provider
    }

    pub fn permits(&self, capability: Capability) -> bool {
        let caps = &self.capabilities;
        match capability {
            Capability::IncrementalRead => caps.supports_incremental_read,
            Capability::HookFeed => caps.supports_hook_feed,
            Capability::Resume => caps.supports_resume,
            Capability::Continue => caps.supports_continue,
        }
    }

    /// Reject an unsupported capability before anything is attempted.
    pub fn check(&self, capability: Capability) -> Result<(), EngineError> {
        if self.permits(capability) {
            Ok(())
        } else {
            Err(EngineError::CapabilityUnsupported {
                provider: self.provider,
                capability,
            })
        }
    }

    pub fn check_strategy(&self, strategy: StrategyKind) -> Result<(), EngineError> {
        match strategy.required_capability() {
            Some(cap) => self.check(cap),
            None => Ok(()),
        }
    }

    /// Strategies that may be shown to a user, in preference order.
    pub fn offered_strategies(&self) -> Vec<StrategyKind> {
        StrategyKind::ALL
            .into_iter()
            .filter(|s| self.check_strategy(*s).is_ok())
            .collect()
    }

    /// Strategy used when input arrives for a dead window with no explicit choice.
    pub fn default_strategy(&self) -> StrategyKind {
        if self.permits(Capability::Continue) {
            StrategyKind::Continue
        } else {
            StrategyKind::Fresh
        }
    }
}
