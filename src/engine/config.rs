//! Engine configuration options.

use crate::config::ExchangeParams;

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Exchange-wide parameters. Governance may replace them between blocks.
    pub params: ExchangeParams,
    /// Maximum number of events to retain in memory, trimmed at the end of a block.
    pub max_events: usize,
    /// Run the invariant routine at the end of every block.
    pub check_invariants: bool,
}

impl EngineConfig {
    pub fn with_params(params: ExchangeParams) -> Self {
        Self {
            params,
            ..Self::default()
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            params: ExchangeParams::default(),
            max_events: 100_000,
            check_invariants: cfg!(debug_assertions),
        }
    }
}
