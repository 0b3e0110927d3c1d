// 8.0: exchange engine. one struct, its impl split by concern across these files.
// deterministic: no clocks, no randomness, no I/O. time and prices come in through begin_block.

mod batch;
mod config;
mod core;
mod execution;
mod funding;
mod genesis;
mod governance;
mod invariants;
mod lifecycle;
mod liquidations;
mod orders;
mod results;
mod triggers;

pub use config::EngineConfig;
pub use core::{Engine, ExchangeState};
pub use results::{BatchUpdateResult, BlockReport, EngineError, ErrorKind, LiquidationResult, MsgResponse, OrderResult};
