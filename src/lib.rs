// exchange-core: order lifecycle and risk engine of an on-chain exchange.
// spot, perpetual, expiry-future and binary-option markets share one book model,
// one deposit ledger and one block pipeline. every computation is deterministic.
//
// file map (search X.0 for structs, X.1+ for logic):
//   1.x  types.rs: primitives: MarketId, SubaccountId, Denom, OrderHash, Price, Timestamp
//   2.x  order.rs: order types, specs, hashing, live orders
//   2.1x conditional.rs: stop/take triggers and the conditional store
//   2.2x orderbook.rs: price-time priority book
//   2.3x matching.rs: crossing rules, fills, execution phases
//   2.4x metadata.rs: per-side order counters and caps
//   3.x  margin.rs: initial margin and binary collateral
//   3.1  fees.rs: rounding, holds, maker/taker/relayer split
//   4.x  position.rs: position struct, PnL, increase/reduce/flip
//   5.x  funding.rs: premium sampling and funding index
//   6.x  liquidation.rs: liquidation check, payout split, shortfall waterfall
//   6.3  settlement.rs: market-wide settlement with haircut
//   7.x  config.rs: exchange-wide params
//   8.x  engine/: block pipeline, orders, matching, lifecycle, governance
//   9.x  ledger.rs: subaccount deposits and deltas
//   9.1  bank.rs, insurance.rs, oracle.rs: collaborators
//   10.x messages.rs: messages and governance updates
//   11.x events.rs: state transition events for audit
//   12.x market.rs: market config + runtime state
//   13.x genesis.rs: exportable snapshot

// core trading modules
pub mod conditional;
pub mod engine;
pub mod events;
pub mod fees;
pub mod funding;
pub mod margin;
pub mod market;
pub mod matching;
pub mod metadata;
pub mod order;
pub mod orderbook;
pub mod position;
pub mod types;

// risk modules
pub mod liquidation;
pub mod settlement;

// state and integration modules
pub mod bank;
pub mod config;
pub mod genesis;
pub mod insurance;
pub mod ledger;
pub mod messages;
pub mod oracle;

// re exports for convenience
pub use bank::{Bank, BankError, InMemoryBank};
pub use conditional::*;
pub use config::{AtomicAccess, ConfigError, ExchangeParams};
pub use engine::*;
pub use events::*;
pub use fees::*;
pub use funding::*;
pub use genesis::{GenesisDeposit, GenesisError, GenesisMarket, GenesisPosition, GenesisState};
pub use insurance::{InMemoryInsuranceFund, InsuranceError, InsuranceFund};
pub use ledger::*;
pub use liquidation::*;
pub use margin::*;
pub use market::*;
pub use matching::*;
pub use messages::*;
pub use metadata::*;
pub use oracle::{OraclePrice, PriceOracle, StaticOracle};
pub use order::*;
pub use orderbook::*;
pub use position::*;
pub use settlement::*;
pub use types::*;
