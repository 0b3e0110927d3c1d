//! Genesis export and import.

use super::config::EngineConfig;
use super::core::Engine;
use super::results::EngineError;
use crate::bank::Bank;
use crate::genesis::{GenesisDeposit, GenesisMarket, GenesisPosition, GenesisState};
use crate::insurance::InsuranceFund;
use crate::ledger::Deposit;
use crate::market::MarketState;
use tracing::info;

impl Engine {
    /// Snapshot the exchange between blocks.
    pub fn export_genesis(&self) -> GenesisState {
        let markets = self
            .state
            .markets
            .values()
            .map(|market| GenesisMarket {
                config: market.config.clone(),
                status: market.status,
                funding: market.funding.clone(),
                mark_price: market.mark_price,
                last_trade_price: market.last_trade_price,
                settlement_price: market.settlement_price,
                resting_orders: market.book.all_orders().cloned().collect(),
                staged_orders: market.transient.clone(),
                conditional_orders: market.conditional.all().into_iter().cloned().collect(),
            })
            .collect();

        GenesisState {
            params: self.config.params.clone(),
            block: self.block,
            markets,
            deposits: self
                .state
                .deposits
                .iter()
                .map(|((subaccount_id, denom), deposit)| GenesisDeposit {
                    subaccount_id: *subaccount_id,
                    denom: denom.clone(),
                    available: deposit.available,
                    total: deposit.total,
                })
                .collect(),
            positions: self
                .state
                .positions
                .iter()
                .map(|((market_id, subaccount_id), position)| GenesisPosition {
                    market_id: *market_id,
                    subaccount_id: *subaccount_id,
                    position: position.clone(),
                })
                .collect(),
            fee_multipliers: self.state.fee_multipliers.iter().map(|(k, v)| (*k, *v)).collect(),
            protocol_fees: self.state.protocol_fees.iter().map(|(k, v)| (k.clone(), *v)).collect(),
            subaccount_nonces: self.state.nonces.iter().map(|(k, v)| (*k, *v)).collect(),
            next_sequence: self.state.next_sequence,
        }
    }

    /// Rebuild an engine from a snapshot. The params in the snapshot replace
    /// those in `config`; order counters are recomputed from the orders.
    pub fn from_genesis(
        config: EngineConfig,
        genesis: GenesisState,
        bank: impl Bank + 'static,
        insurance: impl InsuranceFund + 'static,
    ) -> Result<Self, EngineError> {
        genesis.validate().map_err(|err| EngineError::Genesis(err.to_string()))?;

        let config = EngineConfig {
            params: genesis.params,
            ..config
        };
        let mut engine = Engine::new(config, bank, insurance);
        engine.block = genesis.block;

        for entry in genesis.markets {
            let mut market = MarketState::new(entry.config, entry.funding);
            market.status = entry.status;
            market.mark_price = entry.mark_price;
            market.last_trade_price = entry.last_trade_price;
            market.settlement_price = entry.settlement_price;
            for order in entry.resting_orders {
                engine.state.metadata.track(&order, false);
                market.book.insert(order);
            }
            for order in entry.staged_orders {
                engine.state.metadata.track(&order, false);
                market.transient.push(order);
            }
            for conditional in entry.conditional_orders {
                engine.state.metadata.track(&conditional.order, true);
                market.conditional.insert(conditional);
            }
            engine.state.markets.insert(market.id(), market);
        }

        for entry in genesis.deposits {
            engine.state.deposits.set(
                entry.subaccount_id,
                &entry.denom,
                Deposit {
                    available: entry.available,
                    total: entry.total,
                },
            );
        }
        for entry in genesis.positions {
            engine
                .state
                .positions
                .set(entry.market_id, entry.subaccount_id, Some(entry.position));
        }
        engine.state.fee_multipliers = genesis.fee_multipliers.into_iter().collect();
        engine.state.protocol_fees = genesis.protocol_fees.into_iter().collect();
        engine.state.nonces = genesis.subaccount_nonces.into_iter().collect();
        engine.state.next_sequence = genesis.next_sequence.max(1);

        let violations = engine.check_invariants();
        if !violations.is_empty() {
            return Err(EngineError::Genesis(violations.join("; ")));
        }
        info!(
            height = engine.block.height,
            markets = engine.state.markets.len(),
            positions = engine.state.positions.len(),
            "engine restored from genesis"
        );
        Ok(engine)
    }
}
