// 8.0 engine/core.rs: main engine. holds every market, the deposit ledger, positions and
// the collaborators. a block is begin_block -> deliver* -> end_block.

use super::config::EngineConfig;
use super::results::{BlockReport, EngineError, MsgResponse};
use crate::bank::{Bank, BankError};
use crate::events::{BalanceEvent, Event, EventId, EventPayload};
use crate::insurance::InsuranceFund;
use crate::ledger::{Deposit, Deposits};
use crate::market::{MarketState, MarketType};
use crate::messages::{Msg, Origin};
use crate::metadata::{MetadataStore, OrderbookMetadata};
use crate::oracle::PriceOracle;
use crate::order::Order;
use crate::position::{Position, Positions};
use crate::types::{BlockContext, Denom, MarketId, OrderHash, Price, Side, SubaccountId};
use rust_decimal::Decimal;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, warn};

/// Everything a failed message must leave untouched. Cloned as a checkpoint
/// before each isolated unit of work.
#[derive(Debug, Clone, Default)]
pub struct ExchangeState {
    pub(super) markets: BTreeMap<MarketId, MarketState>,
    pub(super) deposits: Deposits,
    pub(super) positions: Positions,
    pub(super) metadata: MetadataStore,
    pub(super) fee_multipliers: BTreeMap<MarketId, Decimal>,
    pub(super) protocol_fees: BTreeMap<Denom, Decimal>,
    pub(super) nonces: BTreeMap<SubaccountId, u64>,
    pub(super) next_sequence: u64,
    // derivative market orders staged this block, one per (market, subaccount)
    pub(super) block_market_orders: BTreeSet<(MarketId, SubaccountId)>,
}

/** 8.1: main engine struct. all state lives here */
#[derive(Debug)]
pub struct Engine {
    pub(super) config: EngineConfig,
    pub(super) state: ExchangeState,
    pub(super) bank: Box<dyn Bank>,
    pub(super) insurance: Box<dyn InsuranceFund>,
    pub(super) events: Vec<Event>,
    pub(super) next_event_id: u64,
    pub(super) block: BlockContext,
}

impl Engine {
    pub fn new(config: EngineConfig, bank: impl Bank + 'static, insurance: impl InsuranceFund + 'static) -> Self {
        Self {
            config,
            state: ExchangeState {
                next_sequence: 1,
                ..ExchangeState::default()
            },
            bank: Box::new(bank),
            insurance: Box::new(insurance),
            events: Vec::new(),
            next_event_id: 1,
            block: BlockContext::default(),
        }
    }

    /// Run `f` as one unit: on error every state change it made, and every
    /// event it emitted, is discarded.
    pub(super) fn isolated<T>(
        &mut self,
        f: impl FnOnce(&mut Self) -> Result<T, EngineError>,
    ) -> Result<T, EngineError> {
        let checkpoint = self.state.clone();
        let events_len = self.events.len();
        let next_event_id = self.next_event_id;
        let result = f(self);
        if result.is_err() {
            self.state = checkpoint;
            self.events.truncate(events_len);
            self.next_event_id = next_event_id;
        }
        result
    }

    // 8.2: block phases

    /// Open a block: snapshot one reference price per market and sample funding premiums.
    pub fn begin_block(&mut self, block: BlockContext, oracle: &dyn PriceOracle) {
        self.block = block;
        self.state.block_market_orders.clear();

        for market in self.state.markets.values_mut() {
            if market.status.is_terminal() {
                continue;
            }
            let config = &market.config;
            let quoted = oracle.fresh_price(&config.base_denom, &config.quote_denom, block.time);
            market.mark_price = match config.market_type {
                MarketType::Spot => quoted.or(market.last_trade_price),
                _ => quoted,
            };
        }
        self.sample_funding_premiums();
        debug!(height = block.height, "block opened");
    }

    pub fn deliver(&mut self, msg: Msg) -> Result<MsgResponse, EngineError> {
        self.deliver_as(Origin::User, msg)
    }

    /// Handle one message. A failed message leaves no trace.
    pub fn deliver_as(&mut self, origin: Origin, msg: Msg) -> Result<MsgResponse, EngineError> {
        let name = msg.name();
        let result = self.isolated(|engine| engine.dispatch(origin, msg));
        if let Err(err) = &result {
            warn!(msg = name, kind = ?err.kind(), error = %err, "message rejected");
        }
        result
    }

    fn dispatch(&mut self, origin: Origin, msg: Msg) -> Result<MsgResponse, EngineError> {
        match msg {
            Msg::Deposit {
                subaccount_id,
                denom,
                amount,
            } => self.deposit(subaccount_id, &denom, amount),
            Msg::Withdraw {
                subaccount_id,
                denom,
                amount,
            } => self.withdraw(subaccount_id, &denom, amount),
            Msg::CreateLimitOrder(spec) => self
                .create_order(origin, spec, crate::order::OrderClass::Limit)
                .map(MsgResponse::Order),
            Msg::CreateMarketOrder(spec) => self
                .create_order(origin, spec, crate::order::OrderClass::Market)
                .map(MsgResponse::Order),
            Msg::CancelOrder {
                market_id,
                subaccount_id,
                order_hash,
            } => self
                .cancel_order(market_id, subaccount_id, order_hash)
                .map(|released| MsgResponse::Canceled { released }),
            Msg::BatchUpdateOrders(update) => self.batch_update(origin, update).map(MsgResponse::BatchUpdate),
            Msg::LiquidatePosition {
                market_id,
                subaccount_id,
                liquidator,
                order,
            } => self
                .liquidate_position(market_id, subaccount_id, liquidator, order)
                .map(MsgResponse::Liquidation),
        }
    }

    /// Close the block: triggers, batch matching, funding and expiry, per market in id order.
    pub fn end_block(&mut self) -> BlockReport {
        let mut report = BlockReport {
            height: self.block.height,
            ..BlockReport::default()
        };
        let market_ids: Vec<MarketId> = self.state.markets.keys().copied().collect();

        for market_id in market_ids {
            report.triggered += self.run_triggers(market_id);
            let batch = self.run_batch(market_id);
            report.executed += batch.executed;
            report.rested += batch.rested;
            report.rejected += batch.rejected;
            report.fills += batch.fills;
            if let Some(rate) = self.settle_funding(market_id) {
                report.funding.push((market_id, rate));
            }
            if self.process_expiry(market_id) {
                report.expired.push(market_id);
            }
        }

        if self.config.check_invariants {
            report.invariant_violations = self.check_invariants();
        }
        self.trim_events();
        report
    }

    // 8.3: funds in and out of the exchange

    fn deposit(&mut self, subaccount_id: SubaccountId, denom: &Denom, amount: Decimal) -> Result<MsgResponse, EngineError> {
        if amount <= Decimal::ZERO {
            return Err(EngineError::InvalidAmount(amount));
        }
        self.state.deposits.credit(subaccount_id, denom, amount)?;
        let new_total = self.state.deposits.get(subaccount_id, denom).total;
        self.emit_event(EventPayload::Deposit(BalanceEvent {
            subaccount_id,
            denom: denom.clone(),
            amount,
            new_total,
        }));
        self.bank.send_to_module(subaccount_id, denom, amount)?;
        Ok(MsgResponse::Deposited { new_total })
    }

    // only available funds leave. the bank moves whole units, so dust stays behind
    fn withdraw(&mut self, subaccount_id: SubaccountId, denom: &Denom, amount: Decimal) -> Result<MsgResponse, EngineError> {
        if amount <= Decimal::ZERO {
            return Err(EngineError::InvalidAmount(amount));
        }
        self.state.deposits.debit(subaccount_id, denom, amount)?;
        let new_total = self.state.deposits.get(subaccount_id, denom).total;
        self.emit_event(EventPayload::Withdrawal(BalanceEvent {
            subaccount_id,
            denom: denom.clone(),
            amount,
            new_total,
        }));
        self.bank.send_from_module(subaccount_id, denom, amount)?;
        Ok(MsgResponse::Withdrawn { new_total })
    }

    // 8.4: shared helpers

    pub(super) fn market(&self, market_id: MarketId) -> Result<&MarketState, EngineError> {
        self.state
            .markets
            .get(&market_id)
            .ok_or(EngineError::MarketNotFound(market_id))
    }

    pub(super) fn market_mut(&mut self, market_id: MarketId) -> Result<&mut MarketState, EngineError> {
        self.state
            .markets
            .get_mut(&market_id)
            .ok_or(EngineError::MarketNotFound(market_id))
    }

    pub(super) fn next_sequence(&mut self) -> u64 {
        let sequence = self.state.next_sequence;
        self.state.next_sequence += 1;
        sequence
    }

    pub(super) fn next_nonce(&mut self, subaccount_id: SubaccountId) -> u64 {
        let nonce = self.state.nonces.entry(subaccount_id).or_default();
        *nonce += 1;
        *nonce
    }

    pub(super) fn credit_protocol_fees(&mut self, denom: &Denom, amount: Decimal) {
        if amount.is_zero() {
            return;
        }
        *self.state.protocol_fees.entry(denom.clone()).or_default() += amount;
    }

    /// Pay `amount` out of a market's insurance pool into the exchange module.
    pub(super) fn draw_insurance(&mut self, market_id: MarketId, denom: &Denom, amount: Decimal) -> Result<(), EngineError> {
        if amount.is_zero() {
            return Ok(());
        }
        // the bank leg can't fail once the pool has agreed
        let held = self.bank.insurance_balance(denom);
        if held < amount {
            return Err(BankError::InsufficientInsuranceBalance {
                denom: denom.clone(),
                balance: held,
                requested: amount,
            }
            .into());
        }
        self.insurance.withdraw(market_id, amount)?;
        self.bank.send_from_insurance(denom, amount)?;
        debug!(market = %market_id, %denom, %amount, "insurance drawn");
        Ok(())
    }

    /// Move `amount` out of the exchange module into a market's insurance pool.
    pub(super) fn fund_insurance(&mut self, market_id: MarketId, denom: &Denom, amount: Decimal) -> Result<(), EngineError> {
        if amount.is_zero() {
            return Ok(());
        }
        self.bank.send_to_insurance(denom, amount)?;
        self.insurance.underwrite(market_id, amount)?;
        debug!(market = %market_id, %denom, %amount, "insurance funded");
        Ok(())
    }

    pub(super) fn emit_event(&mut self, payload: EventPayload) {
        let event = Event::new(EventId(self.next_event_id), self.block.height, self.block.time, payload);
        self.next_event_id += 1;
        self.events.push(event);
    }

    fn trim_events(&mut self) {
        if self.events.len() > self.config.max_events {
            let drain_count = self.events.len() - self.config.max_events;
            self.events.drain(0..drain_count);
        }
    }

    // 8.5: queries

    pub fn params(&self) -> &crate::config::ExchangeParams {
        &self.config.params
    }

    pub fn block(&self) -> BlockContext {
        self.block
    }

    pub fn get_market(&self, market_id: MarketId) -> Option<&MarketState> {
        self.state.markets.get(&market_id)
    }

    pub fn markets(&self) -> impl Iterator<Item = &MarketState> {
        self.state.markets.values()
    }

    pub fn deposit_of(&self, subaccount_id: SubaccountId, denom: &Denom) -> Deposit {
        self.state.deposits.get(subaccount_id, denom)
    }

    pub fn deposits(&self) -> &Deposits {
        &self.state.deposits
    }

    pub fn position(&self, market_id: MarketId, subaccount_id: SubaccountId) -> Option<&Position> {
        self.state.positions.get(market_id, subaccount_id)
    }

    pub fn positions(&self) -> &Positions {
        &self.state.positions
    }

    pub fn orderbook_metadata(&self, market_id: MarketId, subaccount_id: SubaccountId, side: Side) -> OrderbookMetadata {
        self.state.metadata.get(market_id, subaccount_id, side)
    }

    pub fn metadata(&self) -> &MetadataStore {
        &self.state.metadata
    }

    pub fn protocol_fees(&self, denom: &Denom) -> Decimal {
        self.state.protocol_fees.get(denom).copied().unwrap_or_default()
    }

    /// Market override, else the process-wide default.
    pub fn atomic_fee_multiplier(&self, market_id: MarketId) -> Decimal {
        self.state
            .fee_multipliers
            .get(&market_id)
            .copied()
            .unwrap_or(self.config.params.default_atomic_fee_multiplier)
    }

    pub fn mark_price(&self, market_id: MarketId) -> Option<Price> {
        self.get_market(market_id).and_then(|m| m.mark_price)
    }

    /// A live order wherever it is kept: staged, resting or conditional.
    pub fn order(&self, market_id: MarketId, order_hash: &OrderHash) -> Option<&Order> {
        let market = self.get_market(market_id)?;
        market
            .transient
            .iter()
            .find(|o| &o.hash == order_hash)
            .or_else(|| market.book.get(order_hash))
            .or_else(|| market.conditional.get(order_hash).map(|c| &c.order))
    }

    pub fn bank(&self) -> &dyn Bank {
        self.bank.as_ref()
    }

    pub fn insurance(&self) -> &dyn InsuranceFund {
        self.insurance.as_ref()
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn recent_events(&self, count: usize) -> &[Event] {
        let start = self.events.len().saturating_sub(count);
        &self.events[start..]
    }

    pub fn take_events(&mut self) -> Vec<Event> {
        std::mem::take(&mut self.events)
    }
}
