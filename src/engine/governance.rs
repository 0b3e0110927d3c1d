// 8.10: governance updates. applied between blocks, each one all-or-nothing.

use super::core::Engine;
use super::orders::required_hold;
use super::results::EngineError;
use crate::events::{CancelReason, EventPayload, FeesUpdatedEvent, MarketListedEvent};
use crate::funding::FundingState;
use crate::market::{MarketConfig, MarketError, MarketState, MarketType};
use crate::messages::GovernanceUpdate;
use crate::order::Order;
use crate::types::{MarketId, OrderHash};
use rust_decimal::Decimal;
use tracing::{info, warn};

impl Engine {
    pub fn apply_governance(&mut self, update: GovernanceUpdate) -> Result<(), EngineError> {
        let result = self.isolated(|engine| engine.dispatch_governance(update));
        if let Err(err) = &result {
            warn!(kind = ?err.kind(), error = %err, "governance update rejected");
        }
        result
    }

    fn dispatch_governance(&mut self, update: GovernanceUpdate) -> Result<(), EngineError> {
        match update {
            GovernanceUpdate::ListMarket(config) => self.list_market(config),
            GovernanceUpdate::SetAtomicFeeMultiplier { market_id, multiplier } => {
                self.set_atomic_fee_multiplier(market_id, multiplier)
            }
            GovernanceUpdate::UpdateMarketFees {
                market_id,
                maker_fee_rate,
                taker_fee_rate,
            } => self.update_market_fees(market_id, maker_fee_rate, taker_fee_rate),
            GovernanceUpdate::Pause(market_id) => self.pause_market(market_id),
            GovernanceUpdate::Resume(market_id) => self.resume_market(market_id),
            GovernanceUpdate::Demolish(market_id) => self.demolish_market(market_id),
            GovernanceUpdate::ForceSettle { market_id, price } => self.force_settle_market(market_id, price).map(|_| ()),
            GovernanceUpdate::SetAtomicAccess(access) => {
                info!(?access, "atomic order access changed");
                self.config.params.atomic_access = access;
                Ok(())
            }
            GovernanceUpdate::SetParams(params) => {
                params.validate()?;
                info!("exchange parameters replaced");
                self.config.params = params;
                Ok(())
            }
        }
    }

    fn list_market(&mut self, config: MarketConfig) -> Result<(), EngineError> {
        config.validate(self.config.params.relayer_fee_share_rate)?;
        if self.state.markets.contains_key(&config.id) {
            return Err(MarketError::AlreadyExists(config.id).into());
        }
        let funding = (config.market_type == MarketType::Perpetual)
            .then(|| FundingState::new(self.block.time, self.config.params.funding_interval_secs));
        let market_id = config.id;
        let ticker = config.ticker.clone();
        info!(market = %market_id, %ticker, market_type = ?config.market_type, "market listed");
        self.state.markets.insert(market_id, MarketState::new(config, funding));
        self.emit_event(EventPayload::MarketListed(MarketListedEvent { market_id, ticker }));
        Ok(())
    }

    fn set_atomic_fee_multiplier(&mut self, market_id: MarketId, multiplier: Option<Decimal>) -> Result<(), EngineError> {
        let config = self.market(market_id)?.config.clone();
        match multiplier {
            Some(multiplier) if multiplier <= Decimal::ZERO => return Err(EngineError::InvalidAmount(multiplier)),
            Some(multiplier) => {
                self.state.fee_multipliers.insert(market_id, multiplier);
            }
            None => {
                self.state.fee_multipliers.remove(&market_id);
            }
        }
        self.emit_fees_updated(&config);
        Ok(())
    }

    /// New maker/taker rates. Holds of staged and resting vanilla orders are
    /// re-sized to the new rates; orders whose owner cannot fund the difference
    /// are canceled. Conditional orders reconcile when they trigger.
    fn update_market_fees(&mut self, market_id: MarketId, maker: Decimal, taker: Decimal) -> Result<(), EngineError> {
        let mut config = self.market(market_id)?.config.clone();
        config.maker_fee_rate = maker;
        config.taker_fee_rate = taker;
        config.validate(self.config.params.relayer_fee_share_rate)?;
        self.market_mut(market_id)?.config = config.clone();

        let market = self.market(market_id)?;
        let hashes: Vec<OrderHash> = market
            .transient
            .iter()
            .chain(market.book.all_orders())
            .filter(|o| !o.reduce_only)
            .map(|o| o.hash)
            .collect();

        let mut canceled = 0;
        for hash in hashes {
            if !self.resize_order_hold(&config, hash)? {
                if let Some((order, conditional)) = self.take_live_order(market_id, &hash) {
                    self.release_order(order, conditional, CancelReason::InsufficientFunds)?;
                    canceled += 1;
                }
            }
        }
        info!(market = %market_id, %maker, %taker, canceled, "market fees updated");
        self.emit_fees_updated(&config);
        Ok(())
    }

    // re-size one order's hold to the current rates. false when the owner can't fund it
    fn resize_order_hold(&mut self, config: &MarketConfig, hash: OrderHash) -> Result<bool, EngineError> {
        let Some(mut resized) = self.order(config.id, &hash).cloned() else {
            return Ok(true);
        };
        resized.fee_rate = self.hold_fee_rate(config, resized.order_type);
        let required = required_hold(config, &resized);
        let denom = config.hold_denom(resized.side).clone();

        if required > resized.locked {
            let needed = required - resized.locked;
            if self.state.deposits.lock(resized.subaccount_id, &denom, needed).is_err() {
                return Ok(false);
            }
        } else {
            self.state
                .deposits
                .unlock(resized.subaccount_id, &denom, resized.locked - required);
        }
        resized.locked = required;
        if let Some(order) = self.staged_or_resting_mut(config.id, &hash) {
            *order = resized;
        }
        Ok(true)
    }

    fn staged_or_resting_mut(&mut self, market_id: MarketId, hash: &OrderHash) -> Option<&mut Order> {
        let market = self.state.markets.get_mut(&market_id)?;
        match market.transient_position(hash) {
            Some(index) => market.transient.get_mut(index),
            None => market.book.get_mut(hash),
        }
    }

    fn emit_fees_updated(&mut self, config: &MarketConfig) {
        let atomic_multiplier = self.atomic_fee_multiplier(config.id);
        self.emit_event(EventPayload::FeesUpdated(FeesUpdatedEvent {
            market_id: config.id,
            maker_fee_rate: config.maker_fee_rate,
            taker_fee_rate: config.taker_fee_rate,
            atomic_multiplier,
        }));
    }
}
