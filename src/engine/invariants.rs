// 8.11: consistency checks run at the end of a block in debug builds. each returned
// string names one violated property; an empty list means the state is consistent.

use super::core::Engine;
use crate::metadata::MetadataStore;
use crate::types::{Denom, SubaccountId};
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use tracing::error;

impl Engine {
    pub fn check_invariants(&self) -> Vec<String> {
        let mut violations = Vec::new();
        let mut counted = MetadataStore::default();
        let mut holds: BTreeMap<(SubaccountId, Denom), Decimal> = BTreeMap::new();

        for market in self.state.markets.values() {
            let market_id = market.id();
            let live = market
                .transient
                .iter()
                .chain(market.book.all_orders())
                .map(|o| (o, false))
                .chain(market.conditional.all().into_iter().map(|c| (&c.order, true)));
            for (order, conditional) in live {
                counted.track(order, conditional);
                let denom = market.config.hold_denom(order.side).clone();
                *holds.entry((order.subaccount_id, denom)).or_default() += order.locked;
            }

            if let (Some(bid), Some(ask)) = (market.book.best_bid(), market.book.best_ask()) {
                if bid >= ask {
                    violations.push(format!("{market_id}: book crossed, bid {bid} >= ask {ask}"));
                }
            }
            if market.config.is_derivative() {
                let net = self.state.positions.net_quantity(market_id);
                if !net.is_zero() {
                    violations.push(format!("{market_id}: long and short open interest differ by {net}"));
                }
            }
        }

        for mismatch in self.state.metadata.reconcile(&counted) {
            violations.push(format!(
                "{} {} {}: order counters {:?} but live orders give {:?}",
                mismatch.market_id, mismatch.subaccount_id, mismatch.side, mismatch.recorded, mismatch.actual
            ));
        }

        for ((subaccount_id, denom), deposit) in self.state.deposits.iter() {
            if deposit.available > deposit.total {
                violations.push(format!(
                    "{subaccount_id} {denom}: available {} exceeds total {}",
                    deposit.available, deposit.total
                ));
            }
            let held = holds.remove(&(*subaccount_id, denom.clone())).unwrap_or_default();
            if deposit.locked() != held {
                violations.push(format!(
                    "{subaccount_id} {denom}: locked {} but orders hold {held}",
                    deposit.locked()
                ));
            }
        }
        for ((subaccount_id, denom), held) in holds {
            if !held.is_zero() {
                violations.push(format!("{subaccount_id} {denom}: orders hold {held} without a deposit"));
            }
        }

        for violation in &violations {
            error!(%violation, "invariant violated");
        }
        violations
    }
}
