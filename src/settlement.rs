// 9.1 settlement.rs: closing every position of a market at one price.
// losses beyond margin are covered by the loser's deposit, then insurance, then a haircut
// on every positive payout. pure planning here; engine/lifecycle.rs applies the plan.

use crate::fees::{ceil_whole, truncate};
use crate::types::SubaccountId;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// One position's settlement input: margin + pnl - funding at the settlement price.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SettlementEntry {
    pub subaccount_id: SubaccountId,
    pub payout: Decimal,
    pub owner_available: Decimal,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SettlementPlan {
    // credited to winners after haircut
    pub credits: Vec<(SubaccountId, Decimal)>,
    // debited from losers' available balances
    pub debits: Vec<(SubaccountId, Decimal)>,
    pub insurance_draw: Decimal,
    pub haircut_ratio: Decimal,
    pub deficit: Decimal,
    // rounding remainders, routed to the protocol fee pool
    pub dust: Decimal,
    // loss not even a full haircut could absorb
    pub bad_debt: Decimal,
}

impl SettlementPlan {
    pub fn total_credited(&self) -> Decimal {
        self.credits.iter().map(|(_, a)| *a).sum()
    }
}

pub fn plan_settlement(entries: &[SettlementEntry], insurance_balance: Decimal) -> SettlementPlan {
    let mut plan = SettlementPlan::default();

    let positive_total: Decimal = entries
        .iter()
        .map(|e| e.payout.max(Decimal::ZERO))
        .sum();

    let mut remaining = Decimal::ZERO;
    for entry in entries.iter().filter(|e| e.payout < Decimal::ZERO) {
        let shortfall = -entry.payout;
        let from_owner = shortfall.min(entry.owner_available.max(Decimal::ZERO));
        if !from_owner.is_zero() {
            plan.debits.push((entry.subaccount_id, from_owner));
        }
        remaining += shortfall - from_owner;
    }

    if !remaining.is_zero() {
        plan.insurance_draw = ceil_whole(remaining).min(insurance_balance.max(Decimal::ZERO));
    }
    let surplus = (plan.insurance_draw - remaining).max(Decimal::ZERO);
    plan.deficit = (remaining - plan.insurance_draw).max(Decimal::ZERO);
    plan.bad_debt = (plan.deficit - positive_total).max(Decimal::ZERO);

    let distributable = positive_total - plan.deficit.min(positive_total);
    plan.haircut_ratio = if positive_total.is_zero() || plan.deficit.is_zero() {
        Decimal::ZERO
    } else {
        plan.deficit.min(positive_total) / positive_total
    };

    for entry in entries.iter().filter(|e| e.payout > Decimal::ZERO) {
        let paid = if plan.deficit.is_zero() {
            entry.payout
        } else {
            truncate(entry.payout * distributable / positive_total)
        };
        if !paid.is_zero() {
            plan.credits.push((entry.subaccount_id, paid));
        }
    }

    plan.dust = distributable - plan.total_credited() + surplus;
    plan
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn entry(id: u64, payout: Decimal, available: Decimal) -> SettlementEntry {
        SettlementEntry {
            subaccount_id: SubaccountId(id),
            payout,
            owner_available: available,
        }
    }

    #[test]
    fn solvent_settlement_pays_in_full() {
        let plan = plan_settlement(&[entry(1, dec!(1500), dec!(0)), entry(2, dec!(500), dec!(0))], dec!(0));
        assert_eq!(plan.credits, vec![(SubaccountId(1), dec!(1500)), (SubaccountId(2), dec!(500))]);
        assert_eq!(plan.haircut_ratio, Decimal::ZERO);
        assert_eq!(plan.dust, Decimal::ZERO);
    }

    #[test]
    fn deficit_haircuts_winner() {
        // loser owes 220, insurance holds 20, winner expected 2220
        let plan = plan_settlement(&[entry(1, dec!(-220), dec!(0)), entry(2, dec!(2220), dec!(0))], dec!(20));
        assert_eq!(plan.insurance_draw, dec!(20));
        assert_eq!(plan.deficit, dec!(200));
        assert_eq!(plan.credits, vec![(SubaccountId(2), dec!(2020))]);
        assert_eq!(plan.dust, Decimal::ZERO);
        assert_eq!(plan.bad_debt, Decimal::ZERO);
    }

    #[test]
    fn loser_deposit_used_before_insurance() {
        let plan = plan_settlement(&[entry(1, dec!(-100), dec!(60)), entry(2, dec!(300), dec!(0))], dec!(1000));
        assert_eq!(plan.debits, vec![(SubaccountId(1), dec!(60))]);
        assert_eq!(plan.insurance_draw, dec!(40));
        assert_eq!(plan.credits, vec![(SubaccountId(2), dec!(300))]);
    }

    #[test]
    fn haircut_is_proportional_and_conserves() {
        let entries = [entry(1, dec!(-30), dec!(0)), entry(2, dec!(100), dec!(0)), entry(3, dec!(200), dec!(0))];
        let plan = plan_settlement(&entries, dec!(0));
        // 30 deficit over 300 of payouts: 10% haircut
        assert_eq!(plan.credits, vec![(SubaccountId(2), dec!(90)), (SubaccountId(3), dec!(180))]);
        let paid_in: Decimal = entries.iter().map(|e| e.payout).sum();
        assert_eq!(plan.total_credited() + plan.dust, paid_in);
    }

    #[test]
    fn fractional_shortfall_surplus_becomes_dust() {
        let plan = plan_settlement(&[entry(1, dec!(-10.5), dec!(0)), entry(2, dec!(50), dec!(0))], dec!(100));
        assert_eq!(plan.insurance_draw, dec!(11));
        assert_eq!(plan.dust, dec!(0.5));
    }
}
