//! Market lifecycle tests
//!
//! Expiry, binary resolution, pause/resume, demolition, forced settlement,
//! fee updates, funding and genesis round trips.

mod common;

use common::*;
use exchange_core::*;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

const EXPIRY_SECS: i64 = 100;

fn btc_future() -> MarketConfig {
    MarketConfig::expiry_future(FUTURE.0, "btc", "usdt", Timestamp::from_secs(EXPIRY_SECS))
        .with_fees(Decimal::ZERO, Decimal::ZERO)
}

fn election() -> MarketConfig {
    MarketConfig::binary_options(BINARY.0, "election", "usdt", Timestamp::from_secs(EXPIRY_SECS))
        .with_fees(Decimal::ZERO, Decimal::ZERO)
}

/// sub 1 long, sub 2 short, 1 btc at 30000 with 3000 margin each.
fn open_future(h: &mut Harness) {
    h.deposit(sub(1), "usdt", dec!(10_000));
    h.deposit(sub(2), "usdt", dec!(10_000));
    h.set_price("btc", dec!(30000));
    h.begin();
    h.limit(OrderSpec::new(FUTURE, sub(2), OrderType::SellPostOnly, px(dec!(30000)), dec!(1)).with_margin(dec!(3000)))
        .unwrap();
    h.market(OrderSpec::new(FUTURE, sub(1), OrderType::Buy, px(dec!(30000)), dec!(1)).with_margin(dec!(3000)))
        .unwrap();
    assert_eq!(h.end().fills, 1);
}

/// sub 1 buys 10 contracts at 0.6 from sub 2.
fn open_binary(h: &mut Harness) {
    h.deposit(sub(1), "usdt", dec!(100));
    h.deposit(sub(2), "usdt", dec!(100));
    h.begin();
    h.limit(OrderSpec::new(BINARY, sub(2), OrderType::SellPostOnly, px(dec!(0.6)), dec!(10)).with_margin(dec!(4)))
        .unwrap();
    h.market(OrderSpec::new(BINARY, sub(1), OrderType::Buy, px(dec!(0.6)), dec!(10)).with_margin(dec!(6)))
        .unwrap();
    assert_eq!(h.end().fills, 1);
}

mod expiry_tests {
    use super::*;

    #[test]
    fn future_settles_at_mark_on_expiry() {
        let mut h = Harness::new(vec![btc_future()]);
        open_future(&mut h);

        h.set_price("btc", dec!(31000));
        h.begin_at(EXPIRY_SECS);
        let report = h.end();

        assert_eq!(report.expired, vec![FUTURE]);
        assert_eq!(h.status(FUTURE), MarketStatus::Expired);
        assert_eq!(h.market_state(FUTURE).settlement_price, Some(dec!(31000)));
        assert!(h.engine.positions().in_market(FUTURE).is_empty());
        assert_eq!(h.usdt(sub(1)).total, dec!(11_000));
        assert_eq!(h.usdt(sub(2)).total, dec!(9_000));

        h.begin();
        let err = h
            .limit(OrderSpec::new(FUTURE, sub(1), OrderType::BuyPostOnly, px(dec!(30000)), dec!(1)).with_margin(dec!(3000)))
            .unwrap_err();
        assert!(matches!(err, EngineError::MarketNotActive { status: MarketStatus::Expired, .. }));
        assert_eq!(err.kind(), ErrorKind::Lifecycle);
        h.end();
    }

    #[test]
    fn expiry_waits_for_a_price() {
        let mut h = Harness::new(vec![btc_future()]);
        open_future(&mut h);

        h.clear_price("btc");
        h.begin_at(EXPIRY_SECS);
        assert!(h.end().expired.is_empty());
        assert_eq!(h.status(FUTURE), MarketStatus::Active);
        assert_eq!(h.engine.positions().in_market(FUTURE).len(), 2);

        h.set_price("btc", dec!(29000));
        assert_eq!(h.block().expired, vec![FUTURE]);
        assert_eq!(h.usdt(sub(1)).total, dec!(9_000));
        assert_eq!(h.usdt(sub(2)).total, dec!(11_000));
    }

    #[test]
    fn binary_outcome_is_clamped_to_one() {
        let mut h = Harness::new(vec![election()]);
        open_binary(&mut h);
        let long = h.engine.position(BINARY, sub(1)).unwrap();
        assert_eq!((long.quantity, long.margin), (dec!(10), dec!(6)));

        h.set_price("election", dec!(1.5));
        h.begin_at(EXPIRY_SECS);
        h.end();

        assert_eq!(h.status(BINARY), MarketStatus::Expired);
        assert_eq!(h.market_state(BINARY).settlement_price, Some(Decimal::ONE));
        assert_eq!(h.usdt(sub(1)).total, dec!(104));
        assert_eq!(h.usdt(sub(2)).total, dec!(96));
    }

    #[test]
    fn binary_orders_post_full_collateral() {
        let mut h = Harness::new(vec![election()]);
        h.deposit(sub(1), "usdt", dec!(100));
        h.begin();
        let err = h
            .limit(OrderSpec::new(BINARY, sub(1), OrderType::BuyPostOnly, px(dec!(0.6)), dec!(10)).with_margin(dec!(5)))
            .unwrap_err();
        assert!(matches!(err, EngineError::Margin(MarginError::InsufficientOrderMargin { .. })));
        let err = h
            .limit(OrderSpec::new(BINARY, sub(1), OrderType::BuyPostOnly, px(dec!(1)), dec!(10)).with_margin(dec!(10)))
            .unwrap_err();
        assert!(matches!(err, EngineError::Market(MarketError::PriceOutOfRange(_))));
        h.end();
    }
}

mod status_tests {
    use super::*;

    #[test]
    fn pause_keeps_resting_orders_and_drops_conditional_ones() {
        let mut h = Harness::new(vec![eth_perp()]);
        h.set_price("eth", dec!(2000));
        h.deposit(sub(1), "usdt", dec!(10_000));
        h.begin();
        let resting = h
            .limit(OrderSpec::new(PERP, sub(1), OrderType::BuyPostOnly, px(dec!(1900)), dec!(1)).with_margin(dec!(200)))
            .unwrap();
        let stop = h
            .market(
                OrderSpec::new(PERP, sub(1), OrderType::StopBuy, px(dec!(2150)), dec!(1))
                    .with_margin(dec!(200))
                    .with_trigger(px(dec!(2100))),
            )
            .unwrap();
        let staged = h
            .limit(OrderSpec::new(PERP, sub(1), OrderType::Buy, px(dec!(1950)), dec!(1)).with_margin(dec!(200)))
            .unwrap();

        h.engine.apply_governance(GovernanceUpdate::Pause(PERP)).unwrap();
        h.end();

        assert_eq!(h.status(PERP), MarketStatus::Paused);
        assert!(h.market_state(PERP).book.contains(&resting.order_hash));
        assert!(h.engine.order(PERP, &stop.order_hash).is_none());
        assert!(h.engine.order(PERP, &staged.order_hash).is_none());
        assert_eq!(h.usdt(sub(1)).locked(), dec!(200));

        h.begin();
        let err = h
            .limit(OrderSpec::new(PERP, sub(1), OrderType::BuyPostOnly, px(dec!(1800)), dec!(1)).with_margin(dec!(200)))
            .unwrap_err();
        assert!(matches!(err, EngineError::MarketNotActive { status: MarketStatus::Paused, .. }));
        assert!(h.cancel(PERP, sub(1), resting.order_hash).is_ok());
        h.end();

        h.engine.apply_governance(GovernanceUpdate::Resume(PERP)).unwrap();
        h.begin();
        assert!(h
            .limit(OrderSpec::new(PERP, sub(1), OrderType::BuyPostOnly, px(dec!(1800)), dec!(1)).with_margin(dec!(200)))
            .is_ok());
        h.end();
    }

    #[test]
    fn demolish_closes_positions_at_mark_and_is_final() {
        let mut h = Harness::new(vec![eth_perp()]);
        h.deposit(sub(1), "usdt", dec!(5_000));
        h.deposit(sub(2), "usdt", dec!(5_000));
        open_eth_pair(&mut h, sub(1), dec!(1000), sub(2));
        h.begin();
        h.limit(OrderSpec::new(PERP, sub(2), OrderType::SellPostOnly, px(dec!(2100)), dec!(1)).with_margin(dec!(200)))
            .unwrap();
        h.end();

        h.set_price("eth", dec!(2060));
        h.begin();
        h.engine.apply_governance(GovernanceUpdate::Demolish(PERP)).unwrap();
        h.end();

        assert_eq!(h.status(PERP), MarketStatus::Demolished);
        assert!(h.engine.positions().in_market(PERP).is_empty());
        assert!(h.market_state(PERP).book.is_empty());
        assert_eq!(h.usdt(sub(1)).total, dec!(5_100));
        assert_eq!(h.usdt(sub(2)).total, dec!(4_900));
        assert_eq!(h.usdt(sub(2)).locked(), Decimal::ZERO);

        let err = h.engine.apply_governance(GovernanceUpdate::Resume(PERP)).unwrap_err();
        assert!(matches!(err, EngineError::Market(MarketError::InvalidStatusTransition { .. })));
        assert_eq!(err.kind(), ErrorKind::Lifecycle);
    }

    #[test]
    fn force_settle_binary_at_zero() {
        let mut h = Harness::new(vec![election(), MarketConfig::spot(SPOT.0, "inj", "usdt")]);
        open_binary(&mut h);

        let err = h
            .engine
            .apply_governance(GovernanceUpdate::ForceSettle {
                market_id: BINARY,
                price: Some(dec!(1.5)),
            })
            .unwrap_err();
        assert_eq!(err, EngineError::InvalidAmount(dec!(1.5)));
        assert_eq!(h.status(BINARY), MarketStatus::Active);

        let err = h
            .engine
            .apply_governance(GovernanceUpdate::ForceSettle {
                market_id: SPOT,
                price: Some(dec!(1)),
            })
            .unwrap_err();
        assert!(matches!(err, EngineError::UnsupportedMarketType { .. }));

        h.engine
            .apply_governance(GovernanceUpdate::ForceSettle {
                market_id: BINARY,
                price: Some(Decimal::ZERO),
            })
            .unwrap();
        assert_eq!(h.status(BINARY), MarketStatus::Settled);
        assert_eq!(h.usdt(sub(1)).total, dec!(94));
        assert_eq!(h.usdt(sub(2)).total, dec!(106));
        assert!(h.engine.check_invariants().is_empty());
    }
}

mod fee_update_tests {
    use super::*;

    #[test]
    fn holds_follow_new_rates_and_unfundable_orders_are_canceled() {
        let mut h = Harness::new(vec![MarketConfig::spot(SPOT.0, "inj", "usdt")]);
        h.set_price("inj", dec!(10));
        h.deposit(sub(1), "usdt", dec!(1000));
        h.deposit(sub(3), "usdt", dec!(96));
        h.begin();
        h.limit(OrderSpec::new(SPOT, sub(1), OrderType::BuyPostOnly, px(dec!(10)), dec!(10)))
            .unwrap();
        h.limit(OrderSpec::new(SPOT, sub(1), OrderType::Buy, px(dec!(9)), dec!(10)))
            .unwrap();
        let squeezed = h
            .limit(OrderSpec::new(SPOT, sub(3), OrderType::BuyPostOnly, px(dec!(9.5)), dec!(10)))
            .unwrap();
        // 100 * 1.001 + 90 * 1.002
        assert_eq!(h.usdt(sub(1)).locked(), dec!(190.28));

        h.engine
            .apply_governance(GovernanceUpdate::UpdateMarketFees {
                market_id: SPOT,
                maker_fee_rate: dec!(0.02),
                taker_fee_rate: dec!(0.05),
            })
            .unwrap();
        h.end();

        // 100 * 1.02 + 90 * 1.05
        assert_eq!(h.usdt(sub(1)).locked(), dec!(196.5));
        assert!(h.engine.order(SPOT, &squeezed.order_hash).is_none());
        assert_eq!(h.usdt(sub(3)).available, dec!(96));
        let config = &h.market_state(SPOT).config;
        assert_eq!((config.maker_fee_rate, config.taker_fee_rate), (dec!(0.02), dec!(0.05)));
    }

    #[test]
    fn unfundable_rebates_are_refused() {
        let mut h = Harness::new(vec![MarketConfig::spot(SPOT.0, "inj", "usdt")]);
        let err = h
            .engine
            .apply_governance(GovernanceUpdate::UpdateMarketFees {
                market_id: SPOT,
                maker_fee_rate: dec!(-0.002),
                taker_fee_rate: dec!(0.002),
            })
            .unwrap_err();
        assert!(matches!(err, EngineError::Market(MarketError::UnfundableFees { .. })));
        assert_eq!(h.market_state(SPOT).config.maker_fee_rate, dec!(0.001));
        h.block();
    }
}

mod funding_tests {
    use super::*;

    fn devnet_harness() -> Harness {
        let config = EngineConfig::with_params(ExchangeParams::devnet());
        let mut h = Harness::with_config(config, vec![eth_perp()], InMemoryInsuranceFund::new());
        for id in 1..=4 {
            h.deposit(sub(id), "usdt", dec!(10_000));
        }
        h
    }

    #[test]
    fn interest_only_funding_without_a_two_sided_book() {
        let mut h = devnet_harness();
        open_eth_pair(&mut h, sub(1), dec!(1000), sub(2));

        h.begin_at(59);
        assert!(h.end().funding.is_empty());

        h.begin_at(60);
        let report = h.end();
        let params = FundingParams::from_exchange(&ExchangeParams::devnet());
        let expected_rate = calculate_funding_rate(Decimal::ZERO, &params);
        assert_eq!(report.funding, vec![(PERP, expected_rate)]);

        let funding = h.market_state(PERP).funding.clone().unwrap();
        assert_eq!(funding.cumulative_funding, truncate(expected_rate * dec!(2010)));
        assert_eq!(funding.next_funding_time, Timestamp::from_secs(120));

        let long = h.engine.position(PERP, sub(1)).unwrap();
        assert!(long.pending_funding(funding.cumulative_funding) > Decimal::ZERO);
    }

    #[test]
    fn rich_book_pays_the_capped_rate() {
        let mut h = devnet_harness();
        open_eth_pair(&mut h, sub(1), dec!(1000), sub(2));
        h.begin();
        h.limit(OrderSpec::new(PERP, sub(3), OrderType::BuyPostOnly, px(dec!(2100)), dec!(1)).with_margin(dec!(300)))
            .unwrap();
        h.limit(OrderSpec::new(PERP, sub(4), OrderType::SellPostOnly, px(dec!(2110)), dec!(1)).with_margin(dec!(300)))
            .unwrap();
        h.end();

        let start = h.engine.events().len();
        h.begin_at(60);
        let report = h.end();
        let params = FundingParams::from_exchange(&ExchangeParams::devnet());
        let cap = calculate_funding_rate(Decimal::ONE, &params);
        assert_eq!(report.funding, vec![(PERP, cap)]);
        assert!(h.events_since(start).iter().any(|e| matches!(
            e,
            EventPayload::FundingApplied(f) if f.rate == cap && f.market_id == PERP
        )));
    }

    #[test]
    fn funding_is_paid_when_the_position_closes() {
        let mut h = devnet_harness();
        open_eth_pair(&mut h, sub(1), dec!(1000), sub(2));
        h.begin_at(60);
        h.end();
        let cumulative = h.market_state(PERP).funding.as_ref().unwrap().cumulative_funding;
        let owed = h.engine.position(PERP, sub(1)).unwrap().pending_funding(cumulative);

        h.begin();
        h.limit(OrderSpec::new(PERP, sub(3), OrderType::BuyPostOnly, px(dec!(2010)), dec!(2)).with_margin(dec!(1000)))
            .unwrap();
        h.market(OrderSpec::new(PERP, sub(1), OrderType::Sell, px(dec!(2010)), dec!(2)))
            .unwrap();
        h.end();

        assert!(h.engine.position(PERP, sub(1)).is_none());
        assert_eq!(h.usdt(sub(1)).total, dec!(10_000) - owed);
    }
}

mod genesis_tests {
    use super::*;

    fn busy_engine() -> Harness {
        let mut h = Harness::new(vec![MarketConfig::spot(SPOT.0, "inj", "usdt"), eth_perp()]);
        h.engine
            .apply_governance(GovernanceUpdate::SetAtomicFeeMultiplier {
                market_id: SPOT,
                multiplier: Some(dec!(3)),
            })
            .unwrap();
        h.set_price("inj", dec!(10));
        for id in 1..=3 {
            h.deposit(sub(id), "usdt", dec!(10_000));
            h.deposit(sub(id), "inj", dec!(100));
        }
        open_eth_pair(&mut h, sub(1), dec!(1000), sub(2));

        h.begin();
        h.limit(OrderSpec::new(SPOT, sub(1), OrderType::SellPostOnly, px(dec!(10)), dec!(20)))
            .unwrap();
        h.market(OrderSpec::new(SPOT, sub(2), OrderType::BuyAtomic, px(dec!(10)), dec!(5)))
            .unwrap();
        h.limit(OrderSpec::new(SPOT, sub(3), OrderType::BuyPostOnly, px(dec!(9)), dec!(10)))
            .unwrap();
        h.market(
            OrderSpec::new(PERP, sub(1), OrderType::StopSell, px(dec!(1800)), dec!(2)).with_trigger(px(dec!(1900))),
        )
        .unwrap();
        h.end();
        h
    }

    #[test]
    fn export_import_round_trip() {
        let h = busy_engine();
        let exported = h.engine.export_genesis();
        assert!(exported.protocol_fees.iter().any(|(d, amount)| d == &denom("usdt") && *amount > Decimal::ZERO));

        let json = exported.to_json().unwrap();
        let parsed = GenesisState::from_json(&json).unwrap();
        assert_eq!(parsed, exported);

        let restored = Engine::from_genesis(EngineConfig::default(), parsed, InMemoryBank::new(), InMemoryInsuranceFund::new()).unwrap();
        assert_eq!(restored.export_genesis(), exported);
        assert!(restored.check_invariants().is_empty());
        assert_eq!(restored.atomic_fee_multiplier(SPOT), dec!(3));
        assert_eq!(
            restored.orderbook_metadata(PERP, sub(1), Side::Sell),
            h.engine.orderbook_metadata(PERP, sub(1), Side::Sell)
        );
    }

    #[test]
    fn restored_engine_continues_the_nonce_sequence() {
        let mut h = busy_engine();
        let genesis = h.engine.export_genesis();
        let mut restored = Engine::from_genesis(EngineConfig::default(), genesis, InMemoryBank::new(), InMemoryInsuranceFund::new()).unwrap();

        let spec = OrderSpec::new(SPOT, sub(3), OrderType::BuyPostOnly, px(dec!(8)), dec!(1));
        let original = h.limit(spec.clone()).unwrap();
        let replayed = restored.deliver(Msg::CreateLimitOrder(spec)).unwrap();
        assert_eq!(replayed.order_hash(), Some(original.order_hash));
    }

    #[test]
    fn inconsistent_snapshots_are_refused() {
        let h = busy_engine();
        let mut genesis = h.engine.export_genesis();
        for deposit in genesis.deposits.iter_mut().filter(|d| d.subaccount_id == sub(3) && d.denom == denom("usdt")) {
            deposit.available = deposit.total;
        }
        let err = Engine::from_genesis(EngineConfig::default(), genesis, InMemoryBank::new(), InMemoryInsuranceFund::new()).unwrap_err();
        assert!(matches!(err, EngineError::Genesis(_)));
    }
}

mod funds_tests {
    use super::*;

    #[test]
    fn deposits_and_withdrawals_move_bank_coins() {
        let mut h = Harness::new(vec![MarketConfig::spot(SPOT.0, "inj", "usdt")]);
        h.deposit(sub(1), "usdt", dec!(500));
        assert_eq!(h.engine.bank().module_balance(&denom("usdt")), dec!(500));
        assert_eq!(h.engine.bank().balance(sub(1), &denom("usdt")), WALLET - dec!(500));

        h.begin();
        h.limit(OrderSpec::new(SPOT, sub(1), OrderType::BuyPostOnly, px(dec!(10)), dec!(40)))
            .unwrap();
        h.end();
        // 400.4 is held
        let err = h
            .engine
            .deliver(Msg::Withdraw {
                subaccount_id: sub(1),
                denom: denom("usdt"),
                amount: dec!(100),
            })
            .unwrap_err();
        assert!(matches!(err, EngineError::InsufficientDeposit { .. }));
        assert_eq!(err.kind(), ErrorKind::Funds);

        let response = h
            .engine
            .deliver(Msg::Withdraw {
                subaccount_id: sub(1),
                denom: denom("usdt"),
                amount: dec!(99),
            })
            .unwrap();
        assert_eq!(response, MsgResponse::Withdrawn { new_total: dec!(401) });
        assert_eq!(h.engine.bank().module_balance(&denom("usdt")), dec!(401));
    }

    #[test]
    fn bank_refuses_fractional_and_non_positive_amounts() {
        let mut h = Harness::new(vec![]);
        let fractional = h.engine.deliver(Msg::Deposit {
            subaccount_id: sub(1),
            denom: denom("usdt"),
            amount: dec!(0.5),
        });
        assert!(matches!(fractional, Err(EngineError::Bank(BankError::InvalidAmount(_)))));
        assert_eq!(h.usdt(sub(1)).total, Decimal::ZERO);

        let negative = h.engine.deliver(Msg::Deposit {
            subaccount_id: sub(1),
            denom: denom("usdt"),
            amount: dec!(-1),
        });
        assert_eq!(negative.unwrap_err(), EngineError::InvalidAmount(dec!(-1)));
    }
}
