//! Conditional order tests
//!
//! Admission caps, trigger validation, trigger ordering, cancels and reduce-only stops.

mod common;

use common::*;
use exchange_core::*;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

fn stop_buy_market(subaccount: SubaccountId, trigger: Decimal, worst: Decimal) -> OrderSpec {
    OrderSpec::new(PERP, subaccount, OrderType::StopBuy, px(worst), dec!(0.1))
        .with_margin(dec!(100))
        .with_trigger(px(trigger))
}

fn harness_at_2000() -> Harness {
    let mut h = Harness::new(vec![eth_perp()]);
    h.set_price("eth", dec!(2000));
    for id in 1..=4 {
        h.deposit(sub(id), "usdt", dec!(100_000));
    }
    h
}

mod capacity_tests {
    use super::*;

    fn fill_bid_side(h: &mut Harness, trader: SubaccountId) {
        for i in 0..20 {
            let price = dec!(1900) + Decimal::from(i);
            h.limit(OrderSpec::new(PERP, trader, OrderType::BuyPostOnly, px(price), dec!(0.1)).with_margin(dec!(100)))
                .unwrap();
        }
    }

    #[test]
    fn side_cap_counts_vanilla_orders_but_not_conditional_market_orders() {
        let mut h = harness_at_2000();
        let trader = sub(1);
        h.begin();
        fill_bid_side(&mut h, trader);
        assert_eq!(h.engine.orderbook_metadata(PERP, trader, Side::Buy).vanilla_limit_orders, 20);

        let stop = h.market(stop_buy_market(trader, dec!(2100), dec!(2150))).unwrap();
        assert_eq!(stop.placement, Placement::Conditional);

        let err = h
            .limit(OrderSpec::new(PERP, trader, OrderType::BuyPostOnly, px(dec!(1800)), dec!(0.1)).with_margin(dec!(100)))
            .unwrap_err();
        assert_eq!(
            err,
            EngineError::ExceedsOrderSideCount {
                market: PERP,
                subaccount: trader,
                side: Side::Buy
            }
        );

        // conditional limit orders share the vanilla pool
        let err = h
            .limit(
                OrderSpec::new(PERP, trader, OrderType::StopBuy, px(dec!(2150)), dec!(0.1))
                    .with_margin(dec!(100))
                    .with_trigger(px(dec!(2100))),
            )
            .unwrap_err();
        assert!(matches!(err, EngineError::ExceedsOrderSideCount { .. }));

        let ask = h
            .limit(OrderSpec::new(PERP, trader, OrderType::SellPostOnly, px(dec!(2100)), dec!(0.1)).with_margin(dec!(100)))
            .unwrap();
        assert_eq!(ask.placement, Placement::Resting);
        h.end();

        let meta = h.engine.orderbook_metadata(PERP, trader, Side::Buy);
        assert_eq!(meta.vanilla_limit_orders, 20);
        assert_eq!(meta.vanilla_conditional_market_orders, 1);
    }

    #[test]
    fn one_conditional_market_order_per_trigger_direction() {
        let mut h = harness_at_2000();
        let trader = sub(1);
        h.begin();
        h.market(stop_buy_market(trader, dec!(2100), dec!(2150))).unwrap();

        let err = h.market(stop_buy_market(trader, dec!(2200), dec!(2250))).unwrap_err();
        assert_eq!(err, EngineError::ConditionalMarketOrderAlreadyExists { subaccount: trader });
        assert_eq!(err.kind(), ErrorKind::Capacity);

        // take sells also wait for a rise
        let take_sell = OrderSpec::new(PERP, trader, OrderType::TakeSell, px(dec!(2050)), dec!(0.1))
            .with_margin(dec!(100))
            .with_trigger(px(dec!(2100)));
        assert!(matches!(
            h.market(take_sell).unwrap_err(),
            EngineError::ConditionalMarketOrderAlreadyExists { .. }
        ));

        let stop_sell = OrderSpec::new(PERP, trader, OrderType::StopSell, px(dec!(1850)), dec!(0.1))
            .with_margin(dec!(100))
            .with_trigger(px(dec!(1900)));
        assert!(h.market(stop_sell).is_ok());

        // a different subaccount is unaffected
        assert!(h.market(stop_buy_market(sub(2), dec!(2100), dec!(2150))).is_ok());
        h.end();

        assert_eq!(h.market_state(PERP).conditional.len(), 3);
    }
}

mod trigger_validation_tests {
    use super::*;

    #[test]
    fn trigger_must_sit_on_the_right_side_of_mark() {
        let mut h = harness_at_2000();
        h.begin();
        let err = h.market(stop_buy_market(sub(1), dec!(1900), dec!(1950))).unwrap_err();
        assert!(matches!(
            err,
            EngineError::InvalidTriggerPrice(TriggerError::WrongSideOfMark { .. })
        ));

        let err = h.market(stop_buy_market(sub(1), dec!(2000), dec!(2050))).unwrap_err();
        assert!(matches!(err, EngineError::InvalidTriggerPrice(TriggerError::EqualsMark { .. })));

        let take_buy = OrderSpec::new(PERP, sub(1), OrderType::TakeBuy, px(dec!(1950)), dec!(0.1))
            .with_margin(dec!(100))
            .with_trigger(px(dec!(1900)));
        assert!(h.limit(take_buy).is_ok());
        h.end();
    }

    #[test]
    fn trigger_price_and_order_type_must_agree() {
        let mut h = harness_at_2000();
        h.begin();
        let vanilla_with_trigger = OrderSpec::new(PERP, sub(1), OrderType::Buy, px(dec!(1950)), dec!(0.1))
            .with_margin(dec!(100))
            .with_trigger(px(dec!(1900)));
        assert!(matches!(
            h.limit(vanilla_with_trigger).unwrap_err(),
            EngineError::InvalidOrderType { .. }
        ));

        let stop_without_trigger =
            OrderSpec::new(PERP, sub(1), OrderType::StopBuy, px(dec!(2150)), dec!(0.1)).with_margin(dec!(100));
        assert!(matches!(
            h.market(stop_without_trigger).unwrap_err(),
            EngineError::InvalidOrderType { .. }
        ));
        h.end();
    }

    #[test]
    fn conditional_orders_need_a_reference_price() {
        let mut h = harness_at_2000();
        h.clear_price("eth");
        h.begin();
        assert_eq!(
            h.market(stop_buy_market(sub(1), dec!(2100), dec!(2150))).unwrap_err(),
            EngineError::NoMarkPrice(PERP)
        );
        h.end();
    }
}

mod trigger_tests {
    use super::*;

    #[test]
    fn market_orders_trigger_ahead_of_limit_orders() {
        let mut h = harness_at_2000();
        h.begin();
        let stop_limit = OrderSpec::new(PERP, sub(1), OrderType::StopBuy, px(dec!(2150)), dec!(0.1))
            .with_margin(dec!(100))
            .with_trigger(px(dec!(2100)));
        let limit = h.limit(stop_limit).unwrap();
        let market = h.market(stop_buy_market(sub(2), dec!(2100), dec!(2150))).unwrap();
        h.end();

        h.set_price("eth", dec!(2120));
        h.begin();
        let start = h.engine.events().len();
        let report = h.end();
        assert_eq!(report.triggered, 2);

        let fired: Vec<OrderHash> = h
            .events_since(start)
            .into_iter()
            .filter_map(|e| match e {
                EventPayload::ConditionalTriggered(t) => Some(t.order_hash),
                _ => None,
            })
            .collect();
        assert_eq!(fired, vec![market.order_hash, limit.order_hash]);

        // the market order found no asks; the limit order now rests
        assert!(h.engine.order(PERP, &market.order_hash).is_none());
        assert!(h.market_state(PERP).book.contains(&limit.order_hash));
        let meta = h.engine.orderbook_metadata(PERP, sub(1), Side::Buy);
        assert_eq!((meta.vanilla_limit_orders, meta.vanilla_conditional_limit_orders), (1, 0));
    }

    #[test]
    fn untouched_triggers_stay_pending() {
        let mut h = harness_at_2000();
        h.begin();
        let stop = h.market(stop_buy_market(sub(1), dec!(2100), dec!(2150))).unwrap();
        h.end();

        h.set_price("eth", dec!(2099.99));
        assert_eq!(h.block().triggered, 0);
        assert!(h.market_state(PERP).conditional.contains(&stop.order_hash));
    }

    #[test]
    fn cancel_before_the_trigger_pass_wins() {
        let mut h = harness_at_2000();
        h.begin();
        let stop = h.market(stop_buy_market(sub(1), dec!(2100), dec!(2150))).unwrap();
        h.end();
        let locked = h.usdt(sub(1)).locked();
        assert!(locked > Decimal::ZERO);

        h.set_price("eth", dec!(2200));
        h.begin();
        assert_eq!(h.cancel(PERP, sub(1), stop.order_hash).unwrap(), locked);
        let report = h.end();

        assert_eq!(report.triggered, 0);
        assert_eq!(h.usdt(sub(1)).locked(), Decimal::ZERO);
        assert!(h.engine.orderbook_metadata(PERP, sub(1), Side::Buy).is_empty());
    }

    #[test]
    fn canceling_a_fired_stop_or_an_unknown_hash_changes_nothing() {
        let mut h = harness_at_2000();
        let (trader, seller) = (sub(1), sub(2));
        h.begin();
        let stop = h.market(stop_buy_market(trader, dec!(2100), dec!(2150))).unwrap();
        h.limit(OrderSpec::new(PERP, seller, OrderType::SellPostOnly, px(dec!(2140)), dec!(0.1)).with_margin(dec!(100)))
            .unwrap();
        h.end();

        h.set_price("eth", dec!(2120));
        let report = h.block();
        assert_eq!((report.triggered, report.fills), (1, 1));
        assert!(h.engine.position(PERP, trader).is_some());
        assert!(h.engine.order(PERP, &stop.order_hash).is_none());

        let before = h.usdt(trader);
        let unknown = OrderHash([9; 32]);
        h.begin();
        let err = h.cancel(PERP, trader, stop.order_hash).unwrap_err();
        assert_eq!(err, EngineError::OrderDoesntExist(stop.order_hash));
        let err = h.cancel(PERP, trader, unknown).unwrap_err();
        assert_eq!(err, EngineError::OrderDoesntExist(unknown));
        assert_eq!(err.kind(), ErrorKind::NotFound);
        // a repeat is rejected the same way
        assert_eq!(
            h.cancel(PERP, trader, stop.order_hash).unwrap_err(),
            EngineError::OrderDoesntExist(stop.order_hash)
        );
        h.end();

        assert_eq!(h.usdt(trader), before);
        assert!(h.engine.orderbook_metadata(PERP, trader, Side::Buy).is_empty());
    }

    #[test]
    fn reduce_only_stop_loss_is_resized_to_the_position() {
        let mut h = harness_at_2000();
        let (long, short, bidder) = (sub(1), sub(2), sub(3));
        open_eth_pair(&mut h, long, dec!(1000), short);

        h.begin();
        let stop = OrderSpec::new(PERP, long, OrderType::StopSell, px(dec!(1850)), dec!(5)).with_trigger(px(dec!(1900)));
        let stop = h.market(stop).unwrap();
        assert_eq!(stop.placement, Placement::Conditional);
        assert_eq!(h.engine.orderbook_metadata(PERP, long, Side::Sell).reduce_only_conditional_orders, 1);
        h.limit(OrderSpec::new(PERP, bidder, OrderType::BuyPostOnly, px(dec!(1890)), dec!(5)).with_margin(dec!(1000)))
            .unwrap();
        h.end();

        h.set_price("eth", dec!(1890));
        let report = h.block();
        assert_eq!(report.triggered, 1);
        assert_eq!(report.fills, 1);

        assert!(h.engine.position(PERP, long).is_none());
        let bidder_position = h.engine.position(PERP, bidder).unwrap();
        assert_eq!(bidder_position.quantity, dec!(2));
        assert_eq!(h.engine.positions().net_quantity(PERP), Decimal::ZERO);
        // 2 * (1890 - 2010) realised on a zero-fee market
        assert_eq!(h.usdt(long).total, dec!(99_760));
        assert_eq!(h.usdt(long).locked(), Decimal::ZERO);
        assert!(h.engine.orderbook_metadata(PERP, long, Side::Sell).is_empty());
    }

    #[test]
    fn closing_the_position_cancels_pending_stops() {
        let mut h = harness_at_2000();
        let (long, short, bidder) = (sub(1), sub(2), sub(3));
        open_eth_pair(&mut h, long, dec!(1000), short);

        h.begin();
        let stop = OrderSpec::new(PERP, long, OrderType::StopSell, px(dec!(1850)), dec!(2)).with_trigger(px(dec!(1900)));
        let stop = h.market(stop).unwrap();
        h.limit(OrderSpec::new(PERP, bidder, OrderType::BuyPostOnly, px(dec!(2005)), dec!(2)).with_margin(dec!(1000)))
            .unwrap();
        h.market(OrderSpec::new(PERP, long, OrderType::Sell, px(dec!(2000)), dec!(2)).with_margin(dec!(500)))
            .unwrap();
        let start = h.engine.events().len();
        h.end();

        assert!(h.engine.position(PERP, long).is_none());
        assert!(!h.market_state(PERP).conditional.contains(&stop.order_hash));
        assert!(h.events_since(start).iter().any(|e| matches!(
            e,
            EventPayload::OrderCanceled(c) if c.order_hash == stop.order_hash && c.reason == CancelReason::PositionClosed
        )));
    }

    #[test]
    fn spot_take_profit_sells_into_the_book() {
        let mut h = Harness::new(vec![MarketConfig::spot(SPOT.0, "inj", "usdt")]);
        h.set_price("inj", dec!(10));
        let (holder, bidder) = (sub(1), sub(2));
        h.begin();
        h.deposit(holder, "inj", dec!(10));
        h.deposit(bidder, "usdt", dec!(1000));
        let take = OrderSpec::new(SPOT, holder, OrderType::TakeSell, px(dec!(11)), dec!(10)).with_trigger(px(dec!(12)));
        let take = h.limit(take).unwrap();
        assert_eq!(h.balance(holder, "inj").locked(), dec!(10));
        h.limit(OrderSpec::new(SPOT, bidder, OrderType::BuyPostOnly, px(dec!(11.5)), dec!(10)))
            .unwrap();
        h.end();

        h.set_price("inj", dec!(12));
        let report = h.block();
        assert_eq!((report.triggered, report.fills), (1, 1));
        assert!(h.engine.order(SPOT, &take.order_hash).is_none());
        assert_eq!(h.balance(holder, "inj").total, Decimal::ZERO);
        // 115 notional less the 0.002 taker fee
        assert_eq!(h.usdt(holder).total, dec!(114.77));
    }
}
