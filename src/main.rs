//! Exchange core simulation.
//!
//! Drives the engine through whole blocks: listing, spot and derivative
//! trading, atomic execution, conditional triggers, funding, liquidation and
//! expiry. Set `RUST_LOG=exchange_core=debug` to follow the engine's own logs.

use exchange_core::*;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing_subscriber::EnvFilter;

const SPOT: MarketId = MarketId(1);
const PERP: MarketId = MarketId(2);
const FUTURE: MarketId = MarketId(3);

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    println!("Exchange Core Simulation");
    println!("Spot, Perpetual and Expiry Markets, Block by Block\n");

    scenario_1_spot_batch();
    scenario_2_atomic_order();
    scenario_3_stop_loss();
    scenario_4_funding();
    scenario_5_liquidation();
    scenario_6_expiry();

    println!("\nAll simulations completed successfully.");
}

fn px(value: Decimal) -> Price {
    Price::new_unchecked(value)
}

/// A bank where every listed subaccount holds `amount` of each denom.
fn funded_bank(subaccounts: &[SubaccountId], denoms: &[&str], amount: Decimal) -> InMemoryBank {
    let mut bank = InMemoryBank::new();
    for subaccount in subaccounts {
        for denom in denoms {
            bank = bank.with_balance(*subaccount, denom, amount);
        }
    }
    bank
}

fn deposit(engine: &mut Engine, subaccount_id: SubaccountId, denom: &str, amount: Decimal) {
    engine
        .deliver(Msg::Deposit {
            subaccount_id,
            denom: Denom::from(denom),
            amount,
        })
        .unwrap();
}

// a block with no messages
fn empty_block(engine: &mut Engine, height: u64, secs: i64, oracle: &StaticOracle) -> BlockReport {
    engine.begin_block(BlockContext::new(height, Timestamp::from_secs(secs)), oracle);
    engine.end_block()
}

/// Limit orders staged in one block and matched in the end-of-block batch.
fn scenario_1_spot_batch() {
    println!("Scenario 1: Spot Batch Matching\n");

    let (alice, bob) = (SubaccountId(1), SubaccountId(2));
    let bank = funded_bank(&[alice, bob], &["inj", "usdt"], dec!(10000));
    let mut engine = Engine::new(EngineConfig::default(), bank, InMemoryInsuranceFund::new());
    engine
        .apply_governance(GovernanceUpdate::ListMarket(MarketConfig::spot(SPOT.0, "inj", "usdt")))
        .unwrap();

    let oracle = StaticOracle::new().with_price("inj", "usdt", px(dec!(10)));
    engine.begin_block(BlockContext::new(1, Timestamp::from_secs(1)), &oracle);
    deposit(&mut engine, alice, "usdt", dec!(1000));
    deposit(&mut engine, bob, "inj", dec!(100));

    let sell = OrderSpec::new(SPOT, bob, OrderType::Sell, px(dec!(10)), dec!(20));
    let buy = OrderSpec::new(SPOT, alice, OrderType::Buy, px(dec!(10.5)), dec!(15));
    engine.deliver(Msg::CreateLimitOrder(sell)).unwrap();
    engine.deliver(Msg::CreateLimitOrder(buy)).unwrap();
    println!("  Bob offers 20 INJ @ 10, Alice bids 15 INJ @ 10.5, both staged");

    let report = engine.end_block();
    let clearing = engine.get_market(SPOT).and_then(|m| m.last_trade_price);
    println!(
        "  Batch: {} executed, {} rested, {} fills, cleared at {:?}",
        report.executed, report.rested, report.fills, clearing.map(|p| p.value())
    );

    let usdt_denom = Denom::from("usdt");
    let inj = Denom::from("inj");
    println!(
        "  Alice: {} INJ, {} USDT available",
        engine.deposit_of(alice, &inj).total,
        engine.deposit_of(alice, &usdt_denom).available
    );
    println!(
        "  Bob: {} USDT, {} INJ still locked on the book",
        engine.deposit_of(bob, &usdt_denom).total,
        engine.deposit_of(bob, &inj).locked()
    );
    println!("  Protocol fees: {} USDT\n", engine.protocol_fees(&usdt_denom));
}

/// An atomic order executes during delivery at the multiplied taker fee.
fn scenario_2_atomic_order() {
    println!("Scenario 2: Atomic Market Order\n");

    let (maker, taker) = (SubaccountId(1), SubaccountId(2));
    let bank = funded_bank(&[maker, taker], &["inj", "usdt"], dec!(10000));
    let mut engine = Engine::new(EngineConfig::default(), bank, InMemoryInsuranceFund::new());
    let config = MarketConfig::spot(SPOT.0, "inj", "usdt").with_fees(dec!(0.001), dec!(0.0075));
    engine.apply_governance(GovernanceUpdate::ListMarket(config)).unwrap();

    let oracle = StaticOracle::new().with_price("inj", "usdt", px(dec!(10)));
    engine.begin_block(BlockContext::new(1, Timestamp::from_secs(1)), &oracle);
    deposit(&mut engine, maker, "inj", dec!(10));
    deposit(&mut engine, taker, "usdt", dec!(200));
    let ask = OrderSpec::new(SPOT, maker, OrderType::SellPostOnly, px(dec!(10)), dec!(10));
    engine.deliver(Msg::CreateLimitOrder(ask)).unwrap();

    let before = engine.deposit_of(taker, &Denom::from("usdt")).available;
    let atomic = OrderSpec::new(SPOT, taker, OrderType::BuyAtomic, px(dec!(10)), dec!(10));
    let response = engine.deliver(Msg::CreateMarketOrder(atomic)).unwrap();
    let result = response.order().unwrap();
    let after = engine.deposit_of(taker, &Denom::from("usdt")).available;

    println!(
        "  Atomic buy filled {} @ {} during delivery",
        result.filled_quantity,
        result.average_price.map(|p| p.to_string()).unwrap_or_default()
    );
    println!("  Taker fee at multiplier {}: {}", engine.atomic_fee_multiplier(SPOT), result.fills[0].taker_fee);
    println!("  Taker quote spent: {}\n", before - after);
    engine.end_block();
}

/// A stop-sell fires when the reference price falls through its trigger.
fn scenario_3_stop_loss() {
    println!("Scenario 3: Stop Loss Trigger\n");

    let (trader, maker) = (SubaccountId(1), SubaccountId(2));
    let bank = funded_bank(&[trader, maker], &["usdt"], dec!(100000));
    let mut engine = Engine::new(EngineConfig::default(), bank, InMemoryInsuranceFund::new());
    engine
        .apply_governance(GovernanceUpdate::ListMarket(MarketConfig::perpetual(PERP.0, "btc", "usdt")))
        .unwrap();

    let mut oracle = StaticOracle::new().with_price("btc", "usdt", px(dec!(100)));
    engine.begin_block(BlockContext::new(1, Timestamp::from_secs(1)), &oracle);
    deposit(&mut engine, trader, "usdt", dec!(1000));
    deposit(&mut engine, maker, "usdt", dec!(5000));

    let ask = OrderSpec::new(PERP, maker, OrderType::SellPostOnly, px(dec!(100)), dec!(5)).with_margin(dec!(100));
    engine.deliver(Msg::CreateLimitOrder(ask)).unwrap();
    let open = OrderSpec::new(PERP, trader, OrderType::Buy, px(dec!(100)), dec!(5)).with_margin(dec!(100));
    engine.deliver(Msg::CreateMarketOrder(open)).unwrap();
    engine.end_block();

    let position = engine.position(PERP, trader).unwrap();
    println!("  Trader long {} @ {}", position.quantity, position.entry_price);

    oracle.set("btc", "usdt", px(dec!(99)), Timestamp::from_secs(2));
    engine.begin_block(BlockContext::new(2, Timestamp::from_secs(2)), &oracle);
    let bid = OrderSpec::new(PERP, maker, OrderType::BuyPostOnly, px(dec!(94)), dec!(5)).with_margin(dec!(100));
    engine.deliver(Msg::CreateLimitOrder(bid)).unwrap();
    let stop = OrderSpec::new(PERP, trader, OrderType::StopSell, px(dec!(90)), dec!(5)).with_trigger(px(dec!(95)));
    engine.deliver(Msg::CreateMarketOrder(stop)).unwrap();
    engine.end_block();
    println!("  Reduce-only stop sell placed with trigger 95");

    oracle.set("btc", "usdt", px(dec!(94)), Timestamp::from_secs(3));
    let report = empty_block(&mut engine, 3, 3, &oracle);
    println!("  Price falls to 94: {} triggered, {} fills", report.triggered, report.fills);
    println!(
        "  Trader position after stop: {}\n",
        engine.position(PERP, trader).map_or("closed".to_string(), |p| p.quantity.to_string())
    );
}

/// Premiums sampled each block settle into the funding index once per interval.
fn scenario_4_funding() {
    println!("Scenario 4: Funding Settlement\n");

    let (long, short, maker) = (SubaccountId(1), SubaccountId(2), SubaccountId(3));
    let bank = funded_bank(&[long, short, maker], &["usdt"], dec!(100000));
    let config = EngineConfig::with_params(ExchangeParams::devnet());
    let mut engine = Engine::new(config, bank, InMemoryInsuranceFund::new());
    engine
        .apply_governance(GovernanceUpdate::ListMarket(MarketConfig::perpetual(PERP.0, "btc", "usdt")))
        .unwrap();

    let oracle = StaticOracle::new().with_price("btc", "usdt", px(dec!(100)));
    engine.begin_block(BlockContext::new(1, Timestamp::from_secs(1)), &oracle);
    for subaccount in [long, short, maker] {
        deposit(&mut engine, subaccount, "usdt", dec!(10000));
    }
    let ask = OrderSpec::new(PERP, short, OrderType::SellPostOnly, px(dec!(101)), dec!(10)).with_margin(dec!(200));
    engine.deliver(Msg::CreateLimitOrder(ask)).unwrap();
    let buy = OrderSpec::new(PERP, long, OrderType::Buy, px(dec!(101)), dec!(10)).with_margin(dec!(200));
    engine.deliver(Msg::CreateMarketOrder(buy)).unwrap();
    engine.end_block();

    // a book trading above the oracle pays shorts
    let bid = OrderSpec::new(PERP, maker, OrderType::BuyPostOnly, px(dec!(101.5)), dec!(1)).with_margin(dec!(20));
    let ask = OrderSpec::new(PERP, maker, OrderType::SellPostOnly, px(dec!(102.5)), dec!(1)).with_margin(dec!(20));
    engine.begin_block(BlockContext::new(2, Timestamp::from_secs(2)), &oracle);
    engine.deliver(Msg::CreateLimitOrder(bid)).unwrap();
    engine.deliver(Msg::CreateLimitOrder(ask)).unwrap();
    engine.end_block();

    for height in 3..=8 {
        let report = empty_block(&mut engine, height, height as i64 * 12, &oracle);
        for (market_id, rate) in report.funding {
            println!("  Block {height}: funding settled on {market_id} at rate {rate}");
        }
    }
    let cumulative = engine.get_market(PERP).map(|m| m.cumulative_funding()).unwrap_or_default();
    println!("  Cumulative funding index: {cumulative}\n");
}

/// An underwater long is closed against a liquidator's bid; the owner covers the gap.
fn scenario_5_liquidation() {
    println!("Scenario 5: Liquidation\n");

    let (long, short, liquidator) = (SubaccountId(1), SubaccountId(2), SubaccountId(3));
    let bank = funded_bank(&[long, short, liquidator], &["usdt"], dec!(100000)).with_insurance_balance("usdt", dec!(1000));
    let insurance = InMemoryInsuranceFund::new().with_pool(PERP, dec!(1000));
    let mut engine = Engine::new(EngineConfig::default(), bank, insurance);
    let config = MarketConfig::perpetual(PERP.0, "eth", "usdt").with_fees(Decimal::ZERO, Decimal::ZERO);
    engine.apply_governance(GovernanceUpdate::ListMarket(config)).unwrap();

    let mut oracle = StaticOracle::new().with_price("eth", "usdt", px(dec!(2010)));
    engine.begin_block(BlockContext::new(1, Timestamp::from_secs(1)), &oracle);
    deposit(&mut engine, long, "usdt", dec!(1500));
    deposit(&mut engine, short, "usdt", dec!(5000));
    deposit(&mut engine, liquidator, "usdt", dec!(5000));
    let ask = OrderSpec::new(PERP, short, OrderType::SellPostOnly, px(dec!(2010)), dec!(2)).with_margin(dec!(1000));
    engine.deliver(Msg::CreateLimitOrder(ask)).unwrap();
    let buy = OrderSpec::new(PERP, long, OrderType::Buy, px(dec!(2010)), dec!(2)).with_margin(dec!(1000));
    engine.deliver(Msg::CreateMarketOrder(buy)).unwrap();
    engine.end_block();
    println!("  Long 2 ETH @ 2010 with 1000 margin");

    oracle.set("eth", "usdt", px(dec!(1400)), Timestamp::from_secs(2));
    engine.begin_block(BlockContext::new(2, Timestamp::from_secs(2)), &oracle);
    let bid = OrderSpec::new(PERP, liquidator, OrderType::Buy, px(dec!(1410)), dec!(2)).with_margin(dec!(500));
    let response = engine
        .deliver(Msg::LiquidatePosition {
            market_id: PERP,
            subaccount_id: long,
            liquidator,
            order: Some(bid),
        })
        .unwrap();
    engine.end_block();

    if let MsgResponse::Liquidation(result) = response {
        println!("  Oracle drops to 1400, closed at {}", result.average_price.map(|p| p.to_string()).unwrap_or_default());
        println!("  Payout {}, owner covered {}, insurance drew {}", result.payout, result.owner_contribution, result.insurance_draw);
    }
    println!(
        "  Owner deposit left: {}, insurance fund: {}\n",
        engine.deposit_of(long, &Denom::from("usdt")).total,
        engine.insurance().balance(PERP)
    );
}

/// An expiry future settles every position at the mark once its expiry passes.
fn scenario_6_expiry() {
    println!("Scenario 6: Expiry Settlement\n");

    let (long, short) = (SubaccountId(1), SubaccountId(2));
    let bank = funded_bank(&[long, short], &["usdt"], dec!(100000));
    let mut engine = Engine::new(EngineConfig::default(), bank, InMemoryInsuranceFund::new());
    let config = MarketConfig::expiry_future(FUTURE.0, "btc", "usdt", Timestamp::from_secs(100));
    engine.apply_governance(GovernanceUpdate::ListMarket(config)).unwrap();

    let mut oracle = StaticOracle::new().with_price("btc", "usdt", px(dec!(500)));
    engine.begin_block(BlockContext::new(1, Timestamp::from_secs(10)), &oracle);
    deposit(&mut engine, long, "usdt", dec!(1000));
    deposit(&mut engine, short, "usdt", dec!(1000));
    let ask = OrderSpec::new(FUTURE, short, OrderType::SellPostOnly, px(dec!(500)), dec!(1)).with_margin(dec!(100));
    engine.deliver(Msg::CreateLimitOrder(ask)).unwrap();
    let buy = OrderSpec::new(FUTURE, long, OrderType::Buy, px(dec!(500)), dec!(1)).with_margin(dec!(100));
    engine.deliver(Msg::CreateMarketOrder(buy)).unwrap();
    engine.end_block();

    oracle.set("btc", "usdt", px(dec!(540)), Timestamp::from_secs(100));
    let report = empty_block(&mut engine, 2, 100, &oracle);
    let usdt_denom = Denom::from("usdt");
    println!("  Expired markets: {:?}", report.expired);
    println!(
        "  Status {:?}, long {} USDT, short {} USDT\n",
        engine.get_market(FUTURE).map(|m| m.status),
        engine.deposit_of(long, &usdt_denom).total,
        engine.deposit_of(short, &usdt_denom).total
    );
}
