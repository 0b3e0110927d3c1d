//! Shared block-driving harness for the integration tests.

#![allow(dead_code)]

use exchange_core::*;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

pub const SPOT: MarketId = MarketId(1);
pub const PERP: MarketId = MarketId(2);
pub const FUTURE: MarketId = MarketId(3);
pub const BINARY: MarketId = MarketId(4);

/// Every test subaccount starts with this much of each denom in its wallet.
pub const WALLET: Decimal = dec!(1_000_000);

pub fn px(value: Decimal) -> Price {
    Price::new_unchecked(value)
}

pub fn sub(id: u64) -> SubaccountId {
    SubaccountId(id)
}

pub fn denom(name: &str) -> Denom {
    Denom::from(name)
}

pub struct Harness {
    pub engine: Engine,
    pub oracle: StaticOracle,
    pub height: u64,
    pub secs: i64,
}

impl Harness {
    pub fn new(markets: Vec<MarketConfig>) -> Self {
        Self::with_insurance(markets, InMemoryInsuranceFund::new())
    }

    pub fn with_insurance(markets: Vec<MarketConfig>, insurance: InMemoryInsuranceFund) -> Self {
        Self::with_config(EngineConfig::default(), markets, insurance)
    }

    pub fn with_config(config: EngineConfig, markets: Vec<MarketConfig>, insurance: InMemoryInsuranceFund) -> Self {
        // every pool in these tests is quoted in usdt
        let mut bank = InMemoryBank::new().with_insurance_balance("usdt", insurance.total());
        for id in 1..=20 {
            for name in ["usdt", "inj", "eth", "btc"] {
                bank = bank.with_balance(sub(id), name, WALLET);
            }
        }
        let mut engine = Engine::new(config, bank, insurance);
        for market in markets {
            engine
                .apply_governance(GovernanceUpdate::ListMarket(market))
                .expect("market lists");
        }
        Self {
            engine,
            oracle: StaticOracle::new(),
            height: 0,
            secs: 0,
        }
    }

    pub fn set_price(&mut self, base: &str, value: Decimal) {
        self.oracle.set(base, "usdt", px(value), Timestamp::default());
    }

    pub fn clear_price(&mut self, base: &str) {
        self.oracle.remove(base, "usdt");
    }

    /// Open the next block one second after the previous one.
    pub fn begin(&mut self) {
        let secs = self.secs + 1;
        self.begin_at(secs);
    }

    pub fn begin_at(&mut self, secs: i64) {
        self.height += 1;
        self.secs = secs;
        self.engine
            .begin_block(BlockContext::new(self.height, Timestamp::from_secs(secs)), &self.oracle);
    }

    pub fn end(&mut self) -> BlockReport {
        let report = self.engine.end_block();
        assert!(
            report.invariant_violations.is_empty(),
            "invariants violated: {:?}",
            report.invariant_violations
        );
        report
    }

    /// A block with no messages.
    pub fn block(&mut self) -> BlockReport {
        self.begin();
        self.end()
    }

    pub fn deposit(&mut self, subaccount_id: SubaccountId, name: &str, amount: Decimal) {
        self.engine
            .deliver(Msg::Deposit {
                subaccount_id,
                denom: denom(name),
                amount,
            })
            .expect("deposit");
    }

    pub fn limit(&mut self, spec: OrderSpec) -> Result<OrderResult, EngineError> {
        self.engine
            .deliver(Msg::CreateLimitOrder(spec))
            .map(|r| r.order().cloned().expect("order response"))
    }

    pub fn market(&mut self, spec: OrderSpec) -> Result<OrderResult, EngineError> {
        self.engine
            .deliver(Msg::CreateMarketOrder(spec))
            .map(|r| r.order().cloned().expect("order response"))
    }

    pub fn cancel(&mut self, market_id: MarketId, subaccount_id: SubaccountId, order_hash: OrderHash) -> Result<Decimal, EngineError> {
        self.engine
            .deliver(Msg::CancelOrder {
                market_id,
                subaccount_id,
                order_hash,
            })
            .map(|r| match r {
                MsgResponse::Canceled { released } => released,
                other => panic!("unexpected response {other:?}"),
            })
    }

    pub fn liquidate(
        &mut self,
        market_id: MarketId,
        subaccount_id: SubaccountId,
        liquidator: SubaccountId,
        order: Option<OrderSpec>,
    ) -> Result<LiquidationResult, EngineError> {
        self.engine
            .deliver(Msg::LiquidatePosition {
                market_id,
                subaccount_id,
                liquidator,
                order,
            })
            .map(|r| match r {
                MsgResponse::Liquidation(result) => result,
                other => panic!("unexpected response {other:?}"),
            })
    }

    pub fn balance(&self, subaccount_id: SubaccountId, name: &str) -> Deposit {
        self.engine.deposit_of(subaccount_id, &denom(name))
    }

    pub fn usdt(&self, subaccount_id: SubaccountId) -> Deposit {
        self.balance(subaccount_id, "usdt")
    }

    /// Coins the exchange module holds beyond what deposits and the fee pool are owed.
    /// Zero whenever no position is open.
    pub fn unbacked(&self, name: &str) -> Decimal {
        let denom = denom(name);
        let owed = self.engine.deposits().total_of(&denom) + self.engine.protocol_fees(&denom);
        self.engine.bank().module_balance(&denom) - owed
    }

    pub fn market_state(&self, market_id: MarketId) -> &MarketState {
        self.engine.get_market(market_id).expect("market listed")
    }

    pub fn status(&self, market_id: MarketId) -> MarketStatus {
        self.market_state(market_id).status
    }

    pub fn events_since(&self, start: usize) -> Vec<EventPayload> {
        self.engine.events()[start..].iter().map(|e| e.payload.clone()).collect()
    }
}

/// Zero-fee perpetual on eth/usdt, so balances move by margin and PnL only.
pub fn eth_perp() -> MarketConfig {
    MarketConfig::perpetual(PERP.0, "eth", "usdt").with_fees(Decimal::ZERO, Decimal::ZERO)
}

/// Opens a 2-unit position pair at 2010 on [`eth_perp`]: `long` buys from `short`.
pub fn open_eth_pair(h: &mut Harness, long: SubaccountId, long_margin: Decimal, short: SubaccountId) {
    h.set_price("eth", dec!(2010));
    h.begin();
    let ask = OrderSpec::new(PERP, short, OrderType::SellPostOnly, px(dec!(2010)), dec!(2)).with_margin(dec!(1000));
    h.limit(ask).expect("ask rests");
    let buy = OrderSpec::new(PERP, long, OrderType::Buy, px(dec!(2010)), dec!(2)).with_margin(long_margin);
    h.market(buy).expect("buy staged");
    let report = h.end();
    assert_eq!(report.fills, 1);
}
