//! Scriptable in-memory exchange used by unit and scenario tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use super::gateway::{ExchangeError, ExchangeGateway, Kline, OrderResult, OrderSide, SymbolRules};

#[derive(Default)]
struct MockInner {
    price: Decimal,
    series: VecDeque<Vec<Kline>>,
    last_served: Option<Vec<Kline>>,
    orders: Vec<(String, OrderSide, Decimal)>,
    next_order_id: u64,
}

/// Deterministic [`ExchangeGateway`] double. Kline windows are scripted per
/// tick; the ticker price follows the last close of the most recently served
/// window.
pub struct MockExchange {
    inner: Mutex<MockInner>,
    pub rules: SymbolRules,
    pub fee_rate: Decimal,
    pub fail_orders: AtomicBool,
    pub fail_market_data: AtomicBool,
}

impl MockExchange {
    pub fn new(price: Decimal) -> Self {
        Self {
            inner: Mutex::new(MockInner {
                price,
                next_order_id: 1,
                ..Default::default()
            }),
            rules: SymbolRules {
                min_notional: dec!(10),
                min_qty: dec!(0.001),
                step_size: dec!(0.001),
            },
            fee_rate: dec!(0.001),
            fail_orders: AtomicBool::new(false),
            fail_market_data: AtomicBool::new(false),
        }
    }

    pub fn with_rules(mut self, rules: SymbolRules) -> Self {
        self.rules = rules;
        self
    }

    /// Queue one kline window to be served by the next `get_klines` call.
    pub fn push_series(&self, klines: Vec<Kline>) {
        self.inner.lock().unwrap().series.push_back(klines);
    }

    pub fn orders(&self) -> Vec<(String, OrderSide, Decimal)> {
        self.inner.lock().unwrap().orders.clone()
    }

    pub fn set_price(&self, price: Decimal) {
        self.inner.lock().unwrap().price = price;
    }
}

/// Build a kline window from closes, with highs/lows a fixed spread away.
/// The spread controls the ATR the engine will observe.
pub fn klines_from_closes(closes: &[Decimal], spread: Decimal) -> Vec<Kline> {
    closes
        .iter()
        .map(|&close| Kline {
            open_time: Utc::now(),
            open: close,
            high: close + spread,
            low: close - spread,
            close,
            volume: dec!(1),
        })
        .collect()
}

#[async_trait]
impl ExchangeGateway for MockExchange {
    async fn get_price(&self, _symbol: &str) -> Result<Decimal, ExchangeError> {
        if self.fail_market_data.load(Ordering::SeqCst) {
            return Err(ExchangeError::Transport("mock: market data down".into()));
        }
        Ok(self.inner.lock().unwrap().price)
    }

    async fn get_symbol_rules(&self, _symbol: &str) -> Result<SymbolRules, ExchangeError> {
        if self.fail_market_data.load(Ordering::SeqCst) {
            return Err(ExchangeError::Transport("mock: market data down".into()));
        }
        Ok(self.rules.clone())
    }

    async fn get_klines(
        &self,
        _symbol: &str,
        _interval: &str,
        _limit: u32,
    ) -> Result<Vec<Kline>, ExchangeError> {
        if self.fail_market_data.load(Ordering::SeqCst) {
            return Err(ExchangeError::Transport("mock: market data down".into()));
        }
        let mut inner = self.inner.lock().unwrap();
        let window = match inner.series.pop_front() {
            Some(window) => {
                inner.last_served = Some(window.clone());
                window
            }
            None => inner
                .last_served
                .clone()
                .ok_or_else(|| ExchangeError::InvalidData("mock: no kline script".into()))?,
        };
        if let Some(last) = window.last() {
            inner.price = last.close;
        }
        Ok(window)
    }

    async fn place_market_order(
        &self,
        symbol: &str,
        side: OrderSide,
        quantity: Decimal,
    ) -> Result<OrderResult, ExchangeError> {
        if self.fail_orders.load(Ordering::SeqCst) {
            return Err(ExchangeError::Api {
                code: -2010,
                message: "mock: order rejected".into(),
            });
        }
        let mut inner = self.inner.lock().unwrap();
        let order_id = inner.next_order_id;
        inner.next_order_id += 1;
        inner.orders.push((symbol.to_string(), side, quantity));
        Ok(OrderResult {
            order_id,
            symbol: symbol.to_string(),
            side,
            executed_qty: quantity,
            status: "FILLED".to_string(),
        })
    }

    async fn get_fee_rate(&self, _symbol: &str) -> Result<Decimal, ExchangeError> {
        Ok(self.fee_rate)
    }
}
