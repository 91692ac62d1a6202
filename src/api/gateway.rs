//! The abstract exchange interface consumed by the registry and the trading
//! engine. Implementations are swappable (live Binance client or a mock in
//! tests).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors surfaced by exchange calls. Inside a trading iteration these are
/// caught and degrade the iteration to a hold; they never cross bot
/// boundaries.
#[derive(Error, Debug)]
pub enum ExchangeError {
    #[error("exchange transport error: {0}")]
    Transport(String),

    #[error("exchange API error {code}: {message}")]
    Api { code: i64, message: String },

    #[error("invalid data from exchange: {0}")]
    InvalidData(String),
}

/// Order direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderSide::Buy => "BUY",
            OrderSide::Sell => "SELL",
        }
    }
}

/// Trading rules the exchange enforces for a symbol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolRules {
    /// Minimum quantity * price an order must reach
    pub min_notional: Decimal,

    /// Minimum order quantity
    pub min_qty: Decimal,

    /// Quantity granularity (lot size)
    pub step_size: Decimal,
}

/// One candle of market history.
#[derive(Debug, Clone)]
pub struct Kline {
    pub open_time: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
}

/// Result of a submitted market order.
#[derive(Debug, Clone)]
pub struct OrderResult {
    pub order_id: u64,
    pub symbol: String,
    pub side: OrderSide,
    pub executed_qty: Decimal,
    pub status: String,
}

/// The capability boundary to the exchange. Price ticker lookup, symbol
/// trading rules, k-line history, market order submission, and fee lookup.
#[async_trait]
pub trait ExchangeGateway: Send + Sync {
    /// Latest price for a symbol.
    async fn get_price(&self, symbol: &str) -> Result<Decimal, ExchangeError>;

    /// Minimum notional, lot size, and step size for a symbol.
    async fn get_symbol_rules(&self, symbol: &str) -> Result<SymbolRules, ExchangeError>;

    /// Most recent `limit` klines for `(symbol, interval)`, oldest first.
    async fn get_klines(
        &self,
        symbol: &str,
        interval: &str,
        limit: u32,
    ) -> Result<Vec<Kline>, ExchangeError>;

    /// Submit a market order.
    async fn place_market_order(
        &self,
        symbol: &str,
        side: OrderSide,
        quantity: Decimal,
    ) -> Result<OrderResult, ExchangeError>;

    /// Taker fee rate for a symbol as a fraction (e.g. 0.001).
    async fn get_fee_rate(&self, symbol: &str) -> Result<Decimal, ExchangeError>;
}
