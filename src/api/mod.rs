//! Exchange access: the gateway trait the trading engine consumes and the
//! Binance spot REST implementation.

mod binance;
mod gateway;
mod types;

#[cfg(test)]
pub mod mock;

pub use binance::BinanceClient;
pub use gateway::{ExchangeError, ExchangeGateway, Kline, OrderResult, OrderSide, SymbolRules};
