//! Wire-format response types for the Binance spot REST API.

use serde::Deserialize;

/// `GET /api/v3/ticker/price`
#[derive(Debug, Deserialize)]
pub struct TickerPriceResponse {
    #[allow(dead_code)]
    pub symbol: String,
    pub price: String,
}

/// `GET /api/v3/exchangeInfo`
#[derive(Debug, Deserialize)]
pub struct ExchangeInfoResponse {
    pub symbols: Vec<SymbolInfoResponse>,
}

#[derive(Debug, Deserialize)]
pub struct SymbolInfoResponse {
    #[allow(dead_code)]
    pub symbol: String,
    pub filters: Vec<SymbolFilter>,
}

/// One entry of a symbol's filter list. Binance returns a heterogeneous
/// array; only the lot-size and notional filters matter here.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SymbolFilter {
    pub filter_type: String,
    pub min_qty: Option<String>,
    pub step_size: Option<String>,
    pub min_notional: Option<String>,
}

/// One kline row: Binance serialises candles as positional JSON arrays.
/// `[open_time, open, high, low, close, volume, close_time, ...]`
#[derive(Debug, Deserialize)]
pub struct RawKline(
    pub i64,
    pub String,
    pub String,
    pub String,
    pub String,
    pub String,
    pub i64,
    pub serde_json::Value,
    pub serde_json::Value,
    pub serde_json::Value,
    pub serde_json::Value,
    pub serde_json::Value,
);

/// `POST /api/v3/order`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderResponse {
    pub order_id: u64,
    pub symbol: String,
    pub status: String,
    pub executed_qty: String,
}

/// `GET /sapi/v1/asset/tradeFee`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TradeFeeResponse {
    #[allow(dead_code)]
    pub symbol: String,
    #[allow(dead_code)]
    pub maker_commission: String,
    pub taker_commission: String,
}

/// Error body Binance returns on non-2xx responses.
#[derive(Debug, Deserialize)]
pub struct ApiErrorResponse {
    pub code: i64,
    pub msg: String,
}
