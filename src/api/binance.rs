//! Binance spot REST client implementing [`ExchangeGateway`].
//!
//! Public market-data endpoints are unsigned; order submission and fee lookup
//! are signed with HMAC-SHA256 per the Binance API documentation.

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use hmac::{Hmac, Mac};
use reqwest::Client;
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use sha2::Sha256;
use tracing::debug;

use super::gateway::{ExchangeError, ExchangeGateway, Kline, OrderResult, OrderSide, SymbolRules};
use super::types::*;

const DEFAULT_BASE_URL: &str = "https://testnet.binance.vision";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

type HmacSha256 = Hmac<Sha256>;

/// Signed REST client for the Binance spot API.
pub struct BinanceClient {
    client: Client,
    base_url: String,
    api_key: String,
    api_secret: String,
}

impl BinanceClient {
    /// Create a client from explicit credentials and base URL.
    pub fn new(base_url: String, api_key: String, api_secret: String) -> anyhow::Result<Self> {
        let client = Client::builder().timeout(DEFAULT_TIMEOUT).build()?;
        Ok(Self {
            client,
            base_url,
            api_key,
            api_secret,
        })
    }

    /// Create a client from `BINANCE_API_KEY` / `BINANCE_API_SECRET` and the
    /// optional `BINANCE_BASE_URL` (defaults to the spot testnet).
    pub fn from_env() -> anyhow::Result<Self> {
        let base_url =
            std::env::var("BINANCE_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());
        let api_key = std::env::var("BINANCE_API_KEY").unwrap_or_default();
        let api_secret = std::env::var("BINANCE_API_SECRET").unwrap_or_default();
        Self::new(base_url, api_key, api_secret)
    }

    fn sign(&self, query_string: &str) -> String {
        let mut mac = HmacSha256::new_from_slice(self.api_secret.as_bytes())
            .expect("HMAC accepts keys of any size");
        mac.update(query_string.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    async fn parse_response<T: DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, ExchangeError> {
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| ExchangeError::Transport(e.to_string()))?;

        if status.is_success() {
            serde_json::from_str(&text).map_err(|e| ExchangeError::InvalidData(e.to_string()))
        } else {
            match serde_json::from_str::<ApiErrorResponse>(&text) {
                Ok(err) => Err(ExchangeError::Api {
                    code: err.code,
                    message: err.msg,
                }),
                Err(_) => Err(ExchangeError::Api {
                    code: status.as_u16() as i64,
                    message: text,
                }),
            }
        }
    }

    async fn get_public<T: DeserializeOwned>(
        &self,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<T, ExchangeError> {
        let url = format!("{}{}", self.base_url, path);
        debug!(url = %url, "Binance GET");

        let response = self
            .client
            .get(&url)
            .query(params)
            .send()
            .await
            .map_err(|e| ExchangeError::Transport(e.to_string()))?;

        Self::parse_response(response).await
    }

    fn signed_url(&self, path: &str, params: &[(&str, String)]) -> String {
        let mut query: Vec<String> = params
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();
        query.push(format!("timestamp={}", Utc::now().timestamp_millis()));
        let query_string = query.join("&");
        let signature = self.sign(&query_string);
        format!("{}{}?{}&signature={}", self.base_url, path, query_string, signature)
    }

    async fn get_signed<T: DeserializeOwned>(
        &self,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<T, ExchangeError> {
        let url = self.signed_url(path, params);
        let response = self
            .client
            .get(&url)
            .header("X-MBX-APIKEY", &self.api_key)
            .send()
            .await
            .map_err(|e| ExchangeError::Transport(e.to_string()))?;

        Self::parse_response(response).await
    }

    async fn post_signed<T: DeserializeOwned>(
        &self,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<T, ExchangeError> {
        let url = self.signed_url(path, params);
        let response = self
            .client
            .post(&url)
            .header("X-MBX-APIKEY", &self.api_key)
            .send()
            .await
            .map_err(|e| ExchangeError::Transport(e.to_string()))?;

        Self::parse_response(response).await
    }
}

fn parse_decimal(value: &str, field: &str) -> Result<Decimal, ExchangeError> {
    Decimal::from_str(value)
        .map_err(|e| ExchangeError::InvalidData(format!("{}: {} ({})", field, value, e)))
}

#[async_trait]
impl ExchangeGateway for BinanceClient {
    async fn get_price(&self, symbol: &str) -> Result<Decimal, ExchangeError> {
        let ticker: TickerPriceResponse = self
            .get_public("/api/v3/ticker/price", &[("symbol", symbol.to_string())])
            .await?;
        parse_decimal(&ticker.price, "price")
    }

    async fn get_symbol_rules(&self, symbol: &str) -> Result<SymbolRules, ExchangeError> {
        let info: ExchangeInfoResponse = self
            .get_public("/api/v3/exchangeInfo", &[("symbol", symbol.to_string())])
            .await?;

        let symbol_info = info
            .symbols
            .into_iter()
            .next()
            .ok_or_else(|| ExchangeError::InvalidData(format!("unknown symbol {}", symbol)))?;

        let mut min_qty = Decimal::ONE;
        let mut step_size = Decimal::ONE;
        let mut min_notional = Decimal::ZERO;

        for filter in symbol_info.filters {
            match filter.filter_type.as_str() {
                "LOT_SIZE" => {
                    if let Some(v) = filter.min_qty.as_deref() {
                        min_qty = parse_decimal(v, "minQty")?;
                    }
                    if let Some(v) = filter.step_size.as_deref() {
                        step_size = parse_decimal(v, "stepSize")?;
                    }
                }
                // Spot API has used both names for the notional filter.
                "MIN_NOTIONAL" | "NOTIONAL" => {
                    if let Some(v) = filter.min_notional.as_deref() {
                        min_notional = parse_decimal(v, "minNotional")?;
                    }
                }
                _ => {}
            }
        }

        Ok(SymbolRules {
            min_notional,
            min_qty,
            step_size,
        })
    }

    async fn get_klines(
        &self,
        symbol: &str,
        interval: &str,
        limit: u32,
    ) -> Result<Vec<Kline>, ExchangeError> {
        let raw: Vec<RawKline> = self
            .get_public(
                "/api/v3/klines",
                &[
                    ("symbol", symbol.to_string()),
                    ("interval", interval.to_string()),
                    ("limit", limit.to_string()),
                ],
            )
            .await?;

        raw.into_iter()
            .map(|k| {
                Ok(Kline {
                    open_time: Utc
                        .timestamp_millis_opt(k.0)
                        .single()
                        .ok_or_else(|| ExchangeError::InvalidData(format!("open_time {}", k.0)))?,
                    open: parse_decimal(&k.1, "open")?,
                    high: parse_decimal(&k.2, "high")?,
                    low: parse_decimal(&k.3, "low")?,
                    close: parse_decimal(&k.4, "close")?,
                    volume: parse_decimal(&k.5, "volume")?,
                })
            })
            .collect()
    }

    async fn place_market_order(
        &self,
        symbol: &str,
        side: OrderSide,
        quantity: Decimal,
    ) -> Result<OrderResult, ExchangeError> {
        let params = [
            ("symbol", symbol.to_string()),
            ("side", side.as_str().to_string()),
            ("type", "MARKET".to_string()),
            ("quantity", quantity.normalize().to_string()),
        ];

        let order: OrderResponse = self.post_signed("/api/v3/order", &params).await?;

        Ok(OrderResult {
            order_id: order.order_id,
            symbol: order.symbol,
            side,
            executed_qty: parse_decimal(&order.executed_qty, "executedQty")?,
            status: order.status,
        })
    }

    async fn get_fee_rate(&self, symbol: &str) -> Result<Decimal, ExchangeError> {
        let fees: Vec<TradeFeeResponse> = self
            .get_signed("/sapi/v1/asset/tradeFee", &[("symbol", symbol.to_string())])
            .await?;

        let fee = fees
            .first()
            .ok_or_else(|| ExchangeError::InvalidData(format!("no fee entry for {}", symbol)))?;

        // The API reports the rate as a fraction already (e.g. "0.001").
        parse_decimal(&fee.taker_commission, "takerCommission")
    }
}
