//! Trade execution shared by the buy and sell paths: quantity sizing, lot
//! rounding, pre-submission validation, and post-fill bookkeeping.

use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use thiserror::Error;
use tracing::{debug, warn};

use crate::api::{ExchangeError, ExchangeGateway, OrderSide};
use crate::models::{BotState, TradeAction, TradeRecord};

/// Why a trade attempt did not result in an order. Validation failures are
/// raised before any exchange round-trip; both variants count as a failed
/// trade and leave balances untouched.
#[derive(Error, Debug)]
pub enum TradeError {
    #[error("trade rejected: {0}")]
    Validation(String),

    #[error(transparent)]
    Exchange(#[from] ExchangeError),
}

/// Round a quantity onto the exchange's lot grid: floor it at the minimum
/// quantity, then snap down to a whole number of steps above that minimum.
pub fn adjust_quantity(quantity: Decimal, min_qty: Decimal, step_size: Decimal) -> Decimal {
    let raw = quantity.max(min_qty);
    let steps = ((raw - min_qty) / step_size).floor();
    min_qty + steps * step_size
}

/// Executes market orders for one bot and applies the resulting bookkeeping.
pub struct TradeExecutor {
    gateway: Arc<dyn ExchangeGateway>,
}

impl TradeExecutor {
    pub fn new(gateway: Arc<dyn ExchangeGateway>) -> Self {
        Self { gateway }
    }

    /// Execute a sized market order. On success the balances, counters, and
    /// trade log are updated; on any failure only the failure counters move.
    pub async fn execute(
        &self,
        state: &mut BotState,
        action: TradeAction,
        allocation_pct: Decimal,
    ) -> Result<TradeRecord, TradeError> {
        let result = self.execute_inner(state, action, allocation_pct).await;
        match result {
            Ok(record) => {
                state.record_trade(record.clone());
                Ok(record)
            }
            Err(e) => {
                state.record_failed_trade();
                Err(e)
            }
        }
    }

    async fn execute_inner(
        &self,
        state: &mut BotState,
        action: TradeAction,
        allocation_pct: Decimal,
    ) -> Result<TradeRecord, TradeError> {
        let symbol = state.symbol.clone();
        let rules = self.gateway.get_symbol_rules(&symbol).await?;
        let price = self.gateway.get_price(&symbol).await?;
        if price <= Decimal::ZERO {
            return Err(TradeError::Validation(format!("non-positive price {}", price)));
        }

        let allocation = allocation_pct / Decimal::ONE_HUNDRED;

        let quantity = match action {
            TradeAction::Buy => {
                let trade_amount = state.quote_quantity * allocation;
                let mut adjusted =
                    adjust_quantity(trade_amount / price, rules.min_qty, rules.step_size);

                // Bump up to the exchange's minimum notional if the sized
                // order falls short of it.
                if adjusted * price < rules.min_notional {
                    adjusted =
                        adjust_quantity(rules.min_notional / price, rules.min_qty, rules.step_size);
                    if adjusted * price < rules.min_notional {
                        adjusted += rules.step_size;
                    }
                }

                let required = adjusted * price;
                if state.quote_quantity < required {
                    return Err(TradeError::Validation(format!(
                        "insufficient {} balance: required {}, available {}",
                        state.quote_currency, required, state.quote_quantity
                    )));
                }
                adjusted
            }
            TradeAction::Sell => {
                let trade_amount = state.current_trade_amount * allocation;
                // Sell only what we hold.
                let raw = (trade_amount / price).min(state.base_quantity);
                let adjusted = adjust_quantity(raw, rules.min_qty, rules.step_size);

                if state.base_quantity < adjusted {
                    return Err(TradeError::Validation(format!(
                        "insufficient {} balance: required {}, available {}",
                        state.base_currency, adjusted, state.base_quantity
                    )));
                }

                let value = adjusted * price;
                if value < rules.min_notional {
                    return Err(TradeError::Validation(format!(
                        "trade value {} is below minimum notional {}",
                        value, rules.min_notional
                    )));
                }
                adjusted
            }
        };

        let side = match action {
            TradeAction::Buy => OrderSide::Buy,
            TradeAction::Sell => OrderSide::Sell,
        };
        let order = self.gateway.place_market_order(&symbol, side, quantity).await?;
        debug!(
            symbol = %symbol,
            side = %side.as_str(),
            order_id = order.order_id,
            quantity = %quantity,
            "order filled"
        );

        let fee_rate = match self.gateway.get_fee_rate(&symbol).await {
            Ok(rate) => rate,
            Err(e) => {
                warn!(symbol = %symbol, error = %e, "fee lookup failed, using fallback rate");
                state.risk.fallback_fee_rate
            }
        };

        let value = quantity * price;
        let fee = value * fee_rate;

        let net_value = match action {
            TradeAction::Buy => {
                let net_cost = value + fee;
                state.current_trade_amount -= net_cost;
                state.base_quantity += quantity;
                state.quote_quantity -= value;
                net_cost
            }
            TradeAction::Sell => {
                let net = value - fee;
                state.current_trade_amount += net;
                state.base_quantity = (state.base_quantity - quantity).max(Decimal::ZERO);
                state.quote_quantity += value;
                net
            }
        };

        Ok(TradeRecord {
            action,
            price,
            quantity,
            value,
            fee,
            net_value,
            timestamp: Utc::now(),
        })
    }
}
