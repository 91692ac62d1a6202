//! Bot state model: the single mutable record owned by one trading worker.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::trading::RiskConfig;

/// Lifecycle phase of a bot worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BotPhase {
    Starting,
    Running,
    StoppingRequested,
    Stopped,
}

/// Direction of an executed trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TradeAction {
    Buy,
    Sell,
}

impl TradeAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeAction::Buy => "BUY",
            TradeAction::Sell => "SELL",
        }
    }
}

/// Record of a single executed trade, appended to the bot's in-memory log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeRecord {
    pub action: TradeAction,

    /// Fill price in quote currency
    pub price: Decimal,

    /// Quantity of base currency traded
    pub quantity: Decimal,

    /// Gross value (quantity * price)
    pub value: Decimal,

    /// Estimated exchange fee
    pub fee: Decimal,

    /// Net proceeds (sell) or net cost (buy) after fee
    pub net_value: Decimal,

    pub timestamp: DateTime<Utc>,
}

/// Full state of one running bot.
///
/// Exclusively owned by its worker task once started; the registry only reads
/// cloned snapshots and flips the external stop flag. All monetary fields are
/// exact base-10 decimals.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotState {
    // === Identity ===
    /// Market pair, e.g. "BTCUSDT"
    pub symbol: String,

    /// Kline interval, e.g. "1h"
    pub interval: String,

    /// Base asset of the pair, e.g. "BTC"
    pub base_currency: String,

    /// Quote asset of the pair, e.g. "USDT"
    pub quote_currency: String,

    /// Asset all holdings are revalued into for P&L reporting
    pub quote_asset_of_account: String,

    // === Balances ===
    /// Base currency held
    pub base_quantity: Decimal,

    /// Quote currency held
    pub quote_quantity: Decimal,

    /// Funds committed at start; the P&L baseline
    pub starting_trade_amount: Decimal,

    /// Running trade amount; its deviation from the starting amount is the
    /// sole stop-loss / take-profit signal
    pub current_trade_amount: Decimal,

    // === Risk configuration ===
    /// Percentage of the driving-side balance committed per trade
    pub trade_allocation_pct: Decimal,

    pub risk: RiskConfig,

    // === Mutable risk trackers ===
    /// Highest close ever observed; never decreases for the bot's lifetime
    pub highest_market_price: Decimal,

    /// Advisory sizing output of the dynamic-allocation rule
    pub dynamic_trade_allocation: Decimal,

    /// Latest close seen by the previous iteration
    pub previous_market_price: Decimal,

    /// Mark-to-market P&L in the quote asset of account
    pub total_profit_loss: Decimal,

    // === Counters ===
    pub total_trades: u64,
    pub successful_trades: u64,
    pub failed_trades: u64,
    pub total_buys: u64,
    pub total_sells: u64,
    pub total_holds: u64,

    // === Lifecycle ===
    pub phase: BotPhase,

    pub start_time: DateTime<Utc>,

    /// Absent means an unbounded trade window
    pub end_time: Option<DateTime<Utc>>,

    /// Append-only trade log
    pub log: Vec<TradeRecord>,
}

impl BotState {
    /// Create the state for a freshly started bot. Balances start at zero;
    /// the registry fills them in after the initial fund split.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        symbol: String,
        interval: String,
        base_currency: String,
        quote_currency: String,
        starting_trade_amount: Decimal,
        trade_allocation_pct: Decimal,
        end_time: Option<DateTime<Utc>>,
        risk: RiskConfig,
    ) -> Self {
        Self {
            symbol,
            interval,
            base_currency,
            quote_currency,
            quote_asset_of_account: "USDT".to_string(),
            base_quantity: Decimal::ZERO,
            quote_quantity: Decimal::ZERO,
            starting_trade_amount,
            current_trade_amount: starting_trade_amount,
            trade_allocation_pct,
            risk,
            highest_market_price: Decimal::ZERO,
            dynamic_trade_allocation: trade_allocation_pct,
            previous_market_price: Decimal::ZERO,
            total_profit_loss: Decimal::ZERO,
            total_trades: 0,
            successful_trades: 0,
            failed_trades: 0,
            total_buys: 0,
            total_sells: 0,
            total_holds: 0,
            phase: BotPhase::Starting,
            start_time: Utc::now(),
            end_time,
            log: Vec::new(),
        }
    }

    /// Percentage deviation of the current trade amount from the starting
    /// amount. Positive means profit.
    pub fn trade_amount_change_pct(&self) -> Decimal {
        if self.starting_trade_amount.is_zero() {
            return Decimal::ZERO;
        }
        (self.current_trade_amount - self.starting_trade_amount) / self.starting_trade_amount
            * Decimal::ONE_HUNDRED
    }

    /// Record a finished trade and bump the success counters.
    pub fn record_trade(&mut self, record: TradeRecord) {
        match record.action {
            TradeAction::Buy => self.total_buys += 1,
            TradeAction::Sell => self.total_sells += 1,
        }
        self.successful_trades += 1;
        self.total_trades += 1;
        self.log.push(record);
    }

    /// Bump the failure counters. Balances are never touched on failure.
    pub fn record_failed_trade(&mut self) {
        self.failed_trades += 1;
        self.total_trades += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn make_state(starting: Decimal, current: Decimal) -> BotState {
        let mut state = BotState::new(
            "BTCUSDT".to_string(),
            "1h".to_string(),
            "BTC".to_string(),
            "USDT".to_string(),
            starting,
            dec!(50),
            None,
            RiskConfig::default(),
        );
        state.current_trade_amount = current;
        state
    }

    #[test]
    fn change_pct_signs() {
        assert_eq!(make_state(dec!(100), dec!(95)).trade_amount_change_pct(), dec!(-5));
        assert_eq!(make_state(dec!(100), dec!(110)).trade_amount_change_pct(), dec!(10));
        assert_eq!(make_state(dec!(100), dec!(100)).trade_amount_change_pct(), dec!(0));
    }

    #[test]
    fn change_pct_zero_baseline() {
        assert_eq!(make_state(dec!(0), dec!(5)).trade_amount_change_pct(), dec!(0));
    }

    #[test]
    fn counters_track_actions() {
        let mut state = make_state(dec!(100), dec!(100));
        state.record_trade(TradeRecord {
            action: TradeAction::Buy,
            price: dec!(100),
            quantity: dec!(0.5),
            value: dec!(50),
            fee: dec!(0.05),
            net_value: dec!(50.05),
            timestamp: Utc::now(),
        });
        state.record_failed_trade();

        assert_eq!(state.total_buys, 1);
        assert_eq!(state.successful_trades, 1);
        assert_eq!(state.failed_trades, 1);
        assert_eq!(state.total_trades, 2);
        assert_eq!(state.log.len(), 1);
    }
}
