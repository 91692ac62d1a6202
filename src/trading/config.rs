//! Risk and service configuration.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/// Per-bot risk parameters. Embedded in each [`crate::models::BotState`] so a
/// snapshot fully describes the bot's behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskConfig {
    /// Loss percentage that forces a terminal exit (positive number)
    pub stop_loss_pct: Decimal,

    /// Profit percentage that forces a terminal exit
    pub take_profit_pct: Decimal,

    /// ATR below this skips the iteration (market too calm)
    pub atr_threshold_low: Decimal,

    /// ATR above this skips the iteration (market too volatile)
    pub atr_threshold_high: Decimal,

    /// Trailing-stop distance before ATR adjustment
    pub base_trailing_stop_pct: Decimal,

    /// EMA crossover buffer in percent; 0 trades on any crossover
    pub crossover_threshold_pct: Decimal,

    /// Floor for the dynamic trade allocation
    pub min_trade_allocation: Decimal,

    /// Fee rate used when the exchange fee lookup fails
    pub fallback_fee_rate: Decimal,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            stop_loss_pct: dec!(5),          // Exit at 5% loss
            take_profit_pct: dec!(10),       // Exit at 10% profit
            atr_threshold_low: dec!(10),
            atr_threshold_high: dec!(50),
            base_trailing_stop_pct: dec!(2),
            crossover_threshold_pct: dec!(0),
            min_trade_allocation: dec!(10),
            fallback_fee_rate: dec!(0.001),  // 0.1%
        }
    }
}

/// Process-wide settings shared by every bot worker.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Short EMA window for the crossover signal
    pub short_ema_window: usize,

    /// Long EMA window for the crossover signal
    pub long_ema_window: usize,

    /// ATR lookback window
    pub atr_window: usize,

    /// Closes fetched per iteration
    pub kline_limit: u32,

    /// WebSocket URL of the external log collector
    pub collector_url: String,

    /// Fixed delay between log-transport reconnect attempts
    pub reconnect_delay_secs: u64,

    /// How long `stop` waits for a worker before detaching it
    pub stop_join_timeout_secs: u64,

    /// Directory for the JSON snapshot written on manual stop
    pub snapshot_dir: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            short_ema_window: 5,
            long_ema_window: 20,
            atr_window: 14,
            kline_limit: 50,
            collector_url: "ws://localhost:8080".to_string(),
            reconnect_delay_secs: 5,
            stop_join_timeout_secs: 10,
            snapshot_dir: "snapshots".to_string(),
        }
    }
}
