//! Risk rules: fixed stop-loss / take-profit, the ATR volatility filter,
//! dynamic trade allocation, the trailing stop, and the crossover signal.
//!
//! All rules are pure over [`BotState`] so each is independently testable;
//! the engine sequences them.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::models::BotState;

use super::config::RiskConfig;

/// Terminal exit demanded by the fixed loss limiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RiskExit {
    StopLoss,
    TakeProfit,
}

/// Evaluate the fixed stop-loss / take-profit on the trade-amount deviation.
/// The boundary is inclusive: a change of exactly -stop_loss_pct exits.
pub fn loss_limit_exit(state: &BotState) -> Option<RiskExit> {
    let change = state.trade_amount_change_pct();
    if change <= -state.risk.stop_loss_pct {
        Some(RiskExit::StopLoss)
    } else if change >= state.risk.take_profit_pct {
        Some(RiskExit::TakeProfit)
    } else {
        None
    }
}

/// Whether the current ATR permits trading at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VolatilityVerdict {
    Tradable,
    TooCalm,
    TooVolatile,
}

pub fn volatility_filter(atr: Decimal, risk: &RiskConfig) -> VolatilityVerdict {
    if atr > risk.atr_threshold_high {
        VolatilityVerdict::TooVolatile
    } else if atr < risk.atr_threshold_low {
        VolatilityVerdict::TooCalm
    } else {
        VolatilityVerdict::Tradable
    }
}

/// Advisory position sizing: scale the configured allocation by trend
/// strength and the ATR band, then clamp.
pub fn dynamic_trade_allocation(
    state: &BotState,
    short_ema: Decimal,
    long_ema: Decimal,
    atr: Decimal,
) -> Decimal {
    let mut allocation = state.trade_allocation_pct;

    let trend_strength = if long_ema.is_zero() {
        Decimal::ONE
    } else {
        short_ema / long_ema
    };

    if trend_strength > dec!(1.1) {
        allocation *= dec!(1.5);
    } else if trend_strength < dec!(0.9) {
        allocation *= dec!(0.5);
    }

    if atr > state.risk.atr_threshold_high {
        allocation *= dec!(0.7);
    } else if atr < state.risk.atr_threshold_low {
        allocation *= dec!(1.2);
    }

    allocation
        .min(state.current_trade_amount)
        .max(state.risk.min_trade_allocation)
}

/// Trailing-stop distance, widened in volatile regimes and tightened in calm
/// ones.
pub fn effective_trailing_pct(risk: &RiskConfig, atr: Decimal) -> Decimal {
    if atr > risk.atr_threshold_high {
        risk.base_trailing_stop_pct * dec!(1.5)
    } else if atr < risk.atr_threshold_low {
        risk.base_trailing_stop_pct * dec!(0.75)
    } else {
        risk.base_trailing_stop_pct
    }
}

/// Ratchet the observed high and test the trailing stop. The stored high
/// never decreases for the lifetime of the bot.
pub fn trailing_stop_triggered(state: &mut BotState, latest_close: Decimal, atr: Decimal) -> bool {
    state.highest_market_price = state.highest_market_price.max(latest_close);

    let trailing_pct = effective_trailing_pct(&state.risk, atr);
    let trailing_price =
        state.highest_market_price * (Decimal::ONE - trailing_pct / Decimal::ONE_HUNDRED);

    latest_close < trailing_price
}

/// Why an iteration held instead of trading. Diagnostic only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HoldReason {
    InsufficientBase,
    InsufficientQuote,
    NoCrossover,
}

impl HoldReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            HoldReason::InsufficientBase => "insufficient base to sell",
            HoldReason::InsufficientQuote => "insufficient quote to buy",
            HoldReason::NoCrossover => "no crossover",
        }
    }
}

/// Outcome of the EMA crossover decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Buy,
    Sell,
    Hold(HoldReason),
}

/// The threshold-buffered EMA crossover decision.
pub fn crossover_signal(state: &BotState, short_ema: Decimal, long_ema: Decimal) -> Signal {
    let threshold = state.risk.crossover_threshold_pct / Decimal::ONE_HUNDRED;
    let has_base = state.base_quantity > Decimal::ZERO;
    let has_quote = state.quote_quantity > Decimal::ZERO;

    if has_base && short_ema > long_ema * (Decimal::ONE + threshold) && has_quote {
        Signal::Buy
    } else if has_base && short_ema < long_ema * (Decimal::ONE - threshold) {
        Signal::Sell
    } else if !has_base && short_ema < long_ema {
        Signal::Hold(HoldReason::InsufficientBase)
    } else if !has_quote && short_ema > long_ema {
        Signal::Hold(HoldReason::InsufficientQuote)
    } else {
        Signal::Hold(HoldReason::NoCrossover)
    }
}
