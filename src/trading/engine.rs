//! The per-bot decision loop.
//!
//! One engine per bot, driving one iteration per interval tick: window check,
//! market fetch, EMA crossover signal, fixed loss limiter, ATR volatility
//! filter, advisory dynamic sizing, trailing stop, trade execution, and
//! mark-to-market reporting. Any step may short-circuit the iteration; the
//! loss limiter, trailing stop, and window expiry are terminal.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tokio::sync::{Notify, RwLock};
use tracing::{debug, info, warn};

use crate::api::ExchangeGateway;
use crate::logger::EventLogger;
use crate::models::{BotPhase, BotState, EventStatus, LogEvent, TradeAction};
use crate::util::interval_to_duration;

use super::config::ServiceConfig;
use super::executor::{TradeError, TradeExecutor};
use super::indicators::{atr, ema};
use super::risk::{
    crossover_signal, dynamic_trade_allocation, loss_limit_exit, trailing_stop_triggered,
    volatility_filter, RiskExit, Signal, VolatilityVerdict,
};

enum Iteration {
    Continue,
    Terminate,
}

/// Drives one bot until a stop request, window expiry, or a terminal risk
/// exit. Owns the bot's state exclusively while running; everyone else reads
/// snapshots through the shared lock.
pub struct TradingEngine {
    bot_id: String,
    state: Arc<RwLock<BotState>>,
    executor: TradeExecutor,
    gateway: Arc<dyn ExchangeGateway>,
    logger: Arc<EventLogger>,
    config: ServiceConfig,
    stop_flag: Arc<AtomicBool>,
    wake: Arc<Notify>,
}

impl TradingEngine {
    pub fn new(
        bot_id: String,
        state: Arc<RwLock<BotState>>,
        gateway: Arc<dyn ExchangeGateway>,
        logger: Arc<EventLogger>,
        config: ServiceConfig,
        stop_flag: Arc<AtomicBool>,
        wake: Arc<Notify>,
    ) -> Self {
        Self {
            bot_id,
            state,
            executor: TradeExecutor::new(gateway.clone()),
            gateway,
            logger,
            config,
            stop_flag,
            wake,
        }
    }

    /// Run the decision loop to completion. Returns once the bot reaches
    /// `Stopped` for any reason.
    pub async fn run(self) {
        let cadence = {
            let mut state = self.state.write().await;
            state.phase = BotPhase::Running;
            interval_to_duration(&state.interval)
        };
        info!(bot_id = %self.bot_id, "bot running");
        self.emit(EventStatus::Notify, "bot started", None).await;

        loop {
            if self.stop_flag.load(Ordering::SeqCst) {
                self.emit(EventStatus::Notify, "stop requested, shutting down", None)
                    .await;
                break;
            }

            match self.iteration().await {
                Iteration::Terminate => break,
                Iteration::Continue => {}
            }

            // Sleep until the next tick, or earlier if a stop request wakes
            // us.
            tokio::select! {
                _ = tokio::time::sleep(cadence) => {}
                _ = self.wake.notified() => {}
            }
        }

        self.state.write().await.phase = BotPhase::Stopped;
        info!(bot_id = %self.bot_id, "bot stopped");
    }

    async fn iteration(&self) -> Iteration {
        let mut state = self.state.read().await.clone();

        // 1. Trade window.
        if let Some(end) = state.end_time {
            if Utc::now() >= end {
                self.emit(EventStatus::Notify, "trade window ended", None).await;
                return Iteration::Terminate;
            }
        }

        // 2. Market history.
        let klines = match self
            .gateway
            .get_klines(&state.symbol, &state.interval, self.config.kline_limit)
            .await
        {
            Ok(klines) => klines,
            Err(e) => {
                warn!(bot_id = %self.bot_id, error = %e, "market data fetch failed");
                self.emit(
                    EventStatus::Error,
                    format!("market data fetch failed: {e}"),
                    None,
                )
                .await;
                return Iteration::Continue;
            }
        };
        let closes: Vec<Decimal> = klines.iter().map(|k| k.close).collect();
        let latest_close = match closes.last() {
            Some(close) => *close,
            None => {
                self.emit(EventStatus::Warn, "empty kline window", None).await;
                return Iteration::Continue;
            }
        };

        // 3. Crossover inputs.
        let short_ema = ema(&closes, self.config.short_ema_window);
        let long_ema = ema(&closes, self.config.long_ema_window);

        // 4. Fixed stop-loss / take-profit on the trade-amount deviation.
        if let Some(exit) = loss_limit_exit(&state) {
            let reason = match exit {
                RiskExit::StopLoss => "stop-loss",
                RiskExit::TakeProfit => "take-profit",
            };
            let change = state.trade_amount_change_pct().round_dp(4);
            self.emit(
                EventStatus::Warn,
                format!("{reason} triggered at {change}% change, exiting"),
                None,
            )
            .await;
            self.forced_sell(&mut state, reason).await;
            self.store(state).await;
            return Iteration::Terminate;
        }

        let (short_ema, long_ema) = match (short_ema, long_ema) {
            (Some(s), Some(l)) => (s, l),
            _ => {
                self.emit(EventStatus::Warn, "insufficient history for signal", None)
                    .await;
                return Iteration::Continue;
            }
        };

        // 5. Volatility filter.
        let atr_value = match atr(&klines, self.config.atr_window) {
            Some(value) => value,
            None => {
                self.emit(EventStatus::Warn, "insufficient history for ATR", None)
                    .await;
                return Iteration::Continue;
            }
        };
        match volatility_filter(atr_value, &state.risk) {
            VolatilityVerdict::Tradable => {}
            verdict => {
                let regime = match verdict {
                    VolatilityVerdict::TooCalm => "too calm",
                    _ => "too volatile",
                };
                debug!(bot_id = %self.bot_id, atr = %atr_value, regime, "skipping iteration");
                self.emit(
                    EventStatus::Log,
                    format!("market {regime} (ATR {atr_value}), skipping iteration"),
                    None,
                )
                .await;
                return Iteration::Continue;
            }
        }

        // 6. Advisory dynamic sizing. Logged and tracked; execution sizes
        // from the configured static allocation.
        state.dynamic_trade_allocation =
            dynamic_trade_allocation(&state, short_ema, long_ema, atr_value);

        // 7. Trailing stop.
        if trailing_stop_triggered(&mut state, latest_close, atr_value) {
            self.emit(
                EventStatus::Warn,
                format!(
                    "trailing stop triggered below high {}, exiting",
                    state.highest_market_price
                ),
                None,
            )
            .await;
            self.forced_sell(&mut state, "trailing-stop").await;
            self.store(state).await;
            return Iteration::Terminate;
        }

        if self.stop_flag.load(Ordering::SeqCst) {
            self.store(state).await;
            return Iteration::Continue;
        }

        // 8-9. Crossover decision and execution.
        match crossover_signal(&state, short_ema, long_ema) {
            Signal::Buy => {
                self.execute(&mut state, TradeAction::Buy).await;
            }
            Signal::Sell => {
                self.execute(&mut state, TradeAction::Sell).await;
            }
            Signal::Hold(reason) => {
                state.total_holds += 1;
                self.emit(
                    EventStatus::Log,
                    format!("holding: {}", reason.as_str()),
                    None,
                )
                .await;
            }
        }

        // 10. Mark-to-market and status report. Holdings are valued in the
        // pair's quote currency, then revalued into the account asset when
        // the two differ. A failed conversion ticker keeps the previous
        // figure rather than failing the iteration.
        state.previous_market_price = latest_close;
        let holdings = state.base_quantity * latest_close + state.quote_quantity;
        if state.quote_currency == state.quote_asset_of_account {
            state.total_profit_loss = holdings - state.starting_trade_amount;
        } else {
            let conversion_pair =
                format!("{}{}", state.quote_currency, state.quote_asset_of_account);
            match self.gateway.get_price(&conversion_pair).await {
                Ok(quote_price) => {
                    state.total_profit_loss =
                        holdings * quote_price - state.starting_trade_amount;
                }
                Err(e) => {
                    warn!(bot_id = %self.bot_id, error = %e, "quote revaluation failed");
                }
            }
        }

        let snapshot = serde_json::to_value(&state).unwrap_or(serde_json::Value::Null);
        self.emit(EventStatus::Log, "iteration complete", Some(snapshot)).await;
        self.store(state).await;
        Iteration::Continue
    }

    /// Execute a sized trade from the static allocation and report the
    /// outcome. Failures never abort the iteration.
    async fn execute(&self, state: &mut BotState, action: TradeAction) {
        let allocation = state.trade_allocation_pct;
        match self.executor.execute(state, action, allocation).await {
            Ok(record) => {
                info!(
                    bot_id = %self.bot_id,
                    action = action.as_str(),
                    price = %record.price,
                    quantity = %record.quantity,
                    "trade executed"
                );
                let data = serde_json::to_value(&record).unwrap_or(serde_json::Value::Null);
                self.emit(
                    EventStatus::Success,
                    format!("{} executed", action.as_str()),
                    Some(data),
                )
                .await;
            }
            Err(TradeError::Validation(reason)) => {
                self.emit(
                    EventStatus::Error,
                    format!("{} rejected: {reason}", action.as_str()),
                    None,
                )
                .await;
            }
            Err(TradeError::Exchange(e)) => {
                warn!(bot_id = %self.bot_id, error = %e, "order submission failed");
                self.emit(
                    EventStatus::Error,
                    format!("{} failed: {e}", action.as_str()),
                    None,
                )
                .await;
            }
        }
    }

    /// Liquidate into quote on a terminal risk exit. Sized over the whole
    /// remaining trade amount; a failed exit is logged and the bot still
    /// terminates.
    async fn forced_sell(&self, state: &mut BotState, reason: &str) {
        if state.base_quantity <= Decimal::ZERO {
            return;
        }
        match self
            .executor
            .execute(state, TradeAction::Sell, dec!(100))
            .await
        {
            Ok(record) => {
                let data = serde_json::to_value(&record).unwrap_or(serde_json::Value::Null);
                self.emit(
                    EventStatus::Success,
                    format!("{reason} exit sell executed"),
                    Some(data),
                )
                .await;
            }
            Err(e) => {
                warn!(bot_id = %self.bot_id, error = %e, reason, "exit sell failed");
                self.emit(EventStatus::Error, format!("{reason} exit sell failed: {e}"), None)
                    .await;
            }
        }
    }

    async fn store(&self, state: BotState) {
        *self.state.write().await = state;
    }

    async fn emit(
        &self,
        status: EventStatus,
        message: impl Into<String>,
        data: Option<serde_json::Value>,
    ) {
        let mut event = LogEvent::new(&self.bot_id, status, message);
        if let Some(data) = data {
            event = event.with_data(data);
        }
        self.logger.log(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::mock::{klines_from_closes, MockExchange};
    use crate::logger::testing::NullTransport;
    use crate::trading::RiskConfig;
    use std::time::Duration;

    fn flat_window(close: Decimal) -> Vec<crate::api::Kline> {
        klines_from_closes(&vec![close; 30], dec!(10))
    }

    fn make_state(base: Decimal, quote: Decimal) -> BotState {
        let mut state = BotState::new(
            "BTCUSDT".to_string(),
            "1h".to_string(),
            "BTC".to_string(),
            "USDT".to_string(),
            dec!(100),
            dec!(50),
            None,
            RiskConfig::default(),
        );
        state.base_quantity = base;
        state.quote_quantity = quote;
        state
    }

    fn make_engine(
        gateway: Arc<MockExchange>,
        state: BotState,
    ) -> (TradingEngine, Arc<RwLock<BotState>>, Arc<AtomicBool>, Arc<Notify>) {
        let shared = Arc::new(RwLock::new(state));
        let stop_flag = Arc::new(AtomicBool::new(false));
        let wake = Arc::new(Notify::new());
        let logger = Arc::new(EventLogger::spawn(
            Box::new(NullTransport),
            Duration::from_secs(1),
        ));
        let engine = TradingEngine::new(
            "bot-btcusdt-1h-100-50".to_string(),
            shared.clone(),
            gateway,
            logger,
            ServiceConfig::default(),
            stop_flag.clone(),
            wake.clone(),
        );
        (engine, shared, stop_flag, wake)
    }

    #[tokio::test(start_paused = true)]
    async fn buy_on_crossover_then_stop_loss_exit() {
        let gateway = Arc::new(MockExchange::new(dec!(100)));

        // Ticks 0..9: flat market, both EMAs equal, the bot holds.
        for _ in 0..10 {
            gateway.push_series(flat_window(dec!(100)));
        }
        // Tick 10: the short EMA crosses above the long EMA.
        let mut rising: Vec<Decimal> = vec![dec!(100); 25];
        rising.extend([dec!(102), dec!(104), dec!(106), dec!(108), dec!(110)]);
        gateway.push_series(klines_from_closes(&rising, dec!(10)));
        // Tick 11: price 6% below the post-buy mark.
        gateway.push_series(flat_window(dec!(103.4)));

        let (engine, shared, _, _) = make_engine(gateway.clone(), make_state(dec!(0.5), dec!(50)));
        engine.run().await;

        let orders = gateway.orders();
        assert_eq!(orders.len(), 2, "expected one buy and one exit sell");

        // The crossover buy: 50% of the 50 USDT quote side at price 110.
        let (_, buy_side, buy_qty) = orders[0].clone();
        assert_eq!(buy_side, crate::api::OrderSide::Buy);
        assert_eq!(buy_qty, dec!(0.227));
        assert!(buy_qty * dec!(110) >= dec!(10), "buy meets minimum notional");

        // The stop-loss liquidation terminates the loop; no further ticks ran
        // against the scripted feed.
        let (_, exit_side, _) = orders[1].clone();
        assert_eq!(exit_side, crate::api::OrderSide::Sell);

        let state = shared.read().await.clone();
        assert_eq!(state.phase, BotPhase::Stopped);
        assert_eq!(state.total_buys, 1);
        assert_eq!(state.total_sells, 1);
        assert_eq!(state.total_holds, 10);
    }

    #[tokio::test(start_paused = true)]
    async fn pnl_revalues_non_usdt_quote_into_account_asset() {
        let gateway = Arc::new(MockExchange::new(dec!(0.05)));
        // The mock serves one price for every symbol, so the BTCUSDT
        // conversion ticker reads the same 0.05 as the ETHBTC close.
        gateway.push_series(klines_from_closes(&vec![dec!(0.05); 30], dec!(12.5)));

        let mut state = BotState::new(
            "ETHBTC".to_string(),
            "1h".to_string(),
            "ETH".to_string(),
            "BTC".to_string(),
            dec!(100),
            dec!(50),
            None,
            RiskConfig::default(),
        );
        state.base_quantity = dec!(10);
        state.quote_quantity = dec!(0.5);

        let (engine, shared, stop_flag, wake) = make_engine(gateway, state);
        let handle = tokio::spawn(engine.run());
        tokio::time::sleep(Duration::from_secs(1)).await;
        stop_flag.store(true, Ordering::SeqCst);
        wake.notify_one();
        handle.await.unwrap();

        // Holdings: 10 ETH * 0.05 + 0.5 = 1 BTC, revalued at the BTCUSDT
        // ticker (the window's last close, 0.05): both legs land in USDT
        // before the baseline is subtracted.
        let state = shared.read().await.clone();
        assert_eq!(
            state.total_profit_loss,
            dec!(1) * dec!(0.05) - dec!(100)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn expired_window_terminates_without_trading() {
        let gateway = Arc::new(MockExchange::new(dec!(100)));
        gateway.push_series(flat_window(dec!(100)));

        let mut state = make_state(dec!(0.5), dec!(50));
        state.end_time = Some(Utc::now() - chrono::Duration::minutes(1));

        let (engine, shared, _, _) = make_engine(gateway.clone(), state);
        engine.run().await;

        assert!(gateway.orders().is_empty());
        assert_eq!(shared.read().await.phase, BotPhase::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_flag_interrupts_the_sleep()  {
        let gateway = Arc::new(MockExchange::new(dec!(100)));
        gateway.push_series(flat_window(dec!(100)));

        let (engine, shared, stop_flag, wake) =
            make_engine(gateway.clone(), make_state(dec!(0.5), dec!(50)));
        let handle = tokio::spawn(engine.run());

        // Let the first iteration land in its sleep, then request a stop.
        tokio::time::sleep(Duration::from_secs(1)).await;
        stop_flag.store(true, Ordering::SeqCst);
        wake.notify_one();

        handle.await.unwrap();
        assert_eq!(shared.read().await.phase, BotPhase::Stopped);
        assert!(gateway.orders().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn exchange_outage_degrades_to_a_hold() {
        let gateway = Arc::new(MockExchange::new(dec!(100)));
        gateway.fail_market_data.store(true, Ordering::SeqCst);

        let (engine, shared, stop_flag, wake) =
            make_engine(gateway.clone(), make_state(dec!(0.5), dec!(50)));
        let handle = tokio::spawn(engine.run());

        // A couple of failed iterations, then stop.
        tokio::time::sleep(Duration::from_secs(7200)).await;
        stop_flag.store(true, Ordering::SeqCst);
        wake.notify_one();

        handle.await.unwrap();
        assert!(gateway.orders().is_empty());
        assert_eq!(shared.read().await.phase, BotPhase::Stopped);
    }
}
