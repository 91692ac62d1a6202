//! The bot registry: the only state shared between the API front door and
//! the bot workers.
//!
//! Starting a bot validates the request, splits the starting funds, inserts
//! the registry entry, and spawns one worker task plus one logger task.
//! Workers own their state exclusively; the registry reads snapshots and
//! flips the stop flag. All map mutation is serialized under one lock.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use serde::Deserialize;
use thiserror::Error;
use tokio::sync::{Mutex, Notify, RwLock};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::api::{ExchangeError, ExchangeGateway};
use crate::logger::{EventLogger, LogTransport, WsTransport};
use crate::models::{BotPhase, BotState};
use crate::trading::{adjust_quantity, RiskConfig, ServiceConfig, TradingEngine};
use crate::util::{parse_trade_window, split_market_pair};

/// Registry-level failures, surfaced directly to the API caller.
#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("bot {bot_name} is already running")]
    Duplicate { bot_name: String },

    #[error("bot {bot_name} not found")]
    NotFound { bot_name: String },

    #[error("invalid request: {0}")]
    InvalidParams(String),

    #[error("exchange unavailable: {0}")]
    ExchangeUnavailable(#[from] ExchangeError),
}

/// Validated input to `start`.
#[derive(Debug, Clone, Deserialize)]
pub struct StartParams {
    pub symbol: String,

    #[serde(default = "default_interval")]
    pub interval: String,

    pub starting_trade_amount: Decimal,

    pub trade_allocation: Decimal,

    /// e.g. "30m", "12h", "7d", or "infinite"
    #[serde(default)]
    pub trade_window: Option<String>,
}

fn default_interval() -> String {
    "1h".to_string()
}

struct BotEntry {
    state: Arc<RwLock<BotState>>,
    stop_flag: Arc<AtomicBool>,
    wake: Arc<Notify>,
    logger: Arc<EventLogger>,
    handle: JoinHandle<()>,
}

/// A map slot. Names are reserved before the exchange round-trips of a
/// start request so the map lock is never held across them, while a
/// concurrent identical start still sees the name as taken.
enum BotSlot {
    Reserved,
    Active(BotEntry),
}

/// Builds one collector transport per bot.
pub type TransportFactory = Box<dyn Fn() -> Box<dyn LogTransport> + Send + Sync>;

pub struct BotRegistry {
    bots: Arc<Mutex<HashMap<String, BotSlot>>>,
    gateway: Arc<dyn ExchangeGateway>,
    config: ServiceConfig,
    risk: RiskConfig,
    transport_factory: TransportFactory,
}

impl BotRegistry {
    pub fn new(gateway: Arc<dyn ExchangeGateway>, config: ServiceConfig) -> Self {
        let url = config.collector_url.clone();
        let factory: TransportFactory = Box::new(move || Box::new(WsTransport::new(url.clone())));
        Self::with_transport_factory(gateway, config, factory)
    }

    pub fn with_transport_factory(
        gateway: Arc<dyn ExchangeGateway>,
        config: ServiceConfig,
        transport_factory: TransportFactory,
    ) -> Self {
        Self {
            bots: Arc::new(Mutex::new(HashMap::new())),
            gateway,
            config,
            risk: RiskConfig::default(),
            transport_factory,
        }
    }

    /// The uniqueness key for a bot. Deterministic over the start parameters
    /// so an identical request maps to the same name.
    pub fn derive_bot_name(params: &StartParams) -> String {
        format!(
            "bot-{}-{}-{}-{}",
            params.symbol.to_lowercase(),
            params.interval.to_lowercase(),
            params.starting_trade_amount.normalize(),
            params.trade_allocation.normalize(),
        )
    }

    /// Validate the request, query the exchange, split the starting funds
    /// half into base and half into quote, insert the entry, and spawn the
    /// worker. Rejects duplicates while a bot with the same key is alive.
    pub async fn start(&self, params: StartParams) -> Result<String, RegistryError> {
        if params.starting_trade_amount <= Decimal::ZERO {
            return Err(RegistryError::InvalidParams(
                "starting_trade_amount must be positive".to_string(),
            ));
        }
        if params.trade_allocation <= Decimal::ZERO
            || params.trade_allocation > Decimal::ONE_HUNDRED
        {
            return Err(RegistryError::InvalidParams(
                "trade_allocation must be in (0, 100]".to_string(),
            ));
        }
        let (base, quote) = split_market_pair(&params.symbol).ok_or_else(|| {
            RegistryError::InvalidParams(format!("unrecognised market pair: {}", params.symbol))
        })?;
        let window = params
            .trade_window
            .as_deref()
            .map(parse_trade_window)
            .transpose()
            .map_err(RegistryError::InvalidParams)?
            .flatten();

        let bot_name = Self::derive_bot_name(&params);

        // Reserve the name under the lock, then talk to the exchange with
        // the lock released so a slow start cannot stall stop/statuses.
        {
            let mut bots = self.bots.lock().await;
            if bots.contains_key(&bot_name) {
                return Err(RegistryError::Duplicate { bot_name });
            }
            bots.insert(bot_name.clone(), BotSlot::Reserved);
        }

        let state = match self.build_state(&params, base, quote, window).await {
            Ok(state) => state,
            Err(e) => {
                self.bots.lock().await.remove(&bot_name);
                return Err(e);
            }
        };

        let shared = Arc::new(RwLock::new(state));
        let stop_flag = Arc::new(AtomicBool::new(false));
        let wake = Arc::new(Notify::new());
        let logger = Arc::new(EventLogger::spawn(
            (self.transport_factory)(),
            std::time::Duration::from_secs(self.config.reconnect_delay_secs),
        ));

        let engine = TradingEngine::new(
            bot_name.clone(),
            shared.clone(),
            self.gateway.clone(),
            logger.clone(),
            self.config.clone(),
            stop_flag.clone(),
            wake.clone(),
        );

        // The worker cleans up its own entry on natural exit (window expiry
        // or a terminal risk event); a manual stop removes it first. The
        // identity check keeps a late-exiting detached worker from evicting
        // a newer bot reusing the same name.
        let bots_handle = self.bots.clone();
        let worker_name = bot_name.clone();
        let worker_logger = logger.clone();
        let worker_state = shared.clone();
        let handle = tokio::spawn(async move {
            engine.run().await;
            worker_logger.close().await;
            let mut bots = bots_handle.lock().await;
            if let Some(BotSlot::Active(entry)) = bots.get(&worker_name) {
                if Arc::ptr_eq(&entry.state, &worker_state) {
                    bots.remove(&worker_name);
                }
            }
        });

        self.bots.lock().await.insert(
            bot_name.clone(),
            BotSlot::Active(BotEntry {
                state: shared,
                stop_flag,
                wake,
                logger,
                handle,
            }),
        );
        info!(bot_name = %bot_name, "bot started");
        Ok(bot_name)
    }

    /// Query the exchange and build the initial state: half of the funds
    /// buys base at the current price on the lot grid; the other half stays
    /// in quote, converted when the pair's quote is not the account asset.
    async fn build_state(
        &self,
        params: &StartParams,
        base: String,
        quote: String,
        window: Option<chrono::Duration>,
    ) -> Result<BotState, RegistryError> {
        let price = self.gateway.get_price(&params.symbol).await?;
        if price <= Decimal::ZERO {
            return Err(RegistryError::ExchangeUnavailable(
                ExchangeError::InvalidData(format!("non-positive price {price}")),
            ));
        }
        let rules = self.gateway.get_symbol_rules(&params.symbol).await?;

        let mut state = BotState::new(
            params.symbol.clone(),
            params.interval.clone(),
            base,
            quote.clone(),
            params.starting_trade_amount,
            params.trade_allocation,
            window.map(|w| Utc::now() + w),
            self.risk.clone(),
        );

        let half = params.starting_trade_amount / Decimal::TWO;
        state.base_quantity = adjust_quantity(half / price, rules.min_qty, rules.step_size);
        state.quote_quantity = if quote == state.quote_asset_of_account {
            half
        } else {
            let quote_price = self
                .gateway
                .get_price(&format!("{}{}", quote, state.quote_asset_of_account))
                .await?;
            if quote_price <= Decimal::ZERO {
                return Err(RegistryError::ExchangeUnavailable(
                    ExchangeError::InvalidData(format!("non-positive price {quote_price}")),
                ));
            }
            half / quote_price
        };
        state.previous_market_price = price;
        Ok(state)
    }

    /// Request a stop and wait a bounded time for the worker to exit. A
    /// worker that outlives the timeout is detached, not killed; it will
    /// still terminate at its next iteration boundary.
    pub async fn stop(&self, bot_name: &str) -> Result<(), RegistryError> {
        let entry = {
            let mut bots = self.bots.lock().await;
            match bots.remove(bot_name) {
                Some(BotSlot::Active(entry)) => entry,
                // A reservation belongs to an in-flight start, not a
                // stoppable bot; leave it in place.
                Some(slot @ BotSlot::Reserved) => {
                    bots.insert(bot_name.to_string(), slot);
                    return Err(RegistryError::NotFound {
                        bot_name: bot_name.to_string(),
                    });
                }
                None => {
                    return Err(RegistryError::NotFound {
                        bot_name: bot_name.to_string(),
                    })
                }
            }
        };

        entry.state.write().await.phase = BotPhase::StoppingRequested;
        entry.stop_flag.store(true, Ordering::SeqCst);
        entry.wake.notify_one();

        let join_timeout = std::time::Duration::from_secs(self.config.stop_join_timeout_secs);
        if tokio::time::timeout(join_timeout, entry.handle).await.is_err() {
            warn!(bot_name, "worker did not exit within the stop timeout, detaching");
        }
        entry.logger.close().await;

        let snapshot = entry.state.read().await.clone();
        if let Err(e) = self.write_snapshot(bot_name, &snapshot).await {
            warn!(bot_name, error = %e, "failed to write stop snapshot");
        }
        info!(bot_name, "bot stopped");
        Ok(())
    }

    /// Read-only snapshot of every live bot.
    pub async fn statuses(&self) -> Vec<(String, BotState)> {
        let bots = self.bots.lock().await;
        let mut out = Vec::with_capacity(bots.len());
        for (name, slot) in bots.iter() {
            if let BotSlot::Active(entry) = slot {
                out.push((name.clone(), entry.state.read().await.clone()));
            }
        }
        out
    }

    /// JSON snapshot of the final state, written on manual stop for offline
    /// inspection only.
    async fn write_snapshot(&self, bot_name: &str, state: &BotState) -> anyhow::Result<()> {
        let dir = std::path::Path::new(&self.config.snapshot_dir);
        tokio::fs::create_dir_all(dir).await?;
        let path = dir.join(format!("{bot_name}.json"));
        let json = serde_json::to_string_pretty(state)?;
        tokio::fs::write(path, json).await?;
        Ok(())
    }
}
