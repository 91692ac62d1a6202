//! Trading logic: risk configuration, indicators, risk rules, trade
//! execution, and the per-bot decision loop.

mod config;
mod engine;
mod executor;
mod indicators;
mod risk;

pub use config::{RiskConfig, ServiceConfig};
pub use engine::TradingEngine;
pub use executor::{adjust_quantity, TradeError, TradeExecutor};
pub use risk::{HoldReason, RiskExit, Signal, VolatilityVerdict};
