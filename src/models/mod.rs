//! Data models for bot state, trade records, and log events.

mod bot;
mod event;

pub use bot::{BotPhase, BotState, TradeAction, TradeRecord};
pub use event::{EventStatus, LogEvent};
