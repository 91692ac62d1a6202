//! Small shared helpers: market-pair splitting, interval cadence, and
//! trade-window parsing.

use chrono::Duration as ChronoDuration;
use std::time::Duration;

/// Assets the pair splitter recognises.
const KNOWN_CURRENCIES: &[&str] = &[
    "BTC", "ETH", "XRP", "ADA", "SOL", "LTC", "BNB", "DOGE", "MATIC", "USDT",
];

/// Split a market pair like "BTCUSDT" into its base and quote assets.
/// Returns `None` when neither side is a recognised asset.
pub fn split_market_pair(symbol: &str) -> Option<(String, String)> {
    // Exchange symbols are ASCII; anything else cannot name a known asset
    // and would break byte indexing below.
    if !symbol.is_ascii() {
        return None;
    }
    for i in 3..=symbol.len() {
        let (base, quote) = symbol.split_at(i);
        if KNOWN_CURRENCIES.contains(&base) && KNOWN_CURRENCIES.contains(&quote) {
            return Some((base.to_string(), quote.to_string()));
        }
    }
    None
}

/// Loop cadence for a kline interval. Unknown intervals default to one hour.
pub fn interval_to_duration(interval: &str) -> Duration {
    let secs = match interval {
        "1m" => 60,
        "5m" => 300,
        "15m" => 900,
        "1h" => 3600,
        "4h" => 14400,
        "1d" => 86400,
        _ => 3600,
    };
    Duration::from_secs(secs)
}

/// Parse a trade window like "30m", "12h", or "7d". `"infinite"` (or an
/// empty string) means no window.
pub fn parse_trade_window(window: &str) -> Result<Option<ChronoDuration>, String> {
    let window = window.trim();
    if window.is_empty() || window.eq_ignore_ascii_case("infinite") {
        return Ok(None);
    }
    if !window.is_ascii() {
        return Err(format!("invalid trade window: {}", window));
    }

    let (value, unit) = window.split_at(window.len() - 1);
    let amount: i64 = value
        .parse()
        .map_err(|_| format!("invalid trade window: {}", window))?;
    if amount <= 0 {
        return Err(format!("trade window must be positive: {}", window));
    }

    match unit {
        "m" => Ok(Some(ChronoDuration::minutes(amount))),
        "h" => Ok(Some(ChronoDuration::hours(amount))),
        "d" => Ok(Some(ChronoDuration::days(amount))),
        _ => Err(format!("invalid trade window unit: {}", window)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_known_pairs() {
        assert_eq!(
            split_market_pair("BTCUSDT"),
            Some(("BTC".to_string(), "USDT".to_string()))
        );
        assert_eq!(
            split_market_pair("DOGEBTC"),
            Some(("DOGE".to_string(), "BTC".to_string()))
        );
        assert_eq!(split_market_pair("FOOBAR"), None);
    }

    #[test]
    fn non_ascii_input_is_rejected_not_panicked() {
        // Multibyte characters land off the byte boundaries both functions
        // index by; they must refuse the input instead.
        assert_eq!(split_market_pair("BTÇUSDT"), None);
        assert!(parse_trade_window("30µ").is_err());
        assert!(parse_trade_window("µ").is_err());
    }

    #[test]
    fn interval_cadence() {
        assert_eq!(interval_to_duration("1m"), Duration::from_secs(60));
        assert_eq!(interval_to_duration("1h"), Duration::from_secs(3600));
        assert_eq!(interval_to_duration("1d"), Duration::from_secs(86400));
        // Unknown intervals fall back to hourly.
        assert_eq!(interval_to_duration("3w"), Duration::from_secs(3600));
    }

    #[test]
    fn trade_window_parsing() {
        assert_eq!(parse_trade_window("infinite").unwrap(), None);
        assert_eq!(parse_trade_window("").unwrap(), None);
        assert_eq!(
            parse_trade_window("30m").unwrap(),
            Some(ChronoDuration::minutes(30))
        );
        assert_eq!(
            parse_trade_window("12h").unwrap(),
            Some(ChronoDuration::hours(12))
        );
        assert_eq!(
            parse_trade_window("7d").unwrap(),
            Some(ChronoDuration::days(7))
        );
        assert!(parse_trade_window("7x").is_err());
        assert!(parse_trade_window("-3h").is_err());
        assert!(parse_trade_window("h").is_err());
    }
}
