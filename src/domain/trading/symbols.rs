//! Symbol normalization between display form (`BASE/QUOTE`) and the
//! exchange's concatenated form with the `BTC` ↔ `XBT` substitution.
//! The mapping is bijective for supported pairs.

/// Quote assets recognized when splitting an exchange symbol. Longest
/// first so `USDT` wins over `USD`.
const QUOTE_ASSETS: [&str; 5] = ["USDT", "USDC", "USD", "EUR", "GBP"];

/// `"BTC/USD"` → `"XBTUSD"`. Returns `None` for malformed input.
pub fn to_exchange_symbol(display: &str) -> Option<String> {
    let (base, quote) = display.split_once('/')?;
    if base.is_empty() || quote.is_empty() {
        return None;
    }
    let base = if base == "BTC" { "XBT" } else { base };
    Some(format!("{}{}", base, quote))
}

/// `"XBTUSD"` → `"BTC/USD"`. Returns `None` when no known quote asset
/// terminates the symbol.
pub fn to_display_symbol(exchange: &str) -> Option<String> {
    for quote in QUOTE_ASSETS {
        if let Some(base) = exchange.strip_suffix(quote) {
            if base.is_empty() {
                continue;
            }
            let base = if base == "XBT" { "BTC" } else { base };
            return Some(format!("{}/{}", base, quote));
        }
    }
    None
}

/// Streaming sessions use slash-separated pairs with the same base
/// substitution: `"BTC/USD"` → `"XBT/USD"`.
pub fn to_stream_pair(display: &str) -> Option<String> {
    let (base, quote) = display.split_once('/')?;
    if base.is_empty() || quote.is_empty() {
        return None;
    }
    let base = if base == "BTC" { "XBT" } else { base };
    Some(format!("{}/{}", base, quote))
}

/// `"XBT/USD"` → `"BTC/USD"`.
pub fn from_stream_pair(pair: &str) -> Option<String> {
    let (base, quote) = pair.split_once('/')?;
    if base.is_empty() || quote.is_empty() {
        return None;
    }
    let base = if base == "XBT" { "BTC" } else { base };
    Some(format!("{}/{}", base, quote))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_pair_round_trip() {
        assert_eq!(to_stream_pair("BTC/USD").unwrap(), "XBT/USD");
        assert_eq!(from_stream_pair("XBT/USD").unwrap(), "BTC/USD");
        assert_eq!(to_stream_pair("ETH/USD").unwrap(), "ETH/USD");
        assert_eq!(from_stream_pair("ETH/USD").unwrap(), "ETH/USD");
    }

    #[test]
    fn test_btc_substitution() {
        assert_eq!(to_exchange_symbol("BTC/USD").unwrap(), "XBTUSD");
        assert_eq!(to_display_symbol("XBTUSD").unwrap(), "BTC/USD");
    }

    #[test]
    fn test_plain_pairs() {
        assert_eq!(to_exchange_symbol("ETH/USD").unwrap(), "ETHUSD");
        assert_eq!(to_display_symbol("ETHUSD").unwrap(), "ETH/USD");
        assert_eq!(to_display_symbol("SOLEUR").unwrap(), "SOL/EUR");
    }

    #[test]
    fn test_usdt_wins_over_usd() {
        assert_eq!(to_display_symbol("ETHUSDT").unwrap(), "ETH/USDT");
        assert_eq!(to_exchange_symbol("ETH/USDT").unwrap(), "ETHUSDT");
    }

    #[test]
    fn test_round_trip_is_bijective() {
        for display in ["BTC/USD", "ETH/USDT", "SOL/USD", "DOGE/EUR", "LINK/GBP"] {
            let exchange = to_exchange_symbol(display).unwrap();
            assert_eq!(to_display_symbol(&exchange).unwrap(), display);
        }
    }

    #[test]
    fn test_malformed_input() {
        assert!(to_exchange_symbol("BTCUSD").is_none());
        assert!(to_exchange_symbol("/USD").is_none());
        assert!(to_exchange_symbol("BTC/").is_none());
        assert!(to_display_symbol("USD").is_none());
        assert!(to_display_symbol("XYZ").is_none());
    }
}
