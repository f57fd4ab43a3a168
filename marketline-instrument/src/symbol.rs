use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Canonical `BASE-QUOTE` market symbol (eg/ `BTC-USDT`).
///
/// Venue-native formats (`BTCUSDT`, `BTC-USDT-SWAP`, `BTC-PERPETUAL`) are
/// normalised into this form by the venue-specific adapters in
/// `marketline-data`; this type only guarantees the *shape* of an already
/// canonical symbol, it does not itself perform venue-specific parsing.
///
/// A handful of venues (Deribit options) hand back an instrument identifier
/// that itself contains hyphens (eg/ `BTC-25OCT24-60000-C`) and is carried
/// unchanged in `base` per spec §4.2. To keep the wire/serde form exactly
/// one top-level `-` separator (so `FromStr` stays unambiguous and every
/// symbol survives a publish/store round-trip), any hyphen already present
/// inside `base`/`quote` is escaped to `_` on the way out and restored on
/// the way back in; this only ever fires for those multi-hyphen instrument
/// names, ordinary `BASE-QUOTE` pairs have no internal hyphens to escape.
#[derive(Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize)]
#[serde(try_from = "String", into = "String")]
pub struct Symbol {
    base: String,
    quote: String,
}

#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum SymbolError {
    #[error("symbol '{0}' is not in canonical BASE-QUOTE form")]
    NotCanonical(String),
    #[error("symbol '{0}' has an empty base or quote component")]
    EmptyComponent(String),
}

fn escape_component(part: &str) -> String {
    part.replace('-', "_")
}

fn unescape_component(part: &str) -> String {
    part.replace('_', "-")
}

impl Symbol {
    /// Construct a canonical [`Symbol`] from already-split base/quote parts.
    ///
    /// Parts are upper-cased so `Symbol::new("btc", "usdt")` and
    /// `Symbol::new("BTC", "USDT")` compare equal.
    pub fn new(base: impl Into<String>, quote: impl Into<String>) -> Self {
        Self {
            base: base.into().to_ascii_uppercase(),
            quote: quote.into().to_ascii_uppercase(),
        }
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    pub fn quote(&self) -> &str {
        &self.quote
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", escape_component(&self.base), escape_component(&self.quote))
    }
}

impl FromStr for Symbol {
    type Err = SymbolError;

    /// Parse an already-canonical `BASE-QUOTE` string.
    ///
    /// This rejects symbols with more than one top-level hyphen (eg/ a
    /// `BTC-USDT-SWAP` that was not stripped of its venue suffix upstream)
    /// since by the time a `Symbol` is constructed it must already be
    /// canonical. Any `_` inside the two parts is unescaped back to `-`,
    /// the inverse of [`Symbol`]'s `Display`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split('-');
        let (Some(base), Some(quote), None) = (parts.next(), parts.next(), parts.next()) else {
            return Err(SymbolError::NotCanonical(s.to_string()));
        };

        if base.is_empty() || quote.is_empty() {
            return Err(SymbolError::EmptyComponent(s.to_string()));
        }

        Ok(Symbol::new(unescape_component(base), unescape_component(quote)))
    }
}

impl TryFrom<String> for Symbol {
    type Error = SymbolError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Symbol> for String {
    fn from(value: Symbol) -> Self {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_canonical_symbol() {
        let symbol: Symbol = "BTC-USDT".parse().unwrap();
        assert_eq!(symbol.base(), "BTC");
        assert_eq!(symbol.quote(), "USDT");
        assert_eq!(symbol.to_string(), "BTC-USDT");
    }

    #[test]
    fn normalises_case() {
        assert_eq!(Symbol::new("btc", "usdt"), Symbol::new("BTC", "USDT"));
    }

    #[test]
    fn rejects_non_canonical() {
        assert!("BTCUSDT".parse::<Symbol>().is_err());
        assert!("BTC-USDT-SWAP".parse::<Symbol>().is_err());
        assert!("-USDT".parse::<Symbol>().is_err());
    }

    #[test]
    fn serde_round_trip_is_idempotent() {
        let symbol = Symbol::new("ETH", "USDC");
        let json = serde_json::to_string(&symbol).unwrap();
        let back: Symbol = serde_json::from_str(&json).unwrap();
        assert_eq!(symbol, back);
    }

    /// Deribit options instruments (eg/ `BTC-25OCT24-60000-C`) are carried
    /// unchanged in `base` (spec §4.2) and must still survive a
    /// publish/store round-trip through `Display`/`FromStr`/serde.
    #[test]
    fn options_instrument_with_internal_hyphens_round_trips() {
        let symbol = Symbol::new("BTC-25OCT24-60000-C", "OPT");
        let wire = symbol.to_string();
        assert_eq!(wire, "BTC_25OCT24_60000_C-OPT");

        let parsed: Symbol = wire.parse().unwrap();
        assert_eq!(parsed, symbol);
        assert_eq!(parsed.base(), "BTC-25OCT24-60000-C");

        let json = serde_json::to_string(&symbol).unwrap();
        let back: Symbol = serde_json::from_str(&json).unwrap();
        assert_eq!(back, symbol);
    }
}
