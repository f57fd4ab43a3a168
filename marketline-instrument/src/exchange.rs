use derive_more::Display;
use serde::{Deserialize, Serialize};

/// Closed set of source venues the ingestion pipeline understands.
///
/// Each exchange/market-segment pair that has materially different session,
/// subscription or keep-alive behaviour is represented as its own variant
/// (eg/ `BinanceSpot` vs `BinanceDerivatives`), rather than folding the
/// segment into a separate enum that every venue adapter must re-derive.
#[derive(
    Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize, Display,
)]
#[serde(rename_all = "snake_case")]
pub enum ExchangeId {
    BinanceSpot,
    BinanceDerivatives,
    OkxSpot,
    OkxDerivatives,
    DeribitDerivatives,
}

impl ExchangeId {
    /// Return the `&str` representation used in bus subjects and store rows.
    pub fn as_str(&self) -> &'static str {
        match self {
            ExchangeId::BinanceSpot => "binance_spot",
            ExchangeId::BinanceDerivatives => "binance_derivatives",
            ExchangeId::OkxSpot => "okx_spot",
            ExchangeId::OkxDerivatives => "okx_derivatives",
            ExchangeId::DeribitDerivatives => "deribit_derivatives",
        }
    }

    /// The [`MarketType`] this venue always represents.
    ///
    /// Some venues (Binance, OKX) split spot and derivatives into distinct
    /// `ExchangeId`s, so the market type of those is fixed once the
    /// `ExchangeId` is known, except for derivatives venues that host both
    /// perpetual and options instruments (Deribit) where the caller must
    /// disambiguate via the inbound instrument name.
    pub fn default_market_type(&self) -> Option<super::MarketType> {
        match self {
            ExchangeId::BinanceSpot | ExchangeId::OkxSpot => Some(super::MarketType::Spot),
            ExchangeId::BinanceDerivatives | ExchangeId::OkxDerivatives => {
                Some(super::MarketType::Perpetual)
            }
            ExchangeId::DeribitDerivatives => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn as_str_matches_subject_naming() {
        assert_eq!(ExchangeId::BinanceSpot.as_str(), "binance_spot");
        assert_eq!(ExchangeId::DeribitDerivatives.as_str(), "deribit_derivatives");
    }

    #[test]
    fn serde_round_trip() {
        let json = serde_json::to_string(&ExchangeId::OkxDerivatives).unwrap();
        assert_eq!(json, "\"okx_derivatives\"");
        assert_eq!(
            serde_json::from_str::<ExchangeId>(&json).unwrap(),
            ExchangeId::OkxDerivatives
        );
    }
}
