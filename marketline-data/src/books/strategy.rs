//! Depth strategies (spec §4.3.1): named configuration tuples fixing
//! `snapshot_depth`, `publish_depth` and `update_frequency` for an
//! order-book stream, selected per (exchange, market_type, symbol) and
//! switchable at runtime.

use marketline_instrument::ExchangeId;
use std::time::Duration;

#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DepthStrategyName {
    Arbitrage,
    MarketMaking,
    TrendAnalysis,
    DepthAnalysis,
}

/// Resolved strategy parameters for one order-book stream.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct DepthStrategy {
    pub name: DepthStrategyName,
    pub snapshot_depth: usize,
    pub publish_depth: usize,
    pub update_frequency: Duration,
}

impl DepthStrategyName {
    /// Predefined strategy, clamped to the venue's declared maximum depth.
    pub fn resolve(self, exchange_id: ExchangeId) -> DepthStrategy {
        let (snapshot_depth, publish_depth, update_frequency) = match self {
            DepthStrategyName::Arbitrage => (5, 5, Duration::from_millis(0)),
            DepthStrategyName::MarketMaking => (20, 20, Duration::from_millis(0)),
            DepthStrategyName::TrendAnalysis => (100, usize::MAX, Duration::from_millis(0)),
            DepthStrategyName::DepthAnalysis => (400, usize::MAX, Duration::from_millis(0)),
        };
        let max = venue_max_depth(exchange_id);
        DepthStrategy {
            name: self,
            snapshot_depth: snapshot_depth.min(max),
            publish_depth: publish_depth.min(max),
            update_frequency,
        }
    }
}

/// Venue-declared maximum order-book depth a WebSocket/REST snapshot
/// endpoint will serve. Not universally documented upstream (spec §9 Open
/// Questions), so this is the per-venue cap adapters enforce.
fn venue_max_depth(exchange_id: ExchangeId) -> usize {
    match exchange_id {
        ExchangeId::BinanceSpot => 5000,
        ExchangeId::BinanceDerivatives => 1000,
        ExchangeId::OkxSpot | ExchangeId::OkxDerivatives => 400,
        ExchangeId::DeribitDerivatives => 1000,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn depth_analysis_is_clamped_to_okx_max() {
        let strategy = DepthStrategyName::DepthAnalysis.resolve(ExchangeId::OkxDerivatives);
        assert_eq!(strategy.snapshot_depth, 400);
    }

    #[test]
    fn arbitrage_uses_5_5() {
        let strategy = DepthStrategyName::Arbitrage.resolve(ExchangeId::BinanceSpot);
        assert_eq!(strategy.snapshot_depth, 5);
        assert_eq!(strategy.publish_depth, 5);
    }
}
