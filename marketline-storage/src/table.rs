//! Table map and per-table batching contract (spec §4.7): which
//! destination table a record lands in, and the `batch_size`/`batch_timeout`
//! that decides when a batch for that table is flushed.

use marketline_data::model::CanonicalRecord;
use std::time::Duration;

/// Destination tables, one per data-type family. `Orderbook` covers both
/// `OrderbookSnapshot` and `OrderbookUpdate` canonical records - they share
/// one physical table, keyed differently at write time (see
/// [`crate::dedup`]).
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum Table {
    Trades,
    Orderbooks,
    FundingRates,
    OpenInterests,
    Liquidations,
    LsrTopPositions,
    LsrAllAccounts,
    VolatilityIndices,
}

impl Table {
    pub fn name(&self) -> &'static str {
        match self {
            Table::Trades => "trades",
            Table::Orderbooks => "orderbooks",
            Table::FundingRates => "funding_rates",
            Table::OpenInterests => "open_interests",
            Table::Liquidations => "liquidations",
            Table::LsrTopPositions => "lsr_top_positions",
            Table::LsrAllAccounts => "lsr_all_accounts",
            Table::VolatilityIndices => "volatility_indices",
        }
    }

    pub const ALL: [Table; 8] = [
        Table::Trades,
        Table::Orderbooks,
        Table::FundingRates,
        Table::OpenInterests,
        Table::Liquidations,
        Table::LsrTopPositions,
        Table::LsrAllAccounts,
        Table::VolatilityIndices,
    ];

    /// The bus subject-filter this table's pull consumer subscribes to.
    pub fn subject_filter(&self) -> &'static str {
        match self {
            Table::Trades => "trade.>",
            Table::Orderbooks => "orderbook.>",
            Table::FundingRates => "funding_rate.>",
            Table::OpenInterests => "open_interest.>",
            Table::Liquidations => "liquidation.>",
            Table::LsrTopPositions => "lsr_top_position.>",
            Table::LsrAllAccounts => "lsr_all_account.>",
            Table::VolatilityIndices => "volatility_index.>",
        }
    }
}

pub fn table_for(record: &CanonicalRecord) -> Table {
    match record {
        CanonicalRecord::Trade(_) => Table::Trades,
        CanonicalRecord::OrderbookSnapshot(_) | CanonicalRecord::OrderbookUpdate(_) => Table::Orderbooks,
        CanonicalRecord::FundingRate(_) => Table::FundingRates,
        CanonicalRecord::OpenInterest(_) => Table::OpenInterests,
        CanonicalRecord::Liquidation(_) => Table::Liquidations,
        CanonicalRecord::LsrTopPosition(_) => Table::LsrTopPositions,
        CanonicalRecord::LsrAllAccount(_) => Table::LsrAllAccounts,
        CanonicalRecord::VolatilityIndex(_) => Table::VolatilityIndices,
    }
}

/// Per-table flush thresholds (spec §4.7: "500 for trades, 200 for
/// orderbook deltas, 50 for low-frequency types"; 1s high-rate / 5s
/// low-rate timeout). Overridable via `storage.batch.<table>.size/.timeout_ms`
/// (spec §4.8).
#[derive(Debug, Clone, Copy)]
pub struct BatchConfig {
    pub batch_size: usize,
    pub batch_timeout: Duration,
}

pub fn default_batch_config(table: Table) -> BatchConfig {
    match table {
        Table::Trades => BatchConfig {
            batch_size: 500,
            batch_timeout: Duration::from_secs(1),
        },
        Table::Orderbooks => BatchConfig {
            batch_size: 200,
            batch_timeout: Duration::from_secs(1),
        },
        Table::FundingRates
        | Table::OpenInterests
        | Table::Liquidations
        | Table::LsrTopPositions
        | Table::LsrAllAccounts
        | Table::VolatilityIndices => BatchConfig {
            batch_size: 50,
            batch_timeout: Duration::from_secs(5),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use marketline_data::model::Trade;
    use marketline_instrument::{ExchangeId, MarketType, Symbol};
    use rust_decimal_macros::dec;

    #[test]
    fn trade_maps_to_trades_table_with_high_rate_batch() {
        let record = CanonicalRecord::from(Trade {
            exchange_id: ExchangeId::BinanceSpot,
            market_type: MarketType::Spot,
            symbol: Symbol::new("BTC", "USDT"),
            trade_id: "1".into(),
            price: dec!(1),
            quantity: dec!(1),
            quote_quantity: dec!(1),
            side: marketline_data::model::Side::Buy,
            is_buyer_maker: false,
            event_ts: Utc::now(),
            collected_at: Utc::now(),
        });

        let table = table_for(&record);
        assert_eq!(table.name(), "trades");
        let config = default_batch_config(table);
        assert_eq!(config.batch_size, 500);
        assert_eq!(config.batch_timeout, Duration::from_secs(1));
    }

    #[test]
    fn low_frequency_tables_share_conservative_batch() {
        let config = default_batch_config(Table::VolatilityIndices);
        assert_eq!(config.batch_size, 50);
        assert_eq!(config.batch_timeout, Duration::from_secs(5));
    }
}
