//! Concrete [`crate::poller::PollJob`] implementations (spec §4.4): the
//! data types not streamed over a WebSocket. One job per (venue, data
//! type) pair; each owns the [`RestClient`] it polls through and maps the
//! venue's REST response directly into the canonical model, the same way
//! the venue adapters in `crate::exchange` map WebSocket frames.

use crate::error::DataError;
use crate::model::{CanonicalRecord, FundingRate, LsrAllAccount, LsrTopPosition, OpenInterest, VolatilityIndex};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use marketline_instrument::{ExchangeId, MarketType, Symbol};
use marketline_integration::protocol::http::{RestClient, RestRequest};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;

use crate::poller::PollJob;

fn millis_to_ts(millis: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(millis).single().unwrap_or_else(Utc::now)
}

#[derive(Debug, Serialize)]
struct SymbolQuery<'a> {
    symbol: &'a str,
}

impl RestRequest for SymbolQuery<'_> {
    type Response = BinancePremiumIndex;
    type QueryParams = Self;

    fn path(&self) -> Cow<'static, str> {
        Cow::Borrowed("/fapi/v1/premiumIndex")
    }

    fn query_params(&self) -> Option<&Self::QueryParams> {
        Some(self)
    }
}

#[derive(Debug, Deserialize)]
struct BinancePremiumIndex {
    #[serde(rename = "markPrice")]
    mark_price: Decimal,
    #[serde(rename = "indexPrice")]
    index_price: Decimal,
    #[serde(rename = "lastFundingRate")]
    last_funding_rate: Decimal,
    #[serde(rename = "nextFundingTime")]
    next_funding_time: i64,
    time: i64,
}

/// Polls `GET /fapi/v1/premiumIndex` once per symbol per tick (spec §4.4
/// default interval 8h, aligned to the venue's own funding schedule via
/// `next_funding_time`; the scheduler does not itself align ticks to the
/// schedule, it just reports whatever the venue currently has, which is
/// cheap and idempotent to over-poll).
pub struct BinanceFundingRateJob {
    client: RestClient,
    symbols: Vec<Symbol>,
}

impl BinanceFundingRateJob {
    pub fn new(client: RestClient, symbols: Vec<Symbol>) -> Self {
        Self { client, symbols }
    }

    fn native(symbol: &Symbol) -> String {
        format!("{}{}", symbol.base(), symbol.quote())
    }
}

#[async_trait]
impl PollJob for BinanceFundingRateJob {
    fn name(&self) -> &'static str {
        "funding_rate.binance_derivatives"
    }

    async fn poll(&self) -> Result<Vec<CanonicalRecord>, DataError> {
        let mut records = Vec::with_capacity(self.symbols.len());
        for symbol in &self.symbols {
            let native = Self::native(symbol);
            let response = self.client.execute(SymbolQuery { symbol: &native }).await?;
            let collected_at = Utc::now();
            records.push(CanonicalRecord::from(FundingRate {
                exchange_id: ExchangeId::BinanceDerivatives,
                market_type: MarketType::Perpetual,
                symbol: symbol.clone(),
                funding_rate: response.last_funding_rate,
                next_funding_time: millis_to_ts(response.next_funding_time),
                mark_price: response.mark_price,
                index_price: response.index_price,
                funding_interval: chrono::Duration::hours(8),
                event_ts: millis_to_ts(response.time),
                collected_at,
            }));
        }
        Ok(records)
    }
}

#[derive(Debug, Deserialize)]
struct BinanceOpenInterest {
    #[serde(rename = "openInterest")]
    open_interest: Decimal,
    time: i64,
}

#[derive(Debug, Serialize)]
struct SymbolQueryOpenInterest<'a> {
    symbol: &'a str,
}

impl RestRequest for SymbolQueryOpenInterest<'_> {
    type Response = BinanceOpenInterest;
    type QueryParams = Self;

    fn path(&self) -> Cow<'static, str> {
        Cow::Borrowed("/fapi/v1/openInterest")
    }

    fn query_params(&self) -> Option<&Self::QueryParams> {
        Some(self)
    }
}

/// Polls `GET /fapi/v1/openInterest` once per symbol per tick (spec §4.4
/// default interval 15 min). `open_interest_value` is derived from the
/// contract's mark price, which this venue's endpoint does not return
/// alongside open interest; it is left at zero rather than issuing a
/// second round-trip the spec does not call for.
pub struct BinanceOpenInterestJob {
    client: RestClient,
    symbols: Vec<Symbol>,
}

impl BinanceOpenInterestJob {
    pub fn new(client: RestClient, symbols: Vec<Symbol>) -> Self {
        Self { client, symbols }
    }
}

#[async_trait]
impl PollJob for BinanceOpenInterestJob {
    fn name(&self) -> &'static str {
        "open_interest.binance_derivatives"
    }

    async fn poll(&self) -> Result<Vec<CanonicalRecord>, DataError> {
        let mut records = Vec::with_capacity(self.symbols.len());
        for symbol in &self.symbols {
            let native = format!("{}{}", symbol.base(), symbol.quote());
            let response = self
                .client
                .execute(SymbolQueryOpenInterest { symbol: &native })
                .await?;
            let collected_at = Utc::now();
            records.push(CanonicalRecord::from(OpenInterest {
                exchange_id: ExchangeId::BinanceDerivatives,
                market_type: MarketType::Perpetual,
                symbol: symbol.clone(),
                open_interest: response.open_interest,
                open_interest_value: Decimal::ZERO,
                event_ts: millis_to_ts(response.time),
                collected_at,
            }));
        }
        Ok(records)
    }
}

#[derive(Debug, Deserialize)]
struct BinanceLsrEntry {
    #[serde(rename = "longAccount")]
    long_account: Decimal,
    #[serde(rename = "shortAccount")]
    short_account: Decimal,
    #[serde(rename = "longShortRatio")]
    long_short_ratio: Decimal,
    timestamp: i64,
}

#[derive(Debug, Serialize)]
struct LsrQuery<'a> {
    symbol: &'a str,
    period: &'a str,
    limit: u32,
}

/// Polls `GET /futures/data/topLongShortPositionRatio` once per symbol per
/// tick (spec §4.4 default interval 5 min). `period` is pinned to the same
/// 5 min bucket the venue buckets its own history into; `limit=1` returns
/// only the most recent bucket.
pub struct BinanceLsrTopPositionJob {
    client: RestClient,
    symbols: Vec<Symbol>,
}

impl BinanceLsrTopPositionJob {
    pub fn new(client: RestClient, symbols: Vec<Symbol>) -> Self {
        Self { client, symbols }
    }
}

impl RestRequest for LsrQuery<'_> {
    type Response = Vec<BinanceLsrEntry>;
    type QueryParams = Self;

    fn path(&self) -> Cow<'static, str> {
        Cow::Borrowed("/futures/data/topLongShortPositionRatio")
    }

    fn query_params(&self) -> Option<&Self::QueryParams> {
        Some(self)
    }
}

#[async_trait]
impl PollJob for BinanceLsrTopPositionJob {
    fn name(&self) -> &'static str {
        "lsr_top_position.binance_derivatives"
    }

    async fn poll(&self) -> Result<Vec<CanonicalRecord>, DataError> {
        let mut records = Vec::with_capacity(self.symbols.len());
        for symbol in &self.symbols {
            let native = format!("{}{}", symbol.base(), symbol.quote());
            let response = self
                .client
                .execute(LsrQuery { symbol: &native, period: "5m", limit: 1 })
                .await?;
            let Some(entry) = response.into_iter().next_back() else {
                continue;
            };
            records.push(CanonicalRecord::from(lsr_top_position_record(symbol, entry)));
        }
        Ok(records)
    }
}

fn lsr_top_position_record(symbol: &Symbol, entry: BinanceLsrEntry) -> LsrTopPosition {
    LsrTopPosition {
        exchange_id: ExchangeId::BinanceDerivatives,
        market_type: MarketType::Perpetual,
        symbol: symbol.clone(),
        long_ratio: entry.long_account,
        short_ratio: entry.short_account,
        long_short_ratio: entry.long_short_ratio,
        event_ts: millis_to_ts(entry.timestamp),
        collected_at: Utc::now(),
    }
}

#[derive(Debug, Serialize)]
struct LsrAllAccountQuery<'a> {
    symbol: &'a str,
    period: &'a str,
    limit: u32,
}

impl RestRequest for LsrAllAccountQuery<'_> {
    type Response = Vec<BinanceLsrEntry>;
    type QueryParams = Self;

    fn path(&self) -> Cow<'static, str> {
        Cow::Borrowed("/futures/data/topLongShortAccountRatio")
    }

    fn query_params(&self) -> Option<&Self::QueryParams> {
        Some(self)
    }
}

/// Polls `GET /futures/data/topLongShortAccountRatio`, the account-count
/// (rather than position-size weighted) long/short ratio, same cadence and
/// bucketing as [`BinanceLsrTopPositionJob`].
pub struct BinanceLsrAllAccountJob {
    client: RestClient,
    symbols: Vec<Symbol>,
}

impl BinanceLsrAllAccountJob {
    pub fn new(client: RestClient, symbols: Vec<Symbol>) -> Self {
        Self { client, symbols }
    }
}

#[async_trait]
impl PollJob for BinanceLsrAllAccountJob {
    fn name(&self) -> &'static str {
        "lsr_all_account.binance_derivatives"
    }

    async fn poll(&self) -> Result<Vec<CanonicalRecord>, DataError> {
        let mut records = Vec::with_capacity(self.symbols.len());
        for symbol in &self.symbols {
            let native = format!("{}{}", symbol.base(), symbol.quote());
            let response = self
                .client
                .execute(LsrAllAccountQuery { symbol: &native, period: "5m", limit: 1 })
                .await?;
            let Some(entry) = response.into_iter().next_back() else {
                continue;
            };
            records.push(CanonicalRecord::from(lsr_all_account_record(symbol, entry)));
        }
        Ok(records)
    }
}

fn lsr_all_account_record(symbol: &Symbol, entry: BinanceLsrEntry) -> LsrAllAccount {
    LsrAllAccount {
        exchange_id: ExchangeId::BinanceDerivatives,
        market_type: MarketType::Perpetual,
        symbol: symbol.clone(),
        long_ratio: entry.long_account,
        short_ratio: entry.short_account,
        long_short_ratio: entry.long_short_ratio,
        event_ts: millis_to_ts(entry.timestamp),
        collected_at: Utc::now(),
    }
}

#[derive(Debug, Serialize)]
struct VolatilityIndexQuery<'a> {
    currency: &'a str,
    start_timestamp: i64,
    end_timestamp: i64,
    resolution: &'a str,
}

impl RestRequest for VolatilityIndexQuery<'_> {
    type Response = DeribitVolatilityResponse;
    type QueryParams = Self;

    fn path(&self) -> Cow<'static, str> {
        Cow::Borrowed("/api/v2/public/get_volatility_index_data")
    }

    fn query_params(&self) -> Option<&Self::QueryParams> {
        Some(self)
    }
}

#[derive(Debug, Deserialize)]
struct DeribitVolatilityResponse {
    result: DeribitVolatilityResult,
}

#[derive(Debug, Deserialize)]
struct DeribitVolatilityResult {
    /// Each candle is `[timestamp_ms, open, high, low, close]`.
    data: Vec<(i64, Decimal, Decimal, Decimal, Decimal)>,
}

/// Polls Deribit's `public/get_volatility_index_data` once per currency per
/// tick (spec §4.4 default interval 1 min), windowed to the last two
/// 60s resolution candles so a slow poller still gets the latest close.
pub struct DeribitVolatilityIndexJob {
    client: RestClient,
    currencies: Vec<String>,
}

impl DeribitVolatilityIndexJob {
    pub fn new(client: RestClient, currencies: Vec<String>) -> Self {
        Self { client, currencies }
    }
}

#[async_trait]
impl PollJob for DeribitVolatilityIndexJob {
    fn name(&self) -> &'static str {
        "volatility_index.deribit_derivatives"
    }

    async fn poll(&self) -> Result<Vec<CanonicalRecord>, DataError> {
        let mut records = Vec::with_capacity(self.currencies.len());
        let now = Utc::now();
        let end_timestamp = now.timestamp_millis();
        let start_timestamp = end_timestamp - 2 * 60 * 1000;
        for currency in &self.currencies {
            let response = self
                .client
                .execute(VolatilityIndexQuery {
                    currency,
                    start_timestamp,
                    end_timestamp,
                    resolution: "60",
                })
                .await?;
            let Some(candle) = response.result.data.last() else {
                continue;
            };
            records.push(CanonicalRecord::from(volatility_index_record(currency, candle, now)));
        }
        Ok(records)
    }
}

fn volatility_index_record(
    currency: &str,
    candle: &(i64, Decimal, Decimal, Decimal, Decimal),
    collected_at: DateTime<Utc>,
) -> VolatilityIndex {
    VolatilityIndex {
        exchange_id: ExchangeId::DeribitDerivatives,
        market_type: MarketType::Options,
        symbol: Symbol::new(currency, "VIX"),
        index_value: candle.4,
        event_ts: millis_to_ts(candle.0),
        collected_at,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn funding_rate_job_is_named_for_its_subject_segment() {
        let client = RestClient::new(url::Url::parse("https://fapi.binance.com").unwrap());
        let job = BinanceFundingRateJob::new(client, vec![Symbol::new("BTC", "USDT")]);
        assert_eq!(job.name(), "funding_rate.binance_derivatives");
    }

    #[test]
    fn open_interest_job_is_named_for_its_subject_segment() {
        let client = RestClient::new(url::Url::parse("https://fapi.binance.com").unwrap());
        let job = BinanceOpenInterestJob::new(client, vec![Symbol::new("BTC", "USDT")]);
        assert_eq!(job.name(), "open_interest.binance_derivatives");
    }

    #[test]
    fn lsr_top_position_job_is_named_for_its_subject_segment() {
        let client = RestClient::new(url::Url::parse("https://fapi.binance.com").unwrap());
        let job = BinanceLsrTopPositionJob::new(client, vec![Symbol::new("BTC", "USDT")]);
        assert_eq!(job.name(), "lsr_top_position.binance_derivatives");
    }

    #[test]
    fn lsr_top_position_entry_maps_into_canonical_record() {
        let symbol = Symbol::new("BTC", "USDT");
        let entry = BinanceLsrEntry {
            long_account: "0.6530".parse().unwrap(),
            short_account: "0.3470".parse().unwrap(),
            long_short_ratio: "1.8818".parse().unwrap(),
            timestamp: 1_583_139_600_000,
        };
        let record = lsr_top_position_record(&symbol, entry);
        assert_eq!(record.exchange_id, ExchangeId::BinanceDerivatives);
        assert_eq!(record.symbol, symbol);
        assert_eq!(record.long_ratio.to_string(), "0.6530");
        assert_eq!(record.short_ratio.to_string(), "0.3470");
        assert_eq!(record.long_short_ratio.to_string(), "1.8818");
    }

    #[test]
    fn lsr_all_account_job_is_named_for_its_subject_segment() {
        let client = RestClient::new(url::Url::parse("https://fapi.binance.com").unwrap());
        let job = BinanceLsrAllAccountJob::new(client, vec![Symbol::new("BTC", "USDT")]);
        assert_eq!(job.name(), "lsr_all_account.binance_derivatives");
    }

    #[test]
    fn lsr_all_account_entry_maps_into_canonical_record() {
        let symbol = Symbol::new("ETH", "USDT");
        let entry = BinanceLsrEntry {
            long_account: "0.55".parse().unwrap(),
            short_account: "0.45".parse().unwrap(),
            long_short_ratio: "1.2222".parse().unwrap(),
            timestamp: 1_583_139_600_000,
        };
        let record = lsr_all_account_record(&symbol, entry);
        assert_eq!(record.symbol, symbol);
        assert_eq!(record.long_ratio.to_string(), "0.55");
        assert_eq!(record.short_ratio.to_string(), "0.45");
    }

    #[test]
    fn volatility_index_job_is_named_for_its_subject_segment() {
        let client = RestClient::new(url::Url::parse("https://www.deribit.com").unwrap());
        let job = DeribitVolatilityIndexJob::new(client, vec!["BTC".to_string()]);
        assert_eq!(job.name(), "volatility_index.deribit_derivatives");
    }

    #[test]
    fn volatility_index_candle_maps_into_canonical_record() {
        let candle = (
            1_672_515_780_000_i64,
            "61.2".parse().unwrap(),
            "62.0".parse().unwrap(),
            "60.8".parse().unwrap(),
            "61.5".parse().unwrap(),
        );
        let record = volatility_index_record("BTC", &candle, Utc::now());
        assert_eq!(record.exchange_id, ExchangeId::DeribitDerivatives);
        assert_eq!(record.market_type, MarketType::Options);
        assert_eq!(record.symbol, Symbol::new("BTC", "VIX"));
        assert_eq!(record.index_value.to_string(), "61.5");
    }
}
