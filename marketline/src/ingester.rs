//! Ingester role wiring (C1 + C2 + C3 + C4 + C5): one session group per
//! configured exchange, hash-sharded into a small pool of normalizer
//! workers per spec §5, feeding one outbound queue per exchange drained by
//! a single [`Publisher`].
//!
//! The normalizer emits onto a plain [`UnboundedTx`] (it only needs
//! [`Tx::send`]); a small bridge task drains the matching receiver into the
//! exchange's [`OutboundQueue`], which is where the actual async
//! backpressure ([`OutboundQueue::enqueue`]) is applied.

use async_trait::async_trait;
use futures::StreamExt;
use marketline_bus::bindings::NatsBusClient;
use marketline_bus::queue::DEFAULT_QUEUE_CAPACITY;
use marketline_bus::{OutboundQueue, Publisher};
use marketline_control::config::ExchangeConfig;
use marketline_control::lifecycle::Component;
use marketline_control::Runtime;
use marketline_data::books::sequencer::{BinanceSequencer, DeribitSequencer, OkxSequencer};
use marketline_data::books::{DepthStrategyName, OrderBookManager, SequenceValidator};
use marketline_data::exchange::binance::BinanceAdapter;
use marketline_data::exchange::deribit::DeribitAdapter;
use marketline_data::exchange::okx::OkxAdapter;
use marketline_data::exchange::{ChannelKind, ChannelSubscription, ExchangeAdapter};
use marketline_data::jobs::{
    BinanceFundingRateJob, BinanceLsrAllAccountJob, BinanceLsrTopPositionJob, BinanceOpenInterestJob,
    DeribitVolatilityIndexJob,
};
use marketline_data::model::CanonicalRecord;
use marketline_data::normalizer;
use marketline_data::poller::{self, JobSchedule, PollerHandle, defaults};
use marketline_data::session::{self, ReconnectPolicy, SessionEvent, SessionHandle, SessionKey, SessionSpec, SmoothReconnectConfig};
use marketline_data::snapshot_client::VenueSnapshotClients;
use marketline_instrument::{ExchangeId, MarketType, Symbol};
use marketline_integration::channel::{Channel, ChannelTxDroppable};
use marketline_integration::protocol::http::RestClient;
use marketline_integration::rate_limit::{Priority, RateLimiter};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Number of normalizer workers per exchange, capped by how many symbols it
/// has configured (no point sharding 2 symbols across 4 workers).
const SHARDS_PER_EXCHANGE: usize = 4;

/// Binance derivatives' own documented request weight budget; shared across
/// the funding-rate and open-interest pollers for that venue.
const BINANCE_DERIVATIVES_RATE_LIMIT: (usize, Duration) = (2400, Duration::from_secs(60));

fn parse_exchange_id(key: &str) -> Option<ExchangeId> {
    match key {
        "binance_spot" => Some(ExchangeId::BinanceSpot),
        "binance_derivatives" => Some(ExchangeId::BinanceDerivatives),
        "okx_spot" => Some(ExchangeId::OkxSpot),
        "okx_derivatives" => Some(ExchangeId::OkxDerivatives),
        "deribit_derivatives" => Some(ExchangeId::DeribitDerivatives),
        _ => None,
    }
}

fn build_adapter(exchange_id: ExchangeId) -> Arc<dyn ExchangeAdapter> {
    match exchange_id {
        ExchangeId::BinanceSpot => Arc::new(BinanceAdapter::spot()),
        ExchangeId::BinanceDerivatives => Arc::new(BinanceAdapter::derivatives()),
        ExchangeId::OkxSpot => Arc::new(OkxAdapter::spot()),
        ExchangeId::OkxDerivatives => Arc::new(OkxAdapter::derivatives()),
        ExchangeId::DeribitDerivatives => Arc::new(DeribitAdapter::default()),
    }
}

fn build_sequencer(exchange_id: ExchangeId) -> Box<dyn SequenceValidator> {
    match exchange_id {
        ExchangeId::BinanceSpot | ExchangeId::BinanceDerivatives => Box::new(BinanceSequencer),
        ExchangeId::OkxSpot | ExchangeId::OkxDerivatives => Box::new(OkxSequencer),
        ExchangeId::DeribitDerivatives => Box::new(DeribitSequencer),
    }
}

fn parse_strategy_name(raw: &str) -> DepthStrategyName {
    match raw.to_ascii_lowercase().replace(['-', '_'], "").as_str() {
        "arbitrage" => DepthStrategyName::Arbitrage,
        "marketmaking" => DepthStrategyName::MarketMaking,
        "trendanalysis" => DepthStrategyName::TrendAnalysis,
        "depthanalysis" => DepthStrategyName::DepthAnalysis,
        other => {
            warn!(strategy = other, "unknown orderbook strategy, defaulting to market_making");
            DepthStrategyName::MarketMaking
        }
    }
}

fn build_snapshot_clients() -> VenueSnapshotClients {
    VenueSnapshotClients {
        binance: RestClient::new(url::Url::parse("https://api.binance.com").expect("static url")),
        okx: RestClient::new(url::Url::parse("https://www.okx.com").expect("static url")),
        deribit: RestClient::new(url::Url::parse("https://www.deribit.com").expect("static url")),
    }
}

fn parse_symbols(exchange_key: &str, config: &ExchangeConfig) -> Vec<Symbol> {
    config
        .symbols
        .iter()
        .filter_map(|raw| match Symbol::from_str(raw) {
            Ok(symbol) => Some(symbol),
            Err(error) => {
                warn!(exchange = exchange_key, symbol = raw, %error, "invalid symbol in config, skipping");
                None
            }
        })
        .collect()
}

fn shard_symbols(exchange_id: ExchangeId, symbols: &[Symbol]) -> Vec<Vec<Symbol>> {
    let shard_count = SHARDS_PER_EXCHANGE.min(symbols.len()).max(1);
    let mut shards: Vec<Vec<Symbol>> = vec![Vec::new(); shard_count];
    for symbol in symbols {
        let shard = normalizer::shard_for(exchange_id, symbol, shard_count);
        shards[shard].push(symbol.clone());
    }
    shards.retain(|shard| !shard.is_empty());
    shards
}

fn wanted_channels(config: &ExchangeConfig) -> (bool, bool, bool) {
    let all = config.data_types.is_empty();
    let trades = all || config.data_types.iter().any(|t| t == "trade");
    let book = all || config.data_types.iter().any(|t| t == "orderbook_l2" || t == "orderbook");
    let liquidation = all || config.data_types.iter().any(|t| t == "liquidation");
    (trades, book, liquidation)
}

/// Everything a running exchange needs torn down on shutdown. Held behind a
/// [`tokio::sync::Mutex`] since [`Component::stop`] only gets `&self` but
/// [`session::close`] needs to consume the [`SessionHandle`] by value.
struct ExchangeState {
    sessions: Vec<SessionHandle>,
    worker_tasks: Vec<JoinHandle<()>>,
    bridge_tasks: Vec<JoinHandle<()>>,
    poller_handles: Vec<PollerHandle>,
    publisher_task: JoinHandle<()>,
}

struct IngesterComponent {
    exchanges: tokio::sync::Mutex<Vec<ExchangeState>>,
}

#[async_trait]
impl Component for IngesterComponent {
    fn name(&self) -> &'static str {
        "ingester"
    }

    async fn stop(&self, grace: Duration) {
        let mut exchanges = self.exchanges.lock().await;
        for exchange in exchanges.iter_mut() {
            for poller in exchange.poller_handles.drain(..) {
                poller.stop();
            }
            for session in exchange.sessions.drain(..) {
                session::close(session).await;
            }
        }

        let drains: Vec<JoinHandle<()>> = exchanges
            .iter_mut()
            .flat_map(|exchange| exchange.worker_tasks.drain(..).chain(exchange.bridge_tasks.drain(..)))
            .collect();
        if tokio::time::timeout(grace, futures::future::join_all(drains)).await.is_err() {
            warn!("ingester shutdown grace period elapsed while draining normalizer workers");
        }

        for exchange in exchanges.iter() {
            exchange.publisher_task.abort();
        }
    }
}

/// Open every configured exchange's sessions, normalizer shards, order-book
/// managers and pollers, and register the whole ingester as one
/// [`Component`] with `runtime`.
pub async fn start(runtime: &mut Runtime) -> Result<(), Box<dyn std::error::Error>> {
    let config = runtime.config.clone();

    let server = config.bus.servers.first().cloned().unwrap_or_else(|| "localhost:4222".to_string());
    let nats_client = async_nats::connect(&server).await?;
    let bus_client = Arc::new(NatsBusClient::new(nats_client));

    let mut exchange_states = Vec::new();

    for (exchange_key, exchange_config) in &config.exchanges {
        if !exchange_config.enabled {
            continue;
        }
        let Some(exchange_id) = parse_exchange_id(exchange_key) else {
            warn!(exchange = exchange_key, "unknown exchange id in config, skipping");
            continue;
        };

        let symbols = parse_symbols(exchange_key, exchange_config);
        if symbols.is_empty() {
            warn!(exchange = exchange_key, "no valid symbols configured, skipping exchange");
            continue;
        }

        let state = start_exchange(exchange_id, exchange_config, &symbols, &bus_client).await?;
        exchange_states.push(state);
    }

    info!(exchanges = exchange_states.len(), "ingester started");
    runtime.register(Arc::new(IngesterComponent {
        exchanges: tokio::sync::Mutex::new(exchange_states),
    }));
    Ok(())
}

async fn start_exchange(
    exchange_id: ExchangeId,
    exchange_config: &ExchangeConfig,
    symbols: &[Symbol],
    bus_client: &Arc<NatsBusClient>,
) -> Result<ExchangeState, Box<dyn std::error::Error>> {
    let adapter = build_adapter(exchange_id);
    let market_type = exchange_id.default_market_type().unwrap_or(MarketType::Perpetual);
    let strategy = exchange_config
        .orderbook
        .strategy
        .as_deref()
        .map(parse_strategy_name)
        .unwrap_or(DepthStrategyName::MarketMaking)
        .resolve(exchange_id);
    let (include_trades, include_book, include_liquidation) = wanted_channels(exchange_config);
    let include_liquidation = include_liquidation && exchange_id == ExchangeId::BinanceDerivatives;
    let snapshot_clients = build_snapshot_clients();
    let queue = Arc::new(OutboundQueue::new(DEFAULT_QUEUE_CAPACITY));
    let proactive_reconnect_after = matches!(exchange_id, ExchangeId::BinanceSpot | ExchangeId::BinanceDerivatives)
        .then(|| Duration::from_secs(exchange_config.proactive_reconnect_sec));

    let mut sessions = Vec::new();
    let mut worker_tasks = Vec::new();
    let mut bridge_tasks = Vec::new();

    for shard in shard_symbols(exchange_id, symbols) {
        let mut subscriptions = Vec::with_capacity(shard.len() * 2);
        for symbol in &shard {
            if include_trades {
                subscriptions.push(ChannelSubscription {
                    channel: ChannelKind::Trade,
                    symbol: symbol.clone(),
                });
            }
            if include_book {
                subscriptions.push(ChannelSubscription {
                    channel: ChannelKind::OrderBookL2,
                    symbol: symbol.clone(),
                });
            }
            if include_liquidation {
                subscriptions.push(ChannelSubscription {
                    channel: ChannelKind::Liquidation,
                    symbol: symbol.clone(),
                });
            }
        }
        if subscriptions.is_empty() {
            continue;
        }

        let spec = SessionSpec {
            key: SessionKey { exchange_id, market_type },
            adapter: adapter.clone(),
            subscriptions,
            reconnect: ReconnectPolicy::default(),
            smooth: SmoothReconnectConfig::default(),
            proactive_reconnect_after,
        };

        let session_channel = Channel::<SessionEvent>::new();
        let session_handle = session::open(spec, ChannelTxDroppable::new(session_channel.tx)).await?;
        sessions.push(session_handle);

        let mut books = OrderBookManager::new(snapshot_clients.clone());
        for symbol in &shard {
            books.register(exchange_id, market_type, symbol.clone(), build_sequencer(exchange_id), strategy);
        }

        let record_channel = Channel::<CanonicalRecord>::new();
        worker_tasks.push(tokio::spawn(normalizer::run_worker(
            adapter.clone(),
            session_channel.rx,
            books,
            ChannelTxDroppable::new(record_channel.tx),
        )));
        bridge_tasks.push(spawn_queue_bridge(record_channel.rx, queue.clone()));
    }

    let publisher = Publisher::new(bus_client.clone(), queue.clone());
    let publisher_task = tokio::spawn(async move { publisher.run().await });

    let mut poller_handles = Vec::new();
    if exchange_id == ExchangeId::BinanceDerivatives {
        let (capacity, interval) = BINANCE_DERIVATIVES_RATE_LIMIT;
        let rate_limiter = RateLimiter::new(capacity, interval);
        let poller_channel = Channel::<CanonicalRecord>::new();

        let funding_job = BinanceFundingRateJob::new(
            RestClient::new(url::Url::parse("https://fapi.binance.com")?),
            symbols.to_vec(),
        );
        poller_handles.push(poller::spawn(
            funding_job,
            JobSchedule::fixed(defaults::FUNDING_RATE),
            Some((rate_limiter.clone(), Priority::Low)),
            ChannelTxDroppable::new(poller_channel.tx.clone()),
        ));

        let open_interest_job = BinanceOpenInterestJob::new(
            RestClient::new(url::Url::parse("https://fapi.binance.com")?),
            symbols.to_vec(),
        );
        poller_handles.push(poller::spawn(
            open_interest_job,
            JobSchedule::fixed(defaults::OPEN_INTEREST),
            Some((rate_limiter.clone(), Priority::Low)),
            ChannelTxDroppable::new(poller_channel.tx.clone()),
        ));

        let lsr_top_position_job = BinanceLsrTopPositionJob::new(
            RestClient::new(url::Url::parse("https://fapi.binance.com")?),
            symbols.to_vec(),
        );
        poller_handles.push(poller::spawn(
            lsr_top_position_job,
            JobSchedule::fixed(defaults::LSR),
            Some((rate_limiter.clone(), Priority::Low)),
            ChannelTxDroppable::new(poller_channel.tx.clone()),
        ));

        let lsr_all_account_job = BinanceLsrAllAccountJob::new(
            RestClient::new(url::Url::parse("https://fapi.binance.com")?),
            symbols.to_vec(),
        );
        poller_handles.push(poller::spawn(
            lsr_all_account_job,
            JobSchedule::fixed(defaults::LSR),
            Some((rate_limiter, Priority::Low)),
            ChannelTxDroppable::new(poller_channel.tx),
        ));

        bridge_tasks.push(spawn_queue_bridge(poller_channel.rx, queue.clone()));
    }

    if exchange_id == ExchangeId::DeribitDerivatives {
        let mut currencies: Vec<String> = symbols.iter().map(|symbol| symbol.base().to_string()).collect();
        currencies.sort();
        currencies.dedup();

        let poller_channel = Channel::<CanonicalRecord>::new();
        let volatility_index_job = DeribitVolatilityIndexJob::new(
            RestClient::new(url::Url::parse("https://www.deribit.com")?),
            currencies,
        );
        poller_handles.push(poller::spawn(
            volatility_index_job,
            JobSchedule::fixed(defaults::VOLATILITY_INDEX),
            None,
            ChannelTxDroppable::new(poller_channel.tx),
        ));

        bridge_tasks.push(spawn_queue_bridge(poller_channel.rx, queue.clone()));
    }

    Ok(ExchangeState {
        sessions,
        worker_tasks,
        bridge_tasks,
        poller_handles,
        publisher_task,
    })
}

fn spawn_queue_bridge(
    mut rx: marketline_integration::channel::UnboundedRx<CanonicalRecord>,
    queue: Arc<OutboundQueue>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(record) = rx.next().await {
            queue.enqueue(record).await;
        }
    })
}
