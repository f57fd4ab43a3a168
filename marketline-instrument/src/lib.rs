//! Canonical exchange, market-type and symbol identifiers shared by every
//! Marketline crate.
//!
//! This crate intentionally carries none of the order-placement oriented
//! instrument model (tick sizes, contract specs, asset registries) a
//! trading/execution crate would need — order placement is out of scope
//! here, so only what market-data normalisation and routing needs is
//! modelled.

/// Closed enum of source venues.
pub mod exchange;

/// Spot / perpetual / options market segment.
pub mod market_type;

/// Canonical `BASE-QUOTE` symbol type and parsing.
pub mod symbol;

pub use exchange::ExchangeId;
pub use market_type::MarketType;
pub use symbol::{Symbol, SymbolError};
