//! Exchange Session Manager (C1), Normalizer (C2), OrderBook Manager (C3)
//! and Periodic Pollers (C4): the venue-facing half of the ingestion
//! pipeline. Everything here is venue-aware; downstream crates
//! (`marketline-bus`, `marketline-storage`) only see [`model::CanonicalRecord`].

pub mod books;
pub mod error;
pub mod exchange;
pub mod jobs;
pub mod model;
pub mod normalizer;
pub mod poller;
pub mod session;
pub mod snapshot_client;

pub use error::DataError;
pub use model::CanonicalRecord;
pub use normalizer::{run_worker, shard_for};
