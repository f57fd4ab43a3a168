//! Publication and durable bus bindings (C5, C6): canonical records leave
//! [`marketline_data`] venue-unaware and arrive here to be sharded onto
//! bus subjects, queued per session with a type-appropriate backpressure
//! policy, deduplicated, and published onto a provisioned JetStream
//! topology.

pub mod bindings;
pub mod dedup;
pub mod error;
pub mod publisher;
pub mod queue;
pub mod subject;

pub use bindings::{BusBindings, ConsumerSpec, NatsBusClient, ToleranceConfig};
pub use dedup::dedup_id_for;
pub use error::BusError;
pub use publisher::{BusClient, Publisher, PublisherMetrics};
pub use queue::{BackpressurePolicy, OutboundQueue, QueueMetrics};
pub use subject::{DeliveryMode, LogicalStream, delivery_mode_for, subject_for};
