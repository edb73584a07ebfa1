//! PARLANCE Storage - Persistence Abstractions
//!
//! Call store with optimistic single-writer semantics, key-value cache with
//! TTL, distributed leases built on conditional writes, and typed work
//! queues with visibility timeouts. In-memory implementations back both
//! local deployments and the test suite; hosted document/queue services
//! plug in behind the same traits.

mod call_store;
mod cache;
mod events;
mod features;
mod lease;
mod queue;

pub use call_store::{save_with_reapply, CachedCallStore, CallStore, MemoryCallStore};
pub use cache::{KeyValueStore, MemoryKeyValue};
pub use events::{InboundEvent, JobEvent, QueueEnvelope, SmsEvent};
pub use features::FeatureClient;
pub use lease::{lease_key_call, lease_key_schema, Lease, LeaseKeeper, LeaseManager};
pub use queue::{MemoryQueue, QueueMessage, WorkQueue};
