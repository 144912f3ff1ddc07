//! Saga and timeout persistence over a transactional ordered key-value store.
//!
//! This crate provides:
//! - Order-preserving tuple key encoding with namespaced subspaces
//! - A transactional store contract (snapshot reads, conflict-detected commit)
//!   and an embedded in-memory implementation of it
//! - A saga persister with optimistic concurrency and unique-field indexes
//! - A timeout persister with time-ordered and owner-grouping indexes
//!
//! Every public persister operation runs in exactly one store transaction;
//! conflicts surface as errors and retry policy belongs to the caller.

#![warn(missing_docs)]
#![warn(clippy::all)]

mod clock;
mod codec;
mod config;
mod error;
mod keys;
mod memory;
mod saga;
mod store;
mod timeout;

pub use clock::{Clock, ManualClock, SystemClock};
pub use codec::{Json, PayloadCodec, Postcard};
pub use config::{ConnectionConfig, ConnectionConfigBuilder};
pub use error::{Error, Result};
pub use keys::{pack, unpack, Element, KeyRange, Subspace};
pub use memory::{MemoryStore, MemoryTransaction};
pub use saga::{FieldValue, Saga, SagaMetadata, SagaPersister, SagaState};
pub use store::{Store, Transaction};
pub use timeout::{TimeoutPersister, TimeoutRecord};
