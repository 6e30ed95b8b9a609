//! Storage for platon.
//!
//! The traits define what the resolution engine needs from a store; the
//! in-memory backend implements them directly and the persistent backend
//! (feature `persistent`) adds a write-ahead log on top.

mod memory;
mod mutation;
mod traits;

#[cfg(feature = "persistent")]
pub mod persistent;

pub use memory::{InMemoryStore, Journal, MemorySnapshot, MemoryTransaction, StoreCounts};
pub use mutation::Mutation;
#[cfg(feature = "persistent")]
pub use persistent::{open_store, PersistentConfig, PersistentStore};

pub use traits::{
    Claim, ClaimRequest, ResolutionStore, RunId, StorageError, StoreReader, Transaction,
};
