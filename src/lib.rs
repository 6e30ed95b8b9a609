//! # platon - Observation-to-Entity Resolution
//!
//! platon consolidates crowd-submitted observations of real-world objects
//! (assets, facilities, resources, transport, extents) into a registry of
//! canonical entities. Each batch run matches unresolved observations to
//! existing entities or creates new ones, links them, and recomputes every
//! touched entity's derived state from all of its evidence.
//!
//! ## Core Concepts
//!
//! - **Observation**: one typed payload within a submitted event
//! - **Entity**: the canonical object observations are evidence for
//! - **EntityLink**: many-to-many join between entities and observations
//! - **EntityIdentifier**: an external identifier, matched on its canonical form
//! - **Synthesis**: idempotent recomputation of an entity's derived fields
//!
//! ## Usage
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use chrono::Utc;
//! use platon::ingest::{NewEvent, NewObservation};
//! use platon::{InMemoryStore, Location, Resolver, ResolverConfig};
//!
//! let store = Arc::new(InMemoryStore::new());
//! let payload = serde_json::json!({
//!     "observation_type": "asset",
//!     "asset_id": {"id_type": "BIC", "id_text": "MSCU 4401"}
//! });
//! store.ingest(NewEvent {
//!     observer: "alice".to_string(),
//!     source: "direct".to_string(),
//!     observed_at: Utc::now(),
//!     submitted_at: Utc::now(),
//!     location: Location::lat_lon(51.5, -0.12),
//!     observations: vec![NewObservation::from_payload(
//!         payload.as_object().cloned().unwrap_or_default(),
//!     )],
//! })?;
//!
//! let resolver = Resolver::new(store.clone(), ResolverConfig::default())?;
//! let report = resolver.run()?;
//! assert_eq!(report.created, 1);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

// Core types
pub mod canonical;
pub mod entity;
pub mod error;
pub mod observation;

// Storage, loading and the engine
pub mod ingest;
pub mod resolution;
pub mod storage;

// Re-export primary types at crate root for convenience
pub use canonical::canonicalize;
pub use entity::{
    Entity, EntityId, EntityIdentifier, EntityLink, EntityType, IdentifierId, IssuerType,
    LinkStatus, NewIdentifier,
};
pub use error::{ResolutionError, ResolutionResult};
pub use observation::{
    Coordinates, EventId, Geometry, Location, LocationError, Observation, ObservationEvent,
    ObservationId, ObservationKind, ObservationRecord, Payload,
};
pub use resolution::{Resolution, Resolver, ResolverConfig, RunReport};
pub use storage::{
    InMemoryStore, ResolutionStore, RunId, StorageError, StoreReader, Transaction,
};
