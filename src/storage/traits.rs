//! Abstract storage traits for platon.
//!
//! The resolution engine never owns persistence; it reads and mutates records
//! through these contracts. By using traits, we enable:
//! - An in-memory backend for tests and embedded use
//! - A durable WAL-backed backend for the batch binary
//! - Adapters over an external database

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::entity::{Entity, EntityId, EntityIdentifier, EntityLink, EntityType, LinkStatus, NewIdentifier};
use crate::observation::{ObservationId, ObservationRecord};

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Entity not found.
    #[error("Entity not found: {0}")]
    EntityNotFound(EntityId),

    /// Observation not found.
    #[error("Observation not found: {0}")]
    ObservationNotFound(ObservationId),

    /// Link not found.
    #[error("Link not found: entity {entity_id} / observation {observation_id}")]
    LinkNotFound {
        entity_id: EntityId,
        observation_id: ObservationId,
    },

    /// A uniqueness constraint rejected the write.
    #[error("Unique violation: {0}")]
    UniqueViolation(String),

    /// The store cannot be reached or can no longer accept writes.
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// Backend error.
    #[error("Storage backend error: {0}")]
    BackendError(String),

    /// Serialization failed.
    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl StorageError {
    /// Returns true if this error means the store itself is gone.
    #[must_use]
    pub const fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

/// Identifies one resolution run; used as the claim owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(Uuid);

impl RunId {
    /// Creates a new random run id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Returns the underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A run's hold on an unresolved observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Claim {
    pub run_id: RunId,
    pub claimed_at: DateTime<Utc>,
}

impl Claim {
    /// A claim is live until `ttl` has elapsed; after that another run may
    /// take the observation over.
    #[must_use]
    pub fn is_live(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        now - self.claimed_at < ttl
    }
}

/// Parameters of an atomic claim.
#[derive(Debug, Clone)]
pub struct ClaimRequest {
    /// Claim owner.
    pub run_id: RunId,
    /// Claim timestamp.
    pub now: DateTime<Utc>,
    /// Age after which another run's claim is treated as abandoned.
    pub ttl: Duration,
    /// Maximum number of observations to claim.
    pub limit: Option<usize>,
}

/// Read operations available inside a transaction.
pub trait StoreReader {
    /// Get an observation joined with its event.
    fn observation(&self, id: ObservationId) -> Result<Option<ObservationRecord>, StorageError>;

    /// Get an entity by ID.
    fn entity(&self, id: EntityId) -> Result<Option<Entity>, StorageError>;

    /// Entities of `entity_type` owning an identifier with this canonical
    /// text, ascending by id.
    fn entities_by_identifier(
        &self,
        canonical: &str,
        entity_type: EntityType,
    ) -> Result<Vec<Entity>, StorageError>;

    /// All identifiers attached to an entity.
    fn identifiers(&self, entity_id: EntityId) -> Result<Vec<EntityIdentifier>, StorageError>;

    /// All links (any status) for an entity.
    fn links_for_entity(&self, entity_id: EntityId) -> Result<Vec<EntityLink>, StorageError>;

    /// All links (any status) for an observation.
    fn links_for_observation(
        &self,
        observation_id: ObservationId,
    ) -> Result<Vec<EntityLink>, StorageError>;

    /// Observations reachable through the entity's active links, in no
    /// particular order.
    fn active_linked_observations(
        &self,
        entity_id: EntityId,
    ) -> Result<Vec<ObservationRecord>, StorageError> {
        self.links_for_entity(entity_id)?
            .into_iter()
            .filter(EntityLink::is_active)
            .map(|link| {
                self.observation(link.observation_id)?
                    .ok_or(StorageError::ObservationNotFound(link.observation_id))
            })
            .collect()
    }
}

/// A unit of work.
///
/// Every write becomes visible to other callers only after [`commit`]
/// succeeds. Dropping a transaction without committing discards all of its
/// writes. Implementations serialize transactions, so at most one
/// synthesizer writes an entity's derived state at a time.
///
/// [`commit`]: Transaction::commit
pub trait Transaction: StoreReader {
    /// Insert a new entity with a store-assigned id.
    fn create_entity(
        &mut self,
        entity_type: EntityType,
        now: DateTime<Utc>,
    ) -> Result<Entity, StorageError>;

    /// Insert a link. Fails with `UniqueViolation` if the pair exists.
    /// Marks the entity as pending synthesis.
    fn insert_link(&mut self, link: EntityLink) -> Result<(), StorageError>;

    /// Correct a link's status. Marks the entity as pending synthesis.
    fn set_link_status(
        &mut self,
        entity_id: EntityId,
        observation_id: ObservationId,
        status: LinkStatus,
    ) -> Result<(), StorageError>;

    /// Insert an identifier. Fails with `UniqueViolation` if the entity
    /// already owns the same (canonical text, issuer type).
    fn insert_identifier(
        &mut self,
        identifier: NewIdentifier,
    ) -> Result<EntityIdentifier, StorageError>;

    /// Persist an entity's derived state and clear its pending-synthesis mark.
    fn save_synthesized(&mut self, entity: &Entity) -> Result<(), StorageError>;

    /// Make all writes durable and visible.
    fn commit(self: Box<Self>) -> Result<(), StorageError>;
}

/// Storage contract consumed by the resolution driver.
///
/// # Safety Considerations
/// - `claim_unresolved` must mark and return in one atomic step
/// - Transactions must be all-or-nothing
pub trait ResolutionStore: Send + Sync {
    /// Atomically claim observations that have no active link and no live
    /// claim held by another run, returning them ascending by id.
    fn claim_unresolved(&self, request: &ClaimRequest) -> Result<Vec<ObservationId>, StorageError>;

    /// Drop a claim held by `run_id`. Releasing a claim that is not held is
    /// a no-op.
    fn release_claim(&self, run_id: RunId, observation_id: ObservationId)
        -> Result<(), StorageError>;

    /// Entities whose links changed since their last synthesis.
    fn pending_synthesis(&self) -> Result<Vec<EntityId>, StorageError>;

    /// Start a transaction.
    fn begin(&self) -> Result<Box<dyn Transaction + '_>, StorageError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    // Compile-time test: ensure traits are object-safe
    fn _assert_store_object_safe(_: &dyn ResolutionStore) {}
    fn _assert_transaction_object_safe(_: &dyn Transaction) {}
    fn _assert_reader_object_safe(_: &dyn StoreReader) {}

    #[test]
    fn test_storage_error_display() {
        let err = StorageError::EntityNotFound(EntityId::new(4));
        assert!(err.to_string().contains("Entity not found"));

        let err = StorageError::Unavailable("connection refused".to_string());
        assert!(err.to_string().contains("connection refused"));
        assert!(err.is_unavailable());
    }

    #[test]
    fn test_claim_liveness() {
        let now = Utc::now();
        let claim = Claim {
            run_id: RunId::new(),
            claimed_at: now - Duration::minutes(10),
        };
        assert!(claim.is_live(now, Duration::minutes(30)));
        assert!(!claim.is_live(now, Duration::minutes(5)));
    }

    #[test]
    fn test_run_ids_are_unique() {
        assert_ne!(RunId::new(), RunId::new());
    }
}
