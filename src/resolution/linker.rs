//! Entity creation and observation linking.

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::entity::{Entity, EntityLink, EntityType};
use crate::error::ResolutionError;
use crate::observation::{ObservationId, ObservationKind};
use crate::storage::{StorageError, Transaction};

/// Creates an empty entity typed after the observation that prompted it.
///
/// Unrecognised tags produce an [`EntityType::Unclassified`] entity.
///
/// # Errors
/// Propagates store failures.
pub fn create_entity<T: Transaction + ?Sized>(
    tx: &mut T,
    kind: &ObservationKind,
    now: DateTime<Utc>,
) -> Result<Entity, ResolutionError> {
    let entity = tx.create_entity(EntityType::from(kind), now)?;
    debug!(entity_id = %entity.id, entity_type = %entity.entity_type, "entity created");
    Ok(entity)
}

/// Links `observation_id` to `entity` with an active link.
///
/// # Errors
/// `DuplicateLink` if the pair is already linked; other store failures
/// propagate.
pub fn link<T: Transaction + ?Sized>(
    tx: &mut T,
    entity: &Entity,
    observation_id: ObservationId,
    now: DateTime<Utc>,
) -> Result<EntityLink, ResolutionError> {
    let link = EntityLink::active(entity.id, observation_id, now);
    match tx.insert_link(link.clone()) {
        Ok(()) => Ok(link),
        Err(StorageError::UniqueViolation(_)) => Err(ResolutionError::DuplicateLink {
            entity_id: entity.id,
            observation_id,
        }),
        Err(e) => Err(e.into()),
    }
}
