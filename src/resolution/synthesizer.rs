//! Entity synthesis.
//!
//! Synthesis recomputes an entity's derived state from scratch out of its
//! active linked observations, so it can be repeated any number of times:
//!
//! - observations are ordered newest first (`observed_at` descending, ties
//!   broken by ascending observation id)
//! - `data` is a shallow merge of their payloads in that order where the
//!   first writer of a field wins
//! - `latest_observation_at` and `geometry` come from the first observation
//! - single asset identifiers become entity identifiers, deduplicated
//!   against the entity's existing set

use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::entity::{Entity, EntityId, EntityIdentifier, IssuerType, NewIdentifier};
use crate::error::ResolutionError;
use crate::observation::{IdentifierRef, ObservationRecord, Payload};
use crate::storage::{StorageError, Transaction};

/// What one synthesis pass produced.
#[derive(Debug, Clone)]
pub struct Synthesis {
    /// The entity as persisted.
    pub entity: Entity,
    /// Number of active linked observations used.
    pub observations: usize,
    /// Identifiers added by this pass.
    pub identifiers_added: Vec<EntityIdentifier>,
}

fn newest_first(a: &ObservationRecord, b: &ObservationRecord) -> Ordering {
    b.observed_at()
        .cmp(&a.observed_at())
        .then_with(|| a.id().cmp(&b.id()))
}

/// Recomputes and persists the derived state of `entity_id`.
///
/// # Errors
/// Fails if the entity does not exist or on store failures.
pub fn synthesize<T: Transaction + ?Sized>(
    tx: &mut T,
    entity_id: EntityId,
    now: DateTime<Utc>,
) -> Result<Synthesis, ResolutionError> {
    let mut entity = tx
        .entity(entity_id)?
        .ok_or(StorageError::EntityNotFound(entity_id))?;

    let mut records = tx.active_linked_observations(entity_id)?;
    records.sort_by(newest_first);

    let mut data = Payload::new();
    for record in &records {
        for (key, value) in &record.observation.payload {
            data.entry(key.clone()).or_insert_with(|| value.clone());
        }
    }

    let latest = records.first();
    entity.latest_observation_at = latest.map(ObservationRecord::observed_at);
    entity.geometry = latest.and_then(ObservationRecord::geometry).cloned();
    entity.data = data;
    entity.updated_at = now;

    let identifiers_added = record_identifiers(tx, entity_id, &records)?;

    tx.save_synthesized(&entity)?;
    debug!(
        entity_id = %entity_id,
        observations = records.len(),
        identifiers_added = identifiers_added.len(),
        "entity synthesized"
    );

    Ok(Synthesis {
        entity,
        observations: records.len(),
        identifiers_added,
    })
}

fn record_identifiers<T: Transaction + ?Sized>(
    tx: &mut T,
    entity_id: EntityId,
    records: &[ObservationRecord],
) -> Result<Vec<EntityIdentifier>, ResolutionError> {
    let existing = tx.identifiers(entity_id)?;
    let mut added: Vec<EntityIdentifier> = Vec::new();

    for record in records {
        let IdentifierRef::Single { text, id_type } = record.observation.identifier() else {
            continue;
        };

        let mut candidate = NewIdentifier::new(entity_id, IssuerType::Operator, text);
        if let Some(id_type) = id_type {
            candidate = candidate.issuer(id_type);
        }

        let known = existing
            .iter()
            .chain(added.iter())
            .any(|identifier| identifier.same_key(&candidate));
        if !known {
            added.push(tx.insert_identifier(candidate)?);
        }
    }
    Ok(added)
}
