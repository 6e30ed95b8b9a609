//! Finding the existing entity an observation refers to.
//!
//! Matching is exact and read-only. Only assets carry identifiers that can
//! be matched; every other kind always yields a new entity.

use tracing::{debug, info, warn};

use crate::canonical::canonicalize;
use crate::entity::{Entity, EntityType};
use crate::error::ResolutionError;
use crate::observation::{IdentifierRef, Observation, ObservationKind, ObservationRecord};
use crate::storage::StoreReader;

/// Returns the entity `record` should be linked to, or `None` if a new
/// entity is needed.
///
/// A location that cannot be read as coordinates and an unrecognised
/// observation tag are logged and reported as no match.
///
/// # Errors
/// Only store failures are returned.
pub fn find_match<R: StoreReader + ?Sized>(
    reader: &R,
    record: &ObservationRecord,
) -> Result<Option<Entity>, ResolutionError> {
    let observation = &record.observation;

    if let Err(source) = record.event.location.coordinates() {
        let err = ResolutionError::MalformedLocation {
            observation_id: observation.id,
            source,
        };
        warn!(observation_id = %observation.id, error = %err, "no match");
        return Ok(None);
    }

    match &observation.kind {
        ObservationKind::Asset => match_asset(reader, observation),
        ObservationKind::Facility
        | ObservationKind::Resource
        | ObservationKind::Transport
        | ObservationKind::Extent => Ok(None),
        ObservationKind::Unknown(tag) => {
            let err = ResolutionError::UnknownObservationType {
                observation_id: observation.id,
                tag: tag.clone(),
            };
            debug!(observation_id = %observation.id, error = %err, "no match");
            Ok(None)
        }
    }
}

fn match_asset<R: StoreReader + ?Sized>(
    reader: &R,
    observation: &Observation,
) -> Result<Option<Entity>, ResolutionError> {
    match observation.identifier() {
        IdentifierRef::Absent => Ok(None),
        IdentifierRef::Multiple(count) => {
            info!(
                observation_id = %observation.id,
                count,
                "asset_id is a list; identifier lists are not matched"
            );
            Ok(None)
        }
        IdentifierRef::Single { text, .. } => {
            let canonical = canonicalize(text);
            let candidates = reader.entities_by_identifier(&canonical, EntityType::Asset)?;
            if candidates.len() > 1 {
                warn!(
                    observation_id = %observation.id,
                    identifier = %canonical,
                    candidates = candidates.len(),
                    "identifier shared by several assets; taking the lowest id"
                );
            }
            Ok(candidates.into_iter().min_by_key(|entity| entity.id))
        }
    }
}
