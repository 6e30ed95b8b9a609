//! Error types for the resolution engine.
//!
//! Storage failures are [`StorageError`]; everything the engine itself can
//! report is a [`ResolutionError`]. Most resolution errors are scoped to one
//! observation and only logged by the driver; [`ResolutionError::is_batch_fatal`]
//! tells the driver when to stop the run instead.

use thiserror::Error;

use crate::entity::EntityId;
use crate::observation::{LocationError, ObservationId};
use crate::storage::StorageError;

/// Errors raised while resolving or synthesizing.
#[derive(Debug, Error)]
pub enum ResolutionError {
    #[error("Observation {observation_id} has a malformed location: {source}")]
    MalformedLocation {
        observation_id: ObservationId,
        #[source]
        source: LocationError,
    },

    #[error("Link entity {entity_id} / observation {observation_id} already exists")]
    DuplicateLink {
        entity_id: EntityId,
        observation_id: ObservationId,
    },

    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Observation {observation_id} has unknown type '{tag}'")]
    UnknownObservationType {
        observation_id: ObservationId,
        tag: String,
    },

    #[error("Observation not found: {0}")]
    ObservationNotFound(ObservationId),

    #[error("Invalid resolver configuration: {0}")]
    InvalidConfig(String),

    #[error("Storage error: {0}")]
    Storage(StorageError),
}

impl ResolutionError {
    /// Returns true if the run must stop: nothing else in the batch can make
    /// progress.
    #[must_use]
    pub const fn is_batch_fatal(&self) -> bool {
        matches!(self, Self::StoreUnavailable(_))
    }

    /// Returns true if only this observation is affected.
    #[must_use]
    pub const fn is_item_scoped(&self) -> bool {
        !self.is_batch_fatal() && !matches!(self, Self::InvalidConfig(_))
    }
}

impl From<StorageError> for ResolutionError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Unavailable(message) => Self::StoreUnavailable(message),
            StorageError::ObservationNotFound(id) => Self::ObservationNotFound(id),
            other => Self::Storage(other),
        }
    }
}

/// Result type alias for resolution operations.
pub type ResolutionResult<T> = Result<T, ResolutionError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unavailable_store_is_fatal() {
        let err: ResolutionError = StorageError::Unavailable("disk full".to_string()).into();
        assert!(matches!(err, ResolutionError::StoreUnavailable(_)));
        assert!(err.is_batch_fatal());
        assert!(err.to_string().contains("disk full"));
    }

    #[test]
    fn test_item_errors_are_not_fatal() {
        let dup = ResolutionError::DuplicateLink {
            entity_id: EntityId::new(1),
            observation_id: ObservationId::new(2),
        };
        assert!(!dup.is_batch_fatal());
        assert!(dup.is_item_scoped());

        let storage: ResolutionError =
            StorageError::UniqueViolation("identifier".to_string()).into();
        assert!(matches!(storage, ResolutionError::Storage(_)));
        assert!(!storage.is_batch_fatal());
    }

    #[test]
    fn test_missing_observation_maps_through() {
        let err: ResolutionError = StorageError::ObservationNotFound(ObservationId::new(9)).into();
        assert!(matches!(err, ResolutionError::ObservationNotFound(id) if id.get() == 9));
    }

    #[test]
    fn test_malformed_location_display() {
        let err = ResolutionError::MalformedLocation {
            observation_id: ObservationId::new(3),
            source: LocationError::NotAnObject,
        };
        assert!(err.to_string().contains("malformed location"));
    }

    #[test]
    fn test_invalid_config_is_not_item_scoped() {
        let err = ResolutionError::InvalidConfig("batch_limit must be positive".to_string());
        assert!(!err.is_item_scoped());
        assert!(!err.is_batch_fatal());
    }
}
