//! Entity ↔ observation links.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::entity::EntityId;
use crate::observation::ObservationId;

/// Link status. Inactive links are kept for audit but ignored by synthesis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkStatus {
    Active,
    Inactive,
}

/// Many-to-many join row between an entity and an observation.
///
/// The store enforces at most one row per (entity, observation) pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityLink {
    pub entity_id: EntityId,
    pub observation_id: ObservationId,
    pub status: LinkStatus,
    pub created_at: DateTime<Utc>,
}

impl EntityLink {
    /// A new active link created at `now`.
    #[must_use]
    pub fn active(entity_id: EntityId, observation_id: ObservationId, now: DateTime<Utc>) -> Self {
        Self {
            entity_id,
            observation_id,
            status: LinkStatus::Active,
            created_at: now,
        }
    }

    /// Returns true if the link counts as evidence.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.status == LinkStatus::Active
    }

    /// The uniqueness key.
    #[must_use]
    pub const fn key(&self) -> (EntityId, ObservationId) {
        (self.entity_id, self.observation_id)
    }
}
