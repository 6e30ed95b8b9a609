//! Entity types and identity.
//!
//! An entity is the canonical real-world object that observations serve as
//! evidence for. Its derived fields (`data`, `geometry`,
//! `latest_observation_at`) are owned by the synthesizer and recomputed from
//! scratch on every synthesis.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::observation::{Geometry, ObservationKind, Payload};

/// Store-assigned, totally ordered entity identifier.
///
/// When store drift leaves several entities sharing one identifier, the
/// matcher picks the lowest `EntityId`, so ordering is part of the contract.
///
/// # Examples
///
/// ```
/// use platon::EntityId;
///
/// assert!(EntityId::new(3) < EntityId::new(10));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(u64);

impl EntityId {
    /// Wraps a raw store id.
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw store id.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Classification of entities.
///
/// Mirrors [`ObservationKind`]; observations with an unrecognised tag produce
/// [`EntityType::Unclassified`] entities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum EntityType {
    /// A movable asset.
    Asset,
    /// A fixed facility.
    Facility,
    /// A natural resource.
    Resource,
    /// A transport movement.
    Transport,
    /// A human-defined area.
    Extent,
    /// Created from an observation with an unrecognised tag.
    Unclassified,
}

impl EntityType {
    /// Returns the stored tag.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Asset => "asset",
            Self::Facility => "facility",
            Self::Resource => "resource",
            Self::Transport => "transport",
            Self::Extent => "extent",
            Self::Unclassified => "unclassified",
        }
    }
}

impl From<&ObservationKind> for EntityType {
    fn from(kind: &ObservationKind) -> Self {
        match kind {
            ObservationKind::Asset => Self::Asset,
            ObservationKind::Facility => Self::Facility,
            ObservationKind::Resource => Self::Resource,
            ObservationKind::Transport => Self::Transport,
            ObservationKind::Extent => Self::Extent,
            ObservationKind::Unknown(_) => Self::Unclassified,
        }
    }
}

impl TryFrom<String> for EntityType {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        let value = value.trim();
        Ok(if value.eq_ignore_ascii_case("asset") {
            Self::Asset
        } else if value.eq_ignore_ascii_case("facility") {
            Self::Facility
        } else if value.eq_ignore_ascii_case("resource") {
            Self::Resource
        } else if value.eq_ignore_ascii_case("transport") {
            Self::Transport
        } else if value.eq_ignore_ascii_case("extent") {
            Self::Extent
        } else if value.eq_ignore_ascii_case("unclassified") {
            Self::Unclassified
        } else {
            return Err(format!(
                "unknown entity type: {value}. Expected one of asset, facility, resource, transport, extent, unclassified"
            ));
        })
    }
}

impl From<EntityType> for String {
    fn from(value: EntityType) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The canonical record for a real-world object.
///
/// # Examples
///
/// ```
/// use chrono::Utc;
/// use platon::{Entity, EntityId, EntityType};
///
/// let now = Utc::now();
/// let entity = Entity::new(EntityId::new(1), EntityType::Asset, now);
/// assert!(entity.data.is_empty());
/// assert!(entity.geometry.is_none());
/// assert_eq!(entity.created_at, entity.updated_at);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
    /// Store-assigned identifier.
    pub id: EntityId,

    /// The type classification of the entity.
    pub entity_type: EntityType,

    /// Geometry of the most recent linked observation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub geometry: Option<Geometry>,

    /// Payload fields merged from linked observations, newest first.
    #[serde(default)]
    pub data: Payload,

    /// When the entity was first created.
    pub created_at: DateTime<Utc>,

    /// When the entity was last written.
    pub updated_at: DateTime<Utc>,

    /// `observed_at` of the most recent active linked observation.
    #[serde(default)]
    pub latest_observation_at: Option<DateTime<Utc>>,
}

impl Entity {
    /// Creates a fresh, unsynthesized entity.
    #[must_use]
    pub fn new(id: EntityId, entity_type: EntityType, now: DateTime<Utc>) -> Self {
        Self {
            id,
            entity_type,
            geometry: None,
            data: Payload::new(),
            created_at: now,
            updated_at: now,
            latest_observation_at: None,
        }
    }
}

impl PartialEq for Entity {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Entity {}

impl std::hash::Hash for Entity {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}
