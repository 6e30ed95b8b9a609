//! Store mutations.
//!
//! Every write a transaction performs is expressed as a [`Mutation`]. The
//! in-memory backend applies them to its indexes; the durable backend also
//! appends each committed transaction's mutations to its write-ahead log and
//! replays them on open.

use serde::{Deserialize, Serialize};

use crate::entity::{Entity, EntityId, EntityIdentifier, EntityLink, LinkStatus};
use crate::observation::{Observation, ObservationEvent, ObservationId};

/// A single committed write.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Mutation {
    /// An event and its observations were loaded from ingestion.
    EventIngested {
        event: ObservationEvent,
        observations: Vec<Observation>,
    },
    /// A new entity was created.
    EntityCreated(Entity),
    /// An entity's derived state was rewritten by synthesis.
    EntitySynthesized(Entity),
    /// A link was inserted.
    LinkInserted(EntityLink),
    /// A link's status was corrected.
    LinkStatusChanged {
        entity_id: EntityId,
        observation_id: ObservationId,
        status: LinkStatus,
    },
    /// An identifier was attached to an entity.
    IdentifierInserted(EntityIdentifier),
}
