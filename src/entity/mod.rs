//! Entity layer modules.
//!
//! This module groups the canonical entity, its external identifiers, and the
//! many-to-many links that tie entities to the observations supporting them.

pub mod entity;
pub mod identifier;
pub mod link;

pub use entity::{Entity, EntityId, EntityType};
pub use identifier::{EntityIdentifier, IdentifierId, IssuerType, NewIdentifier};
pub use link::{EntityLink, LinkStatus};
