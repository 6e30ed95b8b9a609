//! External identifiers attached to entities.
//!
//! Identifiers come from different issuers:
//! - government-issued (license plates)
//! - manufacturer-issued (serial numbers, VINs)
//! - operator-issued (asset tags, container codes, fleet numbers)
//! - end-user-issued (nicknames, common names)
//!
//! An entity's identifiers form a set keyed by (canonical text, issuer type).

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::canonical::canonicalize;
use crate::entity::EntityId;

/// Store-assigned identifier row id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdentifierId(u64);

impl IdentifierId {
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

impl fmt::Display for IdentifierId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Who issued an identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IssuerType {
    Government,
    Manufacturer,
    Operator,
    EndUser,
}

impl fmt::Display for IssuerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Government => "government",
            Self::Manufacturer => "manufacturer",
            Self::Operator => "operator",
            Self::EndUser => "end-user",
        })
    }
}

/// An identifier waiting to be stored.
///
/// The canonical text is computed on construction, so every stored
/// identifier satisfies `identifier_canonical == canonicalize(identifier)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewIdentifier {
    entity_id: EntityId,
    issuer_type: IssuerType,
    issuer: Option<String>,
    identifier: String,
    identifier_canonical: String,
}

impl NewIdentifier {
    /// Builds a candidate identifier for `entity_id` from raw text.
    #[must_use]
    pub fn new(entity_id: EntityId, issuer_type: IssuerType, raw: impl Into<String>) -> Self {
        let identifier = raw.into();
        let identifier_canonical = canonicalize(&identifier);
        Self {
            entity_id,
            issuer_type,
            issuer: None,
            identifier,
            identifier_canonical,
        }
    }

    /// Records the issuing scheme or authority.
    #[must_use]
    pub fn issuer(mut self, issuer: impl Into<String>) -> Self {
        self.issuer = Some(issuer.into());
        self
    }

    /// Entity this identifier will attach to.
    #[must_use]
    pub const fn entity_id(&self) -> EntityId {
        self.entity_id
    }

    /// Canonical text.
    #[must_use]
    pub fn canonical(&self) -> &str {
        &self.identifier_canonical
    }

    /// Issuer type.
    #[must_use]
    pub const fn issuer_type(&self) -> IssuerType {
        self.issuer_type
    }

    /// Finalizes the row with a store-assigned id.
    #[must_use]
    pub fn into_identifier(self, id: IdentifierId) -> EntityIdentifier {
        EntityIdentifier {
            id,
            entity_id: self.entity_id,
            issuer_type: self.issuer_type,
            issuer: self.issuer,
            identifier: self.identifier,
            identifier_canonical: self.identifier_canonical,
        }
    }
}

/// A stored external identifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityIdentifier {
    pub id: IdentifierId,
    pub entity_id: EntityId,
    pub issuer_type: IssuerType,
    #[serde(default)]
    pub issuer: Option<String>,
    /// Raw text as observed.
    pub identifier: String,
    /// `canonicalize(identifier)`.
    pub identifier_canonical: String,
}

impl EntityIdentifier {
    /// True when this row is the same set member as `candidate`.
    #[must_use]
    pub fn same_key(&self, candidate: &NewIdentifier) -> bool {
        self.entity_id == candidate.entity_id
            && self.issuer_type == candidate.issuer_type
            && self.identifier_canonical == candidate.identifier_canonical
    }
}
