//! In-memory storage backend.
//!
//! This module provides a thread-safe in-memory implementation of
//! [`ResolutionStore`]. It is intended for embedded usage, tests, and as the
//! reference implementation; the durable backend wraps it with a journal.
//!
//! A transaction holds the store's write lock from `begin` until it is
//! committed or dropped, so transactions are fully serialized. Writes are
//! applied eagerly and undone in reverse order on rollback.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::entity::{
    Entity, EntityId, EntityIdentifier, EntityLink, EntityType, IdentifierId, LinkStatus,
    NewIdentifier,
};
use crate::ingest::NewEvent;
use crate::observation::{
    Coordinates, EventId, Geometry, Observation, ObservationEvent, ObservationId, ObservationRecord,
};
use crate::storage::mutation::Mutation;
use crate::storage::traits::{
    Claim, ClaimRequest, ResolutionStore, RunId, StorageError, StoreReader, Transaction,
};

fn lock_err(context: &'static str) -> StorageError {
    StorageError::BackendError(format!("poisoned lock: {context}"))
}

/// Durable sink for committed mutations.
///
/// `append` is called once per commit with all of the transaction's writes,
/// while the store's write lock is still held. An error aborts the commit and
/// rolls the transaction back.
pub trait Journal: Send + Sync + fmt::Debug {
    /// Record one committed transaction.
    fn append(&self, writes: &[Mutation]) -> Result<(), StorageError>;
}

impl<J: Journal + ?Sized> Journal for std::sync::Arc<J> {
    fn append(&self, writes: &[Mutation]) -> Result<(), StorageError> {
        (**self).append(writes)
    }
}

type LinkKey = (EntityId, ObservationId);

/// Inverse of an applied [`Mutation`].
#[derive(Debug)]
enum Undo {
    Event {
        event_id: EventId,
        observation_ids: Vec<ObservationId>,
    },
    Entity(EntityId),
    EntityState {
        previous: Entity,
        was_pending: bool,
    },
    Link {
        key: LinkKey,
        was_pending: bool,
    },
    LinkStatus {
        key: LinkKey,
        previous: LinkStatus,
        was_pending: bool,
    },
    Identifier(IdentifierId),
}

#[derive(Debug, Default)]
struct StoreState {
    events: BTreeMap<EventId, ObservationEvent>,
    observations: BTreeMap<ObservationId, Observation>,
    entities: BTreeMap<EntityId, Entity>,
    identifiers: BTreeMap<IdentifierId, EntityIdentifier>,
    identifiers_by_canonical: HashMap<String, BTreeSet<IdentifierId>>,
    identifiers_by_entity: HashMap<EntityId, BTreeSet<IdentifierId>>,
    links: BTreeMap<LinkKey, EntityLink>,
    links_by_observation: HashMap<ObservationId, BTreeSet<EntityId>>,
    pending_synthesis: BTreeSet<EntityId>,
    claims: HashMap<ObservationId, Claim>,
    last_event_id: u64,
    last_observation_id: u64,
    last_entity_id: u64,
    last_identifier_id: u64,
}

impl StoreState {
    fn set_pending(&mut self, id: EntityId, pending: bool) {
        if pending {
            self.pending_synthesis.insert(id);
        } else {
            self.pending_synthesis.remove(&id);
        }
    }

    fn has_active_link(&self, observation_id: ObservationId) -> bool {
        self.links_by_observation
            .get(&observation_id)
            .map_or(false, |entities| {
                entities.iter().any(|entity_id| {
                    self.links
                        .get(&(*entity_id, observation_id))
                        .map_or(false, EntityLink::is_active)
                })
            })
    }

    fn apply(&mut self, mutation: &Mutation) -> Result<Undo, StorageError> {
        match mutation {
            Mutation::EventIngested {
                event,
                observations,
            } => {
                if self.events.contains_key(&event.id) {
                    return Err(StorageError::UniqueViolation(format!("event {}", event.id)));
                }
                if let Some(dup) = observations
                    .iter()
                    .find(|o| self.observations.contains_key(&o.id))
                {
                    return Err(StorageError::UniqueViolation(format!(
                        "observation {}",
                        dup.id
                    )));
                }

                self.last_event_id = self.last_event_id.max(event.id.get());
                self.events.insert(event.id, event.clone());
                let mut observation_ids = Vec::with_capacity(observations.len());
                for observation in observations {
                    self.last_observation_id = self.last_observation_id.max(observation.id.get());
                    observation_ids.push(observation.id);
                    self.observations.insert(observation.id, observation.clone());
                }
                Ok(Undo::Event {
                    event_id: event.id,
                    observation_ids,
                })
            }
            Mutation::EntityCreated(entity) => {
                if self.entities.contains_key(&entity.id) {
                    return Err(StorageError::UniqueViolation(format!("entity {}", entity.id)));
                }
                self.last_entity_id = self.last_entity_id.max(entity.id.get());
                self.entities.insert(entity.id, entity.clone());
                Ok(Undo::Entity(entity.id))
            }
            Mutation::EntitySynthesized(entity) => {
                let previous = self
                    .entities
                    .insert(entity.id, entity.clone())
                    .ok_or(StorageError::EntityNotFound(entity.id))?;
                let was_pending = self.pending_synthesis.remove(&entity.id);
                Ok(Undo::EntityState {
                    previous,
                    was_pending,
                })
            }
            Mutation::LinkInserted(link) => {
                if !self.entities.contains_key(&link.entity_id) {
                    return Err(StorageError::EntityNotFound(link.entity_id));
                }
                if !self.observations.contains_key(&link.observation_id) {
                    return Err(StorageError::ObservationNotFound(link.observation_id));
                }
                let key = link.key();
                if self.links.contains_key(&key) {
                    return Err(StorageError::UniqueViolation(format!(
                        "link entity {} / observation {}",
                        link.entity_id, link.observation_id
                    )));
                }
                self.links.insert(key, link.clone());
                self.links_by_observation
                    .entry(link.observation_id)
                    .or_default()
                    .insert(link.entity_id);
                let was_pending = !self.pending_synthesis.insert(link.entity_id);
                Ok(Undo::Link { key, was_pending })
            }
            Mutation::LinkStatusChanged {
                entity_id,
                observation_id,
                status,
            } => {
                let key = (*entity_id, *observation_id);
                let link = self.links.get_mut(&key).ok_or(StorageError::LinkNotFound {
                    entity_id: *entity_id,
                    observation_id: *observation_id,
                })?;
                let previous = link.status;
                link.status = *status;
                let was_pending = !self.pending_synthesis.insert(*entity_id);
                Ok(Undo::LinkStatus {
                    key,
                    previous,
                    was_pending,
                })
            }
            Mutation::IdentifierInserted(identifier) => {
                if !self.entities.contains_key(&identifier.entity_id) {
                    return Err(StorageError::EntityNotFound(identifier.entity_id));
                }
                if self.identifiers.contains_key(&identifier.id) {
                    return Err(StorageError::UniqueViolation(format!(
                        "identifier {}",
                        identifier.id
                    )));
                }
                let duplicate = self
                    .identifiers_by_entity
                    .get(&identifier.entity_id)
                    .into_iter()
                    .flatten()
                    .filter_map(|id| self.identifiers.get(id))
                    .any(|existing| {
                        existing.issuer_type == identifier.issuer_type
                            && existing.identifier_canonical == identifier.identifier_canonical
                    });
                if duplicate {
                    return Err(StorageError::UniqueViolation(format!(
                        "identifier '{}' ({}) on entity {}",
                        identifier.identifier_canonical, identifier.issuer_type, identifier.entity_id
                    )));
                }

                self.last_identifier_id = self.last_identifier_id.max(identifier.id.get());
                self.identifiers_by_canonical
                    .entry(identifier.identifier_canonical.clone())
                    .or_default()
                    .insert(identifier.id);
                self.identifiers_by_entity
                    .entry(identifier.entity_id)
                    .or_default()
                    .insert(identifier.id);
                self.identifiers.insert(identifier.id, identifier.clone());
                Ok(Undo::Identifier(identifier.id))
            }
        }
    }

    fn revert(&mut self, undo: Undo) {
        match undo {
            Undo::Event {
                event_id,
                observation_ids,
            } => {
                self.events.remove(&event_id);
                for id in observation_ids {
                    self.observations.remove(&id);
                }
            }
            Undo::Entity(id) => {
                self.entities.remove(&id);
            }
            Undo::EntityState {
                previous,
                was_pending,
            } => {
                self.set_pending(previous.id, was_pending);
                self.entities.insert(previous.id, previous);
            }
            Undo::Link { key, was_pending } => {
                self.links.remove(&key);
                if let Some(entities) = self.links_by_observation.get_mut(&key.1) {
                    entities.remove(&key.0);
                    if entities.is_empty() {
                        self.links_by_observation.remove(&key.1);
                    }
                }
                self.set_pending(key.0, was_pending);
            }
            Undo::LinkStatus {
                key,
                previous,
                was_pending,
            } => {
                if let Some(link) = self.links.get_mut(&key) {
                    link.status = previous;
                }
                self.set_pending(key.0, was_pending);
            }
            Undo::Identifier(id) => {
                if let Some(identifier) = self.identifiers.remove(&id) {
                    if let Some(ids) = self
                        .identifiers_by_canonical
                        .get_mut(&identifier.identifier_canonical)
                    {
                        ids.remove(&id);
                        if ids.is_empty() {
                            self.identifiers_by_canonical
                                .remove(&identifier.identifier_canonical);
                        }
                    }
                    if let Some(ids) = self.identifiers_by_entity.get_mut(&identifier.entity_id) {
                        ids.remove(&id);
                    }
                }
            }
        }
    }
}

impl StoreReader for StoreState {
    fn observation(&self, id: ObservationId) -> Result<Option<ObservationRecord>, StorageError> {
        let Some(observation) = self.observations.get(&id) else {
            return Ok(None);
        };
        let event = self.events.get(&observation.event_id).ok_or_else(|| {
            StorageError::BackendError(format!(
                "observation {id} references missing event {}",
                observation.event_id
            ))
        })?;
        Ok(Some(ObservationRecord {
            observation: observation.clone(),
            event: event.clone(),
        }))
    }

    fn entity(&self, id: EntityId) -> Result<Option<Entity>, StorageError> {
        Ok(self.entities.get(&id).cloned())
    }

    fn entities_by_identifier(
        &self,
        canonical: &str,
        entity_type: EntityType,
    ) -> Result<Vec<Entity>, StorageError> {
        let Some(ids) = self.identifiers_by_canonical.get(canonical) else {
            return Ok(Vec::new());
        };

        let entity_ids: BTreeSet<EntityId> = ids
            .iter()
            .filter_map(|id| self.identifiers.get(id))
            .map(|identifier| identifier.entity_id)
            .collect();

        Ok(entity_ids
            .into_iter()
            .filter_map(|id| self.entities.get(&id))
            .filter(|entity| entity.entity_type == entity_type)
            .cloned()
            .collect())
    }

    fn identifiers(&self, entity_id: EntityId) -> Result<Vec<EntityIdentifier>, StorageError> {
        Ok(self
            .identifiers_by_entity
            .get(&entity_id)
            .into_iter()
            .flatten()
            .filter_map(|id| self.identifiers.get(id).cloned())
            .collect())
    }

    fn links_for_entity(&self, entity_id: EntityId) -> Result<Vec<EntityLink>, StorageError> {
        let from = (entity_id, ObservationId::new(0));
        let to = (entity_id, ObservationId::new(u64::MAX));
        Ok(self.links.range(from..=to).map(|(_, link)| link.clone()).collect())
    }

    fn links_for_observation(
        &self,
        observation_id: ObservationId,
    ) -> Result<Vec<EntityLink>, StorageError> {
        Ok(self
            .links_by_observation
            .get(&observation_id)
            .into_iter()
            .flatten()
            .filter_map(|entity_id| self.links.get(&(*entity_id, observation_id)).cloned())
            .collect())
    }
}

/// Row counts, for reporting and tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreCounts {
    /// Ingested events.
    pub events: usize,
    /// Ingested observations.
    pub observations: usize,
    /// Entities, including ones never synthesized.
    pub entities: usize,
    /// Links of any status.
    pub links: usize,
    /// Identifier rows.
    pub identifiers: usize,
}

/// Thread-safe in-memory resolution store.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    state: RwLock<StoreState>,
    journal: Option<Box<dyn Journal>>,
}

impl InMemoryStore {
    /// Create a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty store that reports every commit to `journal`.
    #[must_use]
    pub fn with_journal(journal: Box<dyn Journal>) -> Self {
        Self {
            state: RwLock::default(),
            journal: Some(journal),
        }
    }

    /// Apply previously committed writes without journaling them again.
    ///
    /// # Errors
    /// Fails if a mutation violates a store constraint; the store is left
    /// with every mutation before the failing one applied.
    pub fn replay(&self, writes: &[Mutation]) -> Result<(), StorageError> {
        let mut state = self.state.write().map_err(|_| lock_err("store.replay"))?;
        for mutation in writes {
            state.apply(mutation)?;
        }
        Ok(())
    }

    /// Store an ingested event and its observations in one transaction.
    ///
    /// A numeric location also yields the event's point geometry.
    ///
    /// # Errors
    /// Propagates journal failures.
    pub fn ingest(&self, new_event: NewEvent) -> Result<(EventId, Vec<ObservationId>), StorageError> {
        let mut tx = self.transaction()?;

        let event_id = EventId::new(tx.state.last_event_id + 1);
        let first_observation = tx.state.last_observation_id + 1;
        let observations: Vec<Observation> = new_event
            .observations
            .into_iter()
            .zip(first_observation..)
            .map(|(new, raw_id)| Observation {
                id: ObservationId::new(raw_id),
                event_id,
                kind: new.kind,
                payload: new.payload,
                geometry: new.geometry,
            })
            .collect();
        let observation_ids = observations.iter().map(|o| o.id).collect();

        let geometry = new_event
            .location
            .coordinates()
            .ok()
            .filter(Coordinates::in_range)
            .map(Geometry::point);
        let event = ObservationEvent {
            id: event_id,
            observer: new_event.observer,
            source: new_event.source,
            observed_at: new_event.observed_at,
            submitted_at: new_event.submitted_at,
            location: new_event.location,
            observation_count: u32::try_from(observations.len()).unwrap_or(u32::MAX),
            geometry,
        };

        tx.write(Mutation::EventIngested {
            event,
            observations,
        })?;
        tx.finish()?;
        Ok((event_id, observation_ids))
    }

    /// Read-only view over committed state.
    ///
    /// # Errors
    /// Fails only on a poisoned lock.
    pub fn snapshot(&self) -> Result<MemorySnapshot<'_>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("store.snapshot"))?;
        Ok(MemorySnapshot { state })
    }

    /// Current row counts.
    ///
    /// # Errors
    /// Fails only on a poisoned lock.
    pub fn counts(&self) -> Result<StoreCounts, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("store.counts"))?;
        Ok(StoreCounts {
            events: state.events.len(),
            observations: state.observations.len(),
            entities: state.entities.len(),
            links: state.links.len(),
            identifiers: state.identifiers.len(),
        })
    }

    fn transaction(&self) -> Result<MemoryTransaction<'_>, StorageError> {
        let state = self.state.write().map_err(|_| lock_err("store.begin"))?;
        Ok(MemoryTransaction {
            state,
            journal: self.journal.as_deref(),
            writes: Vec::new(),
            undo: Vec::new(),
            finished: false,
        })
    }
}

impl ResolutionStore for InMemoryStore {
    fn claim_unresolved(&self, request: &ClaimRequest) -> Result<Vec<ObservationId>, StorageError> {
        let mut state = self.state.write().map_err(|_| lock_err("store.claim"))?;
        let limit = request.limit.unwrap_or(usize::MAX);

        let candidates: Vec<ObservationId> = state
            .observations
            .keys()
            .copied()
            .filter(|id| !state.has_active_link(*id))
            .filter(|id| {
                state.claims.get(id).map_or(true, |claim| {
                    claim.run_id == request.run_id || !claim.is_live(request.now, request.ttl)
                })
            })
            .take(limit)
            .collect();

        for id in &candidates {
            if let Some(previous) = state.claims.insert(
                *id,
                Claim {
                    run_id: request.run_id,
                    claimed_at: request.now,
                },
            ) {
                if previous.run_id != request.run_id {
                    debug!(observation_id = %id, previous_run = %previous.run_id, "took over expired claim");
                }
            }
        }
        Ok(candidates)
    }

    fn release_claim(
        &self,
        run_id: RunId,
        observation_id: ObservationId,
    ) -> Result<(), StorageError> {
        let mut state = self.state.write().map_err(|_| lock_err("store.release"))?;
        if state
            .claims
            .get(&observation_id)
            .map_or(false, |claim| claim.run_id == run_id)
        {
            state.claims.remove(&observation_id);
        }
        Ok(())
    }

    fn pending_synthesis(&self) -> Result<Vec<EntityId>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("store.pending"))?;
        Ok(state.pending_synthesis.iter().copied().collect())
    }

    fn begin(&self) -> Result<Box<dyn Transaction + '_>, StorageError> {
        Ok(Box::new(self.transaction()?))
    }
}

/// Read-only view holding the store's read lock.
pub struct MemorySnapshot<'a> {
    state: RwLockReadGuard<'a, StoreState>,
}

impl MemorySnapshot<'_> {
    /// All entities, ascending by id.
    #[must_use]
    pub fn entities(&self) -> Vec<Entity> {
        self.state.entities.values().cloned().collect()
    }

    /// All links, ascending by (entity, observation).
    #[must_use]
    pub fn links(&self) -> Vec<EntityLink> {
        self.state.links.values().cloned().collect()
    }

    /// Observation ids without an active link.
    #[must_use]
    pub fn unresolved(&self) -> Vec<ObservationId> {
        self.state
            .observations
            .keys()
            .copied()
            .filter(|id| !self.state.has_active_link(*id))
            .collect()
    }
}

impl StoreReader for MemorySnapshot<'_> {
    fn observation(&self, id: ObservationId) -> Result<Option<ObservationRecord>, StorageError> {
        self.state.observation(id)
    }

    fn entity(&self, id: EntityId) -> Result<Option<Entity>, StorageError> {
        self.state.entity(id)
    }

    fn entities_by_identifier(
        &self,
        canonical: &str,
        entity_type: EntityType,
    ) -> Result<Vec<Entity>, StorageError> {
        self.state.entities_by_identifier(canonical, entity_type)
    }

    fn identifiers(&self, entity_id: EntityId) -> Result<Vec<EntityIdentifier>, StorageError> {
        self.state.identifiers(entity_id)
    }

    fn links_for_entity(&self, entity_id: EntityId) -> Result<Vec<EntityLink>, StorageError> {
        self.state.links_for_entity(entity_id)
    }

    fn links_for_observation(
        &self,
        observation_id: ObservationId,
    ) -> Result<Vec<EntityLink>, StorageError> {
        self.state.links_for_observation(observation_id)
    }
}

/// Transaction over an [`InMemoryStore`].
pub struct MemoryTransaction<'a> {
    state: RwLockWriteGuard<'a, StoreState>,
    journal: Option<&'a dyn Journal>,
    writes: Vec<Mutation>,
    undo: Vec<Undo>,
    finished: bool,
}

impl MemoryTransaction<'_> {
    fn write(&mut self, mutation: Mutation) -> Result<(), StorageError> {
        let undo = self.state.apply(&mutation)?;
        self.undo.push(undo);
        self.writes.push(mutation);
        Ok(())
    }

    fn finish(mut self) -> Result<(), StorageError> {
        if !self.writes.is_empty() {
            if let Some(journal) = self.journal {
                // On failure `self` drops unfinished and rolls back.
                journal.append(&self.writes)?;
            }
        }
        self.finished = true;
        Ok(())
    }

    fn rollback(&mut self) {
        let undone = self.undo.len();
        while let Some(undo) = self.undo.pop() {
            self.state.revert(undo);
        }
        self.writes.clear();
        if undone > 0 {
            debug!(writes = undone, "transaction rolled back");
        }
    }
}

impl Drop for MemoryTransaction<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.rollback();
        }
    }
}

impl StoreReader for MemoryTransaction<'_> {
    fn observation(&self, id: ObservationId) -> Result<Option<ObservationRecord>, StorageError> {
        self.state.observation(id)
    }

    fn entity(&self, id: EntityId) -> Result<Option<Entity>, StorageError> {
        self.state.entity(id)
    }

    fn entities_by_identifier(
        &self,
        canonical: &str,
        entity_type: EntityType,
    ) -> Result<Vec<Entity>, StorageError> {
        self.state.entities_by_identifier(canonical, entity_type)
    }

    fn identifiers(&self, entity_id: EntityId) -> Result<Vec<EntityIdentifier>, StorageError> {
        self.state.identifiers(entity_id)
    }

    fn links_for_entity(&self, entity_id: EntityId) -> Result<Vec<EntityLink>, StorageError> {
        self.state.links_for_entity(entity_id)
    }

    fn links_for_observation(
        &self,
        observation_id: ObservationId,
    ) -> Result<Vec<EntityLink>, StorageError> {
        self.state.links_for_observation(observation_id)
    }
}

impl Transaction for MemoryTransaction<'_> {
    fn create_entity(
        &mut self,
        entity_type: EntityType,
        now: DateTime<Utc>,
    ) -> Result<Entity, StorageError> {
        let id = EntityId::new(self.state.last_entity_id + 1);
        let entity = Entity::new(id, entity_type, now);
        self.write(Mutation::EntityCreated(entity.clone()))?;
        Ok(entity)
    }

    fn insert_link(&mut self, link: EntityLink) -> Result<(), StorageError> {
        self.write(Mutation::LinkInserted(link))
    }

    fn set_link_status(
        &mut self,
        entity_id: EntityId,
        observation_id: ObservationId,
        status: LinkStatus,
    ) -> Result<(), StorageError> {
        self.write(Mutation::LinkStatusChanged {
            entity_id,
            observation_id,
            status,
        })
    }

    fn insert_identifier(
        &mut self,
        identifier: NewIdentifier,
    ) -> Result<EntityIdentifier, StorageError> {
        let id = IdentifierId::new(self.state.last_identifier_id + 1);
        let row = identifier.into_identifier(id);
        self.write(Mutation::IdentifierInserted(row.clone()))?;
        Ok(row)
    }

    fn save_synthesized(&mut self, entity: &Entity) -> Result<(), StorageError> {
        self.write(Mutation::EntitySynthesized(entity.clone()))
    }

    fn commit(self: Box<Self>) -> Result<(), StorageError> {
        (*self).finish()
    }
}
