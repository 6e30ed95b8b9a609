//! The resolution run.
//!
//! A run claims unresolved observations, then resolves each one in its own
//! transaction: match or create an entity, link, synthesize, commit. A
//! failure rolls back only that observation's transaction. Afterwards the
//! repair sweep re-synthesizes every entity the store still reports as
//! pending, which covers links written without synthesis by an interrupted
//! writer and links deactivated out of band.

use std::sync::Arc;

use chrono::{Duration, Utc};
use tracing::{debug, error, info, warn};

use crate::entity::EntityId;
use crate::error::ResolutionError;
use crate::observation::ObservationId;
use crate::storage::{ClaimRequest, ResolutionStore, RunId};

use super::{linker, matcher, synthesizer};

/// Configuration for a [`Resolver`].
#[derive(Debug, Clone)]
pub struct ResolverConfig {
    /// Age after which another run's claim is treated as abandoned.
    pub claim_ttl: Duration,
    /// Maximum number of observations claimed per run (`None` = all).
    pub batch_limit: Option<usize>,
    /// Whether to run the repair sweep after the batch.
    pub resynthesize_pending: bool,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            claim_ttl: Duration::minutes(30),
            batch_limit: None,
            resynthesize_pending: true,
        }
    }
}

impl ResolverConfig {
    /// Checks the configuration, returning it unchanged when valid.
    ///
    /// # Errors
    /// `InvalidConfig` if the claim TTL is not positive or the batch limit
    /// is zero.
    pub fn validate(self) -> Result<Self, ResolutionError> {
        if self.claim_ttl <= Duration::zero() {
            return Err(ResolutionError::InvalidConfig(format!(
                "claim_ttl must be positive (got {}s)",
                self.claim_ttl.num_seconds()
            )));
        }
        if self.batch_limit == Some(0) {
            return Err(ResolutionError::InvalidConfig(
                "batch_limit must be at least 1".to_string(),
            ));
        }
        Ok(self)
    }
}

/// Counters describing one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    /// Claim owner for this run.
    pub run_id: RunId,
    /// Observations claimed.
    pub claimed: usize,
    /// Observations linked to an existing entity.
    pub matched: usize,
    /// Observations that produced a new entity.
    pub created: usize,
    /// Observations skipped because the link already existed.
    pub duplicates: usize,
    /// Observations skipped after any other error.
    pub failed: usize,
    /// Entities re-synthesized by the repair sweep.
    pub resynthesized: usize,
    /// Entities the repair sweep could not synthesize.
    pub resynthesis_failed: usize,
}

impl RunReport {
    fn new(run_id: RunId) -> Self {
        Self {
            run_id,
            claimed: 0,
            matched: 0,
            created: 0,
            duplicates: 0,
            failed: 0,
            resynthesized: 0,
            resynthesis_failed: 0,
        }
    }

    /// Observations linked by this run.
    #[must_use]
    pub const fn resolved(&self) -> usize {
        self.matched + self.created
    }

    /// True when the run had nothing to do.
    #[must_use]
    pub const fn is_noop(&self) -> bool {
        self.claimed == 0 && self.resynthesized == 0 && self.resynthesis_failed == 0
    }
}

/// How an observation was resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// Linked to an existing entity.
    Matched(EntityId),
    /// Linked to a newly created entity.
    Created(EntityId),
}

impl Resolution {
    /// The entity the observation was linked to.
    #[must_use]
    pub const fn entity_id(self) -> EntityId {
        match self {
            Self::Matched(id) | Self::Created(id) => id,
        }
    }
}

/// Runs resolution passes against a store.
pub struct Resolver {
    store: Arc<dyn ResolutionStore>,
    config: ResolverConfig,
}

impl Resolver {
    /// Creates a resolver over `store`.
    ///
    /// # Errors
    /// `InvalidConfig` if `config` does not validate.
    pub fn new(
        store: Arc<dyn ResolutionStore>,
        config: ResolverConfig,
    ) -> Result<Self, ResolutionError> {
        Ok(Self {
            store,
            config: config.validate()?,
        })
    }

    /// The active configuration.
    #[must_use]
    pub const fn config(&self) -> &ResolverConfig {
        &self.config
    }

    /// Performs one resolution pass.
    ///
    /// Per-observation failures are logged and counted in the report.
    ///
    /// # Errors
    /// Returns only batch-fatal errors (the store became unavailable). Claims
    /// still held at that point expire after the claim TTL.
    pub fn run(&self) -> Result<RunReport, ResolutionError> {
        let run_id = RunId::new();
        let mut report = RunReport::new(run_id);

        let claimed = self.store.claim_unresolved(&ClaimRequest {
            run_id,
            now: Utc::now(),
            ttl: self.config.claim_ttl,
            limit: self.config.batch_limit,
        })?;
        report.claimed = claimed.len();
        info!(%run_id, claimed = claimed.len(), "resolution run started");

        for observation_id in claimed {
            let outcome = self.resolve(observation_id);
            self.store.release_claim(run_id, observation_id)?;

            match outcome {
                Ok(Resolution::Matched(entity_id)) => {
                    debug!(%run_id, %observation_id, %entity_id, "matched");
                    report.matched += 1;
                }
                Ok(Resolution::Created(entity_id)) => {
                    debug!(%run_id, %observation_id, %entity_id, "created");
                    report.created += 1;
                }
                Err(err) if err.is_batch_fatal() => {
                    error!(%run_id, %observation_id, error = %err, "aborting run");
                    return Err(err);
                }
                Err(err @ ResolutionError::DuplicateLink { .. }) => {
                    warn!(%run_id, %observation_id, error = %err, "skipping observation");
                    report.duplicates += 1;
                }
                Err(err) => {
                    warn!(%run_id, %observation_id, error = %err, "skipping observation");
                    report.failed += 1;
                }
            }
        }

        if self.config.resynthesize_pending {
            self.repair(&mut report)?;
        }

        info!(
            %run_id,
            claimed = report.claimed,
            matched = report.matched,
            created = report.created,
            duplicates = report.duplicates,
            failed = report.failed,
            resynthesized = report.resynthesized,
            "resolution run finished"
        );
        Ok(report)
    }

    /// Resolves one observation in its own transaction.
    ///
    /// # Errors
    /// Any error leaves the store unchanged.
    pub fn resolve(&self, observation_id: ObservationId) -> Result<Resolution, ResolutionError> {
        let mut tx = self.store.begin()?;
        let record = tx
            .observation(observation_id)?
            .ok_or(ResolutionError::ObservationNotFound(observation_id))?;
        let now = Utc::now();

        let (entity, resolution) = match matcher::find_match(&*tx, &record)? {
            Some(entity) => {
                let id = entity.id;
                (entity, Resolution::Matched(id))
            }
            None => {
                let entity = linker::create_entity(&mut *tx, &record.observation.kind, now)?;
                let id = entity.id;
                (entity, Resolution::Created(id))
            }
        };

        linker::link(&mut *tx, &entity, observation_id, now)?;
        synthesizer::synthesize(&mut *tx, entity.id, now)?;
        tx.commit()?;
        Ok(resolution)
    }

    /// Re-synthesizes one entity in its own transaction.
    ///
    /// # Errors
    /// Any error leaves the store unchanged.
    pub fn resynthesize(&self, entity_id: EntityId) -> Result<(), ResolutionError> {
        let mut tx = self.store.begin()?;
        synthesizer::synthesize(&mut *tx, entity_id, Utc::now())?;
        tx.commit()?;
        Ok(())
    }

    fn repair(&self, report: &mut RunReport) -> Result<(), ResolutionError> {
        let pending = self.store.pending_synthesis()?;
        if pending.is_empty() {
            return Ok(());
        }
        info!(run_id = %report.run_id, entities = pending.len(), "re-synthesizing pending entities");

        for entity_id in pending {
            match self.resynthesize(entity_id) {
                Ok(()) => report.resynthesized += 1,
                Err(err) if err.is_batch_fatal() => {
                    error!(run_id = %report.run_id, %entity_id, error = %err, "aborting run");
                    return Err(err);
                }
                Err(err) => {
                    warn!(run_id = %report.run_id, %entity_id, error = %err, "re-synthesis failed");
                    report.resynthesis_failed += 1;
                }
            }
        }
        Ok(())
    }
}
