//! End-to-end resolution runs against the in-memory store.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde_json::{json, Value};

use platon::ingest::{NewEvent, NewObservation};
use platon::storage::{ClaimRequest, InMemoryStore, ResolutionStore, RunId, StoreReader};
use platon::{
    EntityLink, EntityType, IssuerType, LinkStatus, Location, NewIdentifier, ObservationId,
    Resolver, ResolverConfig,
};

fn ingest(store: &InMemoryStore, observed_at: DateTime<Utc>, payloads: &[Value]) -> Vec<ObservationId> {
    let (_, ids) = store
        .ingest(NewEvent {
            observer: "field-team".to_string(),
            source: "direct".to_string(),
            observed_at,
            submitted_at: observed_at,
            location: Location::lat_lon(-12.5, 27.9),
            observations: payloads
                .iter()
                .map(|p| NewObservation::from_payload(p.as_object().cloned().unwrap()))
                .collect(),
        })
        .unwrap();
    ids
}

fn asset(id_text: &str) -> Value {
    json!({
        "observation_type": "asset",
        "asset_type": "container:multimodal_container:40ft",
        "asset_id": {"id_type": "BIC", "id_text": id_text}
    })
}

fn resolver(store: &Arc<InMemoryStore>) -> Resolver {
    Resolver::new(store.clone(), ResolverConfig::default()).unwrap()
}

#[test]
fn test_identifier_variants_resolve_to_one_entity() {
    let store = Arc::new(InMemoryStore::new());
    let now = Utc::now();
    ingest(&store, now - Duration::hours(1), &[asset("ABC 123")]);
    ingest(&store, now, &[asset("abc_123")]);

    let report = resolver(&store).run().unwrap();
    assert_eq!(report.claimed, 2);
    assert_eq!(report.created, 1);
    assert_eq!(report.matched, 1);

    let snapshot = store.snapshot().unwrap();
    let entities = snapshot.entities();
    assert_eq!(entities.len(), 1);
    let entity = &entities[0];
    assert_eq!(entity.entity_type, EntityType::Asset);
    assert_eq!(snapshot.links_for_entity(entity.id).unwrap().len(), 2);

    let identifiers = snapshot.identifiers(entity.id).unwrap();
    assert_eq!(identifiers.len(), 1);
    assert_eq!(identifiers[0].identifier_canonical, "abc_123");
    assert_eq!(entity.latest_observation_at, Some(now));
}

#[test]
fn test_identical_facilities_are_not_merged() {
    let store = Arc::new(InMemoryStore::new());
    let facility = json!({"observation_type": "facility", "description": "Copper smelter"});
    ingest(&store, Utc::now(), &[facility.clone()]);
    ingest(&store, Utc::now(), &[facility]);

    let report = resolver(&store).run().unwrap();
    assert_eq!(report.created, 2);

    let snapshot = store.snapshot().unwrap();
    assert_eq!(snapshot.entities().len(), 2);
    assert_eq!(snapshot.links().len(), 2);
}

#[test]
fn test_one_event_with_several_payloads() {
    let store = Arc::new(InMemoryStore::new());
    ingest(
        &store,
        Utc::now(),
        &[
            asset("MSCU 1"),
            json!({"observation_type": "transport", "mode": "rail"}),
            json!({"observation_type": "", "note": "unclear"}),
        ],
    );

    let report = resolver(&store).run().unwrap();
    assert_eq!(report.created, 3);

    let types: Vec<EntityType> = store
        .snapshot()
        .unwrap()
        .entities()
        .iter()
        .map(|e| e.entity_type)
        .collect();
    assert_eq!(
        types,
        vec![EntityType::Asset, EntityType::Transport, EntityType::Unclassified]
    );
}

#[test]
fn test_latest_observation_defines_geometry() {
    let store = Arc::new(InMemoryStore::new());
    let t = Utc::now();
    let shape = |x: i64| json!({"type": "Point", "coordinates": [x, x]});
    let mut payloads = vec![
        (t - Duration::hours(1), 1),
        (t, 2),
        (t - Duration::hours(2), 0),
    ];
    for (at, x) in payloads.drain(..) {
        let mut payload = asset("TRLU 9");
        payload["geometry"] = shape(x);
        ingest(&store, at, &[payload]);
    }

    resolver(&store).run().unwrap();

    let entities = store.snapshot().unwrap().entities();
    assert_eq!(entities.len(), 1);
    assert_eq!(entities[0].latest_observation_at, Some(t));
    assert_eq!(
        entities[0].geometry.as_ref().map(|g| g.as_value().clone()),
        Some(shape(2))
    );
}

#[test]
fn test_rerun_is_noop() {
    let store = Arc::new(InMemoryStore::new());
    ingest(&store, Utc::now(), &[asset("ABC 123")]);

    let resolver = resolver(&store);
    resolver.run().unwrap();
    let before = store.counts().unwrap();

    let report = resolver.run().unwrap();
    assert!(report.is_noop());
    assert_eq!(store.counts().unwrap(), before);
}

#[test]
fn test_interrupted_writer_is_repaired() {
    let store = Arc::new(InMemoryStore::new());
    let ids = ingest(&store, Utc::now(), &[json!({"observation_type": "facility", "name": "Mine A"})]);

    // A writer linked the observation and died before synthesizing.
    let entity_id = {
        let mut tx = store.begin().unwrap();
        let entity = tx.create_entity(EntityType::Facility, Utc::now()).unwrap();
        tx.insert_link(EntityLink::active(entity.id, ids[0], Utc::now()))
            .unwrap();
        tx.commit().unwrap();
        entity.id
    };
    assert_eq!(store.pending_synthesis().unwrap(), vec![entity_id]);

    let report = resolver(&store).run().unwrap();
    assert_eq!(report.claimed, 0);
    assert_eq!(report.resynthesized, 1);

    let snapshot = store.snapshot().unwrap();
    assert_eq!(snapshot.entities().len(), 1);
    assert_eq!(snapshot.links().len(), 1);
    let entity = snapshot.entity(entity_id).unwrap().unwrap();
    assert_eq!(entity.data.get("name"), Some(&json!("Mine A")));
    assert!(entity.latest_observation_at.is_some());
    drop(snapshot);
    assert!(store.pending_synthesis().unwrap().is_empty());
}

#[test]
fn test_deactivated_link_reopens_observation() {
    let store = Arc::new(InMemoryStore::new());
    let t = Utc::now();
    let first = ingest(&store, t - Duration::hours(1), &[asset("ZZZ 1")]);
    let second = ingest(
        &store,
        t,
        &[json!({
            "observation_type": "asset",
            "colour": "orange",
            "asset_id": {"id_text": "zzz 1"}
        })],
    );
    resolver(&store).run().unwrap();

    let entity_id = store.snapshot().unwrap().entities()[0].id;
    {
        let mut tx = store.begin().unwrap();
        tx.set_link_status(entity_id, second[0], LinkStatus::Inactive)
            .unwrap();
        tx.commit().unwrap();
    }

    // The deactivated observation is unresolved again and re-matches the
    // same entity through its identifier, which hits the existing link.
    let report = resolver(&store).run().unwrap();
    assert_eq!(report.claimed, 1);
    assert_eq!(report.duplicates, 1);
    assert_eq!(report.resynthesized, 1);

    let snapshot = store.snapshot().unwrap();
    let entity = snapshot.entity(entity_id).unwrap().unwrap();
    assert_eq!(entity.latest_observation_at, Some(t - Duration::hours(1)));
    assert!(!entity.data.contains_key("colour"));
    assert_eq!(snapshot.unresolved(), second);
    assert!(snapshot.links_for_observation(first[0]).unwrap()[0].is_active());
}

#[test]
fn test_live_claims_of_other_runs_are_skipped() {
    let store = Arc::new(InMemoryStore::new());
    let ids = ingest(
        &store,
        Utc::now(),
        &[
            json!({"observation_type": "resource", "mineral": "cobalt"}),
            json!({"observation_type": "resource", "mineral": "copper"}),
        ],
    );

    let other_run = RunId::new();
    let held = store
        .claim_unresolved(&ClaimRequest {
            run_id: other_run,
            now: Utc::now(),
            ttl: Duration::minutes(30),
            limit: Some(1),
        })
        .unwrap();
    assert_eq!(held, vec![ids[0]]);

    let report = resolver(&store).run().unwrap();
    assert_eq!(report.claimed, 1);
    assert_eq!(store.snapshot().unwrap().unresolved(), vec![ids[0]]);
}

#[test]
fn test_expired_claims_are_reclaimed() {
    let store = Arc::new(InMemoryStore::new());
    let ids = ingest(&store, Utc::now(), &[json!({"observation_type": "extent"})]);

    store
        .claim_unresolved(&ClaimRequest {
            run_id: RunId::new(),
            now: Utc::now() - Duration::hours(3),
            ttl: Duration::minutes(30),
            limit: None,
        })
        .unwrap();

    let report = resolver(&store).run().unwrap();
    assert_eq!(report.claimed, 1);
    assert_eq!(report.created, 1);
    assert!(store.snapshot().unwrap().unresolved().is_empty());
    assert_eq!(
        store.snapshot().unwrap().links_for_observation(ids[0]).unwrap().len(),
        1
    );
}

#[test]
fn test_batch_limit() {
    let store = Arc::new(InMemoryStore::new());
    for _ in 0..5 {
        ingest(&store, Utc::now(), &[json!({"observation_type": "facility"})]);
    }

    let config = ResolverConfig {
        batch_limit: Some(2),
        ..ResolverConfig::default()
    };
    let resolver = Resolver::new(store.clone(), config).unwrap();

    assert_eq!(resolver.run().unwrap().claimed, 2);
    assert_eq!(resolver.run().unwrap().claimed, 2);
    assert_eq!(resolver.run().unwrap().claimed, 1);
    assert!(resolver.run().unwrap().is_noop());
}

#[test]
fn test_malformed_location_still_resolves() {
    let store = Arc::new(InMemoryStore::new());
    store
        .ingest(NewEvent {
            observer: "field-team".to_string(),
            source: "scrape".to_string(),
            observed_at: Utc::now(),
            submitted_at: Utc::now(),
            location: Location::new(json!({"latitude": "n/a", "longitude": "n/a"})),
            observations: vec![NewObservation::from_payload(
                asset("ABC 123").as_object().cloned().unwrap(),
            )],
        })
        .unwrap();
    ingest(&store, Utc::now(), &[asset("ABC 123")]);

    let report = resolver(&store).run().unwrap();
    // The first cannot match and creates an entity; the second matches it.
    assert_eq!(report.created, 1);
    assert_eq!(report.matched, 1);
    assert_eq!(report.failed, 0);
}

#[test]
fn test_duplicate_link_skips_only_that_observation() {
    let store = Arc::new(InMemoryStore::new());
    let t = Utc::now();
    let before = ingest(&store, t, &[json!({"observation_type": "facility", "name": "Mill"})]);
    let dup = ingest(&store, t, &[asset("KLU 7")]);
    let after = ingest(&store, t, &[json!({"observation_type": "resource", "mineral": "tin"})]);

    // An asset already holding the identifier, with an inactive link to the
    // middle observation: it is unresolved, yet re-linking it collides.
    let asset_id = {
        let mut tx = store.begin().unwrap();
        let entity = tx.create_entity(EntityType::Asset, t).unwrap();
        tx.insert_identifier(NewIdentifier::new(entity.id, IssuerType::Operator, "klu_7"))
            .unwrap();
        tx.insert_link(EntityLink::active(entity.id, dup[0], t)).unwrap();
        tx.set_link_status(entity.id, dup[0], LinkStatus::Inactive)
            .unwrap();
        tx.commit().unwrap();
        entity.id
    };

    let report = resolver(&store).run().unwrap();
    assert_eq!(report.claimed, 3);
    assert_eq!(report.created, 2);
    assert_eq!(report.duplicates, 1);
    assert_eq!(report.failed, 0);
    assert_eq!(report.resynthesized, 1);

    let snapshot = store.snapshot().unwrap();
    assert_eq!(snapshot.unresolved(), dup);
    for id in [before[0], after[0]] {
        let links = snapshot.links_for_observation(id).unwrap();
        assert_eq!(links.len(), 1);
        assert!(links[0].is_active());
        assert_ne!(links[0].entity_id, asset_id);
    }
}
