//! Loading observation submissions into a store.
//!
//! Request validation and authentication belong to the ingestion API; this
//! module only maps already-accepted submission documents onto store rows so
//! a batch run has something to resolve.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;

use crate::observation::{Geometry, Location, ObservationKind, Payload};

/// Either one item or a list of them.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum OneOrMany<T> {
    One(T),
    Many(Vec<T>),
}

impl<T> OneOrMany<T> {
    fn into_vec(self) -> Vec<T> {
        match self {
            Self::One(item) => vec![item],
            Self::Many(items) => items,
        }
    }
}

/// An accepted observation submission, as produced by the ingestion API.
#[derive(Debug, Clone, Deserialize)]
pub struct Submission {
    pub observer: String,
    pub source: String,
    pub observed_at: DateTime<Utc>,
    pub submitted_at: DateTime<Utc>,
    pub location: Location,
    payload: OneOrMany<Payload>,
}

impl Submission {
    /// Splits the submission into an event and its typed observations.
    ///
    /// Each payload's `observation_type` becomes the observation kind (a
    /// missing tag is kept as the empty tag). A `geometry` field is lifted
    /// out of the payload into the observation's geometry.
    #[must_use]
    pub fn into_new_event(self) -> NewEvent {
        let observations = self
            .payload
            .into_vec()
            .into_iter()
            .map(NewObservation::from_payload)
            .collect();

        NewEvent {
            observer: self.observer,
            source: self.source,
            observed_at: self.observed_at,
            submitted_at: self.submitted_at,
            location: self.location,
            observations,
        }
    }
}

/// Parses a JSON document holding one submission or an array of them.
///
/// # Errors
/// Returns the `serde_json` error when the document does not match the
/// submission shape.
pub fn parse_submissions(json: &str) -> Result<Vec<Submission>, serde_json::Error> {
    serde_json::from_str::<OneOrMany<Submission>>(json).map(OneOrMany::into_vec)
}

/// An event ready to be stored; ids are assigned by the store.
#[derive(Debug, Clone)]
pub struct NewEvent {
    pub observer: String,
    pub source: String,
    pub observed_at: DateTime<Utc>,
    pub submitted_at: DateTime<Utc>,
    pub location: Location,
    pub observations: Vec<NewObservation>,
}

/// An observation ready to be stored.
#[derive(Debug, Clone)]
pub struct NewObservation {
    pub kind: ObservationKind,
    pub payload: Payload,
    pub geometry: Option<Geometry>,
}

impl NewObservation {
    /// Builds an observation from a raw payload object.
    #[must_use]
    pub fn from_payload(mut payload: Payload) -> Self {
        let kind = match payload.get("observation_type") {
            Some(Value::String(tag)) => ObservationKind::from(tag.as_str()),
            _ => ObservationKind::Unknown(String::new()),
        };
        let geometry = payload
            .remove("geometry")
            .filter(|value| !value.is_null())
            .map(Geometry::new);

        Self {
            kind,
            payload,
            geometry,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_single_and_list_payloads() {
        let doc = json!([
            {
                "observer": "alice",
                "source": "direct",
                "observed_at": "2024-03-01T10:00:00Z",
                "submitted_at": "2024-03-01T10:05:00Z",
                "location": {"latitude": "51.5", "longitude": "-0.12"},
                "payload": {
                    "observation_type": "asset",
                    "asset_type": "container:multimodal_container:40ft",
                    "asset_id": {"id_type": "BIC", "id_text": "MSCU 1234567"}
                }
            },
            {
                "observer": "bob",
                "source": "scrape",
                "observed_at": "2024-03-02T10:00:00Z",
                "submitted_at": "2024-03-02T10:05:00Z",
                "location": {"geohash": "gcpvj"},
                "payload": [
                    {"observation_type": "facility", "description": "Smelter"},
                    {"description": "untyped"}
                ]
            }
        ]);

        let submissions = parse_submissions(&doc.to_string()).unwrap();
        assert_eq!(submissions.len(), 2);

        let first = submissions[0].clone().into_new_event();
        assert_eq!(first.observations.len(), 1);
        assert_eq!(first.observations[0].kind, ObservationKind::Asset);

        let second = submissions[1].clone().into_new_event();
        assert_eq!(second.observations.len(), 2);
        assert_eq!(second.observations[0].kind, ObservationKind::Facility);
        assert_eq!(
            second.observations[1].kind,
            ObservationKind::Unknown(String::new())
        );
    }

    #[test]
    fn test_parse_single_submission_object() {
        let doc = json!({
            "observer": "carol",
            "source": "online",
            "observed_at": "2024-03-01T10:00:00Z",
            "submitted_at": "2024-03-01T10:00:00Z",
            "location": {"latitude": 1, "longitude": 2},
            "payload": {"observation_type": "extent"}
        });
        assert_eq!(parse_submissions(&doc.to_string()).unwrap().len(), 1);
    }

    #[test]
    fn test_geometry_lifted_out_of_payload() {
        let payload = json!({
            "observation_type": "extent",
            "geometry": {"type": "Polygon", "coordinates": []}
        });
        let obs = NewObservation::from_payload(payload.as_object().cloned().unwrap());
        assert!(obs.geometry.is_some());
        assert!(!obs.payload.contains_key("geometry"));
    }
}
