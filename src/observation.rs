//! Observation types.
//!
//! Observations are produced upstream by the ingestion pipeline and are
//! immutable once stored. Each [`Observation`] belongs to exactly one
//! [`ObservationEvent`], which carries the observer, the timestamps and the
//! location shared by every payload in the submission.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Structured observation payload (a JSON object).
pub type Payload = Map<String, Value>;

/// Store-assigned identifier of an [`ObservationEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(u64);

impl EventId {
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

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Store-assigned identifier of an [`Observation`].
///
/// Ids are totally ordered; the synthesizer uses them to break ties between
/// observations made at the same instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObservationId(u64);

impl ObservationId {
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

impl fmt::Display for ObservationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The kind of real-world object an observation describes.
///
/// Unrecognised tags (including the empty tag the ingestion schema allows)
/// are preserved in [`ObservationKind::Unknown`] rather than rejected.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ObservationKind {
    /// A movable asset: vehicle, container, trailer.
    Asset,
    /// A fixed facility: mine, factory, refinery, substation.
    Facility,
    /// A natural resource.
    Resource,
    /// A transport movement, possibly referring to other payloads.
    Transport,
    /// A human-defined boundary or area.
    Extent,
    /// Any other tag.
    Unknown(String),
}

impl ObservationKind {
    /// Returns the tag as it appears in stored rows.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Asset => "asset",
            Self::Facility => "facility",
            Self::Resource => "resource",
            Self::Transport => "transport",
            Self::Extent => "extent",
            Self::Unknown(tag) => tag,
        }
    }
}

impl From<String> for ObservationKind {
    fn from(value: String) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "asset" => Self::Asset,
            "facility" => Self::Facility,
            "resource" => Self::Resource,
            "transport" => Self::Transport,
            "extent" => Self::Extent,
            _ => Self::Unknown(value),
        }
    }
}

impl From<&str> for ObservationKind {
    fn from(value: &str) -> Self {
        Self::from(value.to_string())
    }
}

impl From<ObservationKind> for String {
    fn from(value: ObservationKind) -> Self {
        match value {
            ObservationKind::Unknown(tag) => tag,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for ObservationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A GeoJSON geometry value, stored verbatim.
///
/// Geometries are carried through synthesis untouched; no shape arithmetic is
/// performed on them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Geometry(Value);

impl Geometry {
    /// Wraps an arbitrary GeoJSON value.
    #[must_use]
    pub const fn new(value: Value) -> Self {
        Self(value)
    }

    /// Builds a GeoJSON point. GeoJSON orders coordinates longitude first.
    #[must_use]
    pub fn point(coordinates: Coordinates) -> Self {
        Self(serde_json::json!({
            "type": "Point",
            "coordinates": [coordinates.longitude, coordinates.latitude],
        }))
    }

    /// Returns the underlying GeoJSON value.
    #[must_use]
    pub const fn as_value(&self) -> &Value {
        &self.0
    }
}

/// Numeric latitude/longitude pair.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Coordinates {
    /// Degrees north.
    pub latitude: f64,
    /// Degrees east.
    pub longitude: f64,
}

impl Coordinates {
    /// True when both values lie within the WGS84 degree ranges.
    #[must_use]
    pub fn in_range(&self) -> bool {
        self.latitude.abs() <= 90.0 && self.longitude.abs() <= 180.0
    }
}

/// Why a location could not be read as coordinates.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum LocationError {
    #[error("location is not an object")]
    NotAnObject,

    #[error("location has no '{field}' field")]
    MissingField { field: &'static str },

    #[error("location field '{field}' is not numeric: {value}")]
    NotNumeric { field: &'static str, value: String },
}

/// Submitted location, kept as received.
///
/// Latitude and longitude may arrive as JSON numbers or as numeric strings.
/// Other location encodings (geohash, plus code) are stored but cannot be
/// read as coordinates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Location(Value);

impl Location {
    /// Wraps a raw location value.
    #[must_use]
    pub const fn new(value: Value) -> Self {
        Self(value)
    }

    /// Convenience constructor for a numeric latitude/longitude location.
    #[must_use]
    pub fn lat_lon(latitude: f64, longitude: f64) -> Self {
        Self(serde_json::json!({ "latitude": latitude, "longitude": longitude }))
    }

    /// Returns the raw value.
    #[must_use]
    pub const fn as_value(&self) -> &Value {
        &self.0
    }

    /// Parses the location into numeric coordinates.
    ///
    /// # Errors
    /// Returns a [`LocationError`] when either field is missing, not numeric
    /// or not finite. Out-of-range values are returned as read; see
    /// [`Coordinates::in_range`].
    pub fn coordinates(&self) -> Result<Coordinates, LocationError> {
        let object = self.0.as_object().ok_or(LocationError::NotAnObject)?;
        let latitude = read_degrees(object, "latitude")?;
        let longitude = read_degrees(object, "longitude")?;
        Ok(Coordinates {
            latitude,
            longitude,
        })
    }
}

fn read_degrees(object: &Payload, field: &'static str) -> Result<f64, LocationError> {
    let raw = object
        .get(field)
        .ok_or(LocationError::MissingField { field })?;

    let value = match raw {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
    .ok_or_else(|| LocationError::NotNumeric {
        field,
        value: raw.to_string(),
    })?;

    if !value.is_finite() {
        return Err(LocationError::NotNumeric {
            field,
            value: raw.to_string(),
        });
    }
    Ok(value)
}

/// One submitted batch of observations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservationEvent {
    /// Store-assigned id.
    pub id: EventId,
    /// Observer named in the submission body.
    pub observer: String,
    /// Submission channel (direct, scrape, online, capture, other).
    pub source: String,
    /// When the observation was made.
    pub observed_at: DateTime<Utc>,
    /// When it was submitted.
    pub submitted_at: DateTime<Utc>,
    /// Location as submitted.
    pub location: Location,
    /// Number of payloads in the submission.
    pub observation_count: u32,
    /// Point derived from a numeric location at ingest time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub geometry: Option<Geometry>,
}

/// One typed payload belonging to an [`ObservationEvent`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    /// Store-assigned id.
    pub id: ObservationId,
    /// Owning event.
    pub event_id: EventId,
    /// Type tag.
    pub kind: ObservationKind,
    /// Structured payload.
    #[serde(default)]
    pub payload: Payload,
    /// Optional shape attached to this payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub geometry: Option<Geometry>,
}

/// Payload field holding an observation's identifier object.
pub const IDENTIFIER_FIELD: &str = "asset_id";

/// Identifier object found in an observation payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentifierRef<'a> {
    /// No identifier object, or one without usable text.
    Absent,
    /// Exactly one identifier object with non-blank text.
    Single {
        /// Raw identifier text.
        text: &'a str,
        /// Identifier scheme reported by the observer (e.g. `BIC`).
        id_type: Option<&'a str>,
    },
    /// A list of identifier objects; holds the list length.
    Multiple(usize),
}

impl Observation {
    /// Extracts the payload's `asset_id` identifier object.
    ///
    /// Any kind may carry one; only assets are matched on it.
    #[must_use]
    pub fn identifier(&self) -> IdentifierRef<'_> {
        match self.payload.get(IDENTIFIER_FIELD) {
            Some(Value::Object(object)) => {
                let text = object
                    .get("id_text")
                    .and_then(Value::as_str)
                    .filter(|text| !text.trim().is_empty());
                match text {
                    Some(text) => IdentifierRef::Single {
                        text,
                        id_type: object.get("id_type").and_then(Value::as_str),
                    },
                    None => IdentifierRef::Absent,
                }
            }
            Some(Value::Array(items)) => IdentifierRef::Multiple(items.len()),
            _ => IdentifierRef::Absent,
        }
    }
}

/// An observation joined with its owning event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservationRecord {
    /// The observation row.
    pub observation: Observation,
    /// The owning event row.
    pub event: ObservationEvent,
}

impl ObservationRecord {
    /// Shorthand for the observation id.
    #[must_use]
    pub fn id(&self) -> ObservationId {
        self.observation.id
    }

    /// Shorthand for the event's `observed_at`.
    #[must_use]
    pub fn observed_at(&self) -> DateTime<Utc> {
        self.event.observed_at
    }

    /// Geometry evidence for this record: the payload's own shape, else the
    /// event's point.
    #[must_use]
    pub fn geometry(&self) -> Option<&Geometry> {
        self.observation
            .geometry
            .as_ref()
            .or(self.event.geometry.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn observation(kind: ObservationKind, payload: Value) -> Observation {
        Observation {
            id: ObservationId::new(1),
            event_id: EventId::new(1),
            kind,
            payload: payload.as_object().cloned().unwrap_or_default(),
            geometry: None,
        }
    }

    #[test]
    fn test_kind_from_tag() {
        assert_eq!(ObservationKind::from("asset"), ObservationKind::Asset);
        assert_eq!(ObservationKind::from("Facility"), ObservationKind::Facility);
        assert_eq!(ObservationKind::from("extent"), ObservationKind::Extent);
        assert_eq!(
            ObservationKind::from(""),
            ObservationKind::Unknown(String::new())
        );
        assert_eq!(
            ObservationKind::from("spaceship"),
            ObservationKind::Unknown("spaceship".to_string())
        );
    }

    #[test]
    fn test_kind_serde_is_string() {
        let value = serde_json::to_value(ObservationKind::Transport).unwrap();
        assert_eq!(value, json!("transport"));
        let parsed: ObservationKind = serde_json::from_value(json!("resource")).unwrap();
        assert_eq!(parsed, ObservationKind::Resource);
        let unknown: ObservationKind = serde_json::from_value(json!("")).unwrap();
        assert_eq!(serde_json::to_value(unknown).unwrap(), json!(""));
    }

    #[test]
    fn test_location_numeric_and_string() {
        let numeric = Location::new(json!({"latitude": 40.5, "longitude": -73.25}));
        let coords = numeric.coordinates().unwrap();
        assert!((coords.latitude - 40.5).abs() < f64::EPSILON);
        assert!((coords.longitude + 73.25).abs() < f64::EPSILON);

        let strings = Location::new(json!({"latitude": " 40.5", "longitude": "-73.25"}));
        assert_eq!(strings.coordinates().unwrap(), coords);
    }

    #[test]
    fn test_location_out_of_range_is_still_numeric() {
        let far = Location::new(json!({"latitude": 95, "longitude": 200}));
        let coords = far.coordinates().unwrap();
        assert!((coords.longitude - 200.0).abs() < f64::EPSILON);
        assert!(!coords.in_range());
        assert!(Location::lat_lon(-90.0, 180.0).coordinates().unwrap().in_range());
    }

    #[test]
    fn test_location_malformed() {
        let text = Location::new(json!({"latitude": "north-ish", "longitude": "1"}));
        assert!(matches!(
            text.coordinates(),
            Err(LocationError::NotNumeric { field: "latitude", .. })
        ));

        let geohash = Location::new(json!({"geohash": "dr5ru"}));
        assert_eq!(
            geohash.coordinates(),
            Err(LocationError::MissingField { field: "latitude" })
        );

        let infinite = Location::new(json!({"latitude": "inf", "longitude": "1"}));
        assert!(matches!(
            infinite.coordinates(),
            Err(LocationError::NotNumeric { field: "latitude", .. })
        ));

        assert_eq!(
            Location::new(json!("somewhere")).coordinates(),
            Err(LocationError::NotAnObject)
        );
    }

    #[test]
    fn test_point_geometry_is_lon_lat() {
        let point = Geometry::point(Coordinates {
            latitude: 1.0,
            longitude: 2.0,
        });
        assert_eq!(
            point.as_value(),
            &json!({"type": "Point", "coordinates": [2.0, 1.0]})
        );
    }

    #[test]
    fn test_identifier_single() {
        let obs = observation(
            ObservationKind::Asset,
            json!({"asset_id": {"id_type": "BIC", "id_text": "MSCU 123"}}),
        );
        assert_eq!(
            obs.identifier(),
            IdentifierRef::Single {
                text: "MSCU 123",
                id_type: Some("BIC")
            }
        );
    }

    #[test]
    fn test_identifier_list_and_blank() {
        let list = observation(
            ObservationKind::Asset,
            json!({"asset_id": [{"id_text": "A"}, {"id_text": "B"}]}),
        );
        assert_eq!(list.identifier(), IdentifierRef::Multiple(2));

        let blank = observation(ObservationKind::Asset, json!({"asset_id": {"id_text": "  "}}));
        assert_eq!(blank.identifier(), IdentifierRef::Absent);

        let missing = observation(ObservationKind::Asset, json!({"asset_type": "asset:generic"}));
        assert_eq!(missing.identifier(), IdentifierRef::Absent);
    }

    #[test]
    fn test_identifier_read_for_any_kind() {
        let facility = observation(
            ObservationKind::Facility,
            json!({"asset_id": {"id_text": "X1"}}),
        );
        assert_eq!(
            facility.identifier(),
            IdentifierRef::Single {
                text: "X1",
                id_type: None
            }
        );
    }
}
