use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ConfigError, ShapeError};

/// How a location is identified to the weather provider.
#[derive(Debug, Clone, PartialEq)]
pub enum LocationQuery {
    Coordinates { lat: f64, lon: f64 },
    Name(String),
}

/// A configured location: display name plus the query sent upstream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "LocationEntry", into = "LocationEntry")]
pub struct Location {
    pub name: String,
    pub query: LocationQuery,
}

impl Location {
    pub fn coordinates(name: impl Into<String>, lat: f64, lon: f64) -> Self {
        Self { name: name.into(), query: LocationQuery::Coordinates { lat, lon } }
    }

    pub fn named(name: impl Into<String>) -> Self {
        let name = name.into();
        Self { query: LocationQuery::Name(name.clone()), name }
    }
}

/// On-disk form of [`Location`]:
///
/// ```toml
/// [[locations]]
/// name = "Rosario"
/// lat = -32.9468
/// lon = -60.6393
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
struct LocationEntry {
    name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    query: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    lat: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    lon: Option<f64>,
}

impl TryFrom<LocationEntry> for Location {
    type Error = ConfigError;

    fn try_from(entry: LocationEntry) -> Result<Self, Self::Error> {
        match (entry.query, entry.lat, entry.lon) {
            (Some(query), None, None) => Ok(Self { name: entry.name, query: LocationQuery::Name(query) }),
            (None, Some(lat), Some(lon)) => {
                if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lon) {
                    return Err(ConfigError::InvalidCoordinates { name: entry.name, lat, lon });
                }
                Ok(Self::coordinates(entry.name, lat, lon))
            }
            _ => Err(ConfigError::IncompleteLocation(entry.name)),
        }
    }
}

impl From<Location> for LocationEntry {
    fn from(location: Location) -> Self {
        match location.query {
            LocationQuery::Coordinates { lat, lon } => {
                Self { name: location.name, query: None, lat: Some(lat), lon: Some(lon) }
            }
            LocationQuery::Name(query) => {
                Self { name: location.name, query: Some(query), lat: None, lon: None }
            }
        }
    }
}

/// The locations ingested when the config file does not list any.
pub fn default_locations() -> Vec<Location> {
    vec![
        Location::coordinates("Rosario", -32.9468, -60.6393),
        Location::coordinates("Buenos Aires", -34.6132, -58.3772),
        Location::coordinates("Barcelona", 41.3888, 2.159),
        Location::coordinates("New York", 43.0004, -75.4999),
        Location::coordinates("London", 51.5085, -0.1257),
        Location::coordinates("Paris", 48.8534, 2.3488),
        Location::coordinates("Berlin", 52.5244, 13.4105),
        Location::coordinates("Rome", 41.8947, 12.4839),
        Location::coordinates("Miami", 25.7743, -80.1937),
        Location::coordinates("Bangkok", 13.75, 100.5167),
    ]
}

/// One weather reading for one location, ready to be written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub location: String,
    /// Degrees Celsius.
    pub temperature: f64,
    pub weather_descriptions: String,
    pub observation_time: DateTime<Utc>,
}

impl Observation {
    /// Extract an observation from a current-weather document.
    ///
    /// Expects `name`, `main.temp`, `weather[].description` and `dt` (Unix
    /// seconds). Condition labels are joined with `", "` in response order.
    pub fn from_document(doc: &Value) -> Result<Self, ShapeError> {
        let location = require(doc, "name", "name")?
            .as_str()
            .ok_or_else(|| invalid("name", "expected a string"))?
            .to_owned();

        let main = require(doc, "main", "main")?;
        let temperature = require(main, "temp", "main.temp")?
            .as_f64()
            .ok_or_else(|| invalid("main.temp", "expected a number"))?;

        let weather = require(doc, "weather", "weather")?
            .as_array()
            .ok_or_else(|| invalid("weather", "expected an array"))?;
        let weather_descriptions = weather
            .iter()
            .map(|w| {
                w.get("description")
                    .and_then(Value::as_str)
                    .ok_or_else(|| invalid("weather.description", "expected a string"))
            })
            .collect::<Result<Vec<_>, _>>()?
            .join(", ");

        let dt = require(doc, "dt", "dt")?
            .as_i64()
            .ok_or_else(|| invalid("dt", "expected an integer epoch"))?;
        let observation_time =
            DateTime::<Utc>::from_timestamp(dt, 0).ok_or(ShapeError::TimestampOutOfRange(dt))?;

        Ok(Self { location, temperature, weather_descriptions, observation_time })
    }
}

/// A persisted observation with the columns the warehouse assigns.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredObservation {
    pub id: i64,
    pub observation: Observation,
    pub ingestion_time: DateTime<Utc>,
}

fn require<'a>(doc: &'a Value, key: &str, field: &'static str) -> Result<&'a Value, ShapeError> {
    match doc.get(key) {
        Some(Value::Null) | None => Err(ShapeError::MissingField(field)),
        Some(v) => Ok(v),
    }
}

fn invalid(field: &'static str, reason: &str) -> ShapeError {
    ShapeError::InvalidField { field, reason: reason.to_string() }
}
