//! Error types for every stage of an ingestion run.
//!
//! Each stage has its own enum so callers can tell a network problem from a
//! bad payload or a storage failure. Nothing here is retried.

use std::path::PathBuf;

use reqwest::StatusCode;
use thiserror::Error;

/// Failure while retrieving a weather document.
#[derive(Debug, Error)]
pub enum FetchError {
    /// The request could not be sent or the body could not be read.
    #[error("request to weather provider failed: {0}")]
    Transport(#[source] reqwest::Error),

    /// The provider answered with a non-success status.
    #[error("weather provider returned status {status}: {body}")]
    Status { status: StatusCode, body: String },

    /// The body was not a JSON object.
    #[error("weather provider returned malformed JSON: {0}")]
    Malformed(String),
}

/// The fetched document does not have the shape of an observation.
#[derive(Debug, Error, PartialEq)]
pub enum ShapeError {
    #[error("document is missing field `{0}`")]
    MissingField(&'static str),

    #[error("field `{field}` is invalid: {reason}")]
    InvalidField { field: &'static str, reason: String },

    #[error("observation timestamp {0} is out of range")]
    TimestampOutOfRange(i64),
}

/// Failure talking to the destination table.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("could not connect to warehouse: {0}")]
    Connect(#[source] sqlx::Error),

    #[error("warehouse statement failed: {0}")]
    Statement(#[source] sqlx::Error),

    #[error("could not close warehouse connection: {0}")]
    Close(#[source] sqlx::Error),

    #[error("table `{table}` exists but lacks columns: {}", .missing.join(", "))]
    IncompatibleSchema { table: String, missing: Vec<String> },

    #[error("table `{0}` does not exist")]
    MissingTable(String),

    #[error("warehouse connection is already closed")]
    Closed,
}

/// Failure while turning a document into a stored row.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error(transparent)]
    Shape(#[from] ShapeError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Why a single location could not be ingested.
#[derive(Debug, Error)]
pub enum LocationError {
    #[error("fetch failed: {0}")]
    Fetch(#[from] FetchError),

    #[error("load failed: {0}")]
    Load(#[from] LoadError),
}

/// Failure that ends a pipeline run.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("could not prepare destination table: {0}")]
    EnsureTable(#[source] StoreError),

    #[error("location `{location}` failed: {source}")]
    Location {
        location: String,
        #[source]
        source: LocationError,
    },

    #[error("could not close warehouse connection: {0}")]
    Close(#[source] StoreError),
}

/// Problems found while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write config file {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("failed to serialize configuration: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("could not determine platform config directory")]
    NoConfigDir,

    #[error("environment variable {name} has invalid value `{value}`")]
    InvalidEnv { name: &'static str, value: String },

    #[error("invalid table name `{0}`: expected [schema.]name made of letters, digits and underscores")]
    InvalidTableName(String),

    #[error("location `{name}` has out-of-range coordinates ({lat}, {lon})")]
    InvalidCoordinates { name: String, lat: f64, lon: f64 },

    #[error("no configured location named {}", .0.join(", "))]
    UnknownLocations(Vec<String>),

    #[error("location `{0}` must set either `query` or both `lat` and `lon`")]
    IncompleteLocation(String),

    #[error("missing required setting `{key}` (set it in the config file or ${env})")]
    Missing { key: &'static str, env: &'static str },
}
