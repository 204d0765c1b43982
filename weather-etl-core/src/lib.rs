//! Core library for the `weather-etl` ingestion job.
//!
//! This crate defines:
//! - Configuration (file, environment overrides)
//! - The weather fetcher and its OpenWeatherMap client
//! - The warehouse loader with Redshift/PostgreSQL and in-memory stores
//! - The pipeline that runs fetch-then-insert over a list of locations
//!
//! It is used by `weather-etl-cli`, but can also be driven by other binaries.

pub mod config;
pub mod error;
pub mod model;
pub mod pipeline;
pub mod provider;
pub mod warehouse;

pub use config::{ApiConfig, Config, ConnectionSettings, DatabaseConfig};
pub use error::{ConfigError, FetchError, LoadError, LocationError, PipelineError, ShapeError, StoreError};
pub use model::{Location, LocationQuery, Observation, StoredObservation};
pub use pipeline::{FailurePolicy, LocationOutcome, Pipeline, RunReport};
pub use provider::{OpenWeatherFetcher, WeatherFetcher};
pub use warehouse::{Dialect, Loader, MemoryWarehouse, ObservationStore, PgWarehouse, TableName};
