use async_trait::async_trait;
use serde_json::Value;
use std::fmt::Debug;

use crate::{error::FetchError, model::LocationQuery};

pub mod openweather;

pub use openweather::OpenWeatherFetcher;

/// Source of raw current-weather documents.
///
/// One call is one outbound request; implementations never retry.
#[async_trait]
pub trait WeatherFetcher: Send + Sync + Debug {
    async fn fetch(&self, location: &LocationQuery) -> Result<Value, FetchError>;
}
