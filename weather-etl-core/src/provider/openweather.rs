use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, instrument, warn};

use crate::{config::ApiConfig, error::FetchError, model::LocationQuery};

use super::WeatherFetcher;

/// Client for the OpenWeatherMap current-weather endpoint.
#[derive(Debug, Clone)]
pub struct OpenWeatherFetcher {
    api_key: String,
    base_url: String,
    units: String,
    http: Client,
}

impl OpenWeatherFetcher {
    pub fn new(api_key: String, config: &ApiConfig) -> Result<Self, FetchError> {
        let mut builder = Client::builder();
        if config.timeout_secs > 0 {
            builder = builder.timeout(Duration::from_secs(config.timeout_secs));
        }
        let http = builder.build().map_err(FetchError::Transport)?;

        Ok(Self {
            api_key,
            base_url: config.base_url.clone(),
            units: config.units.clone(),
            http,
        })
    }

    fn query_params(&self, location: &LocationQuery) -> Vec<(&'static str, String)> {
        let mut params = match location {
            LocationQuery::Coordinates { lat, lon } => {
                vec![("lat", lat.to_string()), ("lon", lon.to_string())]
            }
            LocationQuery::Name(name) => vec![("q", name.clone())],
        };
        params.push(("appid", self.api_key.clone()));
        params.push(("units", self.units.clone()));
        params
    }
}

#[async_trait]
impl WeatherFetcher for OpenWeatherFetcher {
    #[instrument(skip(self))]
    async fn fetch(&self, location: &LocationQuery) -> Result<Value, FetchError> {
        let res = self
            .http
            .get(&self.base_url)
            .query(&self.query_params(location))
            .send()
            .await
            .map_err(FetchError::Transport)?;

        let status = res.status();
        let body = res.text().await.map_err(FetchError::Transport)?;

        if !status.is_success() {
            warn!(%status, "weather provider rejected request");
            return Err(FetchError::Status { status, body: truncate_body(&body) });
        }

        let doc: Value = serde_json::from_str(&body).map_err(|e| FetchError::Malformed(e.to_string()))?;
        if !doc.is_object() {
            return Err(FetchError::Malformed(format!("expected a JSON object, got: {}", truncate_body(&body))));
        }

        debug!(bytes = body.len(), "fetched weather document");
        Ok(doc)
    }
}

fn truncate_body(body: &str) -> String {
    const MAX: usize = 200;
    if body.len() > MAX {
        let mut end = MAX;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}...", &body[..end])
    } else {
        body.to_string()
    }
}
