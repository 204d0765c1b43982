//! Sequential fetch-then-insert over a list of locations.

use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::{
    error::{LocationError, PipelineError},
    model::{Location, Observation},
    provider::WeatherFetcher,
    warehouse::{Loader, ObservationStore},
};

/// What to do when one location fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// Stop at the first failure; later locations are not attempted.
    #[default]
    Abort,
    /// Record the failure and move on to the next location.
    Continue,
}

/// Result of ingesting one location.
#[derive(Debug)]
pub enum LocationOutcome {
    Inserted(Observation),
    Failed(LocationError),
}

/// Per-location outcomes of a completed run, in configured order.
#[derive(Debug, Default)]
pub struct RunReport {
    pub outcomes: Vec<(String, LocationOutcome)>,
}

impl RunReport {
    pub fn inserted(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|(_, o)| matches!(o, LocationOutcome::Inserted(_)))
            .count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.inserted()
    }

    pub fn is_success(&self) -> bool {
        self.failed() == 0
    }
}

/// Drives one ingestion run against a fetcher and a store.
#[derive(Debug)]
pub struct Pipeline<'a, F: WeatherFetcher + ?Sized, S: ObservationStore + ?Sized> {
    fetcher: &'a F,
    store: &'a mut S,
    policy: FailurePolicy,
}

impl<'a, F, S> Pipeline<'a, F, S>
where
    F: WeatherFetcher + ?Sized,
    S: ObservationStore + ?Sized,
{
    pub fn new(fetcher: &'a F, store: &'a mut S, policy: FailurePolicy) -> Self {
        Self { fetcher, store, policy }
    }

    /// Ensure the table, ingest each location in order, then close the store.
    ///
    /// The store is closed on every path, including failures.
    pub async fn run(self, locations: &[Location]) -> Result<RunReport, PipelineError> {
        let Self { fetcher, store, policy } = self;

        let result = ingest(fetcher, &mut *store, policy, locations).await;
        let closed = store.close().await;

        if let (Err(_), Err(err)) = (&result, &closed) {
            warn!(error = %err, "failed to close warehouse after error");
        }

        let report = result?;
        closed.map_err(PipelineError::Close)?;
        Ok(report)
    }
}

async fn ingest<F, S>(
    fetcher: &F,
    store: &mut S,
    policy: FailurePolicy,
    locations: &[Location],
) -> Result<RunReport, PipelineError>
where
    F: WeatherFetcher + ?Sized,
    S: ObservationStore + ?Sized,
{
    let mut loader = Loader::new(store);
    loader.ensure_table().await.map_err(PipelineError::EnsureTable)?;

    let mut report = RunReport::default();
    for location in locations {
        match ingest_one(fetcher, &mut loader, location).await {
            Ok(observation) => {
                info!(
                    location = %location.name,
                    temperature = observation.temperature,
                    observed_at = %observation.observation_time,
                    "observation stored"
                );
                report.outcomes.push((location.name.clone(), LocationOutcome::Inserted(observation)));
            }
            Err(err) if policy == FailurePolicy::Continue => {
                warn!(location = %location.name, error = %err, "skipping location");
                report.outcomes.push((location.name.clone(), LocationOutcome::Failed(err)));
            }
            Err(err) => {
                error!(location = %location.name, error = %err, "aborting run");
                return Err(PipelineError::Location { location: location.name.clone(), source: err });
            }
        }
    }

    Ok(report)
}

async fn ingest_one<F, S>(
    fetcher: &F,
    loader: &mut Loader<'_, S>,
    location: &Location,
) -> Result<Observation, LocationError>
where
    F: WeatherFetcher + ?Sized,
    S: ObservationStore + ?Sized,
{
    let document = fetcher.fetch(&location.query).await?;
    Ok(loader.insert(&document).await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        error::{FetchError, LoadError, StoreError},
        model::LocationQuery,
        warehouse::{MemoryWarehouse, TableName},
    };
    use async_trait::async_trait;
    use serde_json::{Value, json};
    use std::{collections::HashSet, sync::Mutex};

    /// Serves a canned document per location name and records every call.
    #[derive(Debug, Default)]
    struct FakeFetcher {
        failing: HashSet<String>,
        malformed: HashSet<String>,
        calls: Mutex<Vec<String>>,
    }

    impl FakeFetcher {
        fn failing(names: &[&str]) -> Self {
            Self { failing: names.iter().map(|n| n.to_string()).collect(), ..Default::default() }
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl WeatherFetcher for FakeFetcher {
        async fn fetch(&self, location: &LocationQuery) -> Result<Value, FetchError> {
            let LocationQuery::Name(name) = location else {
                panic!("tests use named locations");
            };
            self.calls.lock().unwrap().push(name.clone());

            if self.failing.contains(name) {
                return Err(FetchError::Malformed("boom".into()));
            }
            if self.malformed.contains(name) {
                return Ok(json!({"cod": 401}));
            }
            Ok(json!({
                "name": name,
                "main": {"temp": 20.0},
                "weather": [{"description": "clear sky"}],
                "dt": 1700000000
            }))
        }
    }

    /// Memory store whose `close` always fails.
    #[derive(Debug)]
    struct StubbornStore {
        inner: MemoryWarehouse,
        close_calls: usize,
    }

    #[async_trait]
    impl ObservationStore for StubbornStore {
        fn table(&self) -> &TableName {
            self.inner.table()
        }

        async fn ensure_table(&mut self) -> Result<(), StoreError> {
            self.inner.ensure_table().await
        }

        async fn insert(&mut self, observation: &Observation) -> Result<(), StoreError> {
            self.inner.insert(observation).await
        }

        async fn close(&mut self) -> Result<(), StoreError> {
            self.close_calls += 1;
            Err(StoreError::MissingTable("gone".into()))
        }
    }

    fn locations(names: &[&str]) -> Vec<Location> {
        names.iter().map(|n| Location::named(*n)).collect()
    }

    #[tokio::test]
    async fn k_locations_give_k_fetches_and_k_rows() {
        let fetcher = FakeFetcher::default();
        let mut store = MemoryWarehouse::new(TableName::default());
        let locs = locations(&["Rosario", "Paris", "Berlin", "Rome"]);

        let report = Pipeline::new(&fetcher, &mut store, FailurePolicy::Abort).run(&locs).await.unwrap();

        assert_eq!(fetcher.calls(), ["Rosario", "Paris", "Berlin", "Rome"]);
        assert_eq!(report.inserted(), 4);
        assert!(report.is_success());
        let stored: Vec<_> = store.rows().iter().map(|r| r.observation.location.as_str()).collect();
        assert_eq!(stored, ["Rosario", "Paris", "Berlin", "Rome"]);
        assert!(store.is_closed());
    }

    #[tokio::test]
    async fn fetch_failure_aborts_remaining_locations() {
        let fetcher = FakeFetcher::failing(&["Berlin"]);
        let mut store = MemoryWarehouse::new(TableName::default());
        let locs = locations(&["Rosario", "Berlin", "Rome"]);

        let err = Pipeline::new(&fetcher, &mut store, FailurePolicy::Abort).run(&locs).await.unwrap_err();

        match err {
            PipelineError::Location { location, source: LocationError::Fetch(_) } => {
                assert_eq!(location, "Berlin")
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(fetcher.calls(), ["Rosario", "Berlin"], "Rome must not be attempted");
        assert_eq!(store.rows().len(), 1);
        assert!(store.is_closed(), "store must be closed on failure");
    }

    #[tokio::test]
    async fn load_failure_aborts_too() {
        let fetcher = FakeFetcher {
            malformed: ["Paris".to_string()].into(),
            ..Default::default()
        };
        let mut store = MemoryWarehouse::new(TableName::default());

        let err = Pipeline::new(&fetcher, &mut store, FailurePolicy::Abort)
            .run(&locations(&["Paris", "Rome"]))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            PipelineError::Location { source: LocationError::Load(LoadError::Shape(_)), .. }
        ));
        assert!(store.rows().is_empty());
        assert_eq!(fetcher.calls(), ["Paris"]);
    }

    #[tokio::test]
    async fn continue_policy_attempts_everything() {
        let fetcher = FakeFetcher {
            failing: ["Berlin".to_string()].into(),
            malformed: ["Miami".to_string()].into(),
            ..Default::default()
        };
        let mut store = MemoryWarehouse::new(TableName::default());
        let locs = locations(&["Rosario", "Berlin", "Miami", "Rome"]);

        let report = Pipeline::new(&fetcher, &mut store, FailurePolicy::Continue).run(&locs).await.unwrap();

        assert_eq!(fetcher.calls().len(), 4);
        assert_eq!(report.inserted(), 2);
        assert_eq!(report.failed(), 2);
        assert!(!report.is_success());
        assert!(matches!(report.outcomes[1], (_, LocationOutcome::Failed(LocationError::Fetch(_)))));
        assert!(matches!(report.outcomes[2], (_, LocationOutcome::Failed(LocationError::Load(_)))));
        assert_eq!(store.rows().len(), 2);
        assert!(store.is_closed());
    }

    #[tokio::test]
    async fn ensure_table_failure_is_fatal_even_when_continuing() {
        let fetcher = FakeFetcher::default();
        let mut store = MemoryWarehouse::new(TableName::default());
        store.close().await.unwrap();

        let err = Pipeline::new(&fetcher, &mut store, FailurePolicy::Continue)
            .run(&locations(&["Rosario"]))
            .await
            .unwrap_err();

        assert!(matches!(err, PipelineError::EnsureTable(StoreError::Closed)));
        assert!(fetcher.calls().is_empty());
    }

    #[tokio::test]
    async fn empty_location_list_still_prepares_table() {
        let fetcher = FakeFetcher::default();
        let mut store = MemoryWarehouse::new(TableName::default());

        let report = Pipeline::new(&fetcher, &mut store, FailurePolicy::Abort).run(&[]).await.unwrap();

        assert_eq!(report.inserted(), 0);
        assert!(report.is_success());
        assert!(store.is_closed());
    }

    #[tokio::test]
    async fn location_error_wins_over_close_error() {
        let fetcher = FakeFetcher::failing(&["Rosario"]);
        let mut store = StubbornStore { inner: MemoryWarehouse::new(TableName::default()), close_calls: 0 };

        let err = Pipeline::new(&fetcher, &mut store, FailurePolicy::Abort)
            .run(&locations(&["Rosario"]))
            .await
            .unwrap_err();

        assert!(matches!(err, PipelineError::Location { .. }), "got {err}");
        assert_eq!(store.close_calls, 1);
    }

    #[tokio::test]
    async fn close_error_is_reported_after_clean_run() {
        let fetcher = FakeFetcher::default();
        let mut store = StubbornStore { inner: MemoryWarehouse::new(TableName::default()), close_calls: 0 };

        let err = Pipeline::new(&fetcher, &mut store, FailurePolicy::Abort)
            .run(&locations(&["Rosario"]))
            .await
            .unwrap_err();

        assert!(matches!(err, PipelineError::Close(_)));
        assert_eq!(store.inner.rows().len(), 1);
    }

    #[test]
    fn policy_parses_lowercase() {
        #[derive(Deserialize)]
        struct W {
            on_error: FailurePolicy,
        }
        let w: W = toml::from_str("on_error = \"continue\"").unwrap();
        assert_eq!(w.on_error, FailurePolicy::Continue);
    }
}
