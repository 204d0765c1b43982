//! Destination table: schema readiness and row persistence.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt::{self, Debug};
use tracing::debug;

use crate::{
    error::{ConfigError, LoadError, StoreError},
    model::Observation,
};

pub mod memory;
pub mod postgres;

pub use memory::MemoryWarehouse;
pub use postgres::PgWarehouse;

/// Columns an existing destination table must have.
pub const EXPECTED_COLUMNS: &[&str] = &[
    "id",
    "location",
    "temperature",
    "weather_descriptions",
    "observation_time",
    "ingestion_time",
];

/// SQL flavour used for the create-table statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    #[default]
    Redshift,
    Postgres,
}

impl Dialect {
    pub fn as_str(&self) -> &'static str {
        match self {
            Dialect::Redshift => "redshift",
            Dialect::Postgres => "postgres",
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A validated, optionally schema-qualified table name.
///
/// Only `[A-Za-z_][A-Za-z0-9_]*` parts are accepted, so the name can be
/// spliced into SQL text without quoting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TableName {
    schema: Option<String>,
    name: String,
}

impl TableName {
    const MAX_PART_LEN: usize = 127;

    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        let invalid = || ConfigError::InvalidTableName(raw.to_string());

        let (schema, name) = match raw.split_once('.') {
            Some((schema, name)) => (Some(schema), name),
            None => (None, raw),
        };

        let valid_part = |part: &str| {
            let mut chars = part.chars();
            part.len() <= Self::MAX_PART_LEN
                && chars.next().is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        };

        if !valid_part(name) || schema.is_some_and(|s| !valid_part(s)) {
            return Err(invalid());
        }

        Ok(Self { schema: schema.map(str::to_string), name: name.to_string() })
    }

    pub fn schema(&self) -> Option<&str> {
        self.schema.as_deref()
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Default for TableName {
    fn default() -> Self {
        Self { schema: None, name: "weather_data".to_string() }
    }
}

impl fmt::Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.schema {
            Some(schema) => write!(f, "{schema}.{}", self.name),
            None => f.write_str(&self.name),
        }
    }
}

impl TryFrom<String> for TableName {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<TableName> for String {
    fn from(value: TableName) -> Self {
        value.to_string()
    }
}

/// Conditional create-table statement for `table`.
pub fn create_table_sql(dialect: Dialect, table: &TableName) -> String {
    let (id, now) = match dialect {
        Dialect::Redshift => ("INTEGER IDENTITY(1,1)", "GETDATE()"),
        Dialect::Postgres => ("INTEGER GENERATED BY DEFAULT AS IDENTITY", "(NOW() AT TIME ZONE 'UTC')"),
    };

    format!(
        "CREATE TABLE IF NOT EXISTS {table} (\n    \
             id {id},\n    \
             location VARCHAR(255),\n    \
             temperature FLOAT,\n    \
             weather_descriptions VARCHAR(255),\n    \
             observation_time TIMESTAMP,\n    \
             ingestion_time TIMESTAMP DEFAULT {now}\n\
         )"
    )
}

/// Single-row insert; parameters are location, temperature, descriptions, observation time.
pub fn insert_sql(table: &TableName) -> String {
    format!(
        "INSERT INTO {table} (location, temperature, weather_descriptions, observation_time) \
         VALUES ($1, $2, $3, $4)"
    )
}

/// Compare the columns found on an existing table with [`EXPECTED_COLUMNS`].
pub fn check_columns<S: AsRef<str>>(table: &TableName, present: &[S]) -> Result<(), StoreError> {
    let missing: Vec<String> = EXPECTED_COLUMNS
        .iter()
        .filter(|expected| !present.iter().any(|p| p.as_ref().eq_ignore_ascii_case(expected)))
        .map(|c| c.to_string())
        .collect();

    if missing.is_empty() {
        Ok(())
    } else {
        Err(StoreError::IncompatibleSchema { table: table.to_string(), missing })
    }
}

/// Storage backend for observations.
///
/// Every statement commits on its own; implementations hold at most one
/// connection.
#[async_trait]
pub trait ObservationStore: Send + Debug {
    fn table(&self) -> &TableName;

    /// Create the table if absent, then fail if an existing table lacks expected columns.
    async fn ensure_table(&mut self) -> Result<(), StoreError>;

    /// Append one row.
    async fn insert(&mut self, observation: &Observation) -> Result<(), StoreError>;

    /// Release the connection. Calling it again is a no-op.
    async fn close(&mut self) -> Result<(), StoreError>;
}

/// Turns fetched documents into rows of a store.
#[derive(Debug)]
pub struct Loader<'a, S: ObservationStore + ?Sized> {
    store: &'a mut S,
}

impl<'a, S: ObservationStore + ?Sized> Loader<'a, S> {
    pub fn new(store: &'a mut S) -> Self {
        Self { store }
    }

    pub async fn ensure_table(&mut self) -> Result<(), StoreError> {
        self.store.ensure_table().await
    }

    /// Normalize `document` and append it, committing immediately.
    pub async fn insert(&mut self, document: &Value) -> Result<Observation, LoadError> {
        let observation = Observation::from_document(document)?;
        debug!(location = %observation.location, table = %self.store.table(), "inserting observation");
        self.store.insert(&observation).await?;
        Ok(observation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn table_name_accepts_plain_and_qualified() {
        let t = TableName::parse("weather_data").unwrap();
        assert_eq!(t.schema(), None);
        assert_eq!(t.name(), "weather_data");

        let t = TableName::parse("staging.Weather_2024").unwrap();
        assert_eq!(t.schema(), Some("staging"));
        assert_eq!(t.name(), "Weather_2024");
        assert_eq!(t.to_string(), "staging.Weather_2024");
    }

    #[test]
    fn table_name_rejects_injection_and_junk() {
        for raw in ["", "1abc", "a-b", "a.b.c", ".x", "x.", "weather; DROP TABLE t", "tbl name"] {
            assert!(TableName::parse(raw).is_err(), "{raw:?} should be rejected");
        }
        assert!(TableName::parse(&"a".repeat(128)).is_err());
        assert!(TableName::parse(&"a".repeat(127)).is_ok());
    }

    #[test]
    fn redshift_ddl_uses_identity_and_getdate() {
        let sql = create_table_sql(Dialect::Redshift, &TableName::default());

        assert!(sql.starts_with("CREATE TABLE IF NOT EXISTS weather_data ("));
        assert!(sql.contains("id INTEGER IDENTITY(1,1)"));
        assert!(sql.contains("ingestion_time TIMESTAMP DEFAULT GETDATE()"));
        for column in EXPECTED_COLUMNS {
            assert!(sql.contains(column), "missing {column}");
        }
    }

    #[test]
    fn postgres_ddl_uses_standard_identity() {
        let table = TableName::parse("public.obs").unwrap();
        let sql = create_table_sql(Dialect::Postgres, &table);

        assert!(sql.starts_with("CREATE TABLE IF NOT EXISTS public.obs ("));
        assert!(sql.contains("GENERATED BY DEFAULT AS IDENTITY"));
        assert!(sql.contains("NOW() AT TIME ZONE 'UTC'"));
        assert!(!sql.contains("GETDATE"));
    }

    #[test]
    fn insert_targets_four_columns() {
        let sql = insert_sql(&TableName::default());
        assert_eq!(
            sql,
            "INSERT INTO weather_data (location, temperature, weather_descriptions, observation_time) \
             VALUES ($1, $2, $3, $4)"
        );
    }

    #[test]
    fn check_columns_reports_missing() {
        let table = TableName::default();
        assert!(check_columns(&table, EXPECTED_COLUMNS).is_ok());
        assert!(check_columns(&table, &["ID", "Location", "temperature", "weather_descriptions", "observation_time", "ingestion_time", "extra"]).is_ok());

        let err = check_columns(&table, &["id", "location", "temp"]).unwrap_err();
        match err {
            StoreError::IncompatibleSchema { table, missing } => {
                assert_eq!(table, "weather_data");
                assert_eq!(missing, ["temperature", "weather_descriptions", "observation_time", "ingestion_time"]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn dialect_parses_from_toml() {
        #[derive(Deserialize)]
        struct W {
            dialect: Dialect,
        }
        let w: W = toml::from_str("dialect = \"postgres\"").unwrap();
        assert_eq!(w.dialect, Dialect::Postgres);
        assert!(toml::from_str::<W>("dialect = \"mysql\"").is_err());
    }

    #[tokio::test]
    async fn loader_inserts_normalized_row() {
        let mut store = MemoryWarehouse::new(TableName::default());
        let mut loader = Loader::new(&mut store);
        loader.ensure_table().await.unwrap();

        let doc = json!({
            "name": "Rosario",
            "main": {"temp": 21.5},
            "weather": [{"description": "clear sky"}],
            "dt": 1700000000
        });
        let obs = loader.insert(&doc).await.unwrap();

        assert_eq!(obs.observation_time.to_rfc3339(), "2023-11-14T22:13:20+00:00");
        assert_eq!(store.rows().len(), 1);
        assert_eq!(store.rows()[0].observation, obs);
    }

    #[tokio::test]
    async fn loader_rejects_bad_document_without_writing() {
        let mut store = MemoryWarehouse::new(TableName::default());
        let mut loader = Loader::new(&mut store);
        loader.ensure_table().await.unwrap();

        let err = loader.insert(&json!({"cod": "404", "message": "city not found"})).await.unwrap_err();

        assert!(matches!(err, LoadError::Shape(_)));
        assert!(store.rows().is_empty());
    }

    #[tokio::test]
    async fn loader_surfaces_store_errors() {
        let mut store = MemoryWarehouse::new(TableName::default());
        let mut loader = Loader::new(&mut store);

        let doc = json!({"name": "Rome", "main": {"temp": 3.0}, "weather": [], "dt": 1});
        let err = loader.insert(&doc).await.unwrap_err();

        assert!(matches!(err, LoadError::Store(StoreError::MissingTable(_))));
    }
}
