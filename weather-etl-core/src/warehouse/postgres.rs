use async_trait::async_trait;
use sqlx::{
    Connection, PgConnection,
    postgres::PgConnectOptions,
};
use tracing::{debug, info, instrument};

use crate::{config::ConnectionSettings, error::StoreError, model::Observation};

use super::{Dialect, ObservationStore, TableName, check_columns, create_table_sql, insert_sql};

const COLUMNS_SQL: &str = "SELECT column_name::text FROM information_schema.columns \
     WHERE table_schema::text = COALESCE($1::text, current_schema()::text) \
     AND table_name::text = $2::text";

/// Redshift or PostgreSQL warehouse over a single connection.
///
/// The connection is dropped with the value; [`ObservationStore::close`]
/// terminates it cleanly.
#[derive(Debug)]
pub struct PgWarehouse {
    conn: Option<PgConnection>,
    table: TableName,
    dialect: Dialect,
    insert_sql: String,
}

impl PgWarehouse {
    #[instrument(skip_all, fields(host = %settings.host, port = settings.port, db = %settings.dbname))]
    pub async fn connect(
        settings: &ConnectionSettings,
        table: TableName,
        dialect: Dialect,
    ) -> Result<Self, StoreError> {
        let options = PgConnectOptions::new()
            .host(&settings.host)
            .port(settings.port)
            .database(&settings.dbname)
            .username(&settings.user)
            .password(&settings.password);

        let conn = PgConnection::connect_with(&options).await.map_err(StoreError::Connect)?;
        info!(%dialect, %table, "connected to warehouse");

        Ok(Self { conn: Some(conn), insert_sql: insert_sql(&table), table, dialect })
    }
}

#[async_trait]
impl ObservationStore for PgWarehouse {
    fn table(&self) -> &TableName {
        &self.table
    }

    async fn ensure_table(&mut self) -> Result<(), StoreError> {
        let conn = self.conn.as_mut().ok_or(StoreError::Closed)?;

        sqlx::query(&create_table_sql(self.dialect, &self.table))
            .execute(&mut *conn)
            .await
            .map_err(StoreError::Statement)?;

        // Unquoted identifiers are folded to lower case by the server.
        let columns: Vec<String> = sqlx::query_scalar(COLUMNS_SQL)
            .bind(self.table.schema().map(str::to_ascii_lowercase))
            .bind(self.table.name().to_ascii_lowercase())
            .fetch_all(&mut *conn)
            .await
            .map_err(StoreError::Statement)?;
        debug!(table = %self.table, ?columns, "verified destination columns");

        check_columns(&self.table, &columns)
    }

    async fn insert(&mut self, observation: &Observation) -> Result<(), StoreError> {
        let conn = self.conn.as_mut().ok_or(StoreError::Closed)?;

        sqlx::query(&self.insert_sql)
            .bind(&observation.location)
            .bind(observation.temperature)
            .bind(&observation.weather_descriptions)
            .bind(observation.observation_time.naive_utc())
            .execute(conn)
            .await
            .map_err(StoreError::Statement)?;

        Ok(())
    }

    async fn close(&mut self) -> Result<(), StoreError> {
        if let Some(conn) = self.conn.take() {
            conn.close().await.map_err(StoreError::Close)?;
            debug!("warehouse connection closed");
        }
        Ok(())
    }
}
