use async_trait::async_trait;
use chrono::Utc;

use crate::{
    error::StoreError,
    model::{Observation, StoredObservation},
};

use super::{ObservationStore, TableName};

/// In-process warehouse with the same contract as the SQL backend.
///
/// Used for `--dry-run` and tests: inserts fail until the table is ensured,
/// rows get sequential ids and an ingestion timestamp.
#[derive(Debug)]
pub struct MemoryWarehouse {
    table: TableName,
    created: bool,
    closed: bool,
    rows: Vec<StoredObservation>,
}

impl MemoryWarehouse {
    pub fn new(table: TableName) -> Self {
        Self { table, created: false, closed: false, rows: Vec::new() }
    }

    pub fn rows(&self) -> &[StoredObservation] {
        &self.rows
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

#[async_trait]
impl ObservationStore for MemoryWarehouse {
    fn table(&self) -> &TableName {
        &self.table
    }

    async fn ensure_table(&mut self) -> Result<(), StoreError> {
        if self.closed {
            return Err(StoreError::Closed);
        }
        self.created = true;
        Ok(())
    }

    async fn insert(&mut self, observation: &Observation) -> Result<(), StoreError> {
        if self.closed {
            return Err(StoreError::Closed);
        }
        if !self.created {
            return Err(StoreError::MissingTable(self.table.to_string()));
        }

        let id = self.rows.len() as i64 + 1;
        self.rows.push(StoredObservation {
            id,
            observation: observation.clone(),
            ingestion_time: Utc::now(),
        });
        Ok(())
    }

    async fn close(&mut self) -> Result<(), StoreError> {
        self.closed = true;
        Ok(())
    }
}
