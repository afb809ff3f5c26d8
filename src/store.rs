use serde_json::Value;
use thiserror::Error;

/// A store row: column name to JSON value. Surrogate `id` values are
/// uuid strings assigned by the store on insert when the caller leaves
/// them out.
pub type Row = serde_json::Map<String, Value>;

/// Backend-agnostic store failure. The import pipeline only ever needs
/// to know which table was touched and what the backend said; no driver
/// error types cross this seam.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{table}: query failed: {message}")]
    Query { table: String, message: String },
    #[error("{table}: write failed: {message}")]
    Write { table: String, message: String },
}

impl StoreError {
    pub fn query(table: &str, message: impl Into<String>) -> Self {
        StoreError::Query {
            table: table.to_string(),
            message: message.into(),
        }
    }

    pub fn write(table: &str, message: impl Into<String>) -> Self {
        StoreError::Write {
            table: table.to_string(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Default)]
pub struct UpsertOutcome {
    /// Rows as persisted, ids reflecting the surviving row on conflict.
    pub rows: Vec<Row>,
    pub created: usize,
    pub updated: usize,
}

/// The three operations the import pipeline consumes. A bulk `insert`
/// or `upsert` call succeeds or fails as a unit; there is no sub-row
/// granularity at this level.
pub trait RowStore {
    fn select(
        &self,
        table: &str,
        filter: &[(&str, Value)],
        limit: Option<usize>,
    ) -> Result<Vec<Row>, StoreError>;

    fn insert(&self, table: &str, rows: &[Row]) -> Result<Vec<Row>, StoreError>;

    fn upsert(
        &self,
        table: &str,
        rows: &[Row],
        conflict_keys: &[&str],
    ) -> Result<UpsertOutcome, StoreError>;
}
