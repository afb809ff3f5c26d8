use std::time::Duration;

use serde_json::Value;

use super::records::{ImportExecutionError, Stage};
use crate::store::{Row, RowStore, StoreError};

pub const DEFAULT_CHUNK_SIZE: usize = 50;
pub const DEFAULT_ROW_RETRY_LIMIT: u32 = 3;
pub const DEFAULT_RETRY_DELAY_MS: u64 = 200;
pub const DEFAULT_CHUNK_DELAY_MS: u64 = 100;

#[derive(Debug, Clone)]
pub struct BatchTuning {
    pub chunk_size: usize,
    pub retry_limit: u32,
    pub retry_delay: Duration,
    pub chunk_delay: Duration,
}

impl Default for BatchTuning {
    fn default() -> Self {
        BatchTuning {
            chunk_size: DEFAULT_CHUNK_SIZE,
            retry_limit: DEFAULT_ROW_RETRY_LIMIT,
            retry_delay: Duration::from_millis(DEFAULT_RETRY_DELAY_MS),
            chunk_delay: Duration::from_millis(DEFAULT_CHUNK_DELAY_MS),
        }
    }
}

impl BatchTuning {
    /// Default chunking with the delays zeroed out. Tests and local stores
    /// have no backend to shield.
    pub fn unthrottled(chunk_size: usize) -> Self {
        BatchTuning {
            chunk_size,
            retry_limit: DEFAULT_ROW_RETRY_LIMIT,
            retry_delay: Duration::ZERO,
            chunk_delay: Duration::ZERO,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub enum WriteMode<'a> {
    Insert,
    Upsert { conflict_keys: &'a [&'a str] },
}

impl WriteMode<'_> {
    fn operation(&self) -> &'static str {
        match self {
            WriteMode::Insert => "create",
            WriteMode::Upsert { .. } => "upsert",
        }
    }
}

#[derive(Debug, Default)]
pub struct BatchOutcome {
    pub created: usize,
    pub updated: usize,
    pub errors: Vec<ImportExecutionError>,
}

/// Chunked bulk writes with per-row fallback. Knows nothing about entity
/// semantics; every stage funnels its transformed rows through here. Rows
/// are written chunk by chunk; a failed chunk is retried one row at a time
/// so a single bad row costs itself, not its siblings.
pub fn write_in_batches<S: RowStore>(
    store: &S,
    tuning: &BatchTuning,
    table: &str,
    stage: Stage,
    mode: WriteMode<'_>,
    rows: &[Row],
) -> BatchOutcome {
    let mut out = BatchOutcome::default();
    if rows.is_empty() {
        return out;
    }

    let chunk_size = tuning.chunk_size.max(1);
    let chunks: Vec<&[Row]> = rows.chunks(chunk_size).collect();
    let last = chunks.len() - 1;

    for (index, chunk) in chunks.iter().enumerate() {
        match write_chunk(store, table, mode, chunk) {
            Ok((created, updated)) => {
                out.created += created;
                out.updated += updated;
            }
            Err(e) => {
                tracing::warn!(
                    table,
                    chunk = index,
                    rows = chunk.len(),
                    error = %e,
                    "bulk write failed; retrying rows individually"
                );
                for row in chunk.iter() {
                    write_single(store, tuning, table, stage, mode, row, &mut out);
                }
            }
        }

        // Backpressure between chunks, success or not.
        if index < last && !tuning.chunk_delay.is_zero() {
            std::thread::sleep(tuning.chunk_delay);
        }
    }

    out
}

fn write_chunk<S: RowStore>(
    store: &S,
    table: &str,
    mode: WriteMode<'_>,
    rows: &[Row],
) -> Result<(usize, usize), StoreError> {
    match mode {
        WriteMode::Insert => {
            let inserted = store.insert(table, rows)?;
            Ok((inserted.len(), 0))
        }
        WriteMode::Upsert { conflict_keys } => {
            let outcome = store.upsert(table, rows, conflict_keys)?;
            Ok((outcome.created, outcome.updated))
        }
    }
}

fn write_single<S: RowStore>(
    store: &S,
    tuning: &BatchTuning,
    table: &str,
    stage: Stage,
    mode: WriteMode<'_>,
    row: &Row,
    out: &mut BatchOutcome,
) {
    let retry_limit = tuning.retry_limit.max(1);
    let mut last_error: Option<StoreError> = None;

    for attempt in 1..=retry_limit {
        match write_chunk(store, table, mode, std::slice::from_ref(row)) {
            Ok((created, updated)) => {
                out.created += created;
                out.updated += updated;
                return;
            }
            Err(e) => {
                last_error = Some(e);
                if attempt < retry_limit && !tuning.retry_delay.is_zero() {
                    std::thread::sleep(tuning.retry_delay);
                }
            }
        }
    }

    let message = last_error
        .map(|e| e.to_string())
        .unwrap_or_else(|| "write failed".to_string());
    out.errors.push(ImportExecutionError {
        stage,
        operation: mode.operation().to_string(),
        message,
        data: Value::Object(row.clone()),
    });
}
