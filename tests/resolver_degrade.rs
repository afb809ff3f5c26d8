use serde_json::{json, Value};

use schoolhubd::import::batch::BatchTuning;
use schoolhubd::import::executor::{ImportExecutor, ImportOptions};
use schoolhubd::import::records::{ImportInput, Stage};
use schoolhubd::store::{Row, RowStore, StoreError, UpsertOutcome};

/// Every lookup against `broken_table` fails; everything else is empty.
struct PartiallyBrokenStore {
    broken_table: &'static str,
}

impl RowStore for PartiallyBrokenStore {
    fn select(
        &self,
        table: &str,
        _filter: &[(&str, Value)],
        _limit: Option<usize>,
    ) -> Result<Vec<Row>, StoreError> {
        if table == self.broken_table {
            Err(StoreError::query(table, "connection reset"))
        } else {
            Ok(Vec::new())
        }
    }

    fn insert(&self, _table: &str, rows: &[Row]) -> Result<Vec<Row>, StoreError> {
        Ok(rows.to_vec())
    }

    fn upsert(
        &self,
        _table: &str,
        rows: &[Row],
        _conflict_keys: &[&str],
    ) -> Result<UpsertOutcome, StoreError> {
        Ok(UpsertOutcome {
            rows: rows.to_vec(),
            created: rows.len(),
            updated: 0,
        })
    }
}

#[test]
fn broken_lookup_degrades_to_warnings_not_failure() {
    let store = PartiallyBrokenStore {
        broken_table: "students",
    };
    let executor = ImportExecutor::with_options(
        &store,
        ImportOptions {
            batch: BatchTuning::unthrottled(50),
            ..ImportOptions::default()
        },
    );

    let input: ImportInput = serde_json::from_value(json!({
        "scores": [{
            "studentNumber": "S-001",
            "courseType": "LT",
            "examName": "Midterm",
            "assessmentCode": "MT",
            "score": 90.0
        }]
    }))
    .expect("parse import input");

    let result = executor.execute(&input, "actor-1");

    // The run keeps going; the broken lookup is reported distinctly from the
    // per-record miss it causes.
    assert!(result.success);
    assert_eq!(result.summary.scores.created, 0);
    assert_eq!(result.warnings.len(), 2, "warnings: {:?}", result.warnings);

    let degraded = &result.warnings[0];
    assert_eq!(degraded.stage, Stage::System);
    assert_eq!(
        degraded.context.get("kind").and_then(|v| v.as_str()),
        Some("degraded_lookup")
    );
    assert_eq!(
        degraded.context.get("entity").and_then(|v| v.as_str()),
        Some("students")
    );
    assert!(degraded
        .context
        .get("message")
        .and_then(|v| v.as_str())
        .is_some_and(|m| m.contains("connection reset")));

    let skipped = &result.warnings[1];
    assert_eq!(skipped.stage, Stage::Scores);
    assert!(skipped.message.contains("S-001"));
}
