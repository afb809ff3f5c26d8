use rusqlite::types::Value as SqlValue;
use rusqlite::{params_from_iter, Connection, OptionalExtension};
use serde_json::Value;
use std::path::Path;
use uuid::Uuid;

use crate::store::{Row, RowStore, StoreError, UpsertOutcome};

#[derive(Debug, Clone, Copy, Default)]
pub struct StoreOptions {
    /// Install the classes->courses seeding trigger ("trigger-assisted"
    /// deployments). Leave off when the pipeline inserts course rows itself.
    pub auto_course_rows: bool,
}

pub struct SqliteStore {
    conn: Connection,
}

pub fn open_store(workspace: &Path, options: &StoreOptions) -> anyhow::Result<SqliteStore> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join("schoolhub.sqlite3");
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS users(
            id TEXT PRIMARY KEY,
            email TEXT NOT NULL UNIQUE,
            full_name TEXT NOT NULL,
            role TEXT NOT NULL,
            teacher_type TEXT,
            grade TEXT,
            track TEXT,
            is_active INTEGER NOT NULL DEFAULT 1
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS classes(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            grade TEXT NOT NULL,
            level TEXT,
            track TEXT NOT NULL,
            academic_year TEXT NOT NULL,
            is_active INTEGER NOT NULL DEFAULT 1
        )",
        [],
    )?;
    conn.execute(
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_classes_natural_key
         ON classes(name, grade, track, academic_year)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS courses(
            id TEXT PRIMARY KEY,
            class_id TEXT NOT NULL,
            course_type TEXT NOT NULL,
            teacher_id TEXT,
            academic_year TEXT,
            is_active INTEGER NOT NULL DEFAULT 1,
            FOREIGN KEY(class_id) REFERENCES classes(id),
            FOREIGN KEY(teacher_id) REFERENCES users(id),
            UNIQUE(class_id, course_type)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_courses_class ON courses(class_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_courses_teacher ON courses(teacher_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            student_number TEXT NOT NULL UNIQUE,
            full_name TEXT NOT NULL,
            grade TEXT,
            level TEXT,
            track TEXT,
            class_id TEXT,
            is_active INTEGER NOT NULL DEFAULT 1,
            FOREIGN KEY(class_id) REFERENCES classes(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_class ON students(class_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS exams(
            id TEXT PRIMARY KEY,
            class_id TEXT NOT NULL,
            name TEXT NOT NULL,
            created_by TEXT,
            FOREIGN KEY(class_id) REFERENCES classes(id),
            UNIQUE(class_id, name)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_exams_class ON exams(class_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS scores(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            exam_id TEXT NOT NULL,
            assessment_code TEXT NOT NULL,
            score REAL,
            entered_by TEXT,
            entered_at TEXT,
            updated_at TEXT,
            FOREIGN KEY(student_id) REFERENCES students(id),
            FOREIGN KEY(exam_id) REFERENCES exams(id),
            UNIQUE(student_id, exam_id, assessment_code)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_scores_student ON scores(student_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_scores_exam ON scores(exam_id)",
        [],
    )?;

    if options.auto_course_rows {
        install_course_seed_trigger(&conn)?;
    }

    Ok(SqliteStore { conn })
}

// One course row per course type for every new class. INSERT OR IGNORE keeps
// the trigger quiet when a course row already exists for the class.
fn install_course_seed_trigger(conn: &Connection) -> anyhow::Result<()> {
    conn.execute(
        "CREATE TRIGGER IF NOT EXISTS trg_classes_seed_courses
         AFTER INSERT ON classes
         BEGIN
           INSERT OR IGNORE INTO courses(id, class_id, course_type, academic_year, is_active)
           VALUES (lower(hex(randomblob(16))), NEW.id, 'LT', NEW.academic_year, 1);
           INSERT OR IGNORE INTO courses(id, class_id, course_type, academic_year, is_active)
           VALUES (lower(hex(randomblob(16))), NEW.id, 'IT', NEW.academic_year, 1);
           INSERT OR IGNORE INTO courses(id, class_id, course_type, academic_year, is_active)
           VALUES (lower(hex(randomblob(16))), NEW.id, 'KCFS', NEW.academic_year, 1);
         END",
        [],
    )?;
    Ok(())
}

fn valid_ident(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn check_ident(table: &str, name: &str) -> Result<(), StoreError> {
    if valid_ident(name) {
        Ok(())
    } else {
        Err(StoreError::query(
            table,
            format!("invalid identifier: {name:?}"),
        ))
    }
}

fn bind_value(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                SqlValue::Integer(i)
            } else {
                SqlValue::Real(n.as_f64().unwrap_or(0.0))
            }
        }
        Value::String(s) => SqlValue::Text(s.clone()),
        // Structured values are rare on import rows; store them as JSON text.
        other => SqlValue::Text(other.to_string()),
    }
}

fn column_value(value: rusqlite::types::ValueRef<'_>) -> Value {
    match value {
        rusqlite::types::ValueRef::Null => Value::Null,
        rusqlite::types::ValueRef::Integer(i) => Value::Number(i.into()),
        rusqlite::types::ValueRef::Real(f) => serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        rusqlite::types::ValueRef::Text(t) => Value::String(String::from_utf8_lossy(t).to_string()),
        rusqlite::types::ValueRef::Blob(_) => Value::Null,
    }
}

fn with_id(row: &Row) -> Row {
    let mut full = row.clone();
    let needs_id = matches!(full.get("id"), None | Some(Value::Null));
    if needs_id {
        full.insert("id".to_string(), Value::String(Uuid::new_v4().to_string()));
    }
    full
}

fn insert_sql(table: &str, row: &Row) -> Result<(String, Vec<SqlValue>), StoreError> {
    let mut cols: Vec<&str> = Vec::with_capacity(row.len());
    let mut params: Vec<SqlValue> = Vec::with_capacity(row.len());
    for (col, value) in row {
        check_ident(table, col)?;
        cols.push(col.as_str());
        params.push(bind_value(value));
    }
    let placeholders = vec!["?"; cols.len()].join(", ");
    let sql = format!(
        "INSERT INTO {}({}) VALUES({})",
        table,
        cols.join(", "),
        placeholders
    );
    Ok((sql, params))
}

impl RowStore for SqliteStore {
    fn select(
        &self,
        table: &str,
        filter: &[(&str, Value)],
        limit: Option<usize>,
    ) -> Result<Vec<Row>, StoreError> {
        check_ident(table, table)?;
        let mut sql = format!("SELECT * FROM {table}");
        let mut params: Vec<SqlValue> = Vec::with_capacity(filter.len());
        if !filter.is_empty() {
            let mut conds: Vec<String> = Vec::with_capacity(filter.len());
            for (col, value) in filter {
                check_ident(table, col)?;
                conds.push(format!("{col} = ?"));
                params.push(bind_value(value));
            }
            sql.push_str(" WHERE ");
            sql.push_str(&conds.join(" AND "));
        }
        if let Some(limit) = limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }

        let mut stmt = self
            .conn
            .prepare(&sql)
            .map_err(|e| StoreError::query(table, e.to_string()))?;
        let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();
        let mut rows = stmt
            .query(params_from_iter(params))
            .map_err(|e| StoreError::query(table, e.to_string()))?;

        let mut out: Vec<Row> = Vec::new();
        loop {
            let row = match rows.next() {
                Ok(Some(row)) => row,
                Ok(None) => break,
                Err(e) => return Err(StoreError::query(table, e.to_string())),
            };
            let mut record = Row::new();
            for (i, name) in columns.iter().enumerate() {
                let value = row
                    .get_ref(i)
                    .map_err(|e| StoreError::query(table, e.to_string()))?;
                record.insert(name.clone(), column_value(value));
            }
            out.push(record);
        }
        Ok(out)
    }

    fn insert(&self, table: &str, rows: &[Row]) -> Result<Vec<Row>, StoreError> {
        check_ident(table, table)?;
        if rows.is_empty() {
            return Ok(Vec::new());
        }

        // One transaction per bulk call so the call fails as a unit.
        let tx = self
            .conn
            .unchecked_transaction()
            .map_err(|e| StoreError::write(table, e.to_string()))?;

        let mut out: Vec<Row> = Vec::with_capacity(rows.len());
        for row in rows {
            let full = with_id(row);
            let (sql, params) = insert_sql(table, &full)?;
            if let Err(e) = tx.execute(&sql, params_from_iter(params)) {
                let message = e.to_string();
                let _ = tx.rollback();
                return Err(StoreError::write(table, message));
            }
            out.push(full);
        }

        tx.commit()
            .map_err(|e| StoreError::write(table, e.to_string()))?;
        Ok(out)
    }

    fn upsert(
        &self,
        table: &str,
        rows: &[Row],
        conflict_keys: &[&str],
    ) -> Result<UpsertOutcome, StoreError> {
        check_ident(table, table)?;
        for key in conflict_keys {
            check_ident(table, key)?;
        }
        if conflict_keys.is_empty() {
            return Err(StoreError::write(table, "upsert requires conflict keys"));
        }
        let mut outcome = UpsertOutcome::default();
        if rows.is_empty() {
            return Ok(outcome);
        }

        let probe_sql = format!(
            "SELECT id FROM {} WHERE {}",
            table,
            conflict_keys
                .iter()
                .map(|k| format!("{k} = ?"))
                .collect::<Vec<_>>()
                .join(" AND ")
        );

        let tx = self
            .conn
            .unchecked_transaction()
            .map_err(|e| StoreError::write(table, e.to_string()))?;

        for row in rows {
            let mut full = with_id(row);

            let probe_params: Vec<SqlValue> = conflict_keys
                .iter()
                .map(|k| bind_value(full.get(*k).unwrap_or(&Value::Null)))
                .collect();
            let existing: Option<String> = match tx
                .query_row(&probe_sql, params_from_iter(probe_params), |r| r.get(0))
                .optional()
            {
                Ok(v) => v,
                Err(e) => {
                    let message = e.to_string();
                    let _ = tx.rollback();
                    return Err(StoreError::write(table, message));
                }
            };
            // Keep the surviving surrogate id on conflict so callers see the
            // persisted row, not the discarded candidate.
            if let Some(id) = &existing {
                full.insert("id".to_string(), Value::String(id.clone()));
            }

            let update_cols: Vec<String> = full
                .keys()
                .filter(|k| k.as_str() != "id" && !conflict_keys.contains(&k.as_str()))
                .cloned()
                .collect();
            let (base_sql, params) = insert_sql(table, &full)?;
            let sql = if update_cols.is_empty() {
                format!(
                    "{} ON CONFLICT({}) DO NOTHING",
                    base_sql,
                    conflict_keys.join(", ")
                )
            } else {
                format!(
                    "{} ON CONFLICT({}) DO UPDATE SET {}",
                    base_sql,
                    conflict_keys.join(", "),
                    update_cols
                        .iter()
                        .map(|c| format!("{c} = excluded.{c}"))
                        .collect::<Vec<_>>()
                        .join(", ")
                )
            };
            if let Err(e) = tx.execute(&sql, params_from_iter(params)) {
                let message = e.to_string();
                let _ = tx.rollback();
                return Err(StoreError::write(table, message));
            }

            if existing.is_some() {
                outcome.updated += 1;
            } else {
                outcome.created += 1;
            }
            outcome.rows.push(full);
        }

        tx.commit()
            .map_err(|e| StoreError::write(table, e.to_string()))?;
        Ok(outcome)
    }
}
