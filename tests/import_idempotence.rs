use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use serde_json::json;

use schoolhubd::db::{open_store, SqliteStore, StoreOptions};
use schoolhubd::import::batch::BatchTuning;
use schoolhubd::import::executor::{ImportExecutor, ImportOptions};
use schoolhubd::import::records::ImportInput;
use schoolhubd::store::RowStore;

fn temp_workspace(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn open_test_store(prefix: &str) -> (SqliteStore, PathBuf) {
    let ws = temp_workspace(prefix);
    let store = open_store(&ws, &StoreOptions::default()).expect("open store");
    (store, ws)
}

fn test_options() -> ImportOptions {
    ImportOptions {
        batch: BatchTuning::unthrottled(50),
        ..ImportOptions::default()
    }
}

fn input(value: serde_json::Value) -> ImportInput {
    serde_json::from_value(value).expect("parse import input")
}

fn seed_class_and_teacher(executor: &ImportExecutor<'_, SqliteStore>) {
    let result = executor.execute(
        &input(json!({
            "users": [
                { "email": "lt1@school.edu", "fullName": "Lena Tan", "role": "teacher", "teacherType": "LT" }
            ],
            "classes": [
                { "name": "7A", "grade": "7", "track": "local", "academicYear": "2025" }
            ]
        })),
        "actor-1",
    );
    assert!(result.success, "seed failed: {:?}", result.errors);
}

#[test]
fn course_reimport_updates_instead_of_duplicating() {
    let (store, ws) = open_test_store("schoolhub-course-idem");
    let executor = ImportExecutor::with_options(&store, test_options());
    seed_class_and_teacher(&executor);

    let courses = json!({
        "courses": [
            { "className": "7A", "courseType": "LT", "teacherEmail": "lt1@school.edu", "academicYear": "2025" }
        ]
    });

    let first = executor.execute(&input(courses.clone()), "actor-1");
    assert!(first.success);
    assert_eq!(first.summary.courses.created, 1);
    assert_eq!(first.summary.courses.updated, 0);

    let second = executor.execute(&input(courses), "actor-1");
    assert!(second.success);
    assert_eq!(second.summary.courses.created, 0);
    assert_eq!(second.summary.courses.updated, 1);

    let rows = store.select("courses", &[], None).expect("select courses");
    assert_eq!(rows.len(), 1, "re-import must not duplicate course rows");

    let _ = std::fs::remove_dir_all(ws);
}

#[test]
fn score_reimport_updates_instead_of_duplicating() {
    let (store, ws) = open_test_store("schoolhub-score-idem");
    let executor = ImportExecutor::with_options(&store, test_options());
    seed_class_and_teacher(&executor);

    let setup = executor.execute(
        &input(json!({
            "courses": [
                { "className": "7A", "courseType": "LT", "teacherEmail": "lt1@school.edu", "academicYear": "2025" }
            ],
            "students": [
                { "studentNumber": "S-001", "fullName": "Mia Ko", "className": "7A" }
            ]
        })),
        "actor-1",
    );
    assert!(setup.success, "setup failed: {:?}", setup.errors);

    let scores = json!({
        "scores": [{
            "studentNumber": "S-001",
            "courseType": "LT",
            "examName": "Midterm",
            "assessmentCode": "MT",
            "score": 80.0
        }]
    });

    let first = executor.execute(&input(scores.clone()), "actor-1");
    assert!(first.success, "first run: {:?}", first.errors);
    assert_eq!(first.summary.scores.created, 1);

    let second = executor.execute(&input(scores), "actor-1");
    assert!(second.success, "second run: {:?}", second.errors);
    assert_eq!(second.summary.scores.created, 0);
    assert_eq!(second.summary.scores.updated, 1);

    assert_eq!(store.select("scores", &[], None).expect("scores").len(), 1);
    // The second run resolved the existing exam by name instead of minting
    // another one.
    assert_eq!(store.select("exams", &[], None).expect("exams").len(), 1);

    let _ = std::fs::remove_dir_all(ws);
}

#[test]
fn user_reimport_refreshes_in_place() {
    let (store, ws) = open_test_store("schoolhub-user-idem");
    let executor = ImportExecutor::with_options(&store, test_options());

    let first = executor.execute(
        &input(json!({
            "users": [{ "email": "o1@school.edu", "fullName": "Old Name", "role": "office" }]
        })),
        "actor-1",
    );
    assert!(first.success);
    assert_eq!(first.summary.users.created, 1);

    let second = executor.execute(
        &input(json!({
            "users": [{ "email": "o1@school.edu", "fullName": "New Name", "role": "office" }]
        })),
        "actor-1",
    );
    assert!(second.success);
    assert_eq!(second.summary.users.created, 0);
    assert_eq!(second.summary.users.updated, 1);

    let rows = store.select("users", &[], None).expect("select users");
    assert_eq!(rows.len(), 1);
    assert_eq!(
        rows[0].get("full_name").and_then(|v| v.as_str()),
        Some("New Name")
    );

    let _ = std::fs::remove_dir_all(ws);
}

#[test]
fn class_reimport_surfaces_per_row_errors() {
    let (store, ws) = open_test_store("schoolhub-class-dup");
    let executor = ImportExecutor::with_options(&store, test_options());

    let classes = json!({
        "classes": [
            { "name": "7A", "grade": "7", "track": "local", "academicYear": "2025" }
        ]
    });

    let first = executor.execute(&input(classes.clone()), "actor-1");
    assert!(first.success);
    assert_eq!(first.summary.classes.created, 1);

    // Classes are insert-only; the natural-key index rejects the duplicate
    // and the failure is attributed to the one offending row.
    let second = executor.execute(&input(classes), "actor-1");
    assert!(!second.success);
    assert_eq!(second.summary.classes.created, 0);
    assert_eq!(second.summary.classes.errors, 1);
    assert_eq!(second.errors.len(), 1);

    assert_eq!(store.select("classes", &[], None).expect("classes").len(), 1);

    let _ = std::fs::remove_dir_all(ws);
}
