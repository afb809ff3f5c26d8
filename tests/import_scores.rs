use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use serde_json::json;

use schoolhubd::db::{open_store, SqliteStore, StoreOptions};
use schoolhubd::import::batch::BatchTuning;
use schoolhubd::import::executor::{ImportExecutor, ImportOptions};
use schoolhubd::import::records::{ImportInput, Stage};
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

/// Teacher, class, LT course, and three enrolled students.
fn seed_roster(executor: &ImportExecutor<'_, SqliteStore>) {
    let result = executor.execute(
        &input(json!({
            "users": [
                { "email": "lt1@school.edu", "fullName": "Lena Tan", "role": "teacher", "teacherType": "LT" }
            ],
            "classes": [
                { "name": "7A", "grade": "7", "track": "local", "academicYear": "2025" }
            ],
            "courses": [
                { "className": "7A", "courseType": "LT", "teacherEmail": "lt1@school.edu", "academicYear": "2025" }
            ],
            "students": [
                { "studentNumber": "S-001", "fullName": "Mia Ko", "className": "7A" },
                { "studentNumber": "S-002", "fullName": "Ben Wu", "className": "7A" },
                { "studentNumber": "S-003", "fullName": "Ana Liu", "className": "7A" }
            ]
        })),
        "actor-1",
    );
    assert!(result.success, "seed failed: {:?}", result.errors);
}

fn score(student: &str, exam: &str, code: &str, value: f64) -> serde_json::Value {
    json!({
        "studentNumber": student,
        "courseType": "LT",
        "examName": exam,
        "assessmentCode": code,
        "score": value
    })
}

#[test]
fn one_bad_record_costs_exactly_itself() {
    let (store, ws) = open_test_store("schoolhub-score-isolation");
    let executor = ImportExecutor::with_options(&store, test_options());
    seed_roster(&executor);

    let result = executor.execute(
        &input(json!({
            "scores": [
                score("S-001", "Unit 1", "U1", 80.0),
                score("S-999", "Unit 1", "U1", 70.0),
                score("S-002", "Unit 1", "U1", 60.0),
                score("S-003", "Unit 1", "U1", 50.0)
            ]
        })),
        "actor-1",
    );

    assert!(result.success);
    assert_eq!(result.summary.scores.created, 3);
    assert_eq!(result.warnings.len(), 1, "warnings: {:?}", result.warnings);
    assert_eq!(result.warnings[0].stage, Stage::Scores);
    assert!(result.warnings[0].message.contains("S-999"));

    assert_eq!(store.select("scores", &[], None).expect("scores").len(), 3);

    let _ = std::fs::remove_dir_all(ws);
}

#[test]
fn same_run_scores_share_one_auto_created_exam() {
    let (store, ws) = open_test_store("schoolhub-exam-dedup");
    let executor = ImportExecutor::with_options(&store, test_options());
    seed_roster(&executor);

    let result = executor.execute(
        &input(json!({
            "scores": [
                score("S-001", "Final", "F1", 88.0),
                score("S-002", "Final", "F1", 92.0)
            ]
        })),
        "actor-1",
    );

    assert!(result.success, "errors: {:?}", result.errors);
    assert!(result.warnings.is_empty());
    assert_eq!(result.summary.scores.created, 2);

    // Both records resolved to the same exam: one insert, one mapping reuse.
    let exams = store.select("exams", &[], None).expect("exams");
    assert_eq!(exams.len(), 1);
    let exam_id = exams[0].get("id").and_then(|v| v.as_str()).expect("exam id");

    let scores = store.select("scores", &[], None).expect("scores");
    assert_eq!(scores.len(), 2);
    assert!(scores
        .iter()
        .all(|s| s.get("exam_id").and_then(|v| v.as_str()) == Some(exam_id)));

    let _ = std::fs::remove_dir_all(ws);
}

#[test]
fn unknown_entering_teacher_falls_back_to_actor() {
    let (store, ws) = open_test_store("schoolhub-actor-fallback");
    let executor = ImportExecutor::with_options(&store, test_options());
    seed_roster(&executor);

    let mut record = score("S-001", "Quiz 3", "Q3", 77.0);
    record["enteredByEmail"] = json!("ghost@school.edu");

    let result = executor.execute(&input(json!({ "scores": [record] })), "actor-1");

    // The record still lands, attributed to the import actor.
    assert!(result.success);
    assert_eq!(result.summary.scores.created, 1);
    assert_eq!(result.warnings.len(), 1);
    assert!(result.warnings[0].message.contains("ghost@school.edu"));

    let scores = store.select("scores", &[], None).expect("scores");
    assert_eq!(
        scores[0].get("entered_by").and_then(|v| v.as_str()),
        Some("actor-1")
    );

    let _ = std::fs::remove_dir_all(ws);
}

#[test]
fn student_without_matching_enrollment_is_skipped() {
    let (store, ws) = open_test_store("schoolhub-no-enrollment");
    let executor = ImportExecutor::with_options(&store, test_options());
    seed_roster(&executor);

    // Roster has an LT course only; an IT score has nothing to attach to.
    let result = executor.execute(
        &input(json!({
            "scores": [{
                "studentNumber": "S-001",
                "courseType": "IT",
                "examName": "IT Check",
                "assessmentCode": "C1",
                "score": 65.0
            }]
        })),
        "actor-1",
    );

    assert!(result.success);
    assert_eq!(result.summary.scores.created, 0);
    assert_eq!(result.warnings.len(), 1);
    assert!(result.warnings[0].message.contains("IT"));
    assert_eq!(store.select("exams", &[], None).expect("exams").len(), 0);

    let _ = std::fs::remove_dir_all(ws);
}
