use chrono::Utc;
use serde_json::{json, Value};

use super::batch::{write_in_batches, BatchTuning, WriteMode};
use super::records::{
    ClassImport, CourseCreationMode, CourseImport, ImportReport, ScoreImport, Stage, StudentImport,
    UserImport,
};
use super::resolve::{CourseRef, ReferenceResolver};
use crate::store::{Row, RowStore};

const SCORE_CONFLICT_KEYS: &[&str] = &["student_id", "exam_id", "assessment_code"];
const COURSE_CONFLICT_KEYS: &[&str] = &["class_id", "course_type"];

fn obj(value: Value) -> Row {
    match value {
        Value::Object(map) => map,
        _ => Row::new(),
    }
}

fn active_flag(active: bool) -> i64 {
    if active {
        1
    } else {
        0
    }
}

pub(crate) fn run_users_stage<S: RowStore>(
    store: &S,
    tuning: &BatchTuning,
    records: &[UserImport],
    report: &mut ImportReport,
) {
    tracing::debug!(count = records.len(), "users stage");
    let rows: Vec<Row> = records.iter().map(user_row).collect();
    // Re-imports refresh name/role in place instead of tripping the unique
    // email index.
    let outcome = write_in_batches(
        store,
        tuning,
        "users",
        Stage::Users,
        WriteMode::Upsert {
            conflict_keys: &["email"],
        },
        &rows,
    );
    report.apply_outcome(Stage::Users, outcome);
}

fn user_row(rec: &UserImport) -> Row {
    obj(json!({
        "email": rec.email,
        "full_name": rec.full_name,
        "role": rec.role,
        "teacher_type": rec.teacher_type,
        "grade": rec.grade,
        "track": rec.track,
        "is_active": active_flag(rec.active),
    }))
}

pub(crate) fn run_classes_stage<S: RowStore>(
    store: &S,
    tuning: &BatchTuning,
    records: &[ClassImport],
    mode: CourseCreationMode,
    resolver: &mut ReferenceResolver,
    report: &mut ImportReport,
) {
    tracing::debug!(count = records.len(), ?mode, "classes stage");
    let rows: Vec<Row> = records.iter().map(class_row).collect();
    let outcome = write_in_batches(store, tuning, "classes", Stage::Classes, WriteMode::Insert, &rows);
    report.apply_outcome(Stage::Classes, outcome);

    if mode == CourseCreationMode::TriggerAssisted {
        // The store has just seeded course rows for every inserted class;
        // refresh so both the classes and their seeded courses resolve, then
        // patch the teacher assignments on.
        resolver.refresh(store, report);
        let assignments: Vec<Row> = records
            .iter()
            .filter_map(|rec| teacher_assignment_row(rec, resolver, report))
            .collect();
        let outcome = write_in_batches(
            store,
            tuning,
            "courses",
            Stage::Courses,
            WriteMode::Upsert {
                conflict_keys: COURSE_CONFLICT_KEYS,
            },
            &assignments,
        );
        report.apply_outcome(Stage::Courses, outcome);
    }
}

fn class_row(rec: &ClassImport) -> Row {
    obj(json!({
        "name": rec.name,
        "grade": rec.grade,
        "level": rec.level,
        "track": rec.track,
        "academic_year": rec.academic_year,
        "is_active": active_flag(rec.active),
    }))
}

// The class row itself is already persisted by the time assignment runs, so
// every failure here stays a warning.
fn teacher_assignment_row(
    rec: &ClassImport,
    resolver: &ReferenceResolver,
    report: &mut ImportReport,
) -> Option<Row> {
    let email = rec.teacher_email.as_deref()?;

    let Some(teacher) = resolver.get_user(email) else {
        report.warn(
            Stage::Classes,
            format!("teacher \"{email}\" not found; class \"{}\" keeps an unassigned course", rec.name),
            json!({ "className": rec.name, "teacherEmail": email }),
        );
        return None;
    };
    let Some(course_type) = teacher.teacher_type.clone() else {
        report.warn(
            Stage::Classes,
            format!("teacher \"{email}\" has no declared course type; skipping assignment for class \"{}\"", rec.name),
            json!({ "className": rec.name, "teacherEmail": email }),
        );
        return None;
    };
    let Some(class_id) = resolver.get_class_id(&rec.name) else {
        report.warn(
            Stage::Classes,
            format!("class \"{}\" not found after insert; skipping teacher assignment", rec.name),
            json!({ "className": rec.name, "teacherEmail": email }),
        );
        return None;
    };

    Some(obj(json!({
        "class_id": class_id,
        "course_type": course_type,
        "teacher_id": teacher.id,
        "academic_year": rec.academic_year,
        "is_active": 1,
    })))
}

pub(crate) fn run_courses_stage<S: RowStore>(
    store: &S,
    tuning: &BatchTuning,
    records: &[CourseImport],
    resolver: &ReferenceResolver,
    report: &mut ImportReport,
) {
    tracing::debug!(count = records.len(), "courses stage");
    let rows: Vec<Row> = records
        .iter()
        .filter_map(|rec| course_row(rec, resolver, report))
        .collect();
    let outcome = write_in_batches(
        store,
        tuning,
        "courses",
        Stage::Courses,
        WriteMode::Upsert {
            conflict_keys: COURSE_CONFLICT_KEYS,
        },
        &rows,
    );
    report.apply_outcome(Stage::Courses, outcome);
}

pub(crate) fn course_row(
    rec: &CourseImport,
    resolver: &ReferenceResolver,
    report: &mut ImportReport,
) -> Option<Row> {
    let Some(class_id) = resolver.get_class_id(&rec.class_name) else {
        report.warn(
            Stage::Courses,
            format!("class \"{}\" not found; skipping course", rec.class_name),
            json!({ "className": rec.class_name, "courseType": rec.course_type }),
        );
        return None;
    };
    let Some(teacher_id) = resolver.get_user_id(&rec.teacher_email) else {
        report.warn(
            Stage::Courses,
            format!("teacher \"{}\" not found; skipping course", rec.teacher_email),
            json!({ "className": rec.class_name, "teacherEmail": rec.teacher_email }),
        );
        return None;
    };

    Some(obj(json!({
        "class_id": class_id,
        "course_type": rec.course_type,
        "teacher_id": teacher_id,
        "academic_year": rec.academic_year,
        "is_active": active_flag(rec.active),
    })))
}

pub(crate) fn run_students_stage<S: RowStore>(
    store: &S,
    tuning: &BatchTuning,
    records: &[StudentImport],
    resolver: &ReferenceResolver,
    report: &mut ImportReport,
) {
    tracing::debug!(count = records.len(), "students stage");
    let rows: Vec<Row> = records
        .iter()
        .map(|rec| student_row(rec, resolver, report))
        .collect();
    let outcome = write_in_batches(store, tuning, "students", Stage::Students, WriteMode::Insert, &rows);
    report.apply_outcome(Stage::Students, outcome);
}

pub(crate) fn student_row(
    rec: &StudentImport,
    resolver: &ReferenceResolver,
    report: &mut ImportReport,
) -> Row {
    // A named class that fails to resolve is a warning; the student still
    // lands, unassigned.
    let class_id = match rec.class_name.as_deref() {
        None => Value::Null,
        Some(name) => match resolver.get_class_id(name) {
            Some(id) => Value::String(id.to_string()),
            None => {
                report.warn(
                    Stage::Students,
                    format!(
                        "class \"{name}\" not found; importing student \"{}\" unassigned",
                        rec.student_number
                    ),
                    json!({ "studentNumber": rec.student_number, "className": name }),
                );
                Value::Null
            }
        },
    };

    obj(json!({
        "student_number": rec.student_number,
        "full_name": rec.full_name,
        "grade": rec.grade,
        "level": rec.level,
        "track": rec.track,
        "class_id": class_id,
        "is_active": active_flag(rec.active),
    }))
}

pub(crate) struct ScoreRefs {
    pub student_id: String,
    pub course: CourseRef,
    pub entered_by: String,
}

pub(crate) fn resolve_score_refs(
    rec: &ScoreImport,
    resolver: &ReferenceResolver,
    report: &mut ImportReport,
    actor_id: &str,
) -> Option<ScoreRefs> {
    let Some(student) = resolver.get_student(&rec.student_number) else {
        report.warn(
            Stage::Scores,
            format!("student \"{}\" not found; skipping score", rec.student_number),
            json!({
                "studentNumber": rec.student_number,
                "examName": rec.exam_name,
                "assessmentCode": rec.assessment_code,
            }),
        );
        return None;
    };

    let Some(course) = resolver.get_course(&rec.student_number, &rec.course_type) else {
        report.warn(
            Stage::Scores,
            format!(
                "no {} course enrollment found for student \"{}\"; skipping score",
                rec.course_type, rec.student_number
            ),
            json!({
                "studentNumber": rec.student_number,
                "courseType": rec.course_type,
                "examName": rec.exam_name,
            }),
        );
        return None;
    };

    let entered_by = match rec.entered_by_email.as_deref() {
        None => actor_id.to_string(),
        Some(email) => match resolver.get_user_id(email) {
            Some(id) => id.to_string(),
            None => {
                report.warn(
                    Stage::Scores,
                    format!("entering teacher \"{email}\" not found; falling back to import actor"),
                    json!({
                        "studentNumber": rec.student_number,
                        "enteredByEmail": email,
                    }),
                );
                actor_id.to_string()
            }
        },
    };

    Some(ScoreRefs {
        student_id: student.id.clone(),
        course: course.clone(),
        entered_by,
    })
}

// Resolve the exam by name, creating it against the enrollment's class when
// missing. Freshly created exams are registered on the resolver so same-run
// duplicates reuse the id instead of inserting twice.
fn resolve_exam<S: RowStore>(
    store: &S,
    rec: &ScoreImport,
    course: &CourseRef,
    actor_id: &str,
    resolver: &mut ReferenceResolver,
    report: &mut ImportReport,
) -> Option<String> {
    if let Some(id) = resolver.get_exam_id(&rec.exam_name) {
        return Some(id.to_string());
    }

    let row = obj(json!({
        "class_id": course.class_id,
        "name": rec.exam_name,
        "created_by": actor_id,
    }));
    match store.insert("exams", &[row]) {
        Ok(mut rows) => {
            let id = rows
                .pop()
                .and_then(|r| r.get("id").and_then(|v| v.as_str()).map(str::to_string));
            match id {
                Some(id) => {
                    resolver.add_exam_mapping(&rec.exam_name, &id);
                    Some(id)
                }
                None => {
                    report.warn(
                        Stage::Scores,
                        format!(
                            "exam \"{}\" was created without an id; skipping score",
                            rec.exam_name
                        ),
                        json!({ "examName": rec.exam_name, "classId": course.class_id }),
                    );
                    None
                }
            }
        }
        Err(e) => {
            report.warn(
                Stage::Scores,
                format!("failed to auto-create exam \"{}\"; skipping score", rec.exam_name),
                json!({
                    "examName": rec.exam_name,
                    "classId": course.class_id,
                    "message": e.to_string(),
                }),
            );
            None
        }
    }
}

pub(crate) fn run_scores_stage<S: RowStore>(
    store: &S,
    tuning: &BatchTuning,
    records: &[ScoreImport],
    resolver: &mut ReferenceResolver,
    report: &mut ImportReport,
    actor_id: &str,
) {
    tracing::debug!(count = records.len(), "scores stage");
    let mut rows: Vec<Row> = Vec::with_capacity(records.len());
    for rec in records {
        let Some(refs) = resolve_score_refs(rec, resolver, report, actor_id) else {
            continue;
        };
        let Some(exam_id) = resolve_exam(store, rec, &refs.course, actor_id, resolver, report)
        else {
            continue;
        };
        rows.push(score_row(rec, &refs, &exam_id));
    }

    let outcome = write_in_batches(
        store,
        tuning,
        "scores",
        Stage::Scores,
        WriteMode::Upsert {
            conflict_keys: SCORE_CONFLICT_KEYS,
        },
        &rows,
    );
    report.apply_outcome(Stage::Scores, outcome);
}

fn score_row(rec: &ScoreImport, refs: &ScoreRefs, exam_id: &str) -> Row {
    let now = Utc::now().to_rfc3339();
    obj(json!({
        "student_id": refs.student_id,
        "exam_id": exam_id,
        "assessment_code": rec.assessment_code,
        "score": rec.score,
        "entered_by": refs.entered_by,
        "entered_at": now,
        "updated_at": now,
    }))
}

// Trigger-assisted dry runs can only vet the teacher half of an assignment;
// the class and its seeded course do not exist until the real insert.
pub(crate) fn check_class_assignment(
    rec: &ClassImport,
    resolver: &ReferenceResolver,
    report: &mut ImportReport,
) {
    let Some(email) = rec.teacher_email.as_deref() else {
        return;
    };
    match resolver.get_user(email) {
        None => report.warn(
            Stage::Classes,
            format!("teacher \"{email}\" not found; class \"{}\" keeps an unassigned course", rec.name),
            json!({ "className": rec.name, "teacherEmail": email }),
        ),
        Some(teacher) if teacher.teacher_type.is_none() => report.warn(
            Stage::Classes,
            format!("teacher \"{email}\" has no declared course type; skipping assignment for class \"{}\"", rec.name),
            json!({ "className": rec.name, "teacherEmail": email }),
        ),
        Some(_) => {}
    }
}

/// The lookup half of the scores transform, shared with dry runs: no exam
/// creation, no writes.
pub(crate) fn check_score_refs(
    rec: &ScoreImport,
    resolver: &ReferenceResolver,
    report: &mut ImportReport,
    actor_id: &str,
) {
    let _ = resolve_score_refs(rec, resolver, report, actor_id);
}
