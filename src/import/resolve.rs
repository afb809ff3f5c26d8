use std::collections::HashMap;

use serde_json::json;

use super::records::{ImportReport, Stage};
use crate::store::{Row, RowStore, StoreError};

/// Cap per lookup query. Imports against stores larger than this see the
/// overflow as "not found", which downgrades to per-record warnings.
pub const LOOKUP_PAGE_LIMIT: usize = 5000;

#[derive(Debug, Clone)]
pub struct UserRef {
    pub id: String,
    /// The course type this teacher is declared for (LT, IT, KCFS).
    pub teacher_type: Option<String>,
}

#[derive(Debug, Clone)]
pub struct StudentRef {
    pub id: String,
    pub class_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CourseRef {
    pub id: String,
    pub class_id: String,
}

/// Natural-key to surrogate-id maps, rebuilt wholesale from the store so a
/// refresh always reflects every write the run has made so far. Lookups never
/// fail: a missing key is `None`, and a failed store query degrades that
/// entity's map to empty rather than aborting the import.
#[derive(Debug, Default)]
pub struct ReferenceResolver {
    users_by_email: HashMap<String, UserRef>,
    classes_by_name: HashMap<String, String>,
    students_by_number: HashMap<String, StudentRef>,
    exams_by_name: HashMap<String, String>,
    courses_by_enrollment: HashMap<(String, String), CourseRef>,
}

fn row_str(row: &Row, key: &str) -> Option<String> {
    row.get(key).and_then(|v| v.as_str()).map(str::to_string)
}

impl ReferenceResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn refresh<S: RowStore>(&mut self, store: &S, report: &mut ImportReport) {
        self.users_by_email.clear();
        self.classes_by_name.clear();
        self.students_by_number.clear();
        self.exams_by_name.clear();
        self.courses_by_enrollment.clear();

        match store.select("users", &[], Some(LOOKUP_PAGE_LIMIT)) {
            Ok(rows) => {
                for row in &rows {
                    let (Some(email), Some(id)) = (row_str(row, "email"), row_str(row, "id"))
                    else {
                        continue;
                    };
                    self.users_by_email.insert(
                        email,
                        UserRef {
                            id,
                            teacher_type: row_str(row, "teacher_type"),
                        },
                    );
                }
            }
            Err(e) => degraded(report, "users", &e),
        }

        match store.select("classes", &[], Some(LOOKUP_PAGE_LIMIT)) {
            Ok(rows) => {
                for row in &rows {
                    let (Some(name), Some(id)) = (row_str(row, "name"), row_str(row, "id")) else {
                        continue;
                    };
                    self.classes_by_name.insert(name, id);
                }
            }
            Err(e) => degraded(report, "classes", &e),
        }

        match store.select("students", &[], Some(LOOKUP_PAGE_LIMIT)) {
            Ok(rows) => {
                for row in &rows {
                    let (Some(number), Some(id)) =
                        (row_str(row, "student_number"), row_str(row, "id"))
                    else {
                        continue;
                    };
                    self.students_by_number.insert(
                        number,
                        StudentRef {
                            id,
                            class_id: row_str(row, "class_id"),
                        },
                    );
                }
            }
            Err(e) => degraded(report, "students", &e),
        }

        match store.select("exams", &[], Some(LOOKUP_PAGE_LIMIT)) {
            Ok(rows) => {
                for row in &rows {
                    let (Some(name), Some(id)) = (row_str(row, "name"), row_str(row, "id")) else {
                        continue;
                    };
                    self.exams_by_name.insert(name, id);
                }
            }
            Err(e) => degraded(report, "exams", &e),
        }

        // Enrollment map: students reach courses through their class, so a
        // (student number, course type) pair resolves to the class's course
        // row of that type.
        match store.select("courses", &[], Some(LOOKUP_PAGE_LIMIT)) {
            Ok(rows) => {
                let mut by_class: HashMap<String, Vec<(String, String)>> = HashMap::new();
                for row in &rows {
                    let (Some(class_id), Some(course_type), Some(id)) = (
                        row_str(row, "class_id"),
                        row_str(row, "course_type"),
                        row_str(row, "id"),
                    ) else {
                        continue;
                    };
                    by_class.entry(class_id).or_default().push((course_type, id));
                }
                for (number, student) in &self.students_by_number {
                    let Some(class_id) = &student.class_id else {
                        continue;
                    };
                    let Some(courses) = by_class.get(class_id) else {
                        continue;
                    };
                    for (course_type, course_id) in courses {
                        self.courses_by_enrollment.insert(
                            (number.clone(), course_type.clone()),
                            CourseRef {
                                id: course_id.clone(),
                                class_id: class_id.clone(),
                            },
                        );
                    }
                }
            }
            Err(e) => degraded(report, "courses", &e),
        }
    }

    pub fn get_user(&self, email: &str) -> Option<&UserRef> {
        self.users_by_email.get(email)
    }

    pub fn get_user_id(&self, email: &str) -> Option<&str> {
        self.users_by_email.get(email).map(|u| u.id.as_str())
    }

    pub fn get_class_id(&self, name: &str) -> Option<&str> {
        self.classes_by_name.get(name).map(String::as_str)
    }

    pub fn get_student(&self, student_number: &str) -> Option<&StudentRef> {
        self.students_by_number.get(student_number)
    }

    pub fn get_student_id(&self, student_number: &str) -> Option<&str> {
        self.students_by_number
            .get(student_number)
            .map(|s| s.id.as_str())
    }

    pub fn get_exam_id(&self, name: &str) -> Option<&str> {
        self.exams_by_name.get(name).map(String::as_str)
    }

    pub fn get_course(&self, student_number: &str, course_type: &str) -> Option<&CourseRef> {
        self.courses_by_enrollment
            .get(&(student_number.to_string(), course_type.to_string()))
    }

    /// Registers an exam created mid-stage so later records in the same run
    /// reuse it instead of inserting a duplicate.
    pub fn add_exam_mapping(&mut self, name: &str, id: &str) {
        self.exams_by_name.insert(name.to_string(), id.to_string());
    }
}

// A broken lookup query must not kill the run, but operators need to tell
// "nothing matched" apart from "the lookup itself failed".
fn degraded(report: &mut ImportReport, entity: &str, error: &StoreError) {
    tracing::warn!(entity, error = %error, "lookup degraded to empty map");
    report.warn(
        Stage::System,
        format!("{entity} lookup degraded; all {entity} references in this pass will be treated as unresolved"),
        json!({
            "kind": "degraded_lookup",
            "entity": entity,
            "message": error.to_string(),
        }),
    );
}
