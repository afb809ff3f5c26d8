use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::batch::BatchOutcome;

fn default_active() -> bool {
    true
}

// Input records arrive pre-validated from the dashboard's CSV stage: required
// fields are present and well-typed, so none of them are re-checked here.

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserImport {
    pub email: String,
    pub full_name: String,
    pub role: String,
    #[serde(default)]
    pub teacher_type: Option<String>,
    #[serde(default)]
    pub grade: Option<String>,
    #[serde(default)]
    pub track: Option<String>,
    #[serde(default = "default_active")]
    pub active: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassImport {
    pub name: String,
    pub grade: String,
    #[serde(default)]
    pub level: Option<String>,
    pub track: String,
    pub academic_year: String,
    /// Owning teacher, applied to the class's auto-created course row in
    /// trigger-assisted deployments.
    #[serde(default)]
    pub teacher_email: Option<String>,
    #[serde(default = "default_active")]
    pub active: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CourseImport {
    pub class_name: String,
    pub course_type: String,
    pub teacher_email: String,
    pub academic_year: String,
    #[serde(default = "default_active")]
    pub active: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentImport {
    pub student_number: String,
    pub full_name: String,
    #[serde(default)]
    pub grade: Option<String>,
    #[serde(default)]
    pub level: Option<String>,
    #[serde(default)]
    pub track: Option<String>,
    /// Students may be imported unassigned.
    #[serde(default)]
    pub class_name: Option<String>,
    #[serde(default = "default_active")]
    pub active: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreImport {
    pub student_number: String,
    /// Used only to resolve the course enrollment; never persisted on the row.
    pub course_type: String,
    pub exam_name: String,
    pub assessment_code: String,
    pub score: f64,
    #[serde(default)]
    pub entered_by_email: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportInput {
    #[serde(default)]
    pub users: Option<Vec<UserImport>>,
    #[serde(default)]
    pub classes: Option<Vec<ClassImport>>,
    #[serde(default)]
    pub courses: Option<Vec<CourseImport>>,
    #[serde(default)]
    pub students: Option<Vec<StudentImport>>,
    #[serde(default)]
    pub scores: Option<Vec<ScoreImport>>,
}

/// Which half of the pipeline owns course-row creation. `Explicit`: the
/// courses stage inserts rows resolved from class name + teacher email.
/// `TriggerAssisted`: the store seeds course rows when a class is inserted
/// and the classes stage only patches the teacher assignment on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CourseCreationMode {
    #[default]
    Explicit,
    TriggerAssisted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Users,
    Classes,
    Courses,
    Students,
    Scores,
    /// Orchestrator-level failures only; never carries summary counters.
    System,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Users => "users",
            Stage::Classes => "classes",
            Stage::Courses => "courses",
            Stage::Students => "students",
            Stage::Scores => "scores",
            Stage::System => "system",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct StageCounts {
    pub created: usize,
    pub updated: usize,
    pub errors: usize,
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct ImportSummary {
    pub users: StageCounts,
    pub classes: StageCounts,
    pub courses: StageCounts,
    pub students: StageCounts,
    pub scores: StageCounts,
}

impl ImportSummary {
    fn stage_mut(&mut self, stage: Stage) -> Option<&mut StageCounts> {
        match stage {
            Stage::Users => Some(&mut self.users),
            Stage::Classes => Some(&mut self.classes),
            Stage::Courses => Some(&mut self.courses),
            Stage::Students => Some(&mut self.students),
            Stage::Scores => Some(&mut self.scores),
            Stage::System => None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ImportExecutionError {
    pub stage: Stage,
    pub operation: String,
    pub message: String,
    /// The offending row or record, for re-run tooling.
    pub data: Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct ImportExecutionWarning {
    pub stage: Stage,
    pub message: String,
    pub context: Value,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportExecutionResult {
    pub success: bool,
    pub summary: ImportSummary,
    pub errors: Vec<ImportExecutionError>,
    pub warnings: Vec<ImportExecutionWarning>,
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct DryRunCounts {
    pub users: usize,
    pub classes: usize,
    pub courses: usize,
    pub students: usize,
    pub scores: usize,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DryRunResult {
    pub would_create: DryRunCounts,
    pub would_update: DryRunCounts,
    pub potential_warnings: Vec<ImportExecutionWarning>,
}

/// The one mutable accumulator of an import run. Counters and the error list
/// move through a single apply path so they can never disagree; `finish`
/// seals the report and derives the success flag.
#[derive(Debug, Default)]
pub struct ImportReport {
    summary: ImportSummary,
    errors: Vec<ImportExecutionError>,
    warnings: Vec<ImportExecutionWarning>,
}

impl ImportReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn warn(&mut self, stage: Stage, message: impl Into<String>, context: Value) {
        self.warnings.push(ImportExecutionWarning {
            stage,
            message: message.into(),
            context,
        });
    }

    pub fn record_error(&mut self, error: ImportExecutionError) {
        if let Some(counts) = self.summary.stage_mut(error.stage) {
            counts.errors += 1;
        }
        self.errors.push(error);
    }

    pub fn apply_outcome(&mut self, stage: Stage, outcome: BatchOutcome) {
        if let Some(counts) = self.summary.stage_mut(stage) {
            counts.created += outcome.created;
            counts.updated += outcome.updated;
        }
        for error in outcome.errors {
            self.record_error(error);
        }
    }

    pub fn into_warnings(self) -> Vec<ImportExecutionWarning> {
        self.warnings
    }

    pub fn finish(self) -> ImportExecutionResult {
        ImportExecutionResult {
            success: self.errors.is_empty(),
            summary: self.summary,
            errors: self.errors,
            warnings: self.warnings,
        }
    }
}
