use std::panic::{catch_unwind, AssertUnwindSafe};

use serde_json::Value;

use super::batch::BatchTuning;
use super::records::{
    CourseCreationMode, DryRunCounts, DryRunResult, ImportExecutionError, ImportExecutionResult,
    ImportInput, ImportReport, Stage,
};
use super::resolve::ReferenceResolver;
use super::stages;
use crate::store::RowStore;

#[derive(Debug, Clone, Default)]
pub struct ImportOptions {
    pub course_mode: CourseCreationMode,
    pub batch: BatchTuning,
}

/// Sequences the five stages in dependency order and owns the run's report.
/// There is no rollback: earlier failures never stop later stages from
/// attempting, and the caller always gets a complete report back.
pub struct ImportExecutor<'a, S: RowStore> {
    store: &'a S,
    options: ImportOptions,
}

impl<'a, S: RowStore> ImportExecutor<'a, S> {
    pub fn new(store: &'a S) -> Self {
        ImportExecutor {
            store,
            options: ImportOptions::default(),
        }
    }

    pub fn with_options(store: &'a S, options: ImportOptions) -> Self {
        ImportExecutor { store, options }
    }

    pub fn execute(&self, input: &ImportInput, actor_id: &str) -> ImportExecutionResult {
        let mut report = ImportReport::new();

        // A stage must never take the daemon down. Anything that still
        // escapes the per-record and per-row handling lands as one
        // system-level error on an otherwise complete report.
        let run = catch_unwind(AssertUnwindSafe(|| {
            self.run_stages(input, actor_id, &mut report);
        }));
        if let Err(panic) = run {
            let message = panic_message(panic);
            tracing::error!(message = %message, "import run aborted unexpectedly");
            report.record_error(ImportExecutionError {
                stage: Stage::System,
                operation: "import".to_string(),
                message,
                data: Value::Null,
            });
        }

        report.finish()
    }

    fn run_stages(&self, input: &ImportInput, actor_id: &str, report: &mut ImportReport) {
        let tuning = &self.options.batch;
        let mut resolver = ReferenceResolver::new();

        let users = input.users.as_deref().unwrap_or_default();
        if !users.is_empty() {
            stages::run_users_stage(self.store, tuning, users, report);
        }

        // Each dependent stage starts from a wholesale refresh so every write
        // the run has made so far is visible; maps are never patched in place.
        let classes = input.classes.as_deref().unwrap_or_default();
        if !classes.is_empty() {
            resolver.refresh(self.store, report);
            stages::run_classes_stage(
                self.store,
                tuning,
                classes,
                self.options.course_mode,
                &mut resolver,
                report,
            );
        }

        let courses = input.courses.as_deref().unwrap_or_default();
        if !courses.is_empty() {
            resolver.refresh(self.store, report);
            stages::run_courses_stage(self.store, tuning, courses, &resolver, report);
        }

        let students = input.students.as_deref().unwrap_or_default();
        if !students.is_empty() {
            resolver.refresh(self.store, report);
            stages::run_students_stage(self.store, tuning, students, &resolver, report);
        }

        let scores = input.scores.as_deref().unwrap_or_default();
        if !scores.is_empty() {
            resolver.refresh(self.store, report);
            stages::run_scores_stage(
                self.store,
                tuning,
                scores,
                &mut resolver,
                report,
                actor_id,
            );
        }
    }

    /// Read-only pass: one resolver refresh against current store state, then
    /// just the reference-lookup half of each stage's transform. Would-create
    /// counts are upper bounds (the input list lengths); nothing is written.
    pub fn dry_run(&self, input: &ImportInput, actor_id: &str) -> DryRunResult {
        let mut report = ImportReport::new();
        let mut resolver = ReferenceResolver::new();
        resolver.refresh(self.store, &mut report);

        let users = input.users.as_deref().unwrap_or_default();
        let classes = input.classes.as_deref().unwrap_or_default();
        let courses = input.courses.as_deref().unwrap_or_default();
        let students = input.students.as_deref().unwrap_or_default();
        let scores = input.scores.as_deref().unwrap_or_default();

        if self.options.course_mode == CourseCreationMode::TriggerAssisted {
            for rec in classes {
                stages::check_class_assignment(rec, &resolver, &mut report);
            }
        }
        for rec in courses {
            let _ = stages::course_row(rec, &resolver, &mut report);
        }
        for rec in students {
            let _ = stages::student_row(rec, &resolver, &mut report);
        }
        for rec in scores {
            stages::check_score_refs(rec, &resolver, &mut report, actor_id);
        }

        DryRunResult {
            would_create: DryRunCounts {
                users: users.len(),
                classes: classes.len(),
                courses: courses.len(),
                students: students.len(),
                scores: scores.len(),
            },
            would_update: DryRunCounts::default(),
            potential_warnings: report.into_warnings(),
        }
    }
}

fn panic_message(panic: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unexpected failure in import run".to_string()
    }
}
