use crate::import::batch::BatchTuning;
use crate::import::executor::{ImportExecutor, ImportOptions};
use crate::import::records::{CourseCreationMode, ImportInput};
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use serde_json::json;

fn parse_input(req: &Request) -> Result<ImportInput, serde_json::Value> {
    let Some(raw) = req.params.get("input") else {
        return Err(err(&req.id, "bad_params", "missing params.input", None));
    };
    serde_json::from_value(raw.clone()).map_err(|e| {
        err(
            &req.id,
            "bad_params",
            format!("invalid import input: {e}"),
            None,
        )
    })
}

fn parse_options(req: &Request) -> Result<ImportOptions, serde_json::Value> {
    let course_mode = match req.params.get("courseMode") {
        None => CourseCreationMode::default(),
        Some(raw) => serde_json::from_value(raw.clone()).map_err(|e| {
            err(
                &req.id,
                "bad_params",
                format!("invalid courseMode: {e}"),
                None,
            )
        })?,
    };
    Ok(ImportOptions {
        course_mode,
        batch: BatchTuning::default(),
    })
}

fn handle_import_execute(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(store) = state.store.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let actor_id = match req.params.get("actorId").and_then(|v| v.as_str()) {
        Some(v) if !v.trim().is_empty() => v.to_string(),
        _ => return err(&req.id, "bad_params", "missing params.actorId", None),
    };
    let input = match parse_input(req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let options = match parse_options(req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let executor = ImportExecutor::with_options(store, options);
    let result = executor.execute(&input, &actor_id);
    match serde_json::to_value(&result) {
        Ok(v) => ok(&req.id, v),
        Err(e) => err(
            &req.id,
            "encode_failed",
            e.to_string(),
            Some(json!({ "method": "import.execute" })),
        ),
    }
}

fn handle_import_dry_run(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(store) = state.store.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let actor_id = req
        .params
        .get("actorId")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string();
    let input = match parse_input(req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let options = match parse_options(req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let executor = ImportExecutor::with_options(store, options);
    let result = executor.dry_run(&input, &actor_id);
    match serde_json::to_value(&result) {
        Ok(v) => ok(&req.id, v),
        Err(e) => err(
            &req.id,
            "encode_failed",
            e.to_string(),
            Some(json!({ "method": "import.dryRun" })),
        ),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "import.execute" => Some(handle_import_execute(state, req)),
        "import.dryRun" => Some(handle_import_dry_run(state, req)),
        _ => None,
    }
}
