use crate::ipc::helpers::{
    activate_view, connection, optional_str, reply, required_str, to_json, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::report::StudentReport;
use crate::store::{StoreError, STUDENTS};
use crate::workflow::today;
use serde_json::{json, Value};
use std::path::PathBuf;

fn build_report(state: &mut AppState, req: &Request) -> Result<StudentReport, HandlerErr> {
    let student_id = required_str(&req.params, "studentId")?;
    let generated_on = optional_str(&req.params, "date")
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .unwrap_or_else(today);
    let scope = state.scope.clone();
    let conn = connection(state)?;
    activate_view(&mut conn.students);
    let student = conn.students.find(&student_id).ok_or_else(|| StoreError::NotFound {
        collection: STUDENTS.into(),
        id: student_id.clone(),
    })?;
    if !scope.admits(&student.data) {
        return Err(HandlerErr::new(
            "permission_denied",
            format!("student {} is not assigned to you", student_id),
        ));
    }
    Ok(StudentReport::build(&student, &generated_on))
}

fn reports_student_model(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let report = build_report(state, req)?;
    let mut out = to_json(&report)?;
    out["fileName"] = json!(report.file_name());
    out["attendanceHasData"] = json!(report.attendance_has_data());
    out["scoresHaveData"] = json!(report.scores_have_data());
    Ok(out)
}

fn reports_export_student_png(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let report = build_report(state, req)?;
    let explicit = optional_str(&req.params, "path")
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(PathBuf::from);
    let dir = connection(state)?.data_dir.join("reports");
    let out_path = report.output_path(explicit.as_deref(), &dir);
    report
        .write_png(&out_path)
        .map_err(|e| HandlerErr::new("io_failed", format!("{:#}", e)))?;
    Ok(json!({
        "path": out_path.to_string_lossy(),
        "fileName": report.file_name(),
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "reports.studentModel" => reports_student_model(state, req),
        "reports.exportStudentPng" => reports_export_student_png(state, req),
        _ => return None,
    };
    Some(reply(&req.id, result))
}
