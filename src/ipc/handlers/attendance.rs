use crate::ipc::helpers::{
    activate_view, connection, expected_revision, object_param, optional_str, parse_record, reply,
    required_str, to_json, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::models::{AttendanceRecord, AttendanceStatus};
use crate::store::{now_stamp, StoreError, STUDENTS};
use crate::workflow::{apply_attendance, today, DEFAULT_SUBJECT};
use serde_json::{json, Value};

fn parse_status(raw: &str) -> Result<AttendanceStatus, HandlerErr> {
    AttendanceStatus::parse(raw)
        .ok_or_else(|| HandlerErr::bad_params(format!("status must be present or absent, got {}", raw)))
}

fn attendance_add(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let mut record: AttendanceRecord =
        parse_record(object_param(&req.params, "record")?, "attendance record")?;
    if record.student_id.trim().is_empty() {
        return Err(HandlerErr::bad_params("record.studentId is required"));
    }
    if record.date.trim().is_empty() {
        record.date = today();
    }
    let conn = connection(state)?;
    to_json(&conn.attendance.add(&record)?)
}

/// Newest first. A failed read degrades to an empty list with the cause.
fn attendance_by_student(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let student_id = required_str(&req.params, "studentId")?;
    let conn = connection(state)?;
    match conn.attendance.query_by("studentId", &json!(student_id)) {
        Ok(mut rows) => {
            rows.sort_by(|a, b| b.data.date.cmp(&a.data.date));
            Ok(json!({
                "items": to_json(&rows)?,
                "count": rows.len(),
                "error": Value::Null,
            }))
        }
        Err(e) => {
            log::warn!("attendance lookup for {} failed: {}", student_id, e);
            Ok(json!({
                "items": [],
                "count": 0,
                "error": e.to_string(),
            }))
        }
    }
}

/// Marks one student for one subject and keeps a row in the attendance log.
fn attendance_record(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let student_id = required_str(&req.params, "studentId")?;
    let subject = optional_str(&req.params, "subject")
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or(DEFAULT_SUBJECT)
        .to_string();
    let status = parse_status(&required_str(&req.params, "status")?)?;
    let date = optional_str(&req.params, "date")
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .unwrap_or_else(today);
    let rev = expected_revision(&req.params)?;
    let scope = state.scope.clone();
    let retention = state.config.history_retention;

    let conn = connection(state)?;
    activate_view(&mut conn.students);
    let current = conn.students.find(&student_id).ok_or_else(|| StoreError::NotFound {
        collection: STUDENTS.into(),
        id: student_id.clone(),
    })?;
    if !scope.admits(&current.data) {
        return Err(HandlerErr::new(
            "permission_denied",
            format!("student {} is not assigned to you", student_id),
        ));
    }

    let next = apply_attendance(&current.data, &subject, status, &date, &now_stamp(), retention)?;
    let written = conn
        .students
        .replace(&student_id, &next, Some(rev.unwrap_or(current.revision)))?;
    let entry = conn.attendance.add(&AttendanceRecord {
        student_id: student_id.clone(),
        date,
        subject: subject.clone(),
        status,
    })?;
    let history = &written.data.attendance_history;
    log::info!(
        "{} marked {} for {} ({}%, {} history entries)",
        written.data.name,
        status.as_str(),
        subject,
        written.data.attendance,
        history.len()
    );
    Ok(json!({
        "student": to_json(&written)?,
        "entry": to_json(&entry)?,
        "historyEntry": to_json(&history.entries().last())?,
        "subjectAttendance": to_json(&written.data.subject_attendance_for(&subject))?,
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "attendance.add" => attendance_add(state, req),
        "attendance.byStudent" => attendance_by_student(state, req),
        "attendance.record" => attendance_record(state, req),
        _ => return None,
    };
    Some(reply(&req.id, result))
}
