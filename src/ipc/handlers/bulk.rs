use crate::ipc::helpers::{
    activate_view, connection, optional_i64, optional_str, reply, required_str, to_json, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::models::AttendanceStatus;
use crate::workflow::{
    BulkSession, SessionOptions, SessionState, WorkflowError, WorkflowKind,
};
use serde_json::{json, Value};
use uuid::Uuid;

fn session_mut<'a>(
    state: &'a mut AppState,
    session_id: &str,
) -> Result<&'a mut BulkSession, HandlerErr> {
    state
        .bulk
        .get_mut(session_id)
        .ok_or_else(|| HandlerErr::new("not_found", format!("no bulk session {}", session_id)))
}

fn session_view(session_id: &str, session: &BulkSession) -> Result<Value, HandlerErr> {
    Ok(json!({
        "sessionId": session_id,
        "session": to_json(&session.summary())?,
    }))
}

fn bulk_open(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let kind = match required_str(&req.params, "kind")?.as_str() {
        "attendance" => WorkflowKind::Attendance,
        "marks" => WorkflowKind::Marks,
        other => {
            return Err(HandlerErr::bad_params(format!(
                "kind must be attendance or marks, got {}",
                other
            )))
        }
    };
    let options = SessionOptions {
        subject: optional_str(&req.params, "subject").map(str::to_string),
        max_marks: optional_i64(&req.params, "maxMarks")?,
        date: optional_str(&req.params, "date")
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string),
        history_retention: state.config.history_retention,
    };
    let scope = state.scope.clone();
    let conn = connection(state)?;
    activate_view(&mut conn.students);
    let students = conn.students.items();
    let cancel = conn.students.cancel_token();

    let session = match BulkSession::open(kind, &students, &scope, options, cancel) {
        Ok(s) => s,
        Err(WorkflowError::NoStudentsInScope) => {
            log::info!("bulk {:?} not opened: no students in scope", kind);
            return Ok(json!({ "empty": true, "sessionId": Value::Null }));
        }
        Err(e) => return Err(e.into()),
    };
    let session_id = Uuid::new_v4().to_string();
    log::info!(
        "bulk {:?} session {} opened for {} students ({})",
        session.kind(),
        session_id,
        session.student_ids().len(),
        session.subject()
    );
    let mut out = session_view(&session_id, &session)?;
    out["empty"] = json!(false);
    state.bulk.insert(session_id, session);
    Ok(out)
}

/// Subject, max marks and one student's input, each optional.
fn bulk_set_input(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let session_id = required_str(&req.params, "sessionId")?;
    let max_marks = optional_i64(&req.params, "maxMarks")?;
    let marks = match req.params.get("marks") {
        None => None,
        Some(_) => Some(optional_i64(&req.params, "marks")?),
    };
    let session = session_mut(state, &session_id)?;

    if let Some(subject) = optional_str(&req.params, "subject") {
        session.set_subject(subject)?;
    }
    if let Some(m) = max_marks {
        session.set_max_marks(m)?;
        log::debug!("bulk session {} max marks now {}", session_id, session.max_marks());
    }
    if let Some(student_id) = optional_str(&req.params, "studentId") {
        if let Some(raw) = optional_str(&req.params, "status") {
            let status = AttendanceStatus::parse(raw).ok_or_else(|| {
                HandlerErr::bad_params(format!("status must be present or absent, got {}", raw))
            })?;
            session.set_status(student_id, status)?;
        } else if let Some(m) = marks {
            session.set_marks(student_id, m)?;
        } else {
            return Err(HandlerErr::bad_params("studentId needs a status or marks"));
        }
        log::debug!(
            "bulk session {}: {} -> {:?}",
            session_id,
            student_id,
            session.input(student_id)
        );
    }
    session_view(&session_id, session)
}

fn bulk_submit(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let session_id = required_str(&req.params, "sessionId")?;
    let AppState { bulk, conn, .. } = state;
    let conn = conn.as_ref().ok_or_else(|| {
        HandlerErr::new(
            "store_not_connected",
            "no store connected; call store.connect first",
        )
    })?;
    let session = bulk
        .get_mut(&session_id)
        .ok_or_else(|| HandlerErr::new("not_found", format!("no bulk session {}", session_id)))?;

    let outcome = session.submit(&conn.students);
    if matches!(session.state(), SessionState::Closed | SessionState::Cancelled) {
        bulk.remove(&session_id);
    }
    let report = outcome?;
    let mut out = to_json(&report)?;
    out["sessionId"] = json!(session_id);
    Ok(out)
}

fn bulk_cancel(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let session_id = required_str(&req.params, "sessionId")?;
    let session = session_mut(state, &session_id)?;
    session.cancel()?;
    let out = session_view(&session_id, session)?;
    state.bulk.remove(&session_id);
    Ok(out)
}

fn bulk_get(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let session_id = required_str(&req.params, "sessionId")?;
    let session = session_mut(state, &session_id)?;
    session_view(&session_id, session)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "bulk.open" => bulk_open(state, req),
        "bulk.setInput" => bulk_set_input(state, req),
        "bulk.submit" => bulk_submit(state, req),
        "bulk.cancel" => bulk_cancel(state, req),
        "bulk.get" => bulk_get(state, req),
        _ => return None,
    };
    Some(reply(&req.id, result))
}
