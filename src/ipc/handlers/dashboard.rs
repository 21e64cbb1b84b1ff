use crate::ipc::helpers::{activate_view, connection, reply, to_json, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::stats;
use serde_json::{json, Value};

/// Totals cover every record; `myStudents` is the session's scoped count.
fn dashboard_stats(state: &mut AppState) -> Result<Value, HandlerErr> {
    let scope = state.scope.clone();
    let conn = connection(state)?;
    activate_view(&mut conn.students);
    activate_view(&mut conn.families);
    activate_view(&mut conn.women);
    activate_view(&mut conn.volunteers);

    let students = conn.students.items();
    let families = conn.families.items();
    let women = conn.women.items();
    let volunteers = conn.volunteers.items();

    let mut out = to_json(&stats::dashboard_stats(&students, &families, &women))?;
    out["volunteers"] = to_json(&stats::volunteer_counts(&volunteers))?;
    out["myStudents"] = json!(scope.filter(&students).len());
    out["attendanceRecords"] = json!(conn.attendance.get_all().len());
    let errors: Vec<String> = [
        conn.students.error(),
        conn.families.error(),
        conn.women.error(),
        conn.volunteers.error(),
    ]
    .into_iter()
    .flatten()
    .collect();
    out["errors"] = json!(errors);
    Ok(out)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "dashboard.stats" => Some(reply(&req.id, dashboard_stats(state))),
        _ => None,
    }
}
