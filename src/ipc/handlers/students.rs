use crate::calc;
use crate::ipc::helpers::{
    activate_view, connection, expected_revision, list_payload, object_param, parse_record,
    patch_param, reply, required_str, to_json, update_record_with, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::live::LiveCollection;
use crate::models::{Stored, Student};
use crate::stats::{self, ALL_CENTERS};
use crate::store::{StoreError, STUDENTS};
use crate::workflow::{today, TutorScope};
use serde_json::{json, Value};

/// Record plus the values the student card shows next to it.
fn student_view(s: &Stored<Student>) -> Result<Value, HandlerErr> {
    let mut v = to_json(s)?;
    v["overallAverage"] = json!(calc::student_overall_average(&s.data));
    v["assignedTutor"] = json!(s.data.assigned_tutor());
    v["badge"] = json!(calc::performance_badge(
        s.data.attendance,
        s.data.last_test_score.unwrap_or(0)
    )
    .label());
    Ok(v)
}

/// Fields derived from the per-subject maps; a patch cannot set them.
const DERIVED_FIELDS: [&str; 3] = ["attendance", "averageMarks", "subjectAverages"];

fn not_assigned(id: &str) -> HandlerErr {
    HandlerErr::new(
        "permission_denied",
        format!("student {} is not assigned to you", id),
    )
}

/// Current record, refused when the signed-in tutor may not see it.
fn scoped_student(
    scope: &TutorScope,
    students: &LiveCollection<Student>,
    id: &str,
) -> Result<Stored<Student>, HandlerErr> {
    let student = students.find(id).ok_or_else(|| StoreError::NotFound {
        collection: STUDENTS.into(),
        id: id.to_string(),
    })?;
    if !scope.admits(&student.data) {
        return Err(not_assigned(id));
    }
    Ok(student)
}

fn students_list(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let scope = state.scope.clone();
    let conn = connection(state)?;
    activate_view(&mut conn.students);
    let all = conn.students.items();
    let scoped = scope.filter(&all);
    let center = stats::selection(req.params.get("center").and_then(|v| v.as_str()), ALL_CENTERS);
    let shown = stats::filter_students_by_center(&scoped, center);

    let mut payload = list_payload(&shown, conn.students.loading(), conn.students.error())?;
    payload["items"] = Value::Array(shown.iter().map(|s| student_view(s)).collect::<Result<_, _>>()?);
    payload["stats"] = to_json(&stats::student_stats(&shown))?;
    Ok(payload)
}

fn students_get(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let id = required_str(&req.params, "id")?;
    let scope = state.scope.clone();
    let conn = connection(state)?;
    activate_view(&mut conn.students);
    let student = scoped_student(&scope, &conn.students, &id)?;
    student_view(&student)
}

fn students_create(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let record = object_param(&req.params, "record")?;
    let draft: Student = parse_record(record.clone(), "student")?;
    if draft.name.trim().is_empty() {
        return Err(HandlerErr::bad_params("student name is required"));
    }
    if !state.config.is_known_center(&draft.center) {
        return Err(HandlerErr::bad_params(format!("unknown center: {:?}", draft.center))
            .with_details(json!({ "centers": state.config.centers })));
    }

    // Start from a fresh enrolment and let supplied fields win.
    let enrolled = Student::enrol(
        draft.name.clone(),
        draft.center.clone(),
        draft.subjects.clone(),
        draft.enrollment_date.clone().unwrap_or_else(today),
    );
    let mut base = to_json(&enrolled)?;
    if let (Value::Object(b), Value::Object(r)) = (&mut base, record) {
        for (k, v) in r {
            if !v.is_null() {
                b.insert(k, v);
            }
        }
    }
    let mut student: Student = parse_record(base, "student")?;
    calc::normalize_student(&mut student)?;

    let conn = connection(state)?;
    activate_view(&mut conn.students);
    let added = conn.students.add(&student)?;
    log::info!("enrolled student {} at {}", added.id, added.data.center);
    student_view(&added)
}

fn students_update(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let id = required_str(&req.params, "id")?;
    let mut patch = patch_param(&req.params)?;
    if let Value::Object(fields) = &mut patch {
        for key in DERIVED_FIELDS {
            if fields.remove(key).is_some() {
                log::debug!("students.update {}: ignoring derived field {}", id, key);
            }
        }
    }
    let rev = expected_revision(&req.params)?;
    let scope = state.scope.clone();
    let conn = connection(state)?;
    activate_view(&mut conn.students);
    scoped_student(&scope, &conn.students, &id)?;
    let updated = update_record_with(&conn.students, &id, patch, rev, "student", |s| {
        calc::normalize_student(s).map_err(HandlerErr::from)
    })?;
    student_view(&updated)
}

fn students_delete(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let id = required_str(&req.params, "id")?;
    let scope = state.scope.clone();
    let conn = connection(state)?;
    activate_view(&mut conn.students);
    if let Some(current) = conn.students.find(&id) {
        if !scope.admits(&current.data) {
            return Err(not_assigned(&id));
        }
    }
    conn.students.delete(&id)?;
    Ok(json!({ "deleted": id }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "students.list" => students_list(state, req),
        "students.get" => students_get(state, req),
        "students.create" => students_create(state, req),
        "students.update" => students_update(state, req),
        "students.delete" => students_delete(state, req),
        _ => return None,
    };
    Some(reply(&req.id, result))
}
