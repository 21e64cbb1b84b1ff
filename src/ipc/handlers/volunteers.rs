use crate::exchange;
use crate::ipc::helpers::{
    activate_view, connection, expected_revision, list_payload, object_param, parse_record,
    patch_param, reply, required_str, to_json, update_record, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::models::{Volunteer, VolunteerStatus};
use crate::stats;
use crate::store::{StoreError, VOLUNTEERS};
use crate::workflow::today;
use serde_json::{json, Value};
use std::path::PathBuf;

/// `None` for "all" or no filter.
fn status_filter(params: &Value) -> Result<Option<VolunteerStatus>, HandlerErr> {
    match params.get("status").and_then(|v| v.as_str()).map(str::trim) {
        None | Some("") | Some("all") => Ok(None),
        Some(raw) => VolunteerStatus::parse(raw)
            .map(Some)
            .ok_or_else(|| HandlerErr::bad_params(format!("unknown volunteer status: {}", raw))),
    }
}

fn volunteers_list(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let status = status_filter(&req.params)?;
    let conn = connection(state)?;
    activate_view(&mut conn.volunteers);
    let all = conn.volunteers.items();
    let shown = stats::filter_volunteers(&all, status);
    let mut payload = list_payload(&shown, conn.volunteers.loading(), conn.volunteers.error())?;
    payload["counts"] = to_json(&stats::volunteer_counts(&all))?;
    Ok(payload)
}

fn volunteers_get(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let id = required_str(&req.params, "id")?;
    let conn = connection(state)?;
    activate_view(&mut conn.volunteers);
    let v = conn.volunteers.find(&id).ok_or_else(|| StoreError::NotFound {
        collection: VOLUNTEERS.into(),
        id,
    })?;
    to_json(&v)
}

fn volunteers_create(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let mut v: Volunteer = parse_record(object_param(&req.params, "record")?, "volunteer")?;
    if v.name.trim().is_empty() || v.email.trim().is_empty() {
        return Err(HandlerErr::bad_params("volunteer name and email are required"));
    }
    if v.registration_date.trim().is_empty() {
        v.registration_date = today();
    }
    let conn = connection(state)?;
    activate_view(&mut conn.volunteers);
    to_json(&conn.volunteers.add(&v)?)
}

fn volunteers_update(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let id = required_str(&req.params, "id")?;
    let patch = patch_param(&req.params)?;
    let rev = expected_revision(&req.params)?;
    let conn = connection(state)?;
    activate_view(&mut conn.volunteers);
    to_json(&update_record(&conn.volunteers, &id, patch, rev, "volunteer")?)
}

fn volunteers_set_status(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let id = required_str(&req.params, "id")?;
    let raw = required_str(&req.params, "status")?;
    let status = VolunteerStatus::parse(&raw)
        .ok_or_else(|| HandlerErr::bad_params(format!("unknown volunteer status: {}", raw)))?;
    let rev = expected_revision(&req.params)?;
    let conn = connection(state)?;
    activate_view(&mut conn.volunteers);
    let patch = json!({ "status": status.as_str() });
    let updated = match rev {
        Some(r) => conn.volunteers.update_if(&id, patch, r)?,
        None => conn.volunteers.update(&id, patch)?,
    };
    log::info!("volunteer {} is now {}", id, status.as_str());
    to_json(&updated)
}

fn volunteers_delete(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let id = required_str(&req.params, "id")?;
    let conn = connection(state)?;
    activate_view(&mut conn.volunteers);
    conn.volunteers.delete(&id)?;
    Ok(json!({ "deleted": id }))
}

/// Exports the currently filtered view, like the page's download button.
fn volunteers_export_csv(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let status = status_filter(&req.params)?;
    let conn = connection(state)?;
    let out_path = match req.params.get("path").and_then(|v| v.as_str()) {
        Some(p) if !p.trim().is_empty() => PathBuf::from(p),
        _ => conn.data_dir.join(exchange::DEFAULT_EXPORT_NAME),
    };
    activate_view(&mut conn.volunteers);
    let all = conn.volunteers.items();
    let shown = stats::filter_volunteers(&all, status);
    let rows = exchange::export_volunteers(&out_path, shown.iter().map(|v| &v.data))?;
    Ok(json!({
        "path": out_path.to_string_lossy(),
        "rowsExported": rows,
    }))
}

fn volunteers_import_csv(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let in_path = PathBuf::from(required_str(&req.params, "path")?);
    let parsed = exchange::import_volunteers(&in_path)?;
    let conn = connection(state)?;
    activate_view(&mut conn.volunteers);
    let mut imported = 0usize;
    for mut v in parsed {
        if v.registration_date.is_empty() {
            v.registration_date = today();
        }
        match conn.volunteers.add(&v) {
            Ok(_) => imported += 1,
            Err(e) => {
                return Err(HandlerErr::from(e).with_details(json!({ "imported": imported })));
            }
        }
    }
    log::info!("imported {} volunteers from {}", imported, in_path.display());
    Ok(json!({ "imported": imported }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "volunteers.list" => volunteers_list(state, req),
        "volunteers.get" => volunteers_get(state, req),
        "volunteers.create" => volunteers_create(state, req),
        "volunteers.update" => volunteers_update(state, req),
        "volunteers.setStatus" => volunteers_set_status(state, req),
        "volunteers.delete" => volunteers_delete(state, req),
        "volunteers.exportCsv" => volunteers_export_csv(state, req),
        "volunteers.importCsv" => volunteers_import_csv(state, req),
        _ => return None,
    };
    Some(reply(&req.id, result))
}
