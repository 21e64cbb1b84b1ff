use crate::ipc::helpers::{
    activate_view, connection, expected_revision, list_payload, object_param, parse_record,
    patch_param, reply, required_str, to_json, update_record, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::models::{Family, FamilyStatus, Stored};
use crate::store::{StoreError, FAMILIES};
use serde_json::{json, Value};

fn families_list(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let status = match req.params.get("status").and_then(|v| v.as_str()) {
        None | Some("all") | Some("") => None,
        Some(raw) => Some(parse_record::<FamilyStatus>(json!(raw), "family status")?),
    };
    let conn = connection(state)?;
    activate_view(&mut conn.families);
    let all = conn.families.items();
    let shown: Vec<&Stored<Family>> = all
        .iter()
        .filter(|f| status.map_or(true, |s| f.data.status == s))
        .collect();
    let mut payload = list_payload(&shown, conn.families.loading(), conn.families.error())?;
    payload["active"] = json!(all
        .iter()
        .filter(|f| f.data.status == FamilyStatus::Active)
        .count());
    Ok(payload)
}

fn families_get(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let id = required_str(&req.params, "id")?;
    let conn = connection(state)?;
    activate_view(&mut conn.families);
    let family = conn.families.find(&id).ok_or_else(|| StoreError::NotFound {
        collection: FAMILIES.into(),
        id,
    })?;
    to_json(&family)
}

fn families_create(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let family: Family = parse_record(object_param(&req.params, "record")?, "family")?;
    if family.family_name.trim().is_empty() {
        return Err(HandlerErr::bad_params("familyName is required"));
    }
    let conn = connection(state)?;
    activate_view(&mut conn.families);
    to_json(&conn.families.add(&family)?)
}

fn families_update(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let id = required_str(&req.params, "id")?;
    let patch = patch_param(&req.params)?;
    let rev = expected_revision(&req.params)?;
    let conn = connection(state)?;
    activate_view(&mut conn.families);
    to_json(&update_record(&conn.families, &id, patch, rev, "family")?)
}

fn families_delete(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let id = required_str(&req.params, "id")?;
    let conn = connection(state)?;
    activate_view(&mut conn.families);
    conn.families.delete(&id)?;
    Ok(json!({ "deleted": id }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "families.list" => families_list(state, req),
        "families.get" => families_get(state, req),
        "families.create" => families_create(state, req),
        "families.update" => families_update(state, req),
        "families.delete" => families_delete(state, req),
        _ => return None,
    };
    Some(reply(&req.id, result))
}
