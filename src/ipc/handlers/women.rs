use crate::ipc::helpers::{
    activate_view, connection, expected_revision, list_payload, object_param, parse_record,
    patch_param, reply, required_str, to_json, update_record, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::models::Woman;
use crate::stats::{self, ALL_CENTERS, ALL_SKILLS};
use crate::store::{StoreError, WOMEN};
use serde_json::{json, Value};
use std::collections::BTreeSet;

fn women_list(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = connection(state)?;
    activate_view(&mut conn.women);
    let all = conn.women.items();
    let center = stats::selection(req.params.get("center").and_then(|v| v.as_str()), ALL_CENTERS);
    let skill = stats::selection(req.params.get("skill").and_then(|v| v.as_str()), ALL_SKILLS);
    let shown = stats::filter_women(&all, center, skill);

    let mut payload = list_payload(&shown, conn.women.loading(), conn.women.error())?;
    let everyone: Vec<_> = all.iter().collect();
    payload["stats"] = to_json(&stats::women_stats(&everyone))?;
    let skills: BTreeSet<&str> = all
        .iter()
        .map(|w| w.data.skill.as_str())
        .filter(|s| !s.is_empty())
        .collect();
    payload["skills"] = json!(skills);
    Ok(payload)
}

fn women_get(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let id = required_str(&req.params, "id")?;
    let conn = connection(state)?;
    activate_view(&mut conn.women);
    let woman = conn.women.find(&id).ok_or_else(|| StoreError::NotFound {
        collection: WOMEN.into(),
        id,
    })?;
    to_json(&woman)
}

fn women_create(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let woman: Woman = parse_record(object_param(&req.params, "record")?, "participant")?;
    if woman.name.trim().is_empty() {
        return Err(HandlerErr::bad_params("name is required"));
    }
    if !woman.center.is_empty() && !state.config.is_known_center(&woman.center) {
        return Err(HandlerErr::bad_params(format!("unknown center: {:?}", woman.center)));
    }
    let conn = connection(state)?;
    activate_view(&mut conn.women);
    to_json(&conn.women.add(&woman)?)
}

fn women_update(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let id = required_str(&req.params, "id")?;
    let patch = patch_param(&req.params)?;
    let rev = expected_revision(&req.params)?;
    let conn = connection(state)?;
    activate_view(&mut conn.women);
    to_json(&update_record(&conn.women, &id, patch, rev, "participant")?)
}

fn women_delete(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let id = required_str(&req.params, "id")?;
    let conn = connection(state)?;
    activate_view(&mut conn.women);
    conn.women.delete(&id)?;
    Ok(json!({ "deleted": id }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "women.list" => women_list(state, req),
        "women.get" => women_get(state, req),
        "women.create" => women_create(state, req),
        "women.update" => women_update(state, req),
        "women.delete" => women_delete(state, req),
        _ => return None,
    };
    Some(reply(&req.id, result))
}
