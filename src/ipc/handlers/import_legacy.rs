use crate::ipc::helpers::{connection, reply, required_str, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::legacy;
use crate::live::LiveCollection;
use crate::store::StoreError;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use std::path::PathBuf;

fn add_all<T>(live: &LiveCollection<T>, records: &[T]) -> Result<usize, StoreError>
where
    T: Serialize + DeserializeOwned + Clone + 'static,
{
    for r in records {
        live.add(r)?;
    }
    Ok(records.len())
}

/// Loads a browser-storage export into the collections. Legacy ids are not
/// kept; every record gets a fresh document id.
fn store_import_legacy(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let path = PathBuf::from(required_str(&req.params, "path")?);
    let export = legacy::read_legacy_export(&path)
        .map_err(|e| HandlerErr::new("bad_params", format!("{:#}", e)))?;
    let conn = connection(state)?;

    let mut counts = serde_json::Map::new();
    let fail = |name: &str, e: StoreError, counts: &serde_json::Map<String, Value>| {
        log::error!("legacy import stopped in {}: {}", name, e);
        HandlerErr::from(e).with_details(json!({
            "stoppedAt": name,
            "imported": counts,
        }))
    };
    match add_all(&conn.students, &export.students) {
        Ok(n) => counts.insert("students".into(), json!(n)),
        Err(e) => return Err(fail("students", e, &counts)),
    };
    match add_all(&conn.families, &export.families) {
        Ok(n) => counts.insert("families".into(), json!(n)),
        Err(e) => return Err(fail("families", e, &counts)),
    };
    match add_all(&conn.women, &export.women) {
        Ok(n) => counts.insert("women".into(), json!(n)),
        Err(e) => return Err(fail("women", e, &counts)),
    };
    match add_all(&conn.volunteers, &export.volunteers) {
        Ok(n) => counts.insert("volunteers".into(), json!(n)),
        Err(e) => return Err(fail("volunteers", e, &counts)),
    };
    for s in &export.skipped {
        log::warn!("legacy import skipped {}", s);
    }
    log::info!(
        "legacy import from {} done: {}",
        path.display(),
        Value::Object(counts.clone())
    );
    Ok(json!({
        "imported": counts,
        "skipped": export.skipped,
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "store.importLegacy" => Some(reply(&req.id, store_import_legacy(state, req))),
        _ => None,
    }
}
