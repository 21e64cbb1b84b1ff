use crate::ipc::error::ok;
use crate::ipc::helpers::{connection, reply, required_str, HandlerErr};
use crate::ipc::types::{AppState, Connection, Request};
use crate::store::DocumentStore;
use crate::workflow::{Role, TutorScope};
use serde_json::json;

fn handle_health(state: &mut AppState, req: &Request) -> serde_json::Value {
    ok(
        &req.id,
        json!({
            "version": env!("CARGO_PKG_VERSION"),
            "connected": state.conn.is_some(),
            "projectId": state.conn.as_ref().map(|c| c.store.project_id().to_string()),
            "activeViews": state.conn.as_ref().map(|c| c.active_views()).unwrap_or_default(),
            "listeners": state.conn.as_ref().map(|c| c.store.listener_count()).unwrap_or(0),
            "subscriptions": state.subscriptions.len(),
            "bulkSessions": state.bulk.len(),
            "session": state.scope.role(),
        }),
    )
}

fn store_connect(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let merged = state.config.store.overlay(&req.params);
    let resolved = merged.resolve().map_err(|missing| {
        HandlerErr::new(
            "config_missing",
            format!("store configuration incomplete: {}", missing.0.join(", ")),
        )
        .with_details(json!({ "missing": missing.0 }))
    })?;

    let store = DocumentStore::open(&resolved)?;
    if state.disconnect() {
        log::info!("replacing existing store connection");
    }
    log::info!(
        "connected to project {} in {}",
        resolved.project_id,
        resolved.data_dir.display()
    );
    state.conn = Some(Connection::new(store, resolved.data_dir.clone()));
    Ok(json!({
        "projectId": resolved.project_id,
        "dataDir": resolved.data_dir.to_string_lossy(),
        "authDomain": merged.auth_domain,
        "storageBucket": merged.storage_bucket,
        "centers": state.config.centers,
    }))
}

fn store_disconnect(state: &mut AppState) -> Result<serde_json::Value, HandlerErr> {
    let was_connected = state.disconnect();
    Ok(json!({ "disconnected": was_connected }))
}

fn session_set(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let role = match required_str(&req.params, "role")?.to_ascii_lowercase().as_str() {
        "admin" => Role::Admin,
        "tutor" => Role::Tutor {
            email: required_str(&req.params, "email")?,
        },
        other => {
            return Err(HandlerErr::bad_params(format!(
                "role must be admin or tutor, got {}",
                other
            )))
        }
    };
    state.scope = TutorScope::new(role, &state.config.tutor_fallback_emails);
    log::info!("session role set: {:?}", state.scope.role());
    Ok(json!({
        "session": state.scope.role(),
        "fallbackEmails": state.config.tutor_fallback_emails,
    }))
}

fn view_close(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let view = required_str(&req.params, "view")?;
    let conn = connection(state)?;
    if !conn.deactivate(&view) {
        return Err(HandlerErr::bad_params(format!("unknown view: {}", view)));
    }
    Ok(json!({ "closed": view }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "health" => Some(handle_health(state, req)),
        "store.connect" => Some(reply(&req.id, store_connect(state, req))),
        "store.disconnect" => Some(reply(&req.id, store_disconnect(state))),
        "session.set" => Some(reply(&req.id, session_set(state, req))),
        "view.close" => Some(reply(&req.id, view_close(state, req))),
        _ => None,
    }
}
