use super::handlers;
use super::types::{AppState, Request};
use crate::ipc::error::err;

type Handler = fn(&mut AppState, &Request) -> Option<serde_json::Value>;

const HANDLERS: &[Handler] = &[
    handlers::core::try_handle,
    handlers::students::try_handle,
    handlers::families::try_handle,
    handlers::women::try_handle,
    handlers::volunteers::try_handle,
    handlers::attendance::try_handle,
    handlers::bulk::try_handle,
    handlers::subscriptions::try_handle,
    handlers::reports::try_handle,
    handlers::dashboard::try_handle,
    handlers::import_legacy::try_handle,
];

pub fn handle_request(state: &mut AppState, req: Request) -> serde_json::Value {
    for handler in HANDLERS {
        if let Some(resp) = handler(state, &req) {
            return resp;
        }
    }
    log::debug!("unknown method {}", req.method);
    err(
        &req.id,
        "not_implemented",
        format!("unknown method: {}", req.method),
        None,
    )
}
