use crate::ipc::helpers::{connection, reply, required_str, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::store::COLLECTIONS;
use serde_json::{json, Value};
use uuid::Uuid;

/// Every later write to the collection queues a full snapshot event; the
/// first one is queued right away and goes out ahead of this response.
fn subscriptions_open(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let collection = required_str(&req.params, "collection")?;
    if !COLLECTIONS.contains(&collection.as_str()) {
        return Err(HandlerErr::bad_params(format!("unknown collection: {}", collection))
            .with_details(json!({ "collections": COLLECTIONS })));
    }
    let subscription_id = Uuid::new_v4().to_string();
    let outbox = state.outbox.clone();
    let conn = connection(state)?;

    let sid = subscription_id.clone();
    let name = collection.clone();
    let sub = conn.store.subscribe(&collection, move |docs: &[Value]| {
        outbox.borrow_mut().push(json!({
            "event": "collection.snapshot",
            "subscriptionId": sid,
            "collection": name,
            "docs": docs,
        }));
    })?;
    log::info!("subscription {} opened on {}", subscription_id, collection);
    state.subscriptions.insert(subscription_id.clone(), sub);
    Ok(json!({
        "subscriptionId": subscription_id,
        "collection": collection,
    }))
}

fn subscriptions_close(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let subscription_id = required_str(&req.params, "subscriptionId")?;
    let sub = state.subscriptions.remove(&subscription_id).ok_or_else(|| {
        HandlerErr::new(
            "not_found",
            format!("no subscription {}", subscription_id),
        )
    })?;
    log::info!(
        "subscription {} on {} closed",
        subscription_id,
        sub.collection()
    );
    sub.unsubscribe();
    Ok(json!({ "closed": subscription_id }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "subscriptions.open" => subscriptions_open(state, req),
        "subscriptions.close" => subscriptions_close(state, req),
        _ => return None,
    };
    Some(reply(&req.id, result))
}
