use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};

use crate::calc::CalcError;
use crate::exchange::ExchangeError;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Connection};
use crate::live::LiveCollection;
use crate::models::Stored;
use crate::store::StoreError;
use crate::workflow::WorkflowError;

pub struct HandlerErr {
    pub code: &'static str,
    pub message: String,
    pub details: Option<Value>,
}

impl HandlerErr {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        HandlerErr {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn bad_params(message: impl Into<String>) -> Self {
        HandlerErr::new("bad_params", message)
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn response(self, id: &str) -> Value {
        err(id, self.code, self.message, self.details)
    }
}

impl From<StoreError> for HandlerErr {
    fn from(e: StoreError) -> Self {
        let details = match &e {
            StoreError::NotFound { collection, id } => Some(json!({
                "collection": collection,
                "id": id,
            })),
            StoreError::Conflict {
                collection,
                id,
                expected,
                actual,
            } => Some(json!({
                "collection": collection,
                "id": id,
                "expectedRevision": expected,
                "actualRevision": actual,
            })),
            _ => None,
        };
        HandlerErr {
            code: e.code(),
            message: e.to_string(),
            details,
        }
    }
}

impl From<CalcError> for HandlerErr {
    fn from(e: CalcError) -> Self {
        HandlerErr::new(e.code(), e.to_string())
    }
}

impl From<ExchangeError> for HandlerErr {
    fn from(e: ExchangeError) -> Self {
        HandlerErr::new(e.code(), e.to_string())
    }
}

impl From<WorkflowError> for HandlerErr {
    fn from(e: WorkflowError) -> Self {
        let details = match &e {
            WorkflowError::InvalidMarks {
                student_id, name, ..
            } => Some(json!({ "studentId": student_id, "name": name })),
            // Only the persisted count is reported; which records made it is
            // visible in the next snapshot.
            WorkflowError::Partial {
                persisted, source, ..
            } => Some(json!({ "persisted": persisted, "cause": source.code() })),
            WorkflowError::Cancelled { persisted, .. } => Some(json!({ "persisted": persisted })),
            WorkflowError::NotOpen(state) => Some(json!({ "state": state })),
            _ => None,
        };
        HandlerErr {
            code: e.code(),
            message: e.to_string(),
            details,
        }
    }
}

pub fn reply(id: &str, result: Result<Value, HandlerErr>) -> Value {
    match result {
        Ok(v) => ok(id, v),
        Err(e) => e.response(id),
    }
}

pub fn required_str(params: &Value, key: &str) -> Result<String, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| HandlerErr::bad_params(format!("missing params.{}", key)))
}

pub fn optional_str<'a>(params: &'a Value, key: &str) -> Option<&'a str> {
    params.get(key).and_then(|v| v.as_str())
}

pub fn optional_i64(params: &Value, key: &str) -> Result<Option<i64>, HandlerErr> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => n
            .as_i64()
            .map(Some)
            .ok_or_else(|| HandlerErr::bad_params(format!("params.{} must be an integer", key))),
        Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
        Some(Value::String(s)) => s
            .trim()
            .parse::<i64>()
            .map(Some)
            .map_err(|_| HandlerErr::bad_params(format!("params.{} must be an integer", key))),
        Some(_) => Err(HandlerErr::bad_params(format!(
            "params.{} must be an integer",
            key
        ))),
    }
}

pub fn object_param(params: &Value, key: &str) -> Result<Value, HandlerErr> {
    match params.get(key) {
        Some(v @ Value::Object(_)) => Ok(v.clone()),
        _ => Err(HandlerErr::bad_params(format!(
            "params.{} must be an object",
            key
        ))),
    }
}

pub fn parse_record<T: DeserializeOwned>(value: Value, what: &str) -> Result<T, HandlerErr> {
    serde_json::from_value(value)
        .map_err(|e| HandlerErr::bad_params(format!("invalid {}: {}", what, e)))
}

pub fn to_json<T: Serialize>(value: &T) -> Result<Value, HandlerErr> {
    serde_json::to_value(value).map_err(|e| HandlerErr::new("internal", e.to_string()))
}

pub fn connection(state: &mut AppState) -> Result<&mut Connection, HandlerErr> {
    state.conn.as_mut().ok_or_else(|| {
        HandlerErr::new(
            "store_not_connected",
            "no store connected; call store.connect first",
        )
    })
}

/// Opens the view if needed. A failure lands in the view's error slot and
/// reads continue with whatever snapshot is held (usually none).
pub fn activate_view<T>(live: &mut LiveCollection<T>)
where
    T: Serialize + DeserializeOwned + Clone + 'static,
{
    if let Err(e) = live.activate() {
        log::warn!("{}: live view unavailable: {}", live.collection_name(), e);
    }
}

/// Standard list payload: items plus the view's loading and error state.
pub fn list_payload<T: Serialize>(
    items: &[&Stored<T>],
    loading: bool,
    error: Option<String>,
) -> Result<Value, HandlerErr> {
    Ok(json!({
        "items": to_json(&items)?,
        "count": items.len(),
        "loading": loading,
        "error": error,
    }))
}

/// A patch must be an object; store-managed keys are ignored by the store.
pub fn patch_param(params: &Value) -> Result<Value, HandlerErr> {
    object_param(params, "patch")
}

pub fn expected_revision(params: &Value) -> Result<Option<i64>, HandlerErr> {
    optional_i64(params, "expectedRevision")
}

/// Merges `patch` over the current record, checks the result still reads as
/// `T`, then writes it (with a revision precondition when one is given).
pub fn update_record<T>(
    live: &LiveCollection<T>,
    id: &str,
    patch: Value,
    expected_revision: Option<i64>,
    what: &str,
) -> Result<Stored<T>, HandlerErr>
where
    T: Serialize + DeserializeOwned + Clone + 'static,
{
    update_record_with(live, id, patch, expected_revision, what, |_| Ok(()))
}

/// As [`update_record`], with `prepare` run on the merged record before the
/// write. An error from `prepare` leaves the stored record untouched.
pub fn update_record_with<T, F>(
    live: &LiveCollection<T>,
    id: &str,
    patch: Value,
    expected_revision: Option<i64>,
    what: &str,
    prepare: F,
) -> Result<Stored<T>, HandlerErr>
where
    T: Serialize + DeserializeOwned + Clone + 'static,
    F: FnOnce(&mut T) -> Result<(), HandlerErr>,
{
    let current = live
        .find(id)
        .ok_or_else(|| StoreError::NotFound {
            collection: live.collection_name().to_string(),
            id: id.to_string(),
        })?;
    let mut merged = to_json(&current.data)?;
    if let (Value::Object(base), Value::Object(p)) = (&mut merged, patch) {
        for (k, v) in p {
            base.insert(k, v);
        }
    }
    let mut record: T = parse_record(merged, what)?;
    prepare(&mut record)?;
    Ok(live.replace(id, &record, expected_revision)?)
}
