//! Collection client over the document store.
//!
//! Each collection maps a server-assigned id to a JSON document. The store
//! owns `id`, `createdAt`, `updatedAt` and `revision`; values for those keys
//! coming from callers are discarded. Listeners registered with
//! [`DocumentStore::subscribe`] receive the full collection snapshot once on
//! registration and again after every write to that collection. Listeners run
//! synchronously inside the write call and must not write to the store
//! themselves.

use crate::config::ResolvedStore;
use crate::db;
use crate::models::Stored;
use chrono::{SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::cell::{Cell, RefCell};
use std::marker::PhantomData;
use std::rc::{Rc, Weak};
use uuid::Uuid;

pub const STUDENTS: &str = "students";
pub const FAMILIES: &str = "families";
pub const WOMEN: &str = "women";
pub const VOLUNTEERS: &str = "volunteers";
pub const ATTENDANCE: &str = "attendance";

pub const COLLECTIONS: &[&str] = &[STUDENTS, FAMILIES, WOMEN, VOLUNTEERS, ATTENDANCE];

const RESERVED_KEYS: &[&str] = &["id", "createdAt", "updatedAt", "revision"];
const META_PROJECT: &str = "project_id";
const META_KEY_FINGERPRINT: &str = "api_key_sha256";

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("{collection}/{id} not found")]
    NotFound { collection: String, id: String },
    #[error("{collection}/{id} was modified concurrently (expected revision {expected}, found {actual})")]
    Conflict {
        collection: String,
        id: String,
        expected: i64,
        actual: i64,
    },
    #[error("malformed document: {0}")]
    Malformed(String),
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
}

impl StoreError {
    pub fn code(&self) -> &'static str {
        match self {
            StoreError::Unavailable(_) => "store_unavailable",
            StoreError::PermissionDenied(_) => "permission_denied",
            StoreError::NotFound { .. } => "not_found",
            StoreError::Conflict { .. } => "conflict",
            StoreError::Malformed(_) => "bad_params",
            StoreError::Sqlite(e) if is_connectivity(e) => "store_unavailable",
            StoreError::Sqlite(_) => "db_query_failed",
        }
    }
}

fn is_connectivity(e: &rusqlite::Error) -> bool {
    matches!(
        e.sqlite_error_code(),
        Some(rusqlite::ErrorCode::DatabaseBusy)
            | Some(rusqlite::ErrorCode::DatabaseLocked)
            | Some(rusqlite::ErrorCode::CannotOpen)
            | Some(rusqlite::ErrorCode::ReadOnly)
    )
}

pub fn now_stamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn fingerprint(api_key: &str) -> String {
    let digest = Sha256::digest(api_key.as_bytes());
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

type Listener = Box<dyn FnMut(&[Value])>;

struct ListenerEntry {
    id: u64,
    collection: String,
    callback: Rc<RefCell<Listener>>,
}

pub struct DocumentStore {
    conn: Connection,
    project_id: String,
    listeners: RefCell<Vec<ListenerEntry>>,
    next_listener: Cell<u64>,
}

impl std::fmt::Debug for DocumentStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentStore")
            .field("project_id", &self.project_id)
            .field("listeners", &self.listeners.borrow().len())
            .finish()
    }
}

impl DocumentStore {
    pub fn open(cfg: &ResolvedStore) -> Result<Rc<DocumentStore>, StoreError> {
        let conn = db::open_db(&cfg.data_dir, &cfg.project_id)
            .map_err(|e| StoreError::Unavailable(format!("{e:#}")))?;

        let expected = fingerprint(&cfg.api_key);
        match db::meta_get(&conn, META_KEY_FINGERPRINT)? {
            Some(stored) if stored != expected => {
                return Err(StoreError::PermissionDenied(format!(
                    "api key rejected for project {}",
                    cfg.project_id
                )));
            }
            Some(_) => {}
            None => {
                db::meta_set(&conn, META_PROJECT, &cfg.project_id)?;
                db::meta_set(&conn, META_KEY_FINGERPRINT, &expected)?;
                log::info!("initialized store for project {}", cfg.project_id);
            }
        }

        Ok(Rc::new(DocumentStore {
            conn,
            project_id: cfg.project_id.clone(),
            listeners: RefCell::new(Vec::new()),
            next_listener: Cell::new(1),
        }))
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.borrow().len()
    }

    fn row_to_doc(id: String, body: &str, created_at: String, updated_at: String, revision: i64) -> Value {
        let mut obj = match serde_json::from_str::<Value>(body) {
            Ok(Value::Object(m)) => m,
            _ => Map::new(),
        };
        obj.insert("id".into(), Value::String(id));
        obj.insert("createdAt".into(), Value::String(created_at));
        obj.insert("updatedAt".into(), Value::String(updated_at));
        obj.insert("revision".into(), Value::from(revision));
        Value::Object(obj)
    }

    pub fn list(&self, collection: &str) -> Result<Vec<Value>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, body, created_at, updated_at, revision
             FROM documents
             WHERE collection = ?
             ORDER BY rowid",
        )?;
        let rows = stmt
            .query_map([collection], |r| {
                Ok((
                    r.get::<_, String>(0)?,
                    r.get::<_, String>(1)?,
                    r.get::<_, String>(2)?,
                    r.get::<_, String>(3)?,
                    r.get::<_, i64>(4)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows
            .into_iter()
            .map(|(id, body, c, u, rev)| Self::row_to_doc(id, &body, c, u, rev))
            .collect())
    }

    pub fn get(&self, collection: &str, id: &str) -> Result<Option<Value>, StoreError> {
        let row = self
            .conn
            .query_row(
                "SELECT body, created_at, updated_at, revision
                 FROM documents
                 WHERE collection = ? AND id = ?",
                (collection, id),
                |r| {
                    Ok((
                        r.get::<_, String>(0)?,
                        r.get::<_, String>(1)?,
                        r.get::<_, String>(2)?,
                        r.get::<_, i64>(3)?,
                    ))
                },
            )
            .optional()?;
        Ok(row.map(|(body, c, u, rev)| Self::row_to_doc(id.to_string(), &body, c, u, rev)))
    }

    fn clean_body(collection: &str, value: Value) -> Result<Map<String, Value>, StoreError> {
        let Value::Object(mut obj) = value else {
            return Err(StoreError::Malformed(format!(
                "{} documents must be JSON objects",
                collection
            )));
        };
        for key in RESERVED_KEYS {
            obj.remove(*key);
        }
        Ok(obj)
    }

    pub fn insert(&self, collection: &str, body: Value) -> Result<Value, StoreError> {
        let obj = Self::clean_body(collection, body)?;
        let id = Uuid::new_v4().to_string();
        let stamp = now_stamp();
        let body_text = Value::Object(obj).to_string();
        self.conn.execute(
            "INSERT INTO documents(collection, id, body, created_at, updated_at, revision)
             VALUES(?, ?, ?, ?, ?, 1)",
            (collection, &id, &body_text, &stamp, &stamp),
        )?;
        log::debug!("{}: added {}", collection, id);
        self.notify(collection);
        Ok(Self::row_to_doc(id, &body_text, stamp.clone(), stamp, 1))
    }

    /// Top-level merge of `patch` into the stored body. With `expected_revision`
    /// the write is refused unless the stored revision still matches.
    pub fn merge(
        &self,
        collection: &str,
        id: &str,
        patch: Value,
        expected_revision: Option<i64>,
    ) -> Result<Value, StoreError> {
        let patch = Self::clean_body(collection, patch)?;
        let existing: Option<(String, String, i64)> = self
            .conn
            .query_row(
                "SELECT body, created_at, revision FROM documents WHERE collection = ? AND id = ?",
                (collection, id),
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
            )
            .optional()?;
        let Some((body, created_at, revision)) = existing else {
            return Err(StoreError::NotFound {
                collection: collection.to_string(),
                id: id.to_string(),
            });
        };
        if let Some(expected) = expected_revision {
            if expected != revision {
                return Err(StoreError::Conflict {
                    collection: collection.to_string(),
                    id: id.to_string(),
                    expected,
                    actual: revision,
                });
            }
        }

        let mut merged = match serde_json::from_str::<Value>(&body) {
            Ok(Value::Object(m)) => m,
            _ => Map::new(),
        };
        for (k, v) in patch {
            merged.insert(k, v);
        }
        let body_text = Value::Object(merged).to_string();
        let stamp = now_stamp();
        let next_revision = revision + 1;
        let changed = self.conn.execute(
            "UPDATE documents SET body = ?, updated_at = ?, revision = ?
             WHERE collection = ? AND id = ? AND revision = ?",
            (&body_text, &stamp, next_revision, collection, id, revision),
        )?;
        if changed == 0 {
            let actual = self
                .conn
                .query_row(
                    "SELECT revision FROM documents WHERE collection = ? AND id = ?",
                    (collection, id),
                    |r| r.get::<_, i64>(0),
                )
                .optional()?
                .unwrap_or(-1);
            return Err(StoreError::Conflict {
                collection: collection.to_string(),
                id: id.to_string(),
                expected: revision,
                actual,
            });
        }
        log::debug!("{}: updated {} to revision {}", collection, id, next_revision);
        self.notify(collection);
        Ok(Self::row_to_doc(
            id.to_string(),
            &body_text,
            created_at,
            stamp,
            next_revision,
        ))
    }

    /// Deleting an id that does not exist is not an error.
    pub fn remove(&self, collection: &str, id: &str) -> Result<(), StoreError> {
        let changed = self.conn.execute(
            "DELETE FROM documents WHERE collection = ? AND id = ?",
            (collection, id),
        )?;
        if changed > 0 {
            log::debug!("{}: deleted {}", collection, id);
            self.notify(collection);
        }
        Ok(())
    }

    pub fn subscribe<F>(self: &Rc<Self>, collection: &str, callback: F) -> Result<Subscription, StoreError>
    where
        F: FnMut(&[Value]) + 'static,
    {
        let initial = self.list(collection)?;
        let id = self.next_listener.get();
        self.next_listener.set(id + 1);
        let callback: Rc<RefCell<Listener>> = Rc::new(RefCell::new(Box::new(callback)));
        self.listeners.borrow_mut().push(ListenerEntry {
            id,
            collection: collection.to_string(),
            callback: callback.clone(),
        });
        log::debug!("{}: listener {} attached", collection, id);
        (*callback.borrow_mut())(&initial);
        Ok(Subscription {
            store: Rc::downgrade(self),
            id,
            collection: collection.to_string(),
        })
    }

    fn detach(&self, listener_id: u64) {
        let mut listeners = self.listeners.borrow_mut();
        let before = listeners.len();
        listeners.retain(|l| l.id != listener_id);
        if listeners.len() != before {
            log::debug!("listener {} detached", listener_id);
        }
    }

    fn notify(&self, collection: &str) {
        let callbacks: Vec<Rc<RefCell<Listener>>> = self
            .listeners
            .borrow()
            .iter()
            .filter(|l| l.collection == collection)
            .map(|l| l.callback.clone())
            .collect();
        if callbacks.is_empty() {
            return;
        }
        let docs = match self.list(collection) {
            Ok(d) => d,
            Err(e) => {
                log::warn!("{}: snapshot for listeners failed: {}", collection, e);
                return;
            }
        };
        for cb in callbacks {
            match cb.try_borrow_mut() {
                Ok(mut f) => (*f)(&docs),
                Err(_) => log::warn!("{}: listener re-entered during delivery; skipped", collection),
            }
        }
    }
}

/// Detaches its listener when dropped.
#[derive(Debug)]
pub struct Subscription {
    store: Weak<DocumentStore>,
    id: u64,
    collection: String,
}

impl Subscription {
    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn unsubscribe(self) {
        drop(self)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(store) = self.store.upgrade() {
            store.detach(self.id);
        }
    }
}

fn decode<T: DeserializeOwned>(doc: Value) -> Result<Stored<T>, StoreError> {
    serde_json::from_value(doc).map_err(|e| StoreError::Malformed(e.to_string()))
}

/// Typed view of one collection.
pub struct Collection<T> {
    store: Rc<DocumentStore>,
    name: &'static str,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for Collection<T> {
    fn clone(&self) -> Self {
        Collection {
            store: self.store.clone(),
            name: self.name,
            _marker: PhantomData,
        }
    }
}

impl<T> Collection<T>
where
    T: Serialize + DeserializeOwned + 'static,
{
    pub fn new(store: Rc<DocumentStore>, name: &'static str) -> Self {
        Collection {
            store,
            name,
            _marker: PhantomData,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    fn decode_all(name: &str, docs: Vec<Value>) -> Vec<Stored<T>> {
        docs.into_iter()
            .filter_map(|d| match decode::<T>(d) {
                Ok(v) => Some(v),
                Err(e) => {
                    log::warn!("{}: skipping unreadable document: {}", name, e);
                    None
                }
            })
            .collect()
    }

    /// Read failures degrade to an empty list; they are logged, not returned.
    pub fn get_all(&self) -> Vec<Stored<T>> {
        match self.try_get_all() {
            Ok(v) => v,
            Err(e) => {
                log::warn!("error fetching {}: {}", self.name, e);
                Vec::new()
            }
        }
    }

    pub fn try_get_all(&self) -> Result<Vec<Stored<T>>, StoreError> {
        Ok(Self::decode_all(self.name, self.store.list(self.name)?))
    }

    pub fn get(&self, id: &str) -> Result<Option<Stored<T>>, StoreError> {
        self.store.get(self.name, id)?.map(decode::<T>).transpose()
    }

    pub fn query_by(&self, field: &str, value: &Value) -> Result<Vec<Stored<T>>, StoreError> {
        let docs = self
            .store
            .list(self.name)?
            .into_iter()
            .filter(|d| d.get(field) == Some(value))
            .collect();
        Ok(Self::decode_all(self.name, docs))
    }

    pub fn add(&self, record: &T) -> Result<Stored<T>, StoreError> {
        let body = serde_json::to_value(record).map_err(|e| StoreError::Malformed(e.to_string()))?;
        decode(self.store.insert(self.name, body)?)
    }

    pub fn update(&self, id: &str, patch: Value) -> Result<Stored<T>, StoreError> {
        decode(self.store.merge(self.name, id, patch, None)?)
    }

    pub fn update_if(&self, id: &str, patch: Value, expected_revision: i64) -> Result<Stored<T>, StoreError> {
        decode(self.store.merge(self.name, id, patch, Some(expected_revision))?)
    }

    /// Whole-record overwrite of every field `T` knows about.
    pub fn replace(&self, id: &str, record: &T, expected_revision: Option<i64>) -> Result<Stored<T>, StoreError> {
        let body = serde_json::to_value(record).map_err(|e| StoreError::Malformed(e.to_string()))?;
        decode(self.store.merge(self.name, id, body, expected_revision)?)
    }

    pub fn delete(&self, id: &str) -> Result<(), StoreError> {
        self.store.remove(self.name, id)
    }

    pub fn subscribe<F>(&self, mut callback: F) -> Result<Subscription, StoreError>
    where
        F: FnMut(Vec<Stored<T>>) + 'static,
    {
        let name = self.name;
        self.store.subscribe(name, move |docs: &[Value]| {
            callback(Self::decode_all(name, docs.to_vec()))
        })
    }
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use crate::models::{Volunteer, VolunteerStatus};
    use serde_json::json;

    #[test]
    fn add_assigns_identity_and_strips_reserved_keys() {
        let store = open_temp("kalams-store-add");
        let doc = store
            .insert(VOLUNTEERS, json!({ "id": "mine", "revision": 99, "name": "Asha" }))
            .expect("insert");
        assert_ne!(doc["id"], json!("mine"));
        assert_eq!(doc["revision"], json!(1));
        assert_eq!(doc["createdAt"], doc["updatedAt"]);
    }

    #[test]
    fn update_merges_fields_and_bumps_revision() {
        let store = open_temp("kalams-store-merge");
        let col: Collection<Volunteer> = Collection::new(store.clone(), VOLUNTEERS);
        let v = col
            .add(&Volunteer {
                name: "Asha".into(),
                email: "asha@example.org".into(),
                ..Default::default()
            })
            .expect("add");
        let updated = col
            .update(&v.id, json!({ "status": "approved" }))
            .expect("update");
        assert_eq!(updated.data.status, VolunteerStatus::Approved);
        assert_eq!(updated.data.email, "asha@example.org");
        assert_eq!(updated.revision, 2);
        assert_eq!(updated.created_at, v.created_at);
    }

    #[test]
    fn update_of_missing_document_fails() {
        let store = open_temp("kalams-store-missing");
        let err = store
            .merge(STUDENTS, "nope", json!({ "name": "x" }), None)
            .expect_err("missing");
        assert_eq!(err.code(), "not_found");
    }

    #[test]
    fn stale_revision_is_rejected() {
        let store = open_temp("kalams-store-conflict");
        let doc = store.insert(STUDENTS, json!({ "name": "A" })).expect("insert");
        let id = doc["id"].as_str().expect("id").to_string();
        store
            .merge(STUDENTS, &id, json!({ "name": "B" }), Some(1))
            .expect("first write");
        let err = store
            .merge(STUDENTS, &id, json!({ "name": "C" }), Some(1))
            .expect_err("stale");
        assert!(matches!(err, StoreError::Conflict { expected: 1, actual: 2, .. }));
        let current = store.get(STUDENTS, &id).expect("get").expect("doc");
        assert_eq!(current["name"], json!("B"));
    }

    #[test]
    fn subscribe_delivers_initial_and_subsequent_snapshots() {
        let store = open_temp("kalams-store-sub");
        store.insert(FAMILIES, json!({ "familyName": "Shaikh" })).expect("seed");

        let seen: Rc<RefCell<Vec<usize>>> = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        let sub = store
            .subscribe(FAMILIES, move |docs| sink.borrow_mut().push(docs.len()))
            .expect("subscribe");
        store.insert(FAMILIES, json!({ "familyName": "Khan" })).expect("insert");
        store.insert(WOMEN, json!({ "name": "other collection" })).expect("insert");
        assert_eq!(*seen.borrow(), vec![1, 2]);

        drop(sub);
        assert_eq!(store.listener_count(), 0);
        store.insert(FAMILIES, json!({ "familyName": "Patel" })).expect("insert");
        assert_eq!(*seen.borrow(), vec![1, 2]);
    }

    #[test]
    fn wrong_api_key_is_refused() {
        let dir = temp_dir("kalams-store-key");
        let cfg = ResolvedStore {
            project_id: "p".into(),
            api_key: "right".into(),
            data_dir: dir.clone(),
        };
        DocumentStore::open(&cfg).expect("first open");
        let bad = ResolvedStore {
            api_key: "wrong".into(),
            ..cfg
        };
        let err = DocumentStore::open(&bad).expect_err("bad key");
        assert_eq!(err.code(), "permission_denied");
    }

    #[test]
    fn get_all_skips_unreadable_documents() {
        let store = open_temp("kalams-store-get-all");
        store
            .insert(VOLUNTEERS, json!({ "name": "Asha", "email": "a@example.org" }))
            .expect("insert");
        store
            .insert(VOLUNTEERS, json!({ "name": 42 }))
            .expect("insert");
        let col: Collection<Volunteer> = Collection::new(store.clone(), VOLUNTEERS);
        let all = col.get_all();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].data.name, "Asha");
        assert_eq!(store.list(VOLUNTEERS).expect("raw").len(), 2);
    }

    #[test]
    fn query_by_filters_on_field_value() {
        let store = open_temp("kalams-store-query");
        store
            .insert(ATTENDANCE, json!({ "studentId": "a", "date": "2025-01-01" }))
            .expect("insert");
        store
            .insert(ATTENDANCE, json!({ "studentId": "b", "date": "2025-01-02" }))
            .expect("insert");
        let col: Collection<crate::models::AttendanceRecord> =
            Collection::new(store.clone(), ATTENDANCE);
        let rows = col.query_by("studentId", &json!("b")).expect("query");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].data.date, "2025-01-02");
    }
}
