use std::cell::RefCell;
use std::collections::HashMap;
use std::path::PathBuf;
use std::rc::Rc;

use serde::Deserialize;
use serde_json::Value;

use crate::config::AppConfig;
use crate::live::LiveCollection;
use crate::models::{AttendanceRecord, Family, Student, Volunteer, Woman};
use crate::store::{
    Collection, DocumentStore, Subscription, ATTENDANCE, FAMILIES, STUDENTS, VOLUNTEERS, WOMEN,
};
use crate::workflow::{BulkSession, TutorScope};

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

/// Event lines queued by store listeners during a request. The main loop
/// writes them out before the response line.
pub type Outbox = Rc<RefCell<Vec<Value>>>;

/// An open store plus one live view per entity collection.
pub struct Connection {
    pub store: Rc<DocumentStore>,
    pub data_dir: PathBuf,
    pub students: LiveCollection<Student>,
    pub families: LiveCollection<Family>,
    pub women: LiveCollection<Woman>,
    pub volunteers: LiveCollection<Volunteer>,
    pub attendance: Collection<AttendanceRecord>,
}

impl Connection {
    pub fn new(store: Rc<DocumentStore>, data_dir: PathBuf) -> Self {
        Connection {
            data_dir,
            students: LiveCollection::new(Collection::new(store.clone(), STUDENTS)),
            families: LiveCollection::new(Collection::new(store.clone(), FAMILIES)),
            women: LiveCollection::new(Collection::new(store.clone(), WOMEN)),
            volunteers: LiveCollection::new(Collection::new(store.clone(), VOLUNTEERS)),
            attendance: Collection::new(store.clone(), ATTENDANCE),
            store,
        }
    }

    /// Closes a live view by collection name. Returns false for unknown names.
    pub fn deactivate(&mut self, view: &str) -> bool {
        match view {
            STUDENTS => self.students.deactivate(),
            FAMILIES => self.families.deactivate(),
            WOMEN => self.women.deactivate(),
            VOLUNTEERS => self.volunteers.deactivate(),
            _ => return false,
        }
        true
    }

    pub fn active_views(&self) -> Vec<&'static str> {
        [
            (STUDENTS, self.students.is_active()),
            (FAMILIES, self.families.is_active()),
            (WOMEN, self.women.is_active()),
            (VOLUNTEERS, self.volunteers.is_active()),
        ]
        .into_iter()
        .filter_map(|(name, active)| active.then_some(name))
        .collect()
    }

    pub fn deactivate_all(&mut self) {
        self.students.deactivate();
        self.families.deactivate();
        self.women.deactivate();
        self.volunteers.deactivate();
    }
}

pub struct AppState {
    pub config: AppConfig,
    pub conn: Option<Connection>,
    pub scope: TutorScope,
    pub bulk: HashMap<String, BulkSession>,
    pub subscriptions: HashMap<String, Subscription>,
    pub outbox: Outbox,
}

impl AppState {
    pub fn new(config: AppConfig) -> Self {
        AppState {
            config,
            conn: None,
            scope: TutorScope::admin(),
            bulk: HashMap::new(),
            subscriptions: HashMap::new(),
            outbox: Rc::new(RefCell::new(Vec::new())),
        }
    }

    pub fn take_events(&self) -> Vec<Value> {
        std::mem::take(&mut *self.outbox.borrow_mut())
    }

    /// Drops subscriptions and sessions, then the store itself.
    pub fn disconnect(&mut self) -> bool {
        self.subscriptions.clear();
        self.bulk.clear();
        match self.conn.take() {
            Some(mut c) => {
                c.deactivate_all();
                log::info!("disconnected from project {}", c.store.project_id());
                true
            }
            None => false,
        }
    }
}
