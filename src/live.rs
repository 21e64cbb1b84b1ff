use crate::models::Stored;
use crate::store::{Collection, StoreError, Subscription};
use crate::workflow::CancelToken;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::cell::RefCell;
use std::rc::Rc;

#[derive(Debug)]
struct LiveState<T> {
    items: Vec<Stored<T>>,
    loading: bool,
    error: Option<String>,
}

/// Mirrors one collection into local state for the lifetime of a view.
///
/// `loading` stays true until the first snapshot arrives. Mutation helpers
/// record a failure's message in the error slot before handing the error
/// back. Deactivating drops the subscription and cancels the token handed to
/// workflows started from this view.
pub struct LiveCollection<T> {
    client: Collection<T>,
    state: Rc<RefCell<LiveState<T>>>,
    subscription: Option<Subscription>,
    cancel: CancelToken,
}

impl<T> LiveCollection<T>
where
    T: Serialize + DeserializeOwned + Clone + 'static,
{
    pub fn new(client: Collection<T>) -> Self {
        LiveCollection {
            client,
            state: Rc::new(RefCell::new(LiveState {
                items: Vec::new(),
                loading: true,
                error: None,
            })),
            subscription: None,
            cancel: CancelToken::new(),
        }
    }

    pub fn collection_name(&self) -> &'static str {
        self.client.name()
    }

    pub fn is_active(&self) -> bool {
        self.subscription.is_some()
    }

    /// Opens the subscription. Calling it on an active hook does nothing.
    pub fn activate(&mut self) -> Result<(), StoreError> {
        if self.subscription.is_some() {
            return Ok(());
        }
        if self.cancel.is_cancelled() {
            self.cancel = CancelToken::new();
        }
        let sink = self.state.clone();
        let result = self.client.subscribe(move |items| {
            let mut st = sink.borrow_mut();
            st.items = items;
            st.loading = false;
        });
        match result {
            Ok(sub) => {
                log::debug!("{}: live view active", self.client.name());
                self.subscription = Some(sub);
                self.clear_error();
                Ok(())
            }
            Err(e) => {
                let mut st = self.state.borrow_mut();
                st.error = Some(e.to_string());
                st.loading = false;
                Err(e)
            }
        }
    }

    pub fn deactivate(&mut self) {
        if let Some(sub) = self.subscription.take() {
            sub.unsubscribe();
            log::debug!("{}: live view closed", self.client.name());
        }
        self.cancel.cancel();
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn items(&self) -> Vec<Stored<T>> {
        self.state.borrow().items.clone()
    }

    pub fn find(&self, id: &str) -> Option<Stored<T>> {
        self.state.borrow().items.iter().find(|s| s.id == id).cloned()
    }

    pub fn loading(&self) -> bool {
        self.state.borrow().loading
    }

    pub fn error(&self) -> Option<String> {
        self.state.borrow().error.clone()
    }

    pub fn clear_error(&self) {
        self.state.borrow_mut().error = None;
    }

    fn track<R>(
        &self,
        op: impl FnOnce(&Collection<T>) -> Result<R, StoreError>,
    ) -> Result<R, StoreError> {
        self.state.borrow_mut().loading = true;
        let out = op(&self.client);
        let mut st = self.state.borrow_mut();
        st.loading = false;
        if let Err(e) = &out {
            st.error = Some(e.to_string());
        }
        out
    }

    pub fn add(&self, record: &T) -> Result<Stored<T>, StoreError> {
        self.track(|c| c.add(record))
    }

    pub fn update(&self, id: &str, patch: Value) -> Result<Stored<T>, StoreError> {
        self.track(|c| c.update(id, patch))
    }

    pub fn update_if(
        &self,
        id: &str,
        patch: Value,
        expected_revision: i64,
    ) -> Result<Stored<T>, StoreError> {
        self.track(|c| c.update_if(id, patch, expected_revision))
    }

    pub fn replace(
        &self,
        id: &str,
        record: &T,
        expected_revision: Option<i64>,
    ) -> Result<Stored<T>, StoreError> {
        self.track(|c| c.replace(id, record, expected_revision))
    }

    pub fn delete(&self, id: &str) -> Result<(), StoreError> {
        self.track(|c| c.delete(id))
    }
}

impl<T> Drop for LiveCollection<T> {
    fn drop(&mut self) {
        self.subscription.take();
        self.cancel.cancel();
    }
}
