//! The metadata-store contract consumed by the cache, and an in-process
//! store usable for tests and single-process deployments.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use lineage_ids::TaskId;
use thiserror::Error;

/// Errors surfaced by a metadata store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store could not be reached.
    #[error("metadata store unavailable: {0}")]
    Unavailable(String),
    /// The store refused the request.
    #[error("metadata store rejected the request for task {0:?}")]
    Rejected(TaskId),
}

/// A completion callback, invoked with the written task's identifier once the
/// write is durable.
pub type WriteCallback = Box<dyn FnMut(TaskId)>;

/// The capability set the cache requires of a metadata store.
///
/// Writes are asynchronous: `async_add` returns once the write is accepted
/// and the completion callback runs later, on the same event loop as the
/// caller. Notification delivery is unordered and may duplicate; consumers
/// must treat deliveries idempotently.
pub trait MetadataStore {
    /// Begins an asynchronous durable write of `payload` under `task_id`,
    /// invoking `on_ack` once durability is achieved.
    fn async_add(
        &mut self,
        task_id: TaskId,
        payload: Vec<u8>,
        on_ack: WriteCallback,
    ) -> Result<(), StoreError>;

    /// Requests a notification once `task_id` is durably committed by any
    /// writer. Duplicate subscriptions for one key are permitted.
    fn subscribe(&mut self, task_id: TaskId) -> Result<(), StoreError>;

    /// Best-effort cancellation of a prior [`subscribe`](Self::subscribe).
    fn unsubscribe(&mut self, task_id: TaskId) -> Result<(), StoreError>;
}

enum Delivery {
    Ack { task_id: TaskId, on_ack: WriteCallback },
    Notify { task_id: TaskId },
}

struct Inner {
    table: HashMap<TaskId, Vec<u8>>,
    deliveries: Vec<Delivery>,
    subscribed: HashSet<TaskId>,
    subscribe_requests: usize,
    handler: Option<Box<dyn FnMut(TaskId)>>,
}

/// An in-process metadata store.
///
/// Writes land in a table immediately, but their completion callbacks and any
/// subscription notifications are queued until [`flush`](MemoryStore::flush),
/// modeling the asynchronous boundary of a remote store while keeping tests
/// deterministic. Handles are cheaply cloneable and share one store.
///
/// # Examples
///
/// ```
/// use lineage::MemoryStore;
/// use lineage::gcs::MetadataStore;
/// use lineage_ids::TaskId;
/// use std::cell::Cell;
/// use std::rc::Rc;
///
/// let mut store = MemoryStore::new();
/// let acked = Rc::new(Cell::new(false));
/// let flag = Rc::clone(&acked);
/// let id = TaskId::from_bytes([1; 16]);
/// store.async_add(id, vec![], Box::new(move |_| flag.set(true))).unwrap();
/// assert!(!acked.get());
/// store.flush();
/// assert!(acked.get());
/// ```
#[derive(Clone)]
pub struct MemoryStore {
    inner: Rc<RefCell<Inner>>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        MemoryStore::new()
    }
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        MemoryStore {
            inner: Rc::new(RefCell::new(Inner {
                table: HashMap::new(),
                deliveries: Vec::new(),
                subscribed: HashSet::new(),
                subscribe_requests: 0,
                handler: None,
            })),
        }
    }

    /// Installs the action invoked for subscription notifications.
    pub fn set_notification_handler<F: FnMut(TaskId) + 'static>(&self, handler: F) {
        self.inner.borrow_mut().handler = Some(Box::new(handler));
    }

    /// Records a write performed by another node, queueing a notification if
    /// this store has a subscription for the key.
    pub fn remote_add(&self, task_id: TaskId, payload: Vec<u8>) {
        let mut inner = self.inner.borrow_mut();
        inner.table.insert(task_id, payload);
        if inner.subscribed.contains(&task_id) {
            inner.deliveries.push(Delivery::Notify { task_id });
        }
    }

    /// Delivers every queued completion and notification.
    ///
    /// Deliveries queued while flushing (for example by writes the handler
    /// itself issues) wait for the next flush.
    pub fn flush(&self) {
        let (deliveries, mut handler) = {
            let mut inner = self.inner.borrow_mut();
            (std::mem::take(&mut inner.deliveries), inner.handler.take())
        };
        for delivery in deliveries {
            match delivery {
                Delivery::Ack { task_id, mut on_ack } => on_ack(task_id),
                Delivery::Notify { task_id } => {
                    if let Some(handler) = handler.as_mut() {
                        handler(task_id);
                    }
                }
            }
        }
        let mut inner = self.inner.borrow_mut();
        if inner.handler.is_none() {
            inner.handler = handler;
        }
    }

    /// The number of tasks durably written.
    pub fn table_len(&self) -> usize {
        self.inner.borrow().table.len()
    }

    /// True iff a write for `task_id` has landed.
    pub fn contains_task(&self, task_id: TaskId) -> bool {
        self.inner.borrow().table.contains_key(&task_id)
    }

    /// The keys with live subscriptions.
    pub fn subscribed_tasks(&self) -> Vec<TaskId> {
        self.inner.borrow().subscribed.iter().copied().collect()
    }

    /// The number of `subscribe` calls ever made.
    pub fn subscribe_requests(&self) -> usize {
        self.inner.borrow().subscribe_requests
    }

    /// The number of queued, undelivered completions and notifications.
    pub fn pending_deliveries(&self) -> usize {
        self.inner.borrow().deliveries.len()
    }
}

impl MetadataStore for MemoryStore {
    fn async_add(
        &mut self,
        task_id: TaskId,
        payload: Vec<u8>,
        on_ack: WriteCallback,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.borrow_mut();
        inner.table.insert(task_id, payload);
        inner.deliveries.push(Delivery::Ack { task_id, on_ack });
        Ok(())
    }

    fn subscribe(&mut self, task_id: TaskId) -> Result<(), StoreError> {
        let mut inner = self.inner.borrow_mut();
        inner.subscribed.insert(task_id);
        inner.subscribe_requests += 1;
        // A key that is already durable notifies straight away.
        if inner.table.contains_key(&task_id) {
            inner.deliveries.push(Delivery::Notify { task_id });
        }
        Ok(())
    }

    fn unsubscribe(&mut self, task_id: TaskId) -> Result<(), StoreError> {
        self.inner.borrow_mut().subscribed.remove(&task_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{MemoryStore, MetadataStore};
    use lineage_ids::TaskId;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn remote_add_notifies_only_subscribers() {
        let store = MemoryStore::new();
        let delivered = Rc::new(RefCell::new(Vec::new()));
        let log = Rc::clone(&delivered);
        store.set_notification_handler(move |id| log.borrow_mut().push(id));

        let subscribed = TaskId::from_random();
        let unsubscribed = TaskId::from_random();
        store.clone().subscribe(subscribed).unwrap();
        store.remote_add(subscribed, vec![]);
        store.remote_add(unsubscribed, vec![]);
        store.flush();

        assert_eq!(*delivered.borrow(), vec![subscribed]);
    }

    #[test]
    fn subscribing_to_a_durable_key_notifies() {
        let store = MemoryStore::new();
        let delivered = Rc::new(RefCell::new(Vec::new()));
        let log = Rc::clone(&delivered);
        store.set_notification_handler(move |id| log.borrow_mut().push(id));

        let id = TaskId::from_random();
        store.remote_add(id, vec![]);
        store.clone().subscribe(id).unwrap();
        assert!(delivered.borrow().is_empty());
        store.flush();
        assert_eq!(*delivered.borrow(), vec![id]);
    }
}
