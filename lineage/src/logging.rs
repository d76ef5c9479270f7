//! Typed events describing cache activity, and a shareable logger.

use std::cell::RefCell;
use std::rc::Rc;

use lineage_ids::TaskId;
use serde::{Deserialize, Serialize};

use crate::entry::GcsStatus;

/// Events the cache can log.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy, Serialize, Deserialize)]
pub enum LineageEvent {
    /// An entry was inserted or changed status.
    Entry(EntryEvent),
    /// A writeback was issued to the metadata store.
    Flush(FlushEvent),
    /// A commit was confirmed for an entry.
    Commit(CommitEvent),
    /// An entry left the cache.
    Evict(EvictEvent),
    /// A subscription was opened or closed.
    Subscription(SubscriptionEvent),
}

/// An entry was inserted or changed status.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy, Serialize, Deserialize)]
pub struct EntryEvent {
    /// The entry's task.
    pub task_id: TaskId,
    /// The status the entry now has.
    pub status: GcsStatus,
}

/// A writeback was issued to the metadata store.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy, Serialize, Deserialize)]
pub struct FlushEvent {
    /// The written task.
    pub task_id: TaskId,
}

/// A commit was confirmed for an entry.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy, Serialize, Deserialize)]
pub struct CommitEvent {
    /// The committed task.
    pub task_id: TaskId,
}

/// An entry left the cache.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy, Serialize, Deserialize)]
pub struct EvictEvent {
    /// The evicted task.
    pub task_id: TaskId,
}

/// A subscription was opened or closed.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy, Serialize, Deserialize)]
pub struct SubscriptionEvent {
    /// The key subscribed or unsubscribed.
    pub task_id: TaskId,
    /// True when opening, false when cancelling.
    pub subscribed: bool,
}

impl From<EntryEvent> for LineageEvent {
    fn from(v: EntryEvent) -> LineageEvent {
        LineageEvent::Entry(v)
    }
}
impl From<FlushEvent> for LineageEvent {
    fn from(v: FlushEvent) -> LineageEvent {
        LineageEvent::Flush(v)
    }
}
impl From<CommitEvent> for LineageEvent {
    fn from(v: CommitEvent) -> LineageEvent {
        LineageEvent::Commit(v)
    }
}
impl From<EvictEvent> for LineageEvent {
    fn from(v: EvictEvent) -> LineageEvent {
        LineageEvent::Evict(v)
    }
}
impl From<SubscriptionEvent> for LineageEvent {
    fn from(v: SubscriptionEvent) -> LineageEvent {
        LineageEvent::Subscription(v)
    }
}

/// A shareable handle that forwards events to a bound action.
///
/// # Examples
///
/// ```
/// use lineage::logging::{LineageEvent, Logger};
/// use std::cell::RefCell;
/// use std::rc::Rc;
///
/// let events = Rc::new(RefCell::new(Vec::new()));
/// let sink = Rc::clone(&events);
/// let logger = Logger::new(move |event| sink.borrow_mut().push(event));
/// # let _ = &logger;
/// ```
pub struct Logger {
    action: Rc<RefCell<dyn FnMut(LineageEvent)>>,
}

impl Clone for Logger {
    fn clone(&self) -> Self {
        Logger {
            action: Rc::clone(&self.action),
        }
    }
}

impl Logger {
    /// Allocates a new shareable logger bound to `action`.
    pub fn new<F: FnMut(LineageEvent) + 'static>(action: F) -> Self {
        Logger {
            action: Rc::new(RefCell::new(action)),
        }
    }

    /// Logs an event.
    pub fn log<E: Into<LineageEvent>>(&self, event: E) {
        (self.action.borrow_mut())(event.into())
    }
}
