//! The lineage cache: a per-entry state machine against asynchronous commit
//! notifications, with topological eviction.
//!
//! Local tasks enter waiting, become ready, and are written back to the
//! metadata store once no parent is still owned locally ahead of its own
//! writeback. Tasks received from peers enter remote, with a subscription so
//! the cache learns when the remote owner commits them; a remote parent
//! never holds up a child's write. A confirmed commit evicts the entry only
//! after all of its ancestors have been evicted, so a reader reconstructing
//! a task by following parent pointers never encounters a gap.

use std::cell::RefCell;
use std::collections::HashSet;
use std::rc::Rc;

use lineage_ids::{NodeId, TaskId};

use crate::entry::{GcsStatus, LineageEntry};
use crate::gcs::{MetadataStore, StoreError};
use crate::lineage::Lineage;
use crate::logging::{CommitEvent, EntryEvent, EvictEvent, FlushEvent, LineageEvent, Logger, SubscriptionEvent};
use crate::task::Task;

/// A cache of uncommitted tasks and their ancestry.
///
/// All operations assume serialized invocation on one event loop; none block.
/// Write acknowledgements from the store land in an inbox and are applied at
/// the next operation, or explicitly with [`step`](LineageCache::step).
///
/// # Examples
///
/// ```
/// use lineage::{Lineage, LineageCache, MemoryStore, Task};
/// use lineage_ids::{NodeId, TaskId};
///
/// let store = MemoryStore::new();
/// let mut cache = LineageCache::new(NodeId::nil(), store.clone(), 10);
///
/// let task = Task::new(TaskId::from_bytes([1; 16]), vec![], 1);
/// assert!(cache.add_waiting_task(task.clone(), Lineage::new()).unwrap());
/// assert!(cache.add_ready_task(&task).unwrap());
/// assert_eq!(store.table_len(), 1);
///
/// cache.handle_entry_committed(task.id());
/// assert!(cache.get_lineage().is_empty());
/// ```
pub struct LineageCache<S: MetadataStore> {
    node_id: NodeId,
    store: S,
    lineage: Lineage,
    /// Tasks whose commit is confirmed but whose eviction is deferred behind
    /// a still-present ancestor.
    committed: HashSet<TaskId>,
    /// Keys with an open subscription at the store.
    subscribed: HashSet<TaskId>,
    max_lineage_size: u64,
    /// Acknowledged writes, queued by the completion callbacks handed to
    /// `async_add` and drained at the event-loop boundary.
    acked: Rc<RefCell<Vec<TaskId>>>,
    logger: Option<Logger>,
}

impl<S: MetadataStore> LineageCache<S> {
    /// Creates a cache for the node `node_id`, writing through `store`.
    ///
    /// `max_lineage_size` bounds how much uncommitted ancestry a single task
    /// may accumulate before the cache subscribes to remote ancestors to
    /// drive eviction.
    pub fn new(node_id: NodeId, store: S, max_lineage_size: u64) -> Self {
        LineageCache {
            node_id,
            store,
            lineage: Lineage::new(),
            committed: HashSet::new(),
            subscribed: HashSet::new(),
            max_lineage_size,
            acked: Rc::new(RefCell::new(Vec::new())),
            logger: None,
        }
    }

    /// The identifier of the node this cache serves.
    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    /// Installs a logger for cache events.
    pub fn set_logger(&mut self, logger: Logger) {
        self.logger = Some(logger);
    }

    /// The current store of entries, for tests and diagnostics.
    pub fn get_lineage(&self) -> &Lineage {
        &self.lineage
    }

    /// Applies write acknowledgements delivered since the last operation.
    pub fn step(&mut self) {
        loop {
            let acked: Vec<TaskId> = self.acked.borrow_mut().drain(..).collect();
            if acked.is_empty() {
                break;
            }
            for task_id in acked {
                self.entry_committed(task_id);
            }
        }
    }

    /// Adds a locally submitted task along with the ancestry `carry` shipped
    /// with it.
    ///
    /// Records from `carry` enter the merge at remote status: their owners
    /// are elsewhere, and each newly learned ancestor gets a subscription so
    /// its eventual commit can evict it here. The task itself enters waiting.
    /// Returns true iff the task was not already known locally at waiting
    /// status or stronger.
    pub fn add_waiting_task(&mut self, task: Task, carry: Lineage) -> Result<bool, StoreError> {
        self.step();
        let task_id = task.id();
        let known = self
            .lineage
            .get_entry(task_id)
            .map(|entry| entry.status() >= GcsStatus::UncommittedWaiting)
            .unwrap_or(false);

        for entry in carry.into_entries() {
            let id = entry.id();
            let newly = self
                .lineage
                .set_entry(entry.into_task(), GcsStatus::UncommittedRemote);
            if newly && id != task_id {
                self.log(EntryEvent { task_id: id, status: GcsStatus::UncommittedRemote });
                self.request_notification(id)?;
            }
        }

        // If this node had forwarded the task out (or first saw it from a
        // peer), it is re-taking ownership; the remote owner's commit is no
        // longer what retires the entry.
        self.cancel_subscription(task_id);

        if self.lineage.set_entry(task, GcsStatus::UncommittedWaiting) {
            self.log(EntryEvent { task_id, status: GcsStatus::UncommittedWaiting });
        }
        self.subscribe_oversized_lineage(task_id)?;
        Ok(!known)
    }

    /// Marks a task as ready for writeback and runs the flush sweep.
    ///
    /// Promotes the entry to ready, inserting one if the task was never added
    /// as waiting. Returns true iff a transition occurred.
    pub fn add_ready_task(&mut self, task: &Task) -> Result<bool, StoreError> {
        self.step();
        let task_id = task.id();
        let transitioned = self
            .lineage
            .set_entry(task.clone(), GcsStatus::UncommittedReady);
        if transitioned {
            self.log(EntryEvent { task_id, status: GcsStatus::UncommittedReady });
        }
        self.flush()?;
        Ok(transitioned)
    }

    /// Relinquishes a waiting task that has been handed off to a peer.
    ///
    /// The entry stays in the cache, demoted to remote, so descendants still
    /// held locally can name it in their lineage; a subscription is opened so
    /// the new owner's commit retires it. Returns false if the task is absent
    /// or not waiting.
    pub fn remove_waiting_task(&mut self, task_id: TaskId) -> Result<bool, StoreError> {
        self.step();
        match self.lineage.get_entry(task_id) {
            Some(entry) if entry.status() == GcsStatus::UncommittedWaiting => {}
            _ => return Ok(false),
        }
        let mut entry = self.lineage.pop_entry(task_id).expect("entry just observed");
        entry.reset_status(GcsStatus::UncommittedRemote);
        self.lineage.restore_entry(entry);
        self.log(EntryEvent { task_id, status: GcsStatus::UncommittedRemote });
        self.request_notification(task_id)?;
        Ok(true)
    }

    /// Records that `node_id` holds the lineage of `task_id`.
    ///
    /// Subsequent ancestor queries with `node_id` as the stopping peer prune
    /// the subtree rooted at this task.
    ///
    /// # Panics
    ///
    /// Panics if the task is not in the cache; forwarding a task the cache
    /// does not hold is a caller-side logic error.
    pub fn mark_task_as_forwarded(&mut self, task_id: TaskId, node_id: NodeId) {
        self.step();
        self.lineage
            .get_entry_mut(task_id)
            .expect("forwarded task must be in the lineage cache")
            .mark_forwarded(node_id);
    }

    /// Collects the uncommitted ancestry of `task_id` for shipment to
    /// `stop_at_node`.
    ///
    /// Walks argument→parent edges from the task, skipping (and not
    /// descending past) any entry already forwarded to `stop_at_node`: that
    /// peer received the entry's whole subtree when the entry was shipped.
    /// The root entry itself is always included, forwarded or not; a task
    /// being re-forwarded still needs its own record.
    ///
    /// # Panics
    ///
    /// Panics if `task_id` is not in the cache; querying the lineage of an
    /// absent task is a caller-side logic error.
    pub fn get_uncommitted_lineage_or_die(&self, task_id: TaskId, stop_at_node: NodeId) -> Lineage {
        let mut result = Lineage::new();
        let mut stack = vec![task_id];
        let mut seen = HashSet::new();
        while let Some(id) = stack.pop() {
            if !seen.insert(id) {
                continue;
            }
            let Some(entry) = self.lineage.get_entry(id) else {
                continue;
            };
            let forwarded = entry.was_forwarded_to(stop_at_node);
            if forwarded && id != task_id {
                continue;
            }
            result.set_entry(entry.task().clone(), entry.status());
            if !forwarded {
                stack.extend(entry.parent_ids());
            }
        }
        assert!(
            result.contains(task_id),
            "task {:?} is not in the lineage cache",
            task_id,
        );
        result
    }

    /// Records that the metadata store has durably committed `task_id` and
    /// evicts whatever that commit releases.
    ///
    /// Invoked by the store's notification channel, and by [`step`] for this
    /// cache's own acknowledged writes. Deliveries may arrive in any order
    /// and may duplicate; repeats are no-ops.
    ///
    /// [`step`]: LineageCache::step
    pub fn handle_entry_committed(&mut self, task_id: TaskId) {
        self.step();
        self.entry_committed(task_id);
    }

    fn entry_committed(&mut self, task_id: TaskId) {
        self.cancel_subscription(task_id);
        if !self.lineage.contains(task_id) {
            // Already evicted; a duplicate or very late delivery.
            return;
        }
        if self.committed.insert(task_id) {
            self.log(CommitEvent { task_id });
        }
        self.evict_task(task_id);
        // An earlier sweep may have left a ready child behind a locally
        // owned parent that has since advanced past writeback; sweep again.
        // Writeback errors here have no originating caller; the affected
        // entries stay committing for a retry layer to re-ack.
        let _ = self.flush();
    }

    /// Evicts `task_id` if its commit is confirmed and every parent is gone,
    /// then re-examines its committed children.
    fn evict_task(&mut self, task_id: TaskId) {
        if !self.committed.contains(&task_id) {
            return;
        }
        let Some(entry) = self.lineage.get_entry(task_id) else {
            return;
        };
        if !matches!(
            entry.status(),
            GcsStatus::Committing | GcsStatus::UncommittedRemote
        ) {
            // A commit can be observed for a task this node has re-taken
            // ownership of; eviction waits for the local writeback.
            return;
        }
        if entry
            .parent_ids()
            .into_iter()
            .any(|parent| self.lineage.contains(parent))
        {
            return;
        }

        self.lineage.pop_entry(task_id);
        self.committed.remove(&task_id);
        self.log(EvictEvent { task_id });

        let children: Vec<TaskId> = self.lineage.get_children(task_id).collect();
        for child in children {
            self.evict_task(child);
        }
    }

    /// Writes back every ready entry that is no longer gated by a locally
    /// owned parent.
    fn flush(&mut self) -> Result<(), StoreError> {
        let flushable: Vec<TaskId> = self
            .lineage
            .entries()
            .filter(|entry| entry.status() == GcsStatus::UncommittedReady)
            .filter(|entry| self.parents_past_local_writeback(entry))
            .map(|entry| entry.id())
            .collect();
        for task_id in flushable {
            self.flush_task(task_id)?;
        }
        Ok(())
    }

    /// True iff no parent of `entry` is an entry this node still owns ahead
    /// of its own writeback. An absent parent is presumed committed; a
    /// committing, confirmed-committed, or remote parent never gates a
    /// write. Remote-status parents gate eviction only.
    fn parents_past_local_writeback(&self, entry: &LineageEntry) -> bool {
        entry
            .parent_ids()
            .into_iter()
            .all(|parent| match self.lineage.get_entry(parent) {
                None => true,
                Some(parent_entry) => !matches!(
                    parent_entry.status(),
                    GcsStatus::UncommittedWaiting | GcsStatus::UncommittedReady
                ),
            })
    }

    fn flush_task(&mut self, task_id: TaskId) -> Result<(), StoreError> {
        let payload = {
            let entry = self
                .lineage
                .get_entry_mut(task_id)
                .expect("flushable entry must be present");
            debug_assert_eq!(entry.status(), GcsStatus::UncommittedReady);
            let payload = bincode::serialize(entry.task()).expect("task serialization failed");
            // The entry moves to committing before the write is issued; on a
            // store error it stays there for a retry layer above the
            // interface to re-issue.
            entry.promote(GcsStatus::Committing);
            payload
        };
        self.log(EntryEvent { task_id, status: GcsStatus::Committing });
        self.log(FlushEvent { task_id });
        let inbox = Rc::clone(&self.acked);
        self.store.async_add(
            task_id,
            payload,
            Box::new(move |acked| inbox.borrow_mut().push(acked)),
        )?;
        Ok(())
    }

    /// Opens a subscription for `task_id` unless one is already open.
    fn request_notification(&mut self, task_id: TaskId) -> Result<(), StoreError> {
        if self.subscribed.insert(task_id) {
            if let Err(error) = self.store.subscribe(task_id) {
                self.subscribed.remove(&task_id);
                return Err(error);
            }
            self.log(SubscriptionEvent { task_id, subscribed: true });
        }
        Ok(())
    }

    /// Closes any open subscription for `task_id`.
    fn cancel_subscription(&mut self, task_id: TaskId) {
        if self.subscribed.remove(&task_id) {
            // Best-effort; a missed cancellation costs a duplicate delivery.
            let _ = self.store.unsubscribe(task_id);
            self.log(SubscriptionEvent { task_id, subscribed: false });
        }
    }

    /// Subscribes to the remote ancestors of `task_id` when its uncommitted
    /// ancestry has outgrown `max_lineage_size`, so that remote commits will
    /// eventually drive the subtree back under the bound. Entries are never
    /// dropped to meet the bound.
    fn subscribe_oversized_lineage(&mut self, task_id: TaskId) -> Result<(), StoreError> {
        let mut members = Vec::new();
        let mut stack = vec![task_id];
        let mut seen = HashSet::new();
        while let Some(id) = stack.pop() {
            if !seen.insert(id) {
                continue;
            }
            if let Some(entry) = self.lineage.get_entry(id) {
                members.push(id);
                stack.extend(entry.parent_ids());
            }
        }
        if members.len() as u64 <= self.max_lineage_size {
            return Ok(());
        }
        let unsubscribed: Vec<TaskId> = members
            .into_iter()
            .filter(|id| {
                self.lineage
                    .get_entry(*id)
                    .map(|entry| entry.status() == GcsStatus::UncommittedRemote)
                    .unwrap_or(false)
                    && !self.subscribed.contains(id)
            })
            .collect();
        for id in unsubscribed {
            self.request_notification(id)?;
        }
        Ok(())
    }

    fn log<E: Into<LineageEvent>>(&self, event: E) {
        if let Some(logger) = self.logger.as_ref() {
            logger.log(event);
        }
    }
}
