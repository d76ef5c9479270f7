//! Cache entries and their lifecycle status.

use std::collections::HashSet;

use lineage_ids::{NodeId, TaskId};
use serde::{Deserialize, Serialize};

use crate::task::Task;

/// The lifecycle status of a cache entry.
///
/// Declaration order is merge precedence: a weaker (earlier) status never
/// overwrites a stronger one, so merging two views of the same entry is `max`
/// over this order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum GcsStatus {
    /// Supplied by a peer; the local node awaits the remote owner's commit.
    UncommittedRemote,
    /// Added locally; not yet executable because arguments are still pending.
    UncommittedWaiting,
    /// Added locally; executable and eligible for writeback.
    UncommittedReady,
    /// Writeback in flight to the metadata store, not yet acknowledged.
    Committing,
}

impl GcsStatus {
    /// The wire encoding of the status.
    pub(crate) fn as_byte(self) -> u8 {
        match self {
            GcsStatus::UncommittedRemote => 0,
            GcsStatus::UncommittedWaiting => 1,
            GcsStatus::UncommittedReady => 2,
            GcsStatus::Committing => 3,
        }
    }

    /// Decodes a wire status byte.
    pub(crate) fn from_byte(byte: u8) -> Option<GcsStatus> {
        match byte {
            0 => Some(GcsStatus::UncommittedRemote),
            1 => Some(GcsStatus::UncommittedWaiting),
            2 => Some(GcsStatus::UncommittedReady),
            3 => Some(GcsStatus::Committing),
            _ => None,
        }
    }
}

/// A task in the cache, together with its status and the peers that already
/// hold its lineage.
#[derive(Clone, Debug)]
pub struct LineageEntry {
    task: Task,
    status: GcsStatus,
    forwarded_to: HashSet<NodeId>,
}

impl LineageEntry {
    /// Wraps a task as a cache entry at the given status.
    pub fn new(task: Task, status: GcsStatus) -> Self {
        LineageEntry {
            task,
            status,
            forwarded_to: HashSet::new(),
        }
    }

    /// The entry's task. Immutable for the life of the entry.
    pub fn task(&self) -> &Task {
        &self.task
    }

    /// Consumes the entry, yielding its task.
    pub fn into_task(self) -> Task {
        self.task
    }

    /// The entry's task identifier.
    pub fn id(&self) -> TaskId {
        self.task.id()
    }

    /// The entry's current status.
    pub fn status(&self) -> GcsStatus {
        self.status
    }

    /// The identifiers of the tasks producing this entry's arguments.
    pub fn parent_ids(&self) -> Vec<TaskId> {
        self.task.parent_ids()
    }

    /// Raises the status to `status` if it is stronger than the present one.
    ///
    /// Returns true iff the status changed.
    pub(crate) fn promote(&mut self, status: GcsStatus) -> bool {
        if status > self.status {
            self.status = status;
            true
        } else {
            false
        }
    }

    /// Overwrites the status unconditionally.
    ///
    /// The one legal downgrade: a waiting task handed off to a peer becomes
    /// remote again.
    pub(crate) fn reset_status(&mut self, status: GcsStatus) {
        self.status = status;
    }

    /// True iff `node` is already known to hold this entry's lineage.
    pub fn was_forwarded_to(&self, node: NodeId) -> bool {
        self.forwarded_to.contains(&node)
    }

    /// Records that `node` holds this entry's lineage.
    pub(crate) fn mark_forwarded(&mut self, node: NodeId) {
        self.forwarded_to.insert(node);
    }

    /// The peers known to hold this entry's lineage.
    pub fn forwarded_to(&self) -> &HashSet<NodeId> {
        &self.forwarded_to
    }
}

#[cfg(test)]
mod tests {
    use super::{GcsStatus, LineageEntry};
    use crate::task::Task;
    use lineage_ids::{NodeId, TaskId};

    #[test]
    fn status_order_is_merge_precedence() {
        assert!(GcsStatus::UncommittedRemote < GcsStatus::UncommittedWaiting);
        assert!(GcsStatus::UncommittedWaiting < GcsStatus::UncommittedReady);
        assert!(GcsStatus::UncommittedReady < GcsStatus::Committing);
    }

    #[test]
    fn status_bytes_round_trip() {
        for status in [
            GcsStatus::UncommittedRemote,
            GcsStatus::UncommittedWaiting,
            GcsStatus::UncommittedReady,
            GcsStatus::Committing,
        ] {
            assert_eq!(GcsStatus::from_byte(status.as_byte()), Some(status));
        }
        assert_eq!(GcsStatus::from_byte(4), None);
    }

    #[test]
    fn promote_refuses_downgrades() {
        let task = Task::new(TaskId::from_random(), vec![], 1);
        let mut entry = LineageEntry::new(task, GcsStatus::UncommittedReady);
        assert!(!entry.promote(GcsStatus::UncommittedRemote));
        assert!(!entry.promote(GcsStatus::UncommittedReady));
        assert_eq!(entry.status(), GcsStatus::UncommittedReady);
        assert!(entry.promote(GcsStatus::Committing));
        assert_eq!(entry.status(), GcsStatus::Committing);
    }

    #[test]
    fn forwarding_is_recorded_per_peer() {
        let task = Task::new(TaskId::from_random(), vec![], 1);
        let mut entry = LineageEntry::new(task, GcsStatus::UncommittedWaiting);
        let peer = NodeId::from_random();
        assert!(!entry.was_forwarded_to(peer));
        entry.mark_forwarded(peer);
        assert!(entry.was_forwarded_to(peer));
        assert!(!entry.was_forwarded_to(NodeId::nil()));
    }
}
