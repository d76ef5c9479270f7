//! A keyed store of lineage entries with a parent→children reverse index,
//! and the ancestor-bundle wire codec used when tasks are forwarded.

use std::collections::{HashMap, HashSet};
use std::io::Read;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use lineage_ids::{TaskId, ID_BYTES};
use thiserror::Error;

use crate::entry::{GcsStatus, LineageEntry};
use crate::task::Task;

/// A malformed ancestor bundle.
#[derive(Debug, Error)]
pub enum CodecError {
    /// The bundle ended before the announced records did.
    #[error("ancestor bundle truncated")]
    Truncated,
    /// A record carried a status byte outside the legal range.
    #[error("invalid status byte {0}")]
    InvalidStatus(u8),
    /// A task record failed to decode.
    #[error("malformed task record: {0}")]
    Task(#[from] bincode::Error),
}

/// A collection of lineage entries keyed by task identifier.
///
/// Alongside the entries themselves the store maintains a reverse index from
/// each parent task to the tasks consuming its returns. Edges are derived
/// exclusively from task arguments. The index may name parents whose entries
/// are no longer present: a popped task's own bucket survives it, recording
/// ancestry still claimed by uncommitted descendants.
#[derive(Debug, Default)]
pub struct Lineage {
    entries: HashMap<TaskId, LineageEntry>,
    children: HashMap<TaskId, HashSet<TaskId>>,
}

impl Lineage {
    /// Creates an empty store.
    pub fn new() -> Self {
        Lineage::default()
    }

    /// Inserts `task` at `status`, or promotes the present entry.
    ///
    /// A weaker status never overwrites a stronger one; the merge is `max`
    /// over the [`GcsStatus`] order. Parent→child edges are recorded only
    /// when the entry is genuinely new. Returns true iff the entry was newly
    /// inserted or its status changed.
    ///
    /// # Examples
    ///
    /// ```
    /// use lineage::{GcsStatus, Lineage, Task};
    /// use lineage_ids::TaskId;
    ///
    /// let task = Task::new(TaskId::from_bytes([1; 16]), vec![], 1);
    /// let mut lineage = Lineage::new();
    /// assert!(lineage.set_entry(task.clone(), GcsStatus::UncommittedRemote));
    /// assert!(lineage.set_entry(task.clone(), GcsStatus::UncommittedWaiting));
    /// // A downgrade is discarded.
    /// assert!(!lineage.set_entry(task, GcsStatus::UncommittedRemote));
    /// ```
    pub fn set_entry(&mut self, task: Task, status: GcsStatus) -> bool {
        let id = task.id();
        if let Some(entry) = self.entries.get_mut(&id) {
            entry.promote(status)
        } else {
            for parent in task.parent_ids() {
                self.children.entry(parent).or_default().insert(id);
            }
            self.entries.insert(id, LineageEntry::new(task, status));
            true
        }
    }

    /// Looks up the entry for `id`.
    pub fn get_entry(&self, id: TaskId) -> Option<&LineageEntry> {
        self.entries.get(&id)
    }

    /// Mutable lookup, for callers within the crate that adjust an entry in
    /// place.
    pub(crate) fn get_entry_mut(&mut self, id: TaskId) -> Option<&mut LineageEntry> {
        self.entries.get_mut(&id)
    }

    /// Removes and returns the entry for `id`.
    ///
    /// The popped task is unlinked from each of its parents' child buckets
    /// (buckets are dropped once empty), but its own bucket is kept: entries
    /// that consume the popped task's returns still claim it as ancestry.
    pub fn pop_entry(&mut self, id: TaskId) -> Option<LineageEntry> {
        let entry = self.entries.remove(&id)?;
        for parent in entry.parent_ids() {
            if let Some(children) = self.children.get_mut(&parent) {
                children.remove(&id);
                if children.is_empty() {
                    self.children.remove(&parent);
                }
            }
        }
        Some(entry)
    }

    /// Re-inserts an entry previously removed with [`pop_entry`](Self::pop_entry),
    /// re-recording its parent edges.
    pub(crate) fn restore_entry(&mut self, entry: LineageEntry) {
        let id = entry.id();
        debug_assert!(!self.entries.contains_key(&id));
        for parent in entry.parent_ids() {
            self.children.entry(parent).or_default().insert(id);
        }
        self.entries.insert(id, entry);
    }

    /// The tasks that consume returns of `parent`.
    pub fn get_children(&self, parent: TaskId) -> impl Iterator<Item = TaskId> + '_ {
        self.children.get(&parent).into_iter().flatten().copied()
    }

    /// All entries, in no particular order.
    pub fn entries(&self) -> impl Iterator<Item = &LineageEntry> {
        self.entries.values()
    }

    /// Consumes the store, yielding its entries.
    pub fn into_entries(self) -> impl Iterator<Item = LineageEntry> {
        self.entries.into_values()
    }

    /// True iff an entry for `id` is present.
    pub fn contains(&self, id: TaskId) -> bool {
        self.entries.contains_key(&id)
    }

    /// The number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True iff there are no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The number of parents with recorded children, dangling parents
    /// included.
    pub fn children_len(&self) -> usize {
        self.children.len()
    }

    /// Serializes the entry for `root` and every present ancestor reachable
    /// from it by argument→parent edges.
    ///
    /// The layout is the root identifier, a record count, and one
    /// length-prefixed task record with a trailing status byte per entry, in
    /// unspecified order.
    pub fn serialize_subset(&self, root: TaskId) -> Vec<u8> {
        let mut members = Vec::new();
        let mut stack = vec![root];
        let mut seen = HashSet::new();
        while let Some(id) = stack.pop() {
            if !seen.insert(id) {
                continue;
            }
            if let Some(entry) = self.entries.get(&id) {
                members.push(entry);
                stack.extend(entry.parent_ids());
            }
        }

        let mut bytes = Vec::new();
        bytes.extend_from_slice(root.as_bytes());
        bytes
            .write_u64::<LittleEndian>(members.len() as u64)
            .expect("write to Vec failed");
        for entry in members {
            let record = bincode::serialize(entry.task()).expect("task serialization failed");
            bytes
                .write_u32::<LittleEndian>(record.len() as u32)
                .expect("write to Vec failed");
            bytes.extend_from_slice(&record);
            bytes.push(entry.status().as_byte());
        }
        bytes
    }

    /// Decodes an ancestor bundle, merging each record with
    /// [`set_entry`](Self::set_entry), and returns the bundle's root
    /// identifier.
    ///
    /// Merging a bundle a second time changes nothing: records that are
    /// already present at an equal or stronger status are discarded.
    pub fn deserialize_and_merge(&mut self, bytes: &[u8]) -> Result<TaskId, CodecError> {
        let mut cursor = bytes;
        let mut root_bytes = [0u8; ID_BYTES];
        cursor
            .read_exact(&mut root_bytes)
            .map_err(|_| CodecError::Truncated)?;
        let root = TaskId::from_bytes(root_bytes);
        let count = cursor
            .read_u64::<LittleEndian>()
            .map_err(|_| CodecError::Truncated)?;
        for _ in 0..count {
            let length = cursor
                .read_u32::<LittleEndian>()
                .map_err(|_| CodecError::Truncated)? as usize;
            if cursor.len() <= length {
                return Err(CodecError::Truncated);
            }
            let (record, rest) = cursor.split_at(length);
            let task: Task = bincode::deserialize(record)?;
            let status =
                GcsStatus::from_byte(rest[0]).ok_or(CodecError::InvalidStatus(rest[0]))?;
            cursor = &rest[1..];
            self.set_entry(task, status);
        }
        Ok(root)
    }
}

#[cfg(test)]
mod tests {
    use super::Lineage;
    use crate::entry::GcsStatus;
    use crate::task::Task;
    use lineage_ids::TaskId;

    fn chain(length: usize) -> Vec<Task> {
        let mut tasks: Vec<Task> = Vec::new();
        for _ in 0..length {
            let arguments = tasks.last().map(|task| task.return_id(0)).into_iter();
            tasks.push(Task::new(TaskId::from_random(), arguments, 1));
        }
        tasks
    }

    #[test]
    fn new_entries_record_edges() {
        let tasks = chain(2);
        let mut lineage = Lineage::new();
        for task in tasks.iter() {
            assert!(lineage.set_entry(task.clone(), GcsStatus::UncommittedWaiting));
        }
        let children: Vec<_> = lineage.get_children(tasks[0].id()).collect();
        assert_eq!(children, vec![tasks[1].id()]);
    }

    #[test]
    fn pop_keeps_own_bucket_and_unlinks_parents() {
        let tasks = chain(3);
        let mut lineage = Lineage::new();
        for task in tasks.iter() {
            lineage.set_entry(task.clone(), GcsStatus::UncommittedWaiting);
        }

        // Popping the middle task unlinks it from its parent's bucket but the
        // bucket naming it as a parent survives for the still-present child.
        lineage.pop_entry(tasks[1].id());
        assert_eq!(lineage.get_children(tasks[0].id()).count(), 0);
        let children: Vec<_> = lineage.get_children(tasks[1].id()).collect();
        assert_eq!(children, vec![tasks[2].id()]);
        assert_eq!(lineage.children_len(), 1);
    }

    #[test]
    fn subset_covers_present_ancestors_only() {
        let tasks = chain(3);
        let mut lineage = Lineage::new();
        for task in tasks.iter() {
            lineage.set_entry(task.clone(), GcsStatus::UncommittedWaiting);
        }
        lineage.pop_entry(tasks[0].id());

        let bytes = lineage.serialize_subset(tasks[2].id());
        let mut merged = Lineage::new();
        let root = merged.deserialize_and_merge(&bytes).expect("valid bundle");
        assert_eq!(root, tasks[2].id());
        assert_eq!(merged.len(), 2);
        assert!(merged.get_entry(tasks[0].id()).is_none());
    }

    #[test]
    fn merge_is_idempotent() {
        let tasks = chain(4);
        let mut lineage = Lineage::new();
        for task in tasks.iter() {
            lineage.set_entry(task.clone(), GcsStatus::UncommittedWaiting);
        }
        let bytes = lineage.serialize_subset(tasks[3].id());
        let statuses: Vec<_> = tasks
            .iter()
            .map(|task| lineage.get_entry(task.id()).expect("present").status())
            .collect();

        lineage.deserialize_and_merge(&bytes).expect("valid bundle");
        assert_eq!(lineage.len(), tasks.len());
        for (task, status) in tasks.iter().zip(statuses) {
            assert_eq!(lineage.get_entry(task.id()).expect("present").status(), status);
        }
    }

    #[test]
    fn merge_keeps_stronger_status() {
        let task = Task::new(TaskId::from_random(), vec![], 1);
        let mut sender = Lineage::new();
        sender.set_entry(task.clone(), GcsStatus::UncommittedRemote);
        let bytes = sender.serialize_subset(task.id());

        let mut receiver = Lineage::new();
        receiver.set_entry(task.clone(), GcsStatus::Committing);
        receiver.deserialize_and_merge(&bytes).expect("valid bundle");
        assert_eq!(
            receiver.get_entry(task.id()).expect("present").status(),
            GcsStatus::Committing
        );
    }

    #[test]
    fn truncated_bundles_are_rejected() {
        let tasks = chain(2);
        let mut lineage = Lineage::new();
        for task in tasks.iter() {
            lineage.set_entry(task.clone(), GcsStatus::UncommittedWaiting);
        }
        let bytes = lineage.serialize_subset(tasks[1].id());
        let mut merged = Lineage::new();
        assert!(merged.deserialize_and_merge(&bytes[..bytes.len() - 1]).is_err());
    }
}
