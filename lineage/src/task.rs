//! The task value type.

use lineage_ids::{ObjectId, TaskId};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

/// An immutable description of a unit of work.
///
/// A task names the object identifiers it consumes as arguments and the number
/// of values it returns. Return object identifiers are not stored; they are
/// computed from the task's identifier and the return index, which is also how
/// argument objects are resolved back to the tasks that produce them.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Task {
    id: TaskId,
    arguments: SmallVec<[ObjectId; 2]>,
    num_returns: u64,
}

impl Task {
    /// Constructs a task from its identifier, arguments, and return count.
    ///
    /// # Examples
    ///
    /// ```
    /// use lineage::Task;
    /// use lineage_ids::TaskId;
    ///
    /// let parent = Task::new(TaskId::from_bytes([1; 16]), vec![], 1);
    /// let child = Task::new(TaskId::from_bytes([2; 16]), vec![parent.return_id(0)], 1);
    /// assert_eq!(child.parent_ids(), vec![parent.id()]);
    /// ```
    pub fn new<I: IntoIterator<Item = ObjectId>>(id: TaskId, arguments: I, num_returns: u64) -> Self {
        Task {
            id,
            arguments: arguments.into_iter().collect(),
            num_returns,
        }
    }

    /// The task's identifier.
    pub fn id(&self) -> TaskId {
        self.id
    }

    /// The object identifiers the task consumes.
    pub fn arguments(&self) -> &[ObjectId] {
        &self.arguments
    }

    /// The number of values the task returns.
    pub fn num_returns(&self) -> u64 {
        self.num_returns
    }

    /// The identifier of the `index`-th value the task returns.
    pub fn return_id(&self, index: u64) -> ObjectId {
        debug_assert!(index < self.num_returns);
        ObjectId::for_return(self.id, index)
    }

    /// The identifiers of the tasks producing this task's arguments.
    ///
    /// Deduplicated, in order of first appearance among the arguments.
    pub fn parent_ids(&self) -> Vec<TaskId> {
        let mut parents = Vec::with_capacity(self.arguments.len());
        for argument in self.arguments.iter() {
            let parent = argument.task_id();
            if !parents.contains(&parent) {
                parents.push(parent);
            }
        }
        parents
    }
}

#[cfg(test)]
mod tests {
    use super::Task;
    use lineage_ids::TaskId;

    #[test]
    fn parents_deduplicate() {
        let parent = Task::new(TaskId::from_random(), vec![], 2);
        let child = Task::new(
            TaskId::from_random(),
            vec![parent.return_id(0), parent.return_id(1)],
            1,
        );
        assert_eq!(child.parent_ids(), vec![parent.id()]);
    }

    #[test]
    fn no_arguments_no_parents() {
        let task = Task::new(TaskId::from_random(), vec![], 1);
        assert!(task.parent_ids().is_empty());
    }
}
