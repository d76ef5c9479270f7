//! A lineage cache for a worker node in a distributed task executor.
//!
//! Nodes submit tasks and forward them among peers. Until the cluster
//! metadata store acknowledges that a task's record is durable, the node that
//! holds the task keeps it, together with its transitive ancestors, in this
//! cache: if a remote node fails, the caller still holds enough lineage to
//! re-execute the whole dependency chain. Once a task is committed and every
//! descendant of it has also been committed, the cache evicts it, ancestors
//! strictly before descendants.
//!
//! The code is organized in modules that depend as little as possible on each
//! other.
//!
//! **Identifiers**: the [`lineage_ids`] crate defines the opaque fixed-width
//! task, object, and node identifiers; an object identifier encodes the task
//! that produces it, which is how ancestry edges are derived.
//!
//! **Storage**: the [`lineage`](crate::lineage) module defines the keyed
//! entry store with its parent→children index, and the ancestor-bundle codec
//! used when tasks are forwarded.
//!
//! **The store contract**: the [`gcs`] module defines the asynchronous write
//! and publish/subscribe interface the cache consumes, and an in-process
//! store for tests.
//!
//! **The cache**: the [`cache`] module drives the per-entry state machine:
//! writeback of ready tasks, commit handling, and topological eviction.
//!
//! # Examples
//!
//! The following walks a three-task chain through writeback and eviction.
//!
//! ```
//! use lineage::{Lineage, LineageCache, MemoryStore, Task};
//! use lineage_ids::{NodeId, TaskId};
//!
//! let store = MemoryStore::new();
//! let mut cache = LineageCache::new(NodeId::nil(), store.clone(), 10);
//!
//! // a <- b <- c, linked through argument objects.
//! let a = Task::new(TaskId::from_bytes([1; 16]), vec![], 1);
//! let b = Task::new(TaskId::from_bytes([2; 16]), vec![a.return_id(0)], 1);
//! let c = Task::new(TaskId::from_bytes([3; 16]), vec![b.return_id(0)], 1);
//! for task in [&a, &b, &c] {
//!     cache.add_waiting_task(task.clone(), Lineage::new()).unwrap();
//! }
//!
//! // Only ready tasks are written back.
//! cache.add_ready_task(&a).unwrap();
//! assert_eq!(store.table_len(), 1);
//!
//! // Commits evict ancestors first, however they arrive.
//! cache.add_ready_task(&b).unwrap();
//! cache.add_ready_task(&c).unwrap();
//! cache.handle_entry_committed(c.id());
//! cache.handle_entry_committed(b.id());
//! cache.handle_entry_committed(a.id());
//! assert!(cache.get_lineage().is_empty());
//! ```

#![forbid(missing_docs)]

pub mod cache;
pub mod entry;
pub mod gcs;
pub mod lineage;
pub mod logging;
pub mod task;

pub use crate::cache::LineageCache;
pub use crate::entry::{GcsStatus, LineageEntry};
pub use crate::gcs::{MemoryStore, MetadataStore, StoreError};
pub use crate::lineage::{CodecError, Lineage};
pub use crate::task::Task;
