//! Fixed-width opaque identifiers for tasks, objects, and peer nodes.
//!
//! All three identifier types are byte strings with equality and hashing, and
//! no further structure visible to their users, with one exception: an
//! [`ObjectId`] deterministically encodes the [`TaskId`] of the task that
//! produces it, so holders of an object identifier can always name the task
//! to re-execute without a side table.

#![forbid(missing_docs)]

use std::fmt;

use byteorder::{ByteOrder, LittleEndian};
use serde::{Deserialize, Serialize};

/// The number of bytes in a `TaskId` or `NodeId`.
pub const ID_BYTES: usize = 16;

/// The number of bytes in an `ObjectId`: a producing task plus a return index.
pub const OBJECT_ID_BYTES: usize = ID_BYTES + 8;

macro_rules! opaque_id {
    ($(#[$attr:meta])* $name:ident, $bytes:expr) => {
        $(#[$attr])*
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name([u8; $bytes]);

        impl $name {
            /// Wraps raw bytes as an identifier.
            pub fn from_bytes(bytes: [u8; $bytes]) -> Self {
                $name(bytes)
            }

            /// The identifier's bytes.
            pub fn as_bytes(&self) -> &[u8; $bytes] {
                &self.0
            }

            /// The all-zeroes identifier, used where "no id" must be expressible.
            pub fn nil() -> Self {
                $name([0; $bytes])
            }

            /// True iff this is the all-zeroes identifier.
            pub fn is_nil(&self) -> bool {
                self.0.iter().all(|byte| *byte == 0)
            }

            /// A uniformly random identifier.
            #[cfg(feature = "rand")]
            pub fn from_random() -> Self {
                $name(rand::random())
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
                write!(fmt, concat!(stringify!($name), "("))?;
                for byte in self.0.iter() {
                    write!(fmt, "{:02x}", byte)?;
                }
                write!(fmt, ")")
            }
        }
    };
}

opaque_id!(
    /// Identifies a task.
    TaskId, ID_BYTES
);

opaque_id!(
    /// Identifies a peer node.
    NodeId, ID_BYTES
);

opaque_id!(
    /// Identifies a task-produced value.
    ///
    /// The first [`ID_BYTES`] bytes are the producing task's identifier and the
    /// trailing eight bytes are the little-endian return index, so the
    /// producing task is recoverable with [`ObjectId::task_id`].
    ObjectId, OBJECT_ID_BYTES
);

impl ObjectId {
    /// The identifier of the `index`-th return value of task `task_id`.
    ///
    /// # Examples
    ///
    /// ```
    /// use lineage_ids::{ObjectId, TaskId};
    ///
    /// let task = TaskId::from_bytes([7; 16]);
    /// let object = ObjectId::for_return(task, 2);
    /// assert_eq!(object.task_id(), task);
    /// assert_eq!(object.return_index(), 2);
    /// ```
    pub fn for_return(task_id: TaskId, index: u64) -> Self {
        let mut bytes = [0; OBJECT_ID_BYTES];
        bytes[..ID_BYTES].copy_from_slice(task_id.as_bytes());
        LittleEndian::write_u64(&mut bytes[ID_BYTES..], index);
        ObjectId(bytes)
    }

    /// The identifier of the task that produces this object.
    pub fn task_id(&self) -> TaskId {
        let mut bytes = [0; ID_BYTES];
        bytes.copy_from_slice(&self.0[..ID_BYTES]);
        TaskId::from_bytes(bytes)
    }

    /// The return index of this object within its producing task.
    pub fn return_index(&self) -> u64 {
        LittleEndian::read_u64(&self.0[ID_BYTES..])
    }
}
