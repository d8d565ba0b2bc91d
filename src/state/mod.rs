//! Durable task state.
//!
//! Snapshots capture a task's last committed state (DAG topology plus
//! accepted consensus decisions) so an in-flight task can be reconstructed
//! after a restart.

pub mod store;

pub use store::{SnapshotStore, TaskSnapshot};
