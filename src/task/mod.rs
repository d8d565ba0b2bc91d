//! Task lifecycle: identifiers, records, and the state machine that
//! guards transitions between lifecycle states.

pub mod state;
pub mod types;

pub use state::{StateHistoryEntry, TaskLifecycle};
pub use types::{Strategy, Task, TaskId, TaskPriority, TaskSpec, TaskState};
