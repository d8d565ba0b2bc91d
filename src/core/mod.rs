//! Core execution data structures.
//!
//! This module contains the subtask data model and the dependency DAG
//! that drives scheduling.

pub mod dag;
pub mod subtask;

pub use dag::{DependencyKind, SubtaskDag};
pub use subtask::{CoordinationMode, Subtask, SubtaskId, SubtaskStatus};
