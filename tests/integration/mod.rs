//! Integration test suite for maestro.
//!
//! These tests exercise the full pipeline from task submission to a
//! terminal report: decomposition, dispatch, supervised execution,
//! consensus arbitration, cancellation, and snapshot recovery.
//!
//! # Test Categories
//!
//! - `pipeline_e2e`: Full pipeline runs across the three strategies
//! - `parallel_agents`: Parallel execution, retries, and load invariants
//! - `consensus_modes`: Competitive coordination and rejection paths
//! - `cancellation`: Cancel and deadline propagation
//! - `recovery`: Snapshot persistence and resume
//!
//! # CI Compatibility
//!
//! All agents are in-process mock executors; no external services are
//! involved, making the suite safe to run in CI environments.

mod fixtures;

mod cancellation;
mod consensus_modes;
mod parallel_agents;
mod pipeline_e2e;
mod recovery;
