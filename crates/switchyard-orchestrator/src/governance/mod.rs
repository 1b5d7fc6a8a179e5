//! The two governance checkpoints of a task.
//!
//! Both are pure functions over static policy: routing governance runs once per
//! plan before anything is dispatched, output governance runs on every result a
//! dispatched agent returns. Neither raises errors for policy failures; they return
//! verdicts that the driver turns into lifecycle transitions.

/// Schema and business-rule checks on agent output.
pub mod output;
/// Plan risk scoring and the auto-approval decision.
pub mod routing;
