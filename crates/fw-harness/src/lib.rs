//! Harness: the collaborators a reconciliation attempt talks to.
//!
//! - a key/value + list store with optimistic transactions ([`kv`])
//! - the per-user single-flight admission gate and the task queue built on it
//! - the fixed capability set the policy executor may invoke, with tracing
//!   and a per-round step ceiling
//! - the policy executor seam, with scripted and rule-based implementations
//! - cooperative shutdown for the worker pool

pub mod admission;
pub mod capabilities;
pub mod kv;
pub mod policy;
pub mod queue;
pub mod shutdown;
