//! Background reconciliation for foldwise trees.
//!
//! - `reconciler`: plans, executes, validates and commits one attempt
//! - `worker`: pool draining the admission queue
//! - `daemon`: wiring and the `request_reconciliation` entry point
//! - `notify`: end-of-attempt notification sinks

pub mod brief;
pub mod daemon;
pub mod notify;
pub mod plan;
pub mod reconciler;
pub mod state_machine;
pub mod worker;
