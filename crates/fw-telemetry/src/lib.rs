//! Logging initialisation and operation spans shared by the foldwise crates.

pub mod logging;
pub mod tracing_setup;
