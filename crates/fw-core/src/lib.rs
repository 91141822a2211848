pub mod checkpoint;
pub mod config;
pub mod db;
pub mod event_log;
pub mod incremental;
pub mod invariants;
pub mod summary;
pub mod tree;
pub mod types;
