//! Syncfold: Multi-Replica Folder Synchronization
//!
//! Keeps N copies of a folder in agreement. A manual sync diffs every replica
//! against its last snapshot, folds the replicas into one decision table and
//! applies it; live sync coalesces watcher events and replays them on the
//! other replicas.

pub mod cli;
pub mod config;
pub mod diff;
pub mod error;
pub mod executor;
pub mod logging;
pub mod ops;
pub mod progress;
pub mod session;
pub mod snapshot;
pub mod tree;
pub mod types;
pub mod watch;
