//! Integration tests for syncfold

mod common;
mod failure_isolation;
mod identity;
mod live_sync;
mod manual_sync;
mod order_independence;
