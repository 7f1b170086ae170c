//! Live sync
//!
//! Raw watcher notifications are coalesced into logical operations
//! ([`EventFold`]), processed strictly in order by a single worker
//! ([`EventScheduler`]) and applied to the sibling replicas
//! ([`LiveSyncExecutor`]).

mod events;
mod fold;
mod live;
mod runtime;
mod scheduler;

pub use events::{ItemKind, LogicalOp, RawEvent};
pub use fold::EventFold;
pub use live::{LiveOutcome, LiveSyncExecutor};
pub use runtime::{EventConverter, LiveSync, ReplicaWatcher};
pub use scheduler::{EventScheduler, OpSink};
