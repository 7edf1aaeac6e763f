//! Per-descriptor worker loops.
//!
//! A [`stream::StreamWorker`] re-uploads one file on a fixed interval; a
//! [`backup::BackupWorker`] periodically uploads the first file matching a
//! pattern and can delete it afterwards.  Workers share nothing but a
//! [`WorkerContext`], and each one opens its own client handle.

use std::sync::Arc;

use crate::clock::Clock;
use crate::config::StoreConfig;
use crate::storage::Connect;

pub mod backup;
pub mod stream;

pub use backup::{BackupOutcome, BackupWorker};
pub use stream::{PushOutcome, StreamWorker};

/// Everything a worker needs besides its own descriptor.
#[derive(Clone)]
pub struct WorkerContext {
    /// Produces a fresh client handle per worker.
    pub connector: Arc<dyn Connect>,
    /// Target bucket.
    pub bucket: String,
    /// Prefix prepended to every object key.
    pub key_prefix: Option<String>,
    /// Bounded attempts per connect round.
    pub connect_attempts: u32,
    /// Source of upload instants.
    pub clock: Arc<dyn Clock>,
}

impl WorkerContext {
    pub fn new(store: &StoreConfig, connector: Arc<dyn Connect>, clock: Arc<dyn Clock>) -> Self {
        Self {
            connector,
            bucket: store.bucket.clone(),
            key_prefix: store.key_prefix.clone(),
            connect_attempts: store.connect_attempts,
            clock,
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::clock::ManualClock;
    use crate::storage::memory::{MemoryConnector, MemoryStore};
    use chrono::{TimeZone, Utc};

    pub const BUCKET: &str = "logs";

    /// Context over an in-memory store, with a clock pinned to
    /// 2024-01-01 07:30 UTC.
    pub fn memory_context(
        connector: MemoryConnector,
    ) -> (WorkerContext, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 1, 1, 7, 30, 0).unwrap(),
        ));
        let ctx = WorkerContext {
            connector: Arc::new(connector),
            bucket: BUCKET.to_string(),
            key_prefix: None,
            connect_attempts: 5,
            clock: clock.clone(),
        };
        (ctx, clock)
    }

    pub fn ready_context(store: &MemoryStore) -> (WorkerContext, Arc<ManualClock>) {
        memory_context(MemoryConnector::new(store.clone()))
    }
}
