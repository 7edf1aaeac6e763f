//! Connection establishment with retry.
//!
//! Three layers, each wrapping the one below:
//!
//! 1. [`connect`] makes up to `attempts` construction attempts back to back
//!    and reports [`SidecarError::StoreUnavailable`] if none succeeds.
//! 2. [`connect_with_backoff`] repeats [`connect`] forever, sleeping a fixed
//!    interval between rounds, until it gets a handle or is cancelled.
//! 3. [`establish`] adds [`ensure_bucket`] on top, so a worker comes out
//!    holding a handle whose bucket is known to exist.

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::errors::SidecarError;
use crate::metrics;
use crate::storage::{Connect, ObjectStore};

/// Make up to `attempts` connection attempts.
///
/// Each failure is logged at error level.  On success after `n` attempts,
/// exactly `n - 1` failures have been logged.
pub async fn connect(
    connector: &dyn Connect,
    attempts: u32,
) -> Result<Box<dyn ObjectStore>, SidecarError> {
    let attempts = attempts.max(1);
    let mut last = String::new();
    for attempt in 1..=attempts {
        match connector.connect().await {
            Ok(store) => return Ok(store),
            Err(e) => {
                metrics::record_connect_failure();
                error!(
                    "Exception while getting client for {} (attempt {}/{}): {:#}",
                    connector.endpoint(),
                    attempt,
                    attempts,
                    e
                );
                last = format!("{e:#}");
            }
        }
    }
    Err(SidecarError::StoreUnavailable { attempts, last })
}

/// Connect, retrying every `interval` until a handle is obtained.
///
/// Returns `None` only when `cancel` fires first.
pub async fn connect_with_backoff(
    connector: &dyn Connect,
    attempts: u32,
    interval: Duration,
    cancel: &CancellationToken,
) -> Option<Box<dyn ObjectStore>> {
    loop {
        if cancel.is_cancelled() {
            return None;
        }
        match connect(connector, attempts).await {
            Ok(store) => return Some(store),
            Err(e) => {
                warn!("{}; retrying in {:?}", e, interval);
            }
        }
        if !sleep_or_cancel(interval, cancel).await {
            return None;
        }
    }
}

/// Make sure `bucket` exists, creating it if needed.
pub async fn ensure_bucket(store: &dyn ObjectStore, bucket: &str) -> Result<(), SidecarError> {
    let found = store
        .bucket_exists(bucket)
        .await
        .map_err(SidecarError::Store)?;
    if !found {
        warn!("Bucket {} not found; Creating one...", bucket);
        store.make_bucket(bucket).await.map_err(SidecarError::Store)?;
        info!("Bucket {} created", bucket);
    }
    Ok(())
}

/// Connect with backoff and ensure the bucket, retrying both until they
/// succeed together.
///
/// Returns `None` if cancelled.  A non-retryable error from the bucket check
/// is returned as is.
pub async fn establish(
    connector: &dyn Connect,
    bucket: &str,
    attempts: u32,
    interval: Duration,
    cancel: &CancellationToken,
) -> Result<Option<Box<dyn ObjectStore>>, SidecarError> {
    loop {
        let Some(store) = connect_with_backoff(connector, attempts, interval, cancel).await else {
            return Ok(None);
        };
        match ensure_bucket(store.as_ref(), bucket).await {
            Ok(()) => return Ok(Some(store)),
            Err(e) if e.is_retryable() => {
                error!(
                    "Cannot ensure bucket {}: {:#}; reconnecting in {:?}",
                    bucket,
                    anyhow::Error::from(e),
                    interval
                );
            }
            Err(e) => return Err(e),
        }
        drop(store);
        if !sleep_or_cancel(interval, cancel).await {
            return Ok(None);
        }
    }
}

/// Sleep for `duration`.  Returns `false` if `cancel` fired first.
pub async fn sleep_or_cancel(duration: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}
