//! s3sidecar library: ships local files to an S3-compatible object store.
//!
//! The sidecar reads a list of stream descriptors and runs one worker per
//! entry.  `stream` entries re-upload a single file on a fixed interval under
//! a date/hour key; `backup` entries periodically upload the first file
//! matching a pattern under an extension-partitioned key, optionally
//! deleting it afterwards.  Each worker owns its own client and reconnects
//! on its own when the store is unreachable.

use std::sync::Arc;

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing::info;

pub mod clock;
pub mod config;
pub mod connector;
pub mod dispatcher;
pub mod errors;
pub mod metrics;
pub mod naming;
pub mod storage;
pub mod workers;

use crate::clock::SystemClock;
use crate::config::Config;
use crate::storage::aws::S3Connector;
use crate::workers::WorkerContext;

/// Load the streams file and run every stream against the S3 endpoint in
/// `config` until `cancel` fires.
pub async fn run(config: &Config, cancel: CancellationToken) -> anyhow::Result<()> {
    info!("Loading streams from {}", config.streams_path.display());
    let descriptors = crate::config::load_streams(&config.streams_path)?;
    info!(
        "Streams configuration:\n{}",
        serde_json::to_string_pretty(&descriptors)?
    );
    info!("Object store: {:?}", config.store);

    let ctx = WorkerContext::new(
        &config.store,
        Arc::new(S3Connector::new(config.store.clone())),
        Arc::new(SystemClock),
    );

    dispatcher::dispatch(&descriptors, &ctx, cancel)
        .await
        .context("stream dispatch failed")
}
