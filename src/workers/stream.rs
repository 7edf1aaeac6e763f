//! Snapshot stream worker.
//!
//! Once connected, the worker sleeps `pushRate`, reads the whole source file
//! and uploads it under `{date}/{hour}_{basename}`, forever.  The file is
//! treated as a replaceable snapshot, never tailed.  Uploads within one
//! stream are strictly sequential.  On cancellation the file is pushed one
//! last time so writes since the previous cycle are not lost.

use bytes::Bytes;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::WorkerContext;
use crate::config::StreamSettings;
use crate::connector;
use crate::errors::SidecarError;
use crate::metrics;
use crate::naming;
use crate::storage::ObjectStore;

/// What one push cycle did.
#[derive(Debug, Clone, PartialEq)]
pub enum PushOutcome {
    /// The file was uploaded to `key`.
    Uploaded { key: String, bytes: usize },
    /// The source file did not exist; nothing was uploaded.
    SourceMissing,
}

/// Worker for a `stream` descriptor.
pub struct StreamWorker {
    settings: StreamSettings,
    ctx: WorkerContext,
}

impl StreamWorker {
    pub fn new(settings: StreamSettings, ctx: WorkerContext) -> Self {
        Self { settings, ctx }
    }

    pub fn settings(&self) -> &StreamSettings {
        &self.settings
    }

    /// Connect, then push every `pushRate` until `cancel` fires, then push
    /// once more.
    ///
    /// Transient failures are logged and the next cycle proceeds as
    /// scheduled.  Only non-retryable errors end the worker early.
    pub async fn run(&self, cancel: CancellationToken) -> Result<(), SidecarError> {
        let push_rate = self.settings.push_rate;
        let Some(store) = connector::establish(
            self.ctx.connector.as_ref(),
            &self.ctx.bucket,
            self.ctx.connect_attempts,
            push_rate,
            &cancel,
        )
        .await?
        else {
            return Ok(());
        };
        info!("Stream ready, pushing every {:?}", push_rate);

        while connector::sleep_or_cancel(push_rate, &cancel).await {
            self.report(self.push_once(store.as_ref()).await)?;
        }

        debug!("Stream cancelled, flushing before release");
        self.report(self.push_once(store.as_ref()).await)?;
        drop(store);
        Ok(())
    }

    /// Log and count one push result.  Only non-retryable errors are returned.
    fn report(&self, result: Result<PushOutcome, SidecarError>) -> Result<(), SidecarError> {
        match result {
            Ok(PushOutcome::Uploaded { key, bytes }) => {
                metrics::record_upload("stream", Some(bytes));
                info!(
                    "Pushed {} to {}:{} ({} bytes)",
                    self.settings.file.display(),
                    self.ctx.bucket,
                    key,
                    bytes
                );
            }
            Ok(PushOutcome::SourceMissing) => {
                metrics::record_missing_source();
                warn!(
                    "stream file {} doesn't exist",
                    self.settings.file.display()
                );
            }
            Err(e) if e.is_retryable() => {
                metrics::record_upload("stream", None);
                error!("Error: {:#}", anyhow::Error::from(e));
            }
            Err(e) => return Err(e),
        }
        Ok(())
    }

    /// Run a single check-and-upload step against `store`.
    pub async fn push_once(&self, store: &dyn ObjectStore) -> Result<PushOutcome, SidecarError> {
        let file = &self.settings.file;
        let exists = tokio::fs::try_exists(file)
            .await
            .map_err(|e| SidecarError::io(file, e))?;
        if !exists {
            return Ok(PushOutcome::SourceMissing);
        }

        let data = tokio::fs::read(file)
            .await
            .map_err(|e| SidecarError::io(file, e))?;
        let bytes = data.len();
        // The key is derived from the upload instant, not the worker start.
        let key = naming::with_prefix(
            self.ctx.key_prefix.as_deref(),
            naming::stream_object_key(file, self.ctx.clock.now())?,
        );

        store
            .put_object(&self.ctx.bucket, &key, Bytes::from(data))
            .await
            .map_err(SidecarError::Store)?;

        Ok(PushOutcome::Uploaded { key, bytes })
    }
}
