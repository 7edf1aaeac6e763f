//! Stream dispatcher.
//!
//! Every descriptor is validated before anything starts, so a bad entry in
//! the streams file stops the process without a single upload.  Each valid
//! descriptor then gets its own task, and the dispatcher waits for all of
//! them.

use std::path::Path;

use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, Instrument};

use crate::config::{StreamDescriptor, StreamSpec, BACKUP_KIND, STREAM_KIND};
use crate::errors::SidecarError;
use crate::workers::{BackupWorker, StreamWorker, WorkerContext};

/// A worker ready to run.
pub enum Worker {
    Stream(StreamWorker),
    Backup(BackupWorker),
}

impl Worker {
    pub fn kind(&self) -> &'static str {
        match self {
            Worker::Stream(_) => STREAM_KIND,
            Worker::Backup(_) => BACKUP_KIND,
        }
    }

    pub fn file(&self) -> &Path {
        match self {
            Worker::Stream(w) => w.settings().file.as_path(),
            Worker::Backup(w) => w.settings().file.as_path(),
        }
    }

    /// Run until `cancel` fires or a non-retryable error occurs.
    pub async fn run(&self, cancel: CancellationToken) -> Result<(), SidecarError> {
        match self {
            Worker::Stream(w) => w.run(cancel).await,
            Worker::Backup(w) => w.run(cancel).await,
        }
    }
}

/// Validate every descriptor and build its worker.
///
/// Fails on the first invalid descriptor, before any worker has started.
pub fn plan(
    descriptors: &[StreamDescriptor],
    ctx: &WorkerContext,
) -> Result<Vec<Worker>, SidecarError> {
    descriptors
        .iter()
        .map(|descriptor| match descriptor.classify()? {
            StreamSpec::Stream(settings) => {
                Ok(Worker::Stream(StreamWorker::new(settings, ctx.clone())))
            }
            StreamSpec::Backup(settings) => {
                Ok(Worker::Backup(BackupWorker::new(settings, ctx.clone())?))
            }
        })
        .collect()
}

/// Run `workers` concurrently until all of them finish.
///
/// With no workers the call idles until cancelled.  A worker failing with a
/// non-retryable error does not stop the others; the first such error is
/// returned after every task has ended.
pub async fn run(workers: Vec<Worker>, cancel: CancellationToken) -> Result<(), SidecarError> {
    if workers.is_empty() {
        info!("No streams configured, idling until shutdown");
        cancel.cancelled().await;
        return Ok(());
    }

    let mut set = JoinSet::new();
    for worker in workers {
        let span = info_span!(
            "worker",
            kind = worker.kind(),
            file = %worker.file().display()
        );
        let cancel = cancel.clone();
        set.spawn(
            async move {
                info!("Starting worker");
                let result = worker.run(cancel).await;
                if let Err(e) = &result {
                    error!(error_kind = e.kind(), "Worker stopped: {}", e);
                }
                result
            }
            .instrument(span),
        );
    }
    info!("Started {} workers", set.len());

    let mut first_error = None;
    while let Some(joined) = set.join_next().await {
        if let Err(e) = joined.unwrap_or_else(|e| Err(join_failure(e))) {
            first_error.get_or_insert(e);
        }
    }

    match first_error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

fn join_failure(e: JoinError) -> SidecarError {
    error!("Worker task failed: {}", e);
    SidecarError::WorkerPanicked {
        message: e.to_string(),
    }
}

/// Plan and run `descriptors`.
pub async fn dispatch(
    descriptors: &[StreamDescriptor],
    ctx: &WorkerContext,
    cancel: CancellationToken,
) -> Result<(), SidecarError> {
    let workers = plan(descriptors, ctx)?;
    run(workers, cancel).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::Clock;
    use crate::storage::memory::MemoryStore;
    use crate::workers::test_support::{ready_context, BUCKET};
    use std::sync::Arc;
    use std::time::Duration;

    fn stream(file: &Path, push_rate: u64) -> StreamDescriptor {
        StreamDescriptor {
            file: file.to_path_buf(),
            kind: STREAM_KIND.to_string(),
            push_rate: Some(push_rate),
            regex_pattern: None,
            clear_after_backup: None,
            backup_check_rate: None,
        }
    }

    fn backup(file: &Path, pattern: &str, check_rate: u64) -> StreamDescriptor {
        StreamDescriptor {
            file: file.to_path_buf(),
            kind: BACKUP_KIND.to_string(),
            push_rate: None,
            regex_pattern: Some(pattern.to_string()),
            clear_after_backup: Some(true),
            backup_check_rate: Some(check_rate),
        }
    }

    #[test]
    fn test_plan_builds_one_worker_per_descriptor() {
        let store = MemoryStore::new();
        let (ctx, _clock) = ready_context(&store);
        let workers = plan(
            &[
                stream(Path::new("/var/log/app.log"), 5),
                backup(Path::new("/data/dump"), ".*", 60),
            ],
            &ctx,
        )
        .unwrap();

        let kinds: Vec<_> = workers.iter().map(Worker::kind).collect();
        assert_eq!(kinds, vec!["stream", "backup"]);
        assert_eq!(workers[1].file(), Path::new("/data/dump"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_type_fails_before_any_worker_starts() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("app.log");
        std::fs::write(&file, "hello").unwrap();

        let store = MemoryStore::new();
        let (ctx, _clock) = ready_context(&store);
        let mut archive = stream(&dir.path().join("old.log"), 5);
        archive.kind = "archive".to_string();

        let err = dispatch(&[stream(&file, 5), archive], &ctx, CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            SidecarError::UnknownStreamType { ref kind, .. } if kind == "archive"
        ));
        assert!(!err.is_retryable());
        // Nothing connected, so the bucket was never created.
        assert!(!store.has_bucket(BUCKET).await);
        assert!(store.puts().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dispatch_runs_streams_concurrently() {
        let dir = tempfile::tempdir().unwrap();
        let app = dir.path().join("app.log");
        let audit = dir.path().join("audit.log");
        std::fs::write(&app, "hello").unwrap();
        std::fs::write(&audit, "audit").unwrap();
        std::fs::write(dir.path().join("dump_20240101.csv"), "rows").unwrap();

        let store = MemoryStore::new();
        let (ctx, _clock) = ready_context(&store);
        let descriptors = vec![
            stream(&app, 5),
            stream(&audit, 10),
            backup(&dir.path().join("dump"), ".*", 8),
        ];

        let cancel = CancellationToken::new();
        let handle = {
            let cancel = cancel.clone();
            tokio::spawn(async move { dispatch(&descriptors, &ctx, cancel).await })
        };

        tokio::time::sleep(Duration::from_secs(11)).await;
        cancel.cancel();
        handle.await.unwrap().unwrap();

        // Each stream also flushes once on cancel.
        let keys: Vec<String> = store.puts().await.into_iter().map(|p| p.key).collect();
        assert_eq!(
            keys.iter().filter(|k| *k == "2024-01-01/07_app.log").count(),
            3
        );
        assert_eq!(
            keys.iter().filter(|k| *k == "2024-01-01/07_audit.log").count(),
            2
        );
        assert!(keys.contains(&"csv/dump_20240101.csv".to_string()));
        assert!(!dir.path().join("dump_20240101.csv").exists());
    }

    struct BrokenClock;

    impl Clock for BrokenClock {
        fn now(&self) -> chrono::DateTime<chrono::Utc> {
            panic!("clock unavailable");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_panicked_worker_is_not_retryable() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("app.log");
        std::fs::write(&file, "hello").unwrap();

        let store = MemoryStore::new();
        let (mut ctx, _clock) = ready_context(&store);
        ctx.clock = Arc::new(BrokenClock);

        let err = dispatch(&[stream(&file, 5)], &ctx, CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, SidecarError::WorkerPanicked { .. }));
        assert!(!err.is_retryable());
        assert_eq!(err.kind(), "worker_panicked");
        assert!(store.puts().await.is_empty());
    }

    #[tokio::test]
    async fn test_no_workers_idles_until_cancelled() {
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run(Vec::new(), cancel.clone()));
        tokio::task::yield_now().await;
        assert!(!handle.is_finished());

        cancel.cancel();
        handle.await.unwrap().unwrap();
    }
}
