//! Backup-and-clear worker.
//!
//! Each cycle connects, sleeps `backupCheckRate`, then expands `{file}*`
//! into candidate paths in directory walk order.  The first candidate whose
//! path matches the pattern (anchored at the start only) is uploaded under
//! `{extension}/{basename}` and, if configured, deleted locally.  At most one
//! file is backed up per cycle.

use std::path::{Path, PathBuf};

use bytes::Bytes;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use wax::Glob;

use super::WorkerContext;
use crate::config::BackupSettings;
use crate::connector;
use crate::errors::SidecarError;
use crate::metrics;
use crate::naming;
use crate::storage::ObjectStore;

/// What one backup cycle did.
#[derive(Debug, Clone, PartialEq)]
pub enum BackupOutcome {
    /// `source` was uploaded to `key`; `cleared` if it was then deleted.
    Uploaded {
        source: PathBuf,
        key: String,
        cleared: bool,
    },
    /// No candidate matched the pattern.
    NoMatch,
    /// A transient error ended the cycle early.
    Failed,
    /// Cancelled before the scan ran.
    Cancelled,
}

/// Worker for a `backup` descriptor.
pub struct BackupWorker {
    settings: BackupSettings,
    ctx: WorkerContext,
    scan: ScanPlan,
}

/// How `{file}*` is expanded.
#[derive(Debug, Clone, PartialEq)]
struct ScanPlan {
    /// Directory the glob is walked from.
    walk_dir: PathBuf,
    /// Parent of `file` as written; candidates are reported under it.
    prefix: PathBuf,
    /// Glob matched against names inside `walk_dir`.
    expr: String,
}

impl BackupWorker {
    /// Build the worker, validating the candidate glob up front.
    pub fn new(settings: BackupSettings, ctx: WorkerContext) -> Result<Self, SidecarError> {
        let scan = scan_plan(&settings.file)?;
        Glob::new(&scan.expr).map_err(|e| SidecarError::InvalidGlob {
            file: settings.file.clone(),
            message: e.to_string(),
        })?;
        Ok(Self {
            settings,
            ctx,
            scan,
        })
    }

    pub fn settings(&self) -> &BackupSettings {
        &self.settings
    }

    /// Run cycles back to back until `cancel` fires.
    pub async fn run(&self, cancel: CancellationToken) -> Result<(), SidecarError> {
        while !cancel.is_cancelled() {
            self.run_cycle(&cancel).await?;
        }
        debug!("Backup cancelled");
        Ok(())
    }

    /// One full cycle: connect with a fresh handle, sleep, scan, and back up
    /// at most one file.
    ///
    /// Transient errors are logged and reported as [`BackupOutcome::Failed`].
    pub async fn run_cycle(&self, cancel: &CancellationToken) -> Result<BackupOutcome, SidecarError> {
        let check_rate = self.settings.check_rate;
        let Some(store) = connector::establish(
            self.ctx.connector.as_ref(),
            &self.ctx.bucket,
            self.ctx.connect_attempts,
            check_rate,
            cancel,
        )
        .await?
        else {
            return Ok(BackupOutcome::Cancelled);
        };

        if !connector::sleep_or_cancel(check_rate, cancel).await {
            return Ok(BackupOutcome::Cancelled);
        }

        match self.backup_once(store.as_ref()).await {
            Ok(outcome) => Ok(outcome),
            Err(e) if e.is_retryable() => {
                error!("Error: {:#}", anyhow::Error::from(e));
                Ok(BackupOutcome::Failed)
            }
            Err(e) => Err(e),
        }
    }

    /// Scan for candidates and back up the first match.
    pub async fn backup_once(&self, store: &dyn ObjectStore) -> Result<BackupOutcome, SidecarError> {
        for candidate in self.candidates().await? {
            let path = candidate.to_string_lossy();
            if !self.settings.pattern.is_match(&path) {
                warn!(
                    "{} doesn't match pattern {}",
                    path,
                    self.settings.pattern.as_str()
                );
                continue;
            }

            info!("Found backup candidate {}", path);
            let key = naming::with_prefix(
                self.ctx.key_prefix.as_deref(),
                naming::backup_object_key(&candidate)?,
            );
            let data = tokio::fs::read(&candidate)
                .await
                .map_err(|e| SidecarError::io(&candidate, e))?;
            let bytes = data.len();

            if let Err(e) = store
                .put_object(&self.ctx.bucket, &key, Bytes::from(data))
                .await
            {
                metrics::record_upload("backup", None);
                return Err(SidecarError::Store(e));
            }
            metrics::record_upload("backup", Some(bytes));
            info!("Pushed {} to {}:{}", path, self.ctx.bucket, key);

            if self.settings.clear_after_backup {
                tokio::fs::remove_file(&candidate)
                    .await
                    .map_err(|e| SidecarError::io(&candidate, e))?;
                metrics::record_backup_cleared();
                info!("Removed local copy {}", path);
            }

            return Ok(BackupOutcome::Uploaded {
                source: candidate.clone(),
                key,
                cleared: self.settings.clear_after_backup,
            });
        }
        Ok(BackupOutcome::NoMatch)
    }

    /// Regular files matching `{file}*`, in walk order.
    async fn candidates(&self) -> Result<Vec<PathBuf>, SidecarError> {
        let scan = self.scan.clone();
        let file = self.settings.file.clone();
        tokio::task::spawn_blocking(move || walk_candidates(&scan, &file))
            .await
            .map_err(|e| SidecarError::Scan {
                path: self.scan.walk_dir.clone(),
                message: e.to_string(),
            })?
    }
}

/// Split `file` into the directory to walk and a glob for its siblings
/// whose names start with its basename.
///
/// A `file` ending in a separator names a directory, and every entry in it
/// is a candidate.  Candidates keep the parent exactly as written, so a
/// relative `dump` yields `dump_1.csv`, not `./dump_1.csv`.
fn scan_plan(file: &Path) -> Result<ScanPlan, SidecarError> {
    if file
        .as_os_str()
        .to_string_lossy()
        .ends_with(std::path::is_separator)
    {
        return Ok(ScanPlan {
            walk_dir: file.to_path_buf(),
            prefix: file.to_path_buf(),
            expr: "*".to_string(),
        });
    }

    let name = naming::basename(file)?;
    let prefix = file.parent().map(Path::to_path_buf).unwrap_or_default();
    let walk_dir = if prefix.as_os_str().is_empty() {
        PathBuf::from(".")
    } else {
        prefix.clone()
    };
    Ok(ScanPlan {
        walk_dir,
        prefix,
        expr: format!("{}*", wax::escape(&name)),
    })
}

fn walk_candidates(scan: &ScanPlan, file: &Path) -> Result<Vec<PathBuf>, SidecarError> {
    // A missing directory simply has no candidates.
    if !scan.walk_dir.is_dir() {
        return Ok(Vec::new());
    }
    let glob = Glob::new(&scan.expr).map_err(|e| SidecarError::InvalidGlob {
        file: file.to_path_buf(),
        message: e.to_string(),
    })?;

    let mut candidates = Vec::new();
    for entry in glob.walk(&scan.walk_dir) {
        let entry = entry.map_err(|e| SidecarError::Scan {
            path: scan.walk_dir.clone(),
            message: e.to_string(),
        })?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        // The glob never crosses a separator, so the name is the whole match.
        if let Some(name) = path.file_name() {
            candidates.push(scan.prefix.join(name));
        }
    }
    Ok(candidates)
}
