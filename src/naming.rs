//! Object key derivation.
//!
//! Key mapping:
//!   Streams:  `{YYYY-MM-DD}/{HH}_{basename}` (UTC)
//!   Backups:  `{extension}/{basename}`
//!
//! Keys carry only the file's basename, so two sources with the same name
//! land on the same key and overwrite each other.

use std::path::Path;

use chrono::{DateTime, Utc};

use crate::errors::SidecarError;

/// Partition used for backup files without an extension.
pub const NO_EXTENSION_PARTITION: &str = "noext";

/// Final path component of `path`, lossily converted to UTF-8.
pub fn basename(path: &Path) -> Result<String, SidecarError> {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .ok_or_else(|| SidecarError::NoFileName {
            path: path.to_path_buf(),
        })
}

/// Key for a stream snapshot pushed at `at`.
pub fn stream_object_key(path: &Path, at: DateTime<Utc>) -> Result<String, SidecarError> {
    let name = basename(path)?;
    Ok(format!("{}_{}", at.format("%Y-%m-%d/%H"), name))
}

/// Key for a backed-up file, partitioned by extension.
pub fn backup_object_key(path: &Path) -> Result<String, SidecarError> {
    let name = basename(path)?;
    let partition = path
        .extension()
        .map(|ext| ext.to_string_lossy().into_owned())
        .unwrap_or_else(|| NO_EXTENSION_PARTITION.to_string());
    Ok(format!("{partition}/{name}"))
}

/// Prepend the configured bucket path, if any.
pub fn with_prefix(prefix: Option<&str>, key: String) -> String {
    match prefix.map(|p| p.trim_matches('/')) {
        Some(p) if !p.is_empty() => format!("{p}/{key}"),
        _ => key,
    }
}
