//! Configuration types and loading for the sidecar.
//!
//! Two sources feed the sidecar.  The streams file (YAML or JSON) lists the
//! [`StreamDescriptor`]s, one per shipped file.  Connection parameters for the
//! object store come from the environment and are collected once, in `main`,
//! into a [`Config`] that is passed down explicitly.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::errors::SidecarError;

/// Stream type that snapshots one file on a fixed interval.
pub const STREAM_KIND: &str = "stream";

/// Stream type that scans for, uploads and optionally clears matched files.
pub const BACKUP_KIND: &str = "backup";

/// Process-wide settings, built once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    /// Path of the streams file.
    pub streams_path: PathBuf,

    /// Object store connection settings.
    pub store: StoreConfig,

    /// Logging settings.
    pub logging: LoggingConfig,

    /// Metrics settings.
    pub observability: ObservabilityConfig,
}

/// Object store connection settings.
#[derive(Clone)]
pub struct StoreConfig {
    /// Endpoint address, `host:port` or a full URL.
    pub endpoint: String,
    pub access_key: String,
    pub secret_key: String,
    /// Optional session token for temporary credentials.
    pub session_token: Option<String>,
    /// Region to sign requests for.
    pub region: String,
    /// Target bucket shared by every worker.
    pub bucket: String,
    /// Optional prefix prepended to every object key.
    pub key_prefix: Option<String>,
    /// Bounded attempts per connect round.
    pub connect_attempts: u32,
}

impl StoreConfig {
    /// The endpoint as a URL.  Bare `host:port` endpoints are reached over
    /// plain HTTP.
    pub fn endpoint_url(&self) -> String {
        if self.endpoint.contains("://") {
            self.endpoint.clone()
        } else {
            format!("http://{}", self.endpoint)
        }
    }
}

// Keep secrets out of the startup dump and any `{:?}` logging.
impl std::fmt::Debug for StoreConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreConfig")
            .field("endpoint", &self.endpoint)
            .field("access_key", &self.access_key)
            .field("secret_key", &"<redacted>")
            .field(
                "session_token",
                &self.session_token.as_ref().map(|_| "<redacted>"),
            )
            .field("region", &self.region)
            .field("bucket", &self.bucket)
            .field("key_prefix", &self.key_prefix)
            .field("connect_attempts", &self.connect_attempts)
            .finish()
    }
}

/// Logging configuration.
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset.
    pub level: String,

    /// Log format: text or json.
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::Text,
        }
    }
}

/// Output format of the tracing subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

/// Observability settings.
///
/// Metrics are only exported when a listen address is configured.
#[derive(Debug, Clone, Default)]
pub struct ObservabilityConfig {
    /// Address for the Prometheus scrape endpoint.
    pub metrics_addr: Option<SocketAddr>,
}

/// One entry of the streams file, as written by the operator.
///
/// The `type` field stays a free string so that an unknown type is reported
/// by [`StreamDescriptor::classify`] at dispatch time rather than as a parse
/// error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamDescriptor {
    /// Source file, or for backups the path prefix to scan.
    pub file: PathBuf,

    /// `stream` or `backup`.
    #[serde(rename = "type")]
    pub kind: String,

    /// Seconds between snapshot uploads (streams).
    #[serde(rename = "pushRate", default, skip_serializing_if = "Option::is_none")]
    pub push_rate: Option<u64>,

    /// Pattern a candidate path must match at its start (backups).
    #[serde(
        rename = "regexPattern",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub regex_pattern: Option<String>,

    /// Delete the local file once it has been uploaded (backups).
    #[serde(
        rename = "clearAfterBackup",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub clear_after_backup: Option<bool>,

    /// Seconds between backup scans (backups, default one hour).
    #[serde(
        rename = "backupCheckRate",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub backup_check_rate: Option<u64>,
}

/// A validated descriptor.
#[derive(Debug, Clone)]
pub enum StreamSpec {
    Stream(StreamSettings),
    Backup(BackupSettings),
}

/// Settings of a snapshot stream.
#[derive(Debug, Clone)]
pub struct StreamSettings {
    pub file: PathBuf,
    pub push_rate: Duration,
}

/// Settings of a backup stream.
#[derive(Debug, Clone)]
pub struct BackupSettings {
    /// Path prefix; candidates are `file*`.
    pub file: PathBuf,
    /// The operator's pattern, anchored at the start of the path.
    pub pattern: Regex,
    pub clear_after_backup: bool,
    pub check_rate: Duration,
}

impl StreamDescriptor {
    /// Validate the descriptor and turn it into a typed [`StreamSpec`].
    pub fn classify(&self) -> Result<StreamSpec, SidecarError> {
        if self.file.file_name().is_none() {
            return Err(SidecarError::NoFileName {
                path: self.file.clone(),
            });
        }

        match self.kind.as_str() {
            STREAM_KIND => {
                let push_rate = self.require(self.push_rate, "pushRate")?;
                Ok(StreamSpec::Stream(StreamSettings {
                    file: self.file.clone(),
                    push_rate: self.interval(push_rate, "pushRate")?,
                }))
            }
            BACKUP_KIND => {
                let pattern = self.require(self.regex_pattern.clone(), "regexPattern")?;
                let clear_after_backup =
                    self.require(self.clear_after_backup, "clearAfterBackup")?;
                let check_rate = self.interval(
                    self.backup_check_rate.unwrap_or(DEFAULT_BACKUP_CHECK_RATE),
                    "backupCheckRate",
                )?;
                Ok(StreamSpec::Backup(BackupSettings {
                    file: self.file.clone(),
                    pattern: anchored_pattern(&pattern).map_err(|source| {
                        SidecarError::InvalidPattern {
                            file: self.file.clone(),
                            pattern,
                            source,
                        }
                    })?,
                    clear_after_backup,
                    check_rate,
                }))
            }
            other => Err(SidecarError::UnknownStreamType {
                file: self.file.clone(),
                kind: other.to_string(),
            }),
        }
    }

    fn require<T>(&self, value: Option<T>, field: &'static str) -> Result<T, SidecarError> {
        value.ok_or_else(|| SidecarError::MissingField {
            file: self.file.clone(),
            kind: self.kind.clone(),
            field,
        })
    }

    fn interval(&self, secs: u64, field: &'static str) -> Result<Duration, SidecarError> {
        if secs == 0 {
            return Err(SidecarError::InvalidInterval {
                file: self.file.clone(),
                field,
            });
        }
        Ok(Duration::from_secs(secs))
    }
}

/// Compile `pattern` so that it only matches at the start of the input,
/// without requiring it to consume the whole input.
pub(crate) fn anchored_pattern(pattern: &str) -> Result<Regex, regex::Error> {
    Regex::new(&format!("^(?:{pattern})"))
}

// -- Defaults ----------------------------------------------------------------

/// Default seconds between backup scans.
pub const DEFAULT_BACKUP_CHECK_RATE: u64 = 3600;

/// Default bounded attempts per connect round.
pub const DEFAULT_CONNECT_ATTEMPTS: u32 = 5;

/// Default streams file location inside the sidecar container.
pub const DEFAULT_STREAMS_PATH: &str = "/config/streams.yaml";

pub fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

// -- Loader ------------------------------------------------------------------

/// Load and parse the streams file at `path`.
///
/// JSON documents are accepted too, since JSON is valid YAML.
pub fn load_streams<P: AsRef<Path>>(path: P) -> Result<Vec<StreamDescriptor>, SidecarError> {
    let path = path.as_ref();
    let config_error = |source: anyhow::Error| SidecarError::Config {
        path: path.to_path_buf(),
        source,
    };
    let contents = std::fs::read_to_string(path).map_err(|e| config_error(e.into()))?;
    parse_streams(&contents).map_err(config_error)
}

/// Parse a streams document.  An empty document means no streams.
pub fn parse_streams(contents: &str) -> anyhow::Result<Vec<StreamDescriptor>> {
    let streams: Option<Vec<StreamDescriptor>> = serde_yaml::from_str(contents)?;
    Ok(streams.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_logging_defaults() {
        let logging = LoggingConfig::default();
        assert_eq!(logging.level, "info");
        assert_eq!(logging.format, LogFormat::Text);
    }

    fn descriptor(kind: &str) -> StreamDescriptor {
        StreamDescriptor {
            file: PathBuf::from("/data/dump"),
            kind: kind.to_string(),
            push_rate: None,
            regex_pattern: None,
            clear_after_backup: None,
            backup_check_rate: None,
        }
    }

    #[test]
    fn test_parse_yaml_streams() {
        let yaml = r#"
- file: /var/log/app.log
  type: stream
  pushRate: 5
- file: /data/dump
  type: backup
  regexPattern: '/data/dump_\d+\.csv'
  clearAfterBackup: true
"#;
        let streams = parse_streams(yaml).unwrap();
        assert_eq!(streams.len(), 2);
        assert_eq!(streams[0].file, PathBuf::from("/var/log/app.log"));
        assert_eq!(streams[0].kind, "stream");
        assert_eq!(streams[0].push_rate, Some(5));
        assert_eq!(streams[1].kind, "backup");
        assert_eq!(
            streams[1].regex_pattern.as_deref(),
            Some(r"/data/dump_\d+\.csv")
        );
        assert_eq!(streams[1].clear_after_backup, Some(true));
        assert_eq!(streams[1].backup_check_rate, None);
    }

    #[test]
    fn test_parse_json_streams() {
        let json = r#"[{"file": "/var/log/app.log", "type": "stream", "pushRate": 10}]"#;
        let streams = parse_streams(json).unwrap();
        assert_eq!(streams.len(), 1);
        assert_eq!(streams[0].push_rate, Some(10));
    }

    #[test]
    fn test_parse_empty_document() {
        assert!(parse_streams("").unwrap().is_empty());
    }

    #[test]
    fn test_unknown_type_parses_but_fails_classification() {
        let streams = parse_streams("- file: /x/y\n  type: archive\n").unwrap();
        let err = streams[0].classify().unwrap_err();
        assert!(matches!(
            err,
            SidecarError::UnknownStreamType { ref kind, .. } if kind == "archive"
        ));
    }

    #[test]
    fn test_load_streams_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "- file: /var/log/app.log\n  type: stream\n  pushRate: 5").unwrap();
        let streams = load_streams(file.path()).unwrap();
        assert_eq!(streams.len(), 1);
    }

    #[test]
    fn test_load_streams_missing_file() {
        let err = load_streams("/nonexistent/streams.yaml").unwrap_err();
        assert!(matches!(err, SidecarError::Config { .. }));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_classify_stream() {
        let mut d = descriptor("stream");
        d.push_rate = Some(5);
        match d.classify().unwrap() {
            StreamSpec::Stream(s) => assert_eq!(s.push_rate, Duration::from_secs(5)),
            other => panic!("unexpected descriptor {other:?}"),
        }
    }

    #[test]
    fn test_classify_stream_requires_push_rate() {
        let err = descriptor("stream").classify().unwrap_err();
        assert!(matches!(
            err,
            SidecarError::MissingField { field: "pushRate", .. }
        ));
    }

    #[test]
    fn test_classify_rejects_zero_interval() {
        let mut d = descriptor("stream");
        d.push_rate = Some(0);
        assert!(matches!(
            d.classify().unwrap_err(),
            SidecarError::InvalidInterval { field: "pushRate", .. }
        ));
    }

    #[test]
    fn test_classify_backup_requires_pattern_and_clear_flag() {
        let mut d = descriptor("backup");
        d.clear_after_backup = Some(true);
        assert!(matches!(
            d.classify().unwrap_err(),
            SidecarError::MissingField { field: "regexPattern", .. }
        ));

        let mut d = descriptor("backup");
        d.regex_pattern = Some("x".to_string());
        assert!(matches!(
            d.classify().unwrap_err(),
            SidecarError::MissingField { field: "clearAfterBackup", .. }
        ));
    }

    #[test]
    fn test_classify_backup_defaults_check_rate() {
        let mut d = descriptor("backup");
        d.regex_pattern = Some(r"/data/dump_\d+\.csv".to_string());
        d.clear_after_backup = Some(false);
        match d.classify().unwrap() {
            StreamSpec::Backup(b) => {
                assert_eq!(b.check_rate, Duration::from_secs(DEFAULT_BACKUP_CHECK_RATE));
                assert!(!b.clear_after_backup);
            }
            other => panic!("unexpected descriptor {other:?}"),
        }
    }

    #[test]
    fn test_classify_backup_invalid_regex() {
        let mut d = descriptor("backup");
        d.regex_pattern = Some("(unclosed".to_string());
        d.clear_after_backup = Some(true);
        assert!(matches!(
            d.classify().unwrap_err(),
            SidecarError::InvalidPattern { .. }
        ));
    }

    #[test]
    fn test_classify_rejects_path_without_file_name() {
        let mut d = descriptor("stream");
        d.file = PathBuf::from("/");
        d.push_rate = Some(1);
        assert!(matches!(
            d.classify().unwrap_err(),
            SidecarError::NoFileName { .. }
        ));
    }

    #[test]
    fn test_backup_pattern_is_prefix_match() {
        let re = anchored_pattern(r"/data/dump_\d+").unwrap();
        assert!(re.is_match("/data/dump_20240101.csv"));
        assert!(!re.is_match("/other/data/dump_20240101.csv"));

        // Alternations stay anchored as a group.
        let re = anchored_pattern("a|b").unwrap();
        assert!(re.is_match("b-file"));
        assert!(!re.is_match("xb"));
    }

    #[test]
    fn test_endpoint_url() {
        let mut store = StoreConfig {
            endpoint: "minio:9000".to_string(),
            access_key: "ak".to_string(),
            secret_key: "topsecret".to_string(),
            session_token: None,
            region: default_region(),
            bucket: "logs".to_string(),
            key_prefix: None,
            connect_attempts: DEFAULT_CONNECT_ATTEMPTS,
        };
        assert_eq!(store.endpoint_url(), "http://minio:9000");
        store.endpoint = "http://minio:9000".to_string();
        assert_eq!(store.endpoint_url(), "http://minio:9000");
        assert!(!format!("{store:?}").contains("topsecret"));
    }
}
