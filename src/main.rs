//! s3sidecar: ships local files to an S3-compatible object store.
//!
//! Runs until SIGTERM/SIGINT.  Workers are cancelled on shutdown and nothing
//! in flight is retried; the next start picks up where the files are.

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::info;

use s3sidecar::config::{
    Config, LogFormat, LoggingConfig, ObservabilityConfig, StoreConfig,
    DEFAULT_CONNECT_ATTEMPTS, DEFAULT_STREAMS_PATH,
};

/// Command-line arguments; every setting can also come from the environment.
#[derive(Parser, Debug)]
#[command(
    name = "s3sidecar",
    version,
    about = "Ships local files to an S3-compatible object store"
)]
struct Cli {
    /// Path to the streams file (YAML or JSON).
    #[arg(long, env = "STREAMS_PATH", default_value = DEFAULT_STREAMS_PATH)]
    streams: PathBuf,

    /// Object store endpoint, `host:port` or a URL.
    #[arg(long, env = "S3_ENDPOINT")]
    endpoint: String,

    #[arg(long, env = "S3_ACCESS_KEY_ID")]
    access_key: String,

    #[arg(long, env = "S3_SECRET_ACCESS_KEY", hide_env_values = true)]
    secret_key: String,

    /// Target bucket, created if missing.
    #[arg(long, env = "S3_BUCKET")]
    bucket: String,

    #[arg(long, env = "S3_REGION", default_value = "us-east-1")]
    region: String,

    #[arg(long, env = "S3_SESSION_TOKEN", hide_env_values = true)]
    session_token: Option<String>,

    /// Prefix prepended to every object key.
    #[arg(long, env = "S3_BUCKET_PATH")]
    key_prefix: Option<String>,

    /// Connection attempts per round before backing off.
    #[arg(long, env = "S3_CONNECT_ATTEMPTS", default_value_t = DEFAULT_CONNECT_ATTEMPTS)]
    connect_attempts: u32,

    /// Default log filter, used when `RUST_LOG` is unset.
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    #[arg(long, env = "LOG_FORMAT", value_enum, default_value = "text")]
    log_format: LogFormat,

    /// Prometheus scrape listener; metrics are off when unset.
    #[arg(long, env = "METRICS_ADDR")]
    metrics_addr: Option<SocketAddr>,
}

impl Cli {
    fn into_config(self) -> Config {
        Config {
            streams_path: self.streams,
            store: StoreConfig {
                endpoint: self.endpoint,
                access_key: self.access_key,
                secret_key: self.secret_key,
                session_token: self.session_token.filter(|t| !t.is_empty()),
                region: self.region,
                bucket: self.bucket,
                key_prefix: self.key_prefix.filter(|p| !p.trim_matches('/').is_empty()),
                connect_attempts: self.connect_attempts,
            },
            logging: LoggingConfig {
                level: self.log_level,
                format: self.log_format,
            },
            observability: ObservabilityConfig {
                metrics_addr: self.metrics_addr,
            },
        }
    }
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&logging.level));
    match logging.format {
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init(),
        LogFormat::Text => tracing_subscriber::fmt().with_env_filter(filter).init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Cli::parse().into_config();
    init_tracing(&config.logging);

    if let Some(addr) = config.observability.metrics_addr {
        s3sidecar::metrics::init_metrics(addr)?;
        info!("Prometheus metrics listening on {}", addr);
    }

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            shutdown_signal().await;
            cancel.cancel();
        }
    });

    s3sidecar::run(&config, cancel).await?;

    info!("s3sidecar shut down");
    Ok(())
}

/// Wait for SIGTERM or SIGINT (Ctrl+C).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received SIGINT, shutting down");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, shutting down");
        },
    }
}
