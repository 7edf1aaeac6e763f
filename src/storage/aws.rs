//! S3-compatible storage client.
//!
//! Talks to AWS S3 or any S3-compatible service (MinIO, Ceph RGW, ...)
//! through the AWS SDK.  Addressing is path-style and credentials are
//! static, taken from [`StoreConfig`] rather than the AWS credential chain.

use std::time::Duration;

use aws_sdk_s3::error::{DisplayErrorContext, SdkError};
use aws_sdk_s3::Client;
use base64::Engine;
use bytes::Bytes;
use tracing::{debug, info};

use super::backend::{compute_etag, Connect, ObjectStore, StoreFuture};
use crate::config::StoreConfig;

/// Connect timeout applied to every request.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Builds [`S3Store`] handles from a [`StoreConfig`].
#[derive(Debug, Clone)]
pub struct S3Connector {
    config: StoreConfig,
}

impl S3Connector {
    pub fn new(config: StoreConfig) -> Self {
        Self { config }
    }
}

impl Connect for S3Connector {
    fn connect(&self) -> StoreFuture<'_, Box<dyn ObjectStore>> {
        Box::pin(async move {
            let store = S3Store::new(&self.config).await;
            store.probe(&self.config.bucket).await?;
            Ok(Box::new(store) as Box<dyn ObjectStore>)
        })
    }

    fn endpoint(&self) -> String {
        self.config.endpoint_url()
    }
}

/// Client handle over the AWS SDK.
pub struct S3Store {
    /// AWS S3 SDK client.
    client: Client,
    /// Region used for bucket creation constraints.
    region: String,
}

impl S3Store {
    /// Build a client for the configured endpoint.
    ///
    /// Building never touches the network; see [`S3Store::probe`].
    pub async fn new(config: &StoreConfig) -> Self {
        let creds = aws_sdk_s3::config::Credentials::new(
            &config.access_key,
            &config.secret_key,
            config.session_token.clone(),
            None, // expiry
            "s3sidecar-env",
        );

        let timeouts = aws_config::timeout::TimeoutConfig::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build();

        let sdk_config = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(aws_config::Region::new(config.region.clone()))
            .endpoint_url(config.endpoint_url())
            .credentials_provider(creds)
            .timeout_config(timeouts)
            .load()
            .await;

        let s3_config = aws_sdk_s3::config::Builder::from(&sdk_config)
            .force_path_style(true)
            .build();

        info!(
            "S3 client built: endpoint={} region={}",
            config.endpoint_url(),
            config.region
        );

        Self {
            client: Client::from_conf(s3_config),
            region: config.region.clone(),
        }
    }

    /// Check that the endpoint answers at all.
    ///
    /// Any service response, including "no such bucket" or "forbidden",
    /// proves the store is reachable.  Only failures to build or deliver the
    /// request count as unreachable.
    pub async fn probe(&self, bucket: &str) -> anyhow::Result<()> {
        match self.client.head_bucket().bucket(bucket).send().await {
            Ok(_) => Ok(()),
            Err(SdkError::ServiceError(_)) | Err(SdkError::ResponseError(_)) => Ok(()),
            Err(e) => Err(Self::map_sdk_error("probe", DisplayErrorContext(&e))),
        }
    }

    /// Map an AWS SDK error to an anyhow error with context.
    fn map_sdk_error(context: &str, err: impl std::fmt::Display) -> anyhow::Error {
        anyhow::anyhow!("S3 {context}: {err}")
    }

    /// Base64 MD5 digest for the `Content-MD5` header.
    fn content_md5(data: &[u8]) -> String {
        use md5::{Digest, Md5};
        let mut hasher = Md5::new();
        hasher.update(data);
        base64::engine::general_purpose::STANDARD.encode(hasher.finalize())
    }
}

impl ObjectStore for S3Store {
    fn bucket_exists(&self, bucket: &str) -> StoreFuture<'_, bool> {
        let bucket = bucket.to_string();
        Box::pin(async move {
            debug!("S3 head_bucket: bucket={}", bucket);

            match self.client.head_bucket().bucket(&bucket).send().await {
                Ok(_) => Ok(true),
                Err(e) => match e.as_service_error() {
                    Some(service_err) if service_err.is_not_found() => Ok(false),
                    _ => Err(Self::map_sdk_error("head_bucket", DisplayErrorContext(&e))),
                },
            }
        })
    }

    fn make_bucket(&self, bucket: &str) -> StoreFuture<'_, ()> {
        let bucket = bucket.to_string();
        Box::pin(async move {
            debug!("S3 create_bucket: bucket={} region={}", bucket, self.region);

            let mut req = self.client.create_bucket().bucket(&bucket);
            // us-east-1 is the implicit location and must not be sent.
            if self.region != "us-east-1" {
                let constraint = aws_sdk_s3::types::CreateBucketConfiguration::builder()
                    .location_constraint(aws_sdk_s3::types::BucketLocationConstraint::from(
                        self.region.as_str(),
                    ))
                    .build();
                req = req.create_bucket_configuration(constraint);
            }

            match req.send().await {
                Ok(_) => Ok(()),
                Err(e) => match e.as_service_error() {
                    Some(service_err) if service_err.is_bucket_already_owned_by_you() => {
                        debug!("S3 create_bucket: {} already owned by us", bucket);
                        Ok(())
                    }
                    _ => Err(Self::map_sdk_error("create_bucket", DisplayErrorContext(&e))),
                },
            }
        })
    }

    fn put_object(&self, bucket: &str, key: &str, data: Bytes) -> StoreFuture<'_, String> {
        let bucket = bucket.to_string();
        let key = key.to_string();
        Box::pin(async move {
            // Compute the ETag locally; S3 may report a different one under
            // server-side encryption.
            let etag = compute_etag(&data);
            let content_md5 = Self::content_md5(&data);

            debug!(
                "S3 put_object: bucket={} key={} len={}",
                bucket,
                key,
                data.len()
            );

            self.client
                .put_object()
                .bucket(&bucket)
                .key(&key)
                .content_length(data.len() as i64)
                .content_md5(content_md5)
                .body(aws_sdk_s3::primitives::ByteStream::from(data))
                .send()
                .await
                .map_err(|e| Self::map_sdk_error("put_object", DisplayErrorContext(&e)))?;

            Ok(etag)
        })
    }
}

// -- Tests -------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config(endpoint: &str) -> StoreConfig {
        StoreConfig {
            endpoint: endpoint.to_string(),
            access_key: "minioadmin".to_string(),
            secret_key: "minioadmin".to_string(),
            session_token: None,
            region: "us-east-1".to_string(),
            bucket: "logs".to_string(),
            key_prefix: None,
            connect_attempts: 1,
        }
    }

    #[test]
    fn test_content_md5_is_base64_digest() {
        assert_eq!(S3Store::content_md5(b""), "1B2M2Y8AsgTpgAmY7PhCfg==");
        assert_eq!(
            S3Store::content_md5(b"hello world"),
            "XrY7u+Ae7tCTyyK7j1rNww=="
        );
    }

    #[test]
    fn test_connector_endpoint_adds_http_scheme() {
        let connector = S3Connector::new(test_config("minio:9000"));
        assert_eq!(connector.endpoint(), "http://minio:9000");
    }

    #[tokio::test]
    async fn test_connect_to_closed_port_fails() {
        // Bind and drop a listener to get a local port nothing listens on.
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let connector = S3Connector::new(test_config(&format!("127.0.0.1:{port}")));
        let result = connector.connect().await;
        assert!(result.is_err());
    }
}
