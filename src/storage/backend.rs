//! Abstract object store client traits.
//!
//! [`ObjectStore`] is the client handle a worker holds: the three bucket and
//! object calls the sidecar needs.  [`Connect`] produces handles; one call
//! is one construction attempt, and the retry discipline around it lives in
//! [`crate::connector`].

use bytes::Bytes;
use std::future::Future;
use std::pin::Pin;

/// Boxed future returned by store calls.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = anyhow::Result<T>> + Send + 'a>>;

/// An established client handle bound to one endpoint and credential pair.
pub trait ObjectStore: Send + Sync + 'static {
    /// Check whether `bucket` exists.
    fn bucket_exists(&self, bucket: &str) -> StoreFuture<'_, bool>;

    /// Create `bucket`.  Creating a bucket this client already owns is not
    /// an error.
    fn make_bucket(&self, bucket: &str) -> StoreFuture<'_, ()>;

    /// Write `data` to `key` in `bucket`, replacing any existing object, and
    /// return the object's quoted MD5 ETag.
    fn put_object(&self, bucket: &str, key: &str, data: Bytes) -> StoreFuture<'_, String>;
}

/// Builds client handles.
pub trait Connect: Send + Sync + 'static {
    /// Make a single attempt at constructing a handle.
    fn connect(&self) -> StoreFuture<'_, Box<dyn ObjectStore>>;

    /// Endpoint description for logs.
    fn endpoint(&self) -> String;
}

/// Quoted hex MD5 of `data`, the ETag S3 reports for single-part uploads.
pub fn compute_etag(data: &[u8]) -> String {
    use md5::{Digest, Md5};
    let mut hasher = Md5::new();
    hasher.update(data);
    format!("\"{}\"", hex::encode(hasher.finalize()))
}
