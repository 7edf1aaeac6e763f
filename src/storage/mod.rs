//! Object store clients.
//!
//! The [`backend::ObjectStore`] and [`backend::Connect`] traits abstract over
//! the store the sidecar ships to.  [`aws`] talks to any S3-compatible
//! endpoint; [`memory`] keeps objects in process for tests.

pub mod aws;
pub mod backend;
pub mod memory;

pub use backend::{Connect, ObjectStore};
