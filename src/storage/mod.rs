//! Storage backends for the key-value table
//!
//! The frontend only sees the [`Backend`] trait. [`SqlBackend`] is the real
//! SQLite store; [`FailingBackend`] always errors and exists for exercising
//! error propagation.

pub mod failing;
pub mod migrations;
pub mod sql;

pub use failing::FailingBackend;
pub use sql::SqlBackend;

use crate::common::Result;

/// Point-lookup/upsert store keyed by `i64`.
///
/// Implementations must be safe to call concurrently from independent
/// requests; per-call atomicity is the backend's job.
#[tonic::async_trait]
pub trait Backend: Send + Sync {
    /// Insert or replace the value for `key`.
    async fn put(&self, key: i64, value: &str) -> Result<()>;

    /// Current value for `key`, or [`crate::Error::NotFound`].
    async fn get(&self, key: i64) -> Result<String>;

    /// Release underlying resources. Later calls are a no-op.
    async fn close(&self) -> Result<()>;
}
