//! Deadlines for store calls.

use std::future::Future;
use std::time::Duration;

use crate::error::{Result, StoreError};

/// Runs a store future, failing with `StoreError::Timeout` once `timeout` expires.
pub async fn with_deadline<T, F>(timeout: Duration, op: &'static str, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(StoreError::Timeout {
            op,
            timeout_ms: timeout.as_millis() as u64,
        }),
    }
}
