use std::{future::Future, time::Duration};

use crate::error::{HseqError, HseqResult};

/// Bounds a store call. An elapsed deadline is reported as
/// `HseqError::Timeout`, which callers treat like any other retryable store
/// failure. The underlying task may still complete on the database thread.
pub(crate) async fn with_timeout<T, F>(
    operation: &'static str,
    limit: Duration,
    future: F,
) -> HseqResult<T>
where
    F: Future<Output = anyhow::Result<T>>,
{
    match tokio::time::timeout(limit, future).await {
        Ok(result) => result.map_err(HseqError::from),
        Err(_) => Err(HseqError::Timeout { operation }),
    }
}
