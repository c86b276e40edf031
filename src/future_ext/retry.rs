//! `withRetry`: a bounded retry combinator (spec §4.1).
//!
//! Generalizes the retry-count concept already present in the teacher's
//! `ConnectionPoolConfig::max_retries` (there, hard-coded to connection
//! creation) into a combinator over any fallible async action.

use std::future::Future;

/// Invokes `action` repeatedly until it succeeds or `retries` extra attempts
/// have been made (total attempts = `retries + 1`). Between attempts, awaits
/// `cleanup` if provided. Returns the first success, or the last error.
pub async fn with_retry<T, E, F, Fut, C, CFut>(retries: usize, mut action: F, mut cleanup: Option<C>) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    C: FnMut(&E) -> CFut,
    CFut: Future<Output = ()>,
{
    let mut attempt = 0;
    loop {
        match action().await {
            Ok(v) => return Ok(v),
            Err(e) => {
                if attempt >= retries {
                    return Err(e);
                }
                if let Some(cleanup) = cleanup.as_mut() {
                    cleanup(&e).await;
                }
                attempt += 1;
            }
        }
    }
}
