//! `withTimeout`: races a source future against a deadline and an optional
//! external cancellation token, with late-resolution cleanup hooks (spec
//! §4.1).
//!
//! Grounded on the teacher's `FutureExecutor::check_timeouts`/
//! `handle_timeouts` pair in `async_runtime/executor.rs` — there, a timed
//! out task is removed from the ready set but its outcome is still recorded
//! (`CompletedTask { result: PollResult::TimedOut(..), .. }`) rather than
//! silently dropped. `with_timeout` generalizes that idea: the abandoned
//! source future isn't dropped either, it keeps running to completion on a
//! spawned task so a caller-supplied cleanup hook can react to whatever it
//! eventually produces.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use crate::cancel::CancellationToken;
use crate::error::{AbortError, TimeoutError, TimeoutSourceLateRejection};

/// The three ways a raced future can settle.
#[derive(Debug, thiserror::Error)]
pub enum TimeoutOutcome<E> {
    #[error(transparent)]
    Timeout(#[from] TimeoutError),
    #[error(transparent)]
    Abort(#[from] AbortError),
    #[error(transparent)]
    Source(E),
}

type LateResolveHook<T> = Box<dyn FnOnce(T) + Send>;
type LateRejectHook<E> = Box<dyn FnOnce(TimeoutSourceLateRejection<E>) + Send>;

/// Options for [`with_timeout`]. `timeout` of `None` means "not finite":
/// the source is awaited unchanged (spec §4.1 step 1).
pub struct TimeoutOptions<T, E> {
    pub timeout: Option<Duration>,
    pub timeout_message: Option<String>,
    pub external_cancel: Option<CancellationToken>,
    pub cleanup_on_late_resolve: Option<LateResolveHook<T>>,
    pub cleanup_on_late_reject: Option<LateRejectHook<E>>,
}

impl<T, E> Default for TimeoutOptions<T, E> {
    fn default() -> Self {
        Self {
            timeout: None,
            timeout_message: None,
            external_cancel: None,
            cleanup_on_late_resolve: None,
            cleanup_on_late_reject: None,
        }
    }
}

impl<T, E> TimeoutOptions<T, E> {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout: Some(timeout), ..Self::default() }
    }

    pub fn with_external_cancel(mut self, token: CancellationToken) -> Self {
        self.external_cancel = Some(token);
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.timeout_message = Some(message.into());
        self
    }

    pub fn with_late_resolve_cleanup(mut self, hook: impl FnOnce(T) + Send + 'static) -> Self {
        self.cleanup_on_late_resolve = Some(Box::new(hook));
        self
    }

    pub fn with_late_reject_cleanup(mut self, hook: impl FnOnce(TimeoutSourceLateRejection<E>) + Send + 'static) -> Self {
        self.cleanup_on_late_reject = Some(Box::new(hook));
        self
    }
}

/// Races `source` against `opts.timeout` and `opts.external_cancel`. First
/// to settle wins; the loser (if it's the source) keeps running in the
/// background so its eventual outcome can still run a cleanup hook.
pub async fn with_timeout<T, E, Fut>(source: Fut, opts: TimeoutOptions<T, E>) -> Result<T, TimeoutOutcome<E>>
where
    Fut: Future<Output = Result<T, E>> + Send + 'static,
    T: Send + 'static,
    E: Send + 'static,
{
    let Some(timeout) = opts.timeout else {
        return source.await.map_err(TimeoutOutcome::Source);
    };
    let timeout_ms = timeout.as_millis() as u64;

    let mut source: Pin<Box<dyn Future<Output = Result<T, E>> + Send>> = Box::pin(source);
    let sleep = tokio::time::sleep(timeout);
    tokio::pin!(sleep);

    let external_cancel = opts.external_cancel.clone();
    let cancelled = async move {
        match &external_cancel {
            Some(token) => token.cancelled().await,
            None => std::future::pending::<()>().await,
        }
    };
    tokio::pin!(cancelled);

    tokio::select! {
        res = &mut source => {
            res.map_err(TimeoutOutcome::Source)
        }
        _ = &mut sleep => {
            let err = match &opts.timeout_message {
                Some(msg) => TimeoutError::with_message(timeout_ms, msg.clone()),
                None => TimeoutError::new(timeout_ms),
            };
            if let Some(token) = &opts.external_cancel {
                token.cancel(Some(err.message.clone()));
            }
            spawn_late_cleanup(source, opts.cleanup_on_late_resolve, opts.cleanup_on_late_reject);
            Err(TimeoutOutcome::Timeout(err))
        }
        _ = &mut cancelled => {
            let reason = opts.external_cancel.as_ref().and_then(CancellationToken::reason);
            let err = AbortError::new(reason);
            spawn_late_cleanup(source, opts.cleanup_on_late_resolve, opts.cleanup_on_late_reject);
            Err(TimeoutOutcome::Abort(err))
        }
    }
}

fn spawn_late_cleanup<T, E>(
    mut source: Pin<Box<dyn Future<Output = Result<T, E>> + Send>>,
    on_resolve: Option<LateResolveHook<T>>,
    on_reject: Option<LateRejectHook<E>>,
) where
    T: Send + 'static,
    E: Send + 'static,
{
    if on_resolve.is_none() && on_reject.is_none() {
        return;
    }
    tokio::spawn(async move {
        match source.as_mut().await {
            Ok(v) => {
                if let Some(hook) = on_resolve {
                    hook(v);
                }
            }
            Err(e) => {
                if let Some(hook) = on_reject {
                    hook(TimeoutSourceLateRejection { original: e });
                }
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[tokio::test]
    async fn no_timeout_returns_source_unchanged() {
        let opts: TimeoutOptions<u32, String> = TimeoutOptions::default();
        let result = with_timeout(async { Ok::<_, String>(7) }, opts).await;
        assert!(matches!(result, Ok(7)));
    }

    #[tokio::test(start_paused = true)]
    async fn timer_wins_produces_timeout_error() {
        let opts: TimeoutOptions<u32, String> = TimeoutOptions::new(Duration::from_millis(10));
        let result = with_timeout(
            async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok::<_, String>(1)
            },
            opts,
        )
        .await;
        assert!(matches!(result, Err(TimeoutOutcome::Timeout(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_wins_produces_abort_error() {
        let token = CancellationToken::new();
        let opts: TimeoutOptions<u32, String> = TimeoutOptions::new(Duration::from_secs(60)).with_external_cancel(token.clone());

        let handle = tokio::spawn(with_timeout(
            async {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok::<_, String>(1)
            },
            opts,
        ));

        tokio::time::sleep(Duration::from_millis(1)).await;
        token.cancel(Some("caller gave up".into()));

        let result = handle.await.unwrap();
        match result {
            Err(TimeoutOutcome::Abort(e)) => assert_eq!(e.reason.as_deref(), Some("caller gave up")),
            other => panic!("expected Abort, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn timer_win_fires_external_cancel() {
        let token = CancellationToken::new();
        let opts: TimeoutOptions<u32, String> = TimeoutOptions::new(Duration::from_millis(10)).with_external_cancel(token.clone());

        let _ = with_timeout(
            async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok::<_, String>(1)
            },
            opts,
        )
        .await;

        assert!(token.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn late_resolve_runs_cleanup_hook() {
        let cleaned = Arc::new(AtomicBool::new(false));
        let cleaned2 = cleaned.clone();

        let opts: TimeoutOptions<u32, String> = TimeoutOptions::new(Duration::from_millis(10)).with_late_resolve_cleanup(move |v| {
            assert_eq!(v, 99);
            cleaned2.store(true, Ordering::SeqCst);
        });

        let _ = with_timeout(
            async {
                tokio::time::sleep(Duration::from_millis(50)).await;
                Ok::<_, String>(99)
            },
            opts,
        )
        .await;

        tokio::time::sleep(Duration::from_millis(60)).await;
        tokio::task::yield_now().await;
        assert!(cleaned.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn late_reject_wraps_original_value() {
        let cleaned = Arc::new(AtomicBool::new(false));
        let cleaned2 = cleaned.clone();

        let opts: TimeoutOptions<u32, String> = TimeoutOptions::new(Duration::from_millis(10)).with_late_reject_cleanup(move |late: TimeoutSourceLateRejection<String>| {
            assert_eq!(late.original, "boom");
            cleaned2.store(true, Ordering::SeqCst);
        });

        let _ = with_timeout(
            async {
                tokio::time::sleep(Duration::from_millis(50)).await;
                Err::<u32, _>("boom".to_string())
            },
            opts,
        )
        .await;

        tokio::time::sleep(Duration::from_millis(60)).await;
        tokio::task::yield_now().await;
        assert!(cleaned.load(Ordering::SeqCst));
    }
}
