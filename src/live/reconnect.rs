//! Client reconnect policy for the push channel.
//!
//! Fixed 5 s delay between attempts — no exponential growth — and one
//! reconciling fetch on every attempt to patch events missed while
//! disconnected. An attempt that fails authentication with no viable
//! renewal is abandoned, not retried: retrying the same expired credential
//! forever would never succeed.

use super::TransportError;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Fixed delay between reconnect attempts.
pub const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Run the connect/reconnect loop until cancelled or authentication fails.
///
/// `reconcile` runs once per attempt (before the handshake) to re-fetch
/// authoritative feed/unread state. `connect` performs the handshake and
/// resolves when the connection closes:
/// - `Ok(())` or `Err(Closed)`/`Err(Io)` → wait [`RECONNECT_DELAY`], retry
/// - `Err(Auth)` → abandon the loop and surface the error
///
/// Cancellation resolves to `Ok(())` without another attempt.
pub async fn run_reconnect_loop<R, RFut, C, CFut>(
    cancel: CancellationToken,
    mut reconcile: R,
    mut connect: C,
) -> Result<(), TransportError>
where
    R: FnMut() -> RFut,
    RFut: Future<Output = ()>,
    C: FnMut() -> CFut,
    CFut: Future<Output = Result<(), TransportError>>,
{
    loop {
        if cancel.is_cancelled() {
            return Ok(());
        }

        reconcile().await;

        match connect().await {
            Err(TransportError::Auth) => {
                debug!("push handshake rejected with no viable renewal — abandoning");
                return Err(TransportError::Auth);
            }
            Ok(()) => debug!("push channel closed cleanly — reconnecting"),
            Err(e) => debug!(error = %e, "push channel failed — reconnecting"),
        }

        tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            _ = tokio::time::sleep(RECONNECT_DELAY) => {}
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::time::Instant;

    #[tokio::test(start_paused = true)]
    async fn test_fixed_delay_between_attempts() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let reconciles = Arc::new(AtomicUsize::new(0));
        let cancel = CancellationToken::new();

        let a = attempts.clone();
        let r = reconciles.clone();
        let c = cancel.clone();
        let started = Instant::now();

        let task = tokio::spawn(async move {
            run_reconnect_loop(
                c,
                move || {
                    let r = r.clone();
                    async move {
                        r.fetch_add(1, Ordering::SeqCst);
                    }
                },
                move || {
                    let a = a.clone();
                    async move {
                        a.fetch_add(1, Ordering::SeqCst);
                        Err(TransportError::Closed)
                    }
                },
            )
            .await
        });

        // Attempts at t=0, 5, 10 — fixed 5 s spacing, no growth
        tokio::time::sleep(Duration::from_secs(12)).await;
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        assert_eq!(
            reconciles.load(Ordering::SeqCst),
            3,
            "one reconciling fetch per attempt"
        );
        assert!(started.elapsed() >= Duration::from_secs(12));

        cancel.cancel();
        assert!(task.await.unwrap().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_auth_failure_abandons_loop() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let cancel = CancellationToken::new();

        let a = attempts.clone();
        let result = run_reconnect_loop(
            cancel,
            || async {},
            move || {
                let a = a.clone();
                async move {
                    let n = a.fetch_add(1, Ordering::SeqCst);
                    if n == 0 {
                        Err(TransportError::Closed)
                    } else {
                        Err(TransportError::Auth)
                    }
                }
            },
        )
        .await;

        assert_eq!(result, Err(TransportError::Auth));
        assert_eq!(
            attempts.load(Ordering::SeqCst),
            2,
            "no retry after auth failure"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_during_backoff() {
        let cancel = CancellationToken::new();
        let c = cancel.clone();

        let task = tokio::spawn(async move {
            run_reconnect_loop(c, || async {}, || async { Err(TransportError::Closed) }).await
        });

        // Cancel mid-backoff: the loop must exit without another attempt
        tokio::time::sleep(Duration::from_secs(2)).await;
        cancel.cancel();
        assert!(task.await.unwrap().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_pre_cancelled_runs_nothing() {
        let cancel = CancellationToken::new();
        cancel.cancel();

        let attempts = Arc::new(AtomicUsize::new(0));
        let a = attempts.clone();
        let result = run_reconnect_loop(cancel, || async {}, move || {
            let a = a.clone();
            async move {
                a.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        })
        .await;

        assert!(result.is_ok());
        assert_eq!(attempts.load(Ordering::SeqCst), 0);
    }
}
