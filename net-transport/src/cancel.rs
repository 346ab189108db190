//! Cancellation helpers shared by every worker loop.
//!
//! Each open client or server owns one [`CancellationToken`].  Every blocking
//! step (connect, accept, read, write, sleep) is raced against that token so
//! that `disconnect()` / `close()` interrupts it promptly.

use std::future::Future;
use std::time::Duration;

pub use tokio_util::sync::CancellationToken;

use crate::error::TransportError;

/// Run `fut` until it completes or `token` is cancelled.
///
/// Cancellation wins ties.
pub async fn cancellable<F, T, E>(token: &CancellationToken, fut: F) -> Result<T, TransportError>
where
    F: Future<Output = Result<T, E>>,
    E: Into<TransportError>,
{
    tokio::select! {
        biased;
        _ = token.cancelled() => Err(TransportError::Cancelled),
        res = fut => res.map_err(Into::into),
    }
}

/// Sleep for `dur` unless cancelled first.  Returns `false` on cancellation.
pub async fn sleep_or_cancel(token: &CancellationToken, dur: Duration) -> bool {
    tokio::select! {
        biased;
        _ = token.cancelled() => false,
        _ = tokio::time::sleep(dur) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[tokio::test]
    async fn completes_when_not_cancelled() {
        let token = CancellationToken::new();
        let v = cancellable(&token, async { Ok::<_, io::Error>(5) }).await.unwrap();
        assert_eq!(v, 5);
    }

    #[tokio::test]
    async fn cancelled_token_interrupts_pending_future() {
        let token = CancellationToken::new();
        let t = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            t.cancel();
        });
        let err = cancellable(&token, std::future::pending::<io::Result<()>>())
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
    }

    #[tokio::test]
    async fn sleep_reports_cancellation() {
        let token = CancellationToken::new();
        assert!(sleep_or_cancel(&token, Duration::from_millis(1)).await);
        token.cancel();
        assert!(!sleep_or_cancel(&token, Duration::from_secs(60)).await);
    }
}
