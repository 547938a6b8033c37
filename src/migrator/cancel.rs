//! Run cancellation
//!
//! [`CancelHandle::cancel`] is called from the signal handler in `main`; each
//! orchestrator phase races against the matching [`CancelSignal`].

use std::future::Future;

use tokio::sync::watch;

use crate::error::{MigrateError, Result};

/// Raises the cancellation
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

/// Observes the cancellation
#[derive(Debug, Clone)]
pub struct CancelSignal {
    rx: watch::Receiver<bool>,
}

/// Create a connected handle and signal
pub fn cancel_pair() -> (CancelHandle, CancelSignal) {
    let (tx, rx) = watch::channel(false);
    (CancelHandle { tx }, CancelSignal { rx })
}

impl CancelHandle {
    /// Cancel the run; idempotent
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }
}

impl CancelSignal {
    /// A signal that is never raised
    pub fn never() -> Self {
        let (_, signal) = cancel_pair();
        signal
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once cancelled; pending forever if the handle is gone
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        if rx.wait_for(|cancelled| *cancelled).await.is_err() {
            std::future::pending::<()>().await;
        }
    }

    /// Run `fut` unless the signal fires first
    pub async fn guard<T, F>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        tokio::select! {
            biased;
            _ = self.cancelled() => Err(MigrateError::Cancelled("interrupted".to_string())),
            result = fut => result,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_guard_passes_result_through() {
        let signal = CancelSignal::never();
        let value = signal.guard(async { Ok(7) }).await.unwrap();
        assert_eq!(value, 7);
        assert!(!signal.is_cancelled());
    }

    #[tokio::test]
    async fn test_guard_aborts_pending_future() {
        let (handle, signal) = cancel_pair();

        let task = tokio::spawn(async move {
            signal
                .guard(async {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Ok(())
                })
                .await
        });

        tokio::task::yield_now().await;
        handle.cancel();

        let result = task.await.unwrap();
        assert!(matches!(result, Err(MigrateError::Cancelled(_))));
    }

    #[tokio::test]
    async fn test_cancel_before_start() {
        let (handle, signal) = cancel_pair();
        handle.cancel();
        handle.cancel();

        assert!(signal.is_cancelled());
        let result: Result<()> = signal.guard(async { Ok(()) }).await;
        assert!(matches!(result, Err(MigrateError::Cancelled(_))));
    }
}
