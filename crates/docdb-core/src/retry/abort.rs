//! Cancellation of in-flight retry loops.

use tokio::sync::watch;

/// Owner side of an abort signal. Dropping the handle without calling
/// [`abort`](Self::abort) leaves every signal pending forever.
#[derive(Debug)]
pub struct AbortHandle {
    tx: watch::Sender<bool>,
}

/// Observer side of an abort signal, cheap to clone into every retry layer.
#[derive(Debug, Clone)]
pub struct AbortSignal {
    rx: watch::Receiver<bool>,
}

impl AbortHandle {
    /// Create a handle with no signals attached yet.
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx }
    }

    /// Hand out a signal tied to this handle.
    pub fn signal(&self) -> AbortSignal {
        AbortSignal {
            rx: self.tx.subscribe(),
        }
    }

    /// Abort every retry loop observing this handle.
    pub fn abort(&self) {
        self.tx.send_replace(true);
    }
}

impl Default for AbortHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl AbortSignal {
    /// Returns `true` once the owning handle has aborted.
    pub fn is_aborted(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves when the owning handle aborts.
    pub async fn aborted(&mut self) {
        if self.rx.wait_for(|aborted| *aborted).await.is_err() {
            // handle dropped without aborting
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_signal_observes_abort() {
        let handle = AbortHandle::new();
        let mut signal = handle.signal();
        assert!(!signal.is_aborted());

        handle.abort();
        assert!(signal.is_aborted());
        tokio::time::timeout(Duration::from_secs(1), signal.aborted())
            .await
            .expect("signal should resolve after abort");
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_handle_never_fires() {
        let handle = AbortHandle::new();
        let mut signal = handle.signal();
        drop(handle);

        let waited = tokio::time::timeout(Duration::from_secs(60), signal.aborted()).await;
        assert!(waited.is_err());
    }
}
