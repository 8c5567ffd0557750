//! Cooperative cancellation shared between a session handle and its worker.
//!
//! A [`CancelHandle`] is held by whoever owns the session; each read on the
//! worker side is raced against a [`CancelToken`]. Dropping the handle cancels.

use tokio::sync::watch;

pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

#[derive(Debug, Clone)]
pub struct CancelToken {
    rx: watch::Receiver<bool>,
}

pub fn cancel_pair() -> (CancelHandle, CancelToken) {
    let (tx, rx) = watch::channel(false);
    (CancelHandle { tx }, CancelToken { rx })
}

impl CancelHandle {
    /// Signals cancellation. Returns false when it was already signalled.
    pub fn cancel(&self) -> bool {
        self.tx.send_if_modified(|cancelled| {
            if *cancelled {
                false
            } else {
                *cancelled = true;
                true
            }
        })
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }
}

impl Drop for CancelHandle {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl CancelToken {
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once cancellation is signalled or the handle is gone.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        // `wait_for` errors only when the sender is dropped, which also means cancelled.
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn token_observes_cancel() {
        let (handle, token) = cancel_pair();
        assert!(!token.is_cancelled());

        assert!(handle.cancel());
        assert!(!handle.cancel());
        assert!(token.is_cancelled());

        tokio::time::timeout(Duration::from_secs(1), token.cancelled())
            .await
            .expect("cancelled future should resolve");
    }

    #[tokio::test]
    async fn dropping_handle_cancels_token() {
        let (handle, token) = cancel_pair();
        drop(handle);

        tokio::time::timeout(Duration::from_secs(1), token.cancelled())
            .await
            .expect("dropped handle should cancel");
    }
}
