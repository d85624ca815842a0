//! One-shot shutdown signal shared by the orchestrator, the Source, the Sink
//! and the binary's signal handler.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;

/// Cloneable handle to a single shutdown signal. Once triggered it stays
/// triggered.
#[derive(Debug, Clone, Default)]
pub struct ShutdownToken {
    inner: Arc<ShutdownInner>,
}

#[derive(Debug, Default)]
struct ShutdownInner {
    fired: AtomicBool,
    notify: Notify,
}

impl ShutdownToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fire the signal. Returns `true` only for the call that fired it.
    pub fn trigger(&self) -> bool {
        let first = !self.inner.fired.swap(true, Ordering::AcqRel);
        if first {
            self.inner.notify.notify_waiters();
        }
        first
    }

    pub fn is_triggered(&self) -> bool {
        self.inner.fired.load(Ordering::Acquire)
    }

    /// Resolves once the signal has fired. Cancel-safe.
    pub async fn cancelled(&self) {
        let notified = self.inner.notify.notified();
        tokio::pin!(notified);
        // Register before checking the flag so a concurrent trigger is not missed
        notified.as_mut().enable();
        if self.is_triggered() {
            return;
        }
        notified.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_trigger_is_one_shot() {
        let token = ShutdownToken::new();
        assert!(!token.is_triggered());
        assert!(token.trigger());
        assert!(!token.trigger());
        assert!(token.clone().is_triggered());
    }

    #[tokio::test]
    async fn test_cancelled_after_trigger_resolves_immediately() {
        let token = ShutdownToken::new();
        token.trigger();
        tokio::time::timeout(Duration::from_millis(50), token.cancelled())
            .await
            .expect("already-fired token should resolve");
    }

    #[tokio::test]
    async fn test_waiters_are_woken() {
        let token = ShutdownToken::new();
        let waiter = {
            let token = token.clone();
            tokio::spawn(async move { token.cancelled().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        token.trigger();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should wake")
            .unwrap();
    }
}
