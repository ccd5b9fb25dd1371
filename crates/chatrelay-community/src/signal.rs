//! The one-shot "done" signal every hierarchy node stops on.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio_util::sync::CancellationToken;

/// A broadcast stop signal that fires at most once.
///
/// Firing wakes every waiter, past and future. Clones share the same
/// signal, so a control loop and its owner can each hold one.
#[derive(Debug, Clone, Default)]
pub struct DoneSignal {
    token: CancellationToken,
    fired: Arc<AtomicBool>,
}

impl DoneSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fires the signal.
    ///
    /// Returns `true` for the caller that actually fired it and `false`
    /// for everyone after, so owners can report a second shutdown.
    pub fn fire(&self) -> bool {
        if self.fired.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.token.cancel();
        true
    }

    pub fn is_fired(&self) -> bool {
        self.fired.load(Ordering::Acquire)
    }

    /// Resolves once the signal has fired.
    pub async fn wait(&self) {
        self.token.cancelled().await
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn test_fire_only_first_call_succeeds() {
        let done = DoneSignal::new();
        assert!(!done.is_fired());
        assert!(done.fire());
        assert!(!done.fire());
        assert!(done.is_fired());
    }

    #[tokio::test]
    async fn test_fire_wakes_every_waiter() {
        let done = DoneSignal::new();
        let waiters: Vec<_> = (0..8)
            .map(|_| {
                let done = done.clone();
                tokio::spawn(async move { done.wait().await })
            })
            .collect();

        done.fire();

        for waiter in waiters {
            tokio::time::timeout(Duration::from_secs(5), waiter)
                .await
                .expect("waiter did not wake")
                .unwrap();
        }
    }

    #[tokio::test]
    async fn test_wait_after_fire_returns_immediately() {
        let done = DoneSignal::new();
        done.fire();
        tokio::time::timeout(Duration::from_millis(100), done.wait())
            .await
            .expect("late waiter should not block");
    }
}
