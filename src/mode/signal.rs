/// One-shot rendezvous event
/// Set once, awaited by any number of waiters, including ones that start
/// waiting after it was set.

use tokio::sync::watch;

#[derive(Debug)]
pub struct Signal {
    tx: watch::Sender<bool>,
}

impl Default for Signal {
    fn default() -> Self {
        Self::new()
    }
}

impl Signal {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx }
    }

    /// Release all current and future waiters. Setting twice is harmless.
    pub fn set(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_set(&self) -> bool {
        *self.tx.borrow()
    }

    pub async fn wait(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives in `self`, so the channel cannot close while
        // this borrow is held.
        let _ = rx.wait_for(|set| *set).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tokio_test::{assert_pending, assert_ready, task};

    #[test]
    fn test_wait_pending_until_set() {
        let sig = Signal::new();
        let mut fut = task::spawn(sig.wait());
        assert_pending!(fut.poll());
        sig.set();
        assert!(fut.is_woken());
        assert_ready!(fut.poll());
    }

    #[test]
    fn test_wait_after_set_is_ready() {
        let sig = Signal::new();
        sig.set();
        let mut fut = task::spawn(sig.wait());
        assert_ready!(fut.poll());
        assert!(sig.is_set());
    }

    #[test]
    fn test_set_twice() {
        let sig = Signal::new();
        sig.set();
        sig.set();
        let mut fut = task::spawn(sig.wait());
        assert_ready!(fut.poll());
    }

    #[tokio::test]
    async fn test_many_waiters_released() {
        let sig = Arc::new(Signal::new());
        let mut handles = Vec::new();
        for _ in 0..8 {
            let s = sig.clone();
            handles.push(tokio::spawn(async move { s.wait().await }));
        }
        tokio::task::yield_now().await;
        sig.set();
        for h in handles {
            h.await.unwrap();
        }
    }
}
