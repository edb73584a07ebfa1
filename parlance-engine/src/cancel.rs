//! Composable cancellation scopes.
//!
//! A scope is cancelled explicitly, when its parent is cancelled, or when
//! its deadline expires. Every long-running operation in the engine takes a
//! scope and must stop within one network round-trip of cancellation.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

struct Inner {
    flag: watch::Sender<bool>,
    deadline: Option<Instant>,
    parent: Option<CancelScope>,
}

/// Cancellation scope handle; clones observe the same scope.
#[derive(Clone)]
pub struct CancelScope {
    inner: Arc<Inner>,
}

impl CancelScope {
    /// Root scope without a deadline.
    pub fn new() -> Self {
        Self::build(None, None)
    }

    /// Root scope expiring at `deadline`.
    pub fn with_deadline(deadline: std::time::Instant) -> Self {
        Self::build(Some(Instant::from_std(deadline)), None)
    }

    /// Child scope: cancelled with this scope, its parent chain, or its own
    /// deadline, whichever comes first.
    pub fn child(&self) -> Self {
        Self::build(None, Some(self.clone()))
    }

    /// Child scope with its own deadline.
    pub fn child_with_deadline(&self, deadline: std::time::Instant) -> Self {
        Self::build(Some(Instant::from_std(deadline)), Some(self.clone()))
    }

    /// Child scope expiring after `timeout`.
    pub fn child_with_timeout(&self, timeout: Duration) -> Self {
        Self::build(Some(Instant::now() + timeout), Some(self.clone()))
    }

    fn build(deadline: Option<Instant>, parent: Option<CancelScope>) -> Self {
        let (flag, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                flag,
                deadline,
                parent,
            }),
        }
    }

    /// Cancel this scope and every child derived from it.
    pub fn cancel(&self) {
        let _ = self.inner.flag.send(true);
    }

    /// Whether the scope is cancelled, directly, via a parent, or by
    /// deadline.
    pub fn is_cancelled(&self) -> bool {
        if *self.inner.flag.borrow() {
            return true;
        }
        if self
            .inner
            .deadline
            .is_some_and(|deadline| Instant::now() >= deadline)
        {
            return true;
        }
        self.inner
            .parent
            .as_ref()
            .is_some_and(CancelScope::is_cancelled)
    }

    /// Resolve when the scope is cancelled.
    pub async fn cancelled(&self) {
        if self.is_cancelled() {
            return;
        }
        let mut own = self.inner.flag.subscribe();
        let deadline_sleep = async {
            match self.inner.deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending().await,
            }
        };
        let parent_cancelled = async {
            match &self.inner.parent {
                Some(parent) => Box::pin(parent.cancelled()).await,
                None => std::future::pending().await,
            }
        };
        tokio::select! {
            _ = async {
                loop {
                    if *own.borrow() {
                        break;
                    }
                    if own.changed().await.is_err() {
                        std::future::pending::<()>().await;
                    }
                }
            } => {}
            _ = deadline_sleep => {}
            _ = parent_cancelled => {}
        }
    }

    /// Run `future` under this scope; `None` when cancelled first.
    pub async fn run<F, T>(&self, future: F) -> Option<T>
    where
        F: std::future::Future<Output = T>,
    {
        tokio::select! {
            result = future => Some(result),
            _ = self.cancelled() => None,
        }
    }
}

impl Default for CancelScope {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CancelScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelScope")
            .field("cancelled", &self.is_cancelled())
            .field("deadline", &self.inner.deadline)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_explicit_cancel() {
        let scope = CancelScope::new();
        assert!(!scope.is_cancelled());
        scope.cancel();
        assert!(scope.is_cancelled());
        scope.cancelled().await; // resolves immediately
    }

    #[tokio::test]
    async fn test_parent_cancels_children() {
        let parent = CancelScope::new();
        let child = parent.child();
        let grandchild = child.child();
        parent.cancel();
        assert!(child.is_cancelled());
        assert!(grandchild.is_cancelled());
    }

    #[tokio::test]
    async fn test_child_cancel_leaves_parent() {
        let parent = CancelScope::new();
        let child = parent.child();
        child.cancel();
        assert!(!parent.is_cancelled());
        assert!(child.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_expiry() {
        let scope =
            CancelScope::new().child_with_timeout(Duration::from_secs(5));
        assert!(!scope.is_cancelled());
        tokio::time::sleep(Duration::from_secs(6)).await;
        assert!(scope.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_stops_on_cancel() {
        let scope = CancelScope::new();
        let inner = scope.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            inner.cancel();
        });
        let result = scope
            .run(tokio::time::sleep(Duration::from_secs(3600)))
            .await;
        assert!(result.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_waits_for_parent() {
        let parent = CancelScope::new();
        let child = parent.child();
        let waiter = tokio::spawn(async move { child.cancelled().await });
        tokio::time::sleep(Duration::from_millis(5)).await;
        parent.cancel();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("child must observe parent cancellation")
            .unwrap();
    }
}
