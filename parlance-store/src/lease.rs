//! Distributed leases over conditional key-value writes.
//!
//! At most one worker holds the lease for a key at a time. Acquisition is a
//! `set_if_absent` with TTL; renewal and release assert the holder's token
//! so a lease that expired and was re-acquired elsewhere cannot be touched
//! by the previous holder.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use parlance_core::{CallId, EntityIdType, LeaseError, LeaseId, PhoneNumber};

use crate::KeyValueStore;

/// Lease key for one call.
pub fn lease_key_call(id: CallId) -> String {
    format!("call:{id}")
}

/// Lease key for schema-level work on a caller.
pub fn lease_key_schema(phone_number: &PhoneNumber) -> String {
    format!("claim_schema:{phone_number}")
}

/// An acquired lease. Only the manager that granted it can renew or
/// release it, and only while the token still matches.
#[derive(Debug, Clone)]
pub struct Lease {
    pub key: String,
    pub token: LeaseId,
    pub ttl: Duration,
}

/// Grants, renews, and releases leases.
#[derive(Clone)]
pub struct LeaseManager {
    kv: Arc<dyn KeyValueStore>,
}

impl LeaseManager {
    pub fn new(kv: Arc<dyn KeyValueStore>) -> Self {
        Self { kv }
    }

    /// Try to acquire the lease for `key`.
    pub async fn acquire(&self, key: &str, ttl: Duration) -> Result<Lease, LeaseError> {
        let token = LeaseId::new_v4();
        let won = self
            .kv
            .set_if_absent(key, &token.to_string(), Some(ttl))
            .await;
        if won {
            tracing::debug!(%key, %token, "lease acquired");
            Ok(Lease {
                key: key.to_string(),
                token,
                ttl,
            })
        } else {
            Err(LeaseError::Busy {
                key: key.to_string(),
            })
        }
    }

    /// Re-assert ownership, extending the TTL.
    pub async fn renew(&self, lease: &Lease) -> Result<(), LeaseError> {
        let token = lease.token.to_string();
        let renewed = self
            .kv
            .compare_and_swap(&lease.key, &token, &token, Some(lease.ttl))
            .await;
        if renewed {
            Ok(())
        } else {
            Err(LeaseError::Lost {
                key: lease.key.clone(),
            })
        }
    }

    /// Release the lease if still held; a lost lease releases as a no-op.
    pub async fn release(&self, lease: &Lease) {
        let released = self
            .kv
            .compare_and_delete(&lease.key, &lease.token.to_string())
            .await;
        if !released {
            tracing::warn!(key = %lease.key, "lease already lost at release");
        }
    }
}

/// Background renewal of one lease at ttl/2 intervals.
///
/// When a renewal fails the keeper flips its `lost` channel and stops; the
/// call scope watches that channel and aborts in-flight mutations.
pub struct LeaseKeeper {
    handle: JoinHandle<()>,
    lost: watch::Receiver<bool>,
}

impl LeaseKeeper {
    pub fn spawn(manager: LeaseManager, lease: Lease) -> Self {
        let (lost_tx, lost_rx) = watch::channel(false);
        let interval = lease.ttl / 2;
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick completes immediately; skip it
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if let Err(e) = manager.renew(&lease).await {
                    tracing::warn!(key = %lease.key, error = %e, "lease renewal failed");
                    let _ = lost_tx.send(true);
                    return;
                }
            }
        });
        Self {
            handle,
            lost: lost_rx,
        }
    }

    /// Channel flipping to true when the lease is lost.
    pub fn lost(&self) -> watch::Receiver<bool> {
        self.lost.clone()
    }

    /// Whether the lease is currently lost.
    pub fn is_lost(&self) -> bool {
        *self.lost.borrow()
    }

    /// Stop renewing.
    pub fn stop(&self) {
        self.handle.abort();
    }
}

impl Drop for LeaseKeeper {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryKeyValue;

    fn manager() -> LeaseManager {
        LeaseManager::new(Arc::new(MemoryKeyValue::new()))
    }

    #[tokio::test]
    async fn test_acquire_is_exclusive() {
        let manager = manager();
        let lease = manager
            .acquire("call:abc", Duration::from_secs(60))
            .await
            .unwrap();
        let second = manager.acquire("call:abc", Duration::from_secs(60)).await;
        assert!(matches!(second, Err(LeaseError::Busy { .. })));
        manager.release(&lease).await;
        assert!(manager
            .acquire("call:abc", Duration::from_secs(60))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_expired_lease_can_be_reacquired() {
        let manager = manager();
        let _old = manager
            .acquire("call:abc", Duration::from_millis(10))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(manager
            .acquire("call:abc", Duration::from_secs(60))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_renew_extends_and_detects_loss() {
        let manager = manager();
        let lease = manager
            .acquire("call:abc", Duration::from_millis(50))
            .await
            .unwrap();
        manager.renew(&lease).await.unwrap();

        // Let it expire and be taken by someone else
        tokio::time::sleep(Duration::from_millis(80)).await;
        let _thief = manager
            .acquire("call:abc", Duration::from_secs(60))
            .await
            .unwrap();
        let err = manager.renew(&lease).await.unwrap_err();
        assert!(matches!(err, LeaseError::Lost { .. }));
    }

    #[tokio::test]
    async fn test_release_requires_matching_token() {
        let manager = manager();
        let lease = manager
            .acquire("call:abc", Duration::from_millis(10))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        let thief = manager
            .acquire("call:abc", Duration::from_secs(60))
            .await
            .unwrap();

        // Old holder's release must not evict the new holder
        manager.release(&lease).await;
        let still_held = manager.acquire("call:abc", Duration::from_secs(60)).await;
        assert!(matches!(still_held, Err(LeaseError::Busy { .. })));
        manager.release(&thief).await;
    }

    #[tokio::test]
    async fn test_keeper_signals_loss() {
        let manager = manager();
        let lease = manager
            .acquire("call:abc", Duration::from_millis(40))
            .await
            .unwrap();
        // Steal the key out from under the keeper
        manager.kv.delete("call:abc").await;
        manager
            .kv
            .set("call:abc", "someone-else", None)
            .await;

        let keeper = LeaseKeeper::spawn(manager.clone(), lease);
        let mut lost = keeper.lost();
        tokio::time::timeout(Duration::from_millis(500), lost.changed())
            .await
            .expect("keeper should signal loss")
            .unwrap();
        assert!(keeper.is_lost());
    }

    #[tokio::test]
    async fn test_no_overlapping_holders() {
        // For any two grants of the same key, one must be released or
        // expired before the other is acquired.
        let manager = manager();
        let lease = manager
            .acquire("call:xyz", Duration::from_secs(60))
            .await
            .unwrap();
        for _ in 0..5 {
            assert!(manager
                .acquire("call:xyz", Duration::from_secs(60))
                .await
                .is_err());
        }
        manager.release(&lease).await;
    }
}
