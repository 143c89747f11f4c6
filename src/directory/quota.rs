//! Quota Guard
//!
//! Validates a provisioning request against the owner's remaining store
//! count and storage budget before anything touches the cluster.

use crate::domain::ports::{Owner, OwnerId, OwnerUsage, StoreDirectoryRef};
use crate::error::{Error, QuotaViolation, Result};
use tracing::debug;

/// Storage accounted for a store: application tier plus database tier
pub fn requested_storage(app_storage_gi: u32, database_storage_gi: u32) -> u32 {
    app_storage_gi.saturating_add(database_storage_gi)
}

/// Decide whether `owner` can take on another store of `requested_gi`
pub fn evaluate_quota(
    owner: &Owner,
    usage: OwnerUsage,
    requested_gi: u32,
) -> std::result::Result<(), QuotaViolation> {
    if usage.store_count >= owner.max_stores {
        return Err(QuotaViolation::StoreLimitReached {
            current: usage.store_count,
            max: owner.max_stores,
        });
    }

    if usage.total_storage_gi.saturating_add(requested_gi) > owner.max_storage_gi {
        return Err(QuotaViolation::StorageQuotaExceeded {
            used: usage.total_storage_gi,
            requested: requested_gi,
            max: owner.max_storage_gi,
        });
    }

    Ok(())
}

/// Read-only quota check against the store directory
#[derive(Clone)]
pub struct QuotaGuard {
    directory: StoreDirectoryRef,
}

impl QuotaGuard {
    pub fn new(directory: StoreDirectoryRef) -> Self {
        Self { directory }
    }

    /// Check that `owner_id` may provision `requested_gi` more storage.
    /// Returns the owner on success.
    pub async fn check_quota(&self, owner_id: OwnerId, requested_gi: u32) -> Result<Owner> {
        let owner = self
            .directory
            .get_owner(owner_id)
            .await?
            .ok_or(Error::OwnerNotFound { owner_id })?;
        let usage = self.directory.owner_usage(owner_id).await?;

        debug!(
            owner_id,
            stores = usage.store_count,
            storage_gi = usage.total_storage_gi,
            requested_gi,
            "Checking quota"
        );

        evaluate_quota(&owner, usage, requested_gi)?;
        Ok(owner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::store::JsonStoreDirectory;
    use crate::domain::ports::{NewStore, StoreDirectory};
    use assert_matches::assert_matches;
    use std::sync::Arc;

    fn owner(max_stores: u32, max_storage_gi: u32) -> Owner {
        Owner {
            id: 7,
            username: "demo_user".into(),
            password_hash: "x".into(),
            max_stores,
            max_storage_gi,
        }
    }

    #[test]
    fn test_requested_storage_adds_database_overhead() {
        assert_eq!(requested_storage(3, 2), 5);
        assert_eq!(requested_storage(u32::MAX, 2), u32::MAX);
    }

    #[test]
    fn test_store_limit() {
        let usage = OwnerUsage {
            store_count: 2,
            total_storage_gi: 4,
        };
        assert_eq!(
            evaluate_quota(&owner(2, 100), usage, 1),
            Err(QuotaViolation::StoreLimitReached { current: 2, max: 2 })
        );
    }

    #[test]
    fn test_storage_limit_is_inclusive() {
        let usage = OwnerUsage {
            store_count: 1,
            total_storage_gi: 5,
        };
        assert_eq!(evaluate_quota(&owner(3, 10), usage, 5), Ok(()));
        assert_eq!(
            evaluate_quota(&owner(3, 10), usage, 6),
            Err(QuotaViolation::StorageQuotaExceeded {
                used: 5,
                requested: 6,
                max: 10
            })
        );
    }

    #[tokio::test]
    async fn test_guard_reads_directory() {
        let directory = Arc::new(JsonStoreDirectory::in_memory());
        directory.insert_owner(owner(2, 10)).await.unwrap();
        let guard = QuotaGuard::new(directory.clone());

        assert_matches!(
            guard.check_quota(99, 1).await,
            Err(Error::OwnerNotFound { owner_id: 99 })
        );

        assert_eq!(guard.check_quota(7, 5).await.unwrap().username, "demo_user");

        directory
            .reserve_store(NewStore {
                id: "aaaa0001".into(),
                owner_id: 7,
                name: "first".into(),
                hostname: "store-aaaa0001.local".into(),
                storage_size_gi: 5,
            })
            .await
            .unwrap();

        assert_matches!(
            guard.check_quota(7, 8).await,
            Err(Error::QuotaExceeded(QuotaViolation::StorageQuotaExceeded { .. }))
        );
        assert!(guard.check_quota(7, 5).await.is_ok());
    }
}
