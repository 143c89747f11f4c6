//! JSON-backed Store Directory
//!
//! System of record for owners and stores. The whole directory is one JSON
//! document; every mutation is applied to a copy, written to disk via a
//! temporary file and rename, and only then made visible. A single async
//! mutex serializes mutations, which makes quota-check-and-register atomic.

use crate::directory::quota::evaluate_quota;
use crate::domain::ports::{
    NewStore, Owner, OwnerId, OwnerUsage, StoreDirectory, StoreRecord, StoreStatus,
    StoreWithOwner,
};
use crate::error::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, info};

// =============================================================================
// Persisted Layout
// =============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct DirectoryState {
    #[serde(default)]
    owners: BTreeMap<OwnerId, Owner>,
    #[serde(default)]
    stores: BTreeMap<String, StoreRecord>,
}

impl DirectoryState {
    fn usage(&self, owner_id: OwnerId) -> OwnerUsage {
        self.stores
            .values()
            .filter(|s| s.owner_id == owner_id && s.status.is_live())
            .fold(OwnerUsage::default(), |mut usage, s| {
                usage.store_count += 1;
                usage.total_storage_gi = usage.total_storage_gi.saturating_add(s.storage_size_gi);
                usage
            })
    }
}

// =============================================================================
// Directory
// =============================================================================

/// Store directory persisted as a JSON document (or kept in memory)
pub struct JsonStoreDirectory {
    state: Mutex<DirectoryState>,
    /// Backing file; `None` keeps the directory in memory only
    path: Option<PathBuf>,
}

impl JsonStoreDirectory {
    /// Directory that lives only in process memory
    pub fn in_memory() -> Self {
        Self {
            state: Mutex::new(DirectoryState::default()),
            path: None,
        }
    }

    /// Open (or create) a directory backed by the file at `path`
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();

        let state = match fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => DirectoryState::default(),
            Err(e) => return Err(e.into()),
        };

        info!(
            path = %path.display(),
            owners = state.owners.len(),
            stores = state.stores.len(),
            "Opened store directory"
        );

        Ok(Self {
            state: Mutex::new(state),
            path: Some(path),
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    async fn persist(&self, state: &DirectoryState) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await?;
        }

        let bytes = serde_json::to_vec_pretty(state)?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, &bytes).await.map_err(|e| {
            Error::Persistence(format!("writing {}: {}", tmp.display(), e))
        })?;
        fs::rename(&tmp, path).await.map_err(|e| {
            Error::Persistence(format!("replacing {}: {}", path.display(), e))
        })?;

        debug!(path = %path.display(), bytes = bytes.len(), "Persisted store directory");
        Ok(())
    }
}

#[async_trait]
impl StoreDirectory for JsonStoreDirectory {
    async fn get_owner(&self, owner_id: OwnerId) -> Result<Option<Owner>> {
        Ok(self.state.lock().await.owners.get(&owner_id).cloned())
    }

    async fn owner_usage(&self, owner_id: OwnerId) -> Result<OwnerUsage> {
        Ok(self.state.lock().await.usage(owner_id))
    }

    async fn reserve_store(&self, store: NewStore) -> Result<StoreRecord> {
        let mut state = self.state.lock().await;

        let owner = state
            .owners
            .get(&store.owner_id)
            .ok_or(Error::OwnerNotFound {
                owner_id: store.owner_id,
            })?;

        if state.stores.contains_key(&store.id) {
            return Err(Error::StoreExists { store_id: store.id });
        }

        evaluate_quota(owner, state.usage(store.owner_id), store.storage_size_gi)?;

        let record = StoreRecord {
            id: store.id.clone(),
            owner_id: store.owner_id,
            name: store.name,
            hostname: store.hostname,
            storage_size_gi: store.storage_size_gi,
            status: StoreStatus::Initialized,
            created_at: chrono::Utc::now(),
        };

        let mut next = state.clone();
        next.stores.insert(store.id, record.clone());
        self.persist(&next).await?;
        *state = next;

        info!(store_id = %record.id, owner_id = record.owner_id, storage_gi = record.storage_size_gi, "Registered store");
        Ok(record)
    }

    async fn update_store_status(&self, store_id: &str, status: StoreStatus) -> Result<()> {
        let mut state = self.state.lock().await;

        let current = state
            .stores
            .get(store_id)
            .map(|s| s.status)
            .ok_or_else(|| Error::NotFound {
                store_id: store_id.to_string(),
            })?;

        if !current.can_transition_to(status) {
            return Err(Error::InvalidStatusTransition {
                store_id: store_id.to_string(),
                from: current,
                to: status,
            });
        }
        if current == status {
            return Ok(());
        }

        let mut next = state.clone();
        if let Some(record) = next.stores.get_mut(store_id) {
            record.status = status;
        }
        self.persist(&next).await?;
        *state = next;

        debug!(store_id, from = %current, to = %status, "Store status updated");
        Ok(())
    }

    async fn deregister_store(&self, store_id: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        if !state.stores.contains_key(store_id) {
            return Ok(());
        }

        let mut next = state.clone();
        next.stores.remove(store_id);
        self.persist(&next).await?;
        *state = next;

        info!(store_id, "Deregistered store");
        Ok(())
    }

    async fn get_store(&self, store_id: &str) -> Result<Option<StoreRecord>> {
        Ok(self.state.lock().await.stores.get(store_id).cloned())
    }

    async fn list_stores_with_owners(&self) -> Result<BTreeMap<String, StoreWithOwner>> {
        let state = self.state.lock().await;
        Ok(state
            .stores
            .iter()
            .map(|(id, record)| {
                let owner_username = state
                    .owners
                    .get(&record.owner_id)
                    .map(|o| o.username.clone())
                    .unwrap_or_default();
                (
                    id.clone(),
                    StoreWithOwner {
                        record: record.clone(),
                        owner_username,
                    },
                )
            })
            .collect())
    }

    async fn insert_owner(&self, owner: Owner) -> Result<()> {
        let mut state = self.state.lock().await;
        let mut next = state.clone();
        info!(owner_id = owner.id, username = %owner.username, "Registering owner");
        next.owners.insert(owner.id, owner);
        self.persist(&next).await?;
        *state = next;
        Ok(())
    }

    async fn list_owners(&self) -> Result<Vec<Owner>> {
        Ok(self.state.lock().await.owners.values().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::QuotaViolation;
    use assert_matches::assert_matches;
    use std::sync::Arc;

    fn owner(id: OwnerId, max_stores: u32, max_storage_gi: u32) -> Owner {
        Owner {
            id,
            username: format!("owner-{}", id),
            password_hash: "hash".into(),
            max_stores,
            max_storage_gi,
        }
    }

    fn new_store(id: &str, owner_id: OwnerId, storage: u32) -> NewStore {
        NewStore {
            id: id.into(),
            owner_id,
            name: format!("store-{}", id),
            hostname: format!("store-{}.local", id),
            storage_size_gi: storage,
        }
    }

    #[tokio::test]
    async fn test_reserve_requires_owner() {
        let dir = JsonStoreDirectory::in_memory();
        assert_matches!(
            dir.reserve_store(new_store("s1", 1, 5)).await,
            Err(Error::OwnerNotFound { owner_id: 1 })
        );
    }

    #[tokio::test]
    async fn test_reserve_and_usage() {
        let dir = JsonStoreDirectory::in_memory();
        dir.insert_owner(owner(1, 2, 10)).await.unwrap();

        let record = dir.reserve_store(new_store("s1", 1, 5)).await.unwrap();
        assert_eq!(record.status, StoreStatus::Initialized);

        let usage = dir.owner_usage(1).await.unwrap();
        assert_eq!(usage, OwnerUsage { store_count: 1, total_storage_gi: 5 });

        assert_matches!(
            dir.reserve_store(new_store("s1", 1, 1)).await,
            Err(Error::StoreExists { .. })
        );
        assert_matches!(
            dir.reserve_store(new_store("s2", 1, 6)).await,
            Err(Error::QuotaExceeded(QuotaViolation::StorageQuotaExceeded { .. }))
        );
        dir.reserve_store(new_store("s2", 1, 5)).await.unwrap();
        assert_matches!(
            dir.reserve_store(new_store("s3", 1, 0)).await,
            Err(Error::QuotaExceeded(QuotaViolation::StoreLimitReached { current: 2, max: 2 }))
        );
    }

    #[tokio::test]
    async fn test_deleted_stores_release_quota() {
        let dir = JsonStoreDirectory::in_memory();
        dir.insert_owner(owner(1, 1, 10)).await.unwrap();
        dir.reserve_store(new_store("s1", 1, 5)).await.unwrap();
        dir.update_store_status("s1", StoreStatus::Deleted).await.unwrap();

        assert_eq!(dir.owner_usage(1).await.unwrap(), OwnerUsage::default());
        dir.reserve_store(new_store("s2", 1, 5)).await.unwrap();
    }

    #[tokio::test]
    async fn test_status_never_moves_backwards() {
        let dir = JsonStoreDirectory::in_memory();
        dir.insert_owner(owner(1, 5, 50)).await.unwrap();
        dir.reserve_store(new_store("s1", 1, 5)).await.unwrap();

        dir.update_store_status("s1", StoreStatus::Provisioning).await.unwrap();
        dir.update_store_status("s1", StoreStatus::Ready).await.unwrap();
        assert_matches!(
            dir.update_store_status("s1", StoreStatus::Provisioning).await,
            Err(Error::InvalidStatusTransition { from: StoreStatus::Ready, to: StoreStatus::Provisioning, .. })
        );
        assert_matches!(
            dir.update_store_status("s1", StoreStatus::Failed).await,
            Err(Error::InvalidStatusTransition { .. })
        );
        assert_eq!(
            dir.get_store("s1").await.unwrap().unwrap().status,
            StoreStatus::Ready
        );
        assert_matches!(
            dir.update_store_status("missing", StoreStatus::Ready).await,
            Err(Error::NotFound { .. })
        );
    }

    #[tokio::test]
    async fn test_concurrent_reservations_respect_quota() {
        let dir = Arc::new(JsonStoreDirectory::in_memory());
        dir.insert_owner(owner(1, 2, 100)).await.unwrap();

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let dir = dir.clone();
                tokio::spawn(async move { dir.reserve_store(new_store(&format!("s{}", i), 1, 5)).await })
            })
            .collect();

        let mut granted = 0;
        for handle in handles {
            if handle.await.unwrap().is_ok() {
                granted += 1;
            }
        }
        assert_eq!(granted, 2);
        assert_eq!(dir.owner_usage(1).await.unwrap().store_count, 2);
    }

    #[tokio::test]
    async fn test_list_joins_owner_names() {
        let dir = JsonStoreDirectory::in_memory();
        dir.insert_owner(owner(1, 5, 50)).await.unwrap();
        dir.insert_owner(owner(2, 5, 50)).await.unwrap();
        dir.reserve_store(new_store("a", 1, 5)).await.unwrap();
        dir.reserve_store(new_store("b", 2, 5)).await.unwrap();

        let stores = dir.list_stores_with_owners().await.unwrap();
        assert_eq!(stores.len(), 2);
        assert_eq!(stores["a"].owner_username, "owner-1");
        assert_eq!(stores["b"].owner_username, "owner-2");

        dir.deregister_store("a").await.unwrap();
        dir.deregister_store("a").await.unwrap();
        assert!(dir.get_store("a").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_file_backed_directory_survives_reopen() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("nested").join("directory.json");

        {
            let dir = JsonStoreDirectory::open(&path).await.unwrap();
            dir.insert_owner(owner(1, 2, 10)).await.unwrap();
            dir.reserve_store(new_store("s1", 1, 5)).await.unwrap();
            dir.update_store_status("s1", StoreStatus::Provisioning).await.unwrap();
        }

        let reopened = JsonStoreDirectory::open(&path).await.unwrap();
        assert_eq!(reopened.path(), Some(path.as_path()));
        let record = reopened.get_store("s1").await.unwrap().unwrap();
        assert_eq!(record.status, StoreStatus::Provisioning);
        assert_eq!(reopened.list_owners().await.unwrap().len(), 1);
        assert!(!path.with_extension("json.tmp").exists());
    }
}
