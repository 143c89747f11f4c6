//! Store Directory
//!
//! Durable registry of owners and stores, plus the quota rules evaluated
//! against it.

pub mod quota;
pub mod store;

pub use quota::*;
pub use store::*;

use crate::domain::ports::{Owner, StoreDirectory};
use crate::error::Result;
use tracing::info;

/// Default accounts: (username, max stores, max storage in Gi)
pub const DEFAULT_OWNERS: [(&str, u32, u32); 3] =
    [("admin", 6, 12), ("demo_user", 3, 5), ("starter", 2, 5)];

/// Insert the default owner accounts into an empty directory.
///
/// Does nothing when any owner already exists. Returns the number of owners
/// created. `password_hash` is stored verbatim on every account.
pub async fn seed_default_owners(directory: &dyn StoreDirectory, password_hash: &str) -> Result<usize> {
    let existing = directory.list_owners().await?;
    if !existing.is_empty() {
        info!(owners = existing.len(), "Directory already has owners, skipping seed");
        return Ok(0);
    }

    for (id, (username, max_stores, max_storage_gi)) in (1..).zip(DEFAULT_OWNERS) {
        directory
            .insert_owner(Owner {
                id,
                username: username.to_string(),
                password_hash: password_hash.to_string(),
                max_stores,
                max_storage_gi,
            })
            .await?;
    }

    info!(owners = DEFAULT_OWNERS.len(), "Seeded default owners");
    Ok(DEFAULT_OWNERS.len())
}
